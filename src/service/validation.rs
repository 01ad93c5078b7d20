//! Record validation from schema field definitions.

use crate::catalog::ValidationRule;
use crate::error::{ValidationError, ViolationKind};
use crate::schema::{FieldDef, SchemaDefinition, StorageType};
use crate::store::Document;
use serde_json::Value;

pub struct RecordValidator;

impl RecordValidator {
    /// Validate a full record against every field of `schema`. Collects all violations.
    pub fn validate(schema: &SchemaDefinition, doc: &Document) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        for field in schema.fields() {
            let value = doc.get(&field.name).filter(|v| !v.is_null());
            match value {
                None => {
                    if field.required.applies(doc) {
                        errors.push(
                            &field.name,
                            ViolationKind::Required,
                            format!("Path `{}` is required.", field.name),
                        );
                    }
                }
                Some(v) => validate_field(field, v, doc, &mut errors),
            }
        }
        errors.into_result()
    }
}

fn validate_field(field: &FieldDef, v: &Value, doc: &Document, errors: &mut ValidationError) {
    let col = field.name.as_str();
    if !field.storage.accepts(v) {
        errors.push(
            col,
            ViolationKind::Type,
            format!("{} must be of type {:?}", col, field.storage),
        );
        return;
    }
    if field.required.applies(doc) && v.as_str() == Some("") {
        errors.push(col, ViolationKind::Required, format!("Path `{}` is required.", col));
        return;
    }
    if field.storage == StorageType::Email && !is_email(v) {
        errors.push(col, ViolationKind::Format, format!("{} must be a valid email", col));
    }
    if let Some(values) = &field.enum_values {
        if !values.iter().any(|a| value_eq(v, a)) {
            errors.push(
                col,
                ViolationKind::Enum,
                format!("`{}` is not a valid enum value for path `{}`.", display(v), col),
            );
        }
    }
    validate_rules(col, v, &field.rules, errors);
    if let (Some(pattern), Some(s)) = (&field.pattern, v.as_str()) {
        if !pattern.is_match(s) {
            errors.push(
                col,
                ViolationKind::Pattern,
                format!("{} does not match required pattern", col),
            );
        }
    }
}

fn validate_rules(col: &str, v: &Value, rule: &ValidationRule, errors: &mut ValidationError) {
    if let Some(format) = &rule.format {
        validate_format(col, v, format, errors);
    }
    if let Some(max) = rule.max_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() > max as usize {
                errors.push(
                    col,
                    ViolationKind::MaxLength,
                    format!("{} must be at most {} characters", col, max),
                );
            }
        }
    }
    if let Some(min) = rule.min_length {
        if let Some(s) = v.as_str() {
            if s.chars().count() < min as usize {
                errors.push(
                    col,
                    ViolationKind::MinLength,
                    format!("{} must be at least {} characters", col, min),
                );
            }
        }
    }
    if let Some(ref allowed) = rule.allowed {
        if !allowed.iter().any(|a| value_eq(v, a)) {
            errors.push(
                col,
                ViolationKind::Allowed,
                format!(
                    "{} must be one of: {:?}",
                    col,
                    allowed.iter().take(5).collect::<Vec<_>>()
                ),
            );
        }
    }
    if let Some(min) = rule.minimum {
        if let Some(n) = v.as_f64() {
            if n < min {
                errors.push(col, ViolationKind::Minimum, format!("{} must be at least {}", col, min));
            }
        }
    }
    if let Some(max) = rule.maximum {
        if let Some(n) = v.as_f64() {
            if n > max {
                errors.push(col, ViolationKind::Maximum, format!("{} must be at most {}", col, max));
            }
        }
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(s), Value::String(t)) => s == t,
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_email(v: &Value) -> bool {
    v.as_str().map(|s| s.contains('@') && s.len() >= 3).unwrap_or(false)
}

fn validate_format(col: &str, v: &Value, format: &str, errors: &mut ValidationError) {
    let ok = match format.to_lowercase().as_str() {
        "email" => is_email(v),
        "uuid" => v.as_str().map(|s| uuid::Uuid::parse_str(s).is_ok()).unwrap_or(false),
        "date-time" => v
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        _ => true,
    };
    if !ok {
        errors.push(col, ViolationKind::Format, format!("{} must be a valid {}", col, format));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Required;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    fn schema() -> SchemaDefinition {
        let code = FieldDef::new("code", StorageType::Text).matching("^[A-Z]{3}$").unwrap();
        let mut age = FieldDef::new("age", StorageType::Float);
        age.rules.minimum = Some(0.0);
        let mut vat = FieldDef::new("vat", StorageType::Text);
        vat.required = Required::When {
            when: "kind".into(),
            equals: Some(json!("company")),
        };
        SchemaDefinition::new("crm.Contact")
            .unwrap()
            .with_field(FieldDef::new("name", StorageType::Text).required())
            .with_field(FieldDef::new("kind", StorageType::Text).enum_values(vec![json!("person"), json!("company")]))
            .with_field(FieldDef::new("email", StorageType::Email))
            .with_field(code)
            .with_field(age)
            .with_field(vat)
    }

    #[test]
    fn collects_every_violation() {
        let err = RecordValidator::validate(
            &schema(),
            &doc(json!({"name": "", "kind": "robot", "email": "nope", "code": "ab", "age": -1})),
        )
        .unwrap_err();
        assert!(err.has("name", ViolationKind::Required));
        assert!(err.has("kind", ViolationKind::Enum));
        assert!(err.has("email", ViolationKind::Format));
        assert!(err.has("code", ViolationKind::Pattern));
        assert!(err.has("age", ViolationKind::Minimum));
        assert_eq!(err.violations.len(), 5);
    }

    #[test]
    fn conditional_required_and_types() {
        let err = RecordValidator::validate(&schema(), &doc(json!({"name": "Acme", "kind": "company"}))).unwrap_err();
        assert!(err.has("vat", ViolationKind::Required));
        let err = RecordValidator::validate(&schema(), &doc(json!({"name": 5}))).unwrap_err();
        assert!(err.has("name", ViolationKind::Type));
        assert!(RecordValidator::validate(&schema(), &doc(json!({"name": "Ann", "kind": "person"}))).is_ok());
    }
}
