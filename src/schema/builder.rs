//! Builds a schema definition from persisted field records.

use super::definition::{FieldDef, Pattern, SchemaDefinition, StorageType};
use crate::catalog::FieldRecord;
use crate::error::SchemaError;
use std::collections::HashSet;

/// Build the definition for `identity` from its fields, in order. Timestamps are always attached.
/// Pure: nothing is registered or stored.
pub fn build_schema(identity: &str, fields: &[FieldRecord]) -> Result<SchemaDefinition, SchemaError> {
    let mut schema = SchemaDefinition::new(identity)?;
    let mut seen = HashSet::new();
    for f in fields {
        if !seen.insert(f.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                schema: identity.to_string(),
                field: f.name.clone(),
            });
        }
        schema = schema.with_field(field_def(f)?);
    }
    Ok(schema.with_timestamps())
}

fn field_def(f: &FieldRecord) -> Result<FieldDef, SchemaError> {
    if f.name.trim().is_empty() {
        return Err(SchemaError::Invalid {
            what: "field name",
            detail: "field name must not be empty".into(),
        });
    }
    let pattern = f
        .validators
        .pattern
        .as_deref()
        .map(Pattern::new)
        .transpose()
        .map_err(|e| SchemaError::Invalid {
            what: "pattern",
            detail: format!("{}: {}", f.name, e),
        })?;
    let storage = StorageType::from(f.field_type);
    Ok(FieldDef {
        name: f.name.clone(),
        alias: (!f.alias.is_empty()).then(|| f.alias.clone()),
        storage,
        required: f.required.clone(),
        default: f.default.clone(),
        unique: f.unique,
        index: f.index,
        enum_values: f.enum_values.clone(),
        rules: f.validators.clone(),
        pattern,
        reference: f.reference.clone().filter(|_| storage == StorageType::ObjectRef),
        read_only: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldType, Required};
    use crate::schema::{CREATED_AT, UPDATED_AT};
    use serde_json::json;

    #[test]
    fn maps_types_and_directives() {
        let mut title = FieldRecord::new("m1", "title", FieldType::String).required();
        title.validators.max_length = Some(80);
        let mut views = FieldRecord::new("m1", "views", FieldType::Number);
        views.default = Some(json!(0));
        views.index = true;
        let mut author = FieldRecord::new("m1", "authorId", FieldType::Reference);
        author.reference = Some("blog.Author".into());

        let s = build_schema("blog.Post", &[title, views, author]).unwrap();
        let names: Vec<&str> = s.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["title", "views", "authorId", CREATED_AT, UPDATED_AT]);
        let title = s.field("title").unwrap();
        assert_eq!(title.storage, StorageType::Text);
        assert_eq!(title.required, Required::Flag(true));
        assert_eq!(title.rules.max_length, Some(80));
        assert!(title.pattern.is_none());
        assert_eq!(s.field("views").unwrap().default, Some(json!(0)));
        assert_eq!(s.field("authorId").unwrap().reference.as_deref(), Some("blog.Author"));
        assert!(s.timestamps());
    }

    #[test]
    fn rejects_empty_identity_and_duplicates() {
        assert_eq!(build_schema("", &[]).unwrap_err(), SchemaError::EmptyIdentity);
        let dup = vec![
            FieldRecord::new("m", "a", FieldType::String),
            FieldRecord::new("m", "a", FieldType::Number),
        ];
        assert!(matches!(
            build_schema("X", &dup),
            Err(SchemaError::DuplicateField { ref field, .. }) if field == "a"
        ));
    }

    #[test]
    fn invalid_pattern_fails_at_build_time() {
        let mut f = FieldRecord::new("m", "code", FieldType::String);
        f.validators.pattern = Some("[".into());
        assert!(matches!(build_schema("X", &[f]), Err(SchemaError::Invalid { what: "pattern", .. })));
        let mut sku = FieldRecord::new("m", "sku", FieldType::String);
        sku.validators.pattern = Some("^[A-Z]+$".into());
        let s = build_schema("X", &[sku]).unwrap();
        let compiled = s.field("sku").unwrap().pattern.as_ref().unwrap();
        assert_eq!(compiled.as_str(), "^[A-Z]+$");
        assert!(compiled.is_match("ABC") && !compiled.is_match("abc"));
    }
}
