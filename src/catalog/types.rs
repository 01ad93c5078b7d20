//! Persisted Model, Field and Association records.

use crate::error::{AppError, SchemaError, ValidationError, ViolationKind};
use crate::store::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Join non-empty parts with '.'.
pub fn join_namespace(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(".")
}

fn to_document<T: Serialize>(value: &T) -> Result<Document, AppError> {
    match serde_json::to_value(value).map_err(|e| AppError::BadRequest(e.to_string()))? {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::BadRequest("record did not serialize to an object".into())),
    }
}

fn from_document<T: for<'de> Deserialize<'de>>(doc: &Document) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(doc.clone())).map_err(|e| AppError::BadRequest(e.to_string()))
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub package: String,
}

impl ModelRecord {
    pub fn new(package: &str, module: &str, name: &str) -> Self {
        ModelRecord {
            id: String::new(),
            name: name.to_string(),
            module: module.to_string(),
            package: package.to_string(),
        }
    }

    pub fn namespace(&self) -> String {
        join_namespace(&[&self.package, &self.module, &self.name])
    }

    /// Stored form, carrying the derived namespace for the unique index.
    pub fn to_document(&self) -> Result<Document, AppError> {
        let mut doc = to_document(self)?;
        doc.insert("namespace".into(), Value::String(self.namespace()));
        Ok(doc)
    }

    pub fn from_document(doc: &Document) -> Result<Self, AppError> {
        from_document(doc)
    }
}

/// Declared primitive type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    #[serde(alias = "mixed")]
    Object,
    Array,
    #[serde(alias = "objectId")]
    Reference,
    Email,
}

impl FieldType {
    pub const ALL: &'static [&'static str] = &[
        "string", "number", "boolean", "date", "object", "array", "reference", "email",
    ];
}

/// Always/never required, or required only when another field has a value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Required {
    Flag(bool),
    When {
        when: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        equals: Option<Value>,
    },
}

impl Default for Required {
    fn default() -> Self {
        Required::Flag(false)
    }
}

impl Required {
    pub fn always(&self) -> bool {
        matches!(self, Required::Flag(true))
    }

    /// Whether the rule applies to `doc`.
    pub fn applies(&self, doc: &Document) -> bool {
        match self {
            Required::Flag(b) => *b,
            Required::When { when, equals } => match (doc.get(when), equals) {
                (None, _) | (Some(Value::Null), _) => false,
                (Some(_), None) => true,
                (Some(v), Some(expected)) => v == expected,
            },
        }
    }
}

/// Field-level validator set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl ValidationRule {
    pub fn is_empty(&self) -> bool {
        *self == ValidationRule::default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRecord {
    #[serde(default)]
    pub id: String,
    pub model_id: String,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: Required,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "ValidationRule::is_empty")]
    pub validators: ValidationRule,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub index: bool,
    /// Target namespace for reference fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl FieldRecord {
    pub fn new(model_id: &str, name: &str, field_type: FieldType) -> Self {
        FieldRecord {
            id: String::new(),
            model_id: model_id.to_string(),
            name: name.to_string(),
            alias: String::new(),
            field_type,
            required: Required::default(),
            default: None,
            enum_values: None,
            validators: ValidationRule::default(),
            unique: false,
            index: false,
            reference: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = Required::Flag(true);
        self
    }

    pub fn to_document(&self) -> Result<Document, AppError> {
        to_document(self)
    }

    pub fn from_document(doc: &Document) -> Result<Self, AppError> {
        from_document(doc)
    }
}

/// Naming configuration for one side of an association. Blank means "use the generated default".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SideConfig {
    pub primary_key: String,
    pub foreign_key: String,
    pub related_name: String,
    pub reverse_name: String,
}

fn non_blank(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

impl SideConfig {
    pub fn primary_key(&self) -> Option<&str> {
        non_blank(&self.primary_key)
    }

    pub fn foreign_key(&self) -> Option<&str> {
        non_blank(&self.foreign_key)
    }

    pub fn related_name(&self) -> Option<&str> {
        non_blank(&self.related_name)
    }

    pub fn reverse_name(&self) -> Option<&str> {
        non_blank(&self.reverse_name)
    }

    /// Raw value of a naming field by its JSON key.
    pub fn get(&self, key: NamingField) -> &str {
        match key {
            NamingField::ForeignKey => &self.foreign_key,
            NamingField::RelatedName => &self.related_name,
            NamingField::ReverseName => &self.reverse_name,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    From,
    To,
}

impl Side {
    pub fn key(&self) -> &'static str {
        match self {
            Side::From => "fromModel",
            Side::To => "toModel",
        }
    }
}

/// Naming fields subject to uniqueness checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamingField {
    ForeignKey,
    RelatedName,
    ReverseName,
}

impl NamingField {
    pub fn key(&self) -> &'static str {
        match self {
            NamingField::ForeignKey => "foreignKey",
            NamingField::RelatedName => "relatedName",
            NamingField::ReverseName => "reverseName",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssociationKind {
    OneToMany,
    OneToOne,
    ManyToMany,
}

/// Discriminated association payload. Hierarchical pairs a dominant and a subordinate model;
/// non-hierarchical links both through a junction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssociationVariant {
    Hierarchical { many: bool },
    NonHierarchical { through_model_id: Option<String> },
}

pub const HIERARCHICAL: &str = "hierarchical";
pub const NON_HIERARCHICAL: &str = "nonHierarchical";
const VARIANT_TAGS: &str = "hierarchical, nonHierarchical, oneToMany, oneToOne, manyToMany";

impl AssociationVariant {
    pub fn tag(&self) -> &'static str {
        match self {
            AssociationVariant::Hierarchical { .. } => HIERARCHICAL,
            AssociationVariant::NonHierarchical { .. } => NON_HIERARCHICAL,
        }
    }

    pub fn kind(&self) -> AssociationKind {
        match self {
            AssociationVariant::Hierarchical { many: true } => AssociationKind::OneToMany,
            AssociationVariant::Hierarchical { many: false } => AssociationKind::OneToOne,
            AssociationVariant::NonHierarchical { .. } => AssociationKind::ManyToMany,
        }
    }

    /// Build from a type tag. `many` only applies to hierarchical tags.
    pub fn from_tag(
        tag: &str,
        many: Option<bool>,
        through_model_id: Option<String>,
    ) -> Result<Self, SchemaError> {
        match tag {
            HIERARCHICAL | "oneToMany" => Ok(AssociationVariant::Hierarchical {
                many: many.unwrap_or(true),
            }),
            "oneToOne" => Ok(AssociationVariant::Hierarchical { many: false }),
            NON_HIERARCHICAL | "manyToMany" => Ok(AssociationVariant::NonHierarchical {
                through_model_id: through_model_id.filter(|t| !t.is_empty()),
            }),
            other => Err(SchemaError::UnknownVariant {
                tag: other.to_string(),
                expected: VARIANT_TAGS,
            }),
        }
    }

    /// Naming fields that produce names for this variant.
    pub fn naming_fields(&self) -> &'static [(Side, NamingField)] {
        match self {
            AssociationVariant::Hierarchical { .. } => &[
                (Side::From, NamingField::ReverseName),
                (Side::To, NamingField::ForeignKey),
                (Side::To, NamingField::RelatedName),
            ],
            AssociationVariant::NonHierarchical { .. } => &[
                (Side::From, NamingField::ForeignKey),
                (Side::From, NamingField::RelatedName),
                (Side::From, NamingField::ReverseName),
                (Side::To, NamingField::ForeignKey),
                (Side::To, NamingField::RelatedName),
                (Side::To, NamingField::ReverseName),
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssociationRecord {
    pub id: String,
    pub from_model_id: String,
    pub to_model_id: String,
    pub from_model: SideConfig,
    pub to_model: SideConfig,
    pub variant: AssociationVariant,
}

/// Wire form; the variant tag is validated when converting into [`AssociationRecord`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociationDocument {
    #[serde(default)]
    id: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(default)]
    from_model_id: String,
    #[serde(default)]
    to_model_id: String,
    #[serde(default)]
    from_model: SideConfig,
    #[serde(default)]
    to_model: SideConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    many: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    through_model_id: Option<String>,
}

impl AssociationRecord {
    pub fn hierarchical(from_model_id: &str, to_model_id: &str, many: bool) -> Self {
        AssociationRecord {
            id: String::new(),
            from_model_id: from_model_id.to_string(),
            to_model_id: to_model_id.to_string(),
            from_model: SideConfig::default(),
            to_model: SideConfig::default(),
            variant: AssociationVariant::Hierarchical { many },
        }
    }

    pub fn many_to_many(from_model_id: &str, to_model_id: &str, through_model_id: Option<&str>) -> Self {
        AssociationRecord {
            id: String::new(),
            from_model_id: from_model_id.to_string(),
            to_model_id: to_model_id.to_string(),
            from_model: SideConfig::default(),
            to_model: SideConfig::default(),
            variant: AssociationVariant::NonHierarchical {
                through_model_id: through_model_id.map(str::to_string),
            },
        }
    }

    pub fn side(&self, side: Side) -> &SideConfig {
        match side {
            Side::From => &self.from_model,
            Side::To => &self.to_model,
        }
    }

    pub fn side_model_id(&self, side: Side) -> &str {
        match side {
            Side::From => &self.from_model_id,
            Side::To => &self.to_model_id,
        }
    }

    pub fn through_model_id(&self) -> Option<&str> {
        match &self.variant {
            AssociationVariant::NonHierarchical { through_model_id } => through_model_id.as_deref(),
            AssociationVariant::Hierarchical { .. } => None,
        }
    }

    /// Ids of every model this association touches.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids = vec![self.from_model_id.clone(), self.to_model_id.clone()];
        if let Some(t) = self.through_model_id() {
            ids.push(t.to_string());
        }
        ids.dedup();
        ids
    }

    /// Parse a stored or submitted document. A missing tag is a validation error,
    /// an unknown one a schema error.
    pub fn from_document(doc: &Document) -> Result<Self, AppError> {
        let raw: AssociationDocument = from_document(doc)?;
        let tag = raw
            .tag
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ValidationError::single("type", ViolationKind::Required, "Path `type` is required."))?;
        let variant = AssociationVariant::from_tag(&tag, raw.many, raw.through_model_id)?;
        Ok(AssociationRecord {
            id: raw.id,
            from_model_id: raw.from_model_id,
            to_model_id: raw.to_model_id,
            from_model: raw.from_model,
            to_model: raw.to_model,
            variant,
        })
    }

    pub fn to_document(&self) -> Result<Document, AppError> {
        let (many, through_model_id) = match &self.variant {
            AssociationVariant::Hierarchical { many } => (Some(*many), None),
            AssociationVariant::NonHierarchical { through_model_id } => (None, through_model_id.clone()),
        };
        to_document(&AssociationDocument {
            id: self.id.clone(),
            tag: Some(self.variant.tag().to_string()),
            from_model_id: self.from_model_id.clone(),
            to_model_id: self.to_model_id.clone(),
            from_model: self.from_model.clone(),
            to_model: self.to_model.clone(),
            many,
            through_model_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn namespace_skips_empty_parts() {
        assert_eq!(ModelRecord::new("", "", "Author").namespace(), "Author");
        assert_eq!(ModelRecord::new("blog", "core", "Post").namespace(), "blog.core.Post");
    }

    #[test]
    fn association_tags_map_to_variants() {
        let a = AssociationRecord::from_document(&doc(json!({
            "type": "oneToOne", "fromModelId": "a", "toModelId": "b"
        })))
        .unwrap();
        assert_eq!(a.variant.kind(), AssociationKind::OneToOne);
        let stored = a.to_document().unwrap();
        assert_eq!(stored["type"], "hierarchical");
        assert_eq!(stored["many"], false);
    }

    #[test]
    fn unknown_association_tag_is_a_schema_error() {
        let err = AssociationRecord::from_document(&doc(json!({"type": "sideways"}))).unwrap_err();
        assert!(matches!(err, AppError::Schema(SchemaError::UnknownVariant { .. })));
        let err = AssociationRecord::from_document(&doc(json!({}))).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref v) if v.has("type", ViolationKind::Required)));
    }

    #[test]
    fn conditional_required_follows_other_field() {
        let rule: Required = serde_json::from_value(json!({"when": "kind", "equals": "company"})).unwrap();
        assert!(rule.applies(&doc(json!({"kind": "company"}))));
        assert!(!rule.applies(&doc(json!({"kind": "person"}))));
        let flag: Required = serde_json::from_value(json!(true)).unwrap();
        assert!(flag.always());
    }
}
