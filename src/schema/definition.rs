//! Immutable schema definition: fields, relation accessors and indexes of one model.

use crate::case::slug;
use crate::catalog::{FieldType, Required, ValidationRule};
use crate::error::SchemaError;
use crate::store::IndexSpec;
use regex::Regex;
use serde_json::Value;

pub const ID: &str = "id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// Concrete storage type a declared field type maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageType {
    Text,
    Float,
    Bool,
    Timestamp,
    Json,
    Array,
    ObjectRef,
    Email,
}

impl From<FieldType> for StorageType {
    fn from(t: FieldType) -> Self {
        match t {
            FieldType::String => StorageType::Text,
            FieldType::Number => StorageType::Float,
            FieldType::Boolean => StorageType::Bool,
            FieldType::Date => StorageType::Timestamp,
            FieldType::Object => StorageType::Json,
            FieldType::Array => StorageType::Array,
            FieldType::Reference => StorageType::ObjectRef,
            FieldType::Email => StorageType::Email,
        }
    }
}

impl StorageType {
    /// Whether a non-null JSON value can be stored under this type.
    pub fn accepts(&self, v: &Value) -> bool {
        match self {
            StorageType::Text | StorageType::Email | StorageType::ObjectRef => v.is_string(),
            StorageType::Float => v.is_number(),
            StorageType::Bool => v.is_boolean(),
            StorageType::Timestamp => v
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
            StorageType::Json => true,
            StorageType::Array => v.is_array(),
        }
    }

    /// JSON-schema `type` keyword.
    pub fn json_type(&self) -> Option<&'static str> {
        match self {
            StorageType::Text | StorageType::Email | StorageType::ObjectRef | StorageType::Timestamp => {
                Some("string")
            }
            StorageType::Float => Some("number"),
            StorageType::Bool => Some("boolean"),
            StorageType::Array => Some("array"),
            StorageType::Json => None,
        }
    }
}

/// Compiled `pattern` rule. Compares by source text.
#[derive(Clone, Debug)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Pattern)
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.0.is_match(s)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub alias: Option<String>,
    pub storage: StorageType,
    pub required: Required,
    pub default: Option<Value>,
    pub unique: bool,
    pub index: bool,
    pub enum_values: Option<Vec<Value>>,
    pub rules: ValidationRule,
    /// `rules.pattern`, compiled once when the field is built.
    pub pattern: Option<Pattern>,
    /// Target namespace of a reference field.
    pub reference: Option<String>,
    /// Maintained by the store layer, not accepted from callers.
    pub read_only: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, storage: StorageType) -> Self {
        FieldDef {
            name: name.into(),
            alias: None,
            storage,
            required: Required::default(),
            default: None,
            unique: false,
            index: false,
            enum_values: None,
            rules: ValidationRule::default(),
            pattern: None,
            reference: None,
            read_only: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = Required::Flag(true);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Values must match `source`.
    pub fn matching(mut self, source: &str) -> Result<Self, SchemaError> {
        let pattern = Pattern::new(source).map_err(|e| SchemaError::Invalid {
            what: "pattern",
            detail: format!("{}: {}", self.name, e),
        })?;
        self.rules.pattern = Some(source.to_string());
        self.pattern = Some(pattern);
        Ok(self)
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn default_value(mut self, v: Value) -> Self {
        self.default = Some(v);
        self
    }

    pub fn enum_values(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn reference(mut self, target: impl Into<String>) -> Self {
        self.reference = Some(target.into());
        self
    }

    fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Junction used by a many-to-many accessor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Through {
    pub model: String,
    /// Junction field holding this record's key.
    pub local_key: String,
    /// Junction field holding the target record's key.
    pub target_key: String,
}

/// Derived relation accessor. Resolves target records whose `foreign_field` equals this record's `local_field`,
/// or through a junction when `through` is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    pub local_field: String,
    pub foreign_field: String,
    pub cardinality: Cardinality,
    pub through: Option<Through>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub fields: Vec<String>,
    pub unique: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDefinition {
    name: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
    indexes: Vec<IndexDef>,
    discriminator_key: Option<String>,
    timestamps: bool,
}

impl SchemaDefinition {
    pub fn new(name: impl Into<String>) -> Result<Self, SchemaError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SchemaError::EmptyIdentity);
        }
        Ok(SchemaDefinition {
            name,
            fields: Vec::new(),
            relations: Vec::new(),
            indexes: Vec::new(),
            discriminator_key: None,
            timestamps: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last namespace segment.
    pub fn model_name(&self) -> &str {
        model_name(&self.name)
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn discriminator_key(&self) -> Option<&str> {
        self.discriminator_key.as_deref()
    }

    pub fn timestamps(&self) -> bool {
        self.timestamps
    }

    /// Add or replace a field by name.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    /// Add or replace a relation accessor by name.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        match self.relations.iter_mut().find(|r| r.name == relation.name) {
            Some(existing) => *existing = relation,
            None => self.relations.push(relation),
        }
        self
    }

    pub fn with_index(mut self, fields: &[&str], unique: bool) -> Self {
        let def = IndexDef {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique,
        };
        if !self.indexes.contains(&def) {
            self.indexes.push(def);
        }
        self
    }

    pub fn with_discriminator_key(mut self, key: impl Into<String>) -> Self {
        self.discriminator_key = Some(key.into());
        self
    }

    /// Attach `createdAt` / `updatedAt`, maintained on save.
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self.with_field(FieldDef::new(CREATED_AT, StorageType::Timestamp).read_only())
            .with_field(FieldDef::new(UPDATED_AT, StorageType::Timestamp).read_only())
    }

    /// Discriminated sub-type: base fields and relations overlaid with the variant's, under `name`.
    pub fn merge(&self, name: impl Into<String>, variant: &SchemaDefinition) -> SchemaDefinition {
        let mut merged = self.clone();
        merged.name = name.into();
        for f in &variant.fields {
            merged = merged.with_field(f.clone());
        }
        for r in &variant.relations {
            merged = merged.with_relation(r.clone());
        }
        for i in &variant.indexes {
            if !merged.indexes.contains(i) {
                merged.indexes.push(i.clone());
            }
        }
        merged
    }

    /// Store indexes for this schema in `collection`: field-level unique/index flags plus declared compound indexes.
    pub fn index_specs(&self, collection: &str) -> Vec<IndexSpec> {
        let mut specs = Vec::new();
        for f in &self.fields {
            if f.unique || f.index {
                specs.push(IndexSpec {
                    name: index_name(collection, &[f.name.as_str()], f.unique),
                    fields: vec![f.name.clone()],
                    unique: f.unique,
                    partial: f.unique && !f.required.always(),
                });
            }
        }
        for i in &self.indexes {
            let fields: Vec<&str> = i.fields.iter().map(String::as_str).collect();
            specs.push(IndexSpec {
                name: index_name(collection, &fields, i.unique),
                fields: i.fields.clone(),
                unique: i.unique,
                partial: false,
            });
        }
        specs
    }
}

/// Last segment of a dotted namespace.
pub fn model_name(namespace: &str) -> &str {
    namespace.rsplit('.').next().unwrap_or(namespace)
}

fn index_name(collection: &str, fields: &[&str], unique: bool) -> String {
    let cols: Vec<String> = fields.iter().map(|f| slug(f)).collect();
    let suffix = if unique { "key" } else { "idx" };
    format!("{}__{}_{}", slug(collection), cols.join("_"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_name_is_rejected() {
        assert_eq!(SchemaDefinition::new("  ").unwrap_err(), SchemaError::EmptyIdentity);
    }

    #[test]
    fn optional_unique_fields_get_partial_indexes() {
        let s = SchemaDefinition::new("shop.Customer")
            .unwrap()
            .with_field(FieldDef::new("email", StorageType::Email).unique())
            .with_field(FieldDef::new("code", StorageType::Text).required().unique())
            .with_index(&["email", "code"], true);
        let specs = s.index_specs("shop.Customer");
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].name, "shop_customer__email_key");
        assert!(specs[0].partial);
        assert!(!specs[1].partial);
        assert_eq!(specs[2].fields, vec!["email".to_string(), "code".to_string()]);
    }

    #[test]
    fn storage_accepts_matching_values() {
        assert!(StorageType::Timestamp.accepts(&json!("2024-05-01T10:00:00Z")));
        assert!(!StorageType::Timestamp.accepts(&json!("yesterday")));
        assert!(StorageType::Float.accepts(&json!(1.5)));
        assert!(!StorageType::Bool.accepts(&json!("true")));
    }

    #[test]
    fn merge_overlays_variant_fields() {
        let base = SchemaDefinition::new("orm.association")
            .unwrap()
            .with_field(FieldDef::new("type", StorageType::Text));
        let variant = SchemaDefinition::new("hierarchical")
            .unwrap()
            .with_field(FieldDef::new("many", StorageType::Bool).default_value(json!(true)));
        let merged = base.merge("orm.hierarchical", &variant);
        assert_eq!(merged.name(), "orm.hierarchical");
        assert!(merged.has_field("type") && merged.has_field("many"));
    }
}
