//! Built-in schemas registered at bootstrap: the model catalog itself and migration tracking.

use super::association::{KeyOptions, RelationOptions};
use super::definition::{FieldDef, SchemaDefinition, StorageType};
use crate::catalog::{FieldType, HIERARCHICAL, NON_HIERARCHICAL};
use crate::error::SchemaError;
use crate::registry::Registrant;
use serde_json::{json, Value};

pub const MODEL_NAMESPACE: &str = "protean.orm.model";
pub const FIELD_NAMESPACE: &str = "protean.orm.field";
pub const ASSOCIATION_NAMESPACE: &str = "protean.orm.association";
pub const MIGRATION_NAMESPACE: &str = "protean.orm.migration";

/// Discriminator key of association records.
pub const ASSOCIATION_TYPE_KEY: &str = "type";

fn text(name: &str) -> FieldDef {
    FieldDef::new(name, StorageType::Text)
}

fn required_ref() -> KeyOptions {
    KeyOptions {
        required: true,
        unique: false,
    }
}

fn model_schema() -> Result<SchemaDefinition, SchemaError> {
    SchemaDefinition::new(MODEL_NAMESPACE)?
        .with_field(text("name").required())
        .with_field(text("module").default_value(json!("")))
        .with_field(text("package").default_value(json!("")))
        .with_field(text("namespace").required().unique())
        .with_timestamps()
        .has_many(FIELD_NAMESPACE, RelationOptions::new().foreign_field("modelId").named("fields"))?
        .has_many(
            ASSOCIATION_NAMESPACE,
            RelationOptions::new().foreign_field("fromModelId").named("fromAssociations"),
        )?
        .has_many(
            ASSOCIATION_NAMESPACE,
            RelationOptions::new().foreign_field("toModelId").named("toAssociations"),
        )
}

fn field_schema() -> Result<SchemaDefinition, SchemaError> {
    let types: Vec<Value> = FieldType::ALL.iter().map(|t| json!(t)).collect();
    Ok(SchemaDefinition::new(FIELD_NAMESPACE)?
        .with_field(text("name").required())
        .with_field(text("alias").default_value(json!("")))
        .with_field(text("type").required().enum_values(types))
        .with_field(FieldDef::new("required", StorageType::Json).default_value(json!(false)))
        .with_field(FieldDef::new("default", StorageType::Json))
        .with_field(FieldDef::new("enum", StorageType::Array))
        .with_field(FieldDef::new("validators", StorageType::Json))
        .with_field(FieldDef::new("unique", StorageType::Bool).default_value(json!(false)))
        .with_field(FieldDef::new("index", StorageType::Bool).default_value(json!(false)))
        .with_field(text("reference"))
        .with_timestamps()
        .belongs_to(
            MODEL_NAMESPACE,
            RelationOptions::new().local_field("modelId").named("model"),
            required_ref(),
        )?
        .with_index(&["modelId", "name"], true))
}

fn association_schema() -> Result<SchemaDefinition, SchemaError> {
    SchemaDefinition::new(ASSOCIATION_NAMESPACE)?
        .with_discriminator_key(ASSOCIATION_TYPE_KEY)
        .with_field(
            text(ASSOCIATION_TYPE_KEY)
                .required()
                .enum_values(vec![json!(HIERARCHICAL), json!(NON_HIERARCHICAL)]),
        )
        .with_field(FieldDef::new("fromModel", StorageType::Json).default_value(json!({})))
        .with_field(FieldDef::new("toModel", StorageType::Json).default_value(json!({})))
        .with_timestamps()
        .belongs_to(
            MODEL_NAMESPACE,
            RelationOptions::new().local_field("fromModelId").named("from"),
            required_ref(),
        )?
        .belongs_to(
            MODEL_NAMESPACE,
            RelationOptions::new().local_field("toModelId").named("to"),
            required_ref(),
        )
}

fn hierarchical_variant() -> Result<SchemaDefinition, SchemaError> {
    Ok(SchemaDefinition::new("HierarchicalAssociation")?
        .with_field(FieldDef::new("many", StorageType::Bool).default_value(json!(true))))
}

fn non_hierarchical_variant() -> Result<SchemaDefinition, SchemaError> {
    SchemaDefinition::new("NonHierarchicalAssociation")?.belongs_to(
        MODEL_NAMESPACE,
        RelationOptions::new().local_field("throughModelId").named("through"),
        KeyOptions::default(),
    )
}

fn migration_schema() -> Result<SchemaDefinition, SchemaError> {
    Ok(SchemaDefinition::new(MIGRATION_NAMESPACE)?
        .with_field(text("package").required())
        .with_field(text("module").required())
        .with_field(text("name").required())
        .with_field(text("namespace").required().unique())
        .with_field(text("description").default_value(json!("")))
        .with_field(FieldDef::new("dependsOn", StorageType::Array).default_value(json!([])))
        .with_field(FieldDef::new("appliedAt", StorageType::Timestamp))
        .with_timestamps())
}

/// Registrants for every built-in schema.
pub fn core_registrants() -> Result<Vec<Registrant>, SchemaError> {
    Ok(vec![
        Registrant::new(model_schema()?),
        Registrant::new(field_schema()?),
        Registrant::new(association_schema()?)
            .with_discriminator(HIERARCHICAL, hierarchical_variant()?)
            .with_discriminator(NON_HIERARCHICAL, non_hierarchical_variant()?),
        Registrant::new(migration_schema()?),
    ])
}
