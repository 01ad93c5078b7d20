//! Schema definitions, the schema builder and the association graph.

mod association;
mod builder;
pub mod builtin;
mod definition;

pub use association::{
    default_foreign_key, junction_namespace, junction_schema, Associated, KeyOptions, RelationOptions,
};
pub use builder::build_schema;
pub use definition::{
    model_name, Cardinality, FieldDef, IndexDef, Pattern, RelationDef, SchemaDefinition, StorageType, Through,
    CREATED_AT, ID, UPDATED_AT,
};
