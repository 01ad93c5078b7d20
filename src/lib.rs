//! Protean ORM: data models defined as records, compiled into live handles over a document store,
//! plus dependency-ordered migrations.

pub mod case;
pub mod catalog;
pub mod error;
pub mod migration;
pub mod registry;
pub mod schema;
pub mod service;
pub mod settings;
pub mod sql;
pub mod store;

pub use catalog::{
    AssociationRecord, AssociationVariant, Catalog, Change, FieldRecord, FieldType, ModelRecord, SideConfig,
};
pub use error::{AppError, MigrationError, SchemaError, StoreError, ValidationError, ViolationKind};
pub use migration::{
    Direction, MigrationContext, MigrationModule, MigrationRecord, MigrationReport, MigrationUnit, Migrator,
    RunOptions, StaticModule,
};
pub use registry::{FindOptions, IdentityAudit, LiveModel, ModelRegistry, Page, Registrant, Related, SchemaPlugin};
pub use schema::{build_schema, KeyOptions, RelationOptions, SchemaDefinition};
pub use settings::Settings;
pub use store::{ensure_database_exists, DocumentStore, Document, Filter, MemoryStore, PgStore, SortOrder};
