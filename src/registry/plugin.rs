//! Schema plugins: extend every compiled schema and hook record saves.

use crate::error::SchemaError;
use crate::schema::{KeyOptions, RelationOptions, SchemaDefinition};
use crate::store::Document;
use serde_json::Value;
use std::future::Future;

tokio::task_local! {
    static CURRENT_ACTOR: String;
}

/// Run `fut` with `actor` as the ambient user for saves made inside it.
pub async fn with_actor<F: Future>(actor: impl Into<String>, fut: F) -> F::Output {
    CURRENT_ACTOR.scope(actor.into(), fut).await
}

/// Ambient user id, when running inside [`with_actor`].
pub fn current_actor() -> Option<String> {
    CURRENT_ACTOR.try_with(|a| a.clone()).ok()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveKind {
    Create,
    Update,
}

pub trait SchemaPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Applied to each schema before it is compiled.
    fn extend(&self, schema: SchemaDefinition) -> Result<SchemaDefinition, SchemaError> {
        Ok(schema)
    }

    /// Called on the document about to be written, before validation.
    fn before_save(&self, _schema: &SchemaDefinition, _doc: &mut Document, _kind: SaveKind) {}
}

/// Adds `createdBy` / `updatedBy` references to a user model and fills them from [`current_actor`].
pub struct IdentityAudit {
    user_namespace: String,
    skip_prefixes: Vec<String>,
}

pub const CREATED_BY: &str = "createdBy";
pub const UPDATED_BY: &str = "updatedBy";

impl IdentityAudit {
    pub fn new(user_namespace: impl Into<String>) -> Self {
        IdentityAudit {
            user_namespace: user_namespace.into(),
            skip_prefixes: vec!["protean.orm.".to_string()],
        }
    }

    /// Leave schemas under `prefix` untouched.
    pub fn skip(mut self, prefix: impl Into<String>) -> Self {
        self.skip_prefixes.push(prefix.into());
        self
    }

    fn applies(&self, schema: &SchemaDefinition) -> bool {
        !self.skip_prefixes.iter().any(|p| schema.name().starts_with(p.as_str()))
    }
}

impl SchemaPlugin for IdentityAudit {
    fn name(&self) -> &str {
        "identity-audit"
    }

    fn extend(&self, schema: SchemaDefinition) -> Result<SchemaDefinition, SchemaError> {
        if !self.applies(&schema) {
            return Ok(schema);
        }
        schema
            .belongs_to(
                &self.user_namespace,
                RelationOptions::new().local_field(CREATED_BY).named("creator"),
                KeyOptions::default(),
            )?
            .belongs_to(
                &self.user_namespace,
                RelationOptions::new().local_field(UPDATED_BY).named("updater"),
                KeyOptions::default(),
            )
    }

    fn before_save(&self, schema: &SchemaDefinition, doc: &mut Document, kind: SaveKind) {
        if !self.applies(schema) {
            return;
        }
        let Some(actor) = current_actor() else {
            return;
        };
        if kind == SaveKind::Create {
            doc.insert(CREATED_BY.into(), Value::String(actor.clone()));
        }
        doc.insert(UPDATED_BY.into(), Value::String(actor));
    }
}
