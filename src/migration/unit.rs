//! Migration units, the modules contributing them, and persisted migration records.

use crate::catalog::join_namespace;
use crate::error::AppError;
use crate::registry::ModelRegistry;
use crate::store::Document;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type UnitResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Forward or backward procedure of a unit.
pub type MigrationFn = Arc<dyn Fn(MigrationContext) -> BoxFuture<'static, UnitResult> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forwards,
    Backwards,
}

/// Passed to each procedure.
#[derive(Clone)]
pub struct MigrationContext {
    pub registry: Arc<ModelRegistry>,
    pub namespace: String,
}

/// One named, dependency-ordered change. Identified by `package.module.name`.
#[derive(Clone)]
pub struct MigrationUnit {
    pub package: String,
    pub module: String,
    pub name: String,
    pub description: String,
    pub depends_on: Vec<String>,
    forwards: Option<MigrationFn>,
    backwards: Option<MigrationFn>,
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("namespace", &self.namespace())
            .field("depends_on", &self.depends_on)
            .field("forwards", &self.forwards.is_some())
            .field("backwards", &self.backwards.is_some())
            .finish()
    }
}

fn boxed<F, Fut>(f: F) -> MigrationFn
where
    F: Fn(MigrationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = UnitResult> + Send + 'static,
{
    Arc::new(move |ctx: MigrationContext| -> BoxFuture<'static, UnitResult> { Box::pin(f(ctx)) })
}

impl MigrationUnit {
    pub fn new(package: &str, module: &str, name: &str) -> Self {
        MigrationUnit {
            package: package.to_string(),
            module: module.to_string(),
            name: name.to_string(),
            description: String::new(),
            depends_on: Vec::new(),
            forwards: None,
            backwards: None,
        }
    }

    pub fn namespace(&self) -> String {
        join_namespace(&[&self.package, &self.module, &self.name])
    }

    pub fn depends_on(mut self, namespace: impl Into<String>) -> Self {
        self.depends_on.push(namespace.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn forwards<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(MigrationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UnitResult> + Send + 'static,
    {
        self.forwards = Some(boxed(f));
        self
    }

    pub fn backwards<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(MigrationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = UnitResult> + Send + 'static,
    {
        self.backwards = Some(boxed(f));
        self
    }

    /// Procedure for `direction`; a missing one is a no-op.
    pub fn procedure(&self, direction: Direction) -> Option<MigrationFn> {
        match direction {
            Direction::Forwards => self.forwards.clone(),
            Direction::Backwards => self.backwards.clone(),
        }
    }

    pub fn record(&self) -> MigrationRecord {
        MigrationRecord {
            id: String::new(),
            package: self.package.clone(),
            module: self.module.clone(),
            name: self.name.clone(),
            namespace: self.namespace(),
            description: self.description.clone(),
            depends_on: self.depends_on.clone(),
            applied_at: None,
        }
    }
}

/// Contributes the units of one module. Runs are scoped by module name.
pub trait MigrationModule: Send + Sync {
    fn name(&self) -> &str;

    fn migrations(&self) -> Vec<MigrationUnit>;
}

/// Module built from a fixed list of units.
pub struct StaticModule {
    name: String,
    units: Vec<MigrationUnit>,
}

impl StaticModule {
    pub fn new(name: impl Into<String>) -> Self {
        StaticModule {
            name: name.into(),
            units: Vec::new(),
        }
    }

    pub fn with(mut self, unit: MigrationUnit) -> Self {
        self.units.push(unit);
        self
    }
}

impl MigrationModule for StaticModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn migrations(&self) -> Vec<MigrationUnit> {
        self.units.clone()
    }
}

/// Persisted proof that a unit has been applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    #[serde(default)]
    pub id: String,
    pub package: String,
    pub module: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<String>,
}

impl MigrationRecord {
    pub fn to_document(&self) -> Result<Document, AppError> {
        match serde_json::to_value(self).map_err(|e| AppError::BadRequest(e.to_string()))? {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::BadRequest("migration record did not serialize to an object".into())),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self, AppError> {
        serde_json::from_value(Value::Object(doc.clone())).map_err(|e| AppError::BadRequest(e.to_string()))
    }
}
