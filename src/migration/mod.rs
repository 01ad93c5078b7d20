//! Migration engine: runs units in dependency waves and tracks applied units as records.
//!
//! Each wave runs every runnable unit concurrently and waits for all of them. A failing unit is
//! reported and excluded from the rest of the run; its dependents stay pending.

mod plan;
mod unit;

pub use unit::{
    Direction, MigrationContext, MigrationFn, MigrationModule, MigrationRecord, MigrationUnit, StaticModule,
    UnitResult,
};

use crate::error::{AppError, MigrationError};
use crate::registry::{FindOptions, LiveModel, ModelRegistry};
use crate::schema::builtin::MIGRATION_NAMESPACE;
use crate::store::{Filter, SortOrder};
use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Direction and module scope of one run.
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub direction: Direction,
    pub modules: Vec<String>,
}

impl RunOptions {
    pub fn forwards(modules: &[&str]) -> Self {
        RunOptions {
            direction: Direction::Forwards,
            modules: modules.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn backwards(modules: &[&str]) -> Self {
        RunOptions {
            direction: Direction::Backwards,
            modules: modules.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug)]
pub struct MigrationReport {
    pub direction: Direction,
    /// Applied (forwards) or removed (backwards) records by namespace.
    pub successes: BTreeMap<String, MigrationRecord>,
    pub errors: BTreeMap<String, MigrationError>,
    /// Namespaces run per wave, in declaration order.
    pub waves: Vec<Vec<String>>,
    /// Units that never became runnable.
    pub pending: Vec<String>,
}

impl MigrationReport {
    fn new(direction: Direction) -> Self {
        MigrationReport {
            direction,
            successes: BTreeMap::new(),
            errors: BTreeMap::new(),
            waves: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.pending.is_empty()
    }
}

pub struct Migrator {
    registry: Arc<ModelRegistry>,
    modules: Vec<Arc<dyn MigrationModule>>,
    logging: bool,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Migrator {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Migrator {
            registry,
            modules: Vec::new(),
            logging: false,
        }
    }

    pub fn with_module(mut self, module: impl MigrationModule + 'static) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    /// Log each unit as it starts at info level.
    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    fn units(&self, modules: &[String]) -> Result<Vec<MigrationUnit>, MigrationError> {
        let mut units = Vec::new();
        for name in modules {
            let module = self
                .modules
                .iter()
                .find(|m| m.name() == name)
                .ok_or_else(|| MigrationError::UnknownModule(name.clone()))?;
            units.extend(module.migrations());
        }
        Ok(units)
    }

    fn tracking(&self) -> Result<Arc<LiveModel>, AppError> {
        self.registry.model(MIGRATION_NAMESPACE)
    }

    /// Every applied record, keyed by namespace.
    pub async fn applied(&self) -> Result<BTreeMap<String, MigrationRecord>, MigrationError> {
        let docs = self.tracking()?.find_all(Filter::new()).await?;
        let mut out = BTreeMap::new();
        for doc in &docs {
            let record = MigrationRecord::from_document(doc)?;
            out.insert(record.namespace.clone(), record);
        }
        Ok(out)
    }

    /// Applied records, most recent first, one page at a time.
    pub async fn history(&self, limit: u64, skip: u64) -> Result<Vec<MigrationRecord>, MigrationError> {
        let page = self
            .tracking()?
            .find(
                FindOptions::new()
                    .sort("appliedAt", SortOrder::Desc)
                    .limit(limit)
                    .skip(skip),
            )
            .await?;
        Ok(page
            .records
            .iter()
            .map(MigrationRecord::from_document)
            .collect::<Result<_, _>>()?)
    }

    pub async fn run(&self, opts: RunOptions) -> Result<MigrationReport, MigrationError> {
        let direction = opts.direction;
        let units = self.units(&opts.modules)?;
        let mut applied = self.applied().await?;
        plan::validate_graph(&units, &applied.keys().cloned().collect())?;

        let mut report = MigrationReport::new(direction);
        let mut failed: BTreeSet<String> = BTreeSet::new();
        loop {
            let runnable = match direction {
                Direction::Forwards => {
                    plan::forward_runnable(&units, &applied.keys().cloned().collect(), &failed)
                }
                Direction::Backwards => {
                    let deps = applied
                        .iter()
                        .map(|(ns, r)| (ns.clone(), r.depends_on.clone()))
                        .collect();
                    plan::backward_runnable(&units, &deps, &failed)
                }
            };
            if runnable.is_empty() {
                break;
            }
            let wave: Vec<String> = runnable.iter().map(|u| u.namespace()).collect();
            tracing::debug!(?wave, ?direction, "running migration wave");
            let outcomes = join_all(runnable.iter().map(|u| self.execute(u, direction))).await;
            for (namespace, outcome) in wave.iter().zip(outcomes) {
                match outcome {
                    Ok(record) => {
                        report.successes.insert(namespace.clone(), record);
                    }
                    Err(e) => {
                        tracing::warn!(migration = %namespace, error = %e, "migration failed");
                        failed.insert(namespace.clone());
                        report.errors.insert(namespace.clone(), e);
                    }
                }
            }
            report.waves.push(wave);
            applied = self.applied().await?;
        }

        report.pending = units
            .iter()
            .map(MigrationUnit::namespace)
            .filter(|ns| {
                let still = match direction {
                    Direction::Forwards => !applied.contains_key(ns),
                    Direction::Backwards => applied.contains_key(ns),
                };
                still && !report.errors.contains_key(ns)
            })
            .collect();
        tracing::info!(
            ?direction,
            succeeded = report.successes.len(),
            failed = report.errors.len(),
            pending = report.pending.len(),
            "migration run finished"
        );
        Ok(report)
    }

    /// Run one unit's procedure, then write or remove its record.
    async fn execute(&self, unit: &MigrationUnit, direction: Direction) -> Result<MigrationRecord, MigrationError> {
        let namespace = unit.namespace();
        if self.logging {
            match direction {
                Direction::Forwards => tracing::info!("Migrating {}...", namespace),
                Direction::Backwards => tracing::info!("Reversing {}...", namespace),
            }
        }
        if let Some(procedure) = unit.procedure(direction) {
            let ctx = MigrationContext {
                registry: self.registry.clone(),
                namespace: namespace.clone(),
            };
            match AssertUnwindSafe(async move { procedure(ctx).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(MigrationError::UnitFailed {
                        namespace,
                        message: e.to_string(),
                    })
                }
                Err(payload) => {
                    return Err(MigrationError::UnitPanicked {
                        namespace,
                        message: panic_message(payload.as_ref()),
                    })
                }
            }
        }
        self.track(unit, direction)
            .await
            .map_err(|source| MigrationError::Tracking { namespace, source })
    }

    async fn track(&self, unit: &MigrationUnit, direction: Direction) -> Result<MigrationRecord, AppError> {
        let handle = self.tracking()?;
        match direction {
            Direction::Forwards => {
                let mut record = unit.record();
                record.applied_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
                let stored = handle.create(record.to_document()?).await?;
                MigrationRecord::from_document(&stored)
            }
            Direction::Backwards => {
                let existing = handle
                    .find_one(Filter::new().eq("namespace", unit.namespace()))
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("migration record {}", unit.namespace())))?;
                let record = MigrationRecord::from_document(&existing)?;
                handle.delete_by_id(&record.id).await?;
                Ok(record)
            }
        }
    }
}
