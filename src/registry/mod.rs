//! Model registry: namespace → schema registrant, compiled into live handles.
//!
//! Two phases per namespace: *registered* (a schema definition is held in memory) and
//! *compiled* (a live handle is published). Every entry point that changes registrants or compiles
//! holds one async mutex, and each batch is published as a single snapshot swap, so readers never
//! see a half-compiled batch.

mod handle;
pub mod plugin;

pub use handle::{FindOptions, LiveModel, Page, Related};
pub use plugin::{current_actor, with_actor, IdentityAudit, SaveKind, SchemaPlugin};

use crate::case::camel_case;
use crate::catalog::{loader, HydratedModel};
use crate::error::{AppError, SchemaError};
use crate::schema::{build_schema, builtin, SchemaDefinition};
use crate::store::{same_index, DocumentStore, IndexSpec};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// A schema with its discriminated sub-types, as registered under one namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct Registrant {
    pub schema: SchemaDefinition,
    pub discriminators: Vec<(String, SchemaDefinition)>,
}

impl Registrant {
    pub fn new(schema: SchemaDefinition) -> Self {
        Registrant {
            schema,
            discriminators: Vec::new(),
        }
    }

    /// Sub-type stored in the base collection, told apart by the discriminator key.
    pub fn with_discriminator(mut self, name: &str, variant: SchemaDefinition) -> Self {
        self.discriminators.push((name.to_string(), variant));
        self
    }

    pub fn namespace(&self) -> &str {
        self.schema.name()
    }
}

/// `{namespace without last segment}.{camelCase(name)}`.
pub fn discriminate_namespace(namespace: &str, name: &str) -> String {
    match namespace.rsplit_once('.') {
        Some((parent, _)) => format!("{}.{}", parent, camel_case(name)),
        None => camel_case(name),
    }
}

/// Published live handles, swapped as a whole.
#[derive(Default)]
pub struct HandleTable {
    current: RwLock<Arc<HashMap<String, Arc<LiveModel>>>>,
}

impl HandleTable {
    pub fn get(&self, namespace: &str) -> Option<Arc<LiveModel>> {
        self.snapshot().get(namespace).cloned()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<LiveModel>>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, batch: Vec<Arc<LiveModel>>) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = HashMap::clone(&guard);
        for h in batch {
            next.insert(h.namespace().to_string(), h);
        }
        *guard = Arc::new(next);
    }
}

struct Entry {
    /// Schema as registered, before associations.
    base: Registrant,
    /// Base schema with associations applied; what gets compiled.
    current: Registrant,
    compiled: bool,
    stale: bool,
}

pub struct ModelRegistry {
    store: Arc<dyn DocumentStore>,
    plugins: Vec<Arc<dyn SchemaPlugin>>,
    builtins: Vec<Registrant>,
    entries: RwLock<BTreeMap<String, Entry>>,
    handles: Arc<HandleTable>,
    hydrated: RwLock<HashMap<String, HydratedModel>>,
    pipeline: Mutex<()>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        ModelRegistry {
            store,
            plugins: Vec::new(),
            builtins: Vec::new(),
            entries: RwLock::new(BTreeMap::new()),
            handles: Arc::new(HandleTable::default()),
            hydrated: RwLock::new(HashMap::new()),
            pipeline: Mutex::new(()),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn SchemaPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Extra static schema compiled by [`ModelRegistry::bootstrap`].
    pub fn with_builtin(mut self, registrant: Registrant) -> Self {
        self.builtins.push(registrant);
        self
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    /// Register (or replace) the schema for its namespace. Does not compile.
    pub async fn register(&self, registrant: Registrant) {
        let _guard = self.pipeline.lock().await;
        self.register_locked(registrant);
    }

    fn register_locked(&self, registrant: Registrant) {
        let ns = registrant.namespace().to_string();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&ns) {
            Some(entry) if entry.base == registrant => {}
            Some(entry) => {
                entry.base = registrant.clone();
                entry.stale |= entry.current != registrant;
                entry.current = registrant;
            }
            None => {
                entries.insert(
                    ns,
                    Entry {
                        base: registrant.clone(),
                        current: registrant,
                        compiled: false,
                        stale: true,
                    },
                );
            }
        }
    }

    pub fn is_registered(&self, namespace: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(namespace)
    }

    pub fn is_compiled(&self, namespace: &str) -> bool {
        self.handles.get(namespace).is_some()
    }

    /// Live handle for `namespace`.
    pub fn model(&self, namespace: &str) -> Result<Arc<LiveModel>, AppError> {
        self.handles
            .get(namespace)
            .ok_or_else(|| AppError::NotCompiled(namespace.to_string()))
    }

    /// Current (association-applied) schema of a registered namespace.
    pub fn schema(&self, namespace: &str) -> Option<SchemaDefinition> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .map(|e| e.current.schema.clone())
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Hydrated catalog record a dynamic namespace was built from.
    pub fn hydrated(&self, namespace: &str) -> Option<HydratedModel> {
        self.hydrated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    /// Register and compile the built-in schemas plus any extra static registrants.
    pub async fn bootstrap(&self) -> Result<Vec<Arc<LiveModel>>, AppError> {
        let _guard = self.pipeline.lock().await;
        let mut scope = Vec::new();
        for r in builtin::core_registrants()?.into_iter().chain(self.builtins.iter().cloned()) {
            scope.push(r.namespace().to_string());
            self.register_locked(r);
        }
        let handles = self.compile_locked(Some(&scope)).await?;
        tracing::info!(count = handles.len(), "bootstrapped built-in models");
        Ok(handles)
    }

    /// Load persisted models (all, or those in `ids`) with fields and associations, build and register
    /// their schemas. Returns the loaded namespaces.
    pub async fn load_dynamic_schemas(&self, ids: Option<&[String]>) -> Result<Vec<String>, AppError> {
        let _guard = self.pipeline.lock().await;
        self.load_locked(ids).await
    }

    async fn load_locked(&self, ids: Option<&[String]>) -> Result<Vec<String>, AppError> {
        let models = loader::load_hydrated(self, ids).await?;
        let mut namespaces = Vec::with_capacity(models.len());
        for hydrated in models {
            let ns = hydrated.namespace();
            let schema = build_schema(&ns, &hydrated.fields)?;
            self.register_locked(Registrant::new(schema));
            self.hydrated
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(ns.clone(), hydrated);
            namespaces.push(ns);
        }
        tracing::debug!(?namespaces, "loaded dynamic schemas");
        Ok(namespaces)
    }

    /// Apply cached associations to each namespace in scope (every registered one when `None`) and
    /// register synthesized junctions. Returns the touched namespaces, junctions included.
    pub async fn apply_associations(&self, scope: Option<&[String]>) -> Result<Vec<String>, AppError> {
        let _guard = self.pipeline.lock().await;
        self.apply_locked(scope)
    }

    fn apply_locked(&self, scope: Option<&[String]>) -> Result<Vec<String>, AppError> {
        let scope = self.resolve_scope(scope)?;
        let mut touched = Vec::new();
        let mut junctions: Vec<SchemaDefinition> = Vec::new();
        for ns in scope {
            let Some(hydrated) = self.hydrated(&ns) else {
                touched.push(ns);
                continue;
            };
            let base = {
                let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
                match entries.get(&ns) {
                    Some(e) => e.base.clone(),
                    None => return Err(AppError::Reference(ns)),
                }
            };
            let associated = base.schema.clone().associate(&hydrated.associations)?;
            self.set_current(
                &ns,
                Registrant {
                    schema: associated.schema,
                    discriminators: base.discriminators,
                },
            );
            for j in associated.junctions {
                if !junctions.iter().any(|x| x.name() == j.name()) {
                    junctions.push(j);
                }
            }
            touched.push(ns);
        }
        for j in junctions {
            let ns = j.name().to_string();
            self.register_locked(Registrant::new(j));
            if !touched.contains(&ns) {
                touched.push(ns);
            }
        }
        Ok(touched)
    }

    fn set_current(&self, namespace: &str, registrant: Registrant) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(namespace) {
            if entry.current != registrant {
                entry.current = registrant;
                entry.stale = true;
            }
        }
    }

    fn resolve_scope(&self, scope: Option<&[String]>) -> Result<Vec<String>, AppError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match scope {
            None => Ok(entries.keys().cloned().collect()),
            Some(scope) => {
                let mut out = Vec::with_capacity(scope.len());
                for ns in scope {
                    if !entries.contains_key(ns) {
                        return Err(AppError::Reference(ns.clone()));
                    }
                    if !out.contains(ns) {
                        out.push(ns.clone());
                    }
                }
                Ok(out)
            }
        }
    }

    /// Compile the namespaces in scope (every registered one when `None`), replacing existing
    /// handles. Uncompiled or stale registrants outside the scope are compiled too.
    pub async fn compile_namespaces(&self, scope: Option<&[String]>) -> Result<Vec<Arc<LiveModel>>, AppError> {
        let _guard = self.pipeline.lock().await;
        self.compile_locked(scope).await
    }

    /// Reload the given models (all when `None`) and their associated neighbours, apply associations and
    /// compile. Returns the handles compiled.
    pub async fn compile(&self, ids: Option<&[String]>) -> Result<Vec<Arc<LiveModel>>, AppError> {
        let _guard = self.pipeline.lock().await;
        let mut loaded = self.load_locked(ids).await?;
        if ids.is_some() {
            let known: BTreeSet<String> = loaded
                .iter()
                .filter_map(|ns| self.hydrated(ns))
                .map(|h| h.model.id.clone())
                .collect();
            let neighbours: Vec<String> = loaded
                .iter()
                .filter_map(|ns| self.hydrated(ns))
                .flat_map(|h| h.related_model_ids())
                .filter(|id| !known.contains(id))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if !neighbours.is_empty() {
                loaded.extend(self.load_locked(Some(&neighbours)).await?);
            }
        }
        let scope = self.apply_locked(Some(&loaded))?;
        self.compile_locked(Some(&scope)).await
    }

    async fn compile_locked(&self, scope: Option<&[String]>) -> Result<Vec<Arc<LiveModel>>, AppError> {
        let mut targets = self.resolve_scope(scope)?;
        let work: Vec<Registrant> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            for (ns, e) in entries.iter() {
                if (!e.compiled || e.stale) && !targets.contains(ns) {
                    targets.push(ns.clone());
                }
            }
            targets
                .iter()
                .filter_map(|ns| entries.get(ns).map(|e| e.current.clone()))
                .collect()
        };

        let mut batch = Vec::new();
        for registrant in &work {
            batch.extend(self.materialize(registrant).await?);
        }
        self.handles.publish(batch.clone());
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            for registrant in &work {
                if let Some(e) = entries.get_mut(registrant.namespace()) {
                    e.compiled = true;
                    e.stale = e.current != *registrant;
                }
            }
        }
        tracing::info!(namespaces = ?targets, "compiled models");
        Ok(batch)
    }

    /// Build handles for a registrant and its sub-types, ensuring collection and indexes.
    async fn materialize(&self, registrant: &Registrant) -> Result<Vec<Arc<LiveModel>>, AppError> {
        let collection = registrant.namespace().to_string();
        let base = self.extend(registrant.schema.clone())?;
        let mut schemas = vec![(base.clone(), None)];
        for (name, variant) in &registrant.discriminators {
            let key = base.discriminator_key().ok_or_else(|| SchemaError::Invalid {
                what: "discriminator",
                detail: format!("{} declares sub-types but no discriminator key", collection),
            })?;
            let sub_ns = discriminate_namespace(&collection, name);
            let merged = base.merge(sub_ns, variant);
            schemas.push((merged, Some((key.to_string(), name.clone()))));
        }

        self.store.ensure_collection(&collection).await?;
        let mut declared: Vec<IndexSpec> = Vec::new();
        for (schema, _) in &schemas {
            for index in schema.index_specs(&collection) {
                if !declared.iter().any(|d| d.name == index.name) {
                    declared.push(index);
                }
            }
        }
        for stored in self.store.indexes(&collection).await? {
            if !declared.iter().any(|d| same_index(&d.name, &stored)) {
                tracing::info!(%collection, index = %stored, "dropping undeclared index");
                self.store.drop_index(&collection, &stored).await?;
            }
        }
        for index in &declared {
            self.store.ensure_index(&collection, index).await?;
        }

        let mut handles = Vec::with_capacity(schemas.len());
        for (schema, discriminator) in schemas {
            handles.push(Arc::new(LiveModel::new(
                schema,
                collection.as_str(),
                discriminator,
                self.store.clone(),
                self.plugins.clone(),
                Arc::downgrade(&self.handles),
            )));
        }
        Ok(handles)
    }

    fn extend(&self, schema: SchemaDefinition) -> Result<SchemaDefinition, SchemaError> {
        self.plugins.iter().try_fold(schema, |s, p| p.extend(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn sub_type_namespaces_replace_last_segment() {
        assert_eq!(
            discriminate_namespace("protean.orm.association", "nonHierarchical"),
            "protean.orm.nonHierarchical"
        );
        assert_eq!(discriminate_namespace("Thing", "Special Kind"), "specialKind");
    }

    #[tokio::test]
    async fn bootstrap_compiles_core_and_sub_types() {
        let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            registry.model(builtin::MODEL_NAMESPACE),
            Err(AppError::NotCompiled(_))
        ));
        registry.bootstrap().await.unwrap();
        for ns in [
            builtin::MODEL_NAMESPACE,
            builtin::FIELD_NAMESPACE,
            builtin::ASSOCIATION_NAMESPACE,
            "protean.orm.hierarchical",
            "protean.orm.nonHierarchical",
            builtin::MIGRATION_NAMESPACE,
        ] {
            assert!(registry.is_compiled(ns), "{} not compiled", ns);
        }
        let sub = registry.model("protean.orm.hierarchical").unwrap();
        assert_eq!(sub.collection(), builtin::ASSOCIATION_NAMESPACE);
        assert_eq!(sub.discriminator(), Some(("type", "hierarchical")));
    }

    #[tokio::test]
    async fn unregistered_scope_is_a_reference_error() {
        let registry = ModelRegistry::new(Arc::new(MemoryStore::new()));
        let scope = vec!["shop.Missing".to_string()];
        assert!(matches!(
            registry.compile_namespaces(Some(&scope)).await,
            Err(AppError::Reference(ns)) if ns == "shop.Missing"
        ));
        assert!(matches!(
            registry.apply_associations(Some(&scope)).await,
            Err(AppError::Reference(_))
        ));
    }
}
