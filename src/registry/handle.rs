//! Live, queryable handle over one compiled schema.

use super::plugin::{SaveKind, SchemaPlugin};
use super::HandleTable;
use crate::error::{unique_message, AppError, StoreError, ValidationError, ViolationKind};
use crate::schema::{Cardinality, RelationDef, SchemaDefinition, StorageType, CREATED_AT, ID, UPDATED_AT};
use crate::service::RecordValidator;
use crate::store::{document_id, lookup, same_index, Document, DocumentStore, Filter, FindQuery, SortOrder};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};

const DEFAULT_LIMIT: u64 = 100;
const MAX_LIMIT: u64 = 1000;
const BULK_LIMIT: usize = 100;

/// Options for [`LiveModel::find`]. `limit` defaults to 100, max 1000.
#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    pub select: Option<Vec<String>>,
    pub filter: Filter,
    pub sort: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn sort(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((path.into(), order));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// One page of records and the total matching the filter.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub records: Vec<Document>,
    pub total: u64,
}

/// Records resolved through a relation accessor.
#[derive(Clone, Debug, PartialEq)]
pub enum Related {
    One(Option<Document>),
    Many(Vec<Document>),
}

impl Related {
    pub fn into_value(self) -> Value {
        match self {
            Related::One(Some(doc)) => Value::Object(doc),
            Related::One(None) => Value::Null,
            Related::Many(docs) => Value::Array(docs.into_iter().map(Value::Object).collect()),
        }
    }
}

pub struct LiveModel {
    namespace: String,
    collection: String,
    schema: Arc<SchemaDefinition>,
    discriminator: Option<(String, String)>,
    store: Arc<dyn DocumentStore>,
    plugins: Vec<Arc<dyn SchemaPlugin>>,
    peers: Weak<HandleTable>,
}

impl fmt::Debug for LiveModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveModel")
            .field("namespace", &self.namespace)
            .field("collection", &self.collection)
            .field("discriminator", &self.discriminator)
            .finish_non_exhaustive()
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn shown(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

impl LiveModel {
    pub(crate) fn new(
        schema: SchemaDefinition,
        collection: impl Into<String>,
        discriminator: Option<(String, String)>,
        store: Arc<dyn DocumentStore>,
        plugins: Vec<Arc<dyn SchemaPlugin>>,
        peers: Weak<HandleTable>,
    ) -> Self {
        LiveModel {
            namespace: schema.name().to_string(),
            collection: collection.into(),
            schema: Arc::new(schema),
            discriminator,
            store,
            plugins,
            peers,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    /// `(key, value)` stamped on records of a discriminated sub-type.
    pub fn discriminator(&self) -> Option<(&str, &str)> {
        self.discriminator.as_ref().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn scoped(&self, filter: Filter) -> Filter {
        match &self.discriminator {
            Some((key, value)) => filter.eq(key.as_str(), value.as_str()),
            None => filter,
        }
    }

    pub async fn find(&self, opts: FindOptions) -> Result<Page, AppError> {
        let filter = self.scoped(opts.filter);
        let limit = opts.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let total = self.store.count(&self.collection, &filter).await?;
        let query = FindQuery {
            filter,
            sort: opts.sort,
            limit: Some(limit),
            skip: opts.skip,
        };
        let mut records = self.store.find(&self.collection, &query).await?;
        if let Some(select) = &opts.select {
            records = records.into_iter().map(|doc| project(doc, select)).collect();
        }
        Ok(Page { records, total })
    }

    /// Every record matching `filter`, unpaged.
    pub async fn find_all(&self, filter: Filter) -> Result<Vec<Document>, AppError> {
        let query = FindQuery::filtered(self.scoped(filter));
        Ok(self.store.find(&self.collection, &query).await?)
    }

    pub async fn find_one(&self, filter: Filter) -> Result<Option<Document>, AppError> {
        let query = FindQuery {
            limit: Some(1),
            ..FindQuery::filtered(self.scoped(filter))
        };
        Ok(self.store.find(&self.collection, &query).await?.into_iter().next())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Document>, AppError> {
        self.find_one(Filter::new().eq(ID, id)).await
    }

    pub async fn count(&self, filter: Filter) -> Result<u64, AppError> {
        Ok(self.store.count(&self.collection, &self.scoped(filter)).await?)
    }

    /// Validate and insert a new record. Unknown keys are dropped, defaults applied and an id assigned
    /// when the input carries none.
    pub async fn create(&self, input: Document) -> Result<Document, AppError> {
        let mut doc = self.writable(input);
        for f in self.schema.fields() {
            if let Some(default) = &f.default {
                if doc.get(&f.name).map_or(true, Value::is_null) {
                    doc.insert(f.name.clone(), default.clone());
                }
            }
        }
        if let Some((key, value)) = &self.discriminator {
            doc.insert(key.clone(), Value::String(value.clone()));
        }
        self.run_hooks(&mut doc, SaveKind::Create);
        if self.schema.timestamps() {
            let ts = now();
            doc.insert(CREATED_AT.into(), ts.clone());
            doc.insert(UPDATED_AT.into(), ts);
        }
        if document_id(&doc).map_or(true, str::is_empty) {
            doc.insert(ID.into(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        RecordValidator::validate(&self.schema, &doc)?;
        let stored = self
            .store
            .insert(&self.collection, doc.clone())
            .await
            .map_err(|e| self.unique_error(e, &doc))?;
        tracing::debug!(namespace = %self.namespace, id = ?document_id(&stored), "created");
        Ok(stored)
    }

    /// Create several records in order; stops at the first failure.
    pub async fn create_many(&self, inputs: Vec<Document>) -> Result<Vec<Document>, AppError> {
        if inputs.len() > BULK_LIMIT {
            return Err(AppError::BadRequest(format!(
                "bulk create limited to {} items",
                BULK_LIMIT
            )));
        }
        let mut out = Vec::with_capacity(inputs.len());
        for input in inputs {
            out.push(self.create(input).await?);
        }
        Ok(out)
    }

    /// Merge `patch` into the stored record, validate and replace it.
    pub async fn update_by_id(&self, id: &str, patch: Document) -> Result<Document, AppError> {
        let mut doc = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.namespace, id)))?;
        for (k, v) in self.writable(patch) {
            if k != ID {
                doc.insert(k, v);
            }
        }
        self.run_hooks(&mut doc, SaveKind::Update);
        if self.schema.timestamps() {
            doc.insert(UPDATED_AT.into(), now());
        }
        RecordValidator::validate(&self.schema, &doc)?;
        self.store
            .replace(&self.collection, id, doc.clone())
            .await
            .map_err(|e| self.unique_error(e, &doc))?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.namespace, id)))
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<Document, AppError> {
        if self.discriminator.is_some() && self.find_by_id(id).await?.is_none() {
            return Err(AppError::NotFound(format!("{} {}", self.namespace, id)));
        }
        self.store
            .delete_by_id(&self.collection, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.namespace, id)))
    }

    pub fn validate(&self, doc: &Document) -> Result<(), ValidationError> {
        RecordValidator::validate(&self.schema, doc)
    }

    /// Keys callers may set: declared, non read-only fields, the id and the discriminator key.
    fn writable(&self, input: Document) -> Document {
        let disc_key = self.schema.discriminator_key();
        input
            .into_iter()
            .filter(|(k, _)| {
                k == ID
                    || Some(k.as_str()) == disc_key
                    || self.schema.field(k).is_some_and(|f| !f.read_only)
            })
            .collect()
    }

    fn run_hooks(&self, doc: &mut Document, kind: SaveKind) {
        for p in &self.plugins {
            p.before_save(&self.schema, doc, kind);
        }
    }

    fn unique_error(&self, e: StoreError, doc: &Document) -> AppError {
        let index = match &e {
            StoreError::UniqueViolation { index, .. } => index.clone(),
            _ => return e.into(),
        };
        if index == ID || index.ends_with("_pkey") {
            let mut err = ValidationError::new();
            err.push(ID, ViolationKind::Unique, unique_message(ID, &shown(lookup(doc, ID))));
            return err.into();
        }
        let spec = self
            .schema
            .index_specs(&self.collection)
            .into_iter()
            .find(|s| same_index(&s.name, &index));
        match spec {
            Some(spec) => {
                let mut err = ValidationError::new();
                for field in &spec.fields {
                    err.push(field, ViolationKind::Unique, unique_message(field, &shown(lookup(doc, field))));
                }
                err.into()
            }
            None => e.into(),
        }
    }

    /// JSON-schema (draft-07) description of the record shape.
    pub fn describe(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(ID.into(), json!({"type": "string", "readOnly": true}));
        let mut required = Vec::new();
        for f in self.schema.fields() {
            let mut prop = Map::new();
            if let Some(t) = f.storage.json_type() {
                prop.insert("type".into(), json!(t));
            }
            match f.storage {
                StorageType::Email => {
                    prop.insert("format".into(), json!("email"));
                }
                StorageType::Timestamp => {
                    prop.insert("format".into(), json!("date-time"));
                }
                _ => {}
            }
            if let Some(format) = &f.rules.format {
                prop.insert("format".into(), json!(format));
            }
            if let Some(alias) = &f.alias {
                prop.insert("title".into(), json!(alias));
            }
            if let Some(values) = &f.enum_values {
                prop.insert("enum".into(), json!(values));
            }
            if let Some(default) = &f.default {
                prop.insert("default".into(), default.clone());
            }
            if let Some(n) = f.rules.min_length {
                prop.insert("minLength".into(), json!(n));
            }
            if let Some(n) = f.rules.max_length {
                prop.insert("maxLength".into(), json!(n));
            }
            if let Some(p) = &f.rules.pattern {
                prop.insert("pattern".into(), json!(p));
            }
            if let Some(n) = f.rules.minimum {
                prop.insert("minimum".into(), json!(n));
            }
            if let Some(n) = f.rules.maximum {
                prop.insert("maximum".into(), json!(n));
            }
            if let Some(target) = &f.reference {
                prop.insert("x-reference".into(), json!(target));
            }
            if f.read_only {
                prop.insert("readOnly".into(), json!(true));
            }
            if f.required.always() {
                required.push(f.name.clone());
            }
            properties.insert(f.name.clone(), Value::Object(prop));
        }
        let relations: Map<String, Value> = self
            .schema
            .relations()
            .iter()
            .map(|r| (r.name.clone(), describe_relation(r)))
            .collect();
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": self.namespace,
            "type": "object",
            "properties": properties,
            "required": required,
            "x-relations": relations,
        })
    }

    fn peer(&self, namespace: &str) -> Result<Arc<LiveModel>, AppError> {
        self.peers
            .upgrade()
            .and_then(|table| table.get(namespace))
            .ok_or_else(|| AppError::NotCompiled(namespace.to_string()))
    }

    /// Resolve the records behind relation accessor `accessor` for `record`.
    pub async fn related(&self, record: &Document, accessor: &str) -> Result<Related, AppError> {
        let rel = self.schema.relation(accessor).ok_or_else(|| {
            AppError::BadRequest(format!("unknown relation '{}' on {}", accessor, self.namespace))
        })?;
        let target = self.peer(&rel.target)?;
        let key = match lookup(record, &rel.local_field) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                return Ok(match rel.cardinality {
                    Cardinality::One => Related::One(None),
                    Cardinality::Many => Related::Many(Vec::new()),
                })
            }
        };
        if let Some(through) = &rel.through {
            let junction = self.peer(&through.model)?;
            let links = junction
                .find_all(Filter::new().eq(through.local_key.as_str(), key))
                .await?;
            let keys: Vec<Value> = links
                .iter()
                .filter_map(|l| lookup(l, &through.target_key).cloned())
                .collect();
            if keys.is_empty() {
                return Ok(Related::Many(Vec::new()));
            }
            let records = target
                .find_all(Filter::new().is_in(rel.foreign_field.as_str(), keys))
                .await?;
            return Ok(Related::Many(records));
        }
        let filter = Filter::new().eq(rel.foreign_field.as_str(), key);
        Ok(match rel.cardinality {
            Cardinality::One => Related::One(target.find_one(filter).await?),
            Cardinality::Many => Related::Many(target.find_all(filter).await?),
        })
    }

    /// Copy of `record` with each accessor resolved under its own name.
    pub async fn populate(&self, record: &Document, accessors: &[&str]) -> Result<Document, AppError> {
        let mut out = record.clone();
        for accessor in accessors {
            let related = self.related(record, accessor).await?;
            out.insert(accessor.to_string(), related.into_value());
        }
        Ok(out)
    }
}

fn project(doc: Document, select: &[String]) -> Document {
    doc.into_iter()
        .filter(|(k, _)| k == ID || select.iter().any(|s| s == k))
        .collect()
}

fn describe_relation(r: &RelationDef) -> Value {
    let mut out = json!({
        "target": r.target,
        "cardinality": match r.cardinality {
            Cardinality::One => "one",
            Cardinality::Many => "many",
        },
        "localField": r.local_field,
        "foreignField": r.foreign_field,
    });
    if let (Some(through), Some(obj)) = (&r.through, out.as_object_mut()) {
        obj.insert(
            "through".into(),
            json!({
                "model": through.model,
                "localKey": through.local_key,
                "targetKey": through.target_key,
            }),
        );
    }
    out
}
