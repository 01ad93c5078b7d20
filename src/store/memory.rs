//! In-process document store. Backs tests and isolated registries.

use super::{compare_values, document_id, lookup, Document, DocumentStore, Filter, FindQuery, IndexSpec, SortOrder};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Collection {
    docs: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    /// Unique index that `candidate` would violate, ignoring the document with `skip_id`.
    fn violated_index(&self, candidate: &Document, skip_id: Option<&str>) -> Option<&IndexSpec> {
        self.indexes.iter().filter(|i| i.unique).find(|index| {
            let Some(key) = index_key(index, candidate) else {
                return false;
            };
            self.docs
                .iter()
                .filter(|d| skip_id.is_none() || document_id(d) != skip_id)
                .any(|d| index_key(index, d).as_ref() == Some(&key))
        })
    }
}

/// Values of the indexed paths. None when a partial index does not cover the document.
fn index_key(index: &IndexSpec, doc: &Document) -> Option<Vec<Value>> {
    let mut key = Vec::with_capacity(index.fields.len());
    for f in &index.fields {
        match lookup(doc, f) {
            Some(v) if !v.is_null() => key.push(v.clone()),
            _ if index.partial => return None,
            _ => key.push(Value::Null),
        }
    }
    Some(key)
}

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the collections created so far.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn unique_violation(collection: &str, index: &IndexSpec) -> StoreError {
        StoreError::UniqueViolation {
            collection: collection.to_string(),
            index: index.name.clone(),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        guard.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let coll = guard.entry(collection.to_string()).or_default();
        if let Some(pos) = coll.indexes.iter().position(|i| i.name == index.name) {
            if coll.indexes[pos] == *index {
                return Ok(());
            }
            coll.indexes.remove(pos);
        }
        if index.unique {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            for d in &coll.docs {
                if let Some(key) = index_key(index, d) {
                    if seen.contains(&key) {
                        return Err(Self::unique_violation(collection, index));
                    }
                    seen.push(key);
                }
            }
        }
        coll.indexes.push(index.clone());
        Ok(())
    }

    async fn indexes(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .get(collection)
            .map(|c| c.indexes.iter().map(|i| i.name.clone()).collect())
            .unwrap_or_default())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        if let Some(coll) = guard.get_mut(collection) {
            coll.indexes.retain(|i| i.name != name);
        }
        Ok(())
    }

    async fn insert(&self, collection: &str, doc: Document) -> Result<Document, StoreError> {
        let id = document_id(&doc)
            .ok_or_else(|| StoreError::InvalidDocument("document has no string id".into()))?
            .to_string();
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let coll = guard.entry(collection.to_string()).or_default();
        if coll.docs.iter().any(|d| document_id(d) == Some(id.as_str())) {
            return Err(StoreError::UniqueViolation {
                collection: collection.to_string(),
                index: "id".into(),
            });
        }
        if let Some(index) = coll.violated_index(&doc, None) {
            return Err(Self::unique_violation(collection, index));
        }
        coll.docs.push(doc.clone());
        Ok(doc)
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<Document> = coll
            .docs
            .iter()
            .filter(|d| query.filter.matches(d))
            .cloned()
            .collect();
        if !query.sort.is_empty() {
            rows.sort_by(|a, b| {
                for (path, order) in &query.sort {
                    let null = Value::Null;
                    let x = lookup(a, path).unwrap_or(&null);
                    let y = lookup(b, path).unwrap_or(&null);
                    let ord = match order {
                        SortOrder::Asc => compare_values(x, y),
                        SortOrder::Desc => compare_values(y, x),
                    };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }
        let skip = query.skip.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(skip).take(limit).collect())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let guard = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .get(collection)
            .map(|c| c.docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<Option<Document>, StoreError> {
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(None);
        };
        let Some(pos) = coll.docs.iter().position(|d| document_id(d) == Some(id)) else {
            return Ok(None);
        };
        if let Some(index) = coll.violated_index(&doc, Some(id)) {
            return Err(Self::unique_violation(collection, index));
        }
        coll.docs[pos] = doc.clone();
        Ok(Some(doc))
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(None);
        };
        Ok(coll
            .docs
            .iter()
            .position(|d| document_id(d) == Some(id))
            .map(|pos| coll.docs.remove(pos)))
    }
}
