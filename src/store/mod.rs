//! Document store abstraction. Collections hold JSON documents keyed by a string `id`.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;

pub type Document = Map<String, Value>;

/// Key every stored document carries.
pub const ID: &str = "id";

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq { path: String, value: Value },
    Ne { path: String, value: Value },
    In { path: String, values: Vec<Value> },
}

/// Conjunction of conditions over dotted paths. Missing paths compare equal to null.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn ne(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Ne {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_in<I, V>(mut self, path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| match c {
            Condition::Eq { path, value } => value_at(doc, path) == *value,
            Condition::Ne { path, value } => value_at(doc, path) != *value,
            Condition::In { path, values } => {
                let v = value_at(doc, path);
                values.iter().any(|x| *x == v)
            }
        })
    }
}

/// Value at a dotted path.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut cur = doc.get(first)?;
    for p in parts {
        cur = cur.as_object()?.get(p)?;
    }
    Some(cur)
}

fn value_at(doc: &Document, path: &str) -> Value {
    lookup(doc, path).cloned().unwrap_or(Value::Null)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub sort: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

impl FindQuery {
    pub fn filtered(filter: Filter) -> Self {
        FindQuery {
            filter,
            ..Default::default()
        }
    }
}

/// Index over one or more dotted paths. `partial` indexes only documents where every path is present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    pub partial: bool,
}

/// Longest identifier PostgreSQL keeps; longer index names are truncated.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Whether a stored index name refers to the declared one, allowing for identifier truncation.
pub fn same_index(declared: &str, stored: &str) -> bool {
    declared == stored || (stored.len() == MAX_IDENTIFIER_LEN && declared.starts_with(stored))
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the collection if missing.
    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Create the index if missing.
    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;

    /// Names of the secondary indexes on the collection.
    async fn indexes(&self, collection: &str) -> Result<Vec<String>, StoreError>;

    /// Drop the named index. Missing indexes are ignored.
    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError>;

    /// Insert a document carrying an `id`. Returns the stored document.
    async fn insert(&self, collection: &str, doc: Document) -> Result<Document, StoreError>;

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Replace the document with `id`. None when no such document exists.
    async fn replace(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// The `id` of a document, if it carries a string one.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn filter_matches_nested_paths() {
        let d = doc(json!({"fromModel": {"reverseName": ""}, "fromModelId": "a"}));
        assert!(Filter::new().eq("fromModel.reverseName", "").matches(&d));
        assert!(Filter::new().eq("fromModelId", "a").ne("id", "x").matches(&d));
        assert!(Filter::new().is_in("fromModelId", ["b", "a"]).matches(&d));
        assert!(!Filter::new().eq("toModelId", "a").matches(&d));
        assert!(Filter::new().eq("toModelId", Value::Null).matches(&d));
    }

    #[test]
    fn truncated_index_names_still_match() {
        let declared = format!("{}__email_key", "a".repeat(60));
        assert!(same_index(&declared, &declared[..63]));
        assert!(!same_index(&declared, &declared[..40]));
        assert!(!same_index("c__email_key", "c__email_idx"));
    }

    #[test]
    fn numbers_compare_numerically() {
        assert_eq!(compare_values(&json!(2), &json!(10.5)), Ordering::Less);
        assert_eq!(compare_values(&Value::Null, &json!("a")), Ordering::Less);
    }
}
