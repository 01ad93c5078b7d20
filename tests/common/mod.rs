#![allow(dead_code)]

use protean_orm::{Catalog, Document, FieldRecord, FieldType, MemoryStore, ModelRecord, ModelRegistry};
use serde_json::Value;
use std::sync::Arc;

pub async fn setup() -> (Arc<ModelRegistry>, Catalog) {
    let registry = Arc::new(ModelRegistry::new(Arc::new(MemoryStore::new())));
    registry.bootstrap().await.unwrap();
    let catalog = Catalog::new(registry.clone());
    (registry, catalog)
}

pub fn doc(v: Value) -> Document {
    v.as_object().cloned().unwrap_or_default()
}

pub fn id_of(doc: &Document) -> String {
    doc["id"].as_str().unwrap().to_string()
}

pub async fn model(catalog: &Catalog, package: &str, name: &str) -> ModelRecord {
    catalog
        .create_model(ModelRecord::new(package, "", name))
        .await
        .unwrap()
        .record
}

pub async fn field(catalog: &Catalog, model_id: &str, name: &str, field_type: FieldType) -> FieldRecord {
    catalog
        .create_field(FieldRecord::new(model_id, name, field_type))
        .await
        .unwrap()
        .record
}
