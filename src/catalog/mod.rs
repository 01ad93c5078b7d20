//! Catalog of dynamic models: Model, Field and Association records and their persistence.
//!
//! Every mutation returns the ids of the models whose compiled schema it invalidates; the caller
//! passes them to [`ModelRegistry::compile`](crate::registry::ModelRegistry::compile).

mod hydrated;
pub mod loader;
mod types;
pub mod validator;

pub use hydrated::{HydratedAssociation, HydratedModel};
pub use types::{
    join_namespace, AssociationKind, AssociationRecord, AssociationVariant, FieldRecord, FieldType,
    ModelRecord, NamingField, Required, Side, SideConfig, ValidationRule, HIERARCHICAL, NON_HIERARCHICAL,
};

use crate::error::{unique_message, AppError, ValidationError, ViolationKind};
use crate::registry::{discriminate_namespace, LiveModel, ModelRegistry};
use crate::schema::build_schema;
use crate::schema::builtin::{ASSOCIATION_NAMESPACE, FIELD_NAMESPACE, MODEL_NAMESPACE};
use crate::store::{Document, Filter, ID};
use std::sync::Arc;

/// A stored record and the models it changed.
#[derive(Clone, Debug, PartialEq)]
pub struct Change<T> {
    pub record: T,
    pub changed_models: Vec<String>,
}

impl<T> Change<T> {
    fn new(record: T, mut changed_models: Vec<String>) -> Self {
        changed_models.sort();
        changed_models.dedup();
        Change {
            record,
            changed_models,
        }
    }
}

pub struct Catalog {
    registry: Arc<ModelRegistry>,
}

impl Catalog {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Catalog { registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    fn handle(&self, namespace: &str) -> Result<Arc<LiveModel>, AppError> {
        self.registry.model(namespace)
    }

    fn association_handle(&self, record: &AssociationRecord) -> Result<Arc<LiveModel>, AppError> {
        self.handle(&discriminate_namespace(ASSOCIATION_NAMESPACE, record.variant.tag()))
    }

    pub async fn create_model(&self, model: ModelRecord) -> Result<Change<ModelRecord>, AppError> {
        let handle = self.handle(MODEL_NAMESPACE)?;
        let namespace = model.namespace();
        if handle.find_one(Filter::new().eq("namespace", namespace.as_str())).await?.is_some() {
            return Err(ValidationError::single(
                "namespace",
                ViolationKind::Unique,
                unique_message("namespace", &namespace),
            )
            .into());
        }
        let stored = handle.create(model.to_document()?).await?;
        let record = ModelRecord::from_document(&stored)?;
        tracing::info!(model = %namespace, id = %record.id, "model created");
        let id = record.id.clone();
        Ok(Change::new(record, vec![id]))
    }

    pub async fn find_model(&self, id: &str) -> Result<ModelRecord, AppError> {
        let doc = self
            .handle(MODEL_NAMESPACE)?
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("model {}", id)))?;
        ModelRecord::from_document(&doc)
    }

    pub async fn create_field(&self, field: FieldRecord) -> Result<Change<FieldRecord>, AppError> {
        let model = self.find_model(&field.model_id).await.map_err(|e| match e {
            AppError::NotFound(_) => ValidationError::single(
                "modelId",
                ViolationKind::Reference,
                format!("`{}` does not reference an existing model", field.model_id),
            )
            .into(),
            other => other,
        })?;
        build_schema(&model.namespace(), std::slice::from_ref(&field))?;
        self.check_field_name(&field.model_id, &field.name, None).await?;
        let stored = self.handle(FIELD_NAMESPACE)?.create(field.to_document()?).await?;
        let record = FieldRecord::from_document(&stored)?;
        let id = record.model_id.clone();
        Ok(Change::new(record, vec![id]))
    }

    /// Merge `patch` into the stored field.
    pub async fn update_field(&self, id: &str, patch: Document) -> Result<Change<FieldRecord>, AppError> {
        let handle = self.handle(FIELD_NAMESPACE)?;
        let existing = handle
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("field {}", id)))?;
        let before = FieldRecord::from_document(&existing)?;
        let mut merged = existing;
        merged.extend(patch);
        let after = FieldRecord::from_document(&merged)?;
        let model = self.find_model(&after.model_id).await?;
        build_schema(&model.namespace(), std::slice::from_ref(&after))?;
        if after.name != before.name || after.model_id != before.model_id {
            self.check_field_name(&after.model_id, &after.name, Some(id)).await?;
        }
        let stored = handle.update_by_id(id, after.to_document()?).await?;
        let record = FieldRecord::from_document(&stored)?;
        Ok(Change::new(record, vec![before.model_id, after.model_id]))
    }

    pub async fn delete_field(&self, id: &str) -> Result<Change<FieldRecord>, AppError> {
        let removed = self.handle(FIELD_NAMESPACE)?.delete_by_id(id).await?;
        let record = FieldRecord::from_document(&removed)?;
        let model_id = record.model_id.clone();
        Ok(Change::new(record, vec![model_id]))
    }

    async fn check_field_name(&self, model_id: &str, name: &str, exclude: Option<&str>) -> Result<(), AppError> {
        let mut filter = Filter::new().eq("modelId", model_id).eq("name", name);
        if let Some(id) = exclude {
            filter = filter.ne(ID, id);
        }
        if self.handle(FIELD_NAMESPACE)?.find_one(filter).await?.is_some() {
            return Err(ValidationError::single("name", ViolationKind::Unique, unique_message("name", name)).into());
        }
        Ok(())
    }

    pub async fn create_association(&self, record: AssociationRecord) -> Result<Change<AssociationRecord>, AppError> {
        validator::validate_association(&self.registry, &record).await?;
        let stored = self.association_handle(&record)?.create(record.to_document()?).await?;
        let record = AssociationRecord::from_document(&stored)?;
        tracing::info!(
            association = %record.id,
            kind = ?record.variant.kind(),
            "association created"
        );
        let ids = record.model_ids();
        Ok(Change::new(record, ids))
    }

    /// Parse a submitted association document, then create it.
    pub async fn create_association_from_document(
        &self,
        doc: Document,
    ) -> Result<Change<AssociationRecord>, AppError> {
        let record = AssociationRecord::from_document(&doc)?;
        self.create_association(record).await
    }

    /// Merge `patch` into the stored association. The variant tag cannot change.
    pub async fn update_association(
        &self,
        id: &str,
        patch: Document,
    ) -> Result<Change<AssociationRecord>, AppError> {
        let existing = self
            .handle(ASSOCIATION_NAMESPACE)?
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("association {}", id)))?;
        let before = AssociationRecord::from_document(&existing)?;
        let mut merged = existing;
        merged.extend(patch);
        let after = AssociationRecord::from_document(&merged)?;
        if after.variant.tag() != before.variant.tag() {
            return Err(AppError::BadRequest(format!(
                "association {} cannot change type from {} to {}",
                id,
                before.variant.tag(),
                after.variant.tag()
            )));
        }
        validator::validate_association(&self.registry, &after).await?;
        let stored = self
            .association_handle(&after)?
            .update_by_id(id, after.to_document()?)
            .await?;
        let record = AssociationRecord::from_document(&stored)?;
        let mut ids = before.model_ids();
        ids.extend(record.model_ids());
        Ok(Change::new(record, ids))
    }

    pub async fn delete_association(&self, id: &str) -> Result<Change<AssociationRecord>, AppError> {
        let removed = self.handle(ASSOCIATION_NAMESPACE)?.delete_by_id(id).await?;
        let record = AssociationRecord::from_document(&removed)?;
        let ids = record.model_ids();
        Ok(Change::new(record, ids))
    }
}
