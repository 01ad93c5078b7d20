//! Loads persisted models with their fields and associations populated.

use super::hydrated::{HydratedAssociation, HydratedModel};
use super::types::{AssociationRecord, FieldRecord, ModelRecord};
use crate::error::AppError;
use crate::registry::ModelRegistry;
use crate::schema::builtin::{ASSOCIATION_NAMESPACE, FIELD_NAMESPACE, MODEL_NAMESPACE};
use crate::store::{document_id, Filter, ID};
use std::collections::{BTreeSet, HashMap};

/// Models (all, or those with the given ids) with fields and both directions of associations.
/// Association ends are resolved eagerly so schema building never goes back to the store.
pub async fn load_hydrated(
    registry: &ModelRegistry,
    ids: Option<&[String]>,
) -> Result<Vec<HydratedModel>, AppError> {
    let model_handle = registry.model(MODEL_NAMESPACE)?;
    let field_handle = registry.model(FIELD_NAMESPACE)?;
    let association_handle = registry.model(ASSOCIATION_NAMESPACE)?;

    let filter = match ids {
        Some(ids) => Filter::new().is_in(ID, ids.iter().cloned()),
        None => Filter::new(),
    };
    let models = model_handle
        .find_all(filter)
        .await?
        .iter()
        .map(ModelRecord::from_document)
        .collect::<Result<Vec<_>, _>>()?;
    if models.is_empty() {
        return Ok(Vec::new());
    }
    let model_ids: Vec<String> = models.iter().map(|m| m.id.clone()).collect();

    let fields = field_handle
        .find_all(Filter::new().is_in("modelId", model_ids.iter().cloned()))
        .await?
        .iter()
        .map(FieldRecord::from_document)
        .collect::<Result<Vec<_>, _>>()?;

    let mut docs = association_handle
        .find_all(Filter::new().is_in("fromModelId", model_ids.iter().cloned()))
        .await?;
    docs.extend(
        association_handle
            .find_all(Filter::new().is_in("toModelId", model_ids.iter().cloned()))
            .await?,
    );
    let mut seen = BTreeSet::new();
    let associations = docs
        .iter()
        .filter(|d| document_id(d).is_some_and(|id| seen.insert(id.to_string())))
        .map(AssociationRecord::from_document)
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_id: HashMap<String, ModelRecord> =
        models.iter().map(|m| (m.id.clone(), m.clone())).collect();
    let missing: BTreeSet<String> = associations
        .iter()
        .flat_map(|a| a.model_ids())
        .filter(|id| !by_id.contains_key(id))
        .collect();
    if !missing.is_empty() {
        for doc in model_handle
            .find_all(Filter::new().is_in(ID, missing.into_iter()))
            .await?
        {
            let m = ModelRecord::from_document(&doc)?;
            by_id.insert(m.id.clone(), m);
        }
    }

    let hydrated = models
        .into_iter()
        .map(|model| {
            let fields = fields.iter().filter(|f| f.model_id == model.id).cloned().collect();
            let associations = associations
                .iter()
                .filter(|a| a.from_model_id == model.id || a.to_model_id == model.id)
                .filter_map(|a| hydrate(a, &by_id))
                .collect();
            HydratedModel {
                model,
                fields,
                associations,
            }
        })
        .collect();
    Ok(hydrated)
}

fn hydrate(record: &AssociationRecord, models: &HashMap<String, ModelRecord>) -> Option<HydratedAssociation> {
    let (Some(from), Some(to)) = (models.get(&record.from_model_id), models.get(&record.to_model_id)) else {
        tracing::warn!(association = %record.id, "association references a missing model, skipping");
        return None;
    };
    let through = record.through_model_id().and_then(|id| models.get(id)).cloned();
    Some(HydratedAssociation {
        record: record.clone(),
        from: from.clone(),
        to: to.clone(),
        through,
    })
}
