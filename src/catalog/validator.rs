//! Association record checks that need the store: referenced models and naming uniqueness.

use super::types::{AssociationRecord, NamingField, Side};
use crate::error::{unique_message, AppError, ValidationError, ViolationKind};
use crate::registry::ModelRegistry;
use crate::schema::builtin::{ASSOCIATION_NAMESPACE, MODEL_NAMESPACE};
use crate::store::{document_id, Filter};
use std::collections::HashSet;

/// Validate `record` against the stored catalog. An existing record (non-empty id) is excluded from
/// the uniqueness checks.
pub async fn validate_association(registry: &ModelRegistry, record: &AssociationRecord) -> Result<(), AppError> {
    let mut errors = ValidationError::new();
    check_models(registry, record, &mut errors).await?;
    if errors.is_empty() {
        let others = neighbours(registry, record).await?;
        check_naming(record, &others, &mut errors);
    }
    errors.into_result().map_err(AppError::from)
}

async fn check_models(
    registry: &ModelRegistry,
    record: &AssociationRecord,
    errors: &mut ValidationError,
) -> Result<(), AppError> {
    let models = registry.model(MODEL_NAMESPACE)?;
    let mut refs = vec![
        ("fromModelId", Some(record.from_model_id.as_str())),
        ("toModelId", Some(record.to_model_id.as_str())),
    ];
    if let Some(through) = record.through_model_id() {
        refs.push(("throughModelId", Some(through)));
    }
    for (path, id) in refs {
        match id.filter(|id| !id.is_empty()) {
            None => errors.push(path, ViolationKind::Required, format!("Path `{}` is required.", path)),
            Some(id) => {
                if models.find_by_id(id).await?.is_none() {
                    errors.push(
                        path,
                        ViolationKind::Reference,
                        format!("`{}` does not reference an existing model", id),
                    );
                }
            }
        }
    }
    Ok(())
}

/// Other associations touching either end of `record`.
async fn neighbours(registry: &ModelRegistry, record: &AssociationRecord) -> Result<Vec<AssociationRecord>, AppError> {
    let handle = registry.model(ASSOCIATION_NAMESPACE)?;
    let ends = [record.from_model_id.clone(), record.to_model_id.clone()];
    let mut docs = handle
        .find_all(Filter::new().is_in("fromModelId", ends.iter().cloned()))
        .await?;
    docs.extend(handle.find_all(Filter::new().is_in("toModelId", ends.iter().cloned())).await?);
    let mut seen = HashSet::new();
    docs.iter()
        .filter(|d| document_id(d).is_some_and(|id| id != record.id && seen.insert(id.to_string())))
        .map(AssociationRecord::from_document)
        .collect()
}

fn same_pair(a: &AssociationRecord, b: &AssociationRecord) -> bool {
    (a.from_model_id == b.from_model_id && a.to_model_id == b.to_model_id)
        || (a.from_model_id == b.to_model_id && a.to_model_id == b.from_model_id)
}

/// An explicit name must be unique among associations with the same model on that side.
/// A blank name must be unique per model pair, since the generated defaults would collide.
fn check_naming(record: &AssociationRecord, others: &[AssociationRecord], errors: &mut ValidationError) {
    for &(side, field) in record.variant.naming_fields() {
        let value = record.side(side).get(field).trim();
        let clash = others
            .iter()
            .filter(|o| o.variant.naming_fields().contains(&(side, field)))
            .any(|o| {
                let theirs = o.side(side).get(field).trim();
                if value.is_empty() {
                    theirs.is_empty() && same_pair(record, o)
                } else {
                    theirs == value && o.side_model_id(side) == record.side_model_id(side)
                }
            });
        if clash {
            let path = naming_path(side, field);
            let message = unique_message(&path, value);
            errors.push(path, ViolationKind::Unique, message);
        }
    }
}

fn naming_path(side: Side, field: NamingField) -> String {
    format!("{}.{}", side.key(), field.key())
}
