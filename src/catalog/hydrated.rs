//! Models with their fields and associations populated, as cached by the registry.

use super::types::{AssociationRecord, FieldRecord, ModelRecord};
use std::collections::BTreeSet;

/// Association with both sides (and the junction, when set) populated.
#[derive(Clone, Debug, PartialEq)]
pub struct HydratedAssociation {
    pub record: AssociationRecord,
    pub from: ModelRecord,
    pub to: ModelRecord,
    pub through: Option<ModelRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HydratedModel {
    pub model: ModelRecord,
    pub fields: Vec<FieldRecord>,
    pub associations: Vec<HydratedAssociation>,
}

impl HydratedModel {
    pub fn namespace(&self) -> String {
        self.model.namespace()
    }

    /// Ids of other models reachable through this model's associations.
    pub fn related_model_ids(&self) -> BTreeSet<String> {
        self.associations
            .iter()
            .flat_map(|a| a.record.model_ids())
            .filter(|id| *id != self.model.id)
            .collect()
    }
}
