//! Relation declaration primitives and the association dispatcher.

use super::definition::{
    model_name, Cardinality, FieldDef, RelationDef, SchemaDefinition, StorageType, Through, ID,
};
use crate::case::camel_case;
use crate::catalog::{AssociationVariant, HydratedAssociation, ModelRecord};
use crate::error::SchemaError;

/// Options shared by the relation primitives. Unset values fall back to generated names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelationOptions {
    pub local_field: Option<String>,
    pub foreign_field: Option<String>,
    pub as_name: Option<String>,
    pub through: Option<String>,
    pub through_local_key: Option<String>,
    pub through_target_key: Option<String>,
}

impl RelationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_field(mut self, f: impl Into<String>) -> Self {
        self.local_field = Some(f.into());
        self
    }

    pub fn foreign_field(mut self, f: impl Into<String>) -> Self {
        self.foreign_field = Some(f.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.as_name = Some(name.into());
        self
    }

    pub fn through(mut self, junction: impl Into<String>) -> Self {
        self.through = Some(junction.into());
        self
    }
}

/// Directives for a foreign-key field added by `belongs_to`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyOptions {
    pub required: bool,
    pub unique: bool,
}

/// `camelCase(model) + "Id"`.
pub fn default_foreign_key(target: &str) -> String {
    format!("{}Id", camel_case(model_name(target)))
}

fn require_target(target: &str) -> Result<(), SchemaError> {
    if target.trim().is_empty() {
        return Err(SchemaError::MissingModelName);
    }
    Ok(())
}

fn opt(s: Option<&str>) -> Option<String> {
    s.map(str::to_string)
}

impl SchemaDefinition {
    /// Dependent-side reference. Adds the foreign key if missing and a singular accessor.
    pub fn belongs_to(
        self,
        target: &str,
        opts: RelationOptions,
        key: KeyOptions,
    ) -> Result<Self, SchemaError> {
        require_target(target)?;
        let local_field = opts.local_field.unwrap_or_else(|| default_foreign_key(target));
        let name = opts.as_name.unwrap_or_else(|| camel_case(model_name(target)));
        let mut schema = self;
        if !schema.has_field(&local_field) {
            let mut fk = FieldDef::new(&local_field, StorageType::ObjectRef).reference(target);
            if key.required {
                fk = fk.required();
            }
            if key.unique {
                fk = fk.unique();
            }
            schema = schema.with_field(fk);
        }
        Ok(schema.with_relation(RelationDef {
            name,
            target: target.to_string(),
            local_field,
            foreign_field: opts.foreign_field.unwrap_or_else(|| ID.to_string()),
            cardinality: Cardinality::One,
            through: None,
        }))
    }

    /// Independent-side one-to-many. `foreign_field` on the target is required.
    pub fn has_many(self, target: &str, opts: RelationOptions) -> Result<Self, SchemaError> {
        self.independent(target, opts, Cardinality::Many, "hasMany")
    }

    /// Independent-side one-to-one. Pair with a unique foreign key on the target.
    pub fn has_one(self, target: &str, opts: RelationOptions) -> Result<Self, SchemaError> {
        self.independent(target, opts, Cardinality::One, "hasOne")
    }

    fn independent(
        self,
        target: &str,
        opts: RelationOptions,
        cardinality: Cardinality,
        relation: &'static str,
    ) -> Result<Self, SchemaError> {
        require_target(target)?;
        let foreign_field = opts.foreign_field.ok_or(SchemaError::MissingOption {
            option: "foreignField",
            relation,
        })?;
        let base = camel_case(model_name(target));
        let name = opts.as_name.unwrap_or_else(|| match cardinality {
            Cardinality::Many => format!("{}Set", base),
            Cardinality::One => base,
        });
        Ok(self.with_relation(RelationDef {
            name,
            target: target.to_string(),
            local_field: opts.local_field.unwrap_or_else(|| ID.to_string()),
            foreign_field,
            cardinality,
            through: None,
        }))
    }

    /// Many-to-many accessor resolved through a junction. Adds no local foreign key.
    pub fn belongs_to_many(self, target: &str, opts: RelationOptions) -> Result<Self, SchemaError> {
        require_target(target)?;
        let junction = opts
            .through
            .unwrap_or_else(|| format!("{}_{}", self.name(), model_name(target)));
        let through = Through {
            model: junction,
            local_key: opts
                .through_local_key
                .unwrap_or_else(|| default_foreign_key(self.name())),
            target_key: opts
                .through_target_key
                .unwrap_or_else(|| default_foreign_key(target)),
        };
        let name = opts
            .as_name
            .unwrap_or_else(|| format!("{}Set", camel_case(model_name(target))));
        Ok(self.with_relation(RelationDef {
            name,
            target: target.to_string(),
            local_field: opts.local_field.unwrap_or_else(|| ID.to_string()),
            foreign_field: opts.foreign_field.unwrap_or_else(|| ID.to_string()),
            cardinality: Cardinality::Many,
            through: Some(through),
        }))
    }

    /// Apply every association this schema takes part in. Junctions synthesized for
    /// many-to-many associations without a through model are returned for registration.
    pub fn associate(self, associations: &[HydratedAssociation]) -> Result<Associated, SchemaError> {
        let mut schema = self;
        let mut junctions: Vec<SchemaDefinition> = Vec::new();
        for assoc in associations {
            let from_ns = assoc.from.namespace();
            let to_ns = assoc.to.namespace();
            let is_from = schema.name() == from_ns;
            let is_to = schema.name() == to_ns;
            if !is_from && !is_to {
                tracing::warn!(
                    schema = %schema.name(),
                    association = %assoc.record.id,
                    "association does not involve schema, skipping"
                );
                continue;
            }
            let rec = &assoc.record;
            match &rec.variant {
                AssociationVariant::Hierarchical { many } => {
                    let fk = opt(rec.to_model.foreign_key())
                        .unwrap_or_else(|| default_foreign_key(&from_ns));
                    let pk = rec.from_model.primary_key().unwrap_or(ID).to_string();
                    if is_from {
                        let opts = RelationOptions {
                            local_field: Some(pk.clone()),
                            foreign_field: Some(fk.clone()),
                            as_name: opt(rec.from_model.reverse_name()),
                            ..Default::default()
                        };
                        schema = if *many {
                            schema.has_many(&to_ns, opts)?
                        } else {
                            schema.has_one(&to_ns, opts)?
                        };
                    }
                    if is_to {
                        let opts = RelationOptions {
                            local_field: Some(fk),
                            foreign_field: Some(pk),
                            as_name: opt(rec.to_model.related_name()),
                            ..Default::default()
                        };
                        let key = KeyOptions {
                            required: false,
                            unique: !*many,
                        };
                        schema = schema.belongs_to(&from_ns, opts, key)?;
                    }
                }
                AssociationVariant::NonHierarchical { .. } => {
                    let keys = JunctionKeys::of(assoc)?;
                    let through = match &assoc.through {
                        Some(t) => t.namespace(),
                        None => {
                            let junction = junction_schema(assoc)?;
                            let ns = junction.name().to_string();
                            if !junctions.iter().any(|j| j.name() == ns) {
                                junctions.push(junction);
                            }
                            ns
                        }
                    };
                    if is_from {
                        schema = schema.belongs_to_many(
                            &to_ns,
                            RelationOptions {
                                local_field: Some(keys.from_pk.clone()),
                                foreign_field: Some(keys.to_pk.clone()),
                                as_name: opt(rec.from_model.reverse_name()),
                                through: Some(through.clone()),
                                through_local_key: Some(keys.from_key.clone()),
                                through_target_key: Some(keys.to_key.clone()),
                            },
                        )?;
                    }
                    if is_to {
                        schema = schema.belongs_to_many(
                            &from_ns,
                            RelationOptions {
                                local_field: Some(keys.to_pk),
                                foreign_field: Some(keys.from_pk),
                                as_name: opt(rec.to_model.reverse_name()),
                                through: Some(through),
                                through_local_key: Some(keys.to_key),
                                through_target_key: Some(keys.from_key),
                            },
                        )?;
                    }
                }
            }
        }
        Ok(Associated { schema, junctions })
    }
}

/// Result of [`SchemaDefinition::associate`].
#[derive(Clone, Debug, PartialEq)]
pub struct Associated {
    pub schema: SchemaDefinition,
    pub junctions: Vec<SchemaDefinition>,
}

struct JunctionKeys {
    from_key: String,
    to_key: String,
    from_pk: String,
    to_pk: String,
}

impl JunctionKeys {
    fn of(assoc: &HydratedAssociation) -> Result<Self, SchemaError> {
        let rec = &assoc.record;
        let from_key = opt(rec.from_model.foreign_key())
            .unwrap_or_else(|| default_foreign_key(&assoc.from.namespace()));
        let to_key = opt(rec.to_model.foreign_key())
            .unwrap_or_else(|| default_foreign_key(&assoc.to.namespace()));
        if from_key == to_key {
            return Err(SchemaError::AmbiguousJunctionKeys {
                from: assoc.from.namespace(),
                to: assoc.to.namespace(),
                key: from_key,
            });
        }
        Ok(JunctionKeys {
            from_key,
            to_key,
            from_pk: rec.from_model.primary_key().unwrap_or(ID).to_string(),
            to_pk: rec.to_model.primary_key().unwrap_or(ID).to_string(),
        })
    }
}

/// Deterministic junction name for a from/to pair.
pub fn junction_namespace(from: &ModelRecord, to: &ModelRecord) -> String {
    format!("{}_{}", from.namespace(), to.name)
}

/// Junction holding required references to both sides, unique per pair.
pub fn junction_schema(assoc: &HydratedAssociation) -> Result<SchemaDefinition, SchemaError> {
    let keys = JunctionKeys::of(assoc)?;
    let rec = &assoc.record;
    let required = KeyOptions {
        required: true,
        unique: false,
    };
    let schema = SchemaDefinition::new(junction_namespace(&assoc.from, &assoc.to))?
        .with_timestamps()
        .belongs_to(
            &assoc.from.namespace(),
            RelationOptions {
                local_field: Some(keys.from_key.clone()),
                foreign_field: Some(keys.from_pk),
                as_name: opt(rec.from_model.related_name()),
                ..Default::default()
            },
            required,
        )?
        .belongs_to(
            &assoc.to.namespace(),
            RelationOptions {
                local_field: Some(keys.to_key.clone()),
                foreign_field: Some(keys.to_pk),
                as_name: opt(rec.to_model.related_name()),
                ..Default::default()
            },
            required,
        )?;
    Ok(schema.with_index(&[keys.from_key.as_str(), keys.to_key.as_str()], true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::AssociationRecord;

    fn model(id: &str, name: &str) -> ModelRecord {
        ModelRecord {
            id: id.into(),
            ..ModelRecord::new("blog", "", name)
        }
    }

    fn schema(ns: &str) -> SchemaDefinition {
        SchemaDefinition::new(ns).unwrap()
    }

    fn hierarchical(many: bool, reverse: &str) -> HydratedAssociation {
        let mut record = AssociationRecord::hierarchical("a", "b", many);
        record.id = "assoc".into();
        record.from_model.reverse_name = reverse.into();
        HydratedAssociation {
            record,
            from: model("a", "Author"),
            to: model("b", "BookReview"),
            through: None,
        }
    }

    #[test]
    fn belongs_to_adds_key_and_accessor() {
        let s = schema("blog.Post")
            .belongs_to("blog.Author", RelationOptions::new(), KeyOptions { required: true, unique: false })
            .unwrap();
        let fk = s.field("authorId").unwrap();
        assert_eq!(fk.storage, StorageType::ObjectRef);
        assert!(fk.required.always());
        let rel = s.relation("author").unwrap();
        assert_eq!((rel.local_field.as_str(), rel.foreign_field.as_str()), ("authorId", "id"));
        assert_eq!(rel.cardinality, Cardinality::One);
    }

    #[test]
    fn belongs_to_keeps_existing_field() {
        let s = schema("blog.Post")
            .with_field(FieldDef::new("authorId", StorageType::Text))
            .belongs_to("blog.Author", RelationOptions::new(), KeyOptions::default())
            .unwrap();
        assert_eq!(s.field("authorId").unwrap().storage, StorageType::Text);
    }

    #[test]
    fn has_many_requires_foreign_field() {
        let err = schema("blog.Author").has_many("blog.Post", RelationOptions::new()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingOption {
                option: "foreignField",
                relation: "hasMany"
            }
        );
        let err = schema("blog.Author")
            .has_one("", RelationOptions::new().foreign_field("authorId"))
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingModelName);
        let s = schema("blog.Author")
            .has_many("blog.Post", RelationOptions::new().foreign_field("authorId"))
            .unwrap();
        assert_eq!(s.relation("postSet").unwrap().cardinality, Cardinality::Many);
    }

    #[test]
    fn belongs_to_many_defaults_junction_and_keys() {
        let s = schema("blog.Post").belongs_to_many("blog.Tag", RelationOptions::new()).unwrap();
        let rel = s.relation("tagSet").unwrap();
        let through = rel.through.as_ref().unwrap();
        assert_eq!(through.model, "blog.Post_Tag");
        assert_eq!((through.local_key.as_str(), through.target_key.as_str()), ("postId", "tagId"));
        assert!(s.fields().is_empty());
    }

    #[test]
    fn hierarchical_association_wires_both_sides() {
        let assoc = hierarchical(true, "reviews");
        let dominant = schema("blog.Author").associate(&[assoc.clone()]).unwrap().schema;
        let rel = dominant.relation("reviews").unwrap();
        assert_eq!(rel.cardinality, Cardinality::Many);
        assert_eq!(rel.foreign_field, "authorId");

        let subordinate = schema("blog.BookReview").associate(&[assoc]).unwrap().schema;
        let back = subordinate.relation("author").unwrap();
        assert_eq!(back.local_field, "authorId");
        assert!(!subordinate.field("authorId").unwrap().unique);
    }

    #[test]
    fn one_to_one_is_singular_with_unique_key() {
        let assoc = hierarchical(false, "");
        let dominant = schema("blog.Author").associate(&[assoc.clone()]).unwrap().schema;
        assert_eq!(dominant.relation("bookReview").unwrap().cardinality, Cardinality::One);
        let subordinate = schema("blog.BookReview").associate(&[assoc]).unwrap().schema;
        assert!(subordinate.field("authorId").unwrap().unique);
    }

    #[test]
    fn many_to_many_synthesizes_one_junction() {
        let mut record = AssociationRecord::many_to_many("p", "t", None);
        record.id = "pt".into();
        let assoc = HydratedAssociation {
            record,
            from: model("p", "Post"),
            to: model("t", "Tag"),
            through: None,
        };
        let out = schema("blog.Post")
            .associate(&[assoc.clone(), assoc.clone()])
            .unwrap();
        assert_eq!(out.junctions.len(), 1);
        let junction = &out.junctions[0];
        assert_eq!(junction.name(), "blog.Post_Tag");
        assert!(junction.field("postId").unwrap().required.always());
        assert!(junction.field("tagId").unwrap().required.always());
        assert!(junction.relation("post").is_some() && junction.relation("tag").is_some());
        assert_eq!(out.junctions, schema("blog.Tag").associate(&[assoc]).unwrap().junctions);
    }

    #[test]
    fn self_many_to_many_needs_distinct_keys() {
        let assoc = HydratedAssociation {
            record: AssociationRecord::many_to_many("u", "u", None),
            from: model("u", "User"),
            to: model("u", "User"),
            through: None,
        };
        assert!(matches!(
            schema("blog.User").associate(&[assoc]),
            Err(SchemaError::AmbiguousJunctionKeys { .. })
        ));
    }
}
