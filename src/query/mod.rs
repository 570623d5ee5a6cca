// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The typed form of RONIN queries.
//!
//! Queries travel over the wire as JSON documents (`{"get": {"account":
//! {...}}}`); [`document`] converts between that shape and the enum below,
//! which is what the compiler consumes. The pseudo-model `all` is a
//! distinct variant instead of a magic slug.

pub(crate) mod document;

use enum_as_inner::EnumAsInner;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Field, Index, Model, Preset};

/// The instruction bag of a single query. Values that may carry marker
/// objects (sub-queries, expressions) stay as JSON documents.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instructions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selecting: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub including: Option<IndexMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered_by: Option<OrderedBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limited_to: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub using: Option<Value>,
}

impl Instructions {
    pub fn is_empty(&self) -> bool {
        self == &Instructions::default()
    }
}

/// Sort order: entries are field slugs or expression markers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderedBy {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ascending: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub descending: Vec<Value>,
}

impl OrderedBy {
    pub fn is_empty(&self) -> bool {
        self.ascending.is_empty() && self.descending.is_empty()
    }
}

/// Instructions of a `get`/`count` over the pseudo-model `all`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AllInstructions {
    /// Restricts the expansion to models linked from this model.
    pub for_model: Option<String>,
    /// Per-model instruction overrides, keyed by plural slug.
    pub on: IndexMap<String, Instructions>,
    /// Instructions applied to every expanded query.
    pub rest: Instructions,
}

/// Which kind of model entity a DDL query manipulates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Field,
    Index,
    Preset,
}

impl EntityKind {
    pub(crate) fn key(self) -> &'static str {
        match self {
            EntityKind::Field => "field",
            EntityKind::Index => "index",
            EntityKind::Preset => "preset",
        }
    }

    /// Name of the JSON column of `ronin_schema` holding this entity kind.
    pub(crate) fn column(self) -> &'static str {
        match self {
            EntityKind::Field => "fields",
            EntityKind::Index => "indexes",
            EntityKind::Preset => "presets",
        }
    }
}

/// A new entity added to an existing model.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelEntity {
    Field { slug: String, field: Field },
    Index { slug: String, index: Index },
    Preset { slug: String, preset: Preset },
}

impl ModelEntity {
    pub(crate) fn kind(&self) -> EntityKind {
        match self {
            ModelEntity::Field { .. } => EntityKind::Field,
            ModelEntity::Index { .. } => EntityKind::Index,
            ModelEntity::Preset { .. } => EntityKind::Preset,
        }
    }

    pub(crate) fn slug(&self) -> &str {
        match self {
            ModelEntity::Field { slug, .. }
            | ModelEntity::Index { slug, .. }
            | ModelEntity::Preset { slug, .. } => slug,
        }
    }
}

/// The action of an `alter` query.
#[derive(Clone, Debug, PartialEq)]
pub enum AlterAction {
    /// Patch the model itself (`alter.model: <slug>, to: {...}`).
    To { patch: Value },
    /// Add an entity (`alter.model: <slug>, create: {field: {...}}`).
    Create { entity: ModelEntity },
    /// Patch an entity (`alter.model: <slug>, alter: {field: "x", to: {...}}`).
    Alter {
        kind: EntityKind,
        slug: String,
        to: Value,
    },
    /// Remove an entity (`alter.model: <slug>, drop: {field: "x"}`).
    Drop { kind: EntityKind, slug: String },
}

/// A single RONIN query.
#[derive(Clone, Debug, PartialEq, EnumAsInner)]
pub enum Query {
    Get {
        model: String,
        instructions: Instructions,
    },
    GetAll {
        instructions: AllInstructions,
    },
    Count {
        model: String,
        instructions: Instructions,
    },
    CountAll {
        instructions: AllInstructions,
    },
    Set {
        model: String,
        instructions: Instructions,
    },
    Add {
        model: String,
        instructions: Instructions,
    },
    Remove {
        model: String,
        instructions: Instructions,
    },
    Create {
        model: Model,
    },
    Alter {
        model: String,
        action: AlterAction,
    },
    Drop {
        model: String,
    },
    ListModels,
    ListModel {
        model: String,
    },
}

impl Query {
    /// Whether this is a DDL-shaped query handled by the meta transformer.
    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            Query::Create { .. }
                | Query::Alter { .. }
                | Query::Drop { .. }
                | Query::ListModels
                | Query::ListModel { .. }
        )
    }

    /// The model slug addressed by the query, when there is a single one.
    pub fn model_slug(&self) -> Option<&str> {
        match self {
            Query::Get { model, .. }
            | Query::Count { model, .. }
            | Query::Set { model, .. }
            | Query::Add { model, .. }
            | Query::Remove { model, .. }
            | Query::Alter { model, .. }
            | Query::Drop { model }
            | Query::ListModel { model } => Some(model),
            Query::Create { model } => Some(&model.slug),
            Query::GetAll { .. } | Query::CountAll { .. } | Query::ListModels => None,
        }
    }
}

impl Serialize for Query {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let document = Value::deserialize(deserializer)?;
        Query::from_document(&document).map_err(serde::de::Error::custom)
    }
}
