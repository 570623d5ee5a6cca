// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The data model: models, fields, indexes and presets.
//!
//! Models arrive from the outside (application code or rows of the
//! `ronin_schema` table) in a partially-specified form; [`system::apply_defaults`]
//! fills in everything that can be derived before any query is compiled.

pub(crate) mod resolver;
pub mod system;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::helpers;
use crate::query::Instructions;

/// The type of a field, driving both column DDL and value (de)serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Json,
    Blob,
    Link,
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::String
    }
}

impl FieldType {
    /// The name used inside `modelFields` maps of formatted results.
    pub fn type_name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Json => "json",
            FieldType::Blob => "blob",
            FieldType::Link => "link",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Collation {
    #[serde(rename = "BINARY")]
    Binary,
    #[serde(rename = "NOCASE")]
    NoCase,
    #[serde(rename = "RTRIM")]
    Rtrim,
}

impl Collation {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Collation::Binary => "BINARY",
            Collation::NoCase => "NOCASE",
            Collation::Rtrim => "RTRIM",
        }
    }
}

/// Cardinality of a link field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkKind {
    One,
    Many,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferentialAction {
    #[serde(rename = "CASCADE")]
    Cascade,
    #[serde(rename = "RESTRICT")]
    Restrict,
    #[serde(rename = "SET NULL")]
    SetNull,
    #[serde(rename = "SET DEFAULT")]
    SetDefault,
    #[serde(rename = "NO ACTION")]
    NoAction,
}

impl ReferentialAction {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkActions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputedKind {
    #[serde(rename = "VIRTUAL")]
    Virtual,
    #[serde(rename = "STORED")]
    Stored,
}

/// A generated column: `kind` picks the SQLite storage mode, `value` holds
/// the expression in document form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComputedAs {
    pub kind: ComputedKind,
    pub value: Value,
}

/// A field definition. The struct is flat (tagged by [`FieldType`]) so that
/// it can be patched as JSON inside the `ronin_schema` table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Field {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computed_as: Option<ComputedAs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub system: bool,
    /// `string` fields only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collation: Option<Collation>,
    /// `number` fields only: auto-incrementing integer column.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub increment: bool,
    /// `link` fields only: slug of the target model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// `link` fields only: cardinality, defaulting to `one`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<LinkKind>,
    /// `link` fields only: referential actions of the foreign key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<LinkActions>,
}

impl Field {
    /// Whether this is a link of many cardinality, which never materializes
    /// as a column.
    pub fn is_many_link(&self) -> bool {
        self.field_type == FieldType::Link && self.kind == Some(LinkKind::Many)
    }
}

/// One entry of an index: either a named field or a raw expression.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexField {
    Slug {
        slug: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order: Option<IndexOrder>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        collation: Option<Collation>,
    },
    Expression {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order: Option<IndexOrder>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOrder {
    #[serde(rename = "ASC")]
    Ascending,
    #[serde(rename = "DESC")]
    Descending,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Index {
    pub fields: Vec<IndexField>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    /// A `with`-shaped clause turning this into a partial index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

/// A reusable bundle of query instructions, applied through `using`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub instructions: Instructions,
}

/// Names of the fields resolved by the `nameIdentifier` / `slugIdentifier`
/// tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifiers {
    pub name: String,
    pub slug: String,
}

impl Default for Identifiers {
    fn default() -> Self {
        Self {
            name: "id".to_owned(),
            slug: "id".to_owned(),
        }
    }
}

/// Marks a model as auto-generated. `model` holds the owning model's slug
/// (or `"root"` for the schema model itself); `association_slug` holds the
/// slug of the link field an association model was created for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association_slug: Option<String>,
}

/// A model: the schema of one logical record type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Model {
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plural_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plural_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Alias used while compiling a single query; never serialized.
    #[serde(skip)]
    pub table_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<Identifiers>,
    pub fields: IndexMap<String, Field>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub indexes: IndexMap<String, Index>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub presets: IndexMap<String, Preset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemInfo>,
}

impl Model {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            ..Self::default()
        }
    }

    /// The plural slug, derived from the slug when not configured.
    pub fn plural_slug(&self) -> String {
        self.plural_slug
            .clone()
            .unwrap_or_else(|| helpers::pluralize(&self.slug))
    }

    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| helpers::slug_to_name(&self.slug))
    }

    pub fn plural_name(&self) -> String {
        self.plural_name
            .clone()
            .unwrap_or_else(|| helpers::slug_to_name(&self.plural_slug()))
    }

    /// The prefix of generated record ids, derived from the slug when not
    /// configured.
    pub fn id_prefix(&self) -> String {
        self.id_prefix.clone().unwrap_or_else(|| {
            let prefix: String = self.slug.chars().take(3).collect();
            prefix.to_lowercase()
        })
    }

    /// The physical table name, derived from the plural slug when not
    /// configured.
    pub fn table(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| helpers::to_snake_case(&self.plural_slug()))
    }

    pub fn identifiers(&self) -> Identifiers {
        self.identifiers.clone().unwrap_or_default()
    }

    /// Link fields of many cardinality, in field order.
    pub(crate) fn many_link_fields(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.fields.iter().filter(|(_, field)| field.is_many_link())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_derived_attributes() {
        let model: Model = serde_json::from_value(json!({
            "slug": "blogPost",
            "fields": { "title": { "type": "string" } },
        }))
        .unwrap();
        assert_eq!(model.plural_slug(), "blogPosts");
        assert_eq!(model.table(), "blog_posts");
        assert_eq!(model.id_prefix(), "blo");
        assert_eq!(model.name(), "Blog post");
        assert_eq!(model.identifiers().name, "id");
    }

    #[test]
    fn test_field_parsing() {
        let field: Field = serde_json::from_value(json!({
            "type": "link",
            "target": "account",
            "kind": "many",
        }))
        .unwrap();
        assert!(field.is_many_link());

        let field: Field = serde_json::from_value(json!({
            "type": "string",
            "collation": "NOCASE",
            "unique": true,
        }))
        .unwrap();
        assert_eq!(field.collation, Some(Collation::NoCase));
        assert!(field.unique);
        assert!(!field.is_many_link());
    }

    #[test]
    fn test_index_field_forms() {
        let index: Index = serde_json::from_value(json!({
            "fields": [
                { "slug": "handle", "order": "DESC" },
                { "expression": "lower(email)" },
            ],
            "unique": true,
        }))
        .unwrap();
        assert_eq!(index.fields.len(), 2);
        assert!(matches!(index.fields[0], IndexField::Slug { .. }));
        assert!(matches!(index.fields[1], IndexField::Expression { .. }));
    }

    #[test]
    fn test_field_serialization_is_compact() {
        let field = Field {
            field_type: FieldType::String,
            ..Field::default()
        };
        assert_eq!(serde_json::to_value(&field).unwrap(), json!({ "type": "string" }));
    }
}
