// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! Everything the compiler adds to models on its own: derived attributes,
//! the five system fields, association models for many-cardinality links,
//! and the self-describing root model.

use indexmap::IndexMap;

use super::{
    Field, FieldType, Identifiers, LinkActions, LinkKind, Model, ReferentialAction, SystemInfo,
};
use crate::helpers;

/// Slug of the model describing all other models.
pub const ROOT_MODEL_SLUG: &str = "roninModel";

/// Table backing the root model.
pub const ROOT_TABLE: &str = "ronin_schema";

/// The default expression of `id` columns.
pub(crate) fn id_default_expression(id_prefix: &str) -> String {
    format!("'{id_prefix}_' || lower(substr(hex(randomblob(12)), 1, 16))")
}

/// The default expression of timestamp columns.
pub(crate) const TIMESTAMP_DEFAULT_EXPRESSION: &str =
    "strftime('%Y-%m-%dT%H:%M:%f', 'now') || 'Z'";

/// The five fields present on every model, in their stable order.
pub(crate) fn system_fields(id_prefix: &str) -> IndexMap<String, Field> {
    let mut fields = IndexMap::new();
    fields.insert(
        "id".to_owned(),
        Field {
            field_type: FieldType::String,
            name: Some("ID".to_owned()),
            default_value: Some(helpers::expression_value(&id_default_expression(id_prefix))),
            system: true,
            ..Field::default()
        },
    );
    fields.insert(
        "ronin.createdAt".to_owned(),
        Field {
            field_type: FieldType::Date,
            name: Some("Created at".to_owned()),
            default_value: Some(helpers::expression_value(TIMESTAMP_DEFAULT_EXPRESSION)),
            system: true,
            ..Field::default()
        },
    );
    fields.insert(
        "ronin.createdBy".to_owned(),
        Field {
            field_type: FieldType::String,
            name: Some("Created by".to_owned()),
            system: true,
            ..Field::default()
        },
    );
    fields.insert(
        "ronin.updatedAt".to_owned(),
        Field {
            field_type: FieldType::Date,
            name: Some("Updated at".to_owned()),
            default_value: Some(helpers::expression_value(TIMESTAMP_DEFAULT_EXPRESSION)),
            system: true,
            ..Field::default()
        },
    );
    fields.insert(
        "ronin.updatedBy".to_owned(),
        Field {
            field_type: FieldType::String,
            name: Some("Updated by".to_owned()),
            system: true,
            ..Field::default()
        },
    );
    fields
}

/// Fills every derivable attribute of `model` and merges the system fields
/// at the head of its field map. Idempotent.
pub fn apply_defaults(model: &mut Model) {
    model.plural_slug = Some(model.plural_slug());
    model.name = Some(model.name());
    model.plural_name = Some(model.plural_name());
    model.id_prefix = Some(model.id_prefix());
    model.table = Some(model.table());
    model.identifiers = Some(model.identifiers());

    let mut fields = system_fields(&model.id_prefix());
    for (slug, field) in &model.fields {
        if let Some(existing) = fields.get_mut(slug) {
            // A model loaded back from storage carries its system fields
            // already; their stored shape wins.
            *existing = field.clone();
        } else {
            fields.insert(slug.clone(), field.clone());
        }
    }
    model.fields = fields;
}

/// The slug of the association model backing `field_slug` on `owner_slug`.
pub(crate) fn association_slug(owner_slug: &str, field_slug: &str) -> String {
    helpers::to_camel_case(&format!(
        "ronin_link_{}_{}",
        helpers::to_snake_case(owner_slug),
        helpers::to_snake_case(field_slug)
    ))
}

/// The table of the association model backing `field_slug` on `owner_slug`.
pub(crate) fn association_table(owner_slug: &str, field_slug: &str) -> String {
    format!(
        "ronin_link_{}_{}",
        helpers::to_snake_case(owner_slug),
        helpers::to_snake_case(field_slug)
    )
}

fn cascading_link(target: &str) -> Field {
    Field {
        field_type: FieldType::Link,
        target: Some(target.to_owned()),
        kind: Some(LinkKind::One),
        required: true,
        actions: Some(LinkActions {
            on_delete: Some(ReferentialAction::Cascade),
            on_update: Some(ReferentialAction::Cascade),
        }),
        ..Field::default()
    }
}

/// Builds the hidden association model for one many-cardinality link field.
pub(crate) fn association_model(owner: &Model, field_slug: &str, target: &str) -> Model {
    let slug = association_slug(&owner.slug, field_slug);
    let mut fields = IndexMap::new();
    fields.insert("source".to_owned(), cascading_link(&owner.slug));
    fields.insert("target".to_owned(), cascading_link(target));
    let mut model = Model {
        slug,
        table: Some(association_table(&owner.slug, field_slug)),
        fields,
        system: Some(SystemInfo {
            model: owner.slug.clone(),
            association_slug: Some(field_slug.to_owned()),
        }),
        ..Model::default()
    };
    apply_defaults(&mut model);
    model
}

/// All association models implied by `model`'s many-cardinality links.
pub(crate) fn association_models(model: &Model) -> Vec<Model> {
    model
        .many_link_fields()
        .filter_map(|(slug, field)| {
            field
                .target
                .as_deref()
                .map(|target| association_model(model, slug, target))
        })
        .collect()
}

/// The self-describing model stored in the `ronin_schema` table. Its rows
/// are the other models.
pub fn root_model() -> Model {
    let mut fields = IndexMap::new();
    for slug in ["name", "pluralName", "slug", "pluralSlug", "idPrefix", "table"] {
        let field = Field {
            field_type: FieldType::String,
            required: slug == "slug",
            ..Field::default()
        };
        fields.insert(slug.to_owned(), field);
    }
    for slug in ["identifiers.name", "identifiers.slug"] {
        fields.insert(
            slug.to_owned(),
            Field {
                field_type: FieldType::String,
                ..Field::default()
            },
        );
    }
    for slug in ["fields", "indexes", "presets"] {
        fields.insert(
            slug.to_owned(),
            Field {
                field_type: FieldType::Json,
                default_value: Some(serde_json::json!({})),
                ..Field::default()
            },
        );
    }
    let mut model = Model {
        slug: ROOT_MODEL_SLUG.to_owned(),
        id_prefix: Some("mod".to_owned()),
        table: Some(ROOT_TABLE.to_owned()),
        fields,
        system: Some(SystemInfo {
            model: "root".to_owned(),
            association_slug: None,
        }),
        ..Model::default()
    };
    apply_defaults(&mut model);
    model
}

/// Normalizes an externally supplied model list: defaults are applied to
/// every model and missing association models are synthesized so that DML
/// over many-cardinality links can resolve them.
pub(crate) fn normalize_list(models: &mut Vec<Model>) {
    for model in models.iter_mut() {
        apply_defaults(model);
    }
    let associations: Vec<Model> = models
        .iter()
        .flat_map(|model| association_models(model))
        .collect();
    for association in associations {
        if !models.iter().any(|model| model.slug == association.slug) {
            models.push(association);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_fields_order() {
        let model: Model = serde_json::from_value(json!({
            "slug": "account",
            "fields": { "handle": { "type": "string" } },
        }))
        .unwrap();
        let mut model = model;
        apply_defaults(&mut model);

        let slugs: Vec<&String> = model.fields.keys().collect();
        assert_eq!(
            slugs,
            [
                "id",
                "ronin.createdAt",
                "ronin.createdBy",
                "ronin.updatedAt",
                "ronin.updatedBy",
                "handle"
            ]
        );
        let id = &model.fields["id"];
        assert!(id.system);
        assert_eq!(
            id.default_value,
            Some(helpers::expression_value(
                "'acc_' || lower(substr(hex(randomblob(12)), 1, 16))"
            ))
        );
    }

    #[test]
    fn test_association_model_shape() {
        let mut owner: Model = serde_json::from_value(json!({
            "slug": "account",
            "fields": {
                "followers": { "type": "link", "target": "account", "kind": "many" },
            },
        }))
        .unwrap();
        apply_defaults(&mut owner);

        let associations = association_models(&owner);
        assert_eq!(associations.len(), 1);
        let association = &associations[0];
        assert_eq!(association.slug, "roninLinkAccountFollowers");
        assert_eq!(association.table(), "ronin_link_account_followers");
        assert_eq!(association.system.as_ref().unwrap().model, "account");
        assert_eq!(
            association.system.as_ref().unwrap().association_slug.as_deref(),
            Some("followers")
        );
        let source = &association.fields["source"];
        assert_eq!(source.target.as_deref(), Some("account"));
        assert_eq!(
            source.actions.unwrap().on_delete,
            Some(ReferentialAction::Cascade)
        );
    }

    #[test]
    fn test_root_model() {
        let root = root_model();
        assert_eq!(root.table(), "ronin_schema");
        assert_eq!(root.id_prefix(), "mod");
        assert_eq!(root.system.as_ref().unwrap().model, "root");
        assert!(root.fields.contains_key("identifiers.name"));
        assert_eq!(root.fields["fields"].field_type, FieldType::Json);
    }

    #[test]
    fn test_normalize_list_synthesizes_associations() {
        let mut models = vec![serde_json::from_value(json!({
            "slug": "account",
            "fields": {
                "followers": { "type": "link", "target": "account", "kind": "many" },
            },
        }))
        .unwrap()];
        normalize_list(&mut models);
        assert_eq!(models.len(), 2);
        assert_eq!(models[1].slug, "roninLinkAccountFollowers");
    }
}
