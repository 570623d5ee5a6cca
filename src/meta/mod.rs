// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The meta-query transformer: DDL-shaped queries become native DDL
//! dependency statements, in-memory model list updates, and a rewritten
//! DML query that records the same change in the `ronin_schema` table.

pub(crate) mod ddl;

use serde_json::{json, Map, Value};

use crate::compiler::CompileOptions;
use crate::error::{CompilerError, ErrorCode, Result};
use crate::helpers;
use crate::model::{resolver, system, Field, Index, Model, Preset};
use crate::query::{AlterAction, EntityKind, Instructions, ModelEntity, Query};
use crate::statement::Statement;

/// What the transformer made of an input query.
pub(crate) enum MetaOutcome {
    /// Not a meta query; compile as-is.
    Plain(Query),
    /// A meta query rewritten into schema-table DML plus dependencies.
    Rewritten { query: Query, deps: Vec<Statement> },
    /// A meta query over a system model: only DDL, the first dependency
    /// acting as the main statement.
    DdlOnly { deps: Vec<Statement> },
}

pub(crate) fn transform(
    models: &mut Vec<Model>,
    query: &Query,
    options: &CompileOptions,
) -> Result<MetaOutcome> {
    match query {
        Query::ListModels => Ok(MetaOutcome::Rewritten {
            query: Query::Get {
                model: system::root_model().plural_slug(),
                instructions: Instructions::default(),
            },
            deps: Vec::new(),
        }),
        Query::ListModel { model } => Ok(MetaOutcome::Rewritten {
            query: Query::Get {
                model: system::ROOT_MODEL_SLUG.to_owned(),
                instructions: Instructions {
                    with: Some(json!({ "slug": model })),
                    ..Instructions::default()
                },
            },
            deps: Vec::new(),
        }),
        Query::Create { model } => create_model(models, model),
        Query::Drop { model } => drop_model(models, model),
        Query::Alter { model, action } => match action {
            AlterAction::To { patch } => alter_model(models, model, patch, options),
            AlterAction::Create { entity } => create_entity(models, model, entity),
            AlterAction::Alter { kind, slug, to } => alter_entity(models, model, *kind, slug, to, options),
            AlterAction::Drop { kind, slug } => drop_entity(models, model, *kind, slug),
        },
        other => Ok(MetaOutcome::Plain(other.clone())),
    }
}

/// A JSON value as a single-quoted SQL string literal.
fn json_literal(value: &Value) -> String {
    let text = serde_json::to_string(value).unwrap_or_default();
    format!("'{}'", text.replace('\'', "''"))
}

/// The rewritten query updating one JSON column of a model's schema row.
fn schema_update(model_slug: &str, column: &str, expression: String) -> Query {
    let mut to = Map::new();
    to.insert(column.to_owned(), helpers::expression_value(&expression));
    Query::Set {
        model: system::ROOT_MODEL_SLUG.to_owned(),
        instructions: Instructions {
            with: Some(json!({ "slug": model_slug })),
            to: Some(Value::Object(to)),
            ..Instructions::default()
        },
    }
}

/// The `ronin_schema` row of a model.
fn model_row(model: &Model) -> Value {
    json!({
        "slug": model.slug,
        "pluralSlug": model.plural_slug(),
        "name": model.name(),
        "pluralName": model.plural_name(),
        "idPrefix": model.id_prefix(),
        "table": model.table(),
        "identifiers": {
            "name": model.identifiers().name,
            "slug": model.identifiers().slug,
        },
        "fields": serde_json::to_value(&model.fields).unwrap_or_default(),
        "indexes": serde_json::to_value(&model.indexes).unwrap_or_default(),
        "presets": serde_json::to_value(&model.presets).unwrap_or_default(),
    })
}

/// The scalar columns of a model's schema row, used when patching.
fn model_row_patch(model: &Model) -> Value {
    json!({
        "slug": model.slug,
        "pluralSlug": model.plural_slug(),
        "name": model.name(),
        "pluralName": model.plural_name(),
        "idPrefix": model.id_prefix(),
        "table": model.table(),
        "identifiers": {
            "name": model.identifiers().name,
            "slug": model.identifiers().slug,
        },
    })
}

fn validate_fields(fields: &indexmap::IndexMap<String, Field>) -> Result<()> {
    for (slug, field) in fields {
        if field.field_type == crate::model::FieldType::Json {
            if let Some(default) = &field.default_value {
                if !default.is_object() {
                    return Err(CompilerError::new(
                        ErrorCode::InvalidModelValue,
                        format!("The default value of JSON field \"{slug}\" must be an object."),
                    )
                    .with_field("fields"));
                }
            }
        }
    }
    Ok(())
}

fn existing_entity(kind: &str, slug: &str, model_name: &str) -> CompilerError {
    CompilerError::new(
        ErrorCode::ExistingModelEntity,
        format!("A {kind} with the slug \"{slug}\" already exists in model \"{model_name}\"."),
    )
    .with_field(slug)
}

fn create_model(models: &mut Vec<Model>, def: &Model) -> Result<MetaOutcome> {
    let mut def = def.clone();
    system::apply_defaults(&mut def);

    if models
        .iter()
        .any(|model| model.slug == def.slug || model.plural_slug() == def.plural_slug())
    {
        return Err(existing_entity("model", &def.slug, &def.name()));
    }
    validate_fields(&def.fields)?;

    let mut deps = vec![ddl::create_table(models, &def)?];
    models.push(def.clone());

    for association in system::association_models(&def) {
        deps.push(ddl::create_table(models, &association)?);
        models.push(association);
    }
    for (slug, index) in &def.indexes {
        deps.push(ddl::create_index(models, &def, slug, index)?);
    }

    if def.system.is_some() || def.slug == system::ROOT_MODEL_SLUG {
        return Ok(MetaOutcome::DdlOnly { deps });
    }
    Ok(MetaOutcome::Rewritten {
        query: Query::Add {
            model: system::ROOT_MODEL_SLUG.to_owned(),
            instructions: Instructions {
                to: Some(model_row(&def)),
                ..Instructions::default()
            },
        },
        deps,
    })
}

fn drop_model(models: &mut Vec<Model>, slug: &str) -> Result<MetaOutcome> {
    let index = resolver::model_index(models, slug)?;
    let model = models.remove(index);

    let mut deps = vec![ddl::drop_table(&model)];
    // Hidden association models disappear with their owner.
    let mut position = 0;
    while position < models.len() {
        let owned = models[position]
            .system
            .as_ref()
            .map_or(false, |info| info.model == model.slug);
        if owned {
            deps.push(ddl::drop_table(&models[position]));
            models.remove(position);
        } else {
            position += 1;
        }
    }

    if model.system.is_some() {
        return Ok(MetaOutcome::DdlOnly { deps });
    }
    Ok(MetaOutcome::Rewritten {
        query: Query::Remove {
            model: system::ROOT_MODEL_SLUG.to_owned(),
            instructions: Instructions {
                with: Some(json!({ "slug": model.slug })),
                ..Instructions::default()
            },
        },
        deps,
    })
}

/// Applies a partial patch to a model. A slug change resets every derived
/// attribute so it is recomputed unless the patch pins it.
fn apply_model_patch(old: &Model, patch: &Value) -> Result<Model> {
    let object = patch.as_object().ok_or_else(|| {
        CompilerError::new(
            ErrorCode::InvalidModelValue,
            "A model patch must be an object.",
        )
    })?;
    let mut updated = old.clone();

    if let Some(slug) = object.get("slug").and_then(Value::as_str) {
        if slug != old.slug {
            updated.slug = slug.to_owned();
            updated.plural_slug = None;
            updated.name = None;
            updated.plural_name = None;
            updated.table = None;
            // The id prefix stays: existing ids already carry it.
        }
    }
    let assign = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_owned);
    if let Some(value) = assign(object.get("pluralSlug")) {
        updated.plural_slug = Some(value);
    }
    if let Some(value) = assign(object.get("name")) {
        updated.name = Some(value);
    }
    if let Some(value) = assign(object.get("pluralName")) {
        updated.plural_name = Some(value);
    }
    if let Some(value) = assign(object.get("idPrefix")) {
        updated.id_prefix = Some(value);
    }
    if let Some(value) = assign(object.get("table")) {
        updated.table = Some(value);
    }
    if let Some(identifiers) = object.get("identifiers") {
        updated.identifiers = Some(serde_json::from_value(identifiers.clone()).map_err(|err| {
            CompilerError::new(
                ErrorCode::InvalidModelValue,
                format!("Invalid `identifiers` value: {err}."),
            )
        })?);
    }
    if let Some(info) = object.get("system") {
        updated.system = Some(serde_json::from_value(info.clone()).map_err(|err| {
            CompilerError::new(
                ErrorCode::InvalidModelValue,
                format!("Invalid `system` value: {err}."),
            )
        })?);
    }
    system::apply_defaults(&mut updated);
    Ok(updated)
}

fn alter_model(
    models: &mut Vec<Model>,
    slug: &str,
    patch: &Value,
    options: &CompileOptions,
) -> Result<MetaOutcome> {
    let index = resolver::model_index(models, slug)?;
    let old = models[index].clone();
    let updated = apply_model_patch(&old, patch)?;

    let mut deps = Vec::new();
    if updated.table() != old.table() {
        deps.push(ddl::rename_table(&old.table(), &updated.table()));
    }
    models[index] = updated.clone();

    if updated.slug != old.slug {
        reconcile_associations(models, &old.slug, &updated.slug, &mut deps, options)?;
        // Links elsewhere keep pointing at the renamed model.
        for model in models.iter_mut() {
            for (_, field) in model.fields.iter_mut() {
                if field.target.as_deref() == Some(old.slug.as_str()) {
                    field.target = Some(updated.slug.clone());
                }
            }
        }
    }

    if old.system.is_some() {
        return Ok(MetaOutcome::DdlOnly { deps });
    }
    Ok(MetaOutcome::Rewritten {
        query: Query::Set {
            model: system::ROOT_MODEL_SLUG.to_owned(),
            instructions: Instructions {
                with: Some(json!({ "slug": old.slug })),
                to: Some(model_row_patch(&updated)),
                ..Instructions::default()
            },
        },
        deps,
    })
}

/// Renames the hidden association models owned by a model whose slug
/// changed, through recursive meta compilation.
fn reconcile_associations(
    models: &mut Vec<Model>,
    old_owner: &str,
    new_owner: &str,
    deps: &mut Vec<Statement>,
    options: &CompileOptions,
) -> Result<()> {
    let owned: Vec<(String, String)> = models
        .iter()
        .filter_map(|model| {
            let info = model.system.as_ref()?;
            if info.model == old_owner {
                Some((model.slug.clone(), info.association_slug.clone()?))
            } else {
                None
            }
        })
        .collect();

    for (old_slug, field_slug) in owned {
        let patch = json!({
            "slug": system::association_slug(new_owner, &field_slug),
            "table": system::association_table(new_owner, &field_slug),
            "system": { "model": new_owner, "associationSlug": field_slug },
        });
        let outcome = transform(
            models,
            &Query::Alter {
                model: old_slug,
                action: AlterAction::To { patch },
            },
            options,
        )?;
        if let MetaOutcome::DdlOnly { deps: nested } = outcome {
            deps.extend(nested);
        }
    }
    Ok(())
}

fn create_entity(
    models: &mut Vec<Model>,
    slug: &str,
    entity: &ModelEntity,
) -> Result<MetaOutcome> {
    let index = resolver::model_index(models, slug)?;
    let model = models[index].clone();

    let (column, expression, deps) = match entity {
        ModelEntity::Field {
            slug: field_slug,
            field,
        } => {
            if model.fields.contains_key(field_slug) {
                return Err(existing_entity("field", field_slug, &model.name()));
            }
            let mut fields = indexmap::IndexMap::new();
            fields.insert(field_slug.clone(), field.clone());
            validate_fields(&fields)?;

            let mut deps = Vec::new();
            if field.is_many_link() {
                let target = field.target.as_deref().ok_or_else(|| {
                    CompilerError::new(
                        ErrorCode::InvalidModelValue,
                        format!("Link field \"{field_slug}\" does not name a target model."),
                    )
                    .with_field("fields")
                })?;
                let association = system::association_model(&model, field_slug, target);
                deps.push(ddl::create_table(models, &association)?);
                models.push(association);
            } else {
                deps.push(ddl::add_column(models, &model, field_slug, field)?);
            }
            models[index].fields.insert(field_slug.clone(), field.clone());

            let expression = format!(
                "json_insert(\"fields\", '$.{field_slug}', {})",
                json_literal(&serde_json::to_value(field).unwrap_or_default())
            );
            ("fields", expression, deps)
        }
        ModelEntity::Index {
            slug: index_slug,
            index: def,
        } => {
            if model.indexes.contains_key(index_slug) {
                return Err(existing_entity("index", index_slug, &model.name()));
            }
            let deps = vec![ddl::create_index(models, &model, index_slug, def)?];
            models[index].indexes.insert(index_slug.clone(), def.clone());
            let expression = format!(
                "json_insert(\"indexes\", '$.{index_slug}', {})",
                json_literal(&serde_json::to_value(def).unwrap_or_default())
            );
            ("indexes", expression, deps)
        }
        ModelEntity::Preset {
            slug: preset_slug,
            preset,
        } => {
            if model.presets.contains_key(preset_slug) {
                return Err(existing_entity("preset", preset_slug, &model.name()));
            }
            models[index].presets.insert(preset_slug.clone(), preset.clone());
            let expression = format!(
                "json_insert(\"presets\", '$.{preset_slug}', {})",
                json_literal(&serde_json::to_value(preset).unwrap_or_default())
            );
            ("presets", expression, Vec::new())
        }
    };

    if model.system.is_some() {
        return Ok(MetaOutcome::DdlOnly { deps });
    }
    Ok(MetaOutcome::Rewritten {
        query: schema_update(&model.slug, column, expression),
        deps,
    })
}

fn alter_entity(
    models: &mut Vec<Model>,
    slug: &str,
    kind: EntityKind,
    entity_slug: &str,
    to: &Value,
    options: &CompileOptions,
) -> Result<MetaOutcome> {
    let index = resolver::model_index(models, slug)?;
    let model = models[index].clone();

    let patch_object = to.as_object().ok_or_else(|| {
        CompilerError::new(
            ErrorCode::InvalidModelValue,
            "An entity patch must be an object.",
        )
    })?;
    let new_slug = patch_object
        .get("slug")
        .and_then(Value::as_str)
        .unwrap_or(entity_slug)
        .to_owned();
    let mut patch_without_slug = patch_object.clone();
    patch_without_slug.remove("slug");
    let patch_value = Value::Object(patch_without_slug);

    let mut deps = Vec::new();
    let column = kind.column();

    match kind {
        EntityKind::Field => {
            let old_field = model.fields.get(entity_slug).cloned().ok_or_else(|| {
                CompilerError::field_not_found(entity_slug, &model.name(), "alter")
            })?;
            let mut merged = serde_json::to_value(&old_field).unwrap_or_default();
            helpers::deep_merge(&mut merged, &patch_value);
            let patched: Field = serde_json::from_value(merged).map_err(|err| {
                CompilerError::new(
                    ErrorCode::InvalidFieldValue,
                    format!("Invalid field patch: {err}."),
                )
                .with_field(entity_slug)
            })?;

            if new_slug != entity_slug {
                if old_field.is_many_link() {
                    reconcile_renamed_link(models, &model, entity_slug, &new_slug, &mut deps, options)?;
                } else {
                    deps.push(ddl::rename_column(&model, entity_slug, &new_slug));
                }
            }
            rename_map_key(&mut models[index].fields, entity_slug, &new_slug, patched);
        }
        EntityKind::Index => {
            let old_index = model.indexes.get(entity_slug).cloned().ok_or_else(|| {
                CompilerError::new(
                    ErrorCode::IndexNotFound,
                    format!(
                        "Index \"{entity_slug}\" does not exist in model \"{}\".",
                        model.name()
                    ),
                )
            })?;
            let mut merged = serde_json::to_value(&old_index).unwrap_or_default();
            helpers::deep_merge(&mut merged, &patch_value);
            let patched: Index = serde_json::from_value(merged).map_err(|err| {
                CompilerError::new(
                    ErrorCode::InvalidModelValue,
                    format!("Invalid index patch: {err}."),
                )
                .with_field("indexes")
            })?;
            // SQLite cannot alter an index in place.
            deps.push(ddl::drop_index(entity_slug));
            deps.push(ddl::create_index(models, &model, &new_slug, &patched)?);
            rename_map_key(&mut models[index].indexes, entity_slug, &new_slug, patched);
        }
        EntityKind::Preset => {
            let old_preset = model.presets.get(entity_slug).cloned().ok_or_else(|| {
                CompilerError::new(
                    ErrorCode::PresetNotFound,
                    format!(
                        "Preset \"{entity_slug}\" does not exist in model \"{}\".",
                        model.name()
                    ),
                )
            })?;
            let mut merged = serde_json::to_value(&old_preset).unwrap_or_default();
            helpers::deep_merge(&mut merged, &patch_value);
            let patched: Preset = serde_json::from_value(merged).map_err(|err| {
                CompilerError::new(
                    ErrorCode::InvalidModelValue,
                    format!("Invalid preset patch: {err}."),
                )
                .with_field("presets")
            })?;
            rename_map_key(&mut models[index].presets, entity_slug, &new_slug, patched);
        }
    }

    let expression = if new_slug != entity_slug {
        format!(
            "json_set(json_remove(\"{column}\", '$.{entity_slug}'), '$.{new_slug}', json_patch(json_extract(\"{column}\", '$.{entity_slug}'), {}))",
            json_literal(&patch_value)
        )
    } else {
        format!(
            "json_set(\"{column}\", '$.{entity_slug}', json_patch(json_extract(\"{column}\", '$.{entity_slug}'), {}))",
            json_literal(&patch_value)
        )
    };

    if model.system.is_some() {
        return Ok(MetaOutcome::DdlOnly { deps });
    }
    Ok(MetaOutcome::Rewritten {
        query: schema_update(&model.slug, column, expression),
        deps,
    })
}

/// Replaces `old_slug` with `new_slug` in an ordered map, keeping the
/// entry's position.
fn rename_map_key<T>(
    map: &mut indexmap::IndexMap<String, T>,
    old_slug: &str,
    new_slug: &str,
    value: T,
) {
    let mut value = Some(value);
    let mut rebuilt = indexmap::IndexMap::with_capacity(map.len());
    for (key, entry) in map.drain(..) {
        if key == old_slug {
            if let Some(patched) = value.take() {
                rebuilt.insert(new_slug.to_owned(), patched);
            }
        } else {
            rebuilt.insert(key, entry);
        }
    }
    *map = rebuilt;
}

/// A renamed many-cardinality link drags its association model along.
fn reconcile_renamed_link(
    models: &mut Vec<Model>,
    owner: &Model,
    old_field: &str,
    new_field: &str,
    deps: &mut Vec<Statement>,
    options: &CompileOptions,
) -> Result<()> {
    let old_slug = system::association_slug(&owner.slug, old_field);
    let patch = json!({
        "slug": system::association_slug(&owner.slug, new_field),
        "table": system::association_table(&owner.slug, new_field),
        "system": { "model": owner.slug, "associationSlug": new_field },
    });
    let outcome = transform(
        models,
        &Query::Alter {
            model: old_slug,
            action: AlterAction::To { patch },
        },
        options,
    )?;
    if let MetaOutcome::DdlOnly { deps: nested } = outcome {
        deps.extend(nested);
    }
    Ok(())
}

fn drop_entity(
    models: &mut Vec<Model>,
    slug: &str,
    kind: EntityKind,
    entity_slug: &str,
) -> Result<MetaOutcome> {
    let index = resolver::model_index(models, slug)?;
    let model = models[index].clone();

    let mut deps = Vec::new();
    let column = kind.column();
    match kind {
        EntityKind::Field => {
            let field = model.fields.get(entity_slug).cloned().ok_or_else(|| {
                CompilerError::field_not_found(entity_slug, &model.name(), "drop")
            })?;
            if field.system {
                return Err(CompilerError::new(
                    ErrorCode::RequiredModelEntity,
                    format!("The system field \"{entity_slug}\" cannot be dropped."),
                )
                .with_field(entity_slug));
            }
            if field.is_many_link() {
                let association_slug = system::association_slug(&model.slug, entity_slug);
                if let Ok(position) = resolver::model_index(models, &association_slug) {
                    deps.push(ddl::drop_table(&models[position]));
                    models.remove(position);
                }
            } else {
                deps.push(ddl::drop_column(&model, entity_slug));
            }
            models[index].fields.shift_remove(entity_slug);
        }
        EntityKind::Index => {
            if !model.indexes.contains_key(entity_slug) {
                return Err(CompilerError::new(
                    ErrorCode::IndexNotFound,
                    format!(
                        "Index \"{entity_slug}\" does not exist in model \"{}\".",
                        model.name()
                    ),
                ));
            }
            deps.push(ddl::drop_index(entity_slug));
            models[index].indexes.shift_remove(entity_slug);
        }
        EntityKind::Preset => {
            if !model.presets.contains_key(entity_slug) {
                return Err(CompilerError::new(
                    ErrorCode::PresetNotFound,
                    format!(
                        "Preset \"{entity_slug}\" does not exist in model \"{}\".",
                        model.name()
                    ),
                ));
            }
            models[index].presets.shift_remove(entity_slug);
        }
    }

    let expression = format!("json_remove(\"{column}\", '$.{entity_slug}')");
    if model.system.is_some() {
        return Ok(MetaOutcome::DdlOnly { deps });
    }
    Ok(MetaOutcome::Rewritten {
        query: schema_update(&model.slug, column, expression),
        deps,
    })
}
