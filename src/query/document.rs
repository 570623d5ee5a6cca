// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! Conversion between the JSON document form of queries and [`Query`].

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use super::{AllInstructions, AlterAction, EntityKind, Instructions, ModelEntity, Query};
use crate::error::{CompilerError, ErrorCode, Result};
use crate::model::{Field, Index, Model, Preset};

const ALL_SLUG: &str = "all";

fn malformed(message: impl Into<String>) -> CompilerError {
    CompilerError::new(ErrorCode::MissingInstruction, message)
}

fn single_entry(document: &Value, context: &str) -> Result<(String, Value)> {
    let object = document
        .as_object()
        .filter(|object| object.len() == 1)
        .ok_or_else(|| malformed(format!("A query must be an object with exactly one {context}.")))?;
    let (key, value) = object.iter().next().unwrap();
    Ok((key.clone(), value.clone()))
}

fn parse_instructions(value: &Value) -> Result<Instructions> {
    match value {
        Value::Null => Ok(Instructions::default()),
        Value::Object(_) => serde_json::from_value(value.clone())
            .map_err(|err| malformed(format!("Invalid query instructions: {err}."))),
        _ => Err(malformed("Query instructions must be an object or `null`.")),
    }
}

fn parse_all_instructions(value: &Value) -> Result<AllInstructions> {
    let mut all = AllInstructions::default();
    let Value::Object(object) = value else {
        if value.is_null() {
            return Ok(all);
        }
        return Err(malformed("Query instructions must be an object or `null`."));
    };
    let mut rest = Map::new();
    for (key, entry) in object {
        match key.as_str() {
            "for" => {
                let slug = entry.as_str().ok_or_else(|| {
                    CompilerError::new(
                        ErrorCode::InvalidForValue,
                        "The `for` instruction must name a model slug.",
                    )
                })?;
                all.for_model = Some(slug.to_owned());
            }
            "on" => {
                let overrides = entry.as_object().ok_or_else(|| {
                    malformed("The `on` instruction must map plural model slugs to instructions.")
                })?;
                for (plural_slug, instructions) in overrides {
                    all.on
                        .insert(plural_slug.clone(), parse_instructions(instructions)?);
                }
            }
            _ => {
                rest.insert(key.clone(), entry.clone());
            }
        }
    }
    all.rest = parse_instructions(&Value::Object(rest))?;
    Ok(all)
}

fn parse_entity_def(kind: EntityKind, def: &Value) -> Result<ModelEntity> {
    let mut object = def
        .as_object()
        .cloned()
        .ok_or_else(|| malformed(format!("A `{}` definition must be an object.", kind.key())))?;
    let slug = object
        .remove("slug")
        .and_then(|slug| slug.as_str().map(str::to_owned))
        .ok_or_else(|| {
            malformed(format!("A `{}` definition must carry a `slug`.", kind.key()))
        })?;
    let rest = Value::Object(object);
    let invalid = |err: serde_json::Error| {
        CompilerError::new(
            ErrorCode::InvalidModelValue,
            format!("Invalid `{}` definition: {err}.", kind.key()),
        )
        .with_field(kind.column())
    };
    Ok(match kind {
        EntityKind::Field => ModelEntity::Field {
            slug,
            field: serde_json::from_value::<Field>(rest).map_err(invalid)?,
        },
        EntityKind::Index => ModelEntity::Index {
            slug,
            index: serde_json::from_value::<Index>(rest).map_err(invalid)?,
        },
        EntityKind::Preset => ModelEntity::Preset {
            slug,
            preset: serde_json::from_value::<Preset>(rest).map_err(invalid)?,
        },
    })
}

fn entity_kind(key: &str) -> Option<EntityKind> {
    match key {
        "field" => Some(EntityKind::Field),
        "index" => Some(EntityKind::Index),
        "preset" => Some(EntityKind::Preset),
        _ => None,
    }
}

fn parse_alter(value: &Value) -> Result<Query> {
    let object = value
        .as_object()
        .ok_or_else(|| malformed("An `alter` query must be an object."))?;
    let model = object
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("An `alter` query must name a model slug under `model`."))?
        .to_owned();

    if let Some(patch) = object.get("to") {
        return Ok(Query::Alter {
            model,
            action: AlterAction::To {
                patch: patch.clone(),
            },
        });
    }
    if let Some(create) = object.get("create") {
        let (key, def) = single_entry(create, "entity kind")?;
        let kind = entity_kind(&key)
            .ok_or_else(|| malformed(format!("Unknown model entity kind `{key}`.")))?;
        return Ok(Query::Alter {
            model,
            action: AlterAction::Create {
                entity: parse_entity_def(kind, &def)?,
            },
        });
    }
    if let Some(alter) = object.get("alter") {
        let entry = alter
            .as_object()
            .ok_or_else(|| malformed("A nested `alter` must be an object."))?;
        let to = entry
            .get("to")
            .cloned()
            .ok_or_else(|| malformed("A nested `alter` must carry a `to` patch."))?;
        for (key, slug) in entry {
            if let Some(kind) = entity_kind(key) {
                let slug = slug
                    .as_str()
                    .ok_or_else(|| malformed("Entity slugs must be strings."))?;
                return Ok(Query::Alter {
                    model,
                    action: AlterAction::Alter {
                        kind,
                        slug: slug.to_owned(),
                        to,
                    },
                });
            }
        }
        return Err(malformed("A nested `alter` must name a field, index or preset."));
    }
    if let Some(drop) = object.get("drop") {
        let (key, slug) = single_entry(drop, "entity kind")?;
        let kind = entity_kind(&key)
            .ok_or_else(|| malformed(format!("Unknown model entity kind `{key}`.")))?;
        let slug = slug
            .as_str()
            .ok_or_else(|| malformed("Entity slugs must be strings."))?;
        return Ok(Query::Alter {
            model,
            action: AlterAction::Drop {
                kind,
                slug: slug.to_owned(),
            },
        });
    }
    Err(malformed("An `alter` query must carry `to`, `create`, `alter` or `drop`."))
}

impl Query {
    /// Parses a query from its document form.
    pub fn from_document(document: &Value) -> Result<Query> {
        let (query_type, body) = single_entry(document, "query type")?;
        match query_type.as_str() {
            "get" | "count" => {
                let (slug, instructions) = single_entry(&body, "model slug")?;
                if slug == ALL_SLUG {
                    let instructions = parse_all_instructions(&instructions)?;
                    Ok(match query_type.as_str() {
                        "get" => Query::GetAll { instructions },
                        _ => Query::CountAll { instructions },
                    })
                } else {
                    let instructions = parse_instructions(&instructions)?;
                    Ok(match query_type.as_str() {
                        "get" => Query::Get {
                            model: slug,
                            instructions,
                        },
                        _ => Query::Count {
                            model: slug,
                            instructions,
                        },
                    })
                }
            }
            "set" | "add" | "remove" => {
                let (slug, instructions) = single_entry(&body, "model slug")?;
                let instructions = parse_instructions(&instructions)?;
                Ok(match query_type.as_str() {
                    "set" => Query::Set {
                        model: slug,
                        instructions,
                    },
                    "add" => Query::Add {
                        model: slug,
                        instructions,
                    },
                    _ => Query::Remove {
                        model: slug,
                        instructions,
                    },
                })
            }
            "create" => {
                let (key, def) = single_entry(&body, "target")?;
                if key != "model" {
                    return Err(malformed("A `create` query must carry a `model` definition."));
                }
                let model: Model = serde_json::from_value(def).map_err(|err| {
                    CompilerError::new(
                        ErrorCode::InvalidModelValue,
                        format!("Invalid model definition: {err}."),
                    )
                })?;
                Ok(Query::Create { model })
            }
            "alter" => parse_alter(&body),
            "drop" => {
                let (key, slug) = single_entry(&body, "target")?;
                if key != "model" {
                    return Err(malformed("A `drop` query must name a model slug under `model`."));
                }
                let slug = slug
                    .as_str()
                    .ok_or_else(|| malformed("Model slugs must be strings."))?;
                Ok(Query::Drop {
                    model: slug.to_owned(),
                })
            }
            "list" => {
                let (key, value) = single_entry(&body, "target")?;
                match key.as_str() {
                    "models" => Ok(Query::ListModels),
                    "model" => {
                        let slug = value
                            .as_str()
                            .ok_or_else(|| malformed("Model slugs must be strings."))?;
                        Ok(Query::ListModel {
                            model: slug.to_owned(),
                        })
                    }
                    other => Err(malformed(format!("Unknown `list` target `{other}`."))),
                }
            }
            other => Err(malformed(format!("Unknown query type `{other}`."))),
        }
    }

    /// Renders the query back into its document form.
    pub fn to_document(&self) -> Value {
        fn keyed(query_type: &str, key: &str, value: Value) -> Value {
            let mut inner = Map::new();
            inner.insert(key.to_owned(), value);
            let mut outer = Map::new();
            outer.insert(query_type.to_owned(), Value::Object(inner));
            Value::Object(outer)
        }
        fn instructions_value(instructions: &Instructions) -> Value {
            serde_json::to_value(instructions).unwrap_or(Value::Null)
        }
        fn all_instructions_value(all: &AllInstructions) -> Value {
            let mut object = match instructions_value(&all.rest) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            if let Some(for_model) = &all.for_model {
                object.insert("for".to_owned(), json!(for_model));
            }
            if !all.on.is_empty() {
                let on: IndexMap<&String, Value> = all
                    .on
                    .iter()
                    .map(|(slug, instructions)| (slug, instructions_value(instructions)))
                    .collect();
                object.insert("on".to_owned(), serde_json::to_value(on).unwrap_or(Value::Null));
            }
            Value::Object(object)
        }
        fn entity_def(entity: &ModelEntity) -> Value {
            let (slug, mut def) = match entity {
                ModelEntity::Field { slug, field } => {
                    (slug, serde_json::to_value(field).unwrap_or(Value::Null))
                }
                ModelEntity::Index { slug, index } => {
                    (slug, serde_json::to_value(index).unwrap_or(Value::Null))
                }
                ModelEntity::Preset { slug, preset } => {
                    (slug, serde_json::to_value(preset).unwrap_or(Value::Null))
                }
            };
            if let Some(map) = def.as_object_mut() {
                map.insert("slug".to_owned(), json!(slug));
            }
            def
        }

        match self {
            Query::Get {
                model,
                instructions,
            } => keyed("get", model, instructions_value(instructions)),
            Query::GetAll { instructions } => {
                keyed("get", "all", all_instructions_value(instructions))
            }
            Query::Count {
                model,
                instructions,
            } => keyed("count", model, instructions_value(instructions)),
            Query::CountAll { instructions } => {
                keyed("count", "all", all_instructions_value(instructions))
            }
            Query::Set {
                model,
                instructions,
            } => keyed("set", model, instructions_value(instructions)),
            Query::Add {
                model,
                instructions,
            } => keyed("add", model, instructions_value(instructions)),
            Query::Remove {
                model,
                instructions,
            } => keyed("remove", model, instructions_value(instructions)),
            Query::Create { model } => keyed(
                "create",
                "model",
                serde_json::to_value(model).unwrap_or(Value::Null),
            ),
            Query::Alter { model, action } => {
                let mut body = Map::new();
                body.insert("model".to_owned(), json!(model));
                match action {
                    AlterAction::To { patch } => {
                        body.insert("to".to_owned(), patch.clone());
                    }
                    AlterAction::Create { entity } => {
                        let mut create = Map::new();
                        create.insert(entity.kind().key().to_owned(), entity_def(entity));
                        body.insert("create".to_owned(), Value::Object(create));
                    }
                    AlterAction::Alter { kind, slug, to } => {
                        let mut alter = Map::new();
                        alter.insert(kind.key().to_owned(), json!(slug));
                        alter.insert("to".to_owned(), to.clone());
                        body.insert("alter".to_owned(), Value::Object(alter));
                    }
                    AlterAction::Drop { kind, slug } => {
                        let mut drop = Map::new();
                        drop.insert(kind.key().to_owned(), json!(slug));
                        body.insert("drop".to_owned(), Value::Object(drop));
                    }
                }
                json!({ "alter": body })
            }
            Query::Drop { model } => json!({ "drop": { "model": model } }),
            Query::ListModels => json!({ "list": { "models": null } }),
            Query::ListModel { model } => json!({ "list": { "model": model } }),
        }
    }
}
