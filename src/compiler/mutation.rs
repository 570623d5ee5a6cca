// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The `to` instruction: values of `add` and `set` queries, including the
//! dependency statements that maintain association tables behind
//! many-cardinality link fields.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use super::QueryContext;
use crate::error::{CompilerError, ErrorCode, Result};
use crate::helpers::{self, Symbol};
use crate::model::{resolver, system, FieldType};
use crate::query::{Instructions, Query};
use crate::statement::{Params, Statement};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteKind {
    Add,
    Set,
}

/// The compiled `to` instruction.
#[derive(Debug, Default)]
pub(crate) struct ToOutput {
    /// `(column, fragment)` pairs in instruction order.
    pub assignments: Vec<(String, String)>,
    /// For `add` fed from a sub-query: optional explicit columns plus the
    /// sub-SELECT.
    pub sub_select: Option<(Option<Vec<String>>, String)>,
    /// Association-table statements; they always run after the main one.
    pub deps: Vec<Statement>,
}

fn invalid_to(message: impl Into<String>) -> CompilerError {
    CompilerError::new(ErrorCode::InvalidToValue, message)
}

pub(crate) fn compile_to(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    kind: WriteKind,
    to: &Value,
    parent_with: Option<&Value>,
) -> Result<ToOutput> {
    let mut output = ToOutput::default();

    if let Some(Symbol::Query(document)) = helpers::as_symbol(to) {
        let query = Query::from_document(&document)?;
        let columns = match &query {
            Query::Get { instructions, .. } => instructions
                .selecting
                .as_ref()
                .map(|selecting| selecting.iter().map(|slug| format!("\"{slug}\"")).collect()),
            _ => None,
        };
        let sub = super::compile_sub_select(ctx, params, &query)?;
        output.sub_select = Some((columns, sub));
        return Ok(output);
    }

    let object = to
        .as_object()
        .ok_or_else(|| invalid_to("The `to` instruction must be an object."))?;
    if object.is_empty() {
        return Err(invalid_to("The `to` instruction must not be empty."));
    }

    let mut flat = IndexMap::new();
    flatten_into(ctx, "", object, &mut flat)?;
    inject_defaults(ctx, kind, &mut flat);

    for (path, value) in &flat {
        let resolved = resolver::resolve_field_for_write(ctx.model, path, "to")?;
        if resolved.field.is_many_link() {
            link_dependencies(ctx, kind, path, value, parent_with, &flat, &mut output.deps)?;
            continue;
        }
        let fragment = match helpers::as_symbol(value) {
            Some(Symbol::Expression(expression)) => {
                resolver::render_expression(&expression, ctx.model, ctx.parent_model, "to")?
            }
            Some(Symbol::Query(document)) => {
                let query = Query::from_document(&document)?;
                let sub = super::compile_sub_select(ctx, params, &query)?;
                format!("({sub})")
            }
            None => {
                let value = match resolved.field.field_type {
                    FieldType::Link => link_target_id(path, value)?,
                    _ => value.clone(),
                };
                params.prepare(&value)
            }
        };
        output.assignments.push((resolved.selector, fragment));
    }

    if output.assignments.is_empty() && output.deps.is_empty() {
        return Err(invalid_to("The `to` instruction produced no values."));
    }
    Ok(output)
}

/// A one-cardinality link stores the target record's id.
fn link_target_id(path: &str, value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => map.get("id").cloned().ok_or_else(|| {
            invalid_to(format!("The linked record under \"{path}\" must carry an `id`."))
        }),
        _ => Ok(value.clone()),
    }
}

/// Flattens nested objects into dotted field paths, stopping at marker
/// objects and at values owned by a single field (JSON columns, links).
fn flatten_into(
    ctx: &QueryContext<'_>,
    prefix: &str,
    object: &Map<String, Value>,
    out: &mut IndexMap<String, Value>,
) -> Result<()> {
    for (key, value) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let descend = value.is_object()
            && helpers::as_symbol(value).is_none()
            && resolver::resolve_field_for_write(ctx.model, &path, "to").is_err();
        if descend {
            flatten_into(ctx, &path, value.as_object().unwrap(), out)?;
        } else {
            out.insert(path, value.clone());
        }
    }
    Ok(())
}

/// Injects the default fields of `add`/`set` queries.
fn inject_defaults(ctx: &QueryContext<'_>, kind: WriteKind, flat: &mut IndexMap<String, Value>) {
    let timestamp = || {
        if ctx.options.inline_defaults {
            Value::String(helpers::current_timestamp())
        } else {
            helpers::expression_value(system::TIMESTAMP_DEFAULT_EXPRESSION)
        }
    };
    match kind {
        WriteKind::Add => {
            let needs_id = ctx.options.inline_defaults
                || flat
                    .iter()
                    .any(|(path, _)| {
                        ctx.model
                            .fields
                            .get(path.as_str())
                            .map_or(false, |field| field.is_many_link())
                    });
            if needs_id && !flat.contains_key("id") {
                flat.insert(
                    "id".to_owned(),
                    Value::String(helpers::generate_record_id(&ctx.model.id_prefix())),
                );
            }
            if !flat.contains_key("ronin.createdAt") {
                flat.insert("ronin.createdAt".to_owned(), timestamp());
            }
            if !flat.contains_key("ronin.updatedAt") {
                flat.insert("ronin.updatedAt".to_owned(), timestamp());
            }
        }
        WriteKind::Set => {
            if !flat.contains_key("ronin.updatedAt") {
                flat.insert("ronin.updatedAt".to_owned(), timestamp());
            }
        }
    }
}

/// Emits the `add`/`remove` queries over the association model that a
/// many-cardinality link value stands for.
#[allow(clippy::too_many_arguments)]
fn link_dependencies(
    ctx: &QueryContext<'_>,
    kind: WriteKind,
    field_slug: &str,
    value: &Value,
    parent_with: Option<&Value>,
    flat: &IndexMap<String, Value>,
    deps: &mut Vec<Statement>,
) -> Result<()> {
    let association_slug = system::association_slug(&ctx.model.slug, field_slug);
    let association = resolver::model_by_slug(ctx.models, &association_slug)?;

    // On `set`, the owning records are addressed by the outer filter; on
    // `add`, the freshly inserted record id is known up front.
    let source: Value = match kind {
        WriteKind::Set => {
            let mut get_instructions = Map::new();
            if let Some(with) = parent_with {
                get_instructions.insert("with".to_owned(), with.clone());
            }
            get_instructions.insert("selecting".to_owned(), json!(["id"]));
            let mut get = Map::new();
            get.insert(ctx.model.slug.clone(), Value::Object(get_instructions));
            let mut query = Map::new();
            query.insert("get".to_owned(), Value::Object(get));
            let mut symbol = Map::new();
            symbol.insert(helpers::QUERY_SYMBOL.to_owned(), Value::Object(query));
            Value::Object(symbol)
        }
        WriteKind::Add => flat.get("id").cloned().ok_or_else(|| {
            invalid_to(format!(
                "Values for the many-cardinality link \"{field_slug}\" require a record id."
            ))
        })?,
    };

    let target_id = |item: &Value| link_target_id(field_slug, item);

    let add_target = |deps: &mut Vec<Statement>, item: &Value| -> Result<()> {
        let query = Query::Add {
            model: association.slug.clone(),
            instructions: Instructions {
                to: Some(json!({ "source": source.clone(), "target": target_id(item)? })),
                ..Instructions::default()
            },
        };
        deps.push(dependency(ctx, &query)?);
        Ok(())
    };
    let remove_target = |deps: &mut Vec<Statement>, item: Option<&Value>| -> Result<()> {
        let mut with = Map::new();
        with.insert("source".to_owned(), source.clone());
        if let Some(item) = item {
            with.insert("target".to_owned(), target_id(item)?);
        }
        let query = Query::Remove {
            model: association.plural_slug(),
            instructions: Instructions {
                with: Some(Value::Object(with)),
                ..Instructions::default()
            },
        };
        deps.push(dependency(ctx, &query)?);
        Ok(())
    };

    match value {
        Value::Array(items) => {
            // A plain array replaces the whole association set.
            if kind == WriteKind::Set {
                remove_target(deps, None)?;
            }
            for item in items {
                add_target(deps, item)?;
            }
        }
        Value::Object(map) => {
            for (key, entries) in map {
                let entries = entries
                    .as_array()
                    .ok_or_else(|| invalid_to(format!("\"{field_slug}.{key}\" must be an array.")))?;
                match key.as_str() {
                    "containing" => {
                        for item in entries {
                            add_target(deps, item)?;
                        }
                    }
                    "notContaining" => {
                        for item in entries {
                            remove_target(deps, Some(item))?;
                        }
                    }
                    other => {
                        return Err(invalid_to(format!(
                            "Unknown many-cardinality link operator `{other}`."
                        )));
                    }
                }
            }
        }
        _ => {
            return Err(invalid_to(format!(
                "Values for the many-cardinality link \"{field_slug}\" must be an array or an object."
            )));
        }
    }
    Ok(())
}

/// Compiles a dependency query into a standalone statement with its own
/// parameter list, ordered after the main statement.
fn dependency(ctx: &QueryContext<'_>, query: &Query) -> Result<Statement> {
    let mut statement = super::compile_dependency_statement(ctx.models, query, ctx.options)?;
    statement.after = true;
    statement.returning = false;
    Ok(statement)
}
