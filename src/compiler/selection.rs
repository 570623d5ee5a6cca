// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The `selecting` and `including` instructions: column lists, joins and
//! the selected-field metadata that later drives result formatting.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::QueryContext;
use crate::error::{CompilerError, ErrorCode, Result};
use crate::helpers::{self, Symbol};
use crate::model::{resolver, FieldType, Model};
use crate::query::{Instructions, Query};
use crate::statement::Params;

/// Metadata of one selected column, in column order. This list is the sole
/// input the result formatter walks to rebuild records.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SelectedField {
    pub slug: String,
    /// Dotted path (with `[0]` / `{n}` markers) the value mounts at.
    pub mounting_path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Excluded fields are fetched for internal bookkeeping but stripped
    /// from the exposed records.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub excluded: bool,
    /// Compile-time value of ephemeral columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mounted_value: Option<Value>,
}

/// The output of selection handling for one query.
#[derive(Debug, Default)]
pub(crate) struct Selection {
    pub columns: Vec<String>,
    pub selected: Vec<SelectedField>,
    pub joins: Vec<String>,
    /// Whether the root table must be wrapped as
    /// `(SELECT * FROM "t" LIMIT 1) AS "sub_t"`.
    pub wrap_root: bool,
}

/// Scans an `including` map for sub-queries that become joins, returning
/// `(has_joins, any_multi_join)`. Used before compilation to decide table
/// aliasing.
pub(crate) fn scan_joins(
    models: &[Model],
    including: Option<&IndexMap<String, Value>>,
) -> (bool, bool) {
    let mut has_joins = false;
    let mut any_multi = false;
    if let Some(including) = including {
        for value in including.values() {
            if let Some(Symbol::Query(document)) = helpers::as_symbol(value) {
                if let Ok(query) = Query::from_document(&document) {
                    match &query {
                        Query::Get { model, .. } => {
                            has_joins = true;
                            if let Ok(joined) = resolver::model_by_slug(models, model) {
                                if joined.slug != *model {
                                    any_multi = true;
                                }
                            }
                        }
                        Query::GetAll { .. } => {}
                        _ => {}
                    }
                }
            }
        }
    }
    (has_joins, any_multi)
}

/// Compiles `selecting` + `including` into columns, joins and metadata.
pub(crate) fn compile_selection(
    ctx: &QueryContext<'_>,
    instructions: &Instructions,
    params: &mut Params,
    is_count: bool,
) -> Result<Selection> {
    let mut selection = Selection::default();
    let mut alias_counts = HashMap::new();

    base_fields(ctx.model, instructions.selecting.as_deref(), "", &mut selection)?;

    if let Some(including) = &instructions.including {
        process_including(ctx, params, including, "", &mut selection, &mut alias_counts)?;
    }

    // Merging rows and computing cursors needs the record id even when the
    // caller did not select it.
    if !is_count
        && instructions.selecting.is_some()
        && (instructions.limited_to.is_some() || !selection.joins.is_empty())
        && !selection
            .selected
            .iter()
            .any(|field| field.mounting_path == "id")
    {
        let resolved = resolver::resolve_field(ctx.model, "id", "selecting")?;
        selection.columns.push(resolved.selector);
        selection.selected.push(SelectedField {
            slug: "id".to_owned(),
            mounting_path: "id".to_owned(),
            field_type: FieldType::String,
            excluded: true,
            mounted_value: None,
        });
    }

    if selection.columns.is_empty() {
        return Err(CompilerError::new(
            ErrorCode::MissingField,
            "The query selects no columns at all.",
        )
        .with_field("selecting"));
    }
    Ok(selection)
}

/// Adds the model's own fields to the selection, honoring `selecting`
/// patterns. `mount_prefix` is empty for the root model and ends with `.`
/// for joined models.
fn base_fields(
    model: &Model,
    selecting: Option<&[String]>,
    mount_prefix: &str,
    selection: &mut Selection,
) -> Result<()> {
    let mut positives: Vec<&str> = Vec::new();
    let mut negatives: Vec<&str> = Vec::new();
    for pattern in selecting.unwrap_or_default() {
        match pattern.strip_prefix('!') {
            Some(stripped) => negatives.push(stripped),
            None => positives.push(pattern.as_str()),
        }
    }

    let mut has_id = false;
    for (slug, field) in &model.fields {
        // Many-cardinality links never materialize as columns.
        if field.is_many_link() {
            continue;
        }
        let positive_match =
            positives.is_empty() || positives.iter().any(|p| helpers::matches_pattern(slug, p));
        if !positive_match {
            continue;
        }
        has_id = has_id || slug == "id";
        let excluded = negatives.iter().any(|p| helpers::matches_pattern(slug, p));
        let resolved = resolver::resolve_field(model, slug, "selecting")?;
        selection.columns.push(resolved.selector);
        selection.selected.push(SelectedField {
            slug: slug.clone(),
            mounting_path: format!("{mount_prefix}{slug}"),
            field_type: field.field_type,
            excluded,
            mounted_value: None,
        });
    }

    // Joined records are collapsed and merged through their id, so joined
    // models always fetch it even when `selecting` leaves it out.
    if !mount_prefix.is_empty() && !has_id {
        let resolved = resolver::resolve_field(model, "id", "selecting")?;
        selection.columns.push(resolved.selector);
        selection.selected.push(SelectedField {
            slug: "id".to_owned(),
            mounting_path: format!("{mount_prefix}id"),
            field_type: FieldType::String,
            excluded: true,
            mounted_value: None,
        });
    }
    Ok(())
}

fn process_including(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    including: &IndexMap<String, Value>,
    mount_prefix: &str,
    selection: &mut Selection,
    alias_counts: &mut HashMap<String, usize>,
) -> Result<()> {
    for (key, value) in including {
        match helpers::as_symbol(value) {
            Some(Symbol::Expression(expression)) => {
                let rendered = resolver::render_expression(
                    &expression,
                    ctx.model,
                    ctx.parent_model,
                    "including",
                )?;
                selection.columns.push(format!("({rendered}) AS \"{key}\""));
                selection.selected.push(SelectedField {
                    slug: key.clone(),
                    mounting_path: format!("{mount_prefix}{key}"),
                    field_type: FieldType::Json,
                    excluded: false,
                    mounted_value: None,
                });
            }
            Some(Symbol::Query(document)) => {
                let query = Query::from_document(&document)?;
                include_sub_query(ctx, params, key, &query, mount_prefix, selection, alias_counts)?;
            }
            None => {
                if value.is_object() || value.is_array() {
                    return Err(CompilerError::new(
                        ErrorCode::InvalidIncludingValue,
                        format!("The `including` value of \"{key}\" must be a scalar, an expression or a sub-query."),
                    )
                    .with_field(key));
                }
                let fragment = params.prepare(value);
                selection.columns.push(format!("{fragment} AS \"{key}\""));
                selection.selected.push(SelectedField {
                    slug: key.clone(),
                    mounting_path: format!("{mount_prefix}{key}"),
                    field_type: value_field_type(value),
                    excluded: false,
                    mounted_value: Some(value.clone()),
                });
            }
        }
    }
    Ok(())
}

fn value_field_type(value: &Value) -> FieldType {
    match value {
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(_) => FieldType::Number,
        _ => FieldType::String,
    }
}

fn include_sub_query(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    key: &str,
    query: &Query,
    mount_prefix: &str,
    selection: &mut Selection,
    alias_counts: &mut HashMap<String, usize>,
) -> Result<()> {
    match query {
        // Correlated counts are inlined as a column, not joined.
        Query::Count { .. } => {
            let sub = super::compile_sub_select(ctx, params, query)?;
            selection.columns.push(format!("({sub}) AS \"{key}\""));
            selection.selected.push(SelectedField {
                slug: key.to_owned(),
                mounting_path: format!("{mount_prefix}{key}"),
                field_type: FieldType::Number,
                excluded: false,
                mounted_value: None,
            });
            Ok(())
        }
        Query::Get {
            model: sub_slug,
            instructions,
        } => {
            let joined = resolver::model_by_slug(ctx.models, sub_slug)?;
            let single = joined.slug == *sub_slug;

            // Sibling joins landing on the same mount path are told apart
            // by a `{n}` suffix, starting from the second join.
            let hoisted = key == helpers::ROOT_MOUNT_KEY;
            let base_key = key.to_owned();
            let count = alias_counts.entry(format!("{mount_prefix}{base_key}")).or_insert(0);
            let mount_key = if *count == 0 {
                base_key
            } else {
                format!("{base_key}{{{count}}}")
            };
            *count += 1;

            let mount_path = if single {
                format!("{mount_prefix}{mount_key}")
            } else {
                format!("{mount_prefix}{mount_key}[0]")
            };
            let alias = format!("including_{mount_path}");

            let mut joined_model = joined.clone();
            joined_model.table_alias = Some(alias.clone());
            let joined_ctx = QueryContext {
                models: ctx.models,
                model: &joined_model,
                parent_model: Some(ctx.model),
                options: ctx.options,
            };

            let on_condition = match &instructions.with {
                Some(with) => super::filters::compile_with(&joined_ctx, params, with)?,
                None => None,
            };
            let join = match on_condition {
                Some(condition) => format!(
                    "LEFT JOIN \"{}\" AS \"{alias}\" ON ({condition})",
                    joined.table()
                ),
                None => format!("CROSS JOIN \"{}\" AS \"{alias}\"", joined.table()),
            };
            selection.joins.push(join);
            if !single {
                selection.wrap_root = true;
            }

            let field_prefix = if hoisted {
                mount_prefix.to_owned()
            } else {
                format!("{mount_path}.")
            };
            base_fields(
                &joined_model,
                instructions.selecting.as_deref(),
                &field_prefix,
                selection,
            )?;

            if let Some(nested) = &instructions.including {
                process_including(
                    &joined_ctx,
                    params,
                    nested,
                    &field_prefix,
                    selection,
                    alias_counts,
                )?;
            }
            Ok(())
        }
        _ => Err(CompilerError::new(
            ErrorCode::InvalidIncludingValue,
            format!("The `including` value of \"{key}\" must be a `get` or `count` query."),
        )
        .with_field(key)),
    }
}
