// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! Orchestration of a query's compilation: instruction handlers are run in
//! a fixed order and their fragments are assembled into one main statement
//! plus ordered dependency statements.

pub(crate) mod filters;
pub(crate) mod mutation;
pub(crate) mod ordering;
pub(crate) mod presets;
pub(crate) mod selection;

use serde_json::Value;

use crate::error::{CompilerError, ErrorCode, Result};
use crate::format::cursor;
use crate::helpers;
use crate::meta::{self, MetaOutcome};
use crate::model::{resolver, Model};
use crate::query::{AllInstructions, Instructions, OrderedBy, Query};
use crate::statement::{Params, Statement};

pub(crate) use selection::SelectedField;

/// Flags steering compilation, taken from the transaction options.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CompileOptions {
    pub inline_params: bool,
    pub inline_defaults: bool,
}

/// Everything an instruction handler needs to know about its surroundings.
pub(crate) struct QueryContext<'a> {
    pub models: &'a [Model],
    pub model: &'a Model,
    pub parent_model: Option<&'a Model>,
    pub options: &'a CompileOptions,
}

/// How the rows of a main statement turn into a formatted result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ResultKind {
    Amount,
    Single,
    Many,
}

/// Formatting metadata recorded next to each compiled main statement.
#[derive(Clone, Debug)]
pub(crate) struct FormatMeta {
    pub model: Model,
    pub selected: Vec<SelectedField>,
    pub kind: ResultKind,
    pub limited_to: Option<u32>,
    /// Whether a `before` cursor flipped the SQL ordering.
    pub backwards: bool,
    /// Whether any cursor was supplied.
    pub cursored: bool,
    pub ordered_by: OrderedBy,
    pub plural_slug: String,
}

/// One compiled main statement with its dependencies and metadata.
#[derive(Clone, Debug)]
pub(crate) struct CompiledOutput {
    pub statement: Statement,
    pub deps: Vec<Statement>,
    pub meta: FormatMeta,
}

/// One input query's compiled form: a single output normally, one per
/// model for expanded `all` queries.
#[derive(Clone, Debug)]
pub(crate) struct CompiledEntry {
    pub outputs: Vec<CompiledOutput>,
    /// Whether the outputs came from an expanded `all` query and group
    /// into one per-model result.
    pub grouped: bool,
}

/// Compiles every query in order, mutating `models` through DDL queries
/// along the way.
pub(crate) fn compile_queries(
    queries: &[Query],
    models: &mut Vec<Model>,
    options: &CompileOptions,
) -> Result<Vec<CompiledEntry>> {
    let mut entries = Vec::with_capacity(queries.len());
    for query in queries {
        let entry = compile_entry(query, models, options).map_err(|error| {
            if error.queries.is_none() {
                error.with_queries(vec![query.to_document()])
            } else {
                error
            }
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn compile_entry(
    query: &Query,
    models: &mut Vec<Model>,
    options: &CompileOptions,
) -> Result<CompiledEntry> {
    let outcome = meta::transform(models, query, options)?;
    let grouped = matches!(query, Query::GetAll { .. } | Query::CountAll { .. });
    let outputs = match outcome {
        MetaOutcome::Plain(Query::GetAll { instructions }) => {
            expand_all(models, options, false, &instructions)?
        }
        MetaOutcome::Plain(Query::CountAll { instructions }) => {
            expand_all(models, options, true, &instructions)?
        }
        MetaOutcome::Plain(effective) => {
            vec![compile_single(models, options, &effective)?]
        }
        MetaOutcome::Rewritten {
            query: effective,
            deps,
        } => {
            let mut output = compile_single(models, options, &effective)?;
            let mut all_deps = deps;
            all_deps.extend(output.deps);
            output.deps = all_deps;
            vec![output]
        }
        MetaOutcome::DdlOnly { mut deps } => {
            // The first dependency is the main statement of the query.
            if deps.is_empty() {
                return Err(CompilerError::new(
                    ErrorCode::InvalidModelValue,
                    "The query produced no statements.",
                ));
            }
            let statement = deps.remove(0);
            for dep in &mut deps {
                dep.after = true;
            }
            let meta = FormatMeta {
                model: Model::default(),
                selected: Vec::new(),
                kind: ResultKind::Single,
                limited_to: None,
                backwards: false,
                cursored: false,
                ordered_by: OrderedBy::default(),
                plural_slug: String::new(),
            };
            vec![CompiledOutput {
                statement,
                deps,
                meta,
            }]
        }
    };
    Ok(CompiledEntry { outputs, grouped })
}

/// Expands a `get`/`count` over the pseudo-model `all` into one compiled
/// query per addressable model.
fn expand_all(
    models: &[Model],
    options: &CompileOptions,
    count: bool,
    all: &AllInstructions,
) -> Result<Vec<CompiledOutput>> {
    let candidates: Vec<String> = match &all.for_model {
        Some(for_slug) => {
            let source = resolver::model_by_slug(models, for_slug).map_err(|error| {
                CompilerError::new(
                    ErrorCode::InvalidForValue,
                    format!("The `for` instruction names an unknown model: {}", error.message),
                )
            })?;
            let mut linked = Vec::new();
            for (_, field) in source.fields.iter() {
                if field.field_type == crate::model::FieldType::Link {
                    if let Some(target) = &field.target {
                        if !linked.contains(target) {
                            linked.push(target.clone());
                        }
                    }
                }
            }
            linked
        }
        None => models
            .iter()
            .filter(|model| model.system.is_none())
            .map(|model| model.slug.clone())
            .collect(),
    };

    let mut outputs = Vec::with_capacity(candidates.len());
    for slug in candidates {
        let model = resolver::model_by_slug(models, &slug)?;
        let plural = model.plural_slug();
        let mut instructions = all.rest.clone();
        if let Some(overrides) = all.on.get(&plural) {
            presets::merge_instructions(&mut instructions, overrides);
        }
        let query = if count {
            Query::Count {
                model: plural,
                instructions,
            }
        } else {
            Query::Get {
                model: plural,
                instructions,
            }
        };
        outputs.push(compile_single(models, options, &query)?);
    }
    Ok(outputs)
}

/// Compiles one plain DML query into its main statement.
pub(crate) fn compile_single(
    models: &[Model],
    options: &CompileOptions,
    query: &Query,
) -> Result<CompiledOutput> {
    match query {
        Query::Get {
            model,
            instructions,
        } => compile_read(models, options, model, instructions.clone(), false),
        Query::Count {
            model,
            instructions,
        } => compile_read(models, options, model, instructions.clone(), true),
        Query::Set {
            model,
            instructions,
        }
        | Query::Add {
            model,
            instructions,
        }
        | Query::Remove {
            model,
            instructions,
        } => compile_write(models, options, query, model, instructions.clone(), true),
        _ => Err(CompilerError::new(
            ErrorCode::MissingInstruction,
            "Only DML queries can be compiled directly.",
        )),
    }
}

/// Replaces the `nameIdentifier` / `slugIdentifier` tokens inside a `with`
/// value with the model's configured identifier fields.
fn format_identifiers(model: &Model, with: &mut Value) {
    fn rewrite(model: &Model, object: &mut serde_json::Map<String, Value>) {
        let identifiers = model.identifiers();
        let keys: Vec<String> = object.keys().cloned().collect();
        for key in keys {
            let replacement = match key.as_str() {
                "nameIdentifier" => identifiers.name.clone(),
                "slugIdentifier" => identifiers.slug.clone(),
                _ => continue,
            };
            if let Some(value) = object.remove(&key) {
                object.insert(replacement, value);
            }
        }
    }
    match with {
        Value::Object(object) => rewrite(model, object),
        Value::Array(groups) => {
            for group in groups {
                if let Value::Object(object) = group {
                    rewrite(model, object);
                }
            }
        }
        _ => {}
    }
}

/// Validates `before`/`after` and decodes the supplied cursor.
fn decode_pagination(
    instructions: &Instructions,
    single: bool,
) -> Result<Option<(Vec<Value>, bool)>> {
    let decode_one = |value: &Value| -> Result<Vec<Value>> {
        let text = value.as_str().ok_or_else(|| {
            CompilerError::new(
                ErrorCode::InvalidBeforeOrAfterInstruction,
                "The `before` and `after` instructions must be cursor strings.",
            )
        })?;
        if text.is_empty() {
            return Err(CompilerError::new(
                ErrorCode::MissingInstruction,
                "The `before` and `after` instructions must not be empty.",
            ));
        }
        cursor::decode(text)
    };

    let (value, backwards) = match (&instructions.before, &instructions.after) {
        (Some(_), Some(_)) => {
            return Err(CompilerError::new(
                ErrorCode::MutuallyExclusiveInstructions,
                "The `before` and `after` instructions cannot be combined.",
            ))
        }
        (None, None) => return Ok(None),
        (Some(before), None) => (before, true),
        (None, Some(after)) => (after, false),
    };
    if single {
        return Err(CompilerError::new(
            ErrorCode::InvalidBeforeOrAfterInstruction,
            "Pagination requires a query addressing multiple records.",
        ));
    }
    Ok(Some((decode_one(value)?, backwards)))
}

/// Appends `ronin.createdAt` to the descending ordering when pagination is
/// active and neither direction references it, keeping cursors stable.
fn ensure_created_at_ordering(instructions: &mut Instructions) {
    let ordered_by = instructions.ordered_by.get_or_insert_with(OrderedBy::default);
    let references = ordered_by
        .ascending
        .iter()
        .chain(ordered_by.descending.iter())
        .any(|entry| entry.as_str() == Some("ronin.createdAt"));
    if !references {
        ordered_by
            .descending
            .push(Value::String("ronin.createdAt".to_owned()));
    }
}

fn prepare_instructions(
    model: &Model,
    instructions: &mut Instructions,
    single: bool,
    is_count: bool,
    is_read: bool,
) -> Result<()> {
    if let Some(with) = &mut instructions.with {
        format_identifiers(model, with);
    }
    presets::apply_using(model, instructions)?;

    if is_count {
        instructions.selecting = Some(vec!["amount".to_owned()]);
        instructions
            .including
            .get_or_insert_with(Default::default)
            .insert("amount".to_owned(), helpers::expression_value("COUNT(*)"));
    }

    let paginating = instructions.limited_to.is_some()
        || instructions.before.is_some()
        || instructions.after.is_some();
    if is_read && paginating && !single {
        ensure_created_at_ordering(instructions);
    }
    Ok(())
}

fn compile_read(
    models: &[Model],
    options: &CompileOptions,
    slug: &str,
    mut instructions: Instructions,
    is_count: bool,
) -> Result<CompiledOutput> {
    let model = resolver::model_by_slug(models, slug)?;
    let single = model.slug == slug;
    let mut model = model.clone();

    prepare_instructions(&model, &mut instructions, single, is_count, true)?;
    let pagination = decode_pagination(&instructions, single)?;

    let mut params = Params::new(options.inline_params);
    let (sql, selection) = build_select(
        models,
        options,
        &mut model,
        single,
        &instructions,
        &mut params,
        None,
        is_count,
        pagination.as_ref(),
    )?;

    let statement = Statement::new(sql, params.take(), true);
    log::debug!("compiled statement: {}", statement.statement);

    let kind = if is_count {
        ResultKind::Amount
    } else if single {
        ResultKind::Single
    } else {
        ResultKind::Many
    };
    let meta = FormatMeta {
        plural_slug: model.plural_slug(),
        selected: selection.selected,
        kind,
        limited_to: instructions.limited_to,
        backwards: pagination.as_ref().map_or(false, |(_, backwards)| *backwards),
        cursored: pagination.is_some(),
        ordered_by: instructions.ordered_by.clone().unwrap_or_default(),
        model,
    };
    Ok(CompiledOutput {
        statement,
        deps: Vec::new(),
        meta,
    })
}

/// Builds a full SELECT for a query, reused by main reads, correlated
/// sub-queries and `with` sub-selects.
#[allow(clippy::too_many_arguments)]
fn build_select(
    models: &[Model],
    options: &CompileOptions,
    model: &mut Model,
    single: bool,
    instructions: &Instructions,
    params: &mut Params,
    parent_model: Option<&Model>,
    is_count: bool,
    pagination: Option<&(Vec<Value>, bool)>,
) -> Result<(String, selection::Selection)> {
    // Joins force table prefixes on every selector, so aliasing is decided
    // before any fragment is built.
    let (has_joins, any_multi) = selection::scan_joins(models, instructions.including.as_ref());
    let wrap_root = has_joins && single && any_multi;
    if has_joins {
        let alias = if wrap_root {
            format!("sub_{}", model.table())
        } else {
            model.table()
        };
        model.table_alias = Some(alias);
    }

    let ctx = QueryContext {
        models,
        model,
        parent_model,
        options,
    };

    let selection = selection::compile_selection(&ctx, instructions, params, is_count)?;

    let mut conditions: Vec<String> = Vec::new();
    if let Some(with) = &instructions.with {
        if let Some(condition) = filters::compile_with(&ctx, params, with)? {
            conditions.push(condition);
        }
    }
    let backwards = pagination.map_or(false, |(_, backwards)| *backwards);
    if let Some((values, backwards)) = pagination {
        let ordered_by = instructions.ordered_by.clone().unwrap_or_default();
        let filter =
            ordering::compile_cursor_filter(&ctx, params, &ordered_by, values, *backwards)?;
        if conditions.is_empty() {
            conditions.push(format!("({filter})"));
        } else {
            let existing = conditions.join(" AND ");
            conditions = vec![format!("({existing}) AND ({filter})")];
        }
    }

    let order_clause = match &instructions.ordered_by {
        Some(ordered_by) => ordering::compile_ordered_by(&ctx, ordered_by, backwards)?,
        None => None,
    };

    let from = if wrap_root {
        format!(
            "(SELECT * FROM \"{}\" LIMIT 1) AS \"sub_{}\"",
            model.table(),
            model.table()
        )
    } else {
        format!("\"{}\"", model.table())
    };

    let mut fragments: Vec<String> = Vec::new();
    fragments.push(format!("SELECT {}", selection.columns.join(", ")));
    fragments.push(format!("FROM {from}"));
    fragments.extend(selection.joins.iter().cloned());
    if !conditions.is_empty() {
        fragments.push(format!("WHERE {}", conditions.join(" AND ")));
    }
    if let Some(order) = order_clause {
        fragments.push(format!("ORDER BY {order}"));
    }
    if !is_count {
        if single {
            fragments.push("LIMIT 1".to_owned());
        } else if let Some(limit) = instructions.limited_to {
            // One lookahead row decides whether another page exists.
            fragments.push(format!("LIMIT {}", limit + 1));
        }
    }

    Ok((fragments.join(" "), selection))
}

/// Compiles a sub-query embedded inside another statement, sharing the
/// outer statement's parameter list.
pub(crate) fn compile_sub_select(
    parent_ctx: &QueryContext<'_>,
    params: &mut Params,
    query: &Query,
) -> Result<String> {
    let (slug, instructions, is_count) = match query {
        Query::Get {
            model,
            instructions,
        } => (model, instructions, false),
        Query::Count {
            model,
            instructions,
        } => (model, instructions, true),
        _ => {
            return Err(CompilerError::new(
                ErrorCode::InvalidWithValue,
                "Only `get` and `count` queries can be nested inside another query.",
            ))
        }
    };
    let model = resolver::model_by_slug(parent_ctx.models, slug)?;
    let single = model.slug == *slug;
    let mut model = model.clone();
    let mut instructions = instructions.clone();
    prepare_instructions(&model, &mut instructions, single, is_count, true)?;

    // Correlated references resolve against the parent with its table
    // spelled out.
    let mut parent = parent_ctx.model.clone();
    if parent.table_alias.is_none() {
        parent.table_alias = Some(parent.table());
    }

    let (sql, _) = build_select(
        parent_ctx.models,
        parent_ctx.options,
        &mut model,
        single,
        &instructions,
        params,
        Some(&parent),
        is_count,
        None,
    )?;
    Ok(sql)
}

/// Compiles a dependency query (association-table maintenance) into its
/// own statement. Dependencies never return rows, so no RETURNING clause
/// is emitted.
pub(crate) fn compile_dependency_statement(
    models: &[Model],
    query: &Query,
    options: &CompileOptions,
) -> Result<Statement> {
    let output = match query {
        Query::Set {
            model,
            instructions,
        }
        | Query::Add {
            model,
            instructions,
        }
        | Query::Remove {
            model,
            instructions,
        } => compile_write(models, options, query, model, instructions.clone(), false)?,
        _ => {
            return Err(CompilerError::new(
                ErrorCode::MissingInstruction,
                "Dependency statements must be write queries.",
            ))
        }
    };
    Ok(output.statement)
}

fn compile_write(
    models: &[Model],
    options: &CompileOptions,
    query: &Query,
    slug: &str,
    mut instructions: Instructions,
    with_returning: bool,
) -> Result<CompiledOutput> {
    let model = resolver::model_by_slug(models, slug)?;
    let single = model.slug == slug;
    let model = model.clone();

    prepare_instructions(&model, &mut instructions, single, false, false)?;

    let mut params = Params::new(options.inline_params);
    let ctx = QueryContext {
        models,
        model: &model,
        parent_model: None,
        options,
    };

    // RETURNING lists plain columns, so joins and inclusions are left out.
    let returning_instructions = Instructions {
        selecting: instructions.selecting.clone(),
        ..Instructions::default()
    };
    let returning_selection =
        selection::compile_selection(&ctx, &returning_instructions, &mut params, false)?;
    let returning_columns = returning_selection.columns.join(", ");
    let returning_selected = returning_selection.selected;

    let mut deps = Vec::new();
    let mut fragments: Vec<String> = Vec::new();

    match query {
        Query::Add { .. } => {
            let to = instructions.to.as_ref().ok_or_else(|| {
                CompilerError::new(
                    ErrorCode::MissingInstruction,
                    "An `add` query requires a `to` instruction.",
                )
            })?;
            let output =
                mutation::compile_to(&ctx, &mut params, mutation::WriteKind::Add, to, None)?;
            deps.extend(output.deps);
            match output.sub_select {
                Some((columns, sub)) => {
                    match columns {
                        Some(columns) => fragments.push(format!(
                            "INSERT INTO \"{}\" ({}) {sub}",
                            model.table(),
                            columns.join(", ")
                        )),
                        None => {
                            fragments.push(format!("INSERT INTO \"{}\" {sub}", model.table()))
                        }
                    };
                }
                None => {
                    let columns: Vec<&str> = output
                        .assignments
                        .iter()
                        .map(|(column, _)| column.as_str())
                        .collect();
                    let values: Vec<&str> = output
                        .assignments
                        .iter()
                        .map(|(_, fragment)| fragment.as_str())
                        .collect();
                    fragments.push(format!(
                        "INSERT INTO \"{}\" ({}) VALUES ({})",
                        model.table(),
                        columns.join(", "),
                        values.join(", ")
                    ));
                }
            }
        }
        Query::Set { .. } => {
            let to = instructions.to.as_ref().ok_or_else(|| {
                CompilerError::new(
                    ErrorCode::MissingInstruction,
                    "A `set` query requires a `to` instruction.",
                )
            })?;
            let output = mutation::compile_to(
                &ctx,
                &mut params,
                mutation::WriteKind::Set,
                to,
                instructions.with.as_ref(),
            )?;
            deps.extend(output.deps);
            let assignments: Vec<String> = output
                .assignments
                .iter()
                .map(|(column, fragment)| format!("{column} = {fragment}"))
                .collect();
            fragments.push(format!(
                "UPDATE \"{}\" SET {}",
                model.table(),
                assignments.join(", ")
            ));
            if let Some(with) = &instructions.with {
                if let Some(condition) = filters::compile_with(&ctx, &mut params, with)? {
                    fragments.push(format!("WHERE {condition}"));
                }
            }
        }
        Query::Remove { .. } => {
            fragments.push(format!("DELETE FROM \"{}\"", model.table()));
            if let Some(with) = &instructions.with {
                if let Some(condition) = filters::compile_with(&ctx, &mut params, with)? {
                    fragments.push(format!("WHERE {condition}"));
                }
            }
        }
        _ => unreachable!("compile_write only receives write queries"),
    }

    if let Some(ordered_by) = &instructions.ordered_by {
        if let Some(order) = ordering::compile_ordered_by(&ctx, ordered_by, false)? {
            fragments.push(format!("ORDER BY {order}"));
        }
    }
    if let Some(limit) = instructions.limited_to {
        fragments.push(format!("LIMIT {limit}"));
    }
    if with_returning {
        fragments.push(format!("RETURNING {returning_columns}"));
    }

    let statement = Statement::new(fragments.join(" "), params.take(), with_returning);
    log::debug!("compiled statement: {}", statement.statement);

    let meta = FormatMeta {
        plural_slug: model.plural_slug(),
        selected: returning_selected,
        kind: if single || query.as_add().is_some() {
            ResultKind::Single
        } else {
            ResultKind::Many
        },
        limited_to: None,
        backwards: false,
        cursored: false,
        ordered_by: OrderedBy::default(),
        model,
    };
    Ok(CompiledOutput {
        statement,
        deps,
        meta,
    })
}
