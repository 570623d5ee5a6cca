// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! Rendering of native DDL statements. Identifiers are spliced directly
//! (slugs are sanitized), values are inlined since SQLite does not accept
//! parameters in DDL.

use serde_json::Value;

use crate::error::{CompilerError, ErrorCode, Result};
use crate::helpers::{self, Symbol};
use crate::model::{
    resolver, ComputedKind, Field, FieldType, Index, IndexField, IndexOrder, LinkKind, Model,
};
use crate::statement::{Params, Statement};

fn ddl(statement: String) -> Statement {
    log::debug!("emitting DDL: {statement}");
    Statement::new(statement, Vec::new(), false)
}

fn column_type(field: &Field) -> &'static str {
    match field.field_type {
        FieldType::String => "TEXT",
        FieldType::Number => "INTEGER",
        FieldType::Boolean => "BOOLEAN",
        FieldType::Date => "DATETIME",
        FieldType::Json => "TEXT",
        FieldType::Blob => "BLOB",
        FieldType::Link => "TEXT",
    }
}

fn literal(value: &Value) -> String {
    let mut params = Params::inline();
    params.prepare(value)
}

fn expression_text(value: &Value, context: &str) -> Result<String> {
    match helpers::as_symbol(value) {
        Some(Symbol::Expression(expression)) => Ok(expression),
        _ => match value.as_str() {
            Some(text) => Ok(text.to_owned()),
            None => Err(CompilerError::new(
                ErrorCode::InvalidModelValue,
                format!("The {context} must be an expression."),
            )),
        },
    }
}

/// Renders one column definition. `models` may include the model under
/// construction so that self-referencing links resolve.
pub(crate) fn column_definition(
    models: &[Model],
    model: &Model,
    slug: &str,
    field: &Field,
) -> Result<String> {
    let slug = helpers::sanitize_identifier(slug);
    let mut parts: Vec<String> = vec![format!("\"{slug}\"")];

    if field.increment && field.field_type == FieldType::Number {
        parts.push("INTEGER PRIMARY KEY AUTOINCREMENT".to_owned());
    } else {
        parts.push(column_type(field).to_owned());
        if slug == "id" {
            parts.push("PRIMARY KEY".to_owned());
        }
    }
    if field.required {
        parts.push("NOT NULL".to_owned());
    }
    if field.unique {
        parts.push("UNIQUE".to_owned());
    }
    if let Some(default) = &field.default_value {
        match helpers::as_symbol(default) {
            Some(Symbol::Expression(expression)) => {
                parts.push(format!("DEFAULT ({expression})"));
            }
            _ => parts.push(format!("DEFAULT {}", literal(default))),
        }
    }
    if let Some(collation) = field.collation {
        parts.push(format!("COLLATE {}", collation.as_sql()));
    }
    if let Some(check) = &field.check {
        let expression = expression_text(check, "`check` constraint")?;
        let rendered = resolver::render_expression(&expression, model, None, "check")?;
        parts.push(format!("CHECK ({rendered})"));
    }
    if let Some(computed) = &field.computed_as {
        let expression = expression_text(&computed.value, "`computedAs` expression")?;
        let rendered = resolver::render_expression(&expression, model, None, "computedAs")?;
        let mode = match computed.kind {
            ComputedKind::Stored => "STORED",
            ComputedKind::Virtual => "VIRTUAL",
        };
        parts.push(format!("GENERATED ALWAYS AS ({rendered}) {mode}"));
    }
    if field.field_type == FieldType::Link && field.kind != Some(LinkKind::Many) {
        let target_slug = field.target.as_deref().ok_or_else(|| {
            CompilerError::new(
                ErrorCode::InvalidModelValue,
                format!("Link field \"{slug}\" does not name a target model."),
            )
            .with_field("fields")
        })?;
        // A link may target the model currently being defined.
        let target_table = if target_slug == model.slug {
            model.table()
        } else {
            resolver::model_by_slug(models, target_slug)?.table()
        };
        let mut clause = format!("REFERENCES \"{target_table}\" (\"id\")");
        if let Some(actions) = &field.actions {
            if let Some(action) = actions.on_delete {
                clause.push_str(&format!(" ON DELETE {}", action.as_sql()));
            }
            if let Some(action) = actions.on_update {
                clause.push_str(&format!(" ON UPDATE {}", action.as_sql()));
            }
        }
        parts.push(clause);
    }
    Ok(parts.join(" "))
}

/// `CREATE TABLE` for a model; many-cardinality links are skipped since
/// they live in their association tables.
pub(crate) fn create_table(models: &[Model], model: &Model) -> Result<Statement> {
    let mut columns = Vec::with_capacity(model.fields.len());
    for (slug, field) in &model.fields {
        if field.is_many_link() {
            continue;
        }
        columns.push(column_definition(models, model, slug, field)?);
    }
    Ok(ddl(format!(
        "CREATE TABLE \"{}\" ({})",
        model.table(),
        columns.join(", ")
    )))
}

pub(crate) fn drop_table(model: &Model) -> Statement {
    ddl(format!("DROP TABLE \"{}\"", model.table()))
}

pub(crate) fn rename_table(old_table: &str, new_table: &str) -> Statement {
    ddl(format!(
        "ALTER TABLE \"{old_table}\" RENAME TO \"{new_table}\""
    ))
}

pub(crate) fn add_column(
    models: &[Model],
    model: &Model,
    slug: &str,
    field: &Field,
) -> Result<Statement> {
    let definition = column_definition(models, model, slug, field)?;
    Ok(ddl(format!(
        "ALTER TABLE \"{}\" ADD COLUMN {definition}",
        model.table()
    )))
}

pub(crate) fn drop_column(model: &Model, slug: &str) -> Statement {
    ddl(format!(
        "ALTER TABLE \"{}\" DROP COLUMN \"{}\"",
        model.table(),
        helpers::sanitize_identifier(slug)
    ))
}

pub(crate) fn rename_column(model: &Model, old_slug: &str, new_slug: &str) -> Statement {
    ddl(format!(
        "ALTER TABLE \"{}\" RENAME COLUMN \"{}\" TO \"{}\"",
        model.table(),
        helpers::sanitize_identifier(old_slug),
        helpers::sanitize_identifier(new_slug)
    ))
}

/// The physical name of an index.
pub(crate) fn index_name(slug: &str) -> String {
    helpers::sanitize_identifier(&helpers::to_snake_case(slug))
}

pub(crate) fn create_index(
    ctx_models: &[Model],
    model: &Model,
    slug: &str,
    index: &Index,
) -> Result<Statement> {
    if index.fields.is_empty() {
        return Err(CompilerError::new(
            ErrorCode::InvalidModelValue,
            format!("Index \"{slug}\" must cover at least one field."),
        )
        .with_field("indexes"));
    }
    let mut entries = Vec::with_capacity(index.fields.len());
    for entry in &index.fields {
        entries.push(match entry {
            IndexField::Slug {
                slug,
                order,
                collation,
            } => {
                let resolved = resolver::resolve_field(model, slug, "indexes")?;
                let mut rendered = resolved.selector;
                if let Some(collation) = collation {
                    rendered.push_str(&format!(" COLLATE {}", collation.as_sql()));
                }
                append_order(&mut rendered, *order);
                rendered
            }
            IndexField::Expression { expression, order } => {
                let rendered =
                    resolver::render_expression(expression, model, None, "indexes")?;
                let mut rendered = format!("({rendered})");
                append_order(&mut rendered, *order);
                rendered
            }
        });
    }

    let unique = if index.unique { "UNIQUE " } else { "" };
    let mut statement = format!(
        "CREATE {unique}INDEX \"{}\" ON \"{}\" ({})",
        index_name(slug),
        model.table(),
        entries.join(", ")
    );
    if let Some(filter) = &index.filter {
        // Partial indexes cannot use bound parameters.
        let options = crate::compiler::CompileOptions {
            inline_params: true,
            inline_defaults: false,
        };
        let ctx = crate::compiler::QueryContext {
            models: ctx_models,
            model,
            parent_model: None,
            options: &options,
        };
        let mut params = Params::inline();
        if let Some(condition) =
            crate::compiler::filters::compile_with(&ctx, &mut params, filter)?
        {
            statement.push_str(&format!(" WHERE {condition}"));
        }
    }
    Ok(ddl(statement))
}

fn append_order(rendered: &mut String, order: Option<IndexOrder>) {
    match order {
        Some(IndexOrder::Ascending) => rendered.push_str(" ASC"),
        Some(IndexOrder::Descending) => rendered.push_str(" DESC"),
        None => {}
    }
}

pub(crate) fn drop_index(slug: &str) -> Statement {
    ddl(format!("DROP INDEX \"{}\"", index_name(slug)))
}
