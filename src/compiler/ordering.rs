// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The `orderedBy` instruction.

use serde_json::Value;

use super::QueryContext;
use crate::error::{CompilerError, ErrorCode, Result};
use crate::helpers::{self, Symbol};
use crate::model::{resolver, Collation, FieldType};
use crate::query::OrderedBy;
use crate::statement::Params;

/// Compiles `orderedBy` into the body of an ORDER BY clause. `flip`
/// inverts every direction, which backward pagination relies on.
pub(crate) fn compile_ordered_by(
    ctx: &QueryContext<'_>,
    ordered_by: &OrderedBy,
    flip: bool,
) -> Result<Option<String>> {
    let mut items = Vec::with_capacity(ordered_by.ascending.len() + ordered_by.descending.len());
    for (entries, ascending) in [(&ordered_by.ascending, true), (&ordered_by.descending, false)] {
        for entry in entries {
            let ascending = ascending != flip;
            let direction = if ascending { "ASC" } else { "DESC" };
            items.push(match order_selector(ctx, entry)? {
                // Expressions are ordered without a collation.
                (selector, false) => format!("({selector}) {direction}"),
                (selector, true) => format!("{selector} {direction}"),
            });
        }
    }
    if items.is_empty() {
        Ok(None)
    } else {
        Ok(Some(items.join(", ")))
    }
}

/// Resolves one `orderedBy` entry into its selector (with collation for
/// string fields). The boolean marks field entries as opposed to raw
/// expressions.
fn order_selector(ctx: &QueryContext<'_>, entry: &Value) -> Result<(String, bool)> {
    if let Some(Symbol::Expression(expression)) = helpers::as_symbol(entry) {
        let rendered =
            resolver::render_expression(&expression, ctx.model, ctx.parent_model, "orderedBy")?;
        return Ok((rendered, false));
    }
    let slug = entry.as_str().ok_or_else(|| {
        CompilerError::new(
            ErrorCode::InvalidModelValue,
            "`orderedBy` entries must be field slugs or expressions.",
        )
    })?;
    let resolved = resolver::resolve_field(ctx.model, slug, "orderedBy")?;
    let mut selector = resolved.selector;
    if resolved.field.field_type == FieldType::String {
        let collation = resolved.field.collation.unwrap_or(Collation::NoCase);
        selector.push_str(" COLLATE ");
        selector.push_str(collation.as_sql());
    }
    Ok((selector, true))
}

/// The ordered list of field slugs a pagination cursor encodes, ascending
/// entries first, mirroring [`compile_ordered_by`]. Expression entries do
/// not participate in cursors.
pub(crate) fn cursor_fields(ordered_by: &OrderedBy) -> Vec<(String, bool)> {
    let mut fields = Vec::new();
    for (entries, ascending) in [(&ordered_by.ascending, true), (&ordered_by.descending, false)] {
        for entry in entries {
            if let Some(slug) = entry.as_str() {
                fields.push((slug.to_owned(), ascending));
            }
        }
    }
    fields
}

/// Compiles a decoded cursor into a keyset filter. `values` carries one
/// value per ordered field plus the record id; `backwards` mirrors every
/// comparison.
pub(crate) fn compile_cursor_filter(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    ordered_by: &OrderedBy,
    values: &[Value],
    backwards: bool,
) -> Result<String> {
    let fields = cursor_fields(ordered_by);
    if values.len() != fields.len() + 1 {
        return Err(CompilerError::new(
            ErrorCode::InvalidBeforeOrAfterInstruction,
            format!(
                "The cursor carries {} values but the query orders by {} fields.",
                values.len(),
                fields.len()
            ),
        ));
    }

    let mut axes = Vec::with_capacity(values.len());
    for ((slug, ascending), value) in fields.iter().zip(values) {
        let resolved = resolver::resolve_field(ctx.model, slug, "before/after")?;
        axes.push((resolved.selector, *ascending, value));
    }
    let id = resolver::resolve_field(ctx.model, "id", "before/after")?;
    axes.push((id.selector, true, values.last().unwrap()));

    Ok(keyset(params, &axes, backwards))
}

fn keyset(params: &mut Params, axes: &[(String, bool, &Value)], backwards: bool) -> String {
    let (selector, ascending, value) = &axes[0];
    let forward = *ascending != backwards;
    let step = comparison(params, selector, forward, value);
    if axes.len() == 1 {
        return step;
    }
    let equality = if value.is_null() {
        format!("{selector} IS NULL")
    } else {
        format!("{selector} = {}", params.prepare(value))
    };
    let rest = keyset(params, &axes[1..], backwards);
    format!("{step} OR ({equality} AND ({rest}))")
}

fn comparison(params: &mut Params, selector: &str, forward: bool, value: &Value) -> String {
    if value.is_null() {
        // Nothing sorts beyond NULL in the direction NULLs collect in.
        return if forward {
            format!("{selector} IS NOT NULL")
        } else {
            "0".to_owned()
        };
    }
    let matcher = if forward { ">" } else { "<" };
    format!("{selector} {matcher} {}", params.prepare(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileOptions;
    use crate::model::system::apply_defaults;
    use crate::model::Model;
    use serde_json::json;

    fn model() -> Model {
        let mut model: Model = serde_json::from_value(json!({
            "slug": "account",
            "fields": {
                "handle": { "type": "string" },
                "age": { "type": "number" },
            },
        }))
        .unwrap();
        apply_defaults(&mut model);
        model
    }

    fn ctx_and<'a>(model: &'a Model, options: &'a CompileOptions) -> QueryContext<'a> {
        QueryContext {
            models: std::slice::from_ref(model),
            model,
            parent_model: None,
            options,
        }
    }

    #[test]
    fn test_order_by_with_collation() {
        let model = model();
        let options = CompileOptions::default();
        let ctx = ctx_and(&model, &options);
        let ordered_by: OrderedBy = serde_json::from_value(json!({
            "ascending": ["handle"],
            "descending": ["ronin.createdAt"],
        }))
        .unwrap();
        let clause = compile_ordered_by(&ctx, &ordered_by, false).unwrap();
        assert_eq!(
            clause.as_deref(),
            Some("\"handle\" COLLATE NOCASE ASC, \"ronin.createdAt\" DESC")
        );

        let flipped = compile_ordered_by(&ctx, &ordered_by, true).unwrap();
        assert_eq!(
            flipped.as_deref(),
            Some("\"handle\" COLLATE NOCASE DESC, \"ronin.createdAt\" ASC")
        );
    }

    #[test]
    fn test_order_by_expression() {
        let model = model();
        let options = CompileOptions::default();
        let ctx = ctx_and(&model, &options);
        let ordered_by: OrderedBy = serde_json::from_value(json!({
            "ascending": [{ "__RONIN_EXPRESSION": "length(__RONIN_FIELD_handle)" }],
        }))
        .unwrap();
        let clause = compile_ordered_by(&ctx, &ordered_by, false).unwrap();
        assert_eq!(clause.as_deref(), Some("(length(\"handle\")) ASC"));
    }

    #[test]
    fn test_keyset_filter() {
        let model = model();
        let options = CompileOptions::default();
        let ctx = ctx_and(&model, &options);
        let ordered_by: OrderedBy = serde_json::from_value(json!({
            "ascending": ["handle", "age"],
        }))
        .unwrap();
        let mut params = Params::binding();
        let filter = compile_cursor_filter(
            &ctx,
            &mut params,
            &ordered_by,
            &[json!("elaine"), json!(3), json!("acc_1")],
            false,
        )
        .unwrap();
        assert_eq!(
            filter,
            "\"handle\" > ?1 OR (\"handle\" = ?2 AND (\"age\" > ?3 OR (\"age\" = ?4 AND (\"id\" > ?5))))"
        );
        assert_eq!(params.take().len(), 5);
    }

    #[test]
    fn test_keyset_filter_backwards() {
        let model = model();
        let options = CompileOptions::default();
        let ctx = ctx_and(&model, &options);
        let ordered_by: OrderedBy = serde_json::from_value(json!({ "ascending": ["handle"] }))
        .unwrap();
        let mut params = Params::binding();
        let filter = compile_cursor_filter(
            &ctx,
            &mut params,
            &ordered_by,
            &[json!("elaine"), json!("acc_1")],
            true,
        )
        .unwrap();
        assert_eq!(
            filter,
            "\"handle\" < ?1 OR (\"handle\" = ?2 AND (\"id\" < ?3))"
        );
    }

    #[test]
    fn test_cursor_arity_mismatch() {
        let model = model();
        let options = CompileOptions::default();
        let ctx = ctx_and(&model, &options);
        let ordered_by: OrderedBy = serde_json::from_value(json!({ "ascending": ["handle"] }))
        .unwrap();
        let mut params = Params::binding();
        let err = compile_cursor_filter(&ctx, &mut params, &ordered_by, &[json!("x")], false)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidBeforeOrAfterInstruction);
    }
}
