// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The `with` instruction: document filters into WHERE fragments.

use serde_json::Value;

use super::QueryContext;
use crate::error::{CompilerError, ErrorCode, Result};
use crate::helpers::{self, Symbol};
use crate::model::resolver;
use crate::query::Query;
use crate::statement::Params;

/// One filtering operator, keyed inside nested `with` objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WithOp {
    Being,
    NotBeing,
    StartingWith,
    NotStartingWith,
    EndingWith,
    NotEndingWith,
    Containing,
    NotContaining,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl WithOp {
    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "being" => Self::Being,
            "notBeing" => Self::NotBeing,
            "startingWith" => Self::StartingWith,
            "notStartingWith" => Self::NotStartingWith,
            "endingWith" => Self::EndingWith,
            "notEndingWith" => Self::NotEndingWith,
            "containing" => Self::Containing,
            "notContaining" => Self::NotContaining,
            "greaterThan" => Self::GreaterThan,
            "greaterOrEqual" => Self::GreaterOrEqual,
            "lessThan" => Self::LessThan,
            "lessOrEqual" => Self::LessOrEqual,
            _ => return None,
        })
    }

    fn matcher(self, null_value: bool) -> &'static str {
        match self {
            Self::Being => {
                if null_value {
                    "IS"
                } else {
                    "="
                }
            }
            Self::NotBeing => {
                if null_value {
                    "IS NOT"
                } else {
                    "!="
                }
            }
            Self::StartingWith | Self::EndingWith | Self::Containing => "LIKE",
            Self::NotStartingWith | Self::NotEndingWith | Self::NotContaining => "NOT LIKE",
            Self::GreaterThan => ">",
            Self::GreaterOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
        }
    }

    /// Wraps LIKE patterns with `%` on the side the operator leaves open.
    fn transform(self, value: &Value) -> Value {
        let Some(text) = value.as_str() else {
            return value.clone();
        };
        match self {
            Self::StartingWith | Self::NotStartingWith => Value::String(format!("{text}%")),
            Self::EndingWith | Self::NotEndingWith => Value::String(format!("%{text}")),
            Self::Containing | Self::NotContaining => Value::String(format!("%{text}%")),
            _ => value.clone(),
        }
    }
}

fn invalid_with(message: impl Into<String>) -> CompilerError {
    CompilerError::new(ErrorCode::InvalidWithValue, message)
}

/// Compiles a `with` instruction into a WHERE condition (without the
/// keyword). Vacuous filters produce `None`.
pub(crate) fn compile_with(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    value: &Value,
) -> Result<Option<String>> {
    match value {
        // An array of objects forms an OR over its groups.
        Value::Array(groups) => {
            let mut conditions = Vec::with_capacity(groups.len());
            for group in groups {
                let object = group
                    .as_object()
                    .ok_or_else(|| invalid_with("`with` groups must be objects."))?;
                if let Some(condition) = compile_object(ctx, params, object)? {
                    conditions.push(condition);
                }
            }
            Ok(join_or(conditions, false))
        }
        Value::Object(object) => compile_object(ctx, params, object),
        _ => Err(invalid_with("The `with` instruction must be an object or an array of objects.")),
    }
}

fn compile_object(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    object: &serde_json::Map<String, Value>,
) -> Result<Option<String>> {
    let mut conditions = Vec::with_capacity(object.len());
    for (path, entry) in object {
        conditions.extend(field_conditions(ctx, params, path, entry)?);
    }
    if conditions.is_empty() {
        Ok(None)
    } else {
        Ok(Some(conditions.join(" AND ")))
    }
}

fn join_or(conditions: Vec<String>, parenthesize: bool) -> Option<String> {
    match conditions.len() {
        0 => None,
        1 => Some(conditions.into_iter().next().unwrap()),
        _ => {
            let joined = conditions.join(" OR ");
            if parenthesize {
                Some(format!("({joined})"))
            } else {
                Some(joined)
            }
        }
    }
}

fn field_conditions(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    path: &str,
    value: &Value,
) -> Result<Vec<String>> {
    match value {
        // Arrays of scalars (or operator objects) form OR chains.
        Value::Array(items) => {
            let mut branches = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(object) if helpers::as_symbol(item).is_none() => {
                        for (key, entry) in object {
                            let op = WithOp::from_key(key).ok_or_else(|| {
                                invalid_with(format!("Unknown `with` operator `{key}`."))
                            })?;
                            branches.push(condition(ctx, params, path, op, entry)?);
                        }
                    }
                    _ => branches.push(condition(ctx, params, path, WithOp::Being, item)?),
                }
            }
            Ok(join_or(branches, true).into_iter().collect())
        }
        Value::Object(object) if helpers::as_symbol(value).is_none() => {
            let operator_keys = object.keys().all(|key| WithOp::from_key(key).is_some());
            if operator_keys && !object.is_empty() {
                let mut conditions = Vec::with_capacity(object.len());
                for (key, entry) in object {
                    let op = WithOp::from_key(key).unwrap();
                    match entry {
                        Value::Array(items) => {
                            let branches: Vec<String> = items
                                .iter()
                                .map(|item| condition(ctx, params, path, op, item))
                                .collect::<Result<_>>()?;
                            conditions.extend(join_or(branches, true));
                        }
                        _ => conditions.push(condition(ctx, params, path, op, entry)?),
                    }
                }
                return Ok(conditions);
            }
            nested_conditions(ctx, params, path, object)
        }
        _ => Ok(vec![condition(ctx, params, path, WithOp::Being, value)?]),
    }
}

/// Handles an object value that is not made of operators: a related-record
/// filter on a link field, or a descent into a nested field path.
fn nested_conditions(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    path: &str,
    object: &serde_json::Map<String, Value>,
) -> Result<Vec<String>> {
    if let Ok(resolved) = resolver::resolve_field(ctx.model, path, "with") {
        if resolved.field.field_type == crate::model::FieldType::Link && path == resolved.root_slug
        {
            if resolved.field.is_many_link() {
                return Err(invalid_with(format!(
                    "Cannot filter by many-cardinality link field \"{path}\"."
                )));
            }
            // Filtering a link by nothing but its id compares the column
            // directly; anything else becomes a correlated lookup.
            if object.len() == 1 {
                if let Some(id_value) = object.get("id") {
                    return field_conditions(ctx, params, path, id_value);
                }
            }
            let target_slug = resolved.field.target.as_deref().ok_or_else(|| {
                invalid_with(format!("Link field \"{path}\" does not name a target model."))
            })?;
            let target = resolver::model_by_slug(ctx.models, target_slug)?;
            let nested_ctx = QueryContext {
                models: ctx.models,
                model: target,
                parent_model: ctx.parent_model,
                options: ctx.options,
            };
            let nested = compile_object(&nested_ctx, params, object)?;
            let nested = match nested {
                Some(nested) => format!(" WHERE {nested}"),
                None => String::new(),
            };
            return Ok(vec![format!(
                "{} = (SELECT \"id\" FROM \"{}\"{nested} LIMIT 1)",
                resolved.selector,
                target.table(),
            )]);
        }
    }

    // Plain nested object: descend into dotted field paths.
    let mut conditions = Vec::with_capacity(object.len());
    for (key, entry) in object {
        conditions.extend(field_conditions(ctx, params, &format!("{path}.{key}"), entry)?);
    }
    Ok(conditions)
}

fn condition(
    ctx: &QueryContext<'_>,
    params: &mut Params,
    path: &str,
    op: WithOp,
    value: &Value,
) -> Result<String> {
    let resolved = resolver::resolve_field(ctx.model, path, "with")?;
    if resolved.field.is_many_link() {
        return Err(invalid_with(format!(
            "Cannot filter by many-cardinality link field \"{path}\"."
        )));
    }

    if let Some(symbol) = helpers::as_symbol(value) {
        let rhs = match symbol {
            Symbol::Expression(expression) => {
                resolver::render_expression(&expression, ctx.model, ctx.parent_model, "with")?
            }
            Symbol::Query(document) => {
                let mut query = Query::from_document(&document)?;
                // A sub-select compared against a column yields its id
                // unless told otherwise.
                if let Query::Get { instructions, .. } = &mut query {
                    if instructions.selecting.is_none() {
                        instructions.selecting = Some(vec!["id".to_owned()]);
                    }
                }
                let sub = super::compile_sub_select(ctx, params, &query)?;
                format!("({sub})")
            }
        };
        return Ok(format!("{} {} {}", resolved.selector, op.matcher(false), rhs));
    }

    let matcher = op.matcher(value.is_null());
    if value.is_null() {
        return Ok(format!("{} {matcher} NULL", resolved.selector));
    }
    let transformed = op.transform(value);
    let rhs = params.prepare(&transformed);
    Ok(format!("{} {matcher} {rhs}", resolved.selector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileOptions;
    use crate::model::system::apply_defaults;
    use crate::model::Model;
    use serde_json::json;

    fn account_model() -> Model {
        let mut model: Model = serde_json::from_value(json!({
            "slug": "account",
            "fields": {
                "handle": { "type": "string" },
                "age": { "type": "number" },
                "locations": { "type": "json" },
                "team": { "type": "link", "target": "team" },
            },
        }))
        .unwrap();
        apply_defaults(&mut model);
        model
    }

    fn team_model() -> Model {
        let mut model: Model = serde_json::from_value(json!({
            "slug": "team",
            "fields": { "handle": { "type": "string" } },
        }))
        .unwrap();
        apply_defaults(&mut model);
        model
    }

    fn compile(with: Value) -> (Option<String>, Vec<Value>) {
        let models = vec![account_model(), team_model()];
        let options = CompileOptions::default();
        let ctx = QueryContext {
            models: &models,
            model: &models[0],
            parent_model: None,
            options: &options,
        };
        let mut params = Params::binding();
        let condition = compile_with(&ctx, &mut params, &with).unwrap();
        (condition, params.take())
    }

    #[test]
    fn test_equality() {
        let (cond, params) = compile(json!({ "handle": "elaine" }));
        assert_eq!(cond.as_deref(), Some("\"handle\" = ?1"));
        assert_eq!(params, vec![json!("elaine")]);
    }

    #[test]
    fn test_operator_table() {
        let cases = [
            (json!({ "handle": { "being": "a" } }), "\"handle\" = ?1", json!("a")),
            (json!({ "handle": { "notBeing": "a" } }), "\"handle\" != ?1", json!("a")),
            (json!({ "handle": { "startingWith": "a" } }), "\"handle\" LIKE ?1", json!("a%")),
            (json!({ "handle": { "endingWith": "a" } }), "\"handle\" LIKE ?1", json!("%a")),
            (json!({ "handle": { "containing": "a" } }), "\"handle\" LIKE ?1", json!("%a%")),
            (
                json!({ "handle": { "notContaining": "a" } }),
                "\"handle\" NOT LIKE ?1",
                json!("%a%"),
            ),
            (json!({ "age": { "greaterThan": 2 } }), "\"age\" > ?1", json!(2)),
            (json!({ "age": { "greaterOrEqual": 2 } }), "\"age\" >= ?1", json!(2)),
            (json!({ "age": { "lessThan": 2 } }), "\"age\" < ?1", json!(2)),
            (json!({ "age": { "lessOrEqual": 2 } }), "\"age\" <= ?1", json!(2)),
        ];
        for (with, expected, param) in cases {
            let (cond, params) = compile(with.clone());
            assert_eq!(cond.as_deref(), Some(expected), "for {with}");
            assert_eq!(params, vec![param], "for {with}");
        }
    }

    #[test]
    fn test_null_handling() {
        let (cond, params) = compile(json!({ "handle": null }));
        assert_eq!(cond.as_deref(), Some("\"handle\" IS NULL"));
        assert!(params.is_empty());

        let (cond, _) = compile(json!({ "handle": { "notBeing": null } }));
        assert_eq!(cond.as_deref(), Some("\"handle\" IS NOT NULL"));
    }

    #[test]
    fn test_or_chains() {
        let (cond, params) = compile(json!({ "handle": { "being": ["a", "b"] } }));
        assert_eq!(cond.as_deref(), Some("(\"handle\" = ?1 OR \"handle\" = ?2)"));
        assert_eq!(params.len(), 2);

        let (cond, _) = compile(json!({ "handle": ["a", "b"] }));
        assert_eq!(cond.as_deref(), Some("(\"handle\" = ?1 OR \"handle\" = ?2)"));
    }

    #[test]
    fn test_group_or() {
        let (cond, _) = compile(json!([
            { "handle": "a" },
            { "age": 3 },
        ]));
        assert_eq!(cond.as_deref(), Some("\"handle\" = ?1 OR \"age\" = ?2"));
    }

    #[test]
    fn test_vacuous_filters() {
        let (cond, _) = compile(json!([]));
        assert_eq!(cond, None);
        let (cond, _) = compile(json!({ "handle": [] }));
        assert_eq!(cond, None);
    }

    #[test]
    fn test_json_sub_path() {
        let (cond, params) = compile(json!({ "locations": { "europe": "berlin" } }));
        assert_eq!(
            cond.as_deref(),
            Some("json_extract(locations, '$.europe') = ?1")
        );
        assert_eq!(params, vec![json!("berlin")]);
    }

    #[test]
    fn test_json_literal_comparison() {
        let (cond, params) = compile(json!({ "locations": { "being": { "europe": "berlin" } } }));
        assert_eq!(cond.as_deref(), Some("\"locations\" = ?1"));
        assert_eq!(params, vec![json!("{\"europe\":\"berlin\"}")]);
    }

    #[test]
    fn test_link_by_id_compares_directly() {
        let (cond, params) = compile(json!({ "team": { "id": "tea_1" } }));
        assert_eq!(cond.as_deref(), Some("\"team\" = ?1"));
        assert_eq!(params, vec![json!("tea_1")]);
    }

    #[test]
    fn test_link_by_nested_field() {
        let (cond, params) = compile(json!({ "team": { "handle": "crew" } }));
        assert_eq!(
            cond.as_deref(),
            Some("\"team\" = (SELECT \"id\" FROM \"teams\" WHERE \"handle\" = ?1 LIMIT 1)")
        );
        assert_eq!(params, vec![json!("crew")]);
    }

    #[test]
    fn test_multiple_fields_are_anded() {
        let (cond, _) = compile(json!({ "handle": "a", "age": 3 }));
        assert_eq!(cond.as_deref(), Some("\"handle\" = ?1 AND \"age\" = ?2"));
    }

    #[test]
    fn test_invalid_with() {
        let models = vec![account_model(), team_model()];
        let options = CompileOptions::default();
        let ctx = QueryContext {
            models: &models,
            model: &models[0],
            parent_model: None,
            options: &options,
        };
        let mut params = Params::binding();
        let err = compile_with(&ctx, &mut params, &json!("loose")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidWithValue);
    }
}
