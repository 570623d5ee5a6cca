// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! SQL statements and the parameter binder.

use format_sql_query::QuotedData;
use serde::Serialize;
use serde_json::Value;

use crate::helpers;

/// One parameterized SQLite statement.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Statement {
    pub statement: String,
    pub params: Vec<Value>,
    /// Whether the statement produces rows the caller should hand back to
    /// [`crate::Transaction::format_results`].
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub returning: bool,
    /// Dependency statements marked `after` must run after the main
    /// statement of their input query; all others run before.
    #[serde(skip)]
    pub(crate) after: bool,
}

impl Statement {
    pub(crate) fn new(statement: String, params: Vec<Value>, returning: bool) -> Self {
        Self {
            statement,
            params,
            returning,
            after: false,
        }
    }
}

/// Collects bound parameter values for a single statement, handing out
/// 1-based `?N` placeholders. In inline mode no values are collected and
/// literals are rendered directly into the SQL text.
#[derive(Debug)]
pub(crate) struct Params {
    values: Option<Vec<Value>>,
}

impl Params {
    pub fn binding() -> Self {
        Self {
            values: Some(Vec::new()),
        }
    }

    pub fn inline() -> Self {
        Self { values: None }
    }

    pub fn new(inline: bool) -> Self {
        if inline {
            Self::inline()
        } else {
            Self::binding()
        }
    }

    /// Turns a document value into a SQL fragment, either a placeholder for
    /// a collected parameter or an inline literal.
    pub fn prepare(&mut self, value: &Value) -> String {
        // Null never becomes a parameter; `IS NULL` and `DEFAULT NULL` sites
        // want the literal.
        if value.is_null() {
            return "NULL".to_owned();
        }
        let bound = match value {
            Value::Bool(flag) => Value::from(if *flag { 1 } else { 0 }),
            Value::Array(_) | Value::Object(_) => {
                Value::String(serde_json::to_string(value).unwrap_or_default())
            }
            other => other.clone(),
        };
        match &mut self.values {
            Some(values) => {
                values.push(bound);
                format!("?{}", values.len())
            }
            None => match &bound {
                Value::String(text) => {
                    if value.is_string() {
                        format!("{}", QuotedData(text.as_str()))
                    } else {
                        let escaped = escape_expression_quotes(value);
                        let text = serde_json::to_string(&escaped).unwrap_or_default();
                        format!("{}", QuotedData(text.as_str()))
                    }
                }
                other => other.to_string(),
            },
        }
    }

    pub fn take(self) -> Vec<Value> {
        self.values.unwrap_or_default()
    }
}

/// Doubles single quotes inside `__RONIN_EXPRESSION` string values so that
/// the serialized JSON survives being spliced into a SQL string literal and
/// later re-spliced into a statement.
fn escape_expression_quotes(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, entry) in map {
                if key == helpers::EXPRESSION_SYMBOL {
                    if let Value::String(text) = entry {
                        out.insert(key.clone(), Value::String(text.replace('\'', "''")));
                        continue;
                    }
                }
                out.insert(key.clone(), escape_expression_quotes(entry));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(escape_expression_quotes).collect()),
        other => other.clone(),
    }
}
