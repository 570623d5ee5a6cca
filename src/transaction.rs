// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The public facade: a [`Transaction`] compiles a batch of queries at
//! construction time and later formats the raw rows the database returned
//! for them.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::compiler::{self, CompileOptions, FormatMeta, ResultKind};
use crate::error::{CompilerError, ErrorCode, Result};
use crate::format::{self, cursor};
use crate::helpers;
use crate::model::{system, Model};
use crate::query::Query;
use crate::statement::Statement;

/// Options accepted by [`Transaction::new`].
#[derive(Clone, Debug, Default)]
pub struct TransactionOptions {
    /// The models the queries run against.
    pub models: Option<Vec<Model>>,
    /// Inline literal values instead of binding `?N` parameters.
    pub inline_params: bool,
    /// Generate record ids and timestamps in the compiler instead of
    /// relying on column defaults.
    pub inline_defaults: bool,
}

#[derive(Debug)]
struct SubEntry {
    meta: FormatMeta,
    statement_index: usize,
    returning: bool,
}

#[derive(Debug)]
struct Entry {
    subs: Vec<SubEntry>,
    grouped: bool,
}

/// A compiled batch of queries. The `statements` must be applied to the
/// database as one transaction, in order.
#[derive(Debug)]
pub struct Transaction {
    pub statements: Vec<Statement>,
    /// The model list after any DDL queries in the batch were applied,
    /// including hidden association models.
    pub models: Vec<Model>,
    entries: Vec<Entry>,
}

/// One formatted query result.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormattedResult {
    Amount {
        amount: u64,
    },
    Record {
        record: Option<Value>,
        #[serde(rename = "modelFields")]
        model_fields: IndexMap<String, String>,
    },
    Records {
        records: Vec<Value>,
        #[serde(rename = "modelFields")]
        model_fields: IndexMap<String, String>,
        #[serde(rename = "moreBefore", skip_serializing_if = "Option::is_none")]
        more_before: Option<String>,
        #[serde(rename = "moreAfter", skip_serializing_if = "Option::is_none")]
        more_after: Option<String>,
    },
    /// Per-model results of an expanded `all` query, keyed by plural slug.
    Models {
        models: IndexMap<String, FormattedResult>,
    },
    /// Untouched rows, produced in raw mode.
    Raw {
        rows: Vec<Vec<Value>>,
    },
    /// A statement that returns nothing (bare DDL).
    Empty,
}

impl FormattedResult {
    pub fn amount(&self) -> Option<u64> {
        match self {
            FormattedResult::Amount { amount } => Some(*amount),
            _ => None,
        }
    }

    pub fn record(&self) -> Option<&Value> {
        match self {
            FormattedResult::Record { record, .. } => record.as_ref(),
            _ => None,
        }
    }

    pub fn records(&self) -> Option<&[Value]> {
        match self {
            FormattedResult::Records { records, .. } => Some(records),
            _ => None,
        }
    }
}

impl Transaction {
    /// Compiles `queries` into SQLite statements. Compile-time errors of
    /// any query abort the whole transaction.
    pub fn new(queries: &[Query], options: TransactionOptions) -> Result<Self> {
        let mut models = vec![system::root_model()];
        let mut user_models = options.models.unwrap_or_default();
        system::normalize_list(&mut user_models);
        models.extend(user_models);

        let compile_options = CompileOptions {
            inline_params: options.inline_params,
            inline_defaults: options.inline_defaults,
        };
        let compiled = compiler::compile_queries(queries, &mut models, &compile_options)?;

        let mut statements = Vec::new();
        let mut entries = Vec::with_capacity(compiled.len());
        for entry in compiled {
            let mut subs = Vec::with_capacity(entry.outputs.len());
            for output in entry.outputs {
                for dep in output.deps.iter().filter(|dep| !dep.after) {
                    statements.push(dep.clone());
                }
                let statement_index = statements.len();
                let returning = output.statement.returning;
                statements.push(output.statement);
                for dep in output.deps.iter().filter(|dep| dep.after) {
                    statements.push(dep.clone());
                }
                subs.push(SubEntry {
                    meta: output.meta,
                    statement_index,
                    returning,
                });
            }
            entries.push(Entry {
                subs,
                grouped: entry.grouped,
            });
        }

        let models = models
            .into_iter()
            .filter(|model| model.slug != system::ROOT_MODEL_SLUG)
            .collect();
        Ok(Self {
            statements,
            models,
            entries,
        })
    }

    /// Formats raw rows back into nested records, one result per input
    /// query. `results` must align with `statements`, or carry exactly one
    /// slot per `returning` statement.
    pub fn format_results(&self, results: &[Vec<Value>], raw: bool) -> Result<Vec<FormattedResult>> {
        let slots = self.result_slots(results)?;
        let empty: Vec<Value> = Vec::new();

        let mut formatted = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !entry.grouped {
                match entry.subs.first() {
                    Some(sub) => formatted
                        .push(self.format_sub(sub, slot_rows(&slots, sub, &empty), raw)?),
                    None => formatted.push(FormattedResult::Empty),
                }
            } else {
                let mut models = IndexMap::with_capacity(entry.subs.len());
                for sub in &entry.subs {
                    let result = self.format_sub(sub, slot_rows(&slots, sub, &empty), raw)?;
                    models.insert(sub.meta.plural_slug.clone(), result);
                }
                formatted.push(FormattedResult::Models { models });
            }
        }
        Ok(formatted)
    }

    /// Maps statement indexes to their result slots.
    fn result_slots<'a>(&self, results: &'a [Vec<Value>]) -> Result<Vec<Option<&'a Vec<Value>>>> {
        if results.len() == self.statements.len() {
            return Ok(results.iter().map(Some).collect());
        }
        let returning: Vec<usize> = self
            .statements
            .iter()
            .enumerate()
            .filter(|(_, statement)| statement.returning)
            .map(|(index, _)| index)
            .collect();
        if results.len() == returning.len() {
            let mut slots = vec![None; self.statements.len()];
            for (slot, index) in results.iter().zip(returning) {
                slots[index] = Some(slot);
            }
            return Ok(slots);
        }
        Err(CompilerError::new(
            ErrorCode::MissingField,
            format!(
                "Expected {} result slots (or {} for returning statements), got {}.",
                self.statements.len(),
                self.statements.iter().filter(|s| s.returning).count(),
                results.len()
            ),
        ))
    }

    fn format_sub(
        &self,
        sub: &SubEntry,
        rows: &[Value],
        raw: bool,
    ) -> Result<FormattedResult> {
        if !sub.returning {
            return Ok(FormattedResult::Empty);
        }
        let mut normalized: Vec<Vec<Value>> = rows
            .iter()
            .map(format::normalize_row)
            .collect::<Result<_>>()?;
        if raw {
            return Ok(FormattedResult::Raw { rows: normalized });
        }

        let meta = &sub.meta;
        match meta.kind {
            ResultKind::Amount => {
                let amount = normalized
                    .first()
                    .and_then(|row| row.first())
                    .and_then(amount_value)
                    .unwrap_or(0);
                Ok(FormattedResult::Amount { amount })
            }
            ResultKind::Single => {
                let records = format::format_records(&meta.selected, &normalized);
                let record = records.into_iter().next().map(|mut record| {
                    format::strip_excluded(&mut record, &meta.selected);
                    record
                });
                Ok(FormattedResult::Record {
                    record,
                    model_fields: model_fields(meta),
                })
            }
            ResultKind::Many => {
                // Backward pagination flipped the SQL ordering; restore
                // display order before demultiplexing.
                if meta.backwards {
                    normalized.reverse();
                }
                let mut records = format::format_records(&meta.selected, &normalized);

                let mut more_before = None;
                let mut more_after = None;
                if let Some(limit) = meta.limited_to {
                    let limit = limit as usize;
                    let overflow = records.len() > limit;
                    if overflow {
                        // The lookahead row sits on the side we paged from.
                        if meta.backwards {
                            records.remove(0);
                        } else {
                            records.pop();
                        }
                    }
                    if !records.is_empty() {
                        let after_available = meta.backwards || overflow;
                        let before_available =
                            (meta.backwards && overflow) || (meta.cursored && !meta.backwards);
                        if after_available {
                            if let Some(last) = records.last() {
                                more_after = Some(self.cursor_for(meta, last));
                            }
                        }
                        if before_available {
                            if let Some(first) = records.first() {
                                more_before = Some(self.cursor_for(meta, first));
                            }
                        }
                    }
                }

                for record in &mut records {
                    format::strip_excluded(record, &meta.selected);
                }
                Ok(FormattedResult::Records {
                    records,
                    model_fields: model_fields(meta),
                    more_before,
                    more_after,
                })
            }
        }
    }

    fn cursor_for(&self, meta: &FormatMeta, record: &Value) -> String {
        let fields = compiler::ordering::cursor_fields(&meta.ordered_by);
        let mut values: Vec<Value> = fields
            .iter()
            .map(|(slug, _)| {
                helpers::get_value(record, slug)
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();
        values.push(record.get("id").cloned().unwrap_or(Value::Null));
        cursor::encode(&values)
    }
}

fn slot_rows<'a>(
    slots: &[Option<&'a Vec<Value>>],
    sub: &SubEntry,
    empty: &'a Vec<Value>,
) -> &'a [Value] {
    slots
        .get(sub.statement_index)
        .copied()
        .flatten()
        .unwrap_or(empty)
}

fn amount_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|float| float as u64)),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

fn model_fields(meta: &FormatMeta) -> IndexMap<String, String> {
    meta.selected
        .iter()
        .filter(|field| !field.excluded)
        .map(|field| {
            (
                field.mounting_path.clone(),
                field.field_type.type_name().to_owned(),
            )
        })
        .collect()
}
