// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The result formatter: flat rows coming back from the database are
//! demultiplexed into nested records, guided by the selected-field
//! metadata recorded at compile time.

pub(crate) mod cursor;

use serde_json::{Map, Value};

use crate::compiler::SelectedField;
use crate::error::{CompilerError, ErrorCode, Result};
use crate::helpers::{self, PathSegment};
use crate::model::FieldType;

/// Normalizes one raw row into column values. Arrays pass through; object
/// rows yield their values in column order.
pub(crate) fn normalize_row(row: &Value) -> Result<Vec<Value>> {
    match row {
        Value::Array(values) => Ok(values.clone()),
        Value::Object(map) => Ok(map.values().cloned().collect()),
        _ => Err(CompilerError::new(
            ErrorCode::MissingField,
            "Raw rows must be arrays of column values or objects keyed by column name.",
        )),
    }
}

/// Casts a raw column value according to the field type it belongs to.
fn deserialize_value(field_type: FieldType, value: Value) -> Value {
    match field_type {
        FieldType::Json | FieldType::Blob => match value {
            Value::String(text) => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            other => other,
        },
        FieldType::Boolean => match value {
            Value::Null => Value::Null,
            Value::Bool(flag) => Value::Bool(flag),
            Value::Number(number) => Value::Bool(number.as_f64().unwrap_or(0.0) != 0.0),
            Value::String(text) => Value::Bool(!text.is_empty() && text != "0" && text != "false"),
            other => Value::Bool(!other.is_null()),
        },
        _ => value,
    }
}

/// Builds nested records from flat rows, merging rows that belong to the
/// same parent record (which happens whenever a join multiplies rows).
pub(crate) fn format_records(selected: &[SelectedField], rows: &[Vec<Value>]) -> Vec<Value> {
    let mut records: Vec<Value> = Vec::new();
    for row in rows {
        let record = build_record(selected, row);
        merge_record(&mut records, record);
    }
    records
}

fn build_record(selected: &[SelectedField], row: &[Value]) -> Value {
    let mut record = Value::Object(Map::new());
    // Mount prefixes whose joined record turned out to be absent.
    let mut dead_paths: Vec<String> = Vec::new();

    for (index, field) in selected.iter().enumerate() {
        let raw = row
            .get(index)
            .cloned()
            .or_else(|| field.mounted_value.clone())
            .unwrap_or(Value::Null);
        let value = deserialize_value(field.field_type, raw);
        let path = &field.mounting_path;

        // A dead prefix only swallows the mount itself and paths below it,
        // not siblings that merely share a string prefix.
        if dead_paths.iter().any(|dead| {
            path.strip_prefix(dead.as_str()).map_or(false, |rest| {
                rest.is_empty() || rest.starts_with('.') || rest.starts_with('[')
            })
        }) {
            continue;
        }

        // A null id inside a nested mount means the LEFT JOIN found no
        // record: the whole mount collapses to null (or an empty array).
        if value.is_null() && field.slug == "id" {
            if let Some((parent, _)) = path.rsplit_once('.') {
                if let Some(array_parent) = parent.strip_suffix("[0]") {
                    helpers::set_value(&mut record, array_parent, Value::Array(Vec::new()));
                } else {
                    helpers::set_value(&mut record, parent, Value::Null);
                }
                dead_paths.push(parent.to_owned());
                continue;
            }
        }

        helpers::set_value(&mut record, path, value);
    }
    record
}

/// Merges a fresh per-row record into the accumulator: records sharing an
/// id collapse into one, with joined sub-records merged element-wise by
/// their own ids.
fn merge_record(records: &mut Vec<Value>, record: Value) {
    let id = record.get("id").cloned().unwrap_or(Value::Null);
    if !id.is_null() {
        if let Some(existing) = records
            .iter_mut()
            .find(|existing| existing.get("id") == Some(&id))
        {
            merge_values(existing, &record);
            return;
        }
    }
    records.push(record);
}

fn merge_values(existing: &mut Value, incoming: &Value) {
    match (existing, incoming) {
        (Value::Object(existing_map), Value::Object(incoming_map)) => {
            for (key, incoming_value) in incoming_map {
                match existing_map.get_mut(key) {
                    Some(existing_value) => merge_values(existing_value, incoming_value),
                    None => {
                        existing_map.insert(key.clone(), incoming_value.clone());
                    }
                }
            }
        }
        (Value::Array(existing_items), Value::Array(incoming_items)) => {
            for incoming_item in incoming_items {
                let id = incoming_item.get("id");
                let matched = id.filter(|id| !id.is_null()).and_then(|id| {
                    existing_items
                        .iter_mut()
                        .find(|item| item.get("id") == Some(id))
                });
                match matched {
                    Some(existing_item) => merge_values(existing_item, incoming_item),
                    None => existing_items.push(incoming_item.clone()),
                }
            }
        }
        (existing, incoming) => {
            if existing.is_null() {
                *existing = incoming.clone();
            }
        }
    }
}

/// Removes every excluded field from the record tree, descending through
/// join arrays.
pub(crate) fn strip_excluded(record: &mut Value, selected: &[SelectedField]) {
    for field in selected {
        if field.excluded {
            strip_path(record, &helpers::split_path(&field.mounting_path));
        }
    }
}

fn strip_path(value: &mut Value, segments: &[PathSegment]) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };
    let Some(map) = value.as_object_mut() else {
        return;
    };
    if rest.is_empty() && !segment.array {
        map.remove(&segment.key);
        return;
    }
    let Some(child) = map.get_mut(&segment.key) else {
        return;
    };
    if segment.array {
        if let Some(items) = child.as_array_mut() {
            for item in items {
                strip_path(item, rest);
            }
        }
    } else {
        strip_path(child, rest);
    }
}
