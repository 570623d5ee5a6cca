// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! Small utilities shared across the compiler: slug casing, dotted-path
//! access on JSON values, marker symbols, id generation.

use rand::Rng;
use serde_json::{Map, Value};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

/// Marker wrapping a nested query inside another query.
pub const QUERY_SYMBOL: &str = "__RONIN_QUERY";
/// Marker wrapping a raw SQL expression.
pub const EXPRESSION_SYMBOL: &str = "__RONIN_EXPRESSION";
/// Prefix referring to a field of the current model inside an expression.
pub const FIELD_SYMBOL: &str = "__RONIN_FIELD_";
/// Prefix referring to a field of the enclosing query's model.
pub const FIELD_PARENT_SYMBOL: &str = "__RONIN_FIELD_PARENT_";
/// Placeholder replaced with a caller-provided value during preset expansion.
pub const VALUE_SYMBOL: &str = "__RONIN_VALUE";

/// Mounting key under which joined fields are hoisted onto the parent record.
pub const ROOT_MOUNT_KEY: &str = "ronin_root";

/// A marker object detected inside a query document.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Symbol {
    /// A nested query, carried in document form.
    Query(Value),
    /// A raw SQL expression. May contain `__RONIN_FIELD_*` references.
    Expression(String),
}

/// Detects whether `value` is a marker object and returns the tagged form.
pub(crate) fn as_symbol(value: &Value) -> Option<Symbol> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    if let Some(query) = object.get(QUERY_SYMBOL) {
        return Some(Symbol::Query(query.clone()));
    }
    if let Some(expression) = object.get(EXPRESSION_SYMBOL) {
        return Some(Symbol::Expression(expression.as_str()?.to_owned()));
    }
    None
}

/// Wraps a raw SQL expression in its document marker form.
pub fn expression_value(expression: &str) -> Value {
    let mut object = Map::new();
    object.insert(EXPRESSION_SYMBOL.to_owned(), Value::String(expression.to_owned()));
    Value::Object(object)
}

/// Converts a camelCase slug into snake_case, the casing used for physical
/// table and index names.
pub fn to_snake_case(slug: &str) -> String {
    let mut out = String::with_capacity(slug.len() + 4);
    let mut prev_lower = false;
    for ch in slug.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else if ch == '-' || ch == '.' || ch == ' ' {
            out.push('_');
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Converts a snake_case (or otherwise separated) name into a camelCase slug.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' || ch == '-' || ch == '.' || ch == ' ' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Derives a human-readable name from a slug: camelCase boundaries and
/// separators become spaces, everything is lower-cased, and the first word
/// is capitalized.
pub fn slug_to_name(slug: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    for ch in slug.chars() {
        if ch == '_' || ch == '-' || ch == '.' || ch == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            current.extend(ch.to_lowercase());
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    let mut name = words.join(" ");
    if let Some(first) = name.get(0..1) {
        let first = first.to_uppercase();
        name.replace_range(0..1, &first);
    }
    name
}

/// A minimal English pluralizer, sufficient for model slugs.
pub fn pluralize(slug: &str) -> String {
    let lower = slug.to_lowercase();
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{slug}es")
    } else if lower.ends_with('y')
        && !matches!(
            lower.chars().rev().nth(1),
            Some('a') | Some('e') | Some('i') | Some('o') | Some('u')
        )
    {
        format!("{}ies", &slug[..slug.len() - 1])
    } else {
        format!("{slug}s")
    }
}

/// Strips every character that is not legal inside an unquoted identifier.
/// Slugs are validated upstream; this is the last line of defense before a
/// string is spliced between double quotes.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '.')
        .collect()
}

/// Generates a record id of the form `<prefix>_<16 lowercase hex chars>`.
pub fn generate_record_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut hex = String::with_capacity(16);
    for _ in 0..16 {
        let digit: u8 = rng.gen_range(0..16);
        hex.push(char::from_digit(u32::from(digit), 16).unwrap_or('0'));
    }
    format!("{prefix}_{hex}")
}

static TIMESTAMP_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

/// The current UTC time in the ISO-8601 shape stored by the schema
/// (`strftime('%Y-%m-%dT%H:%M:%f', 'now') || 'Z'`).
pub fn current_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00.000Z"))
}

/// One segment of a mounting path. `array` marks a `[0]` suffix, meaning the
/// segment addresses the first element of an array of joined records.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PathSegment {
    pub key: String,
    pub array: bool,
}

/// Splits a mounting path into its segments, dropping `{n}` disambiguators.
pub(crate) fn split_path(path: &str) -> Vec<PathSegment> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut key = segment.to_owned();
            let array = key.ends_with("[0]");
            if array {
                key.truncate(key.len() - 3);
            }
            if let Some(start) = key.find('{') {
                if key.ends_with('}') {
                    key.truncate(start);
                }
            }
            PathSegment { key, array }
        })
        .collect()
}

/// Sets `value` at the (possibly nested) `path` inside `target`, creating
/// intermediate objects and single-element arrays along the way.
pub(crate) fn set_value(target: &mut Value, path: &str, value: Value) {
    set_value_at(target, &split_path(path), value);
}

pub(crate) fn set_value_at(target: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((segment, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let map = target.as_object_mut().unwrap();
    let slot = map.entry(segment.key.clone()).or_insert(Value::Null);
    let slot = if segment.array {
        if !slot.is_array() {
            *slot = Value::Array(vec![Value::Object(Map::new())]);
        }
        let array = slot.as_array_mut().unwrap();
        if array.is_empty() {
            array.push(Value::Object(Map::new()));
        }
        &mut array[0]
    } else {
        slot
    };
    if rest.is_empty() {
        *slot = value;
    } else {
        set_value_at(slot, rest, value);
    }
}

/// Reads the value at `path` inside `target`, if present. Array segments
/// address the first element.
pub(crate) fn get_value<'a>(target: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = target;
    for segment in split_path(path) {
        current = current.as_object()?.get(&segment.key)?;
        if segment.array {
            current = current.as_array()?.first()?;
        }
    }
    Some(current)
}

/// Removes the value at `path` inside `target`, pruning nothing else.
pub(crate) fn delete_value(target: &mut Value, path: &str) {
    let segments = split_path(path);
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = target;
    for segment in parents {
        let Some(next) = current
            .as_object_mut()
            .and_then(|map| map.get_mut(&segment.key))
        else {
            return;
        };
        current = next;
        if segment.array {
            let Some(first) = current.as_array_mut().and_then(|array| array.first_mut()) else {
                return;
            };
            current = first;
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(&last.key);
    }
}

/// Merges `incoming` into `base`: nested objects merge recursively with
/// `incoming` winning on leaves, arrays concatenate after the existing
/// entries, everything else is overwritten.
pub(crate) fn deep_merge(base: &mut Value, incoming: &Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            for (key, incoming_value) in incoming_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, incoming_value),
                    None => {
                        base_map.insert(key.clone(), incoming_value.clone());
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(incoming_items)) => {
            base_items.extend(incoming_items.iter().cloned());
        }
        (base, incoming) => *base = incoming.clone(),
    }
}

/// Replaces every occurrence of [`VALUE_SYMBOL`] inside `value` with
/// `replacement`. Strings equal to the marker are replaced wholesale;
/// strings containing it splice in a string replacement.
pub(crate) fn replace_value_symbol(value: &mut Value, replacement: &Value) {
    match value {
        Value::String(text) => {
            if text == VALUE_SYMBOL {
                *value = replacement.clone();
            } else if text.contains(VALUE_SYMBOL) {
                if let Some(replacement_text) = replacement.as_str() {
                    *text = text.replace(VALUE_SYMBOL, replacement_text);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_value_symbol(item, replacement);
            }
        }
        Value::Object(map) => {
            for (_, entry) in map.iter_mut() {
                replace_value_symbol(entry, replacement);
            }
        }
        _ => {}
    }
}

/// Matches a field slug against a `selecting` pattern. `*` matches a single
/// path segment, `**` matches one or more segments.
pub(crate) fn matches_pattern(slug: &str, pattern: &str) -> bool {
    fn matches(slug: &[&str], pattern: &[&str]) -> bool {
        match (pattern.split_first(), slug.split_first()) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => false,
            (Some((&"**", pattern_rest)), Some(_)) => {
                // `**` consumes at least one segment, greedily or not.
                (1..=slug.len()).any(|taken| matches(&slug[taken..], pattern_rest))
            }
            (Some((&part, pattern_rest)), Some((&segment, slug_rest))) => {
                (part == "*" || part == segment) && matches(slug_rest, pattern_rest)
            }
        }
    }
    let slug_segments: Vec<&str> = slug.split('.').collect();
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    matches(&slug_segments, &pattern_segments)
}
