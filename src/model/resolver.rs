// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! Lookup of models by slug and resolution of (possibly dotted) field paths
//! into SQL selectors.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Field, FieldType, Model};
use crate::error::{CompilerError, Result};
use crate::helpers;

/// Finds a model by its slug or plural slug.
pub(crate) fn model_by_slug<'a>(models: &'a [Model], slug: &str) -> Result<&'a Model> {
    models
        .iter()
        .find(|model| model.slug == slug || model.plural_slug() == slug)
        .ok_or_else(|| CompilerError::model_not_found(slug))
}

/// Like [`model_by_slug`], but returns the position inside the list.
pub(crate) fn model_index(models: &[Model], slug: &str) -> Result<usize> {
    models
        .iter()
        .position(|model| model.slug == slug || model.plural_slug() == slug)
        .ok_or_else(|| CompilerError::model_not_found(slug))
}

/// A resolved field path: the root field definition plus the SQL selector
/// addressing the path.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedField {
    /// Slug of the root field (first path segment for JSON sub-paths).
    pub root_slug: String,
    pub field: Field,
    pub selector: String,
}

/// The prefix prepended to column selectors of `model`. Empty unless a
/// table alias is active; an alias starting with the parent-field marker is
/// stripped down to the aliased table it smuggles in.
pub(crate) fn table_prefix(model: &Model) -> String {
    match &model.table_alias {
        Some(alias) if alias.starts_with(helpers::FIELD_PARENT_SYMBOL) => {
            let stripped = alias.trim_start_matches(helpers::FIELD_PARENT_SYMBOL);
            format!("\"{stripped}\".")
        }
        Some(alias) => format!("\"{alias}\"."),
        None => String::new(),
    }
}

/// Resolves `path` against `model` for a read site. JSON and blob fields
/// accept nested sub-paths, which turn into `json_extract` selectors.
pub(crate) fn resolve_field(model: &Model, path: &str, source: &str) -> Result<ResolvedField> {
    resolve(model, path, source, false)
}

/// Resolves `path` against `model` for a write site, where nested JSON
/// sub-paths still address the plain column.
pub(crate) fn resolve_field_for_write(
    model: &Model,
    path: &str,
    source: &str,
) -> Result<ResolvedField> {
    resolve(model, path, source, true)
}

fn resolve(model: &Model, path: &str, source: &str, write_site: bool) -> Result<ResolvedField> {
    let prefix = table_prefix(model);

    if let Some(field) = model.fields.get(path) {
        return Ok(ResolvedField {
            root_slug: path.to_owned(),
            field: field.clone(),
            selector: format!("{prefix}\"{path}\""),
        });
    }

    if let Some((root, rest)) = path.split_once('.') {
        if let Some(field) = model.fields.get(root) {
            if matches!(field.field_type, FieldType::Json | FieldType::Blob) {
                let selector = if write_site {
                    format!("{prefix}\"{root}\"")
                } else {
                    format!("json_extract({prefix}{root}, '$.{rest}')")
                };
                return Ok(ResolvedField {
                    root_slug: root.to_owned(),
                    field: field.clone(),
                    selector,
                });
            }
        }
    }

    Err(CompilerError::field_not_found(path, &model.name(), source))
}

static FIELD_PARENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("{}([a-zA-Z0-9_.]+)", helpers::FIELD_PARENT_SYMBOL)).unwrap()
});
static FIELD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("{}([a-zA-Z0-9_.]+)", helpers::FIELD_SYMBOL)).unwrap());

/// Renders a raw expression, replacing `__RONIN_FIELD_PARENT_<path>` with a
/// selector against the enclosing query's model and `__RONIN_FIELD_<path>`
/// with a selector against the current model.
pub(crate) fn render_expression(
    expression: &str,
    model: &Model,
    parent: Option<&Model>,
    source: &str,
) -> Result<String> {
    let mut out = expression.to_owned();
    if let Some(parent) = parent {
        out = replace_references(&FIELD_PARENT_RE, &out, parent, source)?;
    }
    out = replace_references(&FIELD_RE, &out, model, source)?;
    Ok(out)
}

fn replace_references(re: &Regex, text: &str, model: &Model, source: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    for captures in re.captures_iter(text) {
        let whole = captures.get(0).unwrap();
        let path = &captures[1];
        let resolved = resolve_field(model, path, source)?;
        out.push_str(&text[last_end..whole.start()]);
        out.push_str(&resolved.selector);
        last_end = whole.end();
    }
    out.push_str(&text[last_end..]);
    Ok(out)
}
