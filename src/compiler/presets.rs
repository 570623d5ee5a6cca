// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The `using` instruction: expanding presets into a query's instructions.

use serde_json::Value;

use crate::error::{CompilerError, ErrorCode, Result};
use crate::helpers;
use crate::model::Model;
use crate::query::Instructions;

fn preset_not_found(slug: &str, model: &Model) -> CompilerError {
    CompilerError::new(
        ErrorCode::PresetNotFound,
        format!(
            "Preset \"{slug}\" does not exist in model \"{}\".",
            model.name()
        ),
    )
}

/// Applies the `using` instruction of `instructions`, merging every named
/// preset of `model` into the other instructions. The `using` value itself
/// is consumed.
pub(crate) fn apply_using(model: &Model, instructions: &mut Instructions) -> Result<()> {
    let Some(using) = instructions.using.take() else {
        return Ok(());
    };
    match using {
        Value::Array(slugs) => {
            for slug in &slugs {
                let slug = slug.as_str().ok_or_else(|| {
                    CompilerError::new(
                        ErrorCode::PresetNotFound,
                        "Preset references inside `using` must be slugs.",
                    )
                })?;
                let preset = model
                    .presets
                    .get(slug)
                    .ok_or_else(|| preset_not_found(slug, model))?;
                merge_instructions(instructions, &preset.instructions);
            }
        }
        Value::Object(entries) => {
            for (slug, value) in &entries {
                let preset = model
                    .presets
                    .get(slug)
                    .ok_or_else(|| preset_not_found(slug, model))?;
                let mut resolved = preset.instructions.clone();
                replace_in_instructions(&mut resolved, value);
                merge_instructions(instructions, &resolved);
            }
        }
        other => {
            return Err(CompilerError::new(
                ErrorCode::PresetNotFound,
                format!("The `using` instruction must be an array or an object, got `{other}`."),
            ));
        }
    }
    Ok(())
}

/// Replaces `__RONIN_VALUE` markers throughout a preset's instructions.
fn replace_in_instructions(instructions: &mut Instructions, replacement: &Value) {
    for slot in [&mut instructions.with, &mut instructions.to] {
        if let Some(value) = slot {
            helpers::replace_value_symbol(value, replacement);
        }
    }
    if let Some(including) = &mut instructions.including {
        for (_, value) in including.iter_mut() {
            helpers::replace_value_symbol(value, replacement);
        }
    }
    if let Some(ordered_by) = &mut instructions.ordered_by {
        for entry in ordered_by
            .ascending
            .iter_mut()
            .chain(ordered_by.descending.iter_mut())
        {
            helpers::replace_value_symbol(entry, replacement);
        }
    }
}

/// Merges a preset's instructions into the query's own: arrays append after
/// existing entries, objects merge deeply (preset winning on leaves),
/// scalars are overwritten by the preset. Expand-all `on` overrides reuse
/// the same semantics.
pub(crate) fn merge_instructions(base: &mut Instructions, preset: &Instructions) {
    merge_value_slot(&mut base.with, &preset.with);
    merge_value_slot(&mut base.to, &preset.to);
    if let Some(selecting) = &preset.selecting {
        base.selecting
            .get_or_insert_with(Vec::new)
            .extend(selecting.iter().cloned());
    }
    if let Some(including) = &preset.including {
        let target = base.including.get_or_insert_with(Default::default);
        for (key, value) in including {
            match target.get_mut(key) {
                Some(existing) => helpers::deep_merge(existing, value),
                None => {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
    }
    if let Some(ordered_by) = &preset.ordered_by {
        let target = base.ordered_by.get_or_insert_with(Default::default);
        target.ascending.extend(ordered_by.ascending.iter().cloned());
        target.descending.extend(ordered_by.descending.iter().cloned());
    }
    if preset.limited_to.is_some() {
        base.limited_to = preset.limited_to;
    }
    if preset.before.is_some() {
        base.before = preset.before.clone();
    }
    if preset.after.is_some() {
        base.after = preset.after.clone();
    }
}

fn merge_value_slot(base: &mut Option<Value>, preset: &Option<Value>) {
    let Some(preset_value) = preset else {
        return;
    };
    match base {
        Some(base_value) => helpers::deep_merge(base_value, preset_value),
        None => *base = Some(preset_value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::system::apply_defaults;
    use serde_json::json;

    fn model_with_presets() -> Model {
        let mut model: Model = serde_json::from_value(json!({
            "slug": "account",
            "fields": {
                "handle": { "type": "string" },
                "active": { "type": "boolean" },
            },
            "presets": {
                "active": {
                    "instructions": { "with": { "active": true } },
                },
                "named": {
                    "instructions": { "with": { "handle": "__RONIN_VALUE" } },
                },
                "recent": {
                    "instructions": {
                        "orderedBy": { "descending": ["ronin.createdAt"] },
                        "selecting": ["handle"],
                    },
                },
            },
        }))
        .unwrap();
        apply_defaults(&mut model);
        model
    }

    #[test]
    fn test_array_form_merges_filters() {
        let model = model_with_presets();
        let mut instructions: Instructions =
            serde_json::from_value(json!({ "with": { "handle": "elaine" }, "using": ["active"] }))
                .unwrap();
        apply_using(&model, &mut instructions).unwrap();
        assert_eq!(
            instructions.with,
            Some(json!({ "handle": "elaine", "active": true }))
        );
        assert!(instructions.using.is_none());
    }

    #[test]
    fn test_object_form_substitutes_value() {
        let model = model_with_presets();
        let mut instructions: Instructions =
            serde_json::from_value(json!({ "using": { "named": "juri" } })).unwrap();
        apply_using(&model, &mut instructions).unwrap();
        assert_eq!(instructions.with, Some(json!({ "handle": "juri" })));
    }

    #[test]
    fn test_array_instructions_append() {
        let model = model_with_presets();
        let mut instructions: Instructions =
            serde_json::from_value(json!({ "selecting": ["id"], "using": ["recent"] })).unwrap();
        apply_using(&model, &mut instructions).unwrap();
        assert_eq!(
            instructions.selecting,
            Some(vec!["id".to_owned(), "handle".to_owned()])
        );
        assert_eq!(
            instructions.ordered_by,
            Some(serde_json::from_value(json!({ "descending": ["ronin.createdAt"] })).unwrap())
        );
    }

    #[test]
    fn test_unknown_preset() {
        let model = model_with_presets();
        let mut instructions: Instructions =
            serde_json::from_value(json!({ "using": ["nope"] })).unwrap();
        let err = apply_using(&model, &mut instructions).unwrap_err();
        assert_eq!(err.code, ErrorCode::PresetNotFound);
    }
}
