// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The opaque pagination cursor: a JSON array of ordered-by values plus
//! the record id, base64url-encoded without padding.

use serde_json::Value;

use crate::error::{CompilerError, ErrorCode, Result};

pub(crate) fn encode(values: &[Value]) -> String {
    let json = serde_json::to_string(values).unwrap_or_else(|_| "[]".to_owned());
    base64::encode_config(json, base64::URL_SAFE_NO_PAD)
}

pub(crate) fn decode(text: &str) -> Result<Vec<Value>> {
    let malformed = || {
        CompilerError::new(
            ErrorCode::InvalidBeforeOrAfterInstruction,
            "The `before` or `after` cursor is malformed.",
        )
    };
    let bytes = base64::decode_config(text, base64::URL_SAFE_NO_PAD).map_err(|_| malformed())?;
    let values: Vec<Value> = serde_json::from_slice(&bytes).map_err(|_| malformed())?;
    Ok(values)
}
