// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! The structured error surfaced by the compiler.
//!
//! Every failure mode carries a machine-readable [`ErrorCode`] so that
//! embedding layers can map it to a user-facing message without parsing
//! strings.

use serde::{Deserialize, Serialize};

pub type Result<T, E = CompilerError> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ModelNotFound,
    FieldNotFound,
    IndexNotFound,
    PresetNotFound,
    InvalidWithValue,
    InvalidToValue,
    InvalidIncludingValue,
    InvalidForValue,
    InvalidBeforeOrAfterInstruction,
    InvalidModelValue,
    InvalidFieldValue,
    ExistingModelEntity,
    RequiredModelEntity,
    MutuallyExclusiveInstructions,
    MissingInstruction,
    MissingField,
}

/// A single compile-time or format-time error.
///
/// Errors bubble out of [`crate::Transaction::new`] for anything detected
/// during compilation and out of [`crate::Transaction::format_results`] for
/// decode problems.
#[derive(Clone, Debug, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CompilerError {
    pub code: ErrorCode,
    pub message: String,
    /// The field slug the error refers to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Multiple offending field slugs, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// The offending queries in document form, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<serde_json::Value>>,
    /// Nested issues that caused this error.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<CompilerError>,
}

impl CompilerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            fields: None,
            queries: None,
            issues: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_queries(mut self, queries: Vec<serde_json::Value>) -> Self {
        self.queries = Some(queries);
        self
    }

    pub fn with_issue(mut self, issue: CompilerError) -> Self {
        self.issues.push(issue);
        self
    }

    pub fn model_not_found(slug: &str) -> Self {
        Self::new(
            ErrorCode::ModelNotFound,
            format!("No matching model with either slug or plural slug of \"{slug}\" could be found."),
        )
    }

    pub fn field_not_found(slug: &str, model_name: &str, source: &str) -> Self {
        Self::new(
            ErrorCode::FieldNotFound,
            format!(
                "Field \"{slug}\" defined for `{source}` instruction does not exist in model \"{model_name}\"."
            ),
        )
        .with_field(slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serialization() {
        let json = serde_json::to_value(ErrorCode::InvalidBeforeOrAfterInstruction).unwrap();
        assert_eq!(json, "INVALID_BEFORE_OR_AFTER_INSTRUCTION");
        let json = serde_json::to_value(ErrorCode::ModelNotFound).unwrap();
        assert_eq!(json, "MODEL_NOT_FOUND");
    }

    #[test]
    fn test_error_round_trip() {
        let err = CompilerError::model_not_found("account").with_field("account");
        let json = serde_json::to_value(&err).unwrap();
        let back: CompilerError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
