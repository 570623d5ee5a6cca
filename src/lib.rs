// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! # RONIN query compiler
//!
//! ## Requirements
//!
//! - Applications describe their data through models and address it with
//!   RONIN queries, a declarative, document-shaped query language.
//! - Queries must compile into plain SQLite statements that a thin driver
//!   can execute without understanding the query language, and the flat
//!   rows it returns must be turned back into nested records.
//!
//! ## Design
//!
//! The [`Transaction`] is the single entry point. Constructing one
//! compiles a batch of queries against a model list:
//!
//! ```ignore
//! let queries = vec![serde_json::from_value(json!({
//!     "get": { "accounts": { "with": { "handle": "elaine" } } }
//! }))?];
//! let transaction = Transaction::new(&queries, TransactionOptions {
//!     models: Some(models),
//!     ..TransactionOptions::default()
//! })?;
//! ```
//!
//! Every statement carries positional `?N` parameters and a `returning`
//! flag. The caller applies the whole batch as one database transaction
//! and feeds the raw rows back:
//!
//! ```ignore
//! let results = transaction.format_results(&raw_rows, false)?;
//! ```
//!
//! Schema changes travel through the same pipe: DDL-shaped queries
//! (`create.model`, `alter.model`, `drop.model`) compile into native DDL
//! plus an update of the self-describing `ronin_schema` table, and the
//! in-memory model list is kept in sync along the way.

mod compiler;
mod format;
mod helpers;
mod meta;
mod statement;
mod transaction;

pub mod error;
pub mod model;
pub mod query;

pub use compiler::selection::SelectedField;
pub use error::{CompilerError, ErrorCode, Result};
pub use helpers::{
    expression_value, EXPRESSION_SYMBOL, FIELD_PARENT_SYMBOL, FIELD_SYMBOL, QUERY_SYMBOL,
    VALUE_SYMBOL,
};
pub use model::system::{root_model, ROOT_MODEL_SLUG, ROOT_TABLE};
pub use statement::Statement;
pub use transaction::{FormattedResult, Transaction, TransactionOptions};
