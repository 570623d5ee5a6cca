// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! Statement-level tests of the query compiler.

use once_cell::sync::Lazy;
use ronin_compiler::error::ErrorCode;
use ronin_compiler::model::Model;
use ronin_compiler::query::Query;
use ronin_compiler::{Transaction, TransactionOptions};
use serde_json::{json, Value};

static MODELS: Lazy<Vec<Model>> = Lazy::new(|| {
    vec![
        serde_json::from_value(json!({
            "slug": "account",
            "fields": {
                "handle": { "type": "string" },
            },
        }))
        .unwrap(),
        serde_json::from_value(json!({
            "slug": "team",
            "fields": {
                "handle": { "type": "string" },
                "locations": { "type": "json" },
            },
        }))
        .unwrap(),
        serde_json::from_value(json!({
            "slug": "member",
            "fields": {
                "account": { "type": "link", "target": "account" },
                "role": { "type": "string" },
            },
        }))
        .unwrap(),
    ]
});

fn query(document: Value) -> Query {
    serde_json::from_value(document).unwrap()
}

fn transaction(documents: Vec<Value>) -> Transaction {
    let _ = env_logger::builder().is_test(true).try_init();
    let queries: Vec<Query> = documents.into_iter().map(query).collect();
    Transaction::new(
        &queries,
        TransactionOptions {
            models: Some(MODELS.clone()),
            ..TransactionOptions::default()
        },
    )
    .unwrap()
}

fn compile_error(documents: Vec<Value>) -> ronin_compiler::CompilerError {
    let queries: Vec<Query> = documents.into_iter().map(query).collect();
    Transaction::new(
        &queries,
        TransactionOptions {
            models: Some(MODELS.clone()),
            ..TransactionOptions::default()
        },
    )
    .unwrap_err()
}

#[test]
fn test_simple_filtered_read() {
    let tx = transaction(vec![json!({
        "get": { "account": { "with": { "handle": "elaine" } } }
    })]);
    assert_eq!(tx.statements.len(), 1);
    let statement = &tx.statements[0];
    assert_eq!(
        statement.statement,
        "SELECT \"id\", \"ronin.createdAt\", \"ronin.createdBy\", \"ronin.updatedAt\", \
\"ronin.updatedBy\", \"handle\" FROM \"accounts\" WHERE \"handle\" = ?1 LIMIT 1"
    );
    assert_eq!(statement.params, vec![json!("elaine")]);
    assert!(statement.returning);
}

#[test]
fn test_json_nested_read() {
    let tx = transaction(vec![json!({
        "get": { "team": { "with": { "locations": { "europe": "berlin" } } } }
    })]);
    let statement = &tx.statements[0];
    assert!(statement
        .statement
        .contains("WHERE json_extract(locations, '$.europe') = ?1"));
    assert_eq!(statement.params, vec![json!("berlin")]);
}

#[test]
fn test_correlated_count_include() {
    let tx = transaction(vec![json!({
        "get": {
            "account": {
                "including": {
                    "memberAmount": {
                        "__RONIN_QUERY": {
                            "count": {
                                "members": {
                                    "with": {
                                        "account": {
                                            "__RONIN_EXPRESSION": "__RONIN_FIELD_PARENT_id"
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })]);
    let statement = &tx.statements[0];
    assert!(statement.statement.contains(
        "(SELECT (COUNT(*)) AS \"amount\" FROM \"members\" WHERE \"account\" = \
\"accounts\".\"id\") AS \"memberAmount\""
    ));
    assert!(!statement.statement.contains("JOIN"));
}

#[test]
fn test_multi_record_read_has_no_limit() {
    let tx = transaction(vec![json!({ "get": { "accounts": null } })]);
    let statement = &tx.statements[0];
    assert!(!statement.statement.contains("LIMIT"));
}

#[test]
fn test_limited_read_requests_lookahead_row() {
    let tx = transaction(vec![json!({
        "get": { "accounts": { "limitedTo": 2 } }
    })]);
    let statement = &tx.statements[0];
    assert!(statement.statement.ends_with("LIMIT 3"));
    // Cursor stability: the implicit ordering is added.
    assert!(statement
        .statement
        .contains("ORDER BY \"ronin.createdAt\" DESC"));
}

#[test]
fn test_count_statement() {
    let tx = transaction(vec![json!({ "count": { "accounts": null } })]);
    assert_eq!(
        tx.statements[0].statement,
        "SELECT (COUNT(*)) AS \"amount\" FROM \"accounts\""
    );
}

#[test]
fn test_set_statement() {
    let tx = transaction(vec![json!({
        "set": {
            "account": {
                "with": { "handle": "elaine" },
                "to": { "handle": "juri" },
            }
        }
    })]);
    let statement = &tx.statements[0];
    assert!(statement.statement.starts_with(
        "UPDATE \"accounts\" SET \"handle\" = ?1, \"ronin.updatedAt\" = \
strftime('%Y-%m-%dT%H:%M:%f', 'now') || 'Z' WHERE \"handle\" = ?2 RETURNING"
    ));
    assert_eq!(statement.params, vec![json!("juri"), json!("elaine")]);
}

#[test]
fn test_add_statement() {
    let tx = transaction(vec![json!({
        "add": { "account": { "to": { "handle": "juri" } } }
    })]);
    let statement = &tx.statements[0];
    assert!(statement.statement.starts_with(
        "INSERT INTO \"accounts\" (\"handle\", \"ronin.createdAt\", \"ronin.updatedAt\") \
VALUES (?1, strftime('%Y-%m-%dT%H:%M:%f', 'now') || 'Z', \
strftime('%Y-%m-%dT%H:%M:%f', 'now') || 'Z') RETURNING"
    ));
}

#[test]
fn test_add_with_inline_defaults() {
    let queries = vec![query(json!({
        "add": { "account": { "to": { "handle": "juri" } } }
    }))];
    let tx = Transaction::new(
        &queries,
        TransactionOptions {
            models: Some(MODELS.clone()),
            inline_defaults: true,
            ..TransactionOptions::default()
        },
    )
    .unwrap();
    let statement = &tx.statements[0];
    assert!(statement.statement.contains("\"id\""));
    let id = statement.params[1].as_str().unwrap();
    assert!(id.starts_with("acc_"));
    assert_eq!(id.len(), 20);
}

#[test]
fn test_remove_statement() {
    let tx = transaction(vec![json!({
        "remove": { "accounts": { "with": { "handle": { "endingWith": "test" } } } }
    })]);
    let statement = &tx.statements[0];
    assert!(statement
        .statement
        .starts_with("DELETE FROM \"accounts\" WHERE \"handle\" LIKE ?1 RETURNING"));
    assert_eq!(statement.params, vec![json!("%test")]);
}

#[test]
fn test_inline_params() {
    let queries = vec![query(json!({
        "get": { "account": { "with": { "handle": "o'hare" } } }
    }))];
    let tx = Transaction::new(
        &queries,
        TransactionOptions {
            models: Some(MODELS.clone()),
            inline_params: true,
            ..TransactionOptions::default()
        },
    )
    .unwrap();
    let statement = &tx.statements[0];
    assert!(statement.statement.contains("WHERE \"handle\" = 'o''hare'"));
    assert!(statement.params.is_empty());
}

#[test]
fn test_placeholders_cover_param_range() {
    let documents = vec![
        json!({ "get": { "accounts": { "with": [
            { "handle": { "being": ["a", "b"] } },
            { "handle": { "startingWith": "c" } },
        ] } } }),
        json!({ "set": { "account": {
            "with": { "handle": "elaine" },
            "to": { "handle": "juri" },
        } } }),
    ];
    let tx = transaction(documents);
    let placeholder = regex::Regex::new(r"\?(\d+)").unwrap();
    for statement in &tx.statements {
        let mut seen: Vec<usize> = placeholder
            .captures_iter(&statement.statement)
            .map(|c| c[1].parse().unwrap())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        let expected: Vec<usize> = (1..=statement.params.len()).collect();
        assert_eq!(seen, expected, "for {}", statement.statement);
    }
}

#[test]
fn test_or_groups_and_identifiers() {
    let tx = transaction(vec![json!({
        "get": { "accounts": { "with": [
            { "nameIdentifier": "elaine" },
            { "handle": { "notBeing": null } },
        ] } }
    })]);
    let statement = &tx.statements[0];
    assert!(statement
        .statement
        .contains("WHERE \"id\" = ?1 OR \"handle\" IS NOT NULL"));
}

#[test]
fn test_empty_with_produces_no_where() {
    let tx = transaction(vec![json!({ "get": { "accounts": { "with": [] } } })]);
    assert!(!tx.statements[0].statement.contains("WHERE"));

    let tx = transaction(vec![json!({
        "get": { "accounts": { "with": { "handle": [] } } }
    })]);
    assert!(!tx.statements[0].statement.contains("WHERE"));
}

#[test]
fn test_link_filter_through_related_record() {
    let tx = transaction(vec![json!({
        "get": { "members": { "with": { "account": { "handle": "elaine" } } } }
    })]);
    let statement = &tx.statements[0];
    assert!(statement.statement.contains(
        "WHERE \"account\" = (SELECT \"id\" FROM \"accounts\" WHERE \"handle\" = ?1 LIMIT 1)"
    ));
}

#[test]
fn test_join_includes_nested_records() {
    let tx = transaction(vec![json!({
        "get": {
            "account": {
                "including": {
                    "members": {
                        "__RONIN_QUERY": {
                            "get": {
                                "members": {
                                    "with": {
                                        "account": {
                                            "__RONIN_EXPRESSION": "__RONIN_FIELD_PARENT_id"
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })]);
    let statement = &tx.statements[0];
    assert!(statement
        .statement
        .contains("FROM (SELECT * FROM \"accounts\" LIMIT 1) AS \"sub_accounts\""));
    assert!(statement.statement.contains(
        "LEFT JOIN \"members\" AS \"including_members[0]\" ON \
(\"including_members[0]\".\"account\" = \"sub_accounts\".\"id\")"
    ));
}

#[test]
fn test_expand_all_compiles_per_model() {
    let tx = transaction(vec![json!({ "get": { "all": null } })]);
    assert_eq!(tx.statements.len(), 3);
    assert!(tx.statements.iter().all(|s| s.returning));
    let tables: Vec<bool> = ["\"accounts\"", "\"teams\"", "\"members\""]
        .iter()
        .map(|table| tx.statements.iter().any(|s| s.statement.contains(table)))
        .collect();
    assert_eq!(tables, vec![true, true, true]);
}

#[test]
fn test_expand_all_for_restriction() {
    let tx = transaction(vec![json!({
        "get": { "all": { "for": "member" } }
    })]);
    // `member` links to `account` only.
    assert_eq!(tx.statements.len(), 1);
    assert!(tx.statements[0].statement.contains("\"accounts\""));
}

#[test]
fn test_before_and_after_are_mutually_exclusive() {
    let err = compile_error(vec![json!({
        "get": { "accounts": { "before": "eyJ4IjoxfQ", "after": "eyJ4IjoxfQ", "limitedTo": 2 } }
    })]);
    assert_eq!(err.code, ErrorCode::MutuallyExclusiveInstructions);
}

#[test]
fn test_empty_cursor_is_missing() {
    let err = compile_error(vec![json!({
        "get": { "accounts": { "after": "", "limitedTo": 2 } }
    })]);
    assert_eq!(err.code, ErrorCode::MissingInstruction);
}

#[test]
fn test_cursor_on_single_record_query() {
    let err = compile_error(vec![json!({
        "get": { "account": { "after": "eyJ4IjoxfQ" } }
    })]);
    assert_eq!(err.code, ErrorCode::InvalidBeforeOrAfterInstruction);
}

#[test]
fn test_unknown_model_and_field() {
    let err = compile_error(vec![json!({ "get": { "crews": null } })]);
    assert_eq!(err.code, ErrorCode::ModelNotFound);
    assert!(err.queries.is_some());

    let err = compile_error(vec![json!({
        "get": { "account": { "with": { "nope": 1 } } }
    })]);
    assert_eq!(err.code, ErrorCode::FieldNotFound);
}

#[test]
fn test_selecting_restricts_columns() {
    let tx = transaction(vec![json!({
        "get": { "accounts": { "selecting": ["handle"] } }
    })]);
    assert_eq!(
        tx.statements[0].statement,
        "SELECT \"handle\" FROM \"accounts\""
    );
}
