// SPDX-FileCopyrightText: © 2024 RONIN <hello@ronin.co>

//! Tests of the meta-query transformer: DDL statements, `ronin_schema`
//! bookkeeping and in-memory model reconciliation.

use ronin_compiler::error::ErrorCode;
use ronin_compiler::query::Query;
use ronin_compiler::{Transaction, TransactionOptions};
use serde_json::{json, Value};

fn queries(documents: Vec<Value>) -> Vec<Query> {
    documents
        .into_iter()
        .map(|document| serde_json::from_value(document).unwrap())
        .collect()
}

fn transaction(documents: Vec<Value>) -> Transaction {
    Transaction::new(&queries(documents), TransactionOptions::default()).unwrap()
}

fn transaction_error(documents: Vec<Value>) -> ronin_compiler::CompilerError {
    Transaction::new(&queries(documents), TransactionOptions::default()).unwrap_err()
}

#[test]
fn test_create_model() {
    let tx = transaction(vec![json!({
        "create": { "model": { "slug": "account", "fields": { "handle": { "type": "string" } } } }
    })]);

    assert_eq!(tx.statements.len(), 2);
    assert_eq!(
        tx.statements[0].statement,
        "CREATE TABLE \"accounts\" (\
\"id\" TEXT PRIMARY KEY DEFAULT ('acc_' || lower(substr(hex(randomblob(12)), 1, 16))), \
\"ronin.createdAt\" DATETIME DEFAULT (strftime('%Y-%m-%dT%H:%M:%f', 'now') || 'Z'), \
\"ronin.createdBy\" TEXT, \
\"ronin.updatedAt\" DATETIME DEFAULT (strftime('%Y-%m-%dT%H:%M:%f', 'now') || 'Z'), \
\"ronin.updatedBy\" TEXT, \
\"handle\" TEXT)"
    );
    assert!(!tx.statements[0].returning);

    let insert = &tx.statements[1];
    assert!(insert.statement.starts_with("INSERT INTO \"ronin_schema\""));
    assert!(insert.statement.contains("RETURNING"));
    assert!(insert.returning);
    assert_eq!(insert.params[0], json!("account"));
    assert_eq!(insert.params[1], json!("accounts"));
    assert_eq!(insert.params[4], json!("acc"));
    assert_eq!(insert.params[5], json!("accounts"));
    assert_eq!(insert.params[6], json!("id"));
    assert_eq!(insert.params[7], json!("id"));

    let fields: Value = serde_json::from_str(insert.params[8].as_str().unwrap()).unwrap();
    let slugs: Vec<&String> = fields.as_object().unwrap().keys().collect();
    assert_eq!(
        slugs,
        [
            "id",
            "ronin.createdAt",
            "ronin.createdBy",
            "ronin.updatedAt",
            "ronin.updatedBy",
            "handle"
        ]
    );

    // The transaction exposes the updated model list with defaults applied.
    let account = tx.models.iter().find(|m| m.slug == "account").unwrap();
    assert_eq!(account.plural_slug(), "accounts");
    assert_eq!(account.table(), "accounts");
    assert_eq!(account.identifiers().name, "id");
    assert!(account.fields.contains_key("ronin.updatedBy"));
}

#[test]
fn test_create_model_with_many_link() {
    let tx = transaction(vec![json!({
        "create": { "model": {
            "slug": "account",
            "fields": {
                "followers": { "type": "link", "target": "account", "kind": "many" },
            },
        } }
    })]);

    assert_eq!(tx.statements.len(), 3);
    let account_table = &tx.statements[0].statement;
    assert!(account_table.starts_with("CREATE TABLE \"accounts\""));
    assert!(!account_table.contains("followers"));

    let association_table = &tx.statements[1].statement;
    assert!(association_table.starts_with("CREATE TABLE \"ronin_link_account_followers\""));
    assert!(association_table.contains(
        "\"source\" TEXT NOT NULL REFERENCES \"accounts\" (\"id\") \
ON DELETE CASCADE ON UPDATE CASCADE"
    ));
    assert!(association_table.contains(
        "\"target\" TEXT NOT NULL REFERENCES \"accounts\" (\"id\") \
ON DELETE CASCADE ON UPDATE CASCADE"
    ));

    assert!(tx.statements[2].statement.starts_with("INSERT INTO \"ronin_schema\""));

    // The association model exists in memory, the column does not.
    let association = tx
        .models
        .iter()
        .find(|m| m.slug == "roninLinkAccountFollowers")
        .unwrap();
    assert_eq!(association.system.as_ref().unwrap().model, "account");
    assert_eq!(
        association.system.as_ref().unwrap().association_slug.as_deref(),
        Some("followers")
    );
}

#[test]
fn test_create_model_with_index() {
    let tx = transaction(vec![json!({
        "create": { "model": {
            "slug": "account",
            "fields": { "email": { "type": "string" } },
            "indexes": { "byEmail": { "fields": [{ "slug": "email" }], "unique": true } },
        } }
    })]);
    assert!(tx
        .statements
        .iter()
        .any(|s| s.statement == "CREATE UNIQUE INDEX \"by_email\" ON \"accounts\" (\"email\")"));
}

#[test]
fn test_root_model_bootstrap() {
    let tx = Transaction::new(
        &[Query::Create {
            model: ronin_compiler::root_model(),
        }],
        TransactionOptions::default(),
    )
    .unwrap();
    // Only the CREATE TABLE; no row is written for the root model itself.
    assert_eq!(tx.statements.len(), 1);
    let statement = &tx.statements[0].statement;
    assert!(statement.starts_with("CREATE TABLE \"ronin_schema\""));
    assert!(statement.contains("\"fields\" TEXT DEFAULT '{}'"));
    assert!(statement.contains("\"identifiers.name\" TEXT"));
    assert!(!tx.statements[0].returning);
}

#[test]
fn test_alter_model_rename() {
    let tx = transaction(vec![
        json!({ "create": { "model": {
            "slug": "account",
            "fields": {
                "followers": { "type": "link", "target": "account", "kind": "many" },
            },
        } } }),
        json!({ "alter": { "model": "account", "to": { "slug": "user" } } }),
    ]);

    let statements: Vec<&str> = tx
        .statements
        .iter()
        .map(|s| s.statement.as_str())
        .collect();
    assert!(statements.contains(&"ALTER TABLE \"accounts\" RENAME TO \"users\""));
    assert!(statements.contains(
        &"ALTER TABLE \"ronin_link_account_followers\" RENAME TO \"ronin_link_user_followers\""
    ));
    let update = tx
        .statements
        .iter()
        .find(|s| s.statement.starts_with("UPDATE \"ronin_schema\""))
        .unwrap();
    assert!(update.statement.contains("WHERE \"slug\" = "));
    assert!(update.params.contains(&json!("user")));
    assert!(update.params.contains(&json!("account")));

    assert!(tx.models.iter().any(|m| m.slug == "user"));
    assert!(tx.models.iter().any(|m| m.slug == "roninLinkUserFollowers"));
    assert!(!tx.models.iter().any(|m| m.slug == "account"));
}

#[test]
fn test_alter_create_field() {
    let tx = transaction(vec![
        json!({ "create": { "model": { "slug": "account" } } }),
        json!({ "alter": {
            "model": "account",
            "create": { "field": { "slug": "email", "type": "string" } },
        } }),
    ]);
    let statements: Vec<&str> = tx
        .statements
        .iter()
        .map(|s| s.statement.as_str())
        .collect();
    assert!(statements.contains(&"ALTER TABLE \"accounts\" ADD COLUMN \"email\" TEXT"));
    let update = tx
        .statements
        .iter()
        .find(|s| s.statement.starts_with("UPDATE \"ronin_schema\""))
        .unwrap();
    assert!(update.statement.contains(
        "SET \"fields\" = json_insert(\"fields\", '$.email', '{\"type\":\"string\"}')"
    ));

    let account = tx.models.iter().find(|m| m.slug == "account").unwrap();
    assert!(account.fields.contains_key("email"));
}

#[test]
fn test_alter_rename_field() {
    let tx = transaction(vec![
        json!({ "create": { "model": {
            "slug": "account",
            "fields": { "email": { "type": "string" } },
        } } }),
        json!({ "alter": {
            "model": "account",
            "alter": { "field": "email", "to": { "slug": "contact" } },
        } }),
    ]);
    let statements: Vec<&str> = tx
        .statements
        .iter()
        .map(|s| s.statement.as_str())
        .collect();
    assert!(
        statements.contains(&"ALTER TABLE \"accounts\" RENAME COLUMN \"email\" TO \"contact\"")
    );
    let update = tx
        .statements
        .iter()
        .find(|s| s.statement.starts_with("UPDATE \"ronin_schema\""))
        .unwrap();
    assert!(update.statement.contains("json_remove(\"fields\", '$.email')"));
    assert!(update.statement.contains("'$.contact'"));

    let account = tx.models.iter().find(|m| m.slug == "account").unwrap();
    assert!(account.fields.contains_key("contact"));
    assert!(!account.fields.contains_key("email"));
}

#[test]
fn test_drop_field() {
    let tx = transaction(vec![
        json!({ "create": { "model": {
            "slug": "account",
            "fields": { "email": { "type": "string" } },
        } } }),
        json!({ "alter": { "model": "account", "drop": { "field": "email" } } }),
    ]);
    let statements: Vec<&str> = tx
        .statements
        .iter()
        .map(|s| s.statement.as_str())
        .collect();
    assert!(statements.contains(&"ALTER TABLE \"accounts\" DROP COLUMN \"email\""));
    let update = tx
        .statements
        .iter()
        .filter(|s| s.statement.starts_with("UPDATE \"ronin_schema\""))
        .last()
        .unwrap();
    assert!(update
        .statement
        .contains("SET \"fields\" = json_remove(\"fields\", '$.email')"));
}

#[test]
fn test_drop_model() {
    let tx = transaction(vec![
        json!({ "create": { "model": {
            "slug": "account",
            "fields": {
                "followers": { "type": "link", "target": "account", "kind": "many" },
            },
        } } }),
        json!({ "drop": { "model": "account" } }),
    ]);
    let statements: Vec<&str> = tx
        .statements
        .iter()
        .map(|s| s.statement.as_str())
        .collect();
    assert!(statements.contains(&"DROP TABLE \"accounts\""));
    assert!(statements.contains(&"DROP TABLE \"ronin_link_account_followers\""));
    assert!(statements
        .iter()
        .any(|s| s.starts_with("DELETE FROM \"ronin_schema\" WHERE \"slug\" = ")));
    assert!(tx.models.is_empty());
}

#[test]
fn test_preset_round_trip_through_schema() {
    let tx = transaction(vec![
        json!({ "create": { "model": {
            "slug": "account",
            "fields": { "active": { "type": "boolean" } },
        } } }),
        json!({ "alter": {
            "model": "account",
            "create": { "preset": {
                "slug": "activeOnes",
                "instructions": { "with": { "active": true } },
            } },
        } }),
    ]);
    let update = tx
        .statements
        .iter()
        .find(|s| s.statement.contains("json_insert(\"presets\""))
        .unwrap();
    assert!(update.statement.contains("'$.activeOnes'"));

    let account = tx.models.iter().find(|m| m.slug == "account").unwrap();
    assert!(account.presets.contains_key("activeOnes"));
}

#[test]
fn test_list_models() {
    let tx = transaction(vec![json!({ "list": { "models": null } })]);
    assert_eq!(tx.statements.len(), 1);
    let statement = &tx.statements[0];
    assert!(statement.statement.starts_with("SELECT"));
    assert!(statement.statement.contains("FROM \"ronin_schema\""));
    assert!(statement.returning);
}

#[test]
fn test_meta_error_cases() {
    let err = transaction_error(vec![
        json!({ "create": { "model": { "slug": "account" } } }),
        json!({ "create": { "model": { "slug": "account" } } }),
    ]);
    assert_eq!(err.code, ErrorCode::ExistingModelEntity);

    let err = transaction_error(vec![
        json!({ "create": { "model": { "slug": "account" } } }),
        json!({ "alter": { "model": "account", "drop": { "field": "id" } } }),
    ]);
    assert_eq!(err.code, ErrorCode::RequiredModelEntity);

    let err = transaction_error(vec![
        json!({ "create": { "model": { "slug": "account" } } }),
        json!({ "alter": { "model": "account", "drop": { "field": "nope" } } }),
    ]);
    assert_eq!(err.code, ErrorCode::FieldNotFound);

    let err = transaction_error(vec![
        json!({ "create": { "model": { "slug": "account" } } }),
        json!({ "alter": { "model": "account", "drop": { "index": "nope" } } }),
    ]);
    assert_eq!(err.code, ErrorCode::IndexNotFound);

    let err = transaction_error(vec![
        json!({ "create": { "model": { "slug": "account" } } }),
        json!({ "alter": { "model": "account", "drop": { "preset": "nope" } } }),
    ]);
    assert_eq!(err.code, ErrorCode::PresetNotFound);

    let err = transaction_error(vec![json!({ "create": { "model": {
        "slug": "account",
        "indexes": { "broken": { "fields": [] } },
    } } })]);
    assert_eq!(err.code, ErrorCode::InvalidModelValue);
    assert_eq!(err.field.as_deref(), Some("indexes"));

    let err = transaction_error(vec![json!({ "create": { "model": {
        "slug": "account",
        "fields": { "settings": { "type": "json", "defaultValue": 5 } },
    } } })]);
    assert_eq!(err.code, ErrorCode::InvalidModelValue);
    assert_eq!(err.field.as_deref(), Some("fields"));

    let err = transaction_error(vec![json!({ "drop": { "model": "missing" } })]);
    assert_eq!(err.code, ErrorCode::ModelNotFound);
}

#[test]
fn test_ddl_then_dml_in_one_batch() {
    let tx = transaction(vec![
        json!({ "create": { "model": {
            "slug": "account",
            "fields": { "handle": { "type": "string" } },
        } } }),
        json!({ "add": { "account": { "to": { "handle": "elaine" } } } }),
    ]);
    // The insert compiles against the model created one query earlier.
    let last = tx.statements.last().unwrap();
    assert!(last.statement.starts_with("INSERT INTO \"accounts\""));
}
