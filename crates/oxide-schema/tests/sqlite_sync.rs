//! Integration tests for single-table synchronization against SQLite.
//!
//! Each test declares a table, saves it, and checks the result against a
//! fresh reflection of the database.

mod common;

use common::{declare_users, execute, memory, texts};
use oxide_schema::prelude::*;
use tokio_test::assert_ok;

// =============================================================================
// Diff basics
// =============================================================================

#[test]
fn test_empty_table_has_no_changes() {
    let users = TableState::new("users", "");
    assert!(!Comparator::new(&users, &users).has_changes());
}

#[tokio::test]
async fn test_added_nullable_column_is_the_only_change() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    declare_users(&mut users);
    assert_ok!(users.save(false, false, false).await);

    let mut users = db.table("users").await.unwrap();
    declare_users(&mut users);
    users.column("bio").text().nullable(true);

    let comparator = Comparator::new(users.initial(), users.state());
    let added: Vec<&str> = comparator
        .added_columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    assert_eq!(added, vec!["bio"]);
    assert!(comparator.dropped_columns().is_empty());
    assert!(comparator.altered_columns().is_empty());
}

// =============================================================================
// Round trip
// =============================================================================

#[tokio::test]
async fn test_save_then_reflect_is_idempotent() {
    let db = memory().await;

    let mut users = db.table("users").await.unwrap();
    declare_users(&mut users);
    let outcome = assert_ok!(users.save(true, true, true).await);
    assert!(outcome.created);
    assert!(!users.has_changes(DropUndeclared::ALL).unwrap());

    let mut reflected = db.table("users").await.unwrap();
    declare_users(&mut reflected);
    assert!(!reflected.has_changes(DropUndeclared::ALL).unwrap());
    assert!(reflected.plan(DropUndeclared::ALL).await.unwrap().is_empty());

    let status = reflected.state().column("status").unwrap();
    assert_eq!(status.abstract_type, Some(AbstractType::Enum));
    assert_eq!(status.enum_values, vec!["active", "banned"]);
    assert_eq!(status.default, DefaultValue::String("active".to_string()));
}

#[tokio::test]
async fn test_second_save_runs_nothing() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    declare_users(&mut users);
    assert_ok!(users.save(true, true, true).await);

    let outcome = assert_ok!(users.save(true, true, true).await);
    assert!(outcome.statements.is_empty());
}

// =============================================================================
// Defaults and altered columns
// =============================================================================

#[tokio::test]
async fn test_not_null_column_gets_empty_string_default() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    users.column("id").primary();
    users.column("email").string(255).nullable(true);
    assert_ok!(users.save(false, false, false).await);

    execute(&db, "INSERT INTO users (email) VALUES (NULL)").await;
    execute(&db, "INSERT INTO users (email) VALUES ('a@example.com')").await;

    users.column("email").nullable(false);
    assert_ok!(users.save(false, false, false).await);

    let reflected = db.table("users").await.unwrap();
    let email = reflected.state().column("email").unwrap();
    assert!(!email.nullable);
    assert_eq!(email.default, DefaultValue::String(String::new()));

    assert_eq!(
        texts(&db, "SELECT email FROM users ORDER BY id").await,
        vec![Some(String::new()), Some("a@example.com".to_string())]
    );
}

#[tokio::test]
async fn test_type_change_keeps_rows() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    users.column("id").primary();
    users.column("name").string(32);
    assert_ok!(users.save(false, false, false).await);
    execute(&db, "INSERT INTO users (name) VALUES ('ada')").await;

    users.column("name").string(128);
    let outcome = assert_ok!(users.save(false, false, false).await);
    assert!(outcome.rebuilt);

    let reflected = db.table("users").await.unwrap();
    assert_eq!(reflected.state().column("name").unwrap().size, Some(128));
    assert_eq!(
        texts(&db, "SELECT name FROM users").await,
        vec![Some("ada".to_string())]
    );
}

// =============================================================================
// Destructive changes
// =============================================================================

#[tokio::test]
async fn test_save_without_drops_keeps_undeclared_entities() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    declare_users(&mut users);
    assert_ok!(users.save(false, false, false).await);

    let mut users = db.table("users").await.unwrap();
    users.column("id");
    users.column("email");
    assert_ok!(users.save(false, false, false).await);

    let reflected = db.table("users").await.unwrap();
    assert!(reflected.state().has_column("balance"));
    assert!(reflected.state().has_column("created_at"));
    assert_eq!(reflected.state().indexes.len(), 1);
}

#[tokio::test]
async fn test_drop_undeclared_columns_and_indexes() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    declare_users(&mut users);
    assert_ok!(users.save(false, false, false).await);
    execute(&db, "INSERT INTO users (email) VALUES ('a@example.com')").await;

    let mut users = db.table("users").await.unwrap();
    users.column("id");
    users.column("email");
    assert_ok!(users.save(true, true, true).await);

    let reflected = db.table("users").await.unwrap();
    let columns: Vec<&str> = reflected.state().columns.keys().map(String::as_str).collect();
    assert_eq!(columns, vec!["id", "email"]);
    assert!(reflected.state().indexes.is_empty());
    assert_eq!(
        texts(&db, "SELECT email FROM users").await,
        vec![Some("a@example.com".to_string())]
    );
}

#[tokio::test]
async fn test_rename_column_keeps_data() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    users.column("id").primary();
    users.column("name").string(64);
    assert_ok!(users.save(false, false, false).await);
    execute(&db, "INSERT INTO users (name) VALUES ('grace')").await;

    assert_ok!(users.rename_column("name", "full_name"));
    assert_ok!(users.save(false, false, false).await);

    let reflected = db.table("users").await.unwrap();
    assert!(!reflected.state().has_column("name"));
    assert_eq!(
        texts(&db, "SELECT full_name FROM users").await,
        vec![Some("grace".to_string())]
    );
}

#[tokio::test]
async fn test_rename_and_drop_table() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    users.column("id").primary();
    assert_ok!(users.save(false, false, false).await);

    users.rename("members");
    assert_ok!(users.save(false, false, false).await);
    assert_eq!(db.table_names().await.unwrap(), vec!["members"]);

    users.drop();
    let outcome = assert_ok!(users.save(false, false, false).await);
    assert!(outcome.dropped);
    assert!(db.table_names().await.unwrap().is_empty());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_save_rolls_back() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    users.column("id").primary();
    users.column("email").string(255);
    assert_ok!(users.save(false, false, false).await);
    execute(&db, "INSERT INTO users (email) VALUES ('dup@example.com')").await;
    execute(&db, "INSERT INTO users (email) VALUES ('dup@example.com')").await;

    users.column("nickname").string(32).nullable(true);
    users.index(&["email"]).unique(true);
    let err = users.save(false, false, false).await.unwrap_err();
    assert!(matches!(err, SchemaError::Statement { .. }));

    let reflected = db.table("users").await.unwrap();
    assert!(!reflected.state().has_column("nickname"));
    assert!(reflected.state().indexes.is_empty());
    assert!(users.has_changes(DropUndeclared::NONE).unwrap());
    assert_eq!(db.connection().transaction_level(), 0);
}

#[tokio::test]
async fn test_primary_key_change_is_rejected() {
    let db = memory().await;
    let mut users = db.table("users").await.unwrap();
    users.column("id").primary();
    users.column("email").string(255);
    assert_ok!(users.save(false, false, false).await);

    let err = users.set_primary_keys(&["email"]).unwrap_err();
    assert!(matches!(err, SchemaError::PrimaryKeyChange { .. }));
}
