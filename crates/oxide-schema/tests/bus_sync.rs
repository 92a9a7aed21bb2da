//! Integration tests for multi-table synchronization against SQLite.

mod common;

use std::sync::Arc;

use common::{execute, memory, texts};
use oxide_schema::prelude::*;
use oxide_schema::sorter;
use tokio_test::assert_ok;

async fn blog(db: &Database) -> Vec<Table> {
    let mut comments = db.table("comments").await.unwrap();
    comments.column("id").primary();
    comments.column("post_id").integer();
    comments.column("body").text().nullable(true);
    comments
        .references(&["post_id"], "posts", &["id"])
        .on_delete(ForeignKeyAction::Cascade);

    let mut posts = db.table("posts").await.unwrap();
    posts.column("id").primary();
    posts.column("title").string(255);

    vec![comments, posts]
}

#[test]
fn test_sort_places_referenced_tables_first() {
    let sorted = sorter::sort([
        ("comments", vec!["posts".to_string()]),
        ("posts", Vec::new()),
    ])
    .unwrap();
    assert_eq!(sorted, vec!["posts", "comments"]);
}

#[test]
fn test_sort_rejects_cycles() {
    let err = sorter::sort([("a", vec!["b".to_string()]), ("b", vec!["a".to_string()])])
        .unwrap_err();
    assert!(matches!(err, SchemaError::CircularDependency { .. }));
}

#[tokio::test]
async fn test_synchronize_creates_related_tables() {
    let db = memory().await.with_prefix("blog_");
    let mut tables = blog(&db).await;
    assert_ok!(db.synchronize(&mut tables).await);

    assert_eq!(db.table_names().await.unwrap(), vec!["comments", "posts"]);

    let comments = db.table("comments").await.unwrap();
    let fk = comments.state().foreign_keys.values().next().unwrap();
    assert_eq!(fk.foreign_table, "blog_posts");
    assert_eq!(fk.foreign_columns, vec!["id"]);
    assert_eq!(fk.on_delete, ForeignKeyAction::Cascade);
    assert_eq!(comments.dependencies(), vec!["posts"]);

    // Same declarations against the reflected schema: nothing to do.
    let tables = blog(&db).await;
    for table in &tables {
        assert!(!table.has_changes(DropUndeclared::ALL).unwrap());
    }
}

#[tokio::test]
async fn test_removed_foreign_key_is_dropped_before_columns() {
    let db = memory().await;

    let mut a = db.table("a").await.unwrap();
    a.column("id").primary();
    let mut b = db.table("b").await.unwrap();
    b.column("id").primary();
    b.column("a_id").integer();
    b.references(&["a_id"], "a", &["id"]);
    assert_ok!(db.synchronize(&mut [b, a]).await);
    execute(&db, "INSERT INTO a DEFAULT VALUES").await;
    execute(&db, "INSERT INTO b (a_id) VALUES (1)").await;

    // b keeps its own id only: the foreign key and its column both go.
    let mut b = db.table("b").await.unwrap();
    b.column("id");
    let mut a = db.table("a").await.unwrap();
    a.column("id");
    let mut tables = vec![b, a];
    assert_ok!(db.synchronize(&mut tables).await);

    let b = db.table("b").await.unwrap();
    assert!(b.state().foreign_keys.is_empty());
    assert!(b.state().indexes.is_empty());
    assert!(!b.state().has_column("a_id"));
    assert_eq!(texts(&db, "SELECT id FROM b").await.len(), 1);
    assert!(tables.iter().all(|t| t.initial().foreign_keys.is_empty()));
}

#[tokio::test]
async fn test_failure_leaves_every_table_untouched() {
    let db = memory().await;
    let mut tables = blog(&db).await;
    assert_ok!(db.synchronize(&mut tables).await);
    execute(&db, "INSERT INTO posts (title) VALUES ('same')").await;
    execute(&db, "INSERT INTO posts (title) VALUES ('same')").await;

    let mut tables = blog(&db).await;
    tables[0].column("approved").boolean();
    tables[1].index(&["title"]).unique(true);

    let err = db.synchronize(&mut tables).await.unwrap_err();
    assert!(matches!(err, SchemaError::Statement { .. }));
    assert_eq!(db.connection().transaction_level(), 0);

    let comments = db.table("comments").await.unwrap();
    assert!(!comments.state().has_column("approved"));
    assert!(tables[0].has_changes(DropUndeclared::NONE).unwrap());
}

#[tokio::test]
async fn test_tables_on_separate_connections() {
    let first = memory().await;
    let second = memory().await;
    assert!(!Arc::ptr_eq(first.connection(), second.connection()));

    let mut users = first.table("users").await.unwrap();
    users.column("id").primary();
    let mut logs = second.table("logs").await.unwrap();
    logs.column("id").primary();
    logs.column("message").text();

    assert_ok!(synchronize(&mut [users, logs]).await);
    assert_eq!(first.table_names().await.unwrap(), vec!["users"]);
    assert_eq!(second.table_names().await.unwrap(), vec!["logs"]);
}
