#![allow(dead_code)]

use oxide_schema::prelude::*;

pub async fn memory() -> Database {
    Database::sqlite("sqlite::memory:")
        .await
        .unwrap_or_else(|e| panic!("Failed to open in-memory database: {e}"))
}

pub async fn execute(db: &Database, sql: &str) {
    db.connection()
        .execute(sql, &[])
        .await
        .unwrap_or_else(|e| panic!("Failed to execute: {sql}\nError: {e}"));
}

pub async fn texts(db: &Database, sql: &str) -> Vec<Option<String>> {
    db.connection()
        .query(sql, &[])
        .await
        .unwrap_or_else(|e| panic!("Failed to query: {sql}\nError: {e}"))
        .into_iter()
        .map(|row| {
            row.values()
                .next()
                .and_then(|value| value.as_str().map(str::to_string))
        })
        .collect()
}

/// Declares the `users` table used across the tests.
pub fn declare_users(users: &mut Table) {
    users.column("id").primary();
    users.column("email").string(255);
    users.column("name").string(64).nullable(true);
    users.column("active").boolean().default_value(DefaultValue::Bool(true));
    users.column("score").double().default_value(DefaultValue::Float(1.5));
    users.column("balance").decimal(10, 2).nullable(true);
    users.column("status").enumeration(["active", "banned"]);
    users
        .column("created_at")
        .datetime()
        .default_value(DefaultValue::Expression("CURRENT_TIMESTAMP".to_string()));
    users.index(&["email"]).unique(true);
}
