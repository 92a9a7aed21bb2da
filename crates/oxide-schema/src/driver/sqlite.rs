//! SQLite connection over an `sqlx` pool.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row as _, Sqlite, Transaction, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Connection, DriverError, DriverResult, Row, Value};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite connection.
///
/// The pool is expected to hold a single connection. While a transaction is
/// open every statement runs on it; nested levels are savepoints.
#[derive(Debug)]
pub struct SqliteConnection {
    name: String,
    pool: SqlitePool,
    transaction: Mutex<Option<Transaction<'static, Sqlite>>>,
    level: AtomicUsize,
}

impl SqliteConnection {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(name: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            name: name.into(),
            pool,
            transaction: Mutex::new(None),
            level: AtomicUsize::new(0),
        }
    }

    /// Opens a database from a URL such as `sqlite:db.sqlite3` or
    /// `sqlite::memory:`, creating the file if needed.
    ///
    /// Foreign keys are not enforced on this connection so that tables can be
    /// rebuilt while other tables still reference them.
    pub async fn connect(url: &str) -> DriverResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self::new(url, pool))
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn savepoint(level: usize) -> String {
        format!("oxide_sp_{level}")
    }

    /// Leaves the innermost level and returns it. The level is released
    /// before the statement closing it runs, so a failed commit or rollback
    /// never leaves a level without a transaction behind it.
    fn close_level(&self) -> DriverResult<usize> {
        let level = self.level.load(Ordering::SeqCst);
        if level == 0 {
            return Err(DriverError::NoTransaction);
        }
        self.level.store(level - 1, Ordering::SeqCst);
        Ok(level)
    }
}

fn bind_param<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Integer(i) => query.bind(*i),
        Value::Real(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Blob(b) => query.bind(b.clone()),
    }
}

fn build<'q>(sql: &'q str, params: &[Value]) -> SqliteQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_param(query, value))
}

fn convert_row(row: &SqliteRow) -> DriverResult<Row> {
    let mut values = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get_unchecked(index)?),
                "REAL" | "NUMERIC" => Value::Real(row.try_get_unchecked(index)?),
                "BLOB" => Value::Blob(row.try_get_unchecked(index)?),
                _ => Value::Text(row.try_get_unchecked(index)?),
            }
        };
        values.insert(column.name().to_string(), value);
    }
    Ok(values)
}

#[async_trait]
impl Connection for SqliteConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        let query = build(sql, params);
        let mut transaction = self.transaction.lock().await;
        let result = match transaction.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>> {
        let query = build(sql, params);
        let mut transaction = self.transaction.lock().await;
        let rows = match transaction.as_mut() {
            Some(tx) => query.fetch_all(&mut **tx).await?,
            None => query.fetch_all(&self.pool).await?,
        };
        rows.iter().map(convert_row).collect()
    }

    async fn begin(&self) -> DriverResult<()> {
        let mut transaction = self.transaction.lock().await;
        let level = self.level.load(Ordering::SeqCst);
        match transaction.as_mut() {
            None => *transaction = Some(self.pool.begin().await?),
            Some(tx) => {
                let sql = format!("SAVEPOINT {}", Self::savepoint(level));
                sqlx::query(&sql).execute(&mut **tx).await?;
            }
        }
        self.level.store(level + 1, Ordering::SeqCst);
        debug!(connection = %self.name, level = level + 1, "Transaction opened");
        Ok(())
    }

    async fn commit(&self) -> DriverResult<()> {
        let mut transaction = self.transaction.lock().await;
        let level = self.close_level()?;
        match level {
            1 => {
                let tx = transaction.take().ok_or(DriverError::NoTransaction)?;
                tx.commit().await?;
            }
            _ => {
                let tx = transaction.as_mut().ok_or(DriverError::NoTransaction)?;
                let sql = format!("RELEASE SAVEPOINT {}", Self::savepoint(level - 1));
                sqlx::query(&sql).execute(&mut **tx).await?;
            }
        }
        debug!(connection = %self.name, level, "Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> DriverResult<()> {
        let mut transaction = self.transaction.lock().await;
        let level = self.close_level()?;
        match level {
            1 => {
                let tx = transaction.take().ok_or(DriverError::NoTransaction)?;
                tx.rollback().await?;
            }
            _ => {
                let tx = transaction.as_mut().ok_or(DriverError::NoTransaction)?;
                let savepoint = Self::savepoint(level - 1);
                sqlx::query(&format!("ROLLBACK TO SAVEPOINT {savepoint}"))
                    .execute(&mut **tx)
                    .await?;
                sqlx::query(&format!("RELEASE SAVEPOINT {savepoint}"))
                    .execute(&mut **tx)
                    .await?;
            }
        }
        debug!(connection = %self.name, level, "Transaction rolled back");
        Ok(())
    }

    fn transaction_level(&self) -> usize {
        self.level.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory() -> SqliteConnection {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        SqliteConnection::new("memory", pool)
    }

    async fn count(conn: &SqliteConnection) -> i64 {
        let rows = conn.query("SELECT COUNT(*) AS n FROM items", &[]).await.unwrap();
        rows[0]["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let conn = memory().await;
        conn.execute("CREATE TABLE items (id integer, name text, price real)", &[])
            .await
            .unwrap();
        let affected = conn
            .execute(
                "INSERT INTO items VALUES (?, ?, ?)",
                &[Value::Integer(1), Value::from("pen"), Value::Real(1.5)],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn
            .query("SELECT id, name, price, NULL AS missing FROM items", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::Integer(1));
        assert_eq!(rows[0]["name"], Value::from("pen"));
        assert_eq!(rows[0]["price"], Value::Real(1.5));
        assert!(rows[0]["missing"].is_null());
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let conn = memory().await;
        conn.execute("CREATE TABLE items (id integer)", &[]).await.unwrap();

        conn.begin().await.unwrap();
        conn.execute("INSERT INTO items VALUES (1)", &[]).await.unwrap();
        conn.rollback().await.unwrap();

        assert_eq!(count(&conn).await, 0);
        assert_eq!(conn.transaction_level(), 0);
    }

    #[tokio::test]
    async fn test_nested_levels_use_savepoints() {
        let conn = memory().await;
        conn.execute("CREATE TABLE items (id integer)", &[]).await.unwrap();

        conn.begin().await.unwrap();
        conn.execute("INSERT INTO items VALUES (1)", &[]).await.unwrap();
        conn.begin().await.unwrap();
        assert_eq!(conn.transaction_level(), 2);
        conn.execute("INSERT INTO items VALUES (2)", &[]).await.unwrap();
        conn.rollback().await.unwrap();
        conn.commit().await.unwrap();

        assert_eq!(count(&conn).await, 1);
    }

    #[tokio::test]
    async fn test_failed_commit_releases_the_level() {
        let conn = memory().await;
        conn.execute("CREATE TABLE parents (id integer PRIMARY KEY)", &[])
            .await
            .unwrap();
        conn.execute(
            "CREATE TABLE children (parent_id integer \
             REFERENCES parents (id) DEFERRABLE INITIALLY DEFERRED)",
            &[],
        )
        .await
        .unwrap();

        conn.begin().await.unwrap();
        conn.execute("INSERT INTO children VALUES (7)", &[]).await.unwrap();
        assert!(conn.commit().await.is_err());
        assert_eq!(conn.transaction_level(), 0);

        // The connection is usable again: a new transaction commits normally.
        conn.begin().await.unwrap();
        conn.execute("INSERT INTO parents VALUES (1)", &[]).await.unwrap();
        conn.commit().await.unwrap();
        assert_eq!(conn.transaction_level(), 0);

        let rows = conn.query("SELECT COUNT(*) AS n FROM children", &[]).await.unwrap();
        assert_eq!(rows[0]["n"].as_i64(), Some(0));
    }

    #[tokio::test]
    async fn test_commit_without_transaction_fails() {
        let conn = memory().await;
        assert!(matches!(
            conn.commit().await,
            Err(DriverError::NoTransaction)
        ));
    }
}
