//! SQLite-backed implementation of the audit store.

use crate::{AuditStoreError, AuditStoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Backoff schedule applied when SQLite reports lock contention.
pub const LOCK_RETRY_DELAYS: [Duration; 5] = [
    Duration::from_millis(50),
    Duration::from_millis(100),
    Duration::from_millis(200),
    Duration::from_millis(400),
    Duration::from_millis(800),
];

const REQUIRED_COLUMNS: [&str; 4] = ["uuid", "message_id", "content", "created_at"];

/// One persisted audit row, as returned by [`AuditStore::insert`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub uuid: String,
    pub message_id: String,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

/// SQLite audit sink. Cheap to clone; the pool is shared.
#[derive(Debug, Clone)]
pub struct AuditStore {
    pool: SqlitePool,
    table: String,
}

impl AuditStore {
    /// Connect and validate (or bootstrap) the schema.
    ///
    /// `db_uri` may be a `sqlite:` URI or a bare filesystem path, which is
    /// interpreted as a local SQLite file and created when missing.
    pub async fn connect(db_uri: &str, table_name: &str) -> AuditStoreResult<Self> {
        let options = if db_uri.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(db_uri)
                .map_err(|e| AuditStoreError::Connection(e.to_string()))?
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new()
                .filename(db_uri)
                .create_if_missing(true)
        };
        Self::connect_with(options, 5, table_name).await
    }

    /// In-memory store for tests and ephemeral deployments.
    ///
    /// Pinned to a single connection: every new in-memory connection would
    /// otherwise observe its own empty database.
    pub async fn in_memory(table_name: &str) -> AuditStoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AuditStoreError::Connection(e.to_string()))?;
        Self::connect_with(options, 1, table_name).await
    }

    async fn connect_with(
        options: SqliteConnectOptions,
        max_connections: u32,
        table_name: &str,
    ) -> AuditStoreResult<Self> {
        let table = validate_table_name(table_name)?;

        let options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AuditStoreError::Connection(e.to_string()))?;

        let store = Self { pool, table };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table and its `message_id` index when absent; otherwise
    /// validate that the existing schema is compatible.
    async fn ensure_schema(&self) -> AuditStoreResult<()> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(&self.table)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;

        if exists.is_none() {
            let ddl = format!(
                "CREATE TABLE {} (
                    uuid TEXT PRIMARY KEY,
                    message_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
                self.table
            );
            sqlx::query(&ddl).execute(&self.pool).await.map_err(map_sqlx)?;

            let index = format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_message_id ON {table}(message_id)",
                table = self.table
            );
            sqlx::query(&index)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;

            info!(table = %self.table, "created audit table and message_id index");
            return Ok(());
        }

        self.validate_schema().await
    }

    async fn validate_schema(&self) -> AuditStoreResult<()> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", self.table))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        let mut columns: HashMap<String, String> = HashMap::new();
        let mut primary_keys: HashSet<String> = HashSet::new();
        for row in &rows {
            let name: String = row.try_get("name").map_err(map_sqlx)?;
            let column_type: String = row.try_get("type").map_err(map_sqlx)?;
            let pk: i64 = row.try_get("pk").map_err(map_sqlx)?;
            if pk > 0 {
                primary_keys.insert(name.clone());
            }
            columns.insert(name, column_type);
        }

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !columns.contains_key(*c))
            .collect();
        if !missing.is_empty() {
            return Err(AuditStoreError::Schema(format!(
                "table '{}' is missing columns: {}",
                self.table,
                missing.join(", ")
            )));
        }

        for column in REQUIRED_COLUMNS {
            let column_type = columns.get(column).map(String::as_str).unwrap_or("");
            if !column_type_ok(column, column_type) {
                return Err(AuditStoreError::Schema(format!(
                    "column '{column}' has incompatible type '{column_type}'"
                )));
            }
        }

        if !primary_keys.contains("uuid") {
            return Err(AuditStoreError::Schema(
                "column 'uuid' must be the primary key (message_id may repeat)".to_string(),
            ));
        }

        Ok(())
    }

    /// Insert one row per entry, atomically, each with a fresh `uuid`.
    /// Returns the persisted records. Lock contention retries on the
    /// [`LOCK_RETRY_DELAYS`] schedule before surfacing as
    /// [`AuditStoreError::Busy`].
    pub async fn insert(
        &self,
        message_id: &str,
        entries: &[Value],
    ) -> AuditStoreResult<Vec<AuditRecord>> {
        let mut attempt = 0;
        loop {
            match self.insert_txn(message_id, entries).await {
                Err(AuditStoreError::Busy(_)) if attempt < LOCK_RETRY_DELAYS.len() => {
                    tokio::time::sleep(LOCK_RETRY_DELAYS[attempt]).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Convenience wrapper for a single entry.
    pub async fn insert_one(&self, message_id: &str, entry: Value) -> AuditStoreResult<AuditRecord> {
        let mut records = self.insert(message_id, std::slice::from_ref(&entry)).await?;
        Ok(records.remove(0))
    }

    async fn insert_txn(
        &self,
        message_id: &str,
        entries: &[Value],
    ) -> AuditStoreResult<Vec<AuditRecord>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let sql = format!(
            "INSERT INTO {} (uuid, message_id, content, created_at) VALUES (?, ?, ?, ?)",
            self.table
        );

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = AuditRecord {
                uuid: Uuid::new_v4().to_string(),
                message_id: message_id.to_string(),
                content: entry.clone(),
                created_at: Utc::now(),
            };
            let content = serde_json::to_string(entry)
                .map_err(|e| AuditStoreError::Serialization(e.to_string()))?;
            sqlx::query(&sql)
                .bind(&record.uuid)
                .bind(&record.message_id)
                .bind(content)
                .bind(record.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            records.push(record);
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(records)
    }

    /// Content values for one `message_id`, ordered by the `id` field inside
    /// the content (ascending); entries without an `id` sort last.
    pub async fn select(&self, message_id: &str) -> AuditStoreResult<Vec<Value>> {
        let sql = format!("SELECT content FROM {} WHERE message_id = ?", self.table);
        let rows: Vec<String> = sqlx::query_scalar(&sql)
            .bind(message_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        let mut items: Vec<Value> = rows
            .into_iter()
            .map(|content| {
                serde_json::from_str(&content).unwrap_or_else(|_| json!({ "raw": content }))
            })
            .collect();

        items.sort_by_key(|item| match item.get("id").and_then(Value::as_i64) {
            Some(id) => (false, id),
            None => (true, i64::MAX),
        });
        Ok(items)
    }

    /// Delete every row for `message_id`, returning the number removed.
    pub async fn delete(&self, message_id: &str) -> AuditStoreResult<u64> {
        let sql = format!("DELETE FROM {} WHERE message_id = ?", self.table);
        let result = sqlx::query(&sql)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Table names are interpolated into SQL, so only `^[A-Za-z_][A-Za-z0-9_]*$`
/// is accepted.
fn validate_table_name(name: &str) -> AuditStoreResult<String> {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_first || !valid_rest {
        return Err(AuditStoreError::InvalidTableName(name.to_string()));
    }
    Ok(name.to_string())
}

fn column_type_ok(column: &str, column_type: &str) -> bool {
    let ty = column_type.to_uppercase();
    let any = |options: &[&str]| options.iter().any(|o| ty.contains(o));
    match column {
        "uuid" => any(&["CHAR", "TEXT", "UUID"]),
        "message_id" => any(&["CHAR", "TEXT"]),
        "content" => any(&["JSON", "TEXT"]),
        "created_at" => any(&["TIMESTAMP", "DATETIME", "DATE"]),
        _ => false,
    }
}

fn map_sqlx(err: sqlx::Error) -> AuditStoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return AuditStoreError::Conflict(db.message().to_string());
        }
        let message = db.message().to_lowercase();
        if message.contains("database is locked") || message.contains("database table is locked") {
            return AuditStoreError::Busy(db.message().to_string());
        }
    }
    AuditStoreError::Query(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inserted content comes back equal, ordered by `content.id` with
    /// id-less entries last.
    #[tokio::test]
    async fn round_trips_and_orders_by_content_id() {
        let store = AuditStore::in_memory("audit_log").await.unwrap();

        let entries = vec![
            json!({ "id": 2, "name": "output screen" }),
            json!({ "name": "no id at all" }),
            json!({ "id": 1, "name": "input screen" }),
        ];
        let records = store.insert("m1", &entries).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.message_id == "m1"));

        let items = store.select("m1").await.unwrap();
        assert_eq!(items[0]["id"], 1);
        assert_eq!(items[1]["id"], 2);
        assert_eq!(items[2]["name"], "no id at all");
    }

    #[tokio::test]
    async fn message_ids_partition_rows() {
        let store = AuditStore::in_memory("audit_log").await.unwrap();
        store.insert("a", &[json!({ "id": 1 })]).await.unwrap();
        store
            .insert("b", &[json!({ "id": 1 }), json!({ "id": 2 })])
            .await
            .unwrap();

        assert_eq!(store.select("a").await.unwrap().len(), 1);
        assert_eq!(store.select("b").await.unwrap().len(), 2);
        assert_eq!(store.select("missing").await.unwrap().len(), 0);
    }

    /// Deleting twice reports `N` then `0`.
    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = AuditStore::in_memory("audit_log").await.unwrap();
        store
            .insert("m1", &[json!({ "id": 1 }), json!({ "id": 2 })])
            .await
            .unwrap();

        assert_eq!(store.delete("m1").await.unwrap(), 2);
        assert_eq!(store.delete("m1").await.unwrap(), 0);
        assert!(store.select("m1").await.unwrap().is_empty());
    }

    /// A bare path is treated as a local SQLite file, and reconnecting
    /// validates the schema instead of re-creating it.
    #[tokio::test]
    async fn bare_path_bootstraps_then_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let path = path.to_str().unwrap();

        {
            let store = AuditStore::connect(path, "audit_log").await.unwrap();
            store.insert("m1", &[json!({ "id": 1 })]).await.unwrap();
            store.close().await;
        }

        let store = AuditStore::connect(path, "audit_log").await.unwrap();
        assert_eq!(store.select("m1").await.unwrap().len(), 1);
    }

    /// An existing table whose `uuid` is not the primary key fails startup.
    #[tokio::test]
    async fn incompatible_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.db");
        let path = path.to_str().unwrap();

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE audit_log (
                uuid TEXT,
                message_id TEXT,
                content BLOB,
                created_at DATETIME
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;

        let err = AuditStore::connect(path, "audit_log").await.unwrap_err();
        assert!(matches!(err, AuditStoreError::Schema(_)));
    }

    #[tokio::test]
    async fn hostile_table_names_are_rejected() {
        for name in ["1starts_with_digit", "has space", "semi;colon", "", "a-b"] {
            let err = AuditStore::in_memory(name).await.unwrap_err();
            assert!(matches!(err, AuditStoreError::InvalidTableName(_)));
        }
    }

    /// Unparseable stored content degrades to `{"raw": ...}` instead of
    /// failing the read.
    #[tokio::test]
    async fn unparseable_content_degrades_to_raw() {
        let store = AuditStore::in_memory("audit_log").await.unwrap();
        let sql = "INSERT INTO audit_log (uuid, message_id, content) VALUES (?, ?, ?)";
        sqlx::query(sql)
            .bind("u1")
            .bind("m1")
            .bind("not json")
            .execute(&store.pool)
            .await
            .unwrap();

        let items = store.select("m1").await.unwrap();
        assert_eq!(items[0]["raw"], "not json");
    }
}
