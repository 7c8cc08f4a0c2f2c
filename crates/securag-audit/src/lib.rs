//! Durable audit store.
//!
//! One table keyed by row `uuid`, correlated by a caller-provided
//! `message_id`, holding JSON audit content:
//!
//! ```text
//! CREATE TABLE audit_log (
//!     uuid       TEXT PRIMARY KEY,
//!     message_id TEXT NOT NULL,          -- indexed, repeats per turn
//!     content    TEXT NOT NULL,          -- JSON
//!     created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
//! )
//! ```
//!
//! The store targets embedded SQLite deployments: WAL journal mode, a 5 s
//! per-connection busy timeout, and a bounded retry schedule on
//! lock-contention errors. All rows of one [`AuditStore::insert`] call
//! commit atomically.

mod store;

pub use store::{AuditRecord, AuditStore, LOCK_RETRY_DELAYS};

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuditStoreError {
    #[error("invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("schema validation failed: {0}")]
    Schema(String),

    /// Unique-constraint violation; surfaces as HTTP 409 at the gateway.
    #[error("audit record conflict: {0}")]
    Conflict(String),

    /// Lock contention that survived the retry schedule.
    #[error("database is locked: {0}")]
    Busy(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type AuditStoreResult<T> = Result<T, AuditStoreError>;
