//! Audit record types emitted by modules and pipes.
//!
//! Every invocation of a module or pipe produces exactly one audit record.
//! Records are plain serde values so they round-trip through the audit store
//! unchanged: `serde_json::to_value` of a record, persisted and read back,
//! deserializes to an equal record.
//!
//! # Status machine
//!
//! ```text
//! noexec ──run──▶ success
//!    │               ▲
//!    ├──run panic/Err┴──▶ error
//!    └──audit disabled──▶ disabled   (any write while auditing is off)
//! ```
//!
//! `noexec` survives only when a module was never started (cancelled before
//! launch in a threaded pipe, or skipped by an early stop).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of one module or pipe invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    /// Not executed (initial state; kept by cancelled or skipped modules).
    Noexec,
    /// `run` returned normally.
    Success,
    /// `run` failed; the error chain is recorded in `log`.
    Error,
    /// Auditing is disabled for this instance; the record carries no detail.
    Disabled,
}

/// Audit record for a single module invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleAuditLog {
    pub name: String,
    /// 1-based position within the owning pipe, assigned at initialization.
    pub id: Option<u32>,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logged_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
    /// Free-form detail written by the module body (inputs, matches, failure
    /// reasons). Keys are module-specific.
    #[serde(default)]
    pub log: Map<String, Value>,
}

impl ModuleAuditLog {
    pub fn new(name: impl Into<String>, id: Option<u32>) -> Self {
        Self {
            name: name.into(),
            id,
            status: AuditStatus::Noexec,
            flag: None,
            score: None,
            logged_time: None,
            execution_time_ms: None,
            log: Map::new(),
        }
    }
}

/// Audit record for a single pipe invocation, embedding its module records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipeAuditLog {
    pub name: String,
    /// 1-based position within the executor, assigned at construction.
    pub id: Option<u32>,
    pub pipe_type: String,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logged_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
    #[serde(default)]
    pub log: Map<String, Value>,
    /// One record per module; declaration order for sequential pipes,
    /// completion order for threaded pipes.
    #[serde(default)]
    pub modules: Vec<ModuleAuditLog>,
}

impl PipeAuditLog {
    pub fn new(name: impl Into<String>, id: Option<u32>, pipe_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            pipe_type: pipe_type.into(),
            status: AuditStatus::Noexec,
            flag: None,
            logged_time: None,
            execution_time_ms: None,
            log: Map::new(),
            modules: Vec::new(),
        }
    }
}

/// Wall-clock stamp written into `logged_time` fields.
pub(crate) fn log_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
