//! Filter module contract.
//!
//! A module inspects one string and may rewrite it, set a flag/score, and
//! write into its per-invocation audit record. The built-in kinds are closed
//! over [`ModuleKind`]; user-defined modules plug in through the same
//! [`Module`] capability set via [`ModuleKind::Custom`].
//!
//! Callers never call [`Module::run`] directly; [`ModuleKind::invoke`] is
//! the single entry point. It resets transient state, races the body against
//! a cancellation token, swallows run failures into the audit record (the
//! original query is returned unchanged), and stamps the execution time on
//! every exit path.

mod http;
mod keyword;
mod regex;

pub use self::http::{HttpRequestConfig, HttpRequestFilter};
pub use self::keyword::KeywordFilter;
pub use self::regex::{RegexFilter, regex_flags};

use crate::audit::{AuditStatus, ModuleAuditLog, log_timestamp};
use crate::error::{ConfigError, ConfigResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────────
// ModuleCore
// ─────────────────────────────────────────────────────────────────────────────

/// Shared header embedded by every module kind: immutable configuration plus
/// the transient per-invocation state (flag, score, timing, audit record).
///
/// Transient state is cleared by [`reset`](ModuleCore::reset) at the start of
/// every invocation, so a cloned module never leaks a previous run.
#[derive(Debug, Clone)]
pub struct ModuleCore {
    name: String,
    description: String,
    audit: bool,
    default_flagged_response: String,
    id: Option<u32>,
    flag: bool,
    score: Option<f64>,
    exec_time_ms: Option<f64>,
    audit_log: ModuleAuditLog,
}

impl ModuleCore {
    pub fn new(
        name: impl Into<String>,
        default_flagged_response: impl Into<String>,
    ) -> ConfigResult<Self> {
        let name = name.into();
        crate::validate_name(&name)?;
        let audit_log = ModuleAuditLog::new(&name, None);
        Ok(Self {
            name,
            description: String::new(),
            audit: false,
            default_flagged_response: default_flagged_response.into(),
            id: None,
            flag: false,
            score: None,
            exec_time_ms: None,
            audit_log,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn audit_enabled(&self) -> bool {
        self.audit
    }

    pub fn set_audit(&mut self, audit: bool) {
        self.audit = audit;
    }

    pub fn default_flagged_response(&self) -> &str {
        &self.default_flagged_response
    }

    pub fn set_default_flagged_response(&mut self, response: impl Into<String>) {
        self.default_flagged_response = response.into();
    }

    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: u32) {
        self.id = Some(id);
        self.audit_log.id = Some(id);
    }

    pub fn flag(&self) -> bool {
        self.flag
    }

    pub fn set_flag(&mut self, flag: bool) {
        self.flag = flag;
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    pub fn set_score(&mut self, score: f64) {
        self.score = Some(score);
    }

    pub fn exec_time_ms(&self) -> Option<f64> {
        self.exec_time_ms
    }

    pub fn audit_log(&self) -> &ModuleAuditLog {
        &self.audit_log
    }

    /// Clear all transient state back to a fresh `noexec` record.
    pub fn reset(&mut self) {
        self.audit_log = ModuleAuditLog::new(&self.name, self.id);
        self.flag = false;
        self.score = None;
        self.exec_time_ms = None;
    }

    /// Write one detail entry into the record's `log` map.
    ///
    /// When auditing is disabled the write is dropped and the record status
    /// becomes [`AuditStatus::Disabled`].
    pub fn log_audit(&mut self, key: impl Into<String>, value: Value) {
        if !self.audit_gate() {
            return;
        }
        self.audit_log.log.insert(key.into(), value);
    }

    /// Merge a whole object into the `log` map (same gating as `log_audit`).
    pub fn merge_audit(&mut self, entries: serde_json::Map<String, Value>) {
        if !self.audit_gate() {
            return;
        }
        self.audit_log.log.extend(entries);
    }

    fn audit_gate(&mut self) -> bool {
        if !self.audit {
            self.audit_log.status = AuditStatus::Disabled;
            return false;
        }
        true
    }

    pub(crate) fn record_success(&mut self) {
        if !self.audit_gate() {
            return;
        }
        self.audit_log.status = AuditStatus::Success;
        self.audit_log.flag = Some(self.flag);
        self.audit_log.score = self.score;
        self.audit_log.logged_time = Some(log_timestamp());
    }

    pub(crate) fn record_error(&mut self, err: &anyhow::Error) {
        if !self.audit_gate() {
            return;
        }
        self.audit_log
            .log
            .insert("message".into(), json!(err.to_string()));
        self.audit_log
            .log
            .insert("chain".into(), json!(format!("{err:#}")));
        self.audit_log.status = AuditStatus::Error;
        self.audit_log.flag = Some(self.flag);
        self.audit_log.score = self.score;
        self.audit_log.logged_time = Some(log_timestamp());
    }

    pub(crate) fn note_cancelled(&mut self) {
        // Status intentionally stays `noexec`: a cancelled module never ran
        // to a verdict.
        self.log_audit("cancelled", json!(true));
    }

    pub(crate) fn record_exec_time(&mut self, elapsed_ms: f64) {
        self.exec_time_ms = Some(elapsed_ms);
        if !self.audit_gate() {
            return;
        }
        self.audit_log.execution_time_ms = Some(elapsed_ms);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module trait
// ─────────────────────────────────────────────────────────────────────────────

/// Capability set shared by every filter module.
///
/// Implementations provide [`run`](Module::run) and the [`ModuleCore`]
/// accessors; everything else has sane defaults. `run` must be deterministic
/// given its inputs and module state, must not touch state shared across
/// requests, and reports its verdict through `core_mut()` (`set_flag`,
/// `set_score`, `log_audit`).
#[async_trait]
pub trait Module: Send + Sync {
    fn core(&self) -> &ModuleCore;

    fn core_mut(&mut self) -> &mut ModuleCore;

    /// Inspect and optionally rewrite the query. Errors are swallowed by the
    /// invoke wrapper: the module is flagged, the chain is audited, and the
    /// original query continues through the pipe.
    async fn run(&mut self, query: &str) -> anyhow::Result<String>;

    /// Clear transient state. Kinds with per-run caches override this and
    /// must call through to `core_mut().reset()`.
    fn reset(&mut self) {
        self.core_mut().reset();
    }

    /// Human response used when this module flagged the content.
    /// Empty iff the module is not flagged.
    fn flagged_response(&self) -> String {
        if self.core().flag() {
            self.core().default_flagged_response().to_string()
        } else {
            String::new()
        }
    }

    /// Snapshot of the current audit record.
    fn audit_snapshot(&self) -> ModuleAuditLog {
        self.core().audit_log().clone()
    }

    /// Configuration snapshot used by `Executor::save`.
    fn config_value(&self) -> Value;

    /// Clone hook so pipe trees can be duplicated per request.
    fn clone_module(&self) -> Box<dyn Module>;
}

/// Single entry point wrapping [`Module::run`]: reset, timed execution,
/// cancellation race, and failure capture.
async fn invoke_module(module: &mut dyn Module, query: &str, cancel: &CancellationToken) -> String {
    module.reset();
    let start = Instant::now();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = module.run(query) => Some(result),
    };

    let output = match outcome {
        Some(Ok(output)) => {
            module.core_mut().record_success();
            output
        }
        Some(Err(err)) => {
            let core = module.core_mut();
            core.set_flag(true);
            core.record_error(&err);
            query.to_string()
        }
        None => {
            module.core_mut().note_cancelled();
            query.to_string()
        }
    };

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    module.core_mut().record_exec_time(elapsed_ms);
    output
}

// ─────────────────────────────────────────────────────────────────────────────
// ModuleKind
// ─────────────────────────────────────────────────────────────────────────────

/// Closed set of module kinds a pipe can hold, with `Custom` as the
/// extension point for user-defined filters.
pub enum ModuleKind {
    Keyword(KeywordFilter),
    Regex(RegexFilter),
    HttpRequest(HttpRequestFilter),
    Custom(Box<dyn Module>),
}

impl ModuleKind {
    fn as_module(&self) -> &dyn Module {
        match self {
            ModuleKind::Keyword(m) => m,
            ModuleKind::Regex(m) => m,
            ModuleKind::HttpRequest(m) => m,
            ModuleKind::Custom(m) => m.as_ref(),
        }
    }

    fn as_module_mut(&mut self) -> &mut dyn Module {
        match self {
            ModuleKind::Keyword(m) => m,
            ModuleKind::Regex(m) => m,
            ModuleKind::HttpRequest(m) => m,
            ModuleKind::Custom(m) => m.as_mut(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ModuleKind::Keyword(_) => "keyword_filter",
            ModuleKind::Regex(_) => "regex_filter",
            ModuleKind::HttpRequest(_) => "http_request_filter",
            ModuleKind::Custom(_) => "custom",
        }
    }

    /// Run the module on `query`. See [`Module::run`] for the contract; this
    /// wrapper is the only way pipes (and tests) execute a module.
    pub async fn invoke(&mut self, query: &str, cancel: &CancellationToken) -> String {
        invoke_module(self.as_module_mut(), query, cancel).await
    }

    pub fn name(&self) -> &str {
        self.as_module().core().name()
    }

    pub fn flag(&self) -> bool {
        self.as_module().core().flag()
    }

    pub fn score(&self) -> Option<f64> {
        self.as_module().core().score()
    }

    pub fn reset(&mut self) {
        self.as_module_mut().reset();
    }

    pub(crate) fn assign_id(&mut self, id: u32) {
        self.as_module_mut().core_mut().assign_id(id);
    }

    pub fn flagged_response(&self) -> String {
        self.as_module().flagged_response()
    }

    pub fn audit_snapshot(&self) -> ModuleAuditLog {
        self.as_module().audit_snapshot()
    }

    pub fn config_value(&self) -> Value {
        self.as_module().config_value()
    }
}

impl Clone for ModuleKind {
    fn clone(&self) -> Self {
        match self {
            ModuleKind::Keyword(m) => ModuleKind::Keyword(m.clone()),
            ModuleKind::Regex(m) => ModuleKind::Regex(m.clone()),
            ModuleKind::HttpRequest(m) => ModuleKind::HttpRequest(m.clone()),
            ModuleKind::Custom(m) => ModuleKind::Custom(m.clone_module()),
        }
    }
}

impl fmt::Debug for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleKind")
            .field("kind", &self.kind_name())
            .field("name", &self.name())
            .field("flag", &self.flag())
            .finish()
    }
}

impl From<KeywordFilter> for ModuleKind {
    fn from(m: KeywordFilter) -> Self {
        ModuleKind::Keyword(m)
    }
}

impl From<RegexFilter> for ModuleKind {
    fn from(m: RegexFilter) -> Self {
        ModuleKind::Regex(m)
    }
}

impl From<HttpRequestFilter> for ModuleKind {
    fn from(m: HttpRequestFilter) -> Self {
        ModuleKind::HttpRequest(m)
    }
}

/// Serializable summary of a triggered threshold bucket, shared by the
/// keyword and regex filters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredBucket {
    pub threshold: u32,
    pub count: usize,
    pub matched: Vec<String>,
}
