//! Pipes: ordered module groups with a flag-aggregation policy.
//!
//! A pipe owns its modules exclusively; per-request isolation comes from
//! cloning whole pipe trees, never from sharing instances. Two scheduling
//! modes exist: [`SequentialPipe`] threads the text through its modules on
//! the caller task, [`ThreadPipe`] screens all modules concurrently against
//! the same input.

mod sequential;
mod threaded;

pub use sequential::SequentialPipe;
pub use threaded::ThreadPipe;

use crate::audit::{AuditStatus, PipeAuditLog, log_timestamp};
use crate::error::{ConfigError, ConfigResult};
use crate::module::ModuleKind;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::time::Instant;

/// How a pipe folds its modules' flags into its own after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlaggingStrategy {
    /// Flag when any module flagged (default).
    Any,
    /// Flag only when every module flagged. An empty pipe flags.
    All,
    /// The pipe body decides via [`Pipe::force_set_flag`].
    Manual,
}

// ─────────────────────────────────────────────────────────────────────────────
// PipeCore
// ─────────────────────────────────────────────────────────────────────────────

/// Shared pipe header: configuration, owned modules, and per-invocation
/// transient state. Mirrors [`ModuleCore`](crate::module::ModuleCore) one
/// level up.
#[derive(Debug, Clone)]
pub struct PipeCore {
    name: String,
    description: String,
    audit: bool,
    flagging_strategy: FlaggingStrategy,
    pipe_type: &'static str,
    id: Option<u32>,
    flag: bool,
    exec_time_ms: Option<f64>,
    audit_log: PipeAuditLog,
    modules: Vec<ModuleKind>,
}

impl PipeCore {
    fn new(
        name: impl Into<String>,
        modules: Vec<ModuleKind>,
        pipe_type: &'static str,
    ) -> ConfigResult<Self> {
        let name = name.into();
        crate::validate_name(&name)?;
        let audit_log = PipeAuditLog::new(&name, None, pipe_type);
        let mut core = Self {
            name,
            description: String::new(),
            audit: false,
            flagging_strategy: FlaggingStrategy::Any,
            pipe_type,
            id: None,
            flag: false,
            exec_time_ms: None,
            audit_log,
            modules,
        };
        core.initialize_modules()?;
        Ok(core)
    }

    /// Enforce unique module names and hand out 1-based ids in declaration
    /// order.
    fn initialize_modules(&mut self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for (index, module) in self.modules.iter_mut().enumerate() {
            if !names.insert(module.name().to_string()) {
                return Err(ConfigError::DuplicateModule {
                    pipe: self.name.clone(),
                    name: module.name().to_string(),
                });
            }
            module.assign_id(index as u32 + 1);
            module.reset();
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flag(&self) -> bool {
        self.flag
    }

    pub fn modules(&self) -> &[ModuleKind] {
        &self.modules
    }

    pub(crate) fn modules_mut(&mut self) -> &mut [ModuleKind] {
        &mut self.modules
    }

    pub(crate) fn take_modules(&mut self) -> Vec<ModuleKind> {
        std::mem::take(&mut self.modules)
    }

    pub(crate) fn put_modules(&mut self, modules: Vec<ModuleKind>) {
        self.modules = modules;
    }

    fn assign_id(&mut self, id: u32) {
        self.id = Some(id);
        self.audit_log.id = Some(id);
    }

    /// Clear transient state of the pipe and all of its modules.
    pub fn reset(&mut self) {
        self.audit_log = PipeAuditLog::new(&self.name, self.id, self.pipe_type);
        self.flag = false;
        self.exec_time_ms = None;
        for module in &mut self.modules {
            module.reset();
        }
    }

    /// Fold module flags into the pipe flag per the configured strategy.
    /// `Manual` leaves whatever [`force_set_flag`](Self::force_set_flag) set.
    pub(crate) fn set_flag(&mut self) {
        match self.flagging_strategy {
            FlaggingStrategy::Any => self.flag = self.modules.iter().any(|m| m.flag()),
            FlaggingStrategy::All => self.flag = self.modules.iter().all(|m| m.flag()),
            FlaggingStrategy::Manual => {}
        }
    }

    pub fn force_set_flag(&mut self, flag: bool) {
        self.flag = flag;
    }

    pub fn log_audit(&mut self, key: impl Into<String>, value: Value) {
        if !self.audit_gate() {
            return;
        }
        self.audit_log.log.insert(key.into(), value);
    }

    fn audit_gate(&mut self) -> bool {
        if !self.audit {
            self.audit_log.status = AuditStatus::Disabled;
            return false;
        }
        true
    }

    fn record_success(&mut self) {
        if !self.audit_gate() {
            return;
        }
        self.audit_log.status = AuditStatus::Success;
        self.audit_log.flag = Some(self.flag);
        self.audit_log.logged_time = Some(log_timestamp());
    }

    fn record_error(&mut self, err: &anyhow::Error) {
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
        self.audit_log.logged_time = Some(log_timestamp());
    }

    fn record_exec_time(&mut self, elapsed_ms: f64) {
        self.exec_time_ms = Some(elapsed_ms);
        if !self.audit_gate() {
            return;
        }
        self.audit_log.execution_time_ms = Some(elapsed_ms);
    }

    /// Snapshot of the pipe record with its module records embedded.
    pub fn audit_logs(&self) -> PipeAuditLog {
        let mut snapshot = self.audit_log.clone();
        snapshot.modules = self.modules.iter().map(|m| m.audit_snapshot()).collect();
        snapshot
    }

    /// Newline-joined responses of the flagged modules; empty when the pipe
    /// itself is not flagged.
    pub fn flagged_response(&self) -> String {
        if !self.flag {
            return String::new();
        }
        self.modules
            .iter()
            .filter(|m| m.flag())
            .map(|m| m.flagged_response())
            .filter(|r| !r.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn config_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "pipe_type": self.pipe_type,
            "audit": self.audit,
            "flagging_strategy": self.flagging_strategy,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipe
// ─────────────────────────────────────────────────────────────────────────────

/// A scheduling-mode-tagged pipe, as held by the executor.
#[derive(Debug, Clone)]
pub enum Pipe {
    Sequential(SequentialPipe),
    Threaded(ThreadPipe),
}

impl Pipe {
    pub(crate) fn core(&self) -> &PipeCore {
        match self {
            Pipe::Sequential(p) => p.core(),
            Pipe::Threaded(p) => p.core(),
        }
    }

    fn core_mut(&mut self) -> &mut PipeCore {
        match self {
            Pipe::Sequential(p) => p.core_mut(),
            Pipe::Threaded(p) => p.core_mut(),
        }
    }

    /// Run the pipe on `query`: reset, dispatch to the scheduling mode,
    /// capture status/flag/timing. An uncaught failure inside the pipe body
    /// returns the original query unchanged with the chain audited.
    pub async fn invoke(&mut self, query: &str) -> String {
        self.core_mut().reset();
        let start = Instant::now();

        let result = match self {
            Pipe::Sequential(p) => p.run(query).await,
            Pipe::Threaded(p) => p.run(query).await,
        };

        let output = match result {
            Ok(output) => {
                let core = self.core_mut();
                core.log_audit("input", json!(query));
                core.log_audit("output", json!(output));
                core.record_success();
                output
            }
            Err(err) => {
                let core = self.core_mut();
                core.record_error(&err);
                query.to_string()
            }
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.core_mut().record_exec_time(elapsed_ms);
        output
    }

    pub fn name(&self) -> &str {
        self.core().name()
    }

    pub fn flag(&self) -> bool {
        self.core().flag()
    }

    pub fn force_set_flag(&mut self, flag: bool) {
        self.core_mut().force_set_flag(flag);
    }

    pub(crate) fn assign_id(&mut self, id: u32) {
        self.core_mut().assign_id(id);
    }

    pub fn audit_logs(&self) -> PipeAuditLog {
        self.core().audit_logs()
    }

    pub fn flagged_response(&self) -> String {
        self.core().flagged_response()
    }

    pub fn modules(&self) -> &[ModuleKind] {
        self.core().modules()
    }

    pub fn config_value(&self) -> Value {
        match self {
            Pipe::Sequential(p) => p.config_value(),
            Pipe::Threaded(p) => p.config_value(),
        }
    }
}

impl From<SequentialPipe> for Pipe {
    fn from(p: SequentialPipe) -> Self {
        Pipe::Sequential(p)
    }
}

impl From<ThreadPipe> for Pipe {
    fn from(p: ThreadPipe) -> Self {
        Pipe::Threaded(p)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test helpers
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testutil {
    use crate::module::{Module, ModuleCore, ModuleKind};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::time::Duration;

    /// Scripted module for pipe tests.
    #[derive(Clone)]
    pub struct ScriptedModule {
        core: ModuleCore,
        pub flag: bool,
        pub rewrite: Option<String>,
        pub delay: Option<Duration>,
    }

    impl ScriptedModule {
        pub fn new(name: &str) -> Self {
            let mut core = ModuleCore::new(name, "The query was flagged.").unwrap();
            core.set_audit(true);
            Self {
                core,
                flag: false,
                rewrite: None,
                delay: None,
            }
        }

        pub fn flagging(mut self) -> Self {
            self.flag = true;
            self
        }

        pub fn rewriting(mut self, output: &str) -> Self {
            self.rewrite = Some(output.to_string());
            self
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn into_kind(self) -> ModuleKind {
            ModuleKind::Custom(Box::new(self))
        }
    }

    #[async_trait]
    impl Module for ScriptedModule {
        fn core(&self) -> &ModuleCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut ModuleCore {
            &mut self.core
        }
        async fn run(&mut self, query: &str) -> anyhow::Result<String> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.core.log_audit("input", json!(query));
            if self.flag {
                self.core.set_flag(true);
            }
            Ok(self.rewrite.clone().unwrap_or_else(|| query.to_string()))
        }
        fn config_value(&self) -> Value {
            json!({ "kind": "custom", "name": self.core.name() })
        }
        fn clone_module(&self) -> Box<dyn Module> {
            Box::new(self.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::ScriptedModule;
    use super::*;

    /// Strategy `any`: one flagging module flags the pipe.
    #[tokio::test]
    async fn any_strategy_flags_on_single_module() {
        let mut pipe = Pipe::from(
            SequentialPipe::new(
                "p",
                vec![
                    ScriptedModule::new("clean").into_kind(),
                    ScriptedModule::new("dirty").flagging().into_kind(),
                ],
            )
            .unwrap(),
        );
        pipe.invoke("text").await;
        assert!(pipe.flag());
    }

    /// Strategy `all`: every module must flag.
    #[tokio::test]
    async fn all_strategy_requires_every_module() {
        let mut pipe = Pipe::from(
            SequentialPipe::new(
                "p",
                vec![
                    ScriptedModule::new("a").flagging().into_kind(),
                    ScriptedModule::new("b").into_kind(),
                ],
            )
            .unwrap()
            .with_flagging_strategy(FlaggingStrategy::All),
        );
        pipe.invoke("text").await;
        assert!(!pipe.flag());
    }

    /// An empty pipe under `all` flags (vacuous truth).
    #[tokio::test]
    async fn all_strategy_on_empty_pipe_flags() {
        let mut pipe = Pipe::from(
            SequentialPipe::new("p", vec![])
                .unwrap()
                .with_flagging_strategy(FlaggingStrategy::All),
        );
        pipe.invoke("text").await;
        assert!(pipe.flag());
    }

    /// `manual` ignores module flags entirely.
    #[tokio::test]
    async fn manual_strategy_only_honors_forced_flag() {
        let mut pipe = Pipe::from(
            SequentialPipe::new("p", vec![ScriptedModule::new("dirty").flagging().into_kind()])
                .unwrap()
                .with_flagging_strategy(FlaggingStrategy::Manual),
        );
        pipe.invoke("text").await;
        assert!(!pipe.flag());

        pipe.force_set_flag(true);
        assert!(pipe.flag());
    }

    #[test]
    fn duplicate_module_names_rejected() {
        let result = SequentialPipe::new(
            "p",
            vec![
                ScriptedModule::new("same").into_kind(),
                ScriptedModule::new("same").into_kind(),
            ],
        );
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateModule { .. })
        ));
    }

    #[test]
    fn modules_get_declaration_order_ids() {
        let pipe = SequentialPipe::new(
            "p",
            vec![
                ScriptedModule::new("first").into_kind(),
                ScriptedModule::new("second").into_kind(),
            ],
        )
        .unwrap();
        let snapshot = pipe.core().audit_logs();
        assert_eq!(snapshot.modules[0].id, Some(1));
        assert_eq!(snapshot.modules[1].id, Some(2));
    }

    #[tokio::test]
    async fn flagged_response_joins_flagged_modules() {
        let mut pipe = Pipe::from(
            SequentialPipe::new(
                "p",
                vec![
                    ScriptedModule::new("a").flagging().into_kind(),
                    ScriptedModule::new("b").into_kind(),
                    ScriptedModule::new("c").flagging().into_kind(),
                ],
            )
            .unwrap(),
        );
        pipe.invoke("text").await;
        assert_eq!(
            pipe.flagged_response(),
            "The query was flagged.\nThe query was flagged."
        );
    }

    #[tokio::test]
    async fn unflagged_pipe_has_empty_response() {
        let mut pipe = Pipe::from(
            SequentialPipe::new("p", vec![ScriptedModule::new("a").into_kind()]).unwrap(),
        );
        pipe.invoke("text").await;
        assert_eq!(pipe.flagged_response(), "");
    }
}
