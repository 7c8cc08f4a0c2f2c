//! Threaded pipe: all modules run concurrently against the same input.
//!
//! Threaded pipes are screening pipes, not transformers: there is no
//! defined merge of parallel rewrites, so the pipe always returns its input
//! unchanged and only the flags, scores, and audit records aggregate.
//!
//! With `stop_on_flag`, the first completed module that flags cancels the
//! shared token: modules that have not yet acquired a worker slot never
//! start, and in-flight modules are cancelled at their next await point
//! (HTTP filters in particular abort mid-request). Cancelled modules keep
//! their `noexec` status; already-completed modules keep their results.

use super::{FlaggingStrategy, PipeCore};
use crate::error::ConfigResult;
use crate::module::ModuleKind;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_MAX_WORKERS: usize = 5;

#[derive(Debug, Clone)]
pub struct ThreadPipe {
    core: PipeCore,
    stop_on_flag: bool,
    max_workers: usize,
}

impl ThreadPipe {
    pub fn new(name: impl Into<String>, modules: Vec<ModuleKind>) -> ConfigResult<Self> {
        Ok(Self {
            core: PipeCore::new(name, modules, "threaded")?,
            stop_on_flag: false,
            max_workers: DEFAULT_MAX_WORKERS,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.core.description = description.into();
        self
    }

    pub fn with_audit(mut self, audit: bool) -> Self {
        self.core.audit = audit;
        self
    }

    pub fn with_flagging_strategy(mut self, strategy: FlaggingStrategy) -> Self {
        self.core.flagging_strategy = strategy;
        self
    }

    /// Cancel outstanding modules as soon as one flags.
    pub fn with_stop_on_flag(mut self, stop_on_flag: bool) -> Self {
        self.stop_on_flag = stop_on_flag;
        self
    }

    /// Bound on concurrently running modules (minimum 1).
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub(crate) fn core(&self) -> &PipeCore {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut PipeCore {
        &mut self.core
    }

    pub(crate) async fn run(&mut self, query: &str) -> anyhow::Result<String> {
        let cancel = CancellationToken::new();
        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for mut module in self.core.take_modules() {
            let query = query.to_string();
            let cancel = cancel.clone();
            let workers = Arc::clone(&workers);
            tasks.spawn(async move {
                // Hold a worker slot for the whole invocation. The permit can
                // only fail if the semaphore is closed, which never happens
                // while the pipe run owns it.
                let permit = workers.acquire_owned().await;
                if permit.is_ok() && !cancel.is_cancelled() {
                    module.invoke(&query, &cancel).await;
                }
                module
            });
        }

        // Collect in completion order; that order is also the audit order.
        let mut completed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(module) => {
                    if self.stop_on_flag && module.flag() {
                        cancel.cancel();
                    }
                    completed.push(module);
                }
                Err(err) => warn!(pipe = self.core.name(), error = %err, "module task failed"),
            }
        }
        self.core.put_modules(completed);
        self.core.set_flag();

        // Screening-only: parallel rewrites have no defined merge.
        Ok(query.to_string())
    }

    pub fn config_value(&self) -> Value {
        let mut value = self.core.config_value();
        value["stop_on_flag"] = json!(self.stop_on_flag);
        value["max_workers"] = json!(self.max_workers);
        value
    }
}
