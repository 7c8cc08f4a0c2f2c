//! Sequential pipe: modules run in declaration order on the caller task,
//! each receiving the previous module's output.

use super::{FlaggingStrategy, PipeCore};
use crate::error::ConfigResult;
use crate::module::ModuleKind;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SequentialPipe {
    core: PipeCore,
    stop_on_flag: bool,
}

impl SequentialPipe {
    pub fn new(name: impl Into<String>, modules: Vec<ModuleKind>) -> ConfigResult<Self> {
        Ok(Self {
            core: PipeCore::new(name, modules, "sequential")?,
            stop_on_flag: false,
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

    /// Stop feeding later modules once one flags.
    pub fn with_stop_on_flag(mut self, stop_on_flag: bool) -> Self {
        self.stop_on_flag = stop_on_flag;
        self
    }

    pub(crate) fn core(&self) -> &PipeCore {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut PipeCore {
        &mut self.core
    }

    pub(crate) async fn run(&mut self, query: &str) -> anyhow::Result<String> {
        // The token is never cancelled here; sequential modules always run
        // to completion once started.
        let cancel = CancellationToken::new();
        let stop_on_flag = self.stop_on_flag;

        let mut current = query.to_string();
        for module in self.core.modules_mut() {
            current = module.invoke(&current, &cancel).await;
            if stop_on_flag && module.flag() {
                break;
            }
        }

        self.core.set_flag();
        Ok(current)
    }

    pub fn config_value(&self) -> Value {
        let mut value = self.core.config_value();
        value["stop_on_flag"] = json!(self.stop_on_flag);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::ScriptedModule;
    use super::*;
    use crate::audit::AuditStatus;
    use crate::pipe::Pipe;

    /// Output of module *i* is the input of module *i+1*.
    #[tokio::test]
    async fn output_threads_through_modules() {
        let mut pipe = Pipe::from(
            SequentialPipe::new(
                "chain",
                vec![
                    ScriptedModule::new("first").rewriting("first out").into_kind(),
                    ScriptedModule::new("second").rewriting("second out").into_kind(),
                ],
            )
            .unwrap()
            .with_audit(true),
        );

        let out = pipe.invoke("start").await;
        assert_eq!(out, "second out");

        let logs = pipe.audit_logs();
        assert_eq!(logs.status, AuditStatus::Success);
        assert_eq!(logs.log["input"], "start");
        assert_eq!(logs.log["output"], "second out");
    }

    /// With stop_on_flag the modules after the flagging one stay `noexec`.
    #[tokio::test]
    async fn stop_on_flag_skips_later_modules() {
        let mut pipe = Pipe::from(
            SequentialPipe::new(
                "chain",
                vec![
                    ScriptedModule::new("flagger").flagging().into_kind(),
                    ScriptedModule::new("skipped").rewriting("never").into_kind(),
                ],
            )
            .unwrap()
            .with_stop_on_flag(true),
        );

        let out = pipe.invoke("start").await;
        assert_eq!(out, "start");
        assert!(pipe.flag());

        let logs = pipe.audit_logs();
        assert_eq!(logs.modules[0].status, AuditStatus::Success);
        assert_eq!(logs.modules[1].status, AuditStatus::Noexec);
    }

    /// Audit records appear in declaration order.
    #[tokio::test]
    async fn audit_records_keep_declaration_order() {
        let mut pipe = Pipe::from(
            SequentialPipe::new(
                "chain",
                vec![
                    ScriptedModule::new("a").into_kind(),
                    ScriptedModule::new("b").into_kind(),
                    ScriptedModule::new("c").into_kind(),
                ],
            )
            .unwrap(),
        );
        pipe.invoke("x").await;

        let audit_logs = pipe.audit_logs();
        let names: Vec<&str> = audit_logs
            .modules
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
