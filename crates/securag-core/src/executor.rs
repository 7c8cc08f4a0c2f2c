//! Top-level coordinator: input and output pipe chains.
//!
//! The executor owns two ordered chains of pipes. Input text flows through
//! the input chain pipe by pipe (each pipe's output feeds the next); model
//! replies flow through the output chain the same way. With `raise_on_flag`,
//! a flagging pipe stops the chain as soon as it completes and the run
//! surfaces [`ExecutorError::FlaggedInput`] / [`FlaggedOutput`].
//!
//! Executors are cheap to clone; gateway handlers clone the configured
//! template per request so transient audit state never crosses requests.

use crate::audit::PipeAuditLog;
use crate::error::ExecutorError;
use crate::pipe::Pipe;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Executor {
    input_pipes: Vec<Pipe>,
    output_pipes: Vec<Pipe>,
    raise_on_flag: bool,
}

impl Executor {
    /// Assemble an executor. Pipe ids are handed out continuously across the
    /// input then output chains, so one run's audit records carry a total
    /// order usable for readback sorting.
    pub fn new(input_pipes: Vec<Pipe>, output_pipes: Vec<Pipe>, raise_on_flag: bool) -> Self {
        let mut executor = Self {
            input_pipes,
            output_pipes,
            raise_on_flag,
        };
        let mut next_id = 1;
        for pipe in executor
            .input_pipes
            .iter_mut()
            .chain(executor.output_pipes.iter_mut())
        {
            pipe.assign_id(next_id);
            next_id += 1;
        }
        executor
    }

    pub fn input_pipes(&self) -> &[Pipe] {
        &self.input_pipes
    }

    pub fn output_pipes(&self) -> &[Pipe] {
        &self.output_pipes
    }

    /// Run `text` through the input chain.
    pub async fn execute_inputs(&mut self, text: &str) -> Result<String, ExecutorError> {
        let mut current = text.to_string();
        for pipe in &mut self.input_pipes {
            current = pipe.invoke(&current).await;
            if self.raise_on_flag && pipe.flag() {
                return Err(ExecutorError::FlaggedInput);
            }
        }
        Ok(current)
    }

    /// Run `text` through the output chain.
    pub async fn execute_outputs(&mut self, text: &str) -> Result<String, ExecutorError> {
        let mut current = text.to_string();
        for pipe in &mut self.output_pipes {
            current = pipe.invoke(&current).await;
            if self.raise_on_flag && pipe.flag() {
                return Err(ExecutorError::FlaggedOutput);
            }
        }
        Ok(current)
    }

    /// Snapshot of the full audit tree: every pipe record (input chain first)
    /// with its module records embedded.
    pub fn get_logs(&self) -> Vec<PipeAuditLog> {
        self.input_pipes
            .iter()
            .chain(self.output_pipes.iter())
            .map(|p| p.audit_logs())
            .collect()
    }

    pub fn input_flagged(&self) -> bool {
        self.input_pipes.iter().any(|p| p.flag())
    }

    pub fn output_flagged(&self) -> bool {
        self.output_pipes.iter().any(|p| p.flag())
    }

    /// Newline-joined responses of the flagged input pipes.
    pub fn input_flagged_response(&self) -> String {
        joined_response(&self.input_pipes)
    }

    pub fn output_flagged_response(&self) -> String {
        joined_response(&self.output_pipes)
    }

    /// Best-effort dump of the configured pipeline to a directory tree:
    /// one directory per pipe holding `pipe.json` plus one JSON file per
    /// module. Runtime state is not serialized.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        for (chain, pipes) in [
            ("input_pipes", &self.input_pipes),
            ("output_pipes", &self.output_pipes),
        ] {
            for pipe in pipes {
                let pipe_dir = path.join(chain).join(pipe.name());
                fs::create_dir_all(&pipe_dir)?;
                write_json(&pipe_dir.join("pipe.json"), &pipe.config_value())?;
                for module in pipe.modules() {
                    let file = pipe_dir.join(format!("{}.json", module.name()));
                    write_json(&file, &module.config_value())?;
                }
            }
        }
        Ok(())
    }
}

fn write_json(path: &Path, value: &serde_json::Value) -> io::Result<()> {
    let body = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    fs::write(path, body)
}

fn joined_response(pipes: &[Pipe]) -> String {
    pipes
        .iter()
        .map(|p| p.flagged_response())
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditStatus;
    use crate::module::{KeywordFilter, ModuleKind};
    use crate::pipe::SequentialPipe;
    use crate::pipe::testutil::ScriptedModule;
    use std::collections::BTreeMap;

    fn keyword(name: &str, term: &str) -> ModuleKind {
        let buckets = BTreeMap::from([(1, vec![term.to_string()])]);
        KeywordFilter::new(name, buckets)
            .unwrap()
            .with_audit(true)
            .into()
    }

    fn screening_executor(raise_on_flag: bool) -> Executor {
        let input = SequentialPipe::new("input screen", vec![keyword("kw", "top secret")])
            .unwrap()
            .with_audit(true);
        let output = SequentialPipe::new("output screen", vec![keyword("kw out", "classified")])
            .unwrap()
            .with_audit(true);
        Executor::new(vec![input.into()], vec![output.into()], raise_on_flag)
    }

    /// Pipe output feeds the next pipe's input.
    #[tokio::test]
    async fn input_chain_threads_text() {
        let first = SequentialPipe::new(
            "first",
            vec![ScriptedModule::new("rw1").rewriting("after first").into_kind()],
        )
        .unwrap();
        let second = SequentialPipe::new(
            "second",
            vec![ScriptedModule::new("rw2").rewriting("after second").into_kind()],
        )
        .unwrap();
        let mut executor = Executor::new(vec![first.into(), second.into()], vec![], false);

        let out = executor.execute_inputs("start").await.unwrap();
        assert_eq!(out, "after second");
    }

    #[tokio::test]
    async fn raise_on_flag_stops_the_input_chain() {
        let mut executor = screening_executor(true);
        let err = executor
            .execute_inputs("this is top secret material")
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::FlaggedInput);
        assert!(executor.input_flagged());
        assert!(!executor.input_flagged_response().is_empty());
    }

    #[tokio::test]
    async fn raise_on_flag_stops_the_output_chain() {
        let mut executor = screening_executor(true);
        let err = executor
            .execute_outputs("classified answer")
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::FlaggedOutput);
        assert!(executor.output_flagged());
    }

    /// Without raise_on_flag a flagged pipe does not interrupt the run.
    #[tokio::test]
    async fn flags_do_not_raise_when_disabled() {
        let mut executor = screening_executor(false);
        let out = executor
            .execute_inputs("this is top secret material")
            .await
            .unwrap();
        assert_eq!(out, "this is top secret material");
        assert!(executor.input_flagged());
    }

    /// Pipe ids are continuous across both chains.
    #[tokio::test]
    async fn pipe_ids_are_continuous_across_chains() {
        let executor = screening_executor(false);
        let logs = executor.get_logs();
        assert_eq!(logs[0].id, Some(1));
        assert_eq!(logs[1].id, Some(2));
    }

    /// Two clones running concurrently never share audit entries.
    #[tokio::test]
    async fn clones_are_isolated_under_concurrency() {
        let template = screening_executor(false);

        let mut a = template.clone();
        let mut b = template.clone();
        let (ra, rb) = tokio::join!(
            a.execute_inputs("top secret alpha payload"),
            b.execute_inputs("harmless beta payload"),
        );
        ra.unwrap();
        rb.unwrap();

        assert!(a.input_flagged());
        assert!(!b.input_flagged());

        let log_a = &a.get_logs()[0].modules[0];
        let log_b = &b.get_logs()[0].modules[0];
        assert_eq!(log_a.log["input"], "top secret alpha payload");
        assert_eq!(log_b.log["input"], "harmless beta payload");

        // The template itself was never run.
        assert_eq!(template.get_logs()[0].status, AuditStatus::Noexec);
    }

    #[tokio::test]
    async fn save_dumps_the_configuration_tree() {
        let dir = tempfile::tempdir().unwrap();
        let executor = screening_executor(true);
        executor.save(dir.path()).unwrap();

        let pipe_json = dir
            .path()
            .join("input_pipes")
            .join("input screen")
            .join("pipe.json");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(pipe_json).unwrap()).unwrap();
        assert_eq!(value["pipe_type"], "sequential");

        let module_json = dir
            .path()
            .join("input_pipes")
            .join("input screen")
            .join("kw.json");
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(module_json).unwrap()).unwrap();
        assert_eq!(value["kind"], "keyword_filter");
    }
}
