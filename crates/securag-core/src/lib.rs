//! secuRAG filter engine.
//!
//! Building blocks for a policy guardrail gateway sitting between a
//! conversational front-end and an LLM backend:
//!
//! - [`module`]: single filters ([`KeywordFilter`], [`RegexFilter`],
//!   [`HttpRequestFilter`], plus custom modules through the [`Module`]
//!   trait) that inspect a string, may rewrite it, and emit one audit
//!   record per invocation.
//! - [`pipe`]: ordered module groups with a flag-aggregation policy and a
//!   scheduling mode (sequential or threaded with cooperative
//!   short-circuiting).
//! - [`executor`]: input/output pipe chains with raise-on-flag semantics.
//! - [`audit`]: the serde-round-trippable audit record types.
//!
//! # Example
//!
//! ```rust,no_run
//! use securag_core::executor::Executor;
//! use securag_core::module::KeywordFilter;
//! use securag_core::pipe::SequentialPipe;
//! use std::collections::BTreeMap;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let buckets = BTreeMap::from([(1, vec!["top secret".to_string()])]);
//! let filter = KeywordFilter::new("Keyword Screen", buckets)?.with_audit(true);
//! let pipe = SequentialPipe::new("Input Screening", vec![filter.into()])?.with_audit(true);
//!
//! let mut executor = Executor::new(vec![pipe.into()], vec![], true);
//! let transformed = executor.execute_inputs("an innocuous question").await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod error;
pub mod executor;
pub mod module;
pub mod pipe;

pub use audit::{AuditStatus, ModuleAuditLog, PipeAuditLog};
pub use error::{ConfigError, ExecutorError};
pub use executor::Executor;
pub use module::{
    HttpRequestConfig, HttpRequestFilter, KeywordFilter, Module, ModuleCore, ModuleKind,
    RegexFilter,
};
pub use pipe::{FlaggingStrategy, Pipe, SequentialPipe, ThreadPipe};

/// Validate a module or pipe name. Names become directory names when a
/// pipeline is saved, so filesystem-hostile characters are rejected.
pub(crate) fn validate_name(name: &str) -> error::ConfigResult<()> {
    const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    if name
        .chars()
        .any(|c| c.is_control() || FORBIDDEN.contains(&c))
    {
        return Err(ConfigError::InvalidName(name.to_string()));
    }
    Ok(())
}
