//! Crate-level error types for `securag-core`.
//!
//! [`ConfigError`] covers everything that can be rejected while a filter
//! tree is being assembled; it is fatal and surfaces at construction time.
//! [`ExecutorError`] carries the flag signals the executor raises when
//! `raise_on_flag` is enabled; the gateway maps those back to a
//! 200-with-flagged response rather than an error status.

use thiserror::Error;

/// A misconfigured module, pipe, or executor. Raised at construction; fatal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Module and pipe names feed directory names when a pipeline is saved,
    /// so the usual filesystem-hostile characters are rejected up front.
    #[error("invalid name '{0}': names cannot contain <>:\"/\\|?* or control characters")]
    InvalidName(String),

    #[error("threshold map must be a non-empty mapping of threshold to terms")]
    EmptyThresholds,

    #[error("threshold keys must be >= 1")]
    ZeroThreshold,

    #[error("invalid regex at threshold {threshold}: {source}")]
    InvalidPattern {
        threshold: u32,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("invalid JMESPath expression '{expr}': {message}")]
    InvalidPath { expr: String, message: String },

    #[error("two or more modules share the name '{name}' in pipe '{pipe}'")]
    DuplicateModule { pipe: String, name: String },
}

/// Flag signals raised by [`Executor`](crate::executor::Executor) runs when
/// `raise_on_flag` is enabled.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("input has been flagged for review")]
    FlaggedInput,

    #[error("output has been flagged for review")]
    FlaggedOutput,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
