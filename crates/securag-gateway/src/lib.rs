//! secuRAG policy guardrail gateway.
//!
//! HTTP service sitting between a conversational front-end and an LLM
//! backend. Every user turn and every model reply runs through the
//! configured [`securag_core`] filter pipeline; flagged turns short-circuit
//! generation and answer with a human explanation. Audit records emitted
//! during pipe execution persist to [`securag_audit`] when the caller asks
//! for it and persistence is enabled.

pub mod config;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod policy;
pub mod server;
pub mod state;

pub use config::Settings;
pub use error::{GatewayError, GatewayResult};
pub use server::{build_router, serve};
pub use state::AppState;
