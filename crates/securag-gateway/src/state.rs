//! Shared application state.

use crate::llm::AiResponder;
use securag_audit::AuditStore;
use securag_core::Executor;
use std::sync::Arc;

/// State injected into every handler via the axum [`State`] extractor.
///
/// `executor` is a configured *template*: handlers clone it per request so
/// transient state (flags, scores, audit records) is request-scoped and two
/// concurrent requests can never observe each other's entries. The immutable
/// parts of the tree (compiled patterns, JMESPath expressions, HTTP clients)
/// are shared by the clone.
///
/// `audit` is `None` exactly when `SECURAG_SERVER_WRITE_LOGS` is false; the
/// audit endpoints answer 403 in that mode.
#[derive(Clone)]
pub struct AppState {
    pub executor: Executor,
    pub responder: Arc<AiResponder>,
    pub audit: Option<AuditStore>,
}

impl AppState {
    pub fn new(executor: Executor, responder: AiResponder, audit: Option<AuditStore>) -> Self {
        Self {
            executor,
            responder: Arc::new(responder),
            audit,
        }
    }
}
