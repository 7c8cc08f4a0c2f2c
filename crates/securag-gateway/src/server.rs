//! Axum router and server bootstrap.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness probe. |
//! | `POST` | `/api/transform-input` | Run text through the input guardrail chain. |
//! | `POST` | `/api/transform-output` | Run text through the output guardrail chain. |
//! | `POST` | `/api/ai-response` | Forward a prompt to the LLM backend. |
//! | `GET`  | `/api/audit/{message_id}/` | Audit objects for one turn. |
//! | `DELETE` | `/api/audit/{message_id}/delete/` | Drop a turn's audit trail. |

use crate::handlers;
use crate::state::AppState;
use axum::{
    Json, Router,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the gateway router over the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/transform-input", post(handlers::transform_input))
        .route("/api/transform-output", post(handlers::transform_output))
        .route("/api/ai-response", post(handlers::ai_response))
        .route("/api/audit/{message_id}/", get(handlers::retrieve_audits))
        .route(
            "/api/audit/{message_id}/delete/",
            delete(handlers::delete_audits),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `0.0.0.0:{port}` and serve until the process exits.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    info!(addr = %addr, "secuRAG gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

/// `GET /health`: liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "securag-gateway" }))
}
