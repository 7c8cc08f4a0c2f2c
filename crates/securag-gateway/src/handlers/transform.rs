//! Transform endpoints: run text through the guardrail chains.
//!
//! `POST /api/transform-input` and `POST /api/transform-output` share one
//! implementation differing only in which pipe chain runs. Flagged content
//! is a **200** with `flagged: true` and a human explanation assembled from
//! the flagged pipes; error statuses are reserved for malformed requests and
//! genuine failures.

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;
use axum::{Json, body::Bytes, extract::State};
use securag_core::audit::PipeAuditLog;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
pub struct TransformRequest {
    pub content: Option<String>,
    pub message_id: Option<String>,
    #[serde(default)]
    pub write_log: bool,
}

#[derive(Debug, Serialize)]
pub struct TransformResponse {
    pub detail: &'static str,
    pub flagged: bool,
    pub transformed_content: String,
    pub audit_logs: Vec<PipeAuditLog>,
}

enum Direction {
    Input,
    Output,
}

/// `POST /api/transform-input`
///
/// A missing or unparsable body counts as an empty request, which then
/// fails the `content is required` check rather than a framework rejection.
pub async fn transform_input(
    State(state): State<AppState>,
    body: Bytes,
) -> GatewayResult<Json<TransformResponse>> {
    let request = serde_json::from_slice(&body).unwrap_or_default();
    transform(state, request, Direction::Input).await
}

/// `POST /api/transform-output`
pub async fn transform_output(
    State(state): State<AppState>,
    body: Bytes,
) -> GatewayResult<Json<TransformResponse>> {
    let request = serde_json::from_slice(&body).unwrap_or_default();
    transform(state, request, Direction::Output).await
}

async fn transform(
    state: AppState,
    request: TransformRequest,
    direction: Direction,
) -> GatewayResult<Json<TransformResponse>> {
    let content = request
        .content
        .ok_or_else(|| GatewayError::InvalidRequest("content is required".to_string()))?;

    if request.message_id.is_none() && state.audit.is_some() && request.write_log {
        return Err(GatewayError::InvalidRequest(
            "message_id is required when SECURAG_SERVER_WRITE_LOGS is true".to_string(),
        ));
    }

    // Request-scoped clone: transient audit state never crosses requests.
    let mut executor = state.executor.clone();
    let outcome = match direction {
        Direction::Input => executor.execute_inputs(&content).await,
        Direction::Output => executor.execute_outputs(&content).await,
    };
    let audit_logs = executor.get_logs();

    if request.write_log {
        if let (Some(store), Some(message_id)) = (&state.audit, &request.message_id) {
            let entries = serialize_logs(&audit_logs)?;
            store.insert(message_id, &entries).await?;
        }
    }

    let response = match outcome {
        Ok(transformed_content) => TransformResponse {
            detail: "Success",
            flagged: match direction {
                Direction::Input => executor.input_flagged(),
                Direction::Output => executor.output_flagged(),
            },
            transformed_content,
            audit_logs,
        },
        // raise_on_flag fired: answer 200 with the assembled explanation.
        Err(_) => TransformResponse {
            detail: "Flagged",
            flagged: true,
            transformed_content: match direction {
                Direction::Input => executor.input_flagged_response(),
                Direction::Output => executor.output_flagged_response(),
            },
            audit_logs,
        },
    };

    Ok(Json(response))
}

fn serialize_logs(logs: &[PipeAuditLog]) -> GatewayResult<Vec<Value>> {
    logs.iter()
        .map(|log| {
            serde_json::to_value(log).map_err(|e| GatewayError::Internal(e.to_string()))
        })
        .collect()
}
