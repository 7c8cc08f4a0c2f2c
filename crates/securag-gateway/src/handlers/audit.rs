//! Audit readback endpoints.
//!
//! Both endpoints answer 403 whenever persistence is disabled
//! (`SECURAG_SERVER_WRITE_LOGS=false`), matching the write paths.

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

/// `GET /api/audit/{message_id}/`: audit objects for one turn, ordered by
/// the `id` inside their content.
pub async fn retrieve_audits(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> GatewayResult<Json<Vec<Value>>> {
    let store = state.audit.as_ref().ok_or(GatewayError::WritesDisabled)?;
    let items = store.select(&message_id).await?;
    Ok(Json(items))
}

/// `DELETE /api/audit/{message_id}/delete/`: drop the turn's audit trail.
pub async fn delete_audits(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> GatewayResult<Json<Value>> {
    let store = state.audit.as_ref().ok_or(GatewayError::WritesDisabled)?;
    let deleted = store.delete(&message_id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
