//! `POST /api/ai-response`: forward a prompt to the LLM backend.

use crate::error::{GatewayError, GatewayResult};
use crate::llm::ChatMessage;
use crate::state::AppState;
use axum::{Json, body::Bytes, extract::State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct AiRequest {
    pub prompt: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct AiResponse {
    pub detail: &'static str,
    /// `null` when the backend is unavailable or the call failed; the
    /// endpoint itself still answers 200.
    pub ai_response: Option<String>,
}

pub async fn ai_response(
    State(state): State<AppState>,
    body: Bytes,
) -> GatewayResult<Json<AiResponse>> {
    let request: AiRequest = serde_json::from_slice(&body).unwrap_or_default();
    let prompt = request
        .prompt
        .ok_or_else(|| GatewayError::InvalidRequest("prompt is required".to_string()))?;

    let ai_response = state
        .responder
        .run(
            &prompt,
            request.system_prompt.as_deref(),
            &request.conversation_history,
        )
        .await;

    Ok(Json(AiResponse {
        detail: "Success",
        ai_response,
    }))
}
