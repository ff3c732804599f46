//! Push dispatch endpoints.

use std::time::Duration;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::notification::{slugify, DeliveryTarget, DispatchRequest, DispatchResult, PushContent};
use crate::server::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchHttpRequest {
    pub content: PushContent,
    pub target: DeliveryTarget,
    /// Relative deadline; batches not started within it are skipped
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl From<DispatchHttpRequest> for DispatchRequest {
    fn from(request: DispatchHttpRequest) -> Self {
        let dispatch = DispatchRequest::new(request.content, request.target);
        match request.deadline_ms {
            Some(ms) => dispatch.with_timeout(Duration::from_millis(ms)),
            None => dispatch,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlugifyRequest {
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlugifyResponse {
    pub topic: String,
}

/// Dispatch a notification and report per-recipient outcomes
#[tracing::instrument(
    name = "http.dispatch",
    skip(state, request),
    fields(target = %request.target.kind())
)]
pub async fn dispatch(
    State(state): State<AppState>,
    Json(request): Json<DispatchHttpRequest>,
) -> Result<Json<DispatchResult>> {
    let result = state.dispatcher.dispatch(request.into()).await?;
    Ok(Json(result))
}

/// Derive a topic name from a human-readable label
pub async fn slugify_topic(Json(request): Json<SlugifyRequest>) -> Result<Json<SlugifyResponse>> {
    let topic = slugify(&request.label);
    if topic.is_empty() {
        return Err(AppError::Validation(format!(
            "label {:?} contains no usable topic characters",
            request.label
        )));
    }
    Ok(Json(SlugifyResponse { topic }))
}
