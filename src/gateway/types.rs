use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notification::{FailureReason, NotificationMessage, Priority};

/// Wire payload shared by every send strategy of one dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayPayload {
    pub notification: NotificationBlock,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u32>,
}

/// Display part of the payload rendered by the OS
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

impl GatewayPayload {
    /// Size of the JSON encoding in bytes
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

impl From<&NotificationMessage> for GatewayPayload {
    fn from(message: &NotificationMessage) -> Self {
        Self {
            notification: NotificationBlock {
                title: message.title().map(str::to_string),
                body: message.body().to_string(),
                sound: message.sound().map(str::to_string),
            },
            data: message.data().clone(),
            priority: message.priority(),
            collapse_key: message.collapse_key().map(str::to_string),
            time_to_live: message.time_to_live(),
        }
    }
}

/// Response to a multicast send, one result per registration id in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MulticastResponse {
    #[serde(default)]
    pub multicast_id: Option<i64>,
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failure: u32,
    #[serde(default)]
    pub canonical_ids: u32,
    #[serde(default)]
    pub results: Vec<RecipientResult>,
}

/// Per-recipient entry of a multicast response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipientResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Canonical token that replaces the one sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecipientResult {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..Default::default()
        }
    }

    pub fn error(code: impl Into<String>) -> Self {
        Self {
            error: Some(code.into()),
            ..Default::default()
        }
    }
}

/// Call-level response to a topic publish
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicResponse {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Response to a device group send
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupResponse {
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failure: u32,
    /// Members the gateway could not reach; reasons are not reported
    #[serde(default)]
    pub failed_registration_ids: Vec<String>,
}

/// Failure of a gateway call as a whole
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Gateway unavailable (status {status})")]
    Unavailable { status: u16 },

    #[error("Gateway throttled the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Gateway rejected the payload as too large")]
    PayloadTooLarge,

    #[error("Gateway rejected the sender credentials")]
    Unauthorized,

    #[error("Gateway rejected the request: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Worth retrying within the same dispatch
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport(_) | GatewayError::Unavailable { .. }
        )
    }

    /// Reason recorded for every recipient of the failed call
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            GatewayError::Transport(_) | GatewayError::Unavailable { .. } => {
                FailureReason::Unavailable
            }
            GatewayError::RateLimited { .. } => FailureReason::RateLimited,
            GatewayError::PayloadTooLarge => FailureReason::MessageTooLarge,
            GatewayError::Unauthorized | GatewayError::Rejected(_) => FailureReason::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{MessageBuilder, PushContent};

    #[test]
    fn test_payload_shape() {
        let message = MessageBuilder::new()
            .build(&PushContent::new("Hello").title("Greeting").data("k", "v"))
            .unwrap();
        let json = serde_json::to_value(GatewayPayload::from(&message)).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "notification": {"title": "Greeting", "body": "Hello", "sound": "default"},
                "data": {"k": "v"},
                "priority": "high"
            })
        );
    }

    #[test]
    fn test_multicast_response_parsing() {
        let response: MulticastResponse = serde_json::from_value(serde_json::json!({
            "multicast_id": 108,
            "success": 1,
            "failure": 1,
            "canonical_ids": 0,
            "results": [
                {"message_id": "1:0408"},
                {"error": "NotRegistered"}
            ]
        }))
        .unwrap();

        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[1].error.as_deref(), Some("NotRegistered"));
    }

    #[test]
    fn test_error_classification() {
        assert!(GatewayError::Transport("reset".into()).is_transient());
        assert!(GatewayError::Unavailable { status: 503 }.is_transient());
        assert!(!GatewayError::Unauthorized.is_transient());
        assert!(!GatewayError::RateLimited { retry_after: None }.is_transient());
        assert_eq!(
            GatewayError::PayloadTooLarge.failure_reason(),
            FailureReason::MessageTooLarge
        );
    }
}
