//! Shapes domain content into the gateway-agnostic notification message.

use crate::config::MessageConfig;
use crate::error::DispatchError;
use crate::gateway::GatewayPayload;

use super::types::{NotificationMessage, Priority, PushContent};

/// Largest serialized payload the gateway accepts, in bytes
pub const MAX_PAYLOAD_BYTES: usize = 4096;

/// Longest time-to-live the gateway accepts (28 days)
pub const MAX_TIME_TO_LIVE_SECONDS: u32 = 2_419_200;

/// Sound applied when the caller does not choose one
pub const DEFAULT_SOUND: &str = "default";

/// Builds [`NotificationMessage`]s with policy defaults applied.
///
/// Pure and deterministic: the same content always produces the same message.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    default_sound: Option<String>,
    default_priority: Priority,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self {
            default_sound: Some(DEFAULT_SOUND.to_string()),
            default_priority: Priority::High,
        }
    }
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MessageConfig) -> Self {
        Self {
            default_sound: Some(config.default_sound.clone()).filter(|s| !s.is_empty()),
            default_priority: config.default_priority,
        }
    }

    pub fn build(&self, content: &PushContent) -> Result<NotificationMessage, DispatchError> {
        if content.body.trim().is_empty() {
            return Err(DispatchError::InvalidMessage(
                "body must not be empty".to_string(),
            ));
        }

        if let Some(ttl) = content.time_to_live {
            if ttl > MAX_TIME_TO_LIVE_SECONDS {
                return Err(DispatchError::InvalidMessage(format!(
                    "time_to_live {}s exceeds the maximum of {}s",
                    ttl, MAX_TIME_TO_LIVE_SECONDS
                )));
            }
        }

        // An explicit empty sound means silent
        let sound = match &content.sound {
            Some(sound) if sound.is_empty() => None,
            Some(sound) => Some(sound.clone()),
            None => self.default_sound.clone(),
        };

        let message = NotificationMessage {
            body: content.body.clone(),
            title: content.title.clone().filter(|t| !t.is_empty()),
            data: content.data.clone(),
            sound,
            priority: content.priority.unwrap_or(self.default_priority),
            collapse_key: content.collapse_key.clone().filter(|k| !k.is_empty()),
            time_to_live: content.time_to_live,
        };

        let size = GatewayPayload::from(&message).encoded_len();
        if size > MAX_PAYLOAD_BYTES {
            return Err(DispatchError::InvalidMessage(format!(
                "payload is {} bytes, maximum is {}",
                size, MAX_PAYLOAD_BYTES
            )));
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let message = MessageBuilder::new()
            .build(&PushContent::new("Your order shipped"))
            .unwrap();

        assert_eq!(message.body(), "Your order shipped");
        assert_eq!(message.priority(), Priority::High);
        assert_eq!(message.sound(), Some("default"));
        assert_eq!(message.title(), None);
    }

    #[test]
    fn test_caller_overrides() {
        let content = PushContent::new("Quiet update")
            .title("Sync")
            .priority(Priority::Normal)
            .sound("")
            .data("order_id", "42")
            .collapse_key("sync");

        let message = MessageBuilder::new().build(&content).unwrap();
        assert_eq!(message.priority(), Priority::Normal);
        assert_eq!(message.sound(), None);
        assert_eq!(message.title(), Some("Sync"));
        assert_eq!(message.data().get("order_id").map(String::as_str), Some("42"));
        assert_eq!(message.collapse_key(), Some("sync"));
    }

    #[test]
    fn test_empty_body_rejected() {
        let err = MessageBuilder::new()
            .build(&PushContent::new("   "))
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidMessage(_)));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let content = PushContent::new("x".repeat(MAX_PAYLOAD_BYTES + 1));
        let err = MessageBuilder::new().build(&content).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidMessage(_)));
    }

    #[test]
    fn test_time_to_live_limit() {
        let builder = MessageBuilder::new();
        assert!(builder
            .build(&PushContent::new("hi").time_to_live(MAX_TIME_TO_LIVE_SECONDS))
            .is_ok());
        assert!(builder
            .build(&PushContent::new("hi").time_to_live(MAX_TIME_TO_LIVE_SECONDS + 1))
            .is_err());
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = MessageBuilder::new();
        let content = PushContent::new("same").data("k", "v");
        assert_eq!(builder.build(&content).unwrap(), builder.build(&content).unwrap());
    }

    #[test]
    fn test_from_config() {
        let config = MessageConfig {
            default_sound: String::new(),
            default_priority: Priority::Normal,
        };
        let message = MessageBuilder::from_config(&config)
            .build(&PushContent::new("hi"))
            .unwrap();
        assert_eq!(message.sound(), None);
        assert_eq!(message.priority(), Priority::Normal);
    }
}
