use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Maximum number of members the gateway allows in one device group
pub const MAX_DEVICE_GROUP_MEMBERS: u32 = 20;

/// Device registration token issued by the client SDK
pub type DeviceId = String;

/// Delivery priority understood by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Normal priority, may be delayed to save battery
    Normal,
    /// High priority, wakes the device (default policy)
    #[default]
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

/// Domain-level message handed to the dispatch core.
///
/// Optional fields left unset fall back to the builder's policy defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushContent {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Collapses pending notifications sharing the same key on the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    /// Seconds the gateway keeps the message for offline devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u32>,
}

impl PushContent {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn collapse_key(mut self, key: impl Into<String>) -> Self {
        self.collapse_key = Some(key.into());
        self
    }

    pub fn time_to_live(mut self, seconds: u32) -> Self {
        self.time_to_live = Some(seconds);
        self
    }
}

/// Gateway-agnostic notification, immutable once built.
///
/// Construct through [`MessageBuilder`](super::MessageBuilder).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationMessage {
    pub(super) body: String,
    pub(super) title: Option<String>,
    pub(super) data: BTreeMap<String, String>,
    pub(super) sound: Option<String>,
    pub(super) priority: Priority,
    pub(super) collapse_key: Option<String>,
    pub(super) time_to_live: Option<u32>,
}

impl NotificationMessage {
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    pub fn sound(&self) -> Option<&str> {
        self.sound.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn collapse_key(&self) -> Option<&str> {
        self.collapse_key.as_deref()
    }

    pub fn time_to_live(&self) -> Option<u32> {
        self.time_to_live
    }
}

/// Who a dispatch is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// Explicit device tokens, batched per gateway call
    Devices { ids: Vec<DeviceId> },
    /// Publish to every subscriber of a topic
    Topic { name: String },
    /// Gateway-side device group addressed by its notification key
    DeviceGroup {
        notification_key: String,
        member_count: u32,
    },
}

impl DeliveryTarget {
    /// Devices target with duplicates removed, keeping first occurrence order
    pub fn devices<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DeviceId>,
    {
        Self::Devices {
            ids: unique_ids(ids.into_iter().map(Into::into)),
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::Topic { name: name.into() }
    }

    /// Topic target whose name is derived from a human-readable label
    pub fn topic_from_label(label: &str) -> Self {
        Self::Topic {
            name: slugify(label),
        }
    }

    pub fn device_group(notification_key: impl Into<String>, member_count: u32) -> Self {
        Self::DeviceGroup {
            notification_key: notification_key.into(),
            member_count,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            DeliveryTarget::Devices { .. } => TargetKind::Devices,
            DeliveryTarget::Topic { .. } => TargetKind::Topic,
            DeliveryTarget::DeviceGroup { .. } => TargetKind::DeviceGroup,
        }
    }

    /// Reject malformed targets before anything is sent
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            DeliveryTarget::Devices { ids } => {
                if ids.iter().any(|id| id.trim().is_empty()) {
                    return Err(DispatchError::InvalidTarget(
                        "device ids must not be blank".to_string(),
                    ));
                }
                Ok(())
            }
            DeliveryTarget::Topic { name } => validate_topic_name(name),
            DeliveryTarget::DeviceGroup {
                notification_key,
                member_count,
            } => {
                if notification_key.trim().is_empty() {
                    return Err(DispatchError::InvalidTarget(
                        "device group notification key must not be empty".to_string(),
                    ));
                }
                if *member_count == 0 {
                    return Err(DispatchError::InvalidTarget(
                        "device group has no members".to_string(),
                    ));
                }
                if *member_count > MAX_DEVICE_GROUP_MEMBERS {
                    return Err(DispatchError::InvalidTarget(format!(
                        "device group has {} members, maximum is {}",
                        member_count, MAX_DEVICE_GROUP_MEMBERS
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Variant tag of a [`DeliveryTarget`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Devices,
    Topic,
    DeviceGroup,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Devices => "devices",
            TargetKind::Topic => "topic",
            TargetKind::DeviceGroup => "device_group",
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call into the dispatch core
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub content: PushContent,
    pub target: DeliveryTarget,
    pub requested_at: DateTime<Utc>,
    /// No new batches are started once this passes
    pub deadline: Option<DateTime<Utc>>,
}

impl DispatchRequest {
    pub fn new(content: PushContent, target: DeliveryTarget) -> Self {
        Self {
            content,
            target,
            requested_at: Utc::now(),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline relative to `requested_at`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        self.deadline = self.requested_at.checked_add_signed(timeout);
        self
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Utc::now() >= deadline)
    }
}

/// Derive a topic name from a human-readable label.
///
/// Lowercases, turns whitespace runs into single hyphens and drops anything
/// the gateway does not accept in topic names. Applying it twice yields the
/// same result.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut pending_hyphen = false;

    for ch in label.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_whitespace() || ch == '-' {
            pending_hyphen = !slug.is_empty();
            continue;
        }
        if !is_topic_char(ch) {
            continue;
        }
        if pending_hyphen {
            slug.push('-');
            pending_hyphen = false;
        }
        slug.push(ch);
    }

    slug
}

fn is_topic_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '~' | '%')
}

fn validate_topic_name(name: &str) -> Result<(), DispatchError> {
    if name.is_empty() {
        return Err(DispatchError::InvalidTarget(
            "topic name must not be empty".to_string(),
        ));
    }
    if let Some(bad) = name.chars().find(|c| !is_topic_char(*c)) {
        return Err(DispatchError::InvalidTarget(format!(
            "topic name {:?} contains illegal character {:?}",
            name, bad
        )));
    }
    Ok(())
}

/// Remove duplicate ids while keeping first-seen order
pub(crate) fn unique_ids<I>(ids: I) -> Vec<DeviceId>
where
    I: IntoIterator<Item = DeviceId>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_label() {
        assert_eq!(
            slugify("Firebase Push Notifications"),
            "firebase-push-notifications"
        );
    }

    #[test]
    fn test_slugify_is_idempotent() {
        let once = slugify("  Breaking   News: Sports & Weather ");
        assert_eq!(once, "breaking-news-sports-weather");
        assert_eq!(slugify(&once), once);
    }

    #[test]
    fn test_slugify_output_is_valid_topic() {
        let target = DeliveryTarget::topic_from_label("Hello, World!");
        assert_eq!(target, DeliveryTarget::topic("hello-world"));
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_devices_constructor_dedups() {
        let target = DeliveryTarget::devices(["a", "b", "a", "c", "b"]);
        assert_eq!(
            target,
            DeliveryTarget::Devices {
                ids: vec!["a".to_string(), "b".to_string(), "c".to_string()]
            }
        );
    }

    #[test]
    fn test_device_group_member_limit() {
        assert!(DeliveryTarget::device_group("key", 20).validate().is_ok());

        let err = DeliveryTarget::device_group("key", 21).validate().unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTarget(_)));

        let err = DeliveryTarget::device_group("", 3).validate().unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTarget(_)));
    }

    #[test]
    fn test_topic_validation() {
        assert!(DeliveryTarget::topic("").validate().is_err());
        assert!(DeliveryTarget::topic("/topics/news").validate().is_err());
        assert!(DeliveryTarget::topic("news_2024.eu~x%20").validate().is_ok());
    }

    #[test]
    fn test_target_serde_shape() {
        let target: DeliveryTarget = serde_json::from_value(serde_json::json!({
            "type": "device_group",
            "notification_key": "APA91b",
            "member_count": 4
        }))
        .unwrap();
        assert_eq!(target, DeliveryTarget::device_group("APA91b", 4));
        assert_eq!(target.kind(), TargetKind::DeviceGroup);
    }

    #[test]
    fn test_request_deadline() {
        let request = DispatchRequest::new(PushContent::new("hi"), DeliveryTarget::topic("news"));
        assert!(!request.is_expired());

        let expired = request
            .clone()
            .with_deadline(Utc::now() - chrono::Duration::seconds(1));
        assert!(expired.is_expired());

        let later = request.with_timeout(Duration::from_secs(60));
        assert!(!later.is_expired());
    }
}
