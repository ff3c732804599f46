//! Delivery strategies: how one unit of work is addressed, sent and parsed.

use async_trait::async_trait;

use crate::gateway::{GatewayClient, GatewayError, GatewayPayload};

use super::batcher::Batch;
use super::outcome::{DeliveryOutcome, FailureReason};
use super::types::TargetKind;

/// Addressing of a single gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipients {
    Devices(Batch),
    Topic(String),
    DeviceGroup {
        notification_key: String,
        member_count: u32,
    },
}

impl Recipients {
    pub fn kind(&self) -> TargetKind {
        match self {
            Recipients::Devices(_) => TargetKind::Devices,
            Recipients::Topic(_) => TargetKind::Topic,
            Recipients::DeviceGroup { .. } => TargetKind::DeviceGroup,
        }
    }

    /// Topic and group sends are always a single batch
    pub fn batch_index(&self) -> usize {
        match self {
            Recipients::Devices(batch) => batch.index,
            _ => 0,
        }
    }

    /// Recipients counted for this call
    pub fn requested(&self) -> usize {
        match self {
            Recipients::Devices(batch) => batch.len(),
            Recipients::Topic(_) => 1,
            Recipients::DeviceGroup { member_count, .. } => *member_count as usize,
        }
    }

    /// Outcome for a call that never produced a gateway response
    pub fn failed_outcome(&self, reason: FailureReason, attempts: u32) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::new(self.batch_index(), self.kind(), self.requested());
        if let Recipients::Devices(batch) = self {
            outcome.failed = batch.ids.iter().map(|id| (id.clone(), reason)).collect();
        }
        outcome.call_error = Some(reason);
        outcome.attempts = attempts;
        outcome.settle()
    }
}

/// Sends one unit of work through the gateway and parses the response
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    fn kind(&self) -> TargetKind;

    async fn send(
        &self,
        gateway: &dyn GatewayClient,
        recipients: &Recipients,
        payload: &GatewayPayload,
    ) -> Result<DeliveryOutcome, GatewayError>;
}

/// One multicast call per batch, parsed per recipient
#[derive(Debug, Clone, Copy, Default)]
pub struct DevicesStrategy;

/// One publish call; the gateway reports no per-device results
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicStrategy;

/// One group call; partial success is reported as a failed id list
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceGroupStrategy;

static DEVICES: DevicesStrategy = DevicesStrategy;
static TOPIC: TopicStrategy = TopicStrategy;
static DEVICE_GROUP: DeviceGroupStrategy = DeviceGroupStrategy;

/// Pick the strategy for a unit of work by its variant tag
pub fn strategy_for(recipients: &Recipients) -> &'static dyn DeliveryStrategy {
    match recipients.kind() {
        TargetKind::Devices => &DEVICES,
        TargetKind::Topic => &TOPIC,
        TargetKind::DeviceGroup => &DEVICE_GROUP,
    }
}

fn mismatched(expected: TargetKind, recipients: &Recipients) -> GatewayError {
    GatewayError::Rejected(format!(
        "{} strategy cannot address {} recipients",
        expected,
        recipients.kind()
    ))
}

#[async_trait]
impl DeliveryStrategy for DevicesStrategy {
    fn kind(&self) -> TargetKind {
        TargetKind::Devices
    }

    async fn send(
        &self,
        gateway: &dyn GatewayClient,
        recipients: &Recipients,
        payload: &GatewayPayload,
    ) -> Result<DeliveryOutcome, GatewayError> {
        let Recipients::Devices(batch) = recipients else {
            return Err(mismatched(self.kind(), recipients));
        };

        let response = gateway.send_to_devices(&batch.ids, payload).await?;

        if response.results.len() != batch.len() {
            tracing::warn!(
                batch_index = batch.index,
                expected = batch.len(),
                received = response.results.len(),
                "Gateway returned a result list of unexpected length"
            );
        }

        let mut outcome = DeliveryOutcome::new(batch.index, TargetKind::Devices, batch.len());

        // Results are positional; missing entries count as unknown failures
        for (position, id) in batch.ids.iter().enumerate() {
            match response.results.get(position) {
                Some(result) => match &result.error {
                    None => {
                        outcome.succeeded.insert(id.clone());
                        if let Some(canonical) = &result.registration_id {
                            if canonical != id {
                                outcome.canonical_ids.insert(id.clone(), canonical.clone());
                            }
                        }
                    }
                    Some(code) => {
                        outcome
                            .failed
                            .insert(id.clone(), FailureReason::from_gateway_code(code));
                    }
                },
                None => {
                    outcome.failed.insert(id.clone(), FailureReason::Unknown);
                }
            }
        }

        outcome.accepted = outcome.succeeded.len();
        Ok(outcome.settle())
    }
}

#[async_trait]
impl DeliveryStrategy for TopicStrategy {
    fn kind(&self) -> TargetKind {
        TargetKind::Topic
    }

    async fn send(
        &self,
        gateway: &dyn GatewayClient,
        recipients: &Recipients,
        payload: &GatewayPayload,
    ) -> Result<DeliveryOutcome, GatewayError> {
        let Recipients::Topic(topic) = recipients else {
            return Err(mismatched(self.kind(), recipients));
        };

        let response = gateway.send_to_topic(topic, payload).await?;

        let mut outcome = DeliveryOutcome::new(0, TargetKind::Topic, 1);
        match response.error {
            Some(code) => match FailureReason::from_gateway_code(&code) {
                // A publish has no per-device results to retry later; retry the call now
                FailureReason::Unavailable => {
                    let status = if code == "InternalServerError" { 500 } else { 503 };
                    return Err(GatewayError::Unavailable { status });
                }
                reason => outcome.call_error = Some(reason),
            },
            None => outcome.accepted = 1,
        }

        Ok(outcome.settle())
    }
}

#[async_trait]
impl DeliveryStrategy for DeviceGroupStrategy {
    fn kind(&self) -> TargetKind {
        TargetKind::DeviceGroup
    }

    async fn send(
        &self,
        gateway: &dyn GatewayClient,
        recipients: &Recipients,
        payload: &GatewayPayload,
    ) -> Result<DeliveryOutcome, GatewayError> {
        let Recipients::DeviceGroup {
            notification_key,
            member_count,
        } = recipients
        else {
            return Err(mismatched(self.kind(), recipients));
        };

        let response = gateway.send_to_group(notification_key, payload).await?;
        let requested = *member_count as usize;

        let mut outcome = DeliveryOutcome::new(0, TargetKind::DeviceGroup, requested);
        // The gateway does not say why group members failed; it advises a retry
        outcome.failed = response
            .failed_registration_ids
            .into_iter()
            .map(|id| (id, FailureReason::Unavailable))
            .collect();
        outcome.accepted = (response.success as usize)
            .min(requested)
            .min(requested.saturating_sub(outcome.failed.len()));

        Ok(outcome.settle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::notification::batcher::split;
    use crate::notification::outcome::BatchStatus;
    use crate::notification::{MessageBuilder, PushContent};

    fn payload() -> GatewayPayload {
        let message = MessageBuilder::new().build(&PushContent::new("test")).unwrap();
        GatewayPayload::from(&message)
    }

    fn batch(ids: &[&str]) -> Recipients {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        Recipients::Devices(split(&ids, 1000).remove(0))
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(strategy_for(&batch(&["a"])).kind(), TargetKind::Devices);
        assert_eq!(
            strategy_for(&Recipients::Topic("news".into())).kind(),
            TargetKind::Topic
        );
        assert_eq!(
            strategy_for(&Recipients::DeviceGroup {
                notification_key: "k".into(),
                member_count: 2
            })
            .kind(),
            TargetKind::DeviceGroup
        );
    }

    #[tokio::test]
    async fn test_devices_partial_failure() {
        let gateway = MemoryGateway::new()
            .with_recipient_error("B", "NotRegistered")
            .with_recipient_error("C", "DeviceMessageRateExceeded")
            .with_canonical_id("A", "A2");

        let outcome = DevicesStrategy
            .send(&gateway, &batch(&["A", "B", "C"]), &payload())
            .await
            .unwrap();

        assert_eq!(outcome.accepted, 1);
        assert!(outcome.succeeded.contains("A"));
        assert_eq!(outcome.failed.get("B"), Some(&FailureReason::NotRegistered));
        assert_eq!(outcome.failed.get("C"), Some(&FailureReason::RateLimited));
        assert_eq!(outcome.canonical_ids.get("A").map(String::as_str), Some("A2"));
        assert_eq!(outcome.status, BatchStatus::Partial);
    }

    #[tokio::test]
    async fn test_topic_call_level_status() {
        let gateway = MemoryGateway::new().with_topic_error("busy", "TopicsMessageRateExceeded");

        let ok = TopicStrategy
            .send(&gateway, &Recipients::Topic("news".into()), &payload())
            .await
            .unwrap();
        assert_eq!(ok.status, BatchStatus::Delivered);
        assert!(ok.succeeded.is_empty() && ok.failed.is_empty());

        let throttled = TopicStrategy
            .send(&gateway, &Recipients::Topic("busy".into()), &payload())
            .await
            .unwrap();
        assert_eq!(throttled.status, BatchStatus::Failed);
        assert_eq!(throttled.call_error, Some(FailureReason::RateLimited));
        assert!(throttled.failed.is_empty());
    }

    #[tokio::test]
    async fn test_topic_unavailable_is_transient_error() {
        let gateway = MemoryGateway::new()
            .with_topic_error("down", "Unavailable")
            .with_topic_error("broken", "InternalServerError");

        let err = TopicStrategy
            .send(&gateway, &Recipients::Topic("down".into()), &payload())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Unavailable { status: 503 });
        assert!(err.is_transient());

        let err = TopicStrategy
            .send(&gateway, &Recipients::Topic("broken".into()), &payload())
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::Unavailable { status: 500 });
    }

    #[tokio::test]
    async fn test_group_partial_success() {
        let gateway = MemoryGateway::new()
            .with_group("group-key", ["a", "b", "c"])
            .with_recipient_error("b", "NotRegistered");

        let outcome = DeviceGroupStrategy
            .send(
                &gateway,
                &Recipients::DeviceGroup {
                    notification_key: "group-key".into(),
                    member_count: 3,
                },
                &payload(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.accepted, 2);
        assert_eq!(outcome.failed.get("b"), Some(&FailureReason::Unavailable));
        assert_eq!(outcome.status, BatchStatus::Partial);
    }

    #[tokio::test]
    async fn test_strategy_rejects_mismatched_recipients() {
        let gateway = MemoryGateway::new();
        let err = TopicStrategy
            .send(&gateway, &batch(&["a"]), &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
        assert_eq!(gateway.call_count(), 0);
    }

    #[test]
    fn test_failed_outcome_covers_every_id() {
        let outcome = batch(&["a", "b"]).failed_outcome(FailureReason::Unavailable, 3);
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.status, BatchStatus::Failed);
    }
}
