use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::notification::DeviceId;

use super::{
    GatewayClient, GatewayError, GatewayPayload, GroupResponse, MulticastResponse,
    RecipientResult, TopicResponse,
};

/// Gateway that accepts every send and only logs it.
///
/// Used when the service runs without gateway credentials; deployments that
/// deliver for real inject their own [`GatewayClient`].
#[derive(Debug, Clone, Default)]
pub struct DryRunGateway {
    latency: Option<Duration>,
}

impl DryRunGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate network latency on every call
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
        }
    }

    async fn simulate(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl GatewayClient for DryRunGateway {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    async fn send_to_devices(
        &self,
        ids: &[DeviceId],
        payload: &GatewayPayload,
    ) -> Result<MulticastResponse, GatewayError> {
        self.simulate().await;

        tracing::info!(
            gateway = "dry_run",
            recipients = ids.len(),
            priority = payload.priority.as_str(),
            body_len = payload.notification.body.len(),
            "Dry-run multicast send"
        );

        Ok(MulticastResponse {
            multicast_id: None,
            success: ids.len() as u32,
            failure: 0,
            canonical_ids: 0,
            results: ids
                .iter()
                .map(|_| RecipientResult::delivered(Uuid::new_v4().to_string()))
                .collect(),
        })
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        payload: &GatewayPayload,
    ) -> Result<TopicResponse, GatewayError> {
        self.simulate().await;

        tracing::info!(
            gateway = "dry_run",
            topic = %topic,
            priority = payload.priority.as_str(),
            "Dry-run topic send"
        );

        Ok(TopicResponse {
            message_id: Some(Uuid::new_v4().to_string()),
            error: None,
        })
    }

    async fn send_to_group(
        &self,
        notification_key: &str,
        payload: &GatewayPayload,
    ) -> Result<GroupResponse, GatewayError> {
        self.simulate().await;

        tracing::info!(
            gateway = "dry_run",
            notification_key = %notification_key,
            priority = payload.priority.as_str(),
            "Dry-run device group send"
        );

        // Group membership lives on the gateway; report full success
        Ok(GroupResponse {
            success: u32::MAX,
            failure: 0,
            failed_registration_ids: Vec::new(),
        })
    }
}
