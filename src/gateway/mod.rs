//! Push gateway adapter boundary.
//!
//! The dispatch core only talks to the gateway through [`GatewayClient`].
//! Implementations own authentication and transport; the core shares one
//! instance read-only across every concurrent batch.
//!
//! - `MemoryGateway`: scriptable in-process gateway for tests and embedding
//! - `DryRunGateway`: accepts everything and logs what would be sent

mod dry_run;
mod memory;
mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::notification::DeviceId;

pub use dry_run::DryRunGateway;
pub use memory::{GatewayCall, MemoryGateway};
pub use types::{
    GatewayError, GatewayPayload, GroupResponse, MulticastResponse, NotificationBlock,
    RecipientResult, TopicResponse,
};

/// Transport binding to the push gateway's send API
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Short identifier used in logs and health output
    fn name(&self) -> &'static str;

    /// Send to up to `MAX_IDS_PER_CALL` registration ids in one call
    async fn send_to_devices(
        &self,
        ids: &[DeviceId],
        payload: &GatewayPayload,
    ) -> Result<MulticastResponse, GatewayError>;

    /// Publish to every subscriber of `topic`
    async fn send_to_topic(
        &self,
        topic: &str,
        payload: &GatewayPayload,
    ) -> Result<TopicResponse, GatewayError>;

    /// Send to the members of a device group
    async fn send_to_group(
        &self,
        notification_key: &str,
        payload: &GatewayPayload,
    ) -> Result<GroupResponse, GatewayError>;
}

/// Create the built-in gateway adapter named by `gateway.mode`.
///
/// - `"dry_run"` (default): logs every send, reports success
/// - `"memory"`: in-process gateway, every token succeeds
pub fn create_gateway(config: &GatewayConfig) -> Result<Arc<dyn GatewayClient>, AppError> {
    match config.mode.as_str() {
        "dry_run" => {
            let gateway = match config.dry_run_latency_ms {
                0 => DryRunGateway::new(),
                ms => DryRunGateway::with_latency(Duration::from_millis(ms)),
            };
            tracing::info!(
                mode = "dry_run",
                latency_ms = config.dry_run_latency_ms,
                "Creating dry-run gateway"
            );
            Ok(Arc::new(gateway))
        }
        "memory" => {
            tracing::info!(mode = "memory", "Creating in-memory gateway");
            Ok(Arc::new(MemoryGateway::new()))
        }
        other => Err(AppError::Validation(format!(
            "unknown gateway mode '{}', expected 'dry_run' or 'memory'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_gateway_by_mode() {
        let dry_run = tokio_test::assert_ok!(create_gateway(&GatewayConfig::default()));
        assert_eq!(dry_run.name(), "dry_run");

        let memory = tokio_test::assert_ok!(create_gateway(&GatewayConfig {
            mode: "memory".to_string(),
            ..Default::default()
        }));
        assert_eq!(memory.name(), "memory");
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result = create_gateway(&GatewayConfig {
            mode: "fcm-legacy".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
