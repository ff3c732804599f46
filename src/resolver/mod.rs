//! Recipient registry boundary.
//!
//! Mapping users, topics and groups to a [`DeliveryTarget`] and persisting
//! device tokens happen outside the dispatch core. The core only reports back
//! which tokens turned out to be dead or were replaced by the gateway.
//!
//! [`DeliveryTarget`]: crate::notification::DeliveryTarget

use serde::Serialize;
use tokio::sync::mpsc;

use crate::notification::{DeviceId, FailureReason};

/// Receives token lifecycle notifications from the dispatcher.
///
/// Calls are fire-and-forget: implementations must not block and the
/// dispatcher never waits for them to take effect.
pub trait RecipientResolver: Send + Sync {
    /// The gateway reported `device_id` as permanently undeliverable
    fn invalidate(&self, device_id: &str, reason: FailureReason);

    /// The gateway reported `new` as the canonical token for `old`
    fn replace(&self, old: &str, new: &str) {
        let _ = (old, new);
    }
}

/// Resolver that discards every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl RecipientResolver for NoopResolver {
    fn invalidate(&self, _device_id: &str, _reason: FailureReason) {}
}

/// Token lifecycle event emitted by [`ChannelResolver`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolverEvent {
    Invalidated {
        device_id: DeviceId,
        reason: FailureReason,
    },
    Replaced {
        old: DeviceId,
        new: DeviceId,
    },
}

/// Forwards token lifecycle events to a channel consumed by the registry
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    tx: mpsc::UnboundedSender<ResolverEvent>,
}

impl ChannelResolver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResolverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: ResolverEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::debug!(event = ?e.0, "Resolver channel closed, dropping event");
        }
    }
}

impl RecipientResolver for ChannelResolver {
    fn invalidate(&self, device_id: &str, reason: FailureReason) {
        self.emit(ResolverEvent::Invalidated {
            device_id: device_id.to_string(),
            reason,
        });
    }

    fn replace(&self, old: &str, new: &str) {
        self.emit(ResolverEvent::Replaced {
            old: old.to_string(),
            new: new.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_resolver_forwards_events() {
        let (resolver, mut rx) = ChannelResolver::new();

        resolver.invalidate("stale", FailureReason::NotRegistered);
        resolver.replace("old", "new");

        assert_eq!(
            rx.recv().await,
            Some(ResolverEvent::Invalidated {
                device_id: "stale".to_string(),
                reason: FailureReason::NotRegistered,
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(ResolverEvent::Replaced {
                old: "old".to_string(),
                new: "new".to_string(),
            })
        );
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (resolver, rx) = ChannelResolver::new();
        drop(rx);
        resolver.invalidate("stale", FailureReason::InvalidToken);
    }
}
