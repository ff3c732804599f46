//! In-process gateway with scriptable per-recipient behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::notification::DeviceId;

use super::{
    GatewayClient, GatewayError, GatewayPayload, GroupResponse, MulticastResponse,
    RecipientResult, TopicResponse,
};

/// A call observed by [`MemoryGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Devices(Vec<DeviceId>),
    Topic(String),
    Group(String),
}

/// Scripted call failure, consumed once per matching call
#[derive(Debug, Clone)]
struct ScriptedFailure {
    error: GatewayError,
    remaining: u32,
}

/// Gateway that keeps everything in memory.
///
/// Every token succeeds unless scripted otherwise:
///
/// ```rust,ignore
/// let gateway = MemoryGateway::new()
///     .with_recipient_error("stale-token", "NotRegistered")
///     .with_call_failure("token-1500", GatewayError::Transport("reset".into()), u32::MAX);
/// ```
#[derive(Debug, Default)]
pub struct MemoryGateway {
    /// Per-token error codes returned inside multicast results
    recipient_errors: DashMap<DeviceId, String>,
    /// Per-token canonical replacements
    canonical_ids: DashMap<DeviceId, DeviceId>,
    /// Whole-call failures keyed by a token, topic or notification key
    call_failures: DashMap<String, ScriptedFailure>,
    /// Topic publish error codes
    topic_errors: DashMap<String, String>,
    /// Registered device groups and their members
    groups: DashMap<String, Vec<DeviceId>>,
    latency: Option<Duration>,
    calls: DashMap<usize, GatewayCall>,
    sequence: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `code` for `token` in multicast and group responses
    pub fn with_recipient_error(self, token: impl Into<DeviceId>, code: impl Into<String>) -> Self {
        self.recipient_errors.insert(token.into(), code.into());
        self
    }

    /// Report `canonical` as the replacement token for `token`
    pub fn with_canonical_id(self, token: impl Into<DeviceId>, canonical: impl Into<DeviceId>) -> Self {
        self.canonical_ids.insert(token.into(), canonical.into());
        self
    }

    /// Fail the next `times` calls addressed to `address` with `error`.
    ///
    /// For device sends the call fails when any id in the batch matches.
    pub fn with_call_failure(self, address: impl Into<String>, error: GatewayError, times: u32) -> Self {
        self.call_failures.insert(
            address.into(),
            ScriptedFailure {
                error,
                remaining: times,
            },
        );
        self
    }

    pub fn with_topic_error(self, topic: impl Into<String>, code: impl Into<String>) -> Self {
        self.topic_errors.insert(topic.into(), code.into());
        self
    }

    pub fn with_group<I, S>(self, notification_key: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<DeviceId>,
    {
        self.groups.insert(
            notification_key.into(),
            members.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Delay every call, to observe concurrency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Calls in the order they started
    pub fn calls(&self) -> Vec<GatewayCall> {
        let mut calls: Vec<(usize, GatewayCall)> = self
            .calls
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        calls.sort_by_key(|(seq, _)| *seq);
        calls.into_iter().map(|(_, call)| call).collect()
    }

    pub fn call_count(&self) -> usize {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were outstanding at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn begin(&self, call: GatewayCall) -> InFlight<'_> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.calls.insert(seq, call);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight {
            counter: &self.in_flight,
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn take_failure<'a, I>(&self, addresses: I) -> Option<GatewayError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for address in addresses {
            if let Some(mut scripted) = self.call_failures.get_mut(address) {
                if scripted.remaining > 0 {
                    scripted.remaining -= 1;
                    return Some(scripted.error.clone());
                }
            }
        }
        None
    }

    fn message_id(&self) -> String {
        format!("0:{}", self.sequence.load(Ordering::SeqCst))
    }
}

/// Decrements the in-flight counter when the call finishes
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayClient for MemoryGateway {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send_to_devices(
        &self,
        ids: &[DeviceId],
        _payload: &GatewayPayload,
    ) -> Result<MulticastResponse, GatewayError> {
        let _guard = self.begin(GatewayCall::Devices(ids.to_vec())).await;

        if let Some(error) = self.take_failure(ids.iter().map(String::as_str)) {
            return Err(error);
        }

        let mut response = MulticastResponse {
            multicast_id: Some(self.sequence.load(Ordering::SeqCst) as i64),
            ..Default::default()
        };

        for id in ids {
            let result = match self.recipient_errors.get(id) {
                Some(code) => {
                    response.failure += 1;
                    RecipientResult::error(code.value().clone())
                }
                None => {
                    response.success += 1;
                    let mut result = RecipientResult::delivered(self.message_id());
                    if let Some(canonical) = self.canonical_ids.get(id) {
                        response.canonical_ids += 1;
                        result.registration_id = Some(canonical.value().clone());
                    }
                    result
                }
            };
            response.results.push(result);
        }

        Ok(response)
    }

    async fn send_to_topic(
        &self,
        topic: &str,
        _payload: &GatewayPayload,
    ) -> Result<TopicResponse, GatewayError> {
        let _guard = self.begin(GatewayCall::Topic(topic.to_string())).await;

        if let Some(error) = self.take_failure([topic]) {
            return Err(error);
        }

        Ok(match self.topic_errors.get(topic) {
            Some(code) => TopicResponse {
                message_id: None,
                error: Some(code.value().clone()),
            },
            None => TopicResponse {
                message_id: Some(self.message_id()),
                error: None,
            },
        })
    }

    async fn send_to_group(
        &self,
        notification_key: &str,
        _payload: &GatewayPayload,
    ) -> Result<GroupResponse, GatewayError> {
        let _guard = self
            .begin(GatewayCall::Group(notification_key.to_string()))
            .await;

        if let Some(error) = self.take_failure([notification_key]) {
            return Err(error);
        }

        let Some(members) = self.groups.get(notification_key) else {
            return Err(GatewayError::Rejected(format!(
                "unknown notification key {}",
                notification_key
            )));
        };

        let failed_registration_ids: Vec<String> = members
            .iter()
            .filter(|id| self.recipient_errors.contains_key(*id))
            .cloned()
            .collect();

        Ok(GroupResponse {
            success: (members.len() - failed_registration_ids.len()) as u32,
            failure: failed_registration_ids.len() as u32,
            failed_registration_ids,
        })
    }
}
