use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{DispatchConfig, MessageConfig};
use crate::error::DispatchError;
use crate::gateway::{GatewayClient, GatewayPayload};
use crate::metrics::{DispatchMetrics, GatewayMetrics};
use crate::resolver::{NoopResolver, RecipientResolver};
use crate::retry::RetryPolicy;
use crate::telemetry;

use super::batcher::{split, MAX_IDS_PER_CALL};
use super::builder::MessageBuilder;
use super::outcome::{DeliveryOutcome, DispatchResult, FailureReason};
use super::reconciler::FailureReconciler;
use super::strategy::{strategy_for, Recipients};
use super::types::{unique_ids, DeliveryTarget, DispatchRequest, TargetKind};

/// Default maximum number of gateway calls outstanding per dispatch
const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Statistics for the notification dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Dispatch requests that passed validation
    pub total_dispatches: AtomicU64,
    /// Dispatch requests rejected by validation
    pub rejected_dispatches: AtomicU64,
    pub device_dispatches: AtomicU64,
    pub topic_dispatches: AtomicU64,
    pub group_dispatches: AtomicU64,
    /// Gateway calls including retries
    pub gateway_calls: AtomicU64,
    pub gateway_retries: AtomicU64,
    pub recipients_succeeded: AtomicU64,
    pub recipients_failed: AtomicU64,
    pub invalidations: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_dispatches: self.total_dispatches.load(Ordering::Relaxed),
            rejected_dispatches: self.rejected_dispatches.load(Ordering::Relaxed),
            device_dispatches: self.device_dispatches.load(Ordering::Relaxed),
            topic_dispatches: self.topic_dispatches.load(Ordering::Relaxed),
            group_dispatches: self.group_dispatches.load(Ordering::Relaxed),
            gateway_calls: self.gateway_calls.load(Ordering::Relaxed),
            gateway_retries: self.gateway_retries.load(Ordering::Relaxed),
            recipients_succeeded: self.recipients_succeeded.load(Ordering::Relaxed),
            recipients_failed: self.recipients_failed.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    fn record_kind(&self, kind: TargetKind) {
        let counter = match kind {
            TargetKind::Devices => &self.device_dispatches,
            TargetKind::Topic => &self.topic_dispatches,
            TargetKind::DeviceGroup => &self.group_dispatches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_dispatches: u64,
    pub rejected_dispatches: u64,
    pub device_dispatches: u64,
    pub topic_dispatches: u64,
    pub group_dispatches: u64,
    pub gateway_calls: u64,
    pub gateway_retries: u64,
    pub recipients_succeeded: u64,
    pub recipients_failed: u64,
    pub invalidations: u64,
}

/// Dispatches notifications to the push gateway.
///
/// Stateless across calls apart from statistics: every request's batches,
/// outcomes and retries live only for the duration of [`dispatch`].
///
/// # Example
///
/// ```rust,ignore
/// let dispatcher = NotificationDispatcher::new(Arc::new(MemoryGateway::new()))
///     .with_resolver(Arc::new(resolver));
///
/// let request = DispatchRequest::new(
///     PushContent::new("Your order shipped"),
///     DeliveryTarget::devices(tokens),
/// );
/// let result = dispatcher.dispatch(request).await?;
/// ```
///
/// [`dispatch`]: NotificationDispatcher::dispatch
pub struct NotificationDispatcher {
    gateway: Arc<dyn GatewayClient>,
    resolver: Arc<dyn RecipientResolver>,
    builder: MessageBuilder,
    reconciler: FailureReconciler,
    retry: RetryPolicy,
    max_in_flight: usize,
    default_timeout: Option<Duration>,
    stats: DispatcherStats,
}

impl NotificationDispatcher {
    /// Create a dispatcher with default policy and no resolver
    pub fn new(gateway: Arc<dyn GatewayClient>) -> Self {
        Self {
            gateway,
            resolver: Arc::new(NoopResolver),
            builder: MessageBuilder::default(),
            reconciler: FailureReconciler,
            retry: RetryPolicy::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            default_timeout: None,
            stats: DispatcherStats::default(),
        }
    }

    /// Create a dispatcher from configuration
    pub fn from_config(
        gateway: Arc<dyn GatewayClient>,
        dispatch: &DispatchConfig,
        message: &MessageConfig,
    ) -> Self {
        Self {
            builder: MessageBuilder::from_config(message),
            retry: RetryPolicy::from_config(dispatch),
            max_in_flight: dispatch.max_in_flight.max(1),
            default_timeout: dispatch.default_deadline_ms.map(Duration::from_millis),
            ..Self::new(gateway)
        }
    }

    /// Set the resolver notified about dead and replaced tokens
    pub fn with_resolver(mut self, resolver: Arc<dyn RecipientResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn with_message_builder(mut self, builder: MessageBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Name of the gateway adapter in use
    pub fn gateway_name(&self) -> &'static str {
        self.gateway.name()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Dispatch a notification and wait until every batch has an outcome.
    ///
    /// Only an invalid message or target is returned as an error, always
    /// before the gateway is called. Everything else, including batches that
    /// failed outright, is reported inside the [`DispatchResult`].
    #[tracing::instrument(
        name = "dispatcher.dispatch",
        skip(self, request),
        fields(
            dispatch_id = tracing::field::Empty,
            target = %request.target.kind()
        )
    )]
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError> {
        let started = Instant::now();
        let dispatch_id = Uuid::new_v4();
        tracing::Span::current().record("dispatch_id", tracing::field::display(dispatch_id));

        let kind = request.target.kind();
        let deadline = self.effective_deadline(&request);

        let units = match self.plan(request.target) {
            Ok(units) => units,
            Err(e) => return Err(self.reject(e)),
        };

        if units.is_empty() {
            self.accept(kind);
            tracing::debug!(dispatch_id = %dispatch_id, "No recipients, nothing to send");
            return Ok(DispatchResult::empty(dispatch_id, kind));
        }

        let message = match self.builder.build(&request.content) {
            Ok(message) => message,
            Err(e) => return Err(self.reject(e)),
        };
        let payload = GatewayPayload::from(&message);
        self.accept(kind);

        let outcomes = self.send_all(units, &payload, deadline).await;
        let result = self.aggregate(dispatch_id, kind, outcomes);

        self.stats
            .recipients_succeeded
            .fetch_add(result.total_succeeded as u64, Ordering::Relaxed);
        self.stats
            .recipients_failed
            .fetch_add(result.total_failed() as u64, Ordering::Relaxed);
        self.stats
            .invalidations
            .fetch_add(result.invalidations.len() as u64, Ordering::Relaxed);
        DispatchMetrics::record_result(&result, started.elapsed());
        telemetry::record_dispatch(&tracing::Span::current(), &result);

        tracing::info!(
            dispatch_id = %dispatch_id,
            target = %kind,
            batches = result.outcomes.len(),
            requested = result.total_requested,
            succeeded = result.total_succeeded,
            failed = result.total_failed(),
            invalidated = result.invalidations.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dispatch complete"
        );

        Ok(result)
    }

    /// Validate the target and split it into units of work
    fn plan(&self, target: DeliveryTarget) -> Result<Vec<Recipients>, DispatchError> {
        target.validate()?;

        Ok(match target {
            DeliveryTarget::Devices { ids } => {
                let ids = unique_ids(ids);
                split(&ids, MAX_IDS_PER_CALL)
                    .into_iter()
                    .map(Recipients::Devices)
                    .collect()
            }
            DeliveryTarget::Topic { name } => vec![Recipients::Topic(name)],
            DeliveryTarget::DeviceGroup {
                notification_key,
                member_count,
            } => vec![Recipients::DeviceGroup {
                notification_key,
                member_count,
            }],
        })
    }

    fn accept(&self, kind: TargetKind) {
        self.stats.total_dispatches.fetch_add(1, Ordering::Relaxed);
        self.stats.record_kind(kind);
        DispatchMetrics::record_dispatch(kind);
    }

    fn reject(&self, error: DispatchError) -> DispatchError {
        self.stats.rejected_dispatches.fetch_add(1, Ordering::Relaxed);
        DispatchMetrics::record_rejected(error.code());
        tracing::warn!(error = %error, "Dispatch request rejected");
        error
    }

    fn effective_deadline(&self, request: &DispatchRequest) -> Option<DateTime<Utc>> {
        request.deadline.or_else(|| {
            let timeout = chrono::Duration::from_std(self.default_timeout?).ok()?;
            request.requested_at.checked_add_signed(timeout)
        })
    }

    /// Send every unit with at most `max_in_flight` gateway calls outstanding.
    /// Units not started before the deadline are recorded as unavailable.
    async fn send_all(
        &self,
        units: Vec<Recipients>,
        payload: &GatewayPayload,
        deadline: Option<DateTime<Utc>>,
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(units.len());
        let mut in_flight = FuturesUnordered::new();
        let mut queue = units.into_iter();

        loop {
            while in_flight.len() < self.max_in_flight {
                let Some(unit) = queue.next() else {
                    break;
                };

                if deadline_passed(deadline) {
                    tracing::warn!(
                        batch_index = unit.batch_index(),
                        "Deadline passed before batch started"
                    );
                    GatewayMetrics::record_call_failure(FailureReason::Unavailable);
                    outcomes.push(unit.failed_outcome(FailureReason::Unavailable, 0));
                    continue;
                }

                in_flight.push(self.deliver(unit, payload, deadline));
            }

            match in_flight.next().await {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }

        outcomes.sort_by_key(|o| o.batch_index);
        outcomes
    }

    /// Send one unit, retrying transient call failures with backoff
    async fn deliver(
        &self,
        recipients: Recipients,
        payload: &GatewayPayload,
        deadline: Option<DateTime<Utc>>,
    ) -> DeliveryOutcome {
        let strategy = strategy_for(&recipients);
        let mut backoff = self.retry.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.stats.gateway_calls.fetch_add(1, Ordering::Relaxed);
            GatewayMetrics::record_call(strategy.kind());

            let error = match strategy.send(self.gateway.as_ref(), &recipients, payload).await {
                Ok(mut outcome) => {
                    outcome.attempts = attempt;
                    return outcome;
                }
                Err(error) => error,
            };

            let retryable = error.is_transient() && attempt < self.retry.max_attempts;
            if !retryable || deadline_passed(deadline) {
                let reason = error.failure_reason();
                tracing::warn!(
                    batch_index = recipients.batch_index(),
                    attempts = attempt,
                    error = %error,
                    reason = %reason,
                    "Batch failed at call level"
                );
                GatewayMetrics::record_call_failure(reason);
                return recipients.failed_outcome(reason, attempt);
            }

            let delay = backoff.next_delay();
            if !starts_before_deadline(delay, deadline) {
                tracing::warn!(
                    batch_index = recipients.batch_index(),
                    attempts = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Deadline falls within retry backoff, giving up"
                );
                GatewayMetrics::record_call_failure(FailureReason::Unavailable);
                return recipients.failed_outcome(FailureReason::Unavailable, attempt);
            }

            tracing::debug!(
                batch_index = recipients.batch_index(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient gateway failure, retrying"
            );
            self.stats.gateway_retries.fetch_add(1, Ordering::Relaxed);
            GatewayMetrics::record_retry();
            tokio::time::sleep(delay).await;

            if deadline_passed(deadline) {
                GatewayMetrics::record_call_failure(FailureReason::Unavailable);
                return recipients.failed_outcome(FailureReason::Unavailable, attempt);
            }
        }
    }

    fn aggregate(
        &self,
        dispatch_id: Uuid,
        kind: TargetKind,
        outcomes: Vec<DeliveryOutcome>,
    ) -> DispatchResult {
        let reconciliation = self.reconciler.reconcile(&outcomes);
        self.reconciler.notify(&reconciliation, self.resolver.as_ref());

        if !reconciliation.caller_defects.is_empty() {
            tracing::warn!(
                dispatch_id = %dispatch_id,
                recipients = reconciliation.caller_defects.len(),
                "Gateway rejected the message itself"
            );
        }
        if !reconciliation.unexplained.is_empty() {
            tracing::debug!(
                dispatch_id = %dispatch_id,
                recipients = reconciliation.unexplained.len(),
                "Recipients failed without a known reason"
            );
        }

        DispatchResult {
            dispatch_id,
            target: kind,
            total_requested: outcomes.iter().map(|o| o.requested).sum(),
            total_succeeded: outcomes.iter().map(|o| o.accepted).sum(),
            outcomes,
            invalidations: reconciliation.invalidations.into_keys().collect(),
            retry_candidates: reconciliation.retry_candidates,
            canonical_ids: reconciliation.replacements,
        }
    }
}

fn deadline_passed(deadline: Option<DateTime<Utc>>) -> bool {
    deadline.is_some_and(|deadline| Utc::now() >= deadline)
}

/// Whether an attempt made after waiting `delay` would still start in time
fn starts_before_deadline(delay: Duration, deadline: Option<DateTime<Utc>>) -> bool {
    let Some(deadline) = deadline else {
        return true;
    };
    match (deadline - Utc::now()).to_std() {
        Ok(remaining) => delay < remaining,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayCall, GatewayError, MemoryGateway};
    use crate::notification::PushContent;
    use crate::retry::BackoffConfig;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: BackoffConfig {
                initial_delay_ms: 1,
                max_delay_ms: 5,
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
        }
    }

    fn tokens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("token-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_empty_devices_is_noop() {
        let gateway = Arc::new(MemoryGateway::new());
        let dispatcher = NotificationDispatcher::new(gateway.clone());

        let result = dispatcher
            .dispatch(DispatchRequest::new(
                PushContent::new("hi"),
                DeliveryTarget::devices(Vec::<String>::new()),
            ))
            .await
            .unwrap();

        assert_eq!(result.total_requested, 0);
        assert_eq!(result.total_succeeded, 0);
        assert!(result.outcomes.is_empty());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_group_rejected_before_gateway() {
        let gateway = Arc::new(MemoryGateway::new());
        let dispatcher = NotificationDispatcher::new(gateway.clone());

        let err = tokio_test::assert_err!(
            dispatcher
                .dispatch(DispatchRequest::new(
                    PushContent::new("hi"),
                    DeliveryTarget::device_group("key", 21),
                ))
                .await
        );

        assert!(matches!(err, DispatchError::InvalidTarget(_)));
        assert_eq!(gateway.call_count(), 0);
        assert_eq!(dispatcher.stats().rejected_dispatches, 1);
    }

    #[tokio::test]
    async fn test_invalid_message_rejected_before_gateway() {
        let gateway = Arc::new(MemoryGateway::new());
        let dispatcher = NotificationDispatcher::new(gateway.clone());

        let err = dispatcher
            .dispatch(DispatchRequest::new(
                PushContent::new(""),
                DeliveryTarget::topic("news"),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::InvalidMessage(_)));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_ids_sent_once() {
        let gateway = Arc::new(MemoryGateway::new());
        let dispatcher = NotificationDispatcher::new(gateway.clone());

        let target = DeliveryTarget::Devices {
            ids: vec!["a".into(), "b".into(), "a".into()],
        };
        let result = dispatcher
            .dispatch(DispatchRequest::new(PushContent::new("hi"), target))
            .await
            .unwrap();

        assert_eq!(result.total_requested, 2);
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::Devices(vec!["a".into(), "b".into()])]
        );
    }

    #[tokio::test]
    async fn test_transient_failure_retried_then_succeeds() {
        let gateway = Arc::new(MemoryGateway::new().with_call_failure(
            "token-0",
            GatewayError::Transport("connection reset".into()),
            2,
        ));
        let dispatcher =
            NotificationDispatcher::new(gateway.clone()).with_retry_policy(fast_retry(3));

        let result = dispatcher
            .dispatch(DispatchRequest::new(
                PushContent::new("hi"),
                DeliveryTarget::devices(tokens(3)),
            ))
            .await
            .unwrap();

        assert_eq!(result.total_succeeded, 3);
        assert_eq!(result.outcomes[0].attempts, 3);
        assert_eq!(gateway.call_count(), 3);
        assert_eq!(dispatcher.stats().gateway_retries, 2);
    }

    #[tokio::test]
    async fn test_non_transient_failure_not_retried() {
        let gateway = Arc::new(MemoryGateway::new().with_call_failure(
            "token-0",
            GatewayError::PayloadTooLarge,
            u32::MAX,
        ));
        let dispatcher =
            NotificationDispatcher::new(gateway.clone()).with_retry_policy(fast_retry(3));

        let result = dispatcher
            .dispatch(DispatchRequest::new(
                PushContent::new("hi"),
                DeliveryTarget::devices(tokens(2)),
            ))
            .await
            .unwrap();

        assert_eq!(gateway.call_count(), 1);
        assert_eq!(result.total_succeeded, 0);
        assert!(result
            .failed()
            .values()
            .all(|r| *r == FailureReason::MessageTooLarge));
        assert!(result.invalidations.is_empty());
        assert!(result.retry_candidates.is_empty());
    }

    #[tokio::test]
    async fn test_expired_deadline_starts_nothing() {
        let gateway = Arc::new(MemoryGateway::new());
        let dispatcher = NotificationDispatcher::new(gateway.clone());

        let request = DispatchRequest::new(
            PushContent::new("hi"),
            DeliveryTarget::devices(tokens(1500)),
        )
        .with_deadline(Utc::now() - chrono::Duration::seconds(1));

        let result = dispatcher.dispatch(request).await.unwrap();

        assert_eq!(gateway.call_count(), 0);
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.total_requested, 1500);
        assert_eq!(result.total_succeeded, 0);
        assert_eq!(result.retry_candidates.len(), 1500);
        assert!(result
            .failed()
            .values()
            .all(|r| *r == FailureReason::Unavailable));
    }

    #[tokio::test]
    async fn test_backoff_longer_than_deadline_gives_up() {
        let gateway = Arc::new(MemoryGateway::new().with_call_failure(
            "token-0",
            GatewayError::Transport("connection reset".into()),
            u32::MAX,
        ));
        let slow_retry = RetryPolicy {
            max_attempts: 3,
            backoff: BackoffConfig {
                initial_delay_ms: 2_000,
                max_delay_ms: 2_000,
                multiplier: 1.0,
                jitter_factor: 0.0,
            },
        };
        let dispatcher = NotificationDispatcher::new(gateway.clone()).with_retry_policy(slow_retry);

        let request = DispatchRequest::new(PushContent::new("hi"), DeliveryTarget::devices(tokens(2)))
            .with_timeout(Duration::from_millis(100));

        let started = Instant::now();
        let result = dispatcher.dispatch(request).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(1_000));
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(result.outcomes[0].attempts, 1);
        assert_eq!(dispatcher.stats().gateway_retries, 0);
        assert_eq!(result.retry_candidates.len(), 2);
        assert!(result
            .failed()
            .values()
            .all(|r| *r == FailureReason::Unavailable));
    }

    #[tokio::test]
    async fn test_topic_unavailable_retried() {
        let gateway = Arc::new(MemoryGateway::new().with_topic_error("news", "Unavailable"));
        let dispatcher =
            NotificationDispatcher::new(gateway.clone()).with_retry_policy(fast_retry(3));

        let result = dispatcher
            .dispatch(DispatchRequest::new(
                PushContent::new("hi"),
                DeliveryTarget::topic("news"),
            ))
            .await
            .unwrap();

        assert_eq!(gateway.call_count(), 3);
        assert_eq!(result.outcomes[0].attempts, 3);
        assert_eq!(result.outcomes[0].call_error, Some(FailureReason::Unavailable));
        assert_eq!(result.total_succeeded, 0);
        assert_eq!(dispatcher.stats().gateway_retries, 2);
    }

    #[tokio::test]
    async fn test_topic_dispatch() {
        let gateway = Arc::new(MemoryGateway::new());
        let dispatcher = NotificationDispatcher::new(gateway.clone());

        let result = dispatcher
            .dispatch(DispatchRequest::new(
                PushContent::new("Match starts soon"),
                DeliveryTarget::topic_from_label("Firebase Push Notifications"),
            ))
            .await
            .unwrap();

        assert_eq!(result.total_requested, 1);
        assert_eq!(result.total_succeeded, 1);
        assert_eq!(
            gateway.calls(),
            vec![GatewayCall::Topic("firebase-push-notifications".into())]
        );
    }

    #[tokio::test]
    async fn test_default_deadline_from_config() {
        let dispatch = DispatchConfig {
            default_deadline_ms: Some(60_000),
            ..Default::default()
        };
        let dispatcher = NotificationDispatcher::from_config(
            Arc::new(MemoryGateway::new()),
            &dispatch,
            &MessageConfig::default(),
        );

        let request = DispatchRequest::new(PushContent::new("hi"), DeliveryTarget::topic("news"));
        let deadline = dispatcher.effective_deadline(&request).unwrap();
        assert_eq!(deadline - request.requested_at, chrono::Duration::seconds(60));
    }
}
