use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{DeviceId, TargetKind};

/// Why the gateway did not deliver to a recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Token is malformed or belongs to another sender
    InvalidToken,
    /// App was uninstalled or the token expired
    NotRegistered,
    /// Payload exceeds the gateway limit
    MessageTooLarge,
    /// Gateway is throttling this device or topic
    RateLimited,
    /// Gateway or transport unavailable, or the batch never started
    Unavailable,
    Unknown,
}

impl FailureReason {
    /// Map a gateway per-recipient error code
    pub fn from_gateway_code(code: &str) -> Self {
        match code {
            "InvalidRegistration" | "MissingRegistration" | "MismatchSenderId" => {
                FailureReason::InvalidToken
            }
            "NotRegistered" => FailureReason::NotRegistered,
            "MessageTooBig" => FailureReason::MessageTooLarge,
            "DeviceMessageRateExceeded" | "TopicsMessageRateExceeded" => {
                FailureReason::RateLimited
            }
            "Unavailable" | "InternalServerError" => FailureReason::Unavailable,
            _ => FailureReason::Unknown,
        }
    }

    /// The token is dead and should be removed from the registry
    pub fn invalidates_token(&self) -> bool {
        matches!(self, FailureReason::InvalidToken | FailureReason::NotRegistered)
    }

    /// The device may still be valid; the caller can retry later
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureReason::RateLimited | FailureReason::Unavailable)
    }

    /// The request itself was defective
    pub fn is_caller_defect(&self) -> bool {
        matches!(self, FailureReason::MessageTooLarge)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InvalidToken => "invalid_token",
            FailureReason::NotRegistered => "not_registered",
            FailureReason::MessageTooLarge => "message_too_large",
            FailureReason::RateLimited => "rate_limited",
            FailureReason::Unavailable => "unavailable",
            FailureReason::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of one gateway call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Delivered,
    Partial,
    Failed,
}

/// Result of sending one batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub batch_index: usize,
    pub kind: TargetKind,
    /// Recipients addressed by this batch
    pub requested: usize,
    /// Recipients the gateway accepted
    pub accepted: usize,
    pub succeeded: BTreeSet<DeviceId>,
    pub failed: BTreeMap<DeviceId, FailureReason>,
    pub status: BatchStatus,
    /// Set when the call as a whole failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_error: Option<FailureReason>,
    /// Old token to the canonical token reported by the gateway
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub canonical_ids: BTreeMap<DeviceId, DeviceId>,
    pub attempts: u32,
}

impl DeliveryOutcome {
    pub fn new(batch_index: usize, kind: TargetKind, requested: usize) -> Self {
        Self {
            batch_index,
            kind,
            requested,
            accepted: 0,
            succeeded: BTreeSet::new(),
            failed: BTreeMap::new(),
            status: BatchStatus::Failed,
            call_error: None,
            canonical_ids: BTreeMap::new(),
            attempts: 0,
        }
    }

    /// Recompute `status` from the accepted count
    pub(crate) fn settle(mut self) -> Self {
        self.status = if self.call_error.is_some() || self.accepted == 0 {
            BatchStatus::Failed
        } else if self.accepted >= self.requested {
            BatchStatus::Delivered
        } else {
            BatchStatus::Partial
        };
        self
    }

    pub fn failed_count(&self) -> usize {
        self.requested.saturating_sub(self.accepted)
    }
}

/// Everything the caller learns from one dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub dispatch_id: Uuid,
    pub target: TargetKind,
    pub total_requested: usize,
    pub total_succeeded: usize,
    pub outcomes: Vec<DeliveryOutcome>,
    /// Tokens the recipient registry should drop
    pub invalidations: BTreeSet<DeviceId>,
    /// Tokens that failed transiently and may be retried later
    pub retry_candidates: BTreeSet<DeviceId>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub canonical_ids: BTreeMap<DeviceId, DeviceId>,
}

impl DispatchResult {
    /// Result of a dispatch that had nothing to send
    pub fn empty(dispatch_id: Uuid, target: TargetKind) -> Self {
        Self {
            dispatch_id,
            target,
            total_requested: 0,
            total_succeeded: 0,
            outcomes: Vec::new(),
            invalidations: BTreeSet::new(),
            retry_candidates: BTreeSet::new(),
            canonical_ids: BTreeMap::new(),
        }
    }

    pub fn total_failed(&self) -> usize {
        self.total_requested.saturating_sub(self.total_succeeded)
    }

    /// Per-recipient failures across all batches
    pub fn failed(&self) -> BTreeMap<DeviceId, FailureReason> {
        self.outcomes
            .iter()
            .flat_map(|o| o.failed.iter().map(|(id, reason)| (id.clone(), *reason)))
            .collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.total_succeeded == self.total_requested
    }
}
