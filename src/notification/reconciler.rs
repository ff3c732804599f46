//! Classifies per-recipient failures into follow-up actions.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::resolver::RecipientResolver;

use super::outcome::{DeliveryOutcome, FailureReason};
use super::types::DeviceId;

/// Follow-up actions derived from a dispatch's outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Dead tokens and why
    pub invalidations: BTreeMap<DeviceId, FailureReason>,
    /// Transient failures the caller may retry later
    pub retry_candidates: BTreeSet<DeviceId>,
    /// Failures caused by the request itself (e.g. oversized payload)
    pub caller_defects: BTreeSet<DeviceId>,
    /// Failures with no known cause
    pub unexplained: BTreeSet<DeviceId>,
    /// Old token to canonical token
    pub replacements: BTreeMap<DeviceId, DeviceId>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.invalidations.is_empty()
            && self.retry_candidates.is_empty()
            && self.caller_defects.is_empty()
            && self.unexplained.is_empty()
            && self.replacements.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailureReconciler;

impl FailureReconciler {
    pub fn reconcile(&self, outcomes: &[DeliveryOutcome]) -> Reconciliation {
        let mut reconciliation = Reconciliation::default();

        for outcome in outcomes {
            for (id, reason) in &outcome.failed {
                match reason {
                    FailureReason::InvalidToken | FailureReason::NotRegistered => {
                        reconciliation.invalidations.insert(id.clone(), *reason);
                    }
                    FailureReason::RateLimited | FailureReason::Unavailable => {
                        reconciliation.retry_candidates.insert(id.clone());
                    }
                    FailureReason::MessageTooLarge => {
                        reconciliation.caller_defects.insert(id.clone());
                    }
                    FailureReason::Unknown => {
                        reconciliation.unexplained.insert(id.clone());
                    }
                }
            }

            for (old, new) in &outcome.canonical_ids {
                reconciliation.replacements.insert(old.clone(), new.clone());
            }
        }

        // A token reported dead elsewhere is not worth replacing
        reconciliation
            .replacements
            .retain(|old, _| !reconciliation.invalidations.contains_key(old));

        reconciliation
    }

    /// Forward invalidations and replacements to the resolver
    pub fn notify(&self, reconciliation: &Reconciliation, resolver: &dyn RecipientResolver) {
        for (id, reason) in &reconciliation.invalidations {
            resolver.invalidate(id, *reason);
        }
        for (old, new) in &reconciliation.replacements {
            resolver.replace(old, new);
        }
    }
}
