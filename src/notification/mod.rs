//! Notification dispatch core.
//!
//! A dispatch flows through these stages:
//!
//! - `MessageBuilder` validates caller content into a `NotificationMessage`
//! - the batcher splits device targets into gateway-sized batches
//! - a `DeliveryStrategy` per target kind performs each gateway call
//! - `NotificationDispatcher` runs batches with bounded concurrency and retries
//! - `FailureReconciler` turns per-recipient failures into follow-up actions

mod batcher;
mod builder;
mod dispatcher;
mod outcome;
mod reconciler;
mod strategy;
mod types;

pub use batcher::{split, Batch, MAX_IDS_PER_CALL};
pub use builder::{MessageBuilder, DEFAULT_SOUND, MAX_PAYLOAD_BYTES, MAX_TIME_TO_LIVE_SECONDS};
pub use dispatcher::{DispatcherStats, DispatcherStatsSnapshot, NotificationDispatcher};
pub use outcome::{BatchStatus, DeliveryOutcome, DispatchResult, FailureReason};
pub use reconciler::{FailureReconciler, Reconciliation};
pub use strategy::{
    strategy_for, DeliveryStrategy, DeviceGroupStrategy, DevicesStrategy, Recipients,
    TopicStrategy,
};
pub use types::{
    slugify, DeliveryTarget, DeviceId, DispatchRequest, NotificationMessage, Priority,
    PushContent, TargetKind, MAX_DEVICE_GROUP_MEMBERS,
};
