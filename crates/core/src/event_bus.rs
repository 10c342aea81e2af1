//! Rewards event bus: trait for emitting ledger, tier, referral and coupon
//! events from the engine.
//!
//! The engine accepts an `Arc<dyn EventSink>` so deployments can forward
//! events to their analytics pipeline or customer notification service.

use crate::loyalty::CustomerId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RewardsEventType {
    ProfileCreated,
    PointsEarned,
    PointsRedeemed,
    PointsExpired,
    TierUpgrade,
    TierDowngrade,
    TierExpiryWarning,
    ReferralTracked,
    ReferralAwarded,
    CouponCommitted,
    ConfigUpdated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsEvent {
    pub event_id: Uuid,
    pub event_type: RewardsEventType,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// Order id, coupon code or campaign code the event concerns.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub points: Option<u64>,
    #[serde(default)]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for emitting rewards events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RewardsEvent);
}

/// No-op sink for deployments that don't consume events.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: RewardsEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<RewardsEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<RewardsEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: RewardsEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: RewardsEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for creating a `RewardsEvent` with minimal boilerplate.
pub fn make_event(
    event_type: RewardsEventType,
    customer_id: Option<CustomerId>,
    reference: Option<String>,
    points: Option<u64>,
    timestamp: DateTime<Utc>,
) -> RewardsEvent {
    RewardsEvent {
        event_id: Uuid::new_v4(),
        event_type,
        customer_id,
        reference,
        points,
        detail: None,
        timestamp,
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
