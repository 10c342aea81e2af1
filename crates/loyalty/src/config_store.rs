//! Configuration Store: the singleton program configuration record.
//!
//! Read on every engine call, written only by administrators. Writes are
//! validated so the tier table stays contiguous and ordered.

use crate::store::{DocumentCollection, PROGRAM_CONFIG_ID};
use rewards_core::event_bus::{make_event, EventSink, RewardsEventType};
use rewards_core::loyalty::{LoyaltyTier, ProgramConfig, TierRule};
use rewards_core::RewardsResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ConfigStore {
    records: Arc<dyn DocumentCollection<ProgramConfig>>,
    events: Arc<dyn EventSink>,
}

impl ConfigStore {
    pub fn new(
        records: Arc<dyn DocumentCollection<ProgramConfig>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { records, events }
    }

    /// Current configuration, or program defaults if none was ever written.
    pub fn get(&self) -> ProgramConfig {
        self.records.get(PROGRAM_CONFIG_ID).unwrap_or_default()
    }

    /// Write `config` only if no record exists yet. Returns whether it was written.
    pub fn seed(&self, config: ProgramConfig) -> RewardsResult<bool> {
        config.validate()?;
        match self.records.insert_new(PROGRAM_CONFIG_ID, config) {
            Ok(()) => {
                info!("Program configuration seeded");
                Ok(true)
            }
            Err(rewards_core::RewardsError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn update(&self, config: ProgramConfig, now: DateTime<Utc>) -> RewardsResult<ProgramConfig> {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Rejected program configuration update");
            return Err(e);
        }
        self.records.put(PROGRAM_CONFIG_ID, config.clone());

        info!(
            active = config.is_active,
            tiers = config.tiers.len(),
            expiry_months = config.points_expiry_months,
            "Program configuration updated"
        );
        self.events.emit(make_event(
            RewardsEventType::ConfigUpdated,
            None,
            None,
            None,
            now,
        ));
        Ok(config)
    }

    /// Rule for `tier` under the current configuration.
    pub fn tier_rule(&self, tier: LoyaltyTier) -> Option<TierRule> {
        self.get().tier_rule(tier).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCollection;
    use chrono::TimeZone;
    use rewards_core::event_bus::capture_sink;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn store() -> (ConfigStore, Arc<rewards_core::event_bus::CaptureSink>) {
        let sink = capture_sink();
        let store = ConfigStore::new(Arc::new(MemoryCollection::new("config")), sink.clone());
        (store, sink)
    }

    #[test]
    fn test_defaults_when_unset() {
        let (store, _) = store();
        assert_eq!(store.get(), ProgramConfig::default());
        assert_eq!(
            store.tier_rule(LoyaltyTier::Silver).unwrap().min_cumulative_spend,
            500.0
        );
    }

    #[test]
    fn test_update_validates_and_persists() {
        let (store, sink) = store();
        let mut config = ProgramConfig::default();
        config.welcome_bonus_points = 80;
        store.update(config, t0()).unwrap();
        assert_eq!(store.get().welcome_bonus_points, 80);
        assert_eq!(sink.count_type(RewardsEventType::ConfigUpdated), 1);
        assert_eq!(sink.events()[0].timestamp, t0());

        let mut broken = store.get();
        broken.tiers.get_mut(&LoyaltyTier::Gold).unwrap().min_cumulative_spend = 1000.0;
        assert!(store.update(broken, t0()).is_err());
        assert_eq!(
            store.tier_rule(LoyaltyTier::Gold).unwrap().min_cumulative_spend,
            1500.0
        );
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let (store, _) = store();
        let first = ProgramConfig {
            review_bonus_points: 40,
            ..Default::default()
        };
        assert!(store.seed(first).unwrap());
        let second = ProgramConfig {
            review_bonus_points: 99,
            ..Default::default()
        };
        assert!(!store.seed(second).unwrap());
        assert_eq!(store.get().review_bonus_points, 40);
    }
}
