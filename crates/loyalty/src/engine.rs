//! Rewards engine facade: the calls the storefront makes at account,
//! checkout and order-finalization time, plus the administrative surface.

use crate::config_store::ConfigStore;
use crate::coupon::{CouponCommit, CouponRedeemer};
use crate::ledger::{PointsLedger, RedeemRequest};
use crate::profile::{
    customer_id_for, ensure_can_earn, normalize_email, BonusAward, OrderOutcome, ProfileService,
};
use crate::referral::ReferralTracker;
use crate::store::RewardsStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rewards_core::coupon::{Coupon, CouponType, CouponValidation, NewCoupon};
use rewards_core::event_bus::{noop_sink, EventSink};
use rewards_core::loyalty::{
    CustomerId, PointsTransaction, ProgramConfig, ReferralLink, RewardsProfile, TransactionId,
};
use rewards_core::referral::{CampaignType, NewCampaign, ReferralCampaign, ReferralValidation};
use rewards_core::{RewardsError, RewardsResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionReceipt {
    pub customer_id: CustomerId,
    pub order_id: String,
    pub transaction_id: TransactionId,
    pub points: u64,
    /// Currency value of the redeemed points.
    pub discount_amount: f64,
    pub new_balance: i64,
    /// The order had already redeemed points; this is the original receipt.
    pub duplicate: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub profiles_scanned: usize,
    pub transactions_expired: usize,
    pub periods_rolled: u32,
    pub tier_upgrades: usize,
    pub tier_downgrades: usize,
    pub warnings_raised: usize,
    pub errors: usize,
}

pub struct RewardsEngine {
    config: Arc<ConfigStore>,
    ledger: Arc<PointsLedger>,
    profiles: ProfileService,
    referrals: Arc<ReferralTracker>,
    coupons: CouponRedeemer,
    clock: Clock,
}

impl RewardsEngine {
    pub fn new(store: RewardsStore, events: Arc<dyn EventSink>) -> Self {
        let config = Arc::new(ConfigStore::new(store.config.clone(), events.clone()));
        let ledger = Arc::new(PointsLedger::new(store.ledgers.clone(), events.clone()));
        let referrals = Arc::new(ReferralTracker::new(
            store.campaigns.clone(),
            store.profiles.clone(),
            ledger.clone(),
            events.clone(),
        ));
        let profiles = ProfileService::new(
            store.profiles.clone(),
            config.clone(),
            ledger.clone(),
            referrals.clone(),
            events.clone(),
        );
        let coupons = CouponRedeemer::new(store.coupons.clone(), events);

        info!("Rewards engine initialized");
        Self {
            config,
            ledger,
            profiles,
            referrals,
            coupons,
            clock: Arc::new(Utc::now),
        }
    }

    /// In-memory engine with events discarded.
    pub fn in_memory() -> Self {
        Self::new(RewardsStore::in_memory(), noop_sink())
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ─── Account & checkout ─────────────────────────────────────────────

    /// Profile for `email`, enrolled on first sight, with points and tier
    /// fields refreshed.
    pub fn get_rewards_profile(&self, email: &str) -> RewardsResult<RewardsProfile> {
        self.profiles.get_or_create(email, None, self.now())
    }

    pub fn enroll(&self, email: &str, name: Option<&str>) -> RewardsResult<RewardsProfile> {
        self.profiles.get_or_create(email, name, self.now())
    }

    pub fn profile(&self, customer_id: CustomerId) -> RewardsResult<RewardsProfile> {
        self.profiles.recompute(customer_id, self.now())
    }

    pub fn customer_id_for_email(&self, email: &str) -> CustomerId {
        customer_id_for(&normalize_email(email))
    }

    /// Spend points against an order. Idempotent per order id.
    pub fn apply_points_redemption(
        &self,
        customer_id: CustomerId,
        points: u64,
        order_id: &str,
    ) -> RewardsResult<RedemptionReceipt> {
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(RewardsError::InvalidInput("order id is required".into()));
        }
        let now = self.now();
        let config = self.config.get();
        let profile = self.profiles.get(customer_id)?;
        ensure_can_earn(&profile, &config)?;

        let entry = self.ledger.redeem(
            RedeemRequest {
                customer_id,
                points,
                order_id: order_id.to_string(),
                description: format!("Redeemed on order {order_id}"),
            },
            &config,
            now,
        )?;
        self.profiles.recompute(customer_id, now)?;

        Ok(RedemptionReceipt {
            customer_id,
            order_id: order_id.to_string(),
            transaction_id: entry.transaction.id,
            points: entry.transaction.points,
            discount_amount: config.points_value(entry.transaction.points),
            new_balance: entry.available_after,
            duplicate: entry.replayed,
        })
    }

    pub fn on_order_completed(
        &self,
        customer_id: CustomerId,
        order_amount: f64,
        order_id: &str,
    ) -> RewardsResult<OrderOutcome> {
        self.profiles
            .on_order_completed(customer_id, order_amount, order_id, self.now())
    }

    pub fn validate_referral_code(
        &self,
        code: &str,
        email: &str,
        customer_id: Option<CustomerId>,
    ) -> ReferralValidation {
        self.referrals.validate(code, email, customer_id, self.now())
    }

    /// Attach a referral or campaign code to a customer before their first
    /// order. The bonus is granted when that order completes.
    pub fn apply_referral_code(
        &self,
        code: &str,
        email: &str,
        customer_id: CustomerId,
    ) -> RewardsResult<ReferralLink> {
        self.referrals.apply(code, email, customer_id, self.now())
    }

    pub fn validate_coupon(&self, code: &str, cart_total: f64, user: &str) -> CouponValidation {
        self.coupons.validate(code, cart_total, user, self.now())
    }

    pub fn commit_coupon_usage(
        &self,
        coupon_id: uuid::Uuid,
        user: &str,
        order_id: &str,
    ) -> RewardsResult<CouponCommit> {
        self.coupons.commit(coupon_id, user, order_id, self.now())
    }

    pub fn award_birthday_bonus(&self, customer_id: CustomerId) -> RewardsResult<BonusAward> {
        self.profiles.award_birthday_bonus(customer_id, self.now())
    }

    pub fn award_review_bonus(
        &self,
        customer_id: CustomerId,
        review_id: &str,
    ) -> RewardsResult<BonusAward> {
        self.profiles
            .award_review_bonus(customer_id, review_id, self.now())
    }

    pub fn set_birthday(
        &self,
        customer_id: CustomerId,
        birthday: NaiveDate,
    ) -> RewardsResult<RewardsProfile> {
        self.profiles.set_birthday(customer_id, birthday, self.now())
    }

    // ─── Administration ─────────────────────────────────────────────────

    pub fn program_config(&self) -> ProgramConfig {
        self.config.get()
    }

    pub fn update_program_config(&self, config: ProgramConfig) -> RewardsResult<ProgramConfig> {
        self.config.update(config, self.now())
    }

    /// Write the initial program configuration unless one already exists.
    pub fn seed_program_config(&self, config: ProgramConfig) -> RewardsResult<bool> {
        self.config.seed(config)
    }

    pub fn list_transactions(&self, customer_id: CustomerId) -> RewardsResult<Vec<PointsTransaction>> {
        self.profiles.get(customer_id)?;
        Ok(self.ledger.transactions(customer_id))
    }

    pub fn list_campaigns(&self) -> Vec<ReferralCampaign> {
        self.referrals.list()
    }

    pub fn create_campaign(&self, request: NewCampaign) -> RewardsResult<ReferralCampaign> {
        self.referrals.create_campaign(request, self.now())
    }

    pub fn set_campaign_active(&self, code: &str, active: bool) -> RewardsResult<ReferralCampaign> {
        self.referrals.set_active(code, active)
    }

    pub fn list_coupons(&self) -> Vec<Coupon> {
        self.coupons.list()
    }

    pub fn create_coupon(&self, request: NewCoupon) -> RewardsResult<Coupon> {
        self.coupons.create(request, self.now())
    }

    pub fn reenable_coupon_user(&self, code: &str, user: &str) -> RewardsResult<Coupon> {
        self.coupons.reenable_user(code, user)
    }

    pub fn award_manual_points(
        &self,
        customer_id: CustomerId,
        points: u64,
        description: &str,
    ) -> RewardsResult<BonusAward> {
        self.profiles
            .award_manual(customer_id, points, description, self.now())
    }

    pub fn deactivate_profile(&self, customer_id: CustomerId) -> RewardsResult<RewardsProfile> {
        self.profiles.deactivate(customer_id, self.now())
    }

    /// Flag expired earns and roll annual periods for every profile.
    /// Safe to run repeatedly; balances never depend on it.
    pub fn run_maintenance(&self, as_of: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        for profile in self.profiles.list() {
            report.profiles_scanned += 1;
            let customer_id = profile.customer_id;

            match self.ledger.expire_stale(customer_id, as_of) {
                Ok(n) => report.transactions_expired += n,
                Err(e) => {
                    report.errors += 1;
                    warn!(customer_id = %customer_id, error = %e, "Expiry sweep failed");
                }
            }

            match self.profiles.recompute_detailed(customer_id, as_of) {
                Ok(outcome) => {
                    report.periods_rolled += outcome.periods_rolled;
                    for change in &outcome.tier_changes {
                        if change.to > change.from {
                            report.tier_upgrades += 1;
                        } else {
                            report.tier_downgrades += 1;
                        }
                    }
                    if outcome.warning_raised {
                        report.warnings_raised += 1;
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(customer_id = %customer_id, error = %e, "Profile recompute failed");
                }
            }
        }

        metrics::counter!("rewards.maintenance_runs").increment(1);
        info!(
            profiles = report.profiles_scanned,
            expired = report.transactions_expired,
            downgrades = report.tier_downgrades,
            warnings = report.warnings_raised,
            errors = report.errors,
            "Maintenance sweep complete"
        );
        report
    }

    /// Run the sweep as of the engine clock.
    pub fn run_maintenance_now(&self) -> MaintenanceReport {
        self.run_maintenance(self.now())
    }

    /// Seed demo campaigns, coupons and a customer for local development.
    pub fn seed_demo_data(&self) -> RewardsResult<()> {
        let now = self.now();
        self.seed_program_config(ProgramConfig::default())?;

        let campaigns = [
            ("SPRING26", 150, Some(500), 25.0, "Spring tasting box launch"),
            ("GIFTBOX", 75, None, 0.0, "Gift box newsletter signup"),
        ];
        for (code, bonus, max_uses, min_order, description) in campaigns {
            if self.referrals.get(code).is_some() {
                continue;
            }
            self.create_campaign(NewCampaign {
                code: code.into(),
                kind: CampaignType::Campaign,
                valid_from: Some(now),
                valid_until: Some(now + Duration::days(90)),
                max_uses,
                bonus_points: bonus,
                discount_percent: None,
                min_order_amount: min_order,
                per_user_limit: 1,
                description: description.into(),
            })?;
        }

        let coupons = [
            ("CACAO10", CouponType::Percentage, 10.0, true, Some(1000), Some(25.0)),
            ("TRUFFLE5", CouponType::Fixed, 5.0, false, None, None),
        ];
        for (code, kind, value, reusable, max_uses, max_discount) in coupons {
            if self.coupons.get(code).is_some() {
                continue;
            }
            self.create_coupon(NewCoupon {
                code: code.into(),
                kind,
                value,
                reusable,
                max_uses,
                min_cart_total: 15.0,
                max_discount,
                expires_at: Some(now + Duration::days(60)),
            })?;
        }

        let demo = self.enroll("demo@cocoa.shop", Some("Demo Customer"))?;
        self.on_order_completed(demo.customer_id, 64.50, "demo-order-1")?;

        info!(
            campaigns = self.list_campaigns().len(),
            coupons = self.list_coupons().len(),
            "Seeded demo rewards data"
        );
        Ok(())
    }
}
