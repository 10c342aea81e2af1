//! Customer Rewards Profile: enrollment, spend tracking, tier maintenance
//! and the activity bonuses (welcome, birthday, review, manual).
//!
//! `recompute` is the only path that changes `tier_level`. It rolls every
//! annual period that has ended, runs the Tier Calculator at each boundary
//! and once for the present, and refreshes the cached points fields from
//! the ledger.

use crate::config_store::ConfigStore;
use crate::ledger::{EarnRequest, PointsLedger, MAX_LEDGER_POINTS};
use crate::referral::{ReferralAward, ReferralTracker};
use crate::store::DocumentCollection;
use crate::tier::{compute_tier, TierInput};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use rand::Rng;
use rewards_core::event_bus::{make_event, EventSink, RewardsEventType};
use rewards_core::loyalty::{
    AnnualPeriodAlignment, CustomerId, EarnReason, LoyaltyTier, ProgramConfig, RewardsProfile,
    TransactionId,
};
use rewards_core::{RewardsError, RewardsResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const REFERRAL_CODE_ATTEMPTS: usize = 32;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Stable customer id for a normalized email. Concurrent first calls for
/// the same email derive the same id and converge on one record.
pub fn customer_id_for(email: &str) -> CustomerId {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("mailto:{email}").as_bytes())
}

/// Up to five ASCII letters from the name (or the email's local part),
/// uppercased and padded with `X`.
pub fn referral_prefix(name: Option<&str>, email: &str) -> String {
    let letters = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_ascii_alphabetic())
            .take(5)
            .collect::<String>()
            .to_ascii_uppercase()
    };
    let mut prefix = name.map(letters).unwrap_or_default();
    if prefix.is_empty() {
        prefix = letters(email.split('@').next().unwrap_or_default());
    }
    while prefix.len() < 5 {
        prefix.push('X');
    }
    prefix
}

/// Start of the annual period containing `now` for a new enrollment.
fn initial_period_start(config: &ProgramConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    match config.annual_period_alignment {
        AnnualPeriodAlignment::Anniversary => now,
        AnnualPeriodAlignment::CalendarYear => Utc
            .with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(now),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierChange {
    pub from: LoyaltyTier,
    pub to: LoyaltyTier,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RecomputeOutcome {
    pub profile: RewardsProfile,
    pub tier_changes: Vec<TierChange>,
    pub warning_raised: bool,
    pub periods_rolled: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub customer_id: CustomerId,
    pub order_id: String,
    /// The order had already been processed; nothing changed.
    pub duplicate: bool,
    pub points_earned: u64,
    pub tier_before: LoyaltyTier,
    pub tier_after: LoyaltyTier,
    #[serde(default)]
    pub referral: Option<ReferralAward>,
    pub profile: RewardsProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BonusAward {
    pub customer_id: CustomerId,
    pub transaction_id: TransactionId,
    pub reason: EarnReason,
    pub points: u64,
    /// An earlier call already granted this bonus.
    pub already_awarded: bool,
    pub new_balance: i64,
}

pub struct ProfileService {
    profiles: Arc<dyn DocumentCollection<RewardsProfile>>,
    config: Arc<ConfigStore>,
    ledger: Arc<PointsLedger>,
    referrals: Arc<ReferralTracker>,
    events: Arc<dyn EventSink>,
}

impl ProfileService {
    pub fn new(
        profiles: Arc<dyn DocumentCollection<RewardsProfile>>,
        config: Arc<ConfigStore>,
        ledger: Arc<PointsLedger>,
        referrals: Arc<ReferralTracker>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            profiles,
            config,
            ledger,
            referrals,
            events,
        }
    }

    pub fn get(&self, customer_id: CustomerId) -> RewardsResult<RewardsProfile> {
        self.profiles
            .get(&customer_id.to_string())
            .ok_or_else(|| RewardsError::NotFound(format!("customer {customer_id}")))
    }

    pub fn find_by_email(&self, email: &str) -> Option<RewardsProfile> {
        self.profiles
            .get(&customer_id_for(&normalize_email(email)).to_string())
    }

    pub fn list(&self) -> Vec<RewardsProfile> {
        self.profiles.list()
    }

    /// Load the profile for `email`, enrolling the customer on first sight.
    pub fn get_or_create(
        &self,
        email: &str,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> RewardsResult<RewardsProfile> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(RewardsError::InvalidInput(format!("invalid email {email:?}")));
        }
        let customer_id = customer_id_for(&email);
        if self.profiles.get(&customer_id.to_string()).is_some() {
            return self.recompute(customer_id, now);
        }

        let config = self.config.get();
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let prefix = referral_prefix(name, &email);

        let mut issued = None;
        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            let code = format!("{prefix}{:04}", rand::thread_rng().gen_range(0..10_000));
            match self.referrals.issue_personal_code(
                &code,
                customer_id,
                &email,
                config.referral_bonus_points,
                now,
            ) {
                Ok(campaign) => {
                    issued = Some(campaign);
                    break;
                }
                Err(RewardsError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        let campaign = issued.ok_or_else(|| {
            RewardsError::Conflict(format!("no free referral code for prefix {prefix}"))
        })?;

        let profile = RewardsProfile::new(
            customer_id,
            email.clone(),
            name.map(str::to_string),
            campaign.code.clone(),
            initial_period_start(&config, now),
            now,
        );
        match self.profiles.insert_new(&customer_id.to_string(), profile) {
            Ok(()) => {}
            Err(RewardsError::Conflict(_)) => {
                // Lost the enrollment race; the winner's record stands.
                self.referrals.withdraw_personal_code(&campaign.code, customer_id);
                return self.recompute(customer_id, now);
            }
            Err(e) => {
                self.referrals.withdraw_personal_code(&campaign.code, customer_id);
                return Err(e);
            }
        }

        metrics::counter!("rewards.profiles_created").increment(1);
        info!(
            customer_id = %customer_id,
            email = %email,
            referral_code = %campaign.code,
            "Rewards profile created"
        );
        self.events.emit(make_event(
            RewardsEventType::ProfileCreated,
            Some(customer_id),
            Some(campaign.code),
            None,
            now,
        ));

        if config.is_active && config.welcome_bonus_points > 0 {
            self.ledger.earn(
                EarnRequest::new(customer_id, config.welcome_bonus_points, EarnReason::Welcome)
                    .with_key("welcome")
                    .with_description("Welcome bonus"),
                &config,
                now,
            )?;
        }
        self.recompute(customer_id, now)
    }

    pub fn recompute(&self, customer_id: CustomerId, now: DateTime<Utc>) -> RewardsResult<RewardsProfile> {
        Ok(self.recompute_detailed(customer_id, now)?.profile)
    }

    pub fn recompute_detailed(
        &self,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> RewardsResult<RecomputeOutcome> {
        let config = self.config.get();
        let mut changes: Vec<TierChange> = Vec::new();
        let mut warning_raised = false;
        let mut periods_rolled = 0u32;
        let profile = self.profiles.update(&customer_id.to_string(), &mut |p| {
            changes.clear();
            warning_raised = false;
            periods_rolled = 0;

            while now >= p.annual_period_end() {
                let boundary = p.annual_period_end();
                let decision = compute_tier(
                    &TierInput {
                        total_spent: p.total_spent,
                        annual_spent: p.annual_spent,
                        previous_tier: p.tier_level,
                        tier_cap: p.tier_cap,
                        at_rollover: true,
                        days_until_rollover: 0,
                    },
                    &config,
                );
                if decision.tier != p.tier_level {
                    changes.push(TierChange {
                        from: p.tier_level,
                        to: decision.tier,
                        at: boundary,
                    });
                    p.tier_level = decision.tier;
                    p.tier_since = boundary;
                }
                p.tier_cap = decision.cap;
                p.annual_period_start = boundary;
                p.annual_spent = 0.0;
                periods_rolled += 1;
            }

            let decision = compute_tier(
                &TierInput {
                    total_spent: p.total_spent,
                    annual_spent: p.annual_spent,
                    previous_tier: p.tier_level,
                    tier_cap: p.tier_cap,
                    at_rollover: false,
                    days_until_rollover: p.days_until_rollover(now),
                },
                &config,
            );
            if decision.tier != p.tier_level {
                changes.push(TierChange {
                    from: p.tier_level,
                    to: decision.tier,
                    at: now,
                });
                p.tier_level = decision.tier;
                p.tier_since = now;
            }
            p.tier_cap = decision.cap;
            warning_raised = decision.warning && !p.tier_expiry_warning;
            p.tier_expiry_warning = decision.warning;

            let balance = self
                .ledger
                .balance(customer_id, now, config.expiring_soon_days);
            p.loyalty_points = balance.available;
            p.lifetime_points = balance.lifetime;
            p.points_expiring_soon = balance.expiring_soon;
            p.updated_at = now;
            Ok(())
        })?;

        for change in &changes {
            let upgrade = change.to > change.from;
            let (event_type, metric) = if upgrade {
                (RewardsEventType::TierUpgrade, "rewards.tier_upgrades")
            } else {
                (RewardsEventType::TierDowngrade, "rewards.tier_downgrades")
            };
            metrics::counter!(metric).increment(1);
            info!(
                customer_id = %customer_id,
                from = %change.from,
                to = %change.to,
                total_spent = profile.total_spent,
                "Tier {}",
                if upgrade { "upgraded" } else { "downgraded" }
            );
            let mut event = make_event(event_type, Some(customer_id), None, None, change.at);
            event.detail = Some(format!("{} -> {}", change.from, change.to));
            self.events.emit(event);
        }
        if warning_raised {
            info!(
                customer_id = %customer_id,
                tier = %profile.tier_level,
                annual_spent = profile.annual_spent,
                rollover = %profile.annual_period_end(),
                "Tier at risk at next rollover"
            );
            let mut event = make_event(
                RewardsEventType::TierExpiryWarning,
                Some(customer_id),
                None,
                None,
                now,
            );
            event.detail = Some(profile.tier_level.to_string());
            self.events.emit(event);
        }

        Ok(RecomputeOutcome {
            profile,
            tier_changes: changes,
            warning_raised,
            periods_rolled,
        })
    }

    /// Fold a completed order into spend and award purchase points.
    /// Idempotent per order id.
    pub fn on_order_completed(
        &self,
        customer_id: CustomerId,
        order_amount: f64,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> RewardsResult<OrderOutcome> {
        if !order_amount.is_finite() || order_amount < 0.0 {
            return Err(RewardsError::InvalidAmount(format!(
                "order amount {order_amount} must be non-negative"
            )));
        }
        let order_id = order_id.trim();
        if order_id.is_empty() {
            return Err(RewardsError::InvalidInput("order id is required".into()));
        }

        // Roll any finished period first so the spend lands in the right one.
        let before = self.recompute(customer_id, now)?;
        let tier_before = before.tier_level;

        let config = self.config.get();
        let fixed_bonus = self
            .config
            .tier_rule(tier_before)
            .map(|r| r.fixed_bonus_points_per_order)
            .unwrap_or(0);
        let points = purchase_points(order_amount, config.points_per_currency_unit, fixed_bonus)?;

        let mut fresh = false;
        let updated = self.profiles.update(&customer_id.to_string(), &mut |p| {
            fresh = p.processed_orders.insert(order_id.to_string());
            if fresh {
                p.total_spent += order_amount;
                p.annual_spent += order_amount;
                p.orders_count += 1;
                p.updated_at = now;
            }
            Ok(())
        })?;

        if !fresh {
            debug!(customer_id = %customer_id, order_id = %order_id, "Order already processed");
            let points_earned = self
                .ledger
                .transactions(customer_id)
                .iter()
                .filter(|tx| {
                    tx.earn_reason == Some(EarnReason::Purchase)
                        && tx.order_id.as_deref() == Some(order_id)
                })
                .map(|tx| tx.points)
                .sum();
            return Ok(OrderOutcome {
                customer_id,
                order_id: order_id.to_string(),
                duplicate: true,
                points_earned,
                tier_before,
                tier_after: before.tier_level,
                referral: None,
                profile: before,
            });
        }

        let mut points_earned = 0;
        if !config.is_active {
            debug!(customer_id = %customer_id, "Program inactive, no purchase points");
        } else if !updated.is_active {
            debug!(customer_id = %customer_id, "Profile inactive, no purchase points");
        } else if points > 0 {
            let earned = self.ledger.earn(
                EarnRequest::new(customer_id, points, EarnReason::Purchase)
                    .with_order(order_id)
                    .with_key(format!("purchase:{order_id}"))
                    .with_description(format!("Order {order_id}")),
                &config,
                now,
            );
            if let Err(e) = earned {
                self.release_order(customer_id, order_id, order_amount, now);
                return Err(e);
            }
            points_earned = points;
        }

        let mut referral = None;
        if updated.has_pending_referral() {
            match self
                .referrals
                .settle_first_order(customer_id, order_amount, order_id, &config, now)
            {
                Ok(Some(award)) => {
                    if let Some(referrer) = award.referrer_id {
                        if let Err(e) = self.recompute(referrer, now) {
                            warn!(referrer = %referrer, error = %e, "Referrer refresh failed");
                        }
                    }
                    referral = Some(award);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        customer_id = %customer_id,
                        order_id = %order_id,
                        error = %e,
                        "Referral settlement failed"
                    );
                }
            }
        }

        let profile = self.recompute(customer_id, now)?;
        metrics::counter!("rewards.orders_processed").increment(1);
        info!(
            customer_id = %customer_id,
            order_id = %order_id,
            amount = order_amount,
            points = points_earned,
            tier = %profile.tier_level,
            "Order completed"
        );

        Ok(OrderOutcome {
            customer_id,
            order_id: order_id.to_string(),
            duplicate: false,
            points_earned,
            tier_before,
            tier_after: profile.tier_level,
            referral,
            profile,
        })
    }

    /// Undo the spend of an order whose purchase points could not be booked,
    /// so a retry processes it again.
    fn release_order(&self, customer_id: CustomerId, order_id: &str, order_amount: f64, now: DateTime<Utc>) {
        let released = self.profiles.update(&customer_id.to_string(), &mut |p| {
            if p.processed_orders.remove(order_id) {
                p.total_spent -= order_amount;
                p.annual_spent = (p.annual_spent - order_amount).max(0.0);
                p.orders_count = p.orders_count.saturating_sub(1);
                p.updated_at = now;
            }
            Ok(())
        });
        if let Err(e) = released {
            warn!(customer_id = %customer_id, order_id = %order_id, error = %e, "Order release failed");
        }
    }

    /// Birthday bonus, at most once per calendar year, during the birthday month.
    pub fn award_birthday_bonus(
        &self,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> RewardsResult<BonusAward> {
        let profile = self.get(customer_id)?;
        let config = self.config.get();
        let birthday = profile
            .birthday
            .ok_or_else(|| RewardsError::NotEligible("no birthday on file".into()))?;
        if birthday.month() != now.month() {
            return Err(RewardsError::NotEligible(format!(
                "birthday bonus is available in month {}",
                birthday.month()
            )));
        }
        let year = now.year();
        let award = self.award(
            &profile,
            &config,
            EarnRequest::new(customer_id, config.birthday_bonus_points, EarnReason::Birthday)
                .with_key(format!("birthday:{year}"))
                .with_description(format!("Birthday bonus {year}")),
            now,
        )?;
        self.profiles.update(&customer_id.to_string(), &mut |p| {
            p.birthday_reward_year = Some(year);
            Ok(())
        })?;
        self.recompute(customer_id, now)?;
        Ok(award)
    }

    /// Review bonus, once per review id.
    pub fn award_review_bonus(
        &self,
        customer_id: CustomerId,
        review_id: &str,
        now: DateTime<Utc>,
    ) -> RewardsResult<BonusAward> {
        let review_id = review_id.trim();
        if review_id.is_empty() {
            return Err(RewardsError::InvalidInput("review id is required".into()));
        }
        let profile = self.get(customer_id)?;
        let config = self.config.get();
        let award = self.award(
            &profile,
            &config,
            EarnRequest::new(customer_id, config.review_bonus_points, EarnReason::Review)
                .with_key(format!("review:{review_id}"))
                .with_description(format!("Review {review_id}")),
            now,
        )?;
        self.recompute(customer_id, now)?;
        Ok(award)
    }

    pub fn award_manual(
        &self,
        customer_id: CustomerId,
        points: u64,
        description: &str,
        now: DateTime<Utc>,
    ) -> RewardsResult<BonusAward> {
        let profile = self.get(customer_id)?;
        let config = self.config.get();
        let award = self.award(
            &profile,
            &config,
            EarnRequest::new(customer_id, points, EarnReason::Manual).with_description(description),
            now,
        )?;
        info!(customer_id = %customer_id, points, description = %description, "Manual points awarded");
        self.recompute(customer_id, now)?;
        Ok(award)
    }

    pub fn set_birthday(
        &self,
        customer_id: CustomerId,
        birthday: NaiveDate,
        now: DateTime<Utc>,
    ) -> RewardsResult<RewardsProfile> {
        if birthday > now.date_naive() {
            return Err(RewardsError::InvalidInput("birthday is in the future".into()));
        }
        self.profiles.update(&customer_id.to_string(), &mut |p| {
            p.birthday = Some(birthday);
            p.updated_at = now;
            Ok(())
        })
    }

    /// Soft-delete: the record stays, earning and redeeming stop.
    pub fn deactivate(&self, customer_id: CustomerId, now: DateTime<Utc>) -> RewardsResult<RewardsProfile> {
        let profile = self.profiles.update(&customer_id.to_string(), &mut |p| {
            p.is_active = false;
            p.updated_at = now;
            Ok(())
        })?;
        info!(customer_id = %customer_id, "Rewards profile deactivated");
        Ok(profile)
    }

    fn award(
        &self,
        profile: &RewardsProfile,
        config: &ProgramConfig,
        request: EarnRequest,
        now: DateTime<Utc>,
    ) -> RewardsResult<BonusAward> {
        ensure_can_earn(profile, config)?;
        let reason = request.reason;
        let entry = self.ledger.earn(request, config, now)?;
        Ok(BonusAward {
            customer_id: profile.customer_id,
            transaction_id: entry.transaction.id,
            reason,
            points: entry.transaction.points,
            already_awarded: entry.replayed,
            new_balance: entry.available_after,
        })
    }
}

/// `floor(amount * rate) + fixed_bonus`, rejected when it cannot be booked.
pub fn purchase_points(order_amount: f64, rate: f64, fixed_bonus: u64) -> RewardsResult<u64> {
    let raw = (order_amount * rate).floor();
    let too_large = || {
        RewardsError::InvalidAmount(format!(
            "order amount {order_amount} earns more than {MAX_LEDGER_POINTS} points"
        ))
    };
    if !raw.is_finite() || raw >= MAX_LEDGER_POINTS as f64 {
        return Err(too_large());
    }
    (raw.max(0.0) as u64)
        .checked_add(fixed_bonus)
        .filter(|points| *points <= MAX_LEDGER_POINTS)
        .ok_or_else(too_large)
}

pub fn ensure_can_earn(profile: &RewardsProfile, config: &ProgramConfig) -> RewardsResult<()> {
    if !config.is_active {
        return Err(RewardsError::Inactive("rewards program is disabled".into()));
    }
    if !profile.is_active {
        return Err(RewardsError::Inactive(format!(
            "customer {} is deactivated",
            profile.customer_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RewardsStore;
    use chrono::Duration;
    use rewards_core::event_bus::{capture_sink, CaptureSink};

    struct Fixture {
        service: ProfileService,
        config: Arc<ConfigStore>,
        ledger: Arc<PointsLedger>,
        referrals: Arc<ReferralTracker>,
        sink: Arc<CaptureSink>,
    }

    fn fixture() -> Fixture {
        let store = RewardsStore::in_memory();
        let sink = capture_sink();
        let config = Arc::new(ConfigStore::new(store.config.clone(), sink.clone()));
        let ledger = Arc::new(PointsLedger::new(store.ledgers.clone(), sink.clone()));
        let referrals = Arc::new(ReferralTracker::new(
            store.campaigns.clone(),
            store.profiles.clone(),
            ledger.clone(),
            sink.clone(),
        ));
        let service = ProfileService::new(
            store.profiles.clone(),
            config.clone(),
            ledger.clone(),
            referrals.clone(),
            sink.clone(),
        );
        Fixture {
            service,
            config,
            ledger,
            referrals,
            sink,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_referral_prefix() {
        assert_eq!(referral_prefix(Some("Zoë Ann"), "z@example.com"), "ZOANN");
        assert_eq!(referral_prefix(None, "jo.b@example.com"), "JOBXX");
        assert_eq!(referral_prefix(Some("Maximilian"), "m@example.com"), "MAXIM");
    }

    #[test]
    fn test_get_or_create_enrolls_once() {
        let f = fixture();
        let first = f
            .service
            .get_or_create("  Maya@Example.com ", Some("Maya"), t0())
            .unwrap();
        assert_eq!(first.email, "maya@example.com");
        assert_eq!(first.tier_level, LoyaltyTier::Bronze);
        assert_eq!(first.loyalty_points, 50);
        assert!(first.referral_code.starts_with("MAYAX"));
        assert_eq!(first.referral_code.len(), 9);
        assert!(f.referrals.get(&first.referral_code).is_some());

        let again = f.service.get_or_create("maya@example.com", None, t0()).unwrap();
        assert_eq!(again.customer_id, first.customer_id);
        assert_eq!(again.loyalty_points, 50);
        assert_eq!(f.sink.count_type(RewardsEventType::ProfileCreated), 1);

        assert!(matches!(
            f.service.get_or_create("   ", None, t0()),
            Err(RewardsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_concurrent_enrollment_converges() {
        let f = Arc::new(fixture());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = f.clone();
                std::thread::spawn(move || {
                    f.service
                        .get_or_create("race@example.com", None, t0())
                        .unwrap()
                        .customer_id
                })
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(f.service.list().len(), 1);
        let profile = f.service.find_by_email("race@example.com").unwrap();
        assert_eq!(profile.loyalty_points, 50);
    }

    #[test]
    fn test_order_points_and_idempotency() {
        let f = fixture();
        let p = f.service.get_or_create("a@example.com", None, t0()).unwrap();

        let outcome = f
            .service
            .on_order_completed(p.customer_id, 120.75, "o-1", t0())
            .unwrap();
        assert!(!outcome.duplicate);
        assert_eq!(outcome.points_earned, 120);
        assert_eq!(outcome.profile.loyalty_points, 170);

        let retry = f
            .service
            .on_order_completed(p.customer_id, 120.75, "o-1", t0())
            .unwrap();
        assert!(retry.duplicate);
        assert_eq!(retry.points_earned, 120);
        assert_eq!(retry.profile.total_spent, 120.75);
        assert_eq!(retry.profile.orders_count, 1);
        assert_eq!(retry.profile.loyalty_points, 170);
    }

    #[test]
    fn test_oversized_order_rejected_without_recording_spend() {
        let f = fixture();
        let p = f.service.get_or_create("big@example.com", None, t0()).unwrap();
        f.service
            .on_order_completed(p.customer_id, 600.0, "o-1", t0())
            .unwrap();

        for (amount, order) in [(1e20, "o-2"), (1e19, "o-3"), (f64::MAX, "o-4")] {
            let err = f
                .service
                .on_order_completed(p.customer_id, amount, order, t0())
                .unwrap_err();
            assert!(matches!(err, RewardsError::InvalidAmount(_)));
        }
        let profile = f.service.get(p.customer_id).unwrap();
        assert_eq!(profile.total_spent, 600.0);
        assert_eq!(profile.orders_count, 1);
        assert_eq!(profile.loyalty_points, 50 + 600);

        // The rejected order id stays usable.
        let retry = f
            .service
            .on_order_completed(p.customer_id, 40.0, "o-2", t0())
            .unwrap();
        assert!(!retry.duplicate);
        assert_eq!(retry.points_earned, 40 + 5);
    }

    #[test]
    fn test_order_released_when_ledger_is_full() {
        let f = fixture();
        let p = f.service.get_or_create("full@example.com", None, t0()).unwrap();
        f.service
            .award_manual(p.customer_id, MAX_LEDGER_POINTS - 50 - 10, "migration", t0())
            .unwrap();

        let err = f
            .service
            .on_order_completed(p.customer_id, 100.0, "o-1", t0())
            .unwrap_err();
        assert!(matches!(err, RewardsError::InvalidAmount(_)));
        let profile = f.service.get(p.customer_id).unwrap();
        assert_eq!(profile.total_spent, 0.0);
        assert!(!profile.processed_orders.contains("o-1"));
        assert_eq!(profile.lifetime_points, MAX_LEDGER_POINTS - 10);

        let small = f
            .service
            .on_order_completed(p.customer_id, 10.0, "o-1", t0())
            .unwrap();
        assert!(!small.duplicate);
        assert_eq!(small.profile.lifetime_points, MAX_LEDGER_POINTS);
    }

    #[test]
    fn test_manual_award_beyond_ceiling_rejected() {
        let f = fixture();
        let p = f.service.get_or_create("max@example.com", None, t0()).unwrap();
        assert!(matches!(
            f.service.award_manual(p.customer_id, u64::MAX, "typo", t0()),
            Err(RewardsError::InvalidAmount(_))
        ));
        let profile = f.service.recompute(p.customer_id, t0()).unwrap();
        assert_eq!(profile.loyalty_points, 50);
        assert_eq!(profile.lifetime_points, 50);
    }

    #[test]
    fn test_purchase_points_bounds() {
        assert_eq!(purchase_points(120.75, 1.0, 5).unwrap(), 125);
        assert_eq!(purchase_points(0.0, 1.0, 0).unwrap(), 0);
        assert!(purchase_points(1e19, 1.0, 0).is_err());
        assert!(purchase_points(f64::INFINITY, 1.0, 0).is_err());
        assert!(purchase_points(9.0e18, 1.0, 1_000_000_000_000_000_000).is_err());
    }

    #[test]
    fn test_calendar_year_periods() {
        let f = fixture();
        let mut config = f.config.get();
        config.annual_period_alignment = AnnualPeriodAlignment::CalendarYear;
        f.config.update(config, t0()).unwrap();

        let enrolled = Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap();
        let p = f.service.get_or_create("cal@example.com", None, enrolled).unwrap();
        let jan_2026 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let jan_2027 = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        let jan_2028 = Utc.with_ymd_and_hms(2028, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(p.annual_period_start, jan_2026);
        assert_eq!(p.annual_period_end(), jan_2027);

        let silver = f
            .service
            .on_order_completed(p.customer_id, 600.0, "o-1", enrolled)
            .unwrap();
        assert_eq!(silver.tier_after, LoyaltyTier::Silver);

        // Annual requirement met in 2026: Silver carries into 2027.
        let kept = f
            .service
            .recompute(p.customer_id, jan_2027 + Duration::days(1))
            .unwrap();
        assert_eq!(kept.annual_period_start, jan_2027);
        assert_eq!(kept.annual_spent, 0.0);
        assert_eq!(kept.tier_level, LoyaltyTier::Silver);
        assert!(!kept.tier_expiry_warning);

        let warned = f
            .service
            .recompute(p.customer_id, Utc.with_ymd_and_hms(2027, 12, 10, 9, 0, 0).unwrap())
            .unwrap();
        assert!(warned.tier_expiry_warning);
        assert_eq!(warned.tier_level, LoyaltyTier::Silver);

        let demoted = f
            .service
            .recompute(p.customer_id, jan_2028 + Duration::hours(1))
            .unwrap();
        assert_eq!(demoted.annual_period_start, jan_2028);
        assert_eq!(demoted.tier_level, LoyaltyTier::Bronze);
        assert_eq!(demoted.tier_cap, Some(LoyaltyTier::Bronze));
        assert_eq!(demoted.tier_since, jan_2028);
        assert_eq!(f.sink.count_type(RewardsEventType::TierDowngrade), 1);
    }

    #[test]
    fn test_tier_bonus_uses_tier_before_order() {
        let f = fixture();
        let p = f.service.get_or_create("b@example.com", None, t0()).unwrap();

        let up = f
            .service
            .on_order_completed(p.customer_id, 500.0, "o-1", t0())
            .unwrap();
        assert_eq!(up.tier_before, LoyaltyTier::Bronze);
        assert_eq!(up.tier_after, LoyaltyTier::Silver);
        assert_eq!(up.points_earned, 500);
        assert_eq!(f.sink.count_type(RewardsEventType::TierUpgrade), 1);

        let next = f
            .service
            .on_order_completed(p.customer_id, 10.0, "o-2", t0())
            .unwrap();
        assert_eq!(next.points_earned, 10 + 5);
    }

    #[test]
    fn test_rollover_warns_then_demotes() {
        let f = fixture();
        let p = f.service.get_or_create("c@example.com", None, t0()).unwrap();
        f.service
            .on_order_completed(p.customer_id, 1_600.0, "o-1", t0())
            .unwrap();

        // New period, no spend: Gold kept mid-period.
        let year_one = t0() + Duration::days(400);
        let kept = f.service.recompute(p.customer_id, year_one).unwrap();
        assert_eq!(kept.tier_level, LoyaltyTier::Gold);
        assert_eq!(kept.annual_spent, 0.0);
        assert!(!kept.tier_expiry_warning);

        let near_end = kept.annual_period_end() - Duration::days(10);
        let warned = f.service.recompute(p.customer_id, near_end).unwrap();
        assert!(warned.tier_expiry_warning);
        assert_eq!(f.sink.count_type(RewardsEventType::TierExpiryWarning), 1);

        let after = f
            .service
            .recompute(p.customer_id, kept.annual_period_end() + Duration::days(1))
            .unwrap();
        assert_eq!(after.tier_level, LoyaltyTier::Silver);
        assert_eq!(after.tier_cap, Some(LoyaltyTier::Silver));
        assert_eq!(f.sink.count_type(RewardsEventType::TierDowngrade), 1);
    }

    #[test]
    fn test_birthday_once_per_year() {
        let f = fixture();
        let p = f.service.get_or_create("d@example.com", None, t0()).unwrap();
        assert!(matches!(
            f.service.award_birthday_bonus(p.customer_id, t0()),
            Err(RewardsError::NotEligible(_))
        ));

        f.service
            .set_birthday(p.customer_id, NaiveDate::from_ymd_opt(1990, 2, 14).unwrap(), t0())
            .unwrap();
        let first = f.service.award_birthday_bonus(p.customer_id, t0()).unwrap();
        assert!(!first.already_awarded);
        let again = f
            .service
            .award_birthday_bonus(p.customer_id, t0() + Duration::days(5))
            .unwrap();
        assert!(again.already_awarded);
        assert_eq!(again.transaction_id, first.transaction_id);
        assert_eq!(f.service.get(p.customer_id).unwrap().birthday_reward_year, Some(2026));

        let next_year = t0() + Duration::days(365);
        assert!(!f
            .service
            .award_birthday_bonus(p.customer_id, next_year)
            .unwrap()
            .already_awarded);
    }

    #[test]
    fn test_review_bonus_per_review() {
        let f = fixture();
        let p = f.service.get_or_create("e@example.com", None, t0()).unwrap();
        let a = f.service.award_review_bonus(p.customer_id, "r-1", t0()).unwrap();
        let b = f.service.award_review_bonus(p.customer_id, "r-1", t0()).unwrap();
        assert!(b.already_awarded);
        assert_eq!(a.points, 25);
        f.service.award_review_bonus(p.customer_id, "r-2", t0()).unwrap();
        assert_eq!(f.service.get(p.customer_id).unwrap().loyalty_points, 50 + 25 + 25);
    }

    #[test]
    fn test_deactivated_profile_cannot_earn() {
        let f = fixture();
        let p = f.service.get_or_create("g@example.com", None, t0()).unwrap();
        f.service.deactivate(p.customer_id, t0()).unwrap();
        assert!(matches!(
            f.service.award_manual(p.customer_id, 10, "goodwill", t0()),
            Err(RewardsError::Inactive(_))
        ));
        let outcome = f
            .service
            .on_order_completed(p.customer_id, 40.0, "o-1", t0())
            .unwrap();
        assert_eq!(outcome.points_earned, 0);
        assert_eq!(outcome.profile.total_spent, 40.0);
    }

    #[test]
    fn test_inactive_program_tracks_spend_only() {
        let f = fixture();
        let p = f.service.get_or_create("h@example.com", None, t0()).unwrap();
        let mut config = f.config.get();
        config.is_active = false;
        f.config.update(config, t0()).unwrap();

        let outcome = f
            .service
            .on_order_completed(p.customer_id, 80.0, "o-1", t0())
            .unwrap();
        assert_eq!(outcome.points_earned, 0);
        assert_eq!(f.ledger.transactions(p.customer_id).len(), 1);
    }
}
