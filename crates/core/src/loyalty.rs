//! Loyalty program domain types: spend-based tiers, points ledger records
//! and the derived customer rewards profile.
//!
//! Four-tier structure: Bronze → Silver → Gold → Platinum
//! - Tiers reached on lifetime spend, kept by meeting an annual requirement
//! - Points earned per currency unit plus a fixed per-order tier bonus
//! - Welcome, referral, birthday and review bonuses
//! - Earned points expire a configurable number of months after issue

use crate::error::{RewardsError, RewardsResult};
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

pub type CustomerId = Uuid;
pub type TransactionId = Uuid;

// ─── Tier System ────────────────────────────────────────────────────────────

/// Loyalty tier levels with escalating benefits.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    /// Entry level. Every customer starts here.
    #[default]
    Bronze,
    Silver,
    Gold,
    /// Top tier. Has no spend ceiling.
    Platinum,
}

impl LoyaltyTier {
    pub const ALL: [LoyaltyTier; 4] = [
        LoyaltyTier::Bronze,
        LoyaltyTier::Silver,
        LoyaltyTier::Gold,
        LoyaltyTier::Platinum,
    ];

    pub fn next(self) -> Option<LoyaltyTier> {
        match self {
            LoyaltyTier::Bronze => Some(LoyaltyTier::Silver),
            LoyaltyTier::Silver => Some(LoyaltyTier::Gold),
            LoyaltyTier::Gold => Some(LoyaltyTier::Platinum),
            LoyaltyTier::Platinum => None,
        }
    }

    /// One level down, saturating at Bronze.
    pub fn demoted(self) -> LoyaltyTier {
        match self {
            LoyaltyTier::Bronze | LoyaltyTier::Silver => LoyaltyTier::Bronze,
            LoyaltyTier::Gold => LoyaltyTier::Silver,
            LoyaltyTier::Platinum => LoyaltyTier::Gold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyTier::Bronze => "bronze",
            LoyaltyTier::Silver => "silver",
            LoyaltyTier::Gold => "gold",
            LoyaltyTier::Platinum => "platinum",
        }
    }
}

impl fmt::Display for LoyaltyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds and benefits attached to one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub min_cumulative_spend: f64,
    /// `None` only on the top tier.
    #[serde(default)]
    pub max_cumulative_spend: Option<f64>,
    #[serde(default)]
    pub fixed_bonus_points_per_order: u64,
    /// Spend needed within one annual period to keep the tier. 0 disables.
    #[serde(default)]
    pub annual_spend_requirement: f64,
    #[serde(default)]
    pub birthday_discount_percent: f64,
    #[serde(default)]
    pub free_shipping_threshold: Option<f64>,
    #[serde(default)]
    pub exclusive_access: bool,
    #[serde(default)]
    pub early_access: bool,
}

/// How the 12-month tier maintenance window is anchored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnualPeriodAlignment {
    /// Each customer's period starts on their enrollment anniversary.
    #[default]
    Anniversary,
    /// Every period starts on January 1st.
    CalendarYear,
}

// ─── Program Configuration ──────────────────────────────────────────────────

/// Tunable program parameters. One record per deployment, edited by
/// administrators through the Configuration Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    #[serde(default = "default_tiers")]
    pub tiers: BTreeMap<LoyaltyTier, TierRule>,
    #[serde(default = "default_points_per_currency_unit")]
    pub points_per_currency_unit: f64,
    #[serde(default = "default_welcome_bonus_points")]
    pub welcome_bonus_points: u64,
    #[serde(default = "default_referral_bonus_points")]
    pub referral_bonus_points: u64,
    /// Granted to the referred customer alongside the referrer's bonus. 0 disables.
    #[serde(default = "default_referee_bonus_points")]
    pub referee_bonus_points: u64,
    #[serde(default = "default_birthday_bonus_points")]
    pub birthday_bonus_points: u64,
    #[serde(default = "default_review_bonus_points")]
    pub review_bonus_points: u64,
    /// Points exchanged for one currency unit of discount.
    #[serde(default = "default_redemption_ratio")]
    pub points_to_currency_redemption_ratio: f64,
    #[serde(default = "default_min_points_redemption")]
    pub min_points_redemption: u64,
    #[serde(default = "default_max_points_per_order")]
    pub max_points_per_order: u64,
    /// 0 means earned points never expire.
    #[serde(default = "default_points_expiry_months")]
    pub points_expiry_months: u32,
    #[serde(default = "default_expiring_soon_days")]
    pub expiring_soon_days: u32,
    #[serde(default = "default_tier_warning_days")]
    pub tier_warning_days: u32,
    #[serde(default)]
    pub annual_period_alignment: AnnualPeriodAlignment,
    #[serde(default = "default_program_active")]
    pub is_active: bool,
}

#[allow(clippy::too_many_arguments)]
fn tier_rule(
    min: f64,
    max: Option<f64>,
    bonus: u64,
    annual: f64,
    birthday: f64,
    free_shipping: Option<f64>,
    exclusive: bool,
    early: bool,
) -> TierRule {
    TierRule {
        min_cumulative_spend: min,
        max_cumulative_spend: max,
        fixed_bonus_points_per_order: bonus,
        annual_spend_requirement: annual,
        birthday_discount_percent: birthday,
        free_shipping_threshold: free_shipping,
        exclusive_access: exclusive,
        early_access: early,
    }
}

fn default_tiers() -> BTreeMap<LoyaltyTier, TierRule> {
    BTreeMap::from([
        (
            LoyaltyTier::Bronze,
            tier_rule(0.0, Some(500.0), 0, 0.0, 5.0, None, false, false),
        ),
        (
            LoyaltyTier::Silver,
            tier_rule(500.0, Some(1500.0), 5, 250.0, 10.0, Some(75.0), false, true),
        ),
        (
            LoyaltyTier::Gold,
            tier_rule(1500.0, Some(5000.0), 10, 750.0, 15.0, Some(50.0), true, true),
        ),
        (
            LoyaltyTier::Platinum,
            tier_rule(5000.0, None, 20, 2500.0, 20.0, Some(0.0), true, true),
        ),
    ])
}

fn default_points_per_currency_unit() -> f64 { 1.0 }
fn default_welcome_bonus_points() -> u64 { 50 }
fn default_referral_bonus_points() -> u64 { 200 }
fn default_referee_bonus_points() -> u64 { 100 }
fn default_birthday_bonus_points() -> u64 { 100 }
fn default_review_bonus_points() -> u64 { 25 }
fn default_redemption_ratio() -> f64 { 100.0 }
fn default_min_points_redemption() -> u64 { 100 }
fn default_max_points_per_order() -> u64 { 5000 }
fn default_points_expiry_months() -> u32 { 12 }
fn default_expiring_soon_days() -> u32 { 30 }
fn default_tier_warning_days() -> u32 { 30 }
fn default_program_active() -> bool { true }

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            points_per_currency_unit: default_points_per_currency_unit(),
            welcome_bonus_points: default_welcome_bonus_points(),
            referral_bonus_points: default_referral_bonus_points(),
            referee_bonus_points: default_referee_bonus_points(),
            birthday_bonus_points: default_birthday_bonus_points(),
            review_bonus_points: default_review_bonus_points(),
            points_to_currency_redemption_ratio: default_redemption_ratio(),
            min_points_redemption: default_min_points_redemption(),
            max_points_per_order: default_max_points_per_order(),
            points_expiry_months: default_points_expiry_months(),
            expiring_soon_days: default_expiring_soon_days(),
            tier_warning_days: default_tier_warning_days(),
            annual_period_alignment: AnnualPeriodAlignment::default(),
            is_active: default_program_active(),
        }
    }
}

impl ProgramConfig {
    /// Check the tier table and rates for internal consistency.
    ///
    /// Tiers must start at zero, be contiguous (each tier's maximum is the
    /// next tier's minimum) and ascend strictly; only the highest configured
    /// tier may omit a maximum.
    pub fn validate(&self) -> RewardsResult<()> {
        if !self.tiers.contains_key(&LoyaltyTier::Bronze) {
            return Err(RewardsError::Config("bronze tier must be configured".into()));
        }

        let rules: Vec<(&LoyaltyTier, &TierRule)> = self.tiers.iter().collect();
        for (idx, (tier, rule)) in rules.iter().enumerate() {
            if rule.min_cumulative_spend < 0.0 || rule.annual_spend_requirement < 0.0 {
                return Err(RewardsError::Config(format!(
                    "{tier}: spend thresholds must be non-negative"
                )));
            }
            if idx == 0 && rule.min_cumulative_spend != 0.0 {
                return Err(RewardsError::Config(format!(
                    "{tier}: lowest tier must start at 0"
                )));
            }
            match (rules.get(idx + 1), rule.max_cumulative_spend) {
                (Some((next, next_rule)), Some(max)) => {
                    if max <= rule.min_cumulative_spend {
                        return Err(RewardsError::Config(format!(
                            "{tier}: maximum {max} must exceed minimum {}",
                            rule.min_cumulative_spend
                        )));
                    }
                    if next_rule.min_cumulative_spend != max {
                        return Err(RewardsError::Config(format!(
                            "{tier} ends at {max} but {next} starts at {}",
                            next_rule.min_cumulative_spend
                        )));
                    }
                }
                (Some((next, _)), None) => {
                    return Err(RewardsError::Config(format!(
                        "{tier} has no maximum but {next} follows it"
                    )));
                }
                (None, Some(_)) => {
                    return Err(RewardsError::Config(format!(
                        "{tier}: top tier must not have a maximum"
                    )));
                }
                (None, None) => {}
            }
        }

        if self.points_per_currency_unit < 0.0 {
            return Err(RewardsError::Config(
                "points_per_currency_unit must be non-negative".into(),
            ));
        }
        if self.points_to_currency_redemption_ratio <= 0.0 {
            return Err(RewardsError::Config(
                "points_to_currency_redemption_ratio must be positive".into(),
            ));
        }
        if self.min_points_redemption > self.max_points_per_order {
            return Err(RewardsError::Config(format!(
                "min_points_redemption {} exceeds max_points_per_order {}",
                self.min_points_redemption, self.max_points_per_order
            )));
        }
        Ok(())
    }

    pub fn tier_rule(&self, tier: LoyaltyTier) -> Option<&TierRule> {
        self.tiers.get(&tier)
    }

    /// Currency value of a number of points at the configured ratio.
    pub fn points_value(&self, points: u64) -> f64 {
        points as f64 / self.points_to_currency_redemption_ratio
    }

    /// Expiry stamp for an earn issued at `issued_at`.
    pub fn earn_expiry(&self, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.points_expiry_months == 0 {
            return None;
        }
        issued_at.checked_add_months(Months::new(self.points_expiry_months))
    }
}

// ─── Points Ledger Records ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Earn,
    Redeem,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EarnReason {
    Purchase,
    Review,
    Referral,
    Birthday,
    Welcome,
    Manual,
}

/// One immutable ledger entry. `points` is always a positive magnitude; the
/// sign comes from `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsTransaction {
    pub id: TransactionId,
    pub customer_id: CustomerId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub points: u64,
    #[serde(default)]
    pub earn_reason: Option<EarnReason>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Fixed at creation for earns; never set on redeems.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_expired: bool,
}

impl PointsTransaction {
    pub fn is_earn(&self) -> bool {
        self.kind == TransactionType::Earn
    }

    /// Whether this earn contributes nothing as of `as_of`, whether or not
    /// the sweep has flagged it yet.
    pub fn is_expired_at(&self, as_of: DateTime<Utc>) -> bool {
        self.is_earn()
            && (self.is_expired || self.expires_at.map(|e| e <= as_of).unwrap_or(false))
    }
}

// ─── Customer Rewards Profile ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    /// Code applied at signup; waiting on the first qualifying order.
    Pending,
    Awarded,
}

/// Referral code a customer signed up with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralLink {
    pub code: String,
    pub campaign_id: Uuid,
    pub status: ReferralStatus,
    pub linked_at: DateTime<Utc>,
    #[serde(default)]
    pub awarded_at: Option<DateTime<Utc>>,
}

/// Derived rewards aggregate for one customer. Spend, tier and referral
/// fields are authoritative here; the points fields are a cache of the
/// ledger refreshed by every recompute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsProfile {
    pub customer_id: CustomerId,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub total_spent: f64,
    pub annual_spent: f64,
    pub annual_period_start: DateTime<Utc>,
    pub tier_level: LoyaltyTier,
    pub tier_since: DateTime<Utc>,
    /// Set after a maintenance demotion; blocks spend-based re-promotion
    /// until the annual requirement of a higher tier is met again.
    #[serde(default)]
    pub tier_cap: Option<LoyaltyTier>,
    #[serde(default)]
    pub tier_expiry_warning: bool,
    pub loyalty_points: i64,
    pub lifetime_points: u64,
    pub points_expiring_soon: u64,
    pub referral_code: String,
    pub referrals_count: u32,
    pub referral_earnings: u64,
    #[serde(default)]
    pub referred_by: Option<ReferralLink>,
    #[serde(default)]
    pub birthday: Option<NaiveDate>,
    #[serde(default)]
    pub birthday_reward_year: Option<i32>,
    pub orders_count: u32,
    /// Order ids already folded into spend, for retry idempotency.
    #[serde(default)]
    pub processed_orders: BTreeSet<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RewardsProfile {
    /// Fresh Bronze profile with zeroed counters.
    pub fn new(
        customer_id: CustomerId,
        email: String,
        name: Option<String>,
        referral_code: String,
        annual_period_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            customer_id,
            email,
            name,
            total_spent: 0.0,
            annual_spent: 0.0,
            annual_period_start,
            tier_level: LoyaltyTier::Bronze,
            tier_since: now,
            tier_cap: None,
            tier_expiry_warning: false,
            loyalty_points: 0,
            lifetime_points: 0,
            points_expiring_soon: 0,
            referral_code,
            referrals_count: 0,
            referral_earnings: 0,
            referred_by: None,
            birthday: None,
            birthday_reward_year: None,
            orders_count: 0,
            processed_orders: BTreeSet::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn annual_period_end(&self) -> DateTime<Utc> {
        self.annual_period_start
            .checked_add_months(Months::new(12))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whole days left before the annual period rolls over (0 once past).
    pub fn days_until_rollover(&self, now: DateTime<Utc>) -> i64 {
        (self.annual_period_end() - now).num_days().max(0)
    }

    /// Spend still needed to reach the next tier, or `None` at the top.
    pub fn spend_to_next_tier(&self, config: &ProgramConfig) -> Option<f64> {
        let next = self.tier_level.next()?;
        let rule = config.tier_rule(next)?;
        Some((rule.min_cumulative_spend - self.total_spent).max(0.0))
    }

    /// Progress toward the next tier as a fraction [0.0, 1.0].
    pub fn tier_progress(&self, config: &ProgramConfig) -> f64 {
        let Some(next) = self.tier_level.next() else {
            return 1.0;
        };
        let (Some(current), Some(next_rule)) =
            (config.tier_rule(self.tier_level), config.tier_rule(next))
        else {
            return 1.0;
        };
        let span = next_rule.min_cumulative_spend - current.min_cumulative_spend;
        if span <= 0.0 {
            return 1.0;
        }
        ((self.total_spent - current.min_cumulative_spend) / span).clamp(0.0, 1.0)
    }

    pub fn has_pending_referral(&self) -> bool {
        self.referred_by
            .as_ref()
            .map(|r| r.status == ReferralStatus::Pending)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProgramConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tiers.len(), 4);
        assert!(config
            .tier_rule(LoyaltyTier::Platinum)
            .unwrap()
            .max_cumulative_spend
            .is_none());
    }

    #[test]
    fn test_config_rejects_gap_between_tiers() {
        let mut config = ProgramConfig::default();
        config
            .tiers
            .get_mut(&LoyaltyTier::Silver)
            .unwrap()
            .min_cumulative_spend = 600.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bronze ends at 500"));
    }

    #[test]
    fn test_config_rejects_bounded_top_tier() {
        let mut config = ProgramConfig::default();
        config
            .tiers
            .get_mut(&LoyaltyTier::Platinum)
            .unwrap()
            .max_cumulative_spend = Some(10_000.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_rejects_inverted_redemption_bounds() {
        let config = ProgramConfig {
            min_points_redemption: 10_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_earn_expiry_respects_zero_months() {
        let issued = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let config = ProgramConfig::default();
        assert_eq!(
            config.earn_expiry(issued),
            Some(Utc.with_ymd_and_hms(2027, 1, 31, 12, 0, 0).unwrap())
        );

        let never = ProgramConfig {
            points_expiry_months: 0,
            ..Default::default()
        };
        assert_eq!(never.earn_expiry(issued), None);
    }

    #[test]
    fn test_tier_ordering_and_demotion() {
        assert!(LoyaltyTier::Platinum > LoyaltyTier::Gold);
        assert_eq!(LoyaltyTier::Gold.demoted(), LoyaltyTier::Silver);
        assert_eq!(LoyaltyTier::Bronze.demoted(), LoyaltyTier::Bronze);
        assert_eq!(LoyaltyTier::Platinum.next(), None);
    }

    #[test]
    fn test_tier_progress() {
        let config = ProgramConfig::default();
        let now = Utc::now();
        let mut profile = RewardsProfile::new(
            Uuid::new_v4(),
            "a@example.com".into(),
            None,
            "AAAAA1234".into(),
            now,
            now,
        );
        profile.total_spent = 250.0;
        assert!((profile.tier_progress(&config) - 0.5).abs() < 1e-9);
        assert_eq!(profile.spend_to_next_tier(&config), Some(250.0));
    }

    #[test]
    fn test_transaction_expiry_without_sweep() {
        let now = Utc::now();
        let tx = PointsTransaction {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            kind: TransactionType::Earn,
            points: 10,
            earn_reason: Some(EarnReason::Manual),
            order_id: None,
            description: String::new(),
            timestamp: now - chrono::Duration::days(400),
            expires_at: Some(now - chrono::Duration::days(35)),
            is_expired: false,
        };
        assert!(tx.is_expired_at(now));
        assert!(!tx.is_expired_at(now - chrono::Duration::days(40)));
    }
}
