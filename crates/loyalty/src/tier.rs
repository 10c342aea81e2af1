//! Tier Calculator: pure tier decisions from spend history.
//!
//! Upgrades follow cumulative spend immediately. Keeping a tier depends on
//! the annual requirement, which is only enforced when an annual period
//! rolls over; mid-period a shortfall raises a warning instead.

use rewards_core::loyalty::{LoyaltyTier, ProgramConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierInput {
    pub total_spent: f64,
    /// Spend inside the annual period being evaluated. At rollover this is
    /// the period that just ended.
    pub annual_spent: f64,
    pub previous_tier: LoyaltyTier,
    pub tier_cap: Option<LoyaltyTier>,
    pub at_rollover: bool,
    pub days_until_rollover: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDecision {
    pub tier: LoyaltyTier,
    pub warning: bool,
    pub cap: Option<LoyaltyTier>,
}

/// Highest tier whose `min_cumulative_spend` is covered by `total_spent`.
pub fn tier_for_spend(total_spent: f64, config: &ProgramConfig) -> LoyaltyTier {
    config
        .tiers
        .iter()
        .filter(|(_, rule)| rule.min_cumulative_spend <= total_spent)
        .map(|(tier, _)| *tier)
        .max()
        .unwrap_or_default()
}

/// Whether `annual_spent` falls short of what `tier` needs to be kept.
pub fn has_shortfall(tier: LoyaltyTier, annual_spent: f64, config: &ProgramConfig) -> bool {
    if tier == LoyaltyTier::Bronze {
        return false;
    }
    config
        .tier_rule(tier)
        .map(|rule| {
            rule.annual_spend_requirement > 0.0 && annual_spent < rule.annual_spend_requirement
        })
        .unwrap_or(false)
}

/// Tier the customer may hold on spend alone, honouring a demotion cap.
///
/// A capped customer climbs above the cap one tier at a time, and only
/// into tiers whose annual requirement this period's spend already meets.
fn eligible_tier(input: &TierInput, config: &ProgramConfig) -> LoyaltyTier {
    let by_spend = tier_for_spend(input.total_spent, config);
    let Some(cap) = input.tier_cap else {
        return by_spend;
    };
    if by_spend <= cap {
        return by_spend;
    }

    let mut eligible = cap;
    while let Some(next) = eligible.next() {
        if next > by_spend {
            break;
        }
        let requalified = config
            .tier_rule(next)
            .map(|rule| {
                rule.annual_spend_requirement <= 0.0
                    || input.annual_spent >= rule.annual_spend_requirement
            })
            .unwrap_or(false);
        if !requalified {
            break;
        }
        eligible = next;
    }
    eligible
}

pub fn compute_tier(input: &TierInput, config: &ProgramConfig) -> TierDecision {
    if input.at_rollover && has_shortfall(input.previous_tier, input.annual_spent, config) {
        let demoted = input.previous_tier.demoted();
        return TierDecision {
            tier: demoted,
            warning: false,
            cap: Some(demoted),
        };
    }

    let by_spend = tier_for_spend(input.total_spent, config);
    let eligible = eligible_tier(input, config);
    let tier = eligible.max(input.previous_tier);

    let cap = match input.tier_cap {
        Some(_) if eligible >= by_spend => None,
        other => other,
    };

    let warning = !input.at_rollover
        && has_shortfall(tier, input.annual_spent, config)
        && input.days_until_rollover <= i64::from(config.tier_warning_days);

    TierDecision { tier, warning, cap }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(total: f64, annual: f64, previous: LoyaltyTier) -> TierInput {
        TierInput {
            total_spent: total,
            annual_spent: annual,
            previous_tier: previous,
            tier_cap: None,
            at_rollover: false,
            days_until_rollover: 200,
        }
    }

    #[test]
    fn test_zero_spend_is_bronze() {
        let config = ProgramConfig::default();
        let decision = compute_tier(&input(0.0, 0.0, LoyaltyTier::Bronze), &config);
        assert_eq!(decision.tier, LoyaltyTier::Bronze);
        assert!(!decision.warning);
        assert_eq!(decision.cap, None);
    }

    #[test]
    fn test_upgrade_is_immediate_at_boundary() {
        let config = ProgramConfig::default();
        assert_eq!(tier_for_spend(499.99, &config), LoyaltyTier::Bronze);
        assert_eq!(tier_for_spend(500.0, &config), LoyaltyTier::Silver);

        let decision = compute_tier(&input(500.0, 500.0, LoyaltyTier::Bronze), &config);
        assert_eq!(decision.tier, LoyaltyTier::Silver);

        let decision = compute_tier(&input(6_000.0, 6_000.0, LoyaltyTier::Bronze), &config);
        assert_eq!(decision.tier, LoyaltyTier::Platinum);
    }

    #[test]
    fn test_no_loss_mid_period() {
        let config = ProgramConfig::default();
        let decision = compute_tier(&input(2_000.0, 0.0, LoyaltyTier::Gold), &config);
        assert_eq!(decision.tier, LoyaltyTier::Gold);
        assert!(!decision.warning);
    }

    #[test]
    fn test_warning_inside_window() {
        let config = ProgramConfig::default();
        let mut near = input(2_000.0, 100.0, LoyaltyTier::Gold);
        near.days_until_rollover = 10;
        let decision = compute_tier(&near, &config);
        assert_eq!(decision.tier, LoyaltyTier::Gold);
        assert!(decision.warning);

        near.annual_spent = 800.0;
        assert!(!compute_tier(&near, &config).warning);
    }

    #[test]
    fn test_rollover_drops_exactly_one_level() {
        let config = ProgramConfig::default();
        let mut rollover = input(8_000.0, 100.0, LoyaltyTier::Platinum);
        rollover.at_rollover = true;
        let decision = compute_tier(&rollover, &config);
        assert_eq!(decision.tier, LoyaltyTier::Gold);
        assert_eq!(decision.cap, Some(LoyaltyTier::Gold));
        assert!(!decision.warning);

        let mut met = input(8_000.0, 3_000.0, LoyaltyTier::Platinum);
        met.at_rollover = true;
        assert_eq!(compute_tier(&met, &config).tier, LoyaltyTier::Platinum);
    }

    #[test]
    fn test_cap_blocks_spend_repromotion_until_requalified() {
        let config = ProgramConfig::default();
        let mut capped = input(8_000.0, 0.0, LoyaltyTier::Gold);
        capped.tier_cap = Some(LoyaltyTier::Gold);
        let decision = compute_tier(&capped, &config);
        assert_eq!(decision.tier, LoyaltyTier::Gold);
        assert_eq!(decision.cap, Some(LoyaltyTier::Gold));

        capped.annual_spent = 2_500.0;
        let decision = compute_tier(&capped, &config);
        assert_eq!(decision.tier, LoyaltyTier::Platinum);
        assert_eq!(decision.cap, None);
    }

    #[test]
    fn test_bronze_never_demoted() {
        let config = ProgramConfig::default();
        let mut rollover = input(100.0, 0.0, LoyaltyTier::Bronze);
        rollover.at_rollover = true;
        let decision = compute_tier(&rollover, &config);
        assert_eq!(decision.tier, LoyaltyTier::Bronze);
        assert_eq!(decision.cap, None);
    }
}
