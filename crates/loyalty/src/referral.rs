//! Referral Campaign Tracker: personal referral codes and marketing
//! campaign codes with validity windows, usage caps and per-user limits.
//!
//! Validation is a read. `track_usage` re-runs every check inside the
//! campaign's atomic update, so two redeemers racing for the last unit of a
//! capped campaign cannot both succeed. Bonuses are deferred until the
//! referred customer's first qualifying order.

use crate::ledger::{EarnRequest, PointsLedger};
use crate::store::DocumentCollection;
use chrono::{DateTime, Utc};
use rewards_core::coupon::normalize_code;
use rewards_core::event_bus::{make_event, EventSink, RewardsEventType};
use rewards_core::loyalty::{
    CustomerId, EarnReason, ProgramConfig, ReferralLink, ReferralStatus, RewardsProfile,
};
use rewards_core::referral::{
    CampaignRedemption, CampaignType, NewCampaign, ReferralCampaign, ReferralValidation,
};
use rewards_core::{RewardsError, RewardsResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bonuses granted when a pending referral settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralAward {
    pub code: String,
    pub campaign_id: Uuid,
    pub referee_id: CustomerId,
    #[serde(default)]
    pub referrer_id: Option<CustomerId>,
    pub referrer_points: u64,
    pub referee_points: u64,
}

pub struct ReferralTracker {
    campaigns: Arc<dyn DocumentCollection<ReferralCampaign>>,
    profiles: Arc<dyn DocumentCollection<RewardsProfile>>,
    ledger: Arc<PointsLedger>,
    events: Arc<dyn EventSink>,
}

impl ReferralTracker {
    pub fn new(
        campaigns: Arc<dyn DocumentCollection<ReferralCampaign>>,
        profiles: Arc<dyn DocumentCollection<RewardsProfile>>,
        ledger: Arc<PointsLedger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            campaigns,
            profiles,
            ledger,
            events,
        }
    }

    pub fn get(&self, code: &str) -> Option<ReferralCampaign> {
        self.campaigns.get(&normalize_code(code))
    }

    pub fn validate(
        &self,
        code: &str,
        email: &str,
        customer_id: Option<CustomerId>,
        now: DateTime<Utc>,
    ) -> ReferralValidation {
        let checked = normalize_redeemer(email).and_then(|email| {
            let campaign = self.get(code).ok_or_else(|| {
                RewardsError::NotFound(format!("referral code {}", normalize_code(code)))
            })?;
            check_redeemable(&campaign, &email, customer_id, now)?;
            Ok(campaign)
        });

        match checked {
            Ok(campaign) => {
                debug!(code = %campaign.code, email = %email, "Referral code valid");
                ReferralValidation::valid(campaign)
            }
            Err(e) => {
                debug!(code = %code, email = %email, error = %e, "Referral code rejected");
                ReferralValidation::rejected(&e)
            }
        }
    }

    /// Record one use of a campaign. Every check runs again inside the
    /// atomic update; the loser of a race on the last unit sees
    /// `UsageCapReached`.
    pub fn track_usage(
        &self,
        code: &str,
        campaign_id: Uuid,
        email: &str,
        bonus_points: u64,
        customer_id: Option<CustomerId>,
        now: DateTime<Utc>,
    ) -> RewardsResult<ReferralCampaign> {
        let key = normalize_code(code);
        let email = normalize_redeemer(email)?;
        let result = self.campaigns.update(&key, &mut |campaign| {
            if campaign.id != campaign_id {
                return Err(RewardsError::NotFound(format!(
                    "campaign {campaign_id} for code {key}"
                )));
            }
            check_redeemable(campaign, &email, customer_id, now)?;
            campaign.current_uses += 1;
            campaign.redemptions.push(CampaignRedemption {
                customer_email: email.clone(),
                customer_id,
                bonus_points,
                redeemed_at: now,
            });
            Ok(())
        });

        match result {
            Ok(campaign) => {
                metrics::counter!("rewards.referrals_tracked").increment(1);
                info!(
                    code = %campaign.code,
                    email = %email,
                    uses = campaign.current_uses,
                    max_uses = ?campaign.max_uses,
                    "Referral usage tracked"
                );
                self.events.emit(make_event(
                    RewardsEventType::ReferralTracked,
                    customer_id,
                    Some(campaign.code.clone()),
                    Some(bonus_points),
                    now,
                ));
                Ok(campaign)
            }
            Err(e) => {
                warn!(code = %key, email = %email, error = %e, "Referral usage rejected");
                Err(e)
            }
        }
    }

    /// Apply a code to a customer who has not ordered yet. The profile is
    /// linked as pending first; if tracking the use then fails the link is
    /// removed again.
    pub fn apply(
        &self,
        code: &str,
        email: &str,
        customer_id: CustomerId,
        now: DateTime<Utc>,
    ) -> RewardsResult<ReferralLink> {
        let email = normalize_redeemer(email)?;
        let campaign = self
            .get(code)
            .ok_or_else(|| RewardsError::NotFound(format!("referral code {}", normalize_code(code))))?;
        check_redeemable(&campaign, &email, Some(customer_id), now)?;

        let link = ReferralLink {
            code: campaign.code.clone(),
            campaign_id: campaign.id,
            status: ReferralStatus::Pending,
            linked_at: now,
            awarded_at: None,
        };
        self.profiles.update(&customer_id.to_string(), &mut |profile| {
            if profile.referred_by.is_some() {
                return Err(RewardsError::NotEligible(
                    "a referral code was already applied".into(),
                ));
            }
            if profile.orders_count > 0 {
                return Err(RewardsError::NotEligible(
                    "referral codes apply before the first order".into(),
                ));
            }
            profile.referred_by = Some(link.clone());
            profile.updated_at = now;
            Ok(())
        })?;

        if let Err(e) = self.track_usage(
            &campaign.code,
            campaign.id,
            &email,
            campaign.bonus_points,
            Some(customer_id),
            now,
        ) {
            let unlinked = self.profiles.update(&customer_id.to_string(), &mut |profile| {
                if profile
                    .referred_by
                    .as_ref()
                    .map(|l| l.campaign_id == campaign.id && l.status == ReferralStatus::Pending)
                    .unwrap_or(false)
                {
                    profile.referred_by = None;
                }
                Ok(())
            });
            if let Err(unlink_err) = unlinked {
                warn!(customer_id = %customer_id, error = %unlink_err, "Failed to unlink referral");
            }
            return Err(e);
        }

        info!(customer_id = %customer_id, code = %link.code, "Referral code applied");
        Ok(link)
    }

    /// Settle a pending referral if `order_amount` qualifies. Returns `None`
    /// when there is nothing to settle.
    pub fn settle_first_order(
        &self,
        referee_id: CustomerId,
        order_amount: f64,
        order_id: &str,
        config: &ProgramConfig,
        now: DateTime<Utc>,
    ) -> RewardsResult<Option<ReferralAward>> {
        let profile = self
            .profiles
            .get(&referee_id.to_string())
            .ok_or_else(|| RewardsError::NotFound(format!("customer {referee_id}")))?;
        let Some(link) = profile.referred_by.filter(|l| l.status == ReferralStatus::Pending) else {
            return Ok(None);
        };
        if !config.is_active {
            debug!(customer_id = %referee_id, "Program inactive, referral stays pending");
            return Ok(None);
        }
        let campaign = self
            .campaigns
            .get(&link.code)
            .ok_or_else(|| RewardsError::NotFound(format!("referral code {}", link.code)))?;
        if order_amount < campaign.min_order_amount {
            debug!(
                customer_id = %referee_id,
                order_amount,
                min_order_amount = campaign.min_order_amount,
                "Order below referral minimum"
            );
            return Ok(None);
        }

        let mut settled = false;
        self.profiles.update(&referee_id.to_string(), &mut |p| {
            settled = false;
            if let Some(l) = p.referred_by.as_mut() {
                if l.status == ReferralStatus::Pending {
                    l.status = ReferralStatus::Awarded;
                    l.awarded_at = Some(now);
                    p.updated_at = now;
                    settled = true;
                }
            }
            Ok(())
        })?;
        if !settled {
            return Ok(None);
        }

        let mut award = ReferralAward {
            code: campaign.code.clone(),
            campaign_id: campaign.id,
            referee_id,
            referrer_id: None,
            referrer_points: 0,
            referee_points: 0,
        };

        match (campaign.kind, campaign.owner_id) {
            (CampaignType::Personal, Some(owner_id)) => {
                award.referrer_id = Some(owner_id);
                let owner_active = self
                    .profiles
                    .get(&owner_id.to_string())
                    .map(|p| p.is_active)
                    .unwrap_or(false);
                if owner_active && campaign.bonus_points > 0 {
                    self.ledger.earn(
                        EarnRequest::new(owner_id, campaign.bonus_points, EarnReason::Referral)
                            .with_order(order_id)
                            .with_key(format!("referral:{referee_id}"))
                            .with_description(format!("Referral bonus for {}", profile.email)),
                        config,
                        now,
                    )?;
                    let bonus = campaign.bonus_points;
                    self.profiles.update(&owner_id.to_string(), &mut |owner| {
                        owner.referrals_count += 1;
                        owner.referral_earnings += bonus;
                        owner.updated_at = now;
                        Ok(())
                    })?;
                    award.referrer_points = bonus;
                }
                if config.referee_bonus_points > 0 {
                    self.ledger.earn(
                        EarnRequest::new(referee_id, config.referee_bonus_points, EarnReason::Referral)
                            .with_order(order_id)
                            .with_key(format!("referred:{}", campaign.code))
                            .with_description(format!("Welcome bonus for using {}", campaign.code)),
                        config,
                        now,
                    )?;
                    award.referee_points = config.referee_bonus_points;
                }
            }
            _ => {
                if campaign.bonus_points > 0 {
                    self.ledger.earn(
                        EarnRequest::new(referee_id, campaign.bonus_points, EarnReason::Referral)
                            .with_order(order_id)
                            .with_key(format!("campaign:{}", campaign.code))
                            .with_description(format!("Campaign bonus {}", campaign.code)),
                        config,
                        now,
                    )?;
                    award.referee_points = campaign.bonus_points;
                }
            }
        }

        metrics::counter!("rewards.referrals_awarded").increment(1);
        info!(
            code = %award.code,
            referee = %referee_id,
            referrer = ?award.referrer_id,
            referrer_points = award.referrer_points,
            referee_points = award.referee_points,
            "Referral bonus awarded"
        );
        self.events.emit(make_event(
            RewardsEventType::ReferralAwarded,
            Some(referee_id),
            Some(award.code.clone()),
            Some(award.referrer_points + award.referee_points),
            now,
        ));
        Ok(Some(award))
    }

    /// Reserve a personal referral code. Fails with `Conflict` when the
    /// code is taken.
    pub fn issue_personal_code(
        &self,
        code: &str,
        owner_id: CustomerId,
        owner_email: &str,
        bonus_points: u64,
        now: DateTime<Utc>,
    ) -> RewardsResult<ReferralCampaign> {
        let campaign = ReferralCampaign::personal(code, owner_id, owner_email, bonus_points, now);
        self.campaigns.insert_new(&campaign.code, campaign.clone())?;
        Ok(campaign)
    }

    /// Release a personal code that never made it onto a profile.
    pub fn withdraw_personal_code(&self, code: &str, owner_id: CustomerId) {
        let key = normalize_code(code);
        let owned = self
            .campaigns
            .get(&key)
            .map(|c| c.kind == CampaignType::Personal && c.owner_id == Some(owner_id) && c.current_uses == 0)
            .unwrap_or(false);
        if owned {
            self.campaigns.remove(&key);
        }
    }

    pub fn create_campaign(&self, request: NewCampaign, now: DateTime<Utc>) -> RewardsResult<ReferralCampaign> {
        let code = normalize_code(&request.code);
        if code.is_empty() {
            return Err(RewardsError::InvalidInput("campaign code is required".into()));
        }
        if request.kind == CampaignType::Personal {
            return Err(RewardsError::InvalidInput(
                "personal codes are issued at enrollment".into(),
            ));
        }
        if let Some(pct) = request.discount_percent {
            if !(0.0..=100.0).contains(&pct) {
                return Err(RewardsError::InvalidAmount(format!(
                    "discount_percent {pct} must be within 0..=100"
                )));
            }
        }
        if request.min_order_amount < 0.0 {
            return Err(RewardsError::InvalidAmount(
                "min_order_amount must be non-negative".into(),
            ));
        }
        if request.max_uses == Some(0) || request.per_user_limit == 0 {
            return Err(RewardsError::InvalidInput(
                "usage limits must be at least 1".into(),
            ));
        }
        let valid_from = request.valid_from.unwrap_or(now);
        if let Some(until) = request.valid_until {
            if until <= valid_from {
                return Err(RewardsError::InvalidInput(
                    "valid_until must be after valid_from".into(),
                ));
            }
        }

        let campaign = ReferralCampaign {
            id: Uuid::new_v4(),
            code: code.clone(),
            kind: request.kind,
            owner_id: None,
            owner_email: None,
            is_active: true,
            valid_from,
            valid_until: request.valid_until,
            max_uses: request.max_uses,
            current_uses: 0,
            bonus_points: request.bonus_points,
            discount_percent: request.discount_percent,
            min_order_amount: request.min_order_amount,
            per_user_limit: request.per_user_limit,
            description: request.description,
            redemptions: Vec::new(),
            created_at: now,
        };
        self.campaigns.insert_new(&code, campaign.clone())?;

        info!(
            code = %code,
            bonus_points = campaign.bonus_points,
            max_uses = ?campaign.max_uses,
            valid_until = ?campaign.valid_until,
            "Campaign created"
        );
        Ok(campaign)
    }

    pub fn set_active(&self, code: &str, active: bool) -> RewardsResult<ReferralCampaign> {
        let key = normalize_code(code);
        let campaign = self.campaigns.update(&key, &mut |c| {
            c.is_active = active;
            Ok(())
        })?;
        info!(code = %key, active, "Campaign status changed");
        Ok(campaign)
    }

    /// Marketing campaigns, newest first. Personal codes are excluded.
    pub fn list(&self) -> Vec<ReferralCampaign> {
        let mut campaigns: Vec<ReferralCampaign> = self
            .campaigns
            .list()
            .into_iter()
            .filter(|c| c.kind == CampaignType::Campaign)
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }
}

/// Redeemability checks in rejection order.
/// Trimmed, lowercased redeemer email; per-user limits need a non-blank one.
fn normalize_redeemer(email: &str) -> RewardsResult<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(RewardsError::InvalidInput("redeemer email is required".into()));
    }
    Ok(email)
}

fn check_redeemable(
    campaign: &ReferralCampaign,
    email: &str,
    customer_id: Option<CustomerId>,
    now: DateTime<Utc>,
) -> RewardsResult<()> {
    if !campaign.is_active {
        return Err(RewardsError::NotFound(format!(
            "referral code {} is not active",
            campaign.code
        )));
    }
    if !campaign.is_within_window(now) {
        return Err(RewardsError::Expired(format!(
            "referral code {} is outside its validity window",
            campaign.code
        )));
    }
    if campaign.is_exhausted() {
        return Err(RewardsError::UsageCapReached(campaign.code.clone()));
    }
    if campaign.uses_by(email.trim(), customer_id) >= campaign.per_user_limit {
        return Err(RewardsError::AlreadyUsedByUser(campaign.code.clone()));
    }
    if campaign.is_owned_by(email, customer_id) {
        return Err(RewardsError::SelfReferral(campaign.code.clone()));
    }
    Ok(())
}
