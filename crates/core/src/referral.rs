//! Referral and promotional campaign codes.

use crate::coupon::normalize_code;
use crate::error::{RejectionKind, RewardsError};
use crate::loyalty::CustomerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    /// A customer's own referral code. Bonus goes to the owner.
    Personal,
    /// Marketing code with no owner. Bonus goes to the redeemer.
    Campaign,
}

/// One redemption of a campaign code, kept on the campaign record so the
/// per-user limit is enforced in the same atomic update as `current_uses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRedemption {
    pub customer_email: String,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    pub bonus_points: u64,
    pub redeemed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralCampaign {
    pub id: Uuid,
    /// Stored normalized (trimmed, uppercased).
    pub code: String,
    #[serde(rename = "type")]
    pub kind: CampaignType,
    #[serde(default)]
    pub owner_id: Option<CustomerId>,
    #[serde(default)]
    pub owner_email: Option<String>,
    pub is_active: bool,
    pub valid_from: DateTime<Utc>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    /// `None` is unlimited.
    #[serde(default)]
    pub max_uses: Option<u32>,
    pub current_uses: u32,
    pub bonus_points: u64,
    #[serde(default)]
    pub discount_percent: Option<f64>,
    #[serde(default)]
    pub min_order_amount: f64,
    pub per_user_limit: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub redemptions: Vec<CampaignRedemption>,
    pub created_at: DateTime<Utc>,
}

impl ReferralCampaign {
    /// Personal code issued to a newly enrolled customer.
    pub fn personal(
        code: &str,
        owner_id: CustomerId,
        owner_email: &str,
        bonus_points: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: normalize_code(code),
            kind: CampaignType::Personal,
            owner_id: Some(owner_id),
            owner_email: Some(owner_email.to_string()),
            is_active: true,
            valid_from: now,
            valid_until: None,
            max_uses: None,
            current_uses: 0,
            bonus_points,
            discount_percent: None,
            min_order_amount: 0.0,
            per_user_limit: 1,
            description: format!("Personal referral code for {owner_email}"),
            redemptions: Vec::new(),
            created_at: now,
        }
    }

    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_from && self.valid_until.map(|u| now <= u).unwrap_or(true)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses
            .map(|max| self.current_uses >= max)
            .unwrap_or(false)
    }

    /// Redemptions already made by this identity, matched on email or id.
    pub fn uses_by(&self, email: &str, customer_id: Option<CustomerId>) -> u32 {
        let email = email.trim();
        self.redemptions
            .iter()
            .filter(|r| {
                (!email.is_empty() && r.customer_email.eq_ignore_ascii_case(email))
                    || (customer_id.is_some() && r.customer_id == customer_id)
            })
            .count() as u32
    }

    pub fn is_owned_by(&self, email: &str, customer_id: Option<CustomerId>) -> bool {
        if self.kind != CampaignType::Personal {
            return false;
        }
        let id_match = customer_id.is_some() && self.owner_id == customer_id;
        let email_match = self
            .owner_email
            .as_deref()
            .map(|owner| owner.eq_ignore_ascii_case(email.trim()))
            .unwrap_or(false);
        id_match || email_match
    }
}

/// Administrative payload for creating a campaign code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub code: String,
    #[serde(default = "default_campaign_type")]
    #[serde(rename = "type")]
    pub kind: CampaignType,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_uses: Option<u32>,
    pub bonus_points: u64,
    #[serde(default)]
    pub discount_percent: Option<f64>,
    #[serde(default)]
    pub min_order_amount: f64,
    #[serde(default = "default_per_user_limit")]
    pub per_user_limit: u32,
    #[serde(default)]
    pub description: String,
}

fn default_campaign_type() -> CampaignType {
    CampaignType::Campaign
}

fn default_per_user_limit() -> u32 {
    1
}

/// Outcome of checking a referral or campaign code. Never an `Err`: the
/// checkout proceeds without the bonus when `is_valid` is false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralValidation {
    pub is_valid: bool,
    #[serde(default)]
    pub campaign: Option<ReferralCampaign>,
    #[serde(default)]
    pub bonus_points: Option<u64>,
    #[serde(default)]
    pub error: Option<RejectionKind>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ReferralValidation {
    pub fn valid(campaign: ReferralCampaign) -> Self {
        let bonus = campaign.bonus_points;
        Self {
            is_valid: true,
            campaign: Some(campaign),
            bonus_points: Some(bonus),
            error: None,
            message: None,
        }
    }

    pub fn rejected(err: &RewardsError) -> Self {
        Self {
            is_valid: false,
            campaign: None,
            bonus_points: None,
            error: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_personal_code_ownership() {
        let owner = Uuid::new_v4();
        let campaign =
            ReferralCampaign::personal("trufa1234", owner, "owner@example.com", 200, Utc::now());
        assert_eq!(campaign.code, "TRUFA1234");
        assert!(campaign.is_owned_by("someone@example.com", Some(owner)));
        assert!(campaign.is_owned_by(" OWNER@example.com", None));
        assert!(!campaign.is_owned_by("friend@example.com", Some(Uuid::new_v4())));
    }

    #[test]
    fn test_window_and_exhaustion() {
        let now = Utc::now();
        let mut campaign =
            ReferralCampaign::personal("X", Uuid::new_v4(), "o@example.com", 10, now);
        campaign.valid_until = Some(now + Duration::days(1));
        campaign.max_uses = Some(2);
        assert!(campaign.is_within_window(now));
        assert!(!campaign.is_within_window(now + Duration::days(2)));
        assert!(!campaign.is_within_window(now - Duration::seconds(1)));

        campaign.current_uses = 2;
        assert!(campaign.is_exhausted());
    }

    #[test]
    fn test_uses_by_ignores_blank_email() {
        let now = Utc::now();
        let mut campaign =
            ReferralCampaign::personal("X", Uuid::new_v4(), "o@example.com", 10, now);
        campaign.redemptions.push(CampaignRedemption {
            customer_email: String::new(),
            customer_id: None,
            bonus_points: 10,
            redeemed_at: now,
        });
        campaign.redemptions.push(CampaignRedemption {
            customer_email: "leo@example.com".into(),
            customer_id: None,
            bonus_points: 10,
            redeemed_at: now,
        });
        assert_eq!(campaign.uses_by("  ", None), 0);
        assert_eq!(campaign.uses_by("", None), 0);
        assert_eq!(campaign.uses_by(" LEO@example.com", None), 1);
    }
}
