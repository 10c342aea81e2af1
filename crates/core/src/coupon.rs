//! Discount coupons applied at checkout.
//!
//! A coupon is either single-use (one consumption ever, `is_used`) or
//! reusable (up to `max_uses` consumptions, each identifier at most once).
//! Applying a coupon only changes the order total; it never touches the
//! points ledger.

use crate::error::{RejectionKind, RewardsError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Normalize a customer-entered code for lookup: trimmed and uppercased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CouponType {
    Percentage,
    Fixed,
}

/// Redemption lifecycle. Everything but `Active` is terminal for
/// redemption; the record stays for audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CouponState {
    Active,
    Consumed,
    Expired,
    LimitReached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponRedemption {
    pub order_id: String,
    pub user: String,
    pub committed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    /// Stored normalized.
    pub code: String,
    #[serde(rename = "type")]
    pub kind: CouponType,
    pub value: f64,
    pub reusable: bool,
    /// Reusable coupons only.
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub used_count: u32,
    #[serde(default)]
    pub min_cart_total: f64,
    /// Percentage coupons only.
    #[serde(default)]
    pub max_discount: Option<f64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Single-use coupons only.
    #[serde(default)]
    pub is_used: bool,
    #[serde(default)]
    pub used_by: BTreeSet<String>,
    #[serde(default)]
    pub redemptions: Vec<CouponRedemption>,
    pub created_at: DateTime<Utc>,
}

impl Coupon {
    pub fn state(&self, now: DateTime<Utc>) -> CouponState {
        if !self.reusable && self.is_used {
            return CouponState::Consumed;
        }
        if self.reusable
            && self
                .max_uses
                .map(|max| self.used_count >= max)
                .unwrap_or(false)
        {
            return CouponState::LimitReached;
        }
        if self.expires_at.map(|e| e < now).unwrap_or(false) {
            return CouponState::Expired;
        }
        CouponState::Active
    }

    /// Discount this coupon grants on `cart_total`. Never exceeds the cart.
    pub fn discount_for(&self, cart_total: f64) -> f64 {
        let raw = match self.kind {
            CouponType::Percentage => {
                let pct = cart_total * self.value / 100.0;
                match self.max_discount {
                    Some(cap) => pct.min(cap),
                    None => pct,
                }
            }
            CouponType::Fixed => self.value,
        };
        raw.min(cart_total).max(0.0)
    }

    pub fn redemption_for_order(&self, order_id: &str) -> Option<&CouponRedemption> {
        self.redemptions.iter().find(|r| r.order_id == order_id)
    }
}

/// Administrative payload for creating a coupon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCoupon {
    pub code: String,
    #[serde(rename = "type")]
    pub kind: CouponType,
    pub value: f64,
    #[serde(default)]
    pub reusable: bool,
    #[serde(default)]
    pub max_uses: Option<u32>,
    #[serde(default)]
    pub min_cart_total: f64,
    #[serde(default)]
    pub max_discount: Option<f64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of checking a coupon against a cart. Validation is a pure read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponValidation {
    pub is_valid: bool,
    #[serde(default)]
    pub coupon_id: Option<Uuid>,
    pub discount: f64,
    #[serde(default)]
    pub error: Option<RejectionKind>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CouponValidation {
    pub fn valid(coupon_id: Uuid, discount: f64) -> Self {
        Self {
            is_valid: true,
            coupon_id: Some(coupon_id),
            discount,
            error: None,
            message: None,
        }
    }

    pub fn rejected(err: &RewardsError) -> Self {
        Self {
            is_valid: false,
            coupon_id: None,
            discount: 0.0,
            error: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }
}
