//! Coupon Validator & Redeemer.
//!
//! `validate` is a pure read used while the shopper is still editing the
//! cart. `commit` runs once the order is finalized and re-checks the
//! coupon's state inside an atomic update, so a coupon checked valid at cart
//! time can still be refused if someone else consumed it first.

use crate::store::DocumentCollection;
use chrono::{DateTime, Utc};
use rewards_core::coupon::{
    normalize_code, Coupon, CouponRedemption, CouponState, CouponType, CouponValidation, NewCoupon,
};
use rewards_core::event_bus::{make_event, EventSink, RewardsEventType};
use rewards_core::{RewardsError, RewardsResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of committing a coupon against a finalized order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponCommit {
    pub coupon_id: Uuid,
    pub code: String,
    pub order_id: String,
    pub user: String,
    /// The order was already committed; nothing changed.
    pub duplicate: bool,
    pub state: CouponState,
    pub used_count: u32,
}

/// Lowercased user identifier; per-user limits need a non-blank one.
fn normalize_user(user: &str) -> RewardsResult<String> {
    let user = user.trim().to_lowercase();
    if user.is_empty() {
        return Err(RewardsError::InvalidInput("user identifier is required".into()));
    }
    Ok(user)
}

pub struct CouponRedeemer {
    coupons: Arc<dyn DocumentCollection<Coupon>>,
    events: Arc<dyn EventSink>,
}

impl CouponRedeemer {
    pub fn new(coupons: Arc<dyn DocumentCollection<Coupon>>, events: Arc<dyn EventSink>) -> Self {
        Self { coupons, events }
    }

    pub fn get(&self, code: &str) -> Option<Coupon> {
        self.coupons.get(&normalize_code(code))
    }

    pub fn validate(&self, code: &str, cart_total: f64, user: &str, now: DateTime<Utc>) -> CouponValidation {
        let checked = if !cart_total.is_finite() || cart_total < 0.0 {
            Err(RewardsError::InvalidAmount(format!(
                "cart total {cart_total} must be non-negative"
            )))
        } else {
            normalize_user(user).and_then(|user| {
                let coupon = self.get(code).ok_or_else(|| {
                    RewardsError::NotFound(format!("coupon {}", normalize_code(code)))
                })?;
                check_applicable(&coupon, &user, now)?;
                if cart_total < coupon.min_cart_total {
                    return Err(RewardsError::BelowMinimum(format!(
                        "cart total {cart_total:.2} is below the coupon minimum {:.2}",
                        coupon.min_cart_total
                    )));
                }
                Ok(coupon)
            })
        };

        match checked {
            Ok(coupon) => {
                let discount = coupon.discount_for(cart_total);
                debug!(code = %coupon.code, cart_total, discount, "Coupon valid");
                CouponValidation::valid(coupon.id, discount)
            }
            Err(e) => {
                debug!(code = %code, cart_total, error = %e, "Coupon rejected");
                CouponValidation::rejected(&e)
            }
        }
    }

    /// Record consumption of a coupon by a finalized order. Idempotent per
    /// order id: a repeated commit returns the original outcome.
    pub fn commit(
        &self,
        coupon_id: Uuid,
        user: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> RewardsResult<CouponCommit> {
        if order_id.trim().is_empty() {
            return Err(RewardsError::InvalidInput("order id is required".into()));
        }
        let user = normalize_user(user)?;
        let code = self
            .coupons
            .find(&|c: &Coupon| c.id == coupon_id)
            .map(|c| c.code)
            .ok_or_else(|| RewardsError::NotFound(format!("coupon {coupon_id}")))?;

        let mut duplicate = false;
        let result = self.coupons.update(&code, &mut |coupon| {
            if coupon.redemption_for_order(order_id).is_some() {
                duplicate = true;
                return Ok(());
            }
            duplicate = false;
            check_applicable(coupon, &user, now)?;
            if coupon.reusable {
                coupon.used_by.insert(user.clone());
            } else {
                coupon.is_used = true;
            }
            coupon.used_count += 1;
            coupon.redemptions.push(CouponRedemption {
                order_id: order_id.to_string(),
                user: user.clone(),
                committed_at: now,
            });
            Ok(())
        });

        let coupon = match result {
            Ok(coupon) => coupon,
            Err(e) => {
                warn!(code = %code, order_id = %order_id, error = %e, "Coupon commit rejected");
                return Err(e);
            }
        };

        if duplicate {
            debug!(code = %code, order_id = %order_id, "Coupon already committed for order");
        } else {
            metrics::counter!("rewards.coupons_committed").increment(1);
            info!(
                code = %coupon.code,
                order_id = %order_id,
                used_count = coupon.used_count,
                "Coupon committed"
            );
            self.events.emit(make_event(
                RewardsEventType::CouponCommitted,
                None,
                Some(coupon.code.clone()),
                None,
                now,
            ));
        }

        Ok(CouponCommit {
            coupon_id: coupon.id,
            code: coupon.code.clone(),
            order_id: order_id.to_string(),
            user,
            duplicate,
            state: coupon.state(now),
            used_count: coupon.used_count,
        })
    }

    pub fn create(&self, request: NewCoupon, now: DateTime<Utc>) -> RewardsResult<Coupon> {
        let code = normalize_code(&request.code);
        if code.is_empty() {
            return Err(RewardsError::InvalidInput("coupon code is required".into()));
        }
        if !request.value.is_finite() || request.value <= 0.0 {
            return Err(RewardsError::InvalidAmount(format!(
                "coupon value {} must be positive",
                request.value
            )));
        }
        if request.kind == CouponType::Percentage && request.value > 100.0 {
            return Err(RewardsError::InvalidAmount(format!(
                "percentage {} exceeds 100",
                request.value
            )));
        }
        if request.min_cart_total < 0.0 || request.max_discount.map(|m| m <= 0.0).unwrap_or(false) {
            return Err(RewardsError::InvalidAmount(
                "cart minimum and discount cap must be non-negative".into(),
            ));
        }
        if !request.reusable && request.max_uses.is_some() {
            return Err(RewardsError::InvalidInput(
                "max_uses only applies to reusable coupons".into(),
            ));
        }
        if request.max_uses == Some(0) {
            return Err(RewardsError::InvalidInput("max_uses must be at least 1".into()));
        }

        let coupon = Coupon {
            id: Uuid::new_v4(),
            code: code.clone(),
            kind: request.kind,
            value: request.value,
            reusable: request.reusable,
            max_uses: request.max_uses,
            used_count: 0,
            min_cart_total: request.min_cart_total,
            max_discount: match request.kind {
                CouponType::Percentage => request.max_discount,
                CouponType::Fixed => None,
            },
            expires_at: request.expires_at,
            is_used: false,
            used_by: BTreeSet::new(),
            redemptions: Vec::new(),
            created_at: now,
        };
        self.coupons.insert_new(&code, coupon.clone())?;

        info!(
            code = %code,
            kind = ?coupon.kind,
            value = coupon.value,
            reusable = coupon.reusable,
            "Coupon created"
        );
        Ok(coupon)
    }

    /// All coupons, newest first, terminal ones included for audit.
    pub fn list(&self) -> Vec<Coupon> {
        let mut coupons = self.coupons.list();
        coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        coupons
    }

    /// Let `user` consume a reusable coupon again.
    pub fn reenable_user(&self, code: &str, user: &str) -> RewardsResult<Coupon> {
        let key = normalize_code(code);
        let user = normalize_user(user)?;
        let coupon = self.coupons.update(&key, &mut |coupon| {
            if !coupon.used_by.remove(&user) {
                return Err(RewardsError::NotFound(format!(
                    "{user} has not used coupon {}",
                    coupon.code
                )));
            }
            Ok(())
        })?;
        info!(code = %key, user = %user, "Coupon re-enabled for user");
        Ok(coupon)
    }
}

/// State checks shared by validation and commit, in rejection order.
fn check_applicable(coupon: &Coupon, user: &str, now: DateTime<Utc>) -> RewardsResult<()> {
    if !coupon.reusable && coupon.is_used {
        return Err(RewardsError::AlreadyConsumed(coupon.code.clone()));
    }
    if coupon.reusable
        && coupon
            .max_uses
            .map(|max| coupon.used_count >= max)
            .unwrap_or(false)
    {
        return Err(RewardsError::LimitReached(coupon.code.clone()));
    }
    if coupon.reusable && coupon.used_by.contains(user) {
        return Err(RewardsError::AlreadyUsedByUser(coupon.code.clone()));
    }
    if coupon.state(now) == CouponState::Expired {
        return Err(RewardsError::Expired(coupon.code.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCollection;
    use chrono::{Duration, TimeZone};
    use rewards_core::event_bus::capture_sink;
    use rewards_core::RejectionKind;
    use std::thread;

    fn redeemer() -> CouponRedeemer {
        CouponRedeemer::new(Arc::new(MemoryCollection::new("coupons")), capture_sink())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 15, 30, 0).unwrap()
    }

    fn percentage(code: &str, value: f64) -> NewCoupon {
        NewCoupon {
            code: code.into(),
            kind: CouponType::Percentage,
            value,
            reusable: false,
            max_uses: None,
            min_cart_total: 0.0,
            max_discount: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_percentage_capped_by_max_discount() {
        let r = redeemer();
        let mut req = percentage("cacao10", 10.0);
        req.max_discount = Some(50.0);
        r.create(req, now()).unwrap();

        let v = r.validate(" CACAO10", 1_000.0, "a@example.com", now());
        assert!(v.is_valid);
        assert_eq!(v.discount, 50.0);
    }

    #[test]
    fn test_fixed_never_exceeds_cart() {
        let r = redeemer();
        r.create(
            NewCoupon {
                kind: CouponType::Fixed,
                ..percentage("FIVER", 5.0)
            },
            now(),
        )
        .unwrap();
        assert_eq!(r.validate("fiver", 3.0, "a@example.com", now()).discount, 3.0);
        assert_eq!(r.validate("fiver", 30.0, "a@example.com", now()).discount, 5.0);
    }

    #[test]
    fn test_validation_rejections() {
        let r = redeemer();
        assert_eq!(
            r.validate("MISSING", 10.0, "a", now()).error,
            Some(RejectionKind::NotFound)
        );

        let mut min = percentage("BIGCART", 15.0);
        min.min_cart_total = 50.0;
        r.create(min, now()).unwrap();
        let below = r.validate("BIGCART", 49.99, "a", now());
        assert_eq!(below.error, Some(RejectionKind::BelowMinimum));
        assert_eq!(below.discount, 0.0);

        let mut old = percentage("OLD", 15.0);
        old.expires_at = Some(now() - Duration::minutes(1));
        r.create(old, now()).unwrap();
        assert_eq!(
            r.validate("OLD", 100.0, "a", now()).error,
            Some(RejectionKind::Expired)
        );

        assert_eq!(
            r.validate("BIGCART", -1.0, "a", now()).error,
            Some(RejectionKind::InvalidAmount)
        );
    }

    #[test]
    fn test_single_use_commit_twice() {
        let r = redeemer();
        let coupon = r.create(percentage("ONCE", 20.0), now()).unwrap();

        let first = r.commit(coupon.id, "a@example.com", "o-1", now()).unwrap();
        assert!(!first.duplicate);
        assert_eq!(first.state, CouponState::Consumed);

        let retry = r.commit(coupon.id, "a@example.com", "o-1", now()).unwrap();
        assert!(retry.duplicate);

        let err = r.commit(coupon.id, "b@example.com", "o-2", now()).unwrap_err();
        assert!(matches!(err, RewardsError::AlreadyConsumed(_)));
        assert_eq!(
            r.validate("ONCE", 40.0, "c@example.com", now()).error,
            Some(RejectionKind::AlreadyConsumed)
        );
    }

    #[test]
    fn test_reusable_once_per_user_and_reenable() {
        let r = redeemer();
        let mut req = percentage("FRIENDS", 10.0);
        req.reusable = true;
        let coupon = r.create(req, now()).unwrap();

        r.commit(coupon.id, "A@example.com", "o-1", now()).unwrap();
        assert_eq!(
            r.validate("FRIENDS", 40.0, "a@example.com", now()).error,
            Some(RejectionKind::AlreadyUsedByUser)
        );
        let err = r.commit(coupon.id, "a@example.com", "o-2", now()).unwrap_err();
        assert!(matches!(err, RewardsError::AlreadyUsedByUser(_)));

        r.reenable_user("friends", "a@example.com").unwrap();
        assert!(r.validate("FRIENDS", 40.0, "a@example.com", now()).is_valid);
        assert!(r.reenable_user("friends", "nobody@example.com").is_err());
    }

    #[test]
    fn test_blank_user_rejected() {
        let r = redeemer();
        let mut req = percentage("OPEN", 10.0);
        req.reusable = true;
        let coupon = r.create(req, now()).unwrap();

        assert_eq!(
            r.validate("OPEN", 40.0, "   ", now()).error,
            Some(RejectionKind::InvalidInput)
        );
        let err = r.commit(coupon.id, "   ", "o-1", now()).unwrap_err();
        assert!(matches!(err, RewardsError::InvalidInput(_)));
        let err = r.commit(coupon.id, "", "o-2", now()).unwrap_err();
        assert!(matches!(err, RewardsError::InvalidInput(_)));

        let stored = r.get("OPEN").unwrap();
        assert!(stored.used_by.is_empty());
        assert_eq!(stored.used_count, 0);
        assert!(r.commit(coupon.id, "a@example.com", "o-3", now()).is_ok());
        assert!(r.validate("OPEN", 40.0, "b@example.com", now()).is_valid);
    }

    #[test]
    fn test_concurrent_commits_respect_max_uses() {
        let r = Arc::new(redeemer());
        let mut req = percentage("TRIO", 10.0);
        req.reusable = true;
        req.max_uses = Some(3);
        let coupon = r.create(req, now()).unwrap();

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let r = r.clone();
                let id = coupon.id;
                thread::spawn(move || {
                    r.commit(id, &format!("user{i}@example.com"), &format!("o-{i}"), now())
                        .is_ok()
                })
            })
            .collect();
        let ok = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(ok, 3);
        let stored = r.get("TRIO").unwrap();
        assert_eq!(stored.used_count, 3);
        assert_eq!(stored.state(now()), CouponState::LimitReached);
    }

    #[test]
    fn test_create_rejects_invalid_values() {
        let r = redeemer();
        assert!(matches!(
            r.create(percentage("ZERO", 0.0), now()),
            Err(RewardsError::InvalidAmount(_))
        ));
        assert!(matches!(
            r.create(percentage("HUGE", 150.0), now()),
            Err(RewardsError::InvalidAmount(_))
        ));
        let mut single_with_limit = percentage("LIMITED", 10.0);
        single_with_limit.max_uses = Some(5);
        assert!(matches!(
            r.create(single_with_limit, now()),
            Err(RewardsError::InvalidInput(_))
        ));
        r.create(percentage("DUP", 10.0), now()).unwrap();
        assert!(matches!(
            r.create(percentage("dup", 12.0), now()),
            Err(RewardsError::Conflict(_))
        ));
    }
}
