//! Rewards engine: points ledger, tier maintenance, referral campaigns and
//! checkout coupons over a document store.

pub mod config_store;
pub mod coupon;
pub mod engine;
pub mod ledger;
pub mod profile;
pub mod referral;
pub mod store;
pub mod tier;

pub use config_store::ConfigStore;
pub use coupon::{CouponCommit, CouponRedeemer};
pub use engine::{Clock, MaintenanceReport, RedemptionReceipt, RewardsEngine};
pub use ledger::{CustomerLedger, EarnRequest, LedgerBalance, PointsLedger, RedeemRequest};
pub use profile::{BonusAward, OrderOutcome, ProfileService};
pub use referral::{ReferralAward, ReferralTracker};
pub use store::{DocumentCollection, MemoryCollection, RewardsStore};
pub use tier::{compute_tier, tier_for_spend, TierDecision, TierInput};
