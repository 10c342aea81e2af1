pub mod config;
pub mod coupon;
pub mod error;
pub mod event_bus;
pub mod loyalty;
pub mod referral;

pub use config::AppConfig;
pub use error::{RejectionKind, RewardsError, RewardsResult};
