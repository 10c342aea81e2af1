use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type RewardsResult<T> = Result<T, RewardsError>;

#[derive(Error, Debug)]
pub enum RewardsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Usage limit reached: {0}")]
    LimitReached(String),

    #[error("Campaign usage cap reached: {0}")]
    UsageCapReached(String),

    #[error("Already consumed: {0}")]
    AlreadyConsumed(String),

    #[error("Already used by this customer: {0}")]
    AlreadyUsedByUser(String),

    #[error("Below minimum: {0}")]
    BelowMinimum(String),

    #[error("Exceeds per-order cap: requested {requested}, cap {cap}")]
    ExceedsOrderCap { requested: u64, cap: u64 },

    #[error("Insufficient points: requested {requested}, available {available}")]
    InsufficientPoints { requested: u64, available: i64 },

    #[error("Referral code cannot be used by its owner: {0}")]
    SelfReferral(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Inactive: {0}")]
    Inactive(String),

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Caller-facing classification of a rejected incentive. Checkout surfaces
/// branch on this to degrade gracefully without the incentive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    NotFound,
    Expired,
    LimitReached,
    UsageCapReached,
    AlreadyConsumed,
    AlreadyUsedByUser,
    BelowMinimum,
    ExceedsOrderCap,
    InsufficientPoints,
    SelfReferral,
    InvalidAmount,
    Inactive,
    NotEligible,
    InvalidInput,
    Conflict,
    Internal,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::NotFound => "not_found",
            RejectionKind::Expired => "expired",
            RejectionKind::LimitReached => "limit_reached",
            RejectionKind::UsageCapReached => "usage_cap_reached",
            RejectionKind::AlreadyConsumed => "already_consumed",
            RejectionKind::AlreadyUsedByUser => "already_used_by_user",
            RejectionKind::BelowMinimum => "below_minimum",
            RejectionKind::ExceedsOrderCap => "exceeds_order_cap",
            RejectionKind::InsufficientPoints => "insufficient_points",
            RejectionKind::SelfReferral => "self_referral",
            RejectionKind::InvalidAmount => "invalid_amount",
            RejectionKind::Inactive => "inactive",
            RejectionKind::NotEligible => "not_eligible",
            RejectionKind::InvalidInput => "invalid_input",
            RejectionKind::Conflict => "conflict",
            RejectionKind::Internal => "internal",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RewardsError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            RewardsError::NotFound(_) => RejectionKind::NotFound,
            RewardsError::Expired(_) => RejectionKind::Expired,
            RewardsError::LimitReached(_) => RejectionKind::LimitReached,
            RewardsError::UsageCapReached(_) => RejectionKind::UsageCapReached,
            RewardsError::AlreadyConsumed(_) => RejectionKind::AlreadyConsumed,
            RewardsError::AlreadyUsedByUser(_) => RejectionKind::AlreadyUsedByUser,
            RewardsError::BelowMinimum(_) => RejectionKind::BelowMinimum,
            RewardsError::ExceedsOrderCap { .. } => RejectionKind::ExceedsOrderCap,
            RewardsError::InsufficientPoints { .. } => RejectionKind::InsufficientPoints,
            RewardsError::SelfReferral(_) => RejectionKind::SelfReferral,
            RewardsError::InvalidAmount(_) => RejectionKind::InvalidAmount,
            RewardsError::Inactive(_) => RejectionKind::Inactive,
            RewardsError::NotEligible(_) => RejectionKind::NotEligible,
            RewardsError::InvalidInput(_) | RewardsError::Config(_) => RejectionKind::InvalidInput,
            RewardsError::Conflict(_) => RejectionKind::Conflict,
            RewardsError::Serialization(_) | RewardsError::Internal(_) => RejectionKind::Internal,
        }
    }

    /// Whether the error is a business rejection the checkout flow can
    /// proceed past, as opposed to an infrastructure or configuration fault.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            RewardsError::Config(_)
                | RewardsError::Serialization(_)
                | RewardsError::Internal(_)
        )
    }
}
