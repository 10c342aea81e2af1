//! Storefront-facing rewards endpoints: account profile, checkout
//! redemption, order finalization, referral and coupon codes.

use crate::rest::{ApiResult, AppState};
use axum::extract::{Path, State};
use axum::Json;
use chrono::NaiveDate;
use rewards_core::coupon::CouponValidation;
use rewards_core::loyalty::{CustomerId, LoyaltyTier, ReferralLink, RewardsProfile};
use rewards_core::referral::ReferralValidation;
use rewards_loyalty::{BonusAward, CouponCommit, OrderOutcome, RedemptionReceipt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Profile plus the tier figures the account page shows.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: RewardsProfile,
    pub next_tier: Option<LoyaltyTier>,
    pub spend_to_next_tier: Option<f64>,
    pub tier_progress: f64,
    pub points_value: f64,
}

fn profile_response(state: &AppState, profile: RewardsProfile) -> ProfileResponse {
    let config = state.engine.program_config();
    ProfileResponse {
        next_tier: profile.tier_level.next(),
        spend_to_next_tier: profile.spend_to_next_tier(&config),
        tier_progress: profile.tier_progress(&config),
        points_value: config.points_value(profile.loyalty_points.max(0) as u64),
        profile,
    }
}

/// GET /v1/rewards/profile/:email: Profile for an email, enrolling on first sight.
pub async fn handle_get_profile(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<ProfileResponse> {
    let profile = state.engine.get_rewards_profile(&email)?;
    metrics::counter!("rewards.api.profile_reads").increment(1);
    Ok(Json(profile_response(&state, profile)))
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// POST /v1/rewards/enroll: Enroll with a display name.
pub async fn handle_enroll(
    State(state): State<AppState>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<ProfileResponse> {
    let profile = state
        .engine
        .enroll(&request.email, request.name.as_deref())?;
    Ok(Json(profile_response(&state, profile)))
}

/// GET /v1/rewards/customers/:customer_id
pub async fn handle_get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> ApiResult<ProfileResponse> {
    let profile = state.engine.profile(customer_id)?;
    Ok(Json(profile_response(&state, profile)))
}

#[derive(Debug, Deserialize)]
pub struct RedeemPointsRequest {
    pub customer_id: CustomerId,
    pub points: u64,
    pub order_id: String,
}

/// POST /v1/rewards/redeem: Spend points against an order.
pub async fn handle_redeem(
    State(state): State<AppState>,
    Json(request): Json<RedeemPointsRequest>,
) -> ApiResult<RedemptionReceipt> {
    let receipt = state.engine.apply_points_redemption(
        request.customer_id,
        request.points,
        &request.order_id,
    )?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
pub struct OrderCompletedRequest {
    pub customer_id: CustomerId,
    pub order_amount: f64,
    pub order_id: String,
}

/// POST /v1/rewards/orders/completed: Fold a finalized order into spend.
pub async fn handle_order_completed(
    State(state): State<AppState>,
    Json(request): Json<OrderCompletedRequest>,
) -> ApiResult<OrderOutcome> {
    let outcome = state.engine.on_order_completed(
        request.customer_id,
        request.order_amount,
        &request.order_id,
    )?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct BirthdayBonusRequest {
    pub customer_id: CustomerId,
}

/// POST /v1/rewards/birthday
pub async fn handle_birthday_bonus(
    State(state): State<AppState>,
    Json(request): Json<BirthdayBonusRequest>,
) -> ApiResult<BonusAward> {
    Ok(Json(state.engine.award_birthday_bonus(request.customer_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ReviewBonusRequest {
    pub customer_id: CustomerId,
    pub review_id: String,
}

/// POST /v1/rewards/review
pub async fn handle_review_bonus(
    State(state): State<AppState>,
    Json(request): Json<ReviewBonusRequest>,
) -> ApiResult<BonusAward> {
    Ok(Json(
        state
            .engine
            .award_review_bonus(request.customer_id, &request.review_id)?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct SetBirthdayRequest {
    pub birthday: NaiveDate,
}

/// PUT /v1/rewards/customers/:customer_id/birthday
pub async fn handle_set_birthday(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<SetBirthdayRequest>,
) -> ApiResult<RewardsProfile> {
    Ok(Json(state.engine.set_birthday(customer_id, request.birthday)?))
}

#[derive(Debug, Deserialize)]
pub struct ReferralCodeRequest {
    pub code: String,
    pub email: String,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
}

/// POST /v1/referrals/validate: Check a code; rejections are reported in
/// the body, never as an error status.
pub async fn handle_validate_referral(
    State(state): State<AppState>,
    Json(request): Json<ReferralCodeRequest>,
) -> Json<ReferralValidation> {
    let validation =
        state
            .engine
            .validate_referral_code(&request.code, &request.email, request.customer_id);
    metrics::counter!(
        "rewards.api.referral_checks",
        "valid" => validation.is_valid.to_string()
    )
    .increment(1);
    Json(validation)
}

/// POST /v1/referrals/apply: Link a code to a customer before their first order.
pub async fn handle_apply_referral(
    State(state): State<AppState>,
    Json(request): Json<ReferralCodeRequest>,
) -> ApiResult<ReferralLink> {
    let customer_id = match request.customer_id {
        Some(id) => id,
        None => state.engine.customer_id_for_email(&request.email),
    };
    Ok(Json(state.engine.apply_referral_code(
        &request.code,
        &request.email,
        customer_id,
    )?))
}

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    pub code: String,
    pub cart_total: f64,
    pub user: String,
}

/// POST /v1/coupons/validate: Pure check of a coupon against a cart.
pub async fn handle_validate_coupon(
    State(state): State<AppState>,
    Json(request): Json<ValidateCouponRequest>,
) -> Json<CouponValidation> {
    let validation = state
        .engine
        .validate_coupon(&request.code, request.cart_total, &request.user);
    metrics::counter!(
        "rewards.api.coupon_checks",
        "valid" => validation.is_valid.to_string()
    )
    .increment(1);
    Json(validation)
}

#[derive(Debug, Deserialize)]
pub struct CommitCouponRequest {
    pub coupon_id: Uuid,
    pub user: String,
    pub order_id: String,
}

/// POST /v1/coupons/commit: Consume the coupon applied to a finalized order.
pub async fn handle_commit_coupon(
    State(state): State<AppState>,
    Json(request): Json<CommitCouponRequest>,
) -> ApiResult<CouponCommit> {
    Ok(Json(state.engine.commit_coupon_usage(
        request.coupon_id,
        &request.user,
        &request.order_id,
    )?))
}
