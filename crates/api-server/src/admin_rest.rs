//! Administrative endpoints: program configuration, ledger inspection,
//! campaigns, coupons and the maintenance sweep.

use crate::rest::{ApiResult, AppState};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rewards_core::coupon::{Coupon, NewCoupon};
use rewards_core::loyalty::{CustomerId, PointsTransaction, ProgramConfig, RewardsProfile};
use rewards_core::referral::{NewCampaign, ReferralCampaign};
use rewards_loyalty::{BonusAward, MaintenanceReport};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

/// GET /v1/admin/config
pub async fn handle_get_config(State(state): State<AppState>) -> Json<ProgramConfig> {
    Json(state.engine.program_config())
}

/// PUT /v1/admin/config: Replace the program configuration.
pub async fn handle_update_config(
    State(state): State<AppState>,
    Json(config): Json<ProgramConfig>,
) -> ApiResult<ProgramConfig> {
    Ok(Json(state.engine.update_program_config(config)?))
}

/// GET /v1/admin/transactions/:customer_id
pub async fn handle_list_transactions(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> ApiResult<Vec<PointsTransaction>> {
    Ok(Json(state.engine.list_transactions(customer_id)?))
}

/// GET /v1/admin/campaigns
pub async fn handle_list_campaigns(State(state): State<AppState>) -> Json<Vec<ReferralCampaign>> {
    Json(state.engine.list_campaigns())
}

/// POST /v1/admin/campaigns
pub async fn handle_create_campaign(
    State(state): State<AppState>,
    Json(request): Json<NewCampaign>,
) -> Result<(StatusCode, Json<ReferralCampaign>), crate::rest::ApiError> {
    let campaign = state.engine.create_campaign(request)?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// POST /v1/admin/campaigns/:code/active
pub async fn handle_set_campaign_active(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<SetActiveRequest>,
) -> ApiResult<ReferralCampaign> {
    Ok(Json(state.engine.set_campaign_active(&code, request.active)?))
}

/// GET /v1/admin/coupons
pub async fn handle_list_coupons(State(state): State<AppState>) -> Json<Vec<Coupon>> {
    Json(state.engine.list_coupons())
}

/// POST /v1/admin/coupons
pub async fn handle_create_coupon(
    State(state): State<AppState>,
    Json(request): Json<NewCoupon>,
) -> Result<(StatusCode, Json<Coupon>), crate::rest::ApiError> {
    let coupon = state.engine.create_coupon(request)?;
    Ok((StatusCode::CREATED, Json(coupon)))
}

#[derive(Debug, Deserialize)]
pub struct ReenableRequest {
    pub user: String,
}

/// POST /v1/admin/coupons/:code/reenable
pub async fn handle_reenable_coupon_user(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(request): Json<ReenableRequest>,
) -> ApiResult<Coupon> {
    Ok(Json(state.engine.reenable_coupon_user(&code, &request.user)?))
}

#[derive(Debug, Deserialize)]
pub struct ManualPointsRequest {
    pub customer_id: CustomerId,
    pub points: u64,
    #[serde(default)]
    pub description: String,
}

/// POST /v1/admin/points: Goodwill or correction credit.
pub async fn handle_manual_points(
    State(state): State<AppState>,
    Json(request): Json<ManualPointsRequest>,
) -> ApiResult<BonusAward> {
    Ok(Json(state.engine.award_manual_points(
        request.customer_id,
        request.points,
        &request.description,
    )?))
}

/// POST /v1/admin/customers/:customer_id/deactivate
pub async fn handle_deactivate(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> ApiResult<RewardsProfile> {
    Ok(Json(state.engine.deactivate_profile(customer_id)?))
}

/// POST /v1/admin/maintenance: Run the expiry and rollover sweep now.
pub async fn handle_run_maintenance(State(state): State<AppState>) -> Json<MaintenanceReport> {
    let report = state.engine.run_maintenance_now();
    info!(profiles = report.profiles_scanned, "Maintenance triggered via API");
    Json(report)
}
