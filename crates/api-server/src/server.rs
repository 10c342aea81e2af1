//! API server: REST surface over the rewards engine and the Prometheus
//! exporter.

use crate::rest::{self, AppState};
use crate::{admin_rest, rewards_rest};
use axum::routing::{get, post, put};
use axum::Router;
use rewards_core::config::AppConfig;
use rewards_loyalty::RewardsEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the full route table over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Account & checkout
        .route("/v1/rewards/profile/:email", get(rewards_rest::handle_get_profile))
        .route("/v1/rewards/enroll", post(rewards_rest::handle_enroll))
        .route(
            "/v1/rewards/customers/:customer_id",
            get(rewards_rest::handle_get_customer),
        )
        .route(
            "/v1/rewards/customers/:customer_id/birthday",
            put(rewards_rest::handle_set_birthday),
        )
        .route("/v1/rewards/redeem", post(rewards_rest::handle_redeem))
        .route(
            "/v1/rewards/orders/completed",
            post(rewards_rest::handle_order_completed),
        )
        .route("/v1/rewards/birthday", post(rewards_rest::handle_birthday_bonus))
        .route("/v1/rewards/review", post(rewards_rest::handle_review_bonus))
        // Referral & campaign codes
        .route(
            "/v1/referrals/validate",
            post(rewards_rest::handle_validate_referral),
        )
        .route("/v1/referrals/apply", post(rewards_rest::handle_apply_referral))
        // Coupons
        .route("/v1/coupons/validate", post(rewards_rest::handle_validate_coupon))
        .route("/v1/coupons/commit", post(rewards_rest::handle_commit_coupon))
        // Administration
        .route(
            "/v1/admin/config",
            get(admin_rest::handle_get_config).put(admin_rest::handle_update_config),
        )
        .route(
            "/v1/admin/transactions/:customer_id",
            get(admin_rest::handle_list_transactions),
        )
        .route(
            "/v1/admin/campaigns",
            get(admin_rest::handle_list_campaigns).post(admin_rest::handle_create_campaign),
        )
        .route(
            "/v1/admin/campaigns/:code/active",
            post(admin_rest::handle_set_campaign_active),
        )
        .route(
            "/v1/admin/coupons",
            get(admin_rest::handle_list_coupons).post(admin_rest::handle_create_coupon),
        )
        .route(
            "/v1/admin/coupons/:code/reenable",
            post(admin_rest::handle_reenable_coupon_user),
        )
        .route("/v1/admin/points", post(admin_rest::handle_manual_points))
        .route(
            "/v1/admin/customers/:customer_id/deactivate",
            post(admin_rest::handle_deactivate),
        )
        .route("/v1/admin/maintenance", post(admin_rest::handle_run_maintenance))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    engine: Arc<RewardsEngine>,
}

impl ApiServer {
    pub fn new(config: AppConfig, engine: Arc<RewardsEngine>) -> Self {
        Self { config, engine }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = router(AppState::new(
            self.engine.clone(),
            self.config.node_id.clone(),
        ));

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Install the Prometheus recorder with its own HTTP listener.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<RewardsEngine>) {
        let engine = Arc::new(RewardsEngine::in_memory());
        (router(AppState::new(engine.clone(), "test-node")), engine)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_probes() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "test-node");
        assert_eq!(send(&app, "GET", "/ready", None).await.0, StatusCode::OK);
        assert_eq!(send(&app, "GET", "/live", None).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_profile_order_and_redeem() {
        let (app, _) = app();
        let (status, profile) = send(&app, "GET", "/v1/rewards/profile/ana@example.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["tier_level"], "bronze");
        assert_eq!(profile["loyalty_points"], 50);
        assert_eq!(profile["next_tier"], "silver");
        let customer_id = profile["customer_id"].as_str().unwrap().to_string();

        let (status, outcome) = send(
            &app,
            "POST",
            "/v1/rewards/orders/completed",
            Some(json!({"customer_id": customer_id, "order_amount": 520.0, "order_id": "o-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["tier_after"], "silver");
        assert_eq!(outcome["points_earned"], 520);

        let (status, receipt) = send(
            &app,
            "POST",
            "/v1/rewards/redeem",
            Some(json!({"customer_id": customer_id, "points": 200, "order_id": "o-2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(receipt["discount_amount"], 2.0);
        assert_eq!(receipt["new_balance"], 370);

        let (status, err) = send(
            &app,
            "POST",
            "/v1/rewards/redeem",
            Some(json!({"customer_id": customer_id, "points": 9000, "order_id": "o-3"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err["error"], "insufficient_points");
    }

    #[tokio::test]
    async fn test_unknown_customer_is_404() {
        let (app, _) = app();
        let uri = format!("/v1/admin/transactions/{}", uuid::Uuid::new_v4());
        let (status, body) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_coupon_validate_and_commit() {
        let (app, _) = app();
        let (status, coupon) = send(
            &app,
            "POST",
            "/v1/admin/coupons",
            Some(json!({"code": "cacao10", "type": "percentage", "value": 10.0, "max_discount": 50.0})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(coupon["code"], "CACAO10");

        let (_, validation) = send(
            &app,
            "POST",
            "/v1/coupons/validate",
            Some(json!({"code": "CACAO10", "cart_total": 1000.0, "user": "ana@example.com"})),
        )
        .await;
        assert_eq!(validation["is_valid"], true);
        assert_eq!(validation["discount"], 50.0);

        let commit = json!({
            "coupon_id": validation["coupon_id"],
            "user": "ana@example.com",
            "order_id": "o-1"
        });
        let (status, _) = send(&app, "POST", "/v1/coupons/commit", Some(commit.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, retry) = send(&app, "POST", "/v1/coupons/commit", Some(commit)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(retry["duplicate"], true);

        let (_, again) = send(
            &app,
            "POST",
            "/v1/coupons/validate",
            Some(json!({"code": "CACAO10", "cart_total": 100.0, "user": "ben@example.com"})),
        )
        .await;
        assert_eq!(again["is_valid"], false);
        assert_eq!(again["error"], "already_consumed");

        let (status, _) = send(
            &app,
            "POST",
            "/v1/admin/coupons",
            Some(json!({"code": "CACAO10", "type": "fixed", "value": 5.0})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_referral_validation_reports_in_body() {
        let (app, engine) = app();
        let maya = engine.enroll("maya@example.com", Some("Maya")).unwrap();
        let (status, body) = send(
            &app,
            "POST",
            "/v1/referrals/validate",
            Some(json!({"code": maya.referral_code, "email": "maya@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_valid"], false);
        assert_eq!(body["error"], "self_referral");

        let (status, link) = send(
            &app,
            "POST",
            "/v1/referrals/apply",
            Some(json!({"code": maya.referral_code, "email": "leo@example.com"})),
        )
        .await;
        // leo has no profile yet
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(link["error"], "not_found");

        engine.get_rewards_profile("leo@example.com").unwrap();
        let (status, link) = send(
            &app,
            "POST",
            "/v1/referrals/apply",
            Some(json!({"code": maya.referral_code, "email": "leo@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(link["status"], "pending");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let (app, engine) = app();
        let mut config = serde_json::to_value(engine.program_config()).unwrap();
        config["tiers"]["silver"]["min_cumulative_spend"] = json!(700.0);
        let (status, body) = send(&app, "PUT", "/v1/admin/config", Some(config)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, report) = send(&app, "POST", "/v1/admin/maintenance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["errors"], 0);
    }
}
