//! Axum router, shared state, and the small read-only endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::{self, Datastore};
use crate::errors::{PaymentError, Result};
use crate::models::CampaignProgress;
use crate::paypal::PayPalClient;
use crate::{orders, webhook};

/// State shared by every handler for the lifetime of the process.
pub struct ApiState {
    pub datastore: Datastore,
    pub paypal: PayPalClient,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ─────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/paypal/create-order",
            post(orders::create_order).fallback(method_not_allowed),
        )
        .route(
            "/api/paypal/capture-order",
            post(orders::capture_order).fallback(method_not_allowed),
        )
        .route(
            "/api/paypal/webhook",
            post(webhook::handle).fallback(method_not_allowed),
        )
        .route("/api/public/campaigns", get(public_campaigns))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/public/campaigns`
///
/// Confirmed totals for every active campaign.
pub async fn public_campaigns(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<CampaignProgress>>> {
    let pool = state.datastore.privileged().await?;
    Ok(Json(db::campaign_progress(pool).await?))
}

async fn method_not_allowed() -> PaymentError {
    PaymentError::MethodNotAllowed
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{seed_campaign, TestApp};

    #[tokio::test]
    async fn health_reports_ok() {
        let app = TestApp::start().await;
        let (status, body) = app.get("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn payment_routes_only_accept_post() {
        let app = TestApp::start().await;
        for path in [
            "/api/paypal/create-order",
            "/api/paypal/capture-order",
            "/api/paypal/webhook",
        ] {
            let resp = app
                .http
                .get(format!("{}{}", app.base_url, path))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status().as_u16(), 405, "{path}");
            assert_eq!(resp.headers().get("allow").unwrap(), "POST");
            let body: serde_json::Value = resp.json().await.unwrap();
            assert_eq!(body, json!({ "error": "method not allowed" }));
        }
    }

    #[tokio::test]
    async fn public_campaigns_lists_active_progress() {
        let app = TestApp::start().await;
        seed_campaign(&app.pool, "huni-kuin", None).await;
        seed_campaign(&app.pool, "archived", Some(false)).await;

        let (status, body) = app.get("/api/public/campaigns").await;
        assert_eq!(status, StatusCode::OK);
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["slug"], "huni-kuin");
        assert_eq!(list[0]["confirmed_total"], 0.0);
        assert_eq!(list[0]["confirmed_count"], 0);
        assert_eq!(list[0]["progress_ratio"], 0.0);
    }
}
