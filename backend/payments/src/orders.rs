//! Order creation and client-confirmed capture.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::api::ApiState;
use crate::db::{self, DonationFilter};
use crate::errors::{PaymentError, Result};
use crate::models::{format_amount, Campaign, Donation, DonationStatus, NewDonation};
use crate::paypal::OrderRequest;
use crate::validation::{self, DonationRequest};

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "donationId")]
    pub donation_id: String,
}

#[derive(Debug, Serialize)]
pub struct CaptureOrderResponse {
    pub ok: bool,
    pub status: &'static str,
    #[serde(rename = "captureId")]
    pub capture_id: String,
}

// ─────────────────────────────────────────────────────────
// Create
// ─────────────────────────────────────────────────────────

/// `POST /api/paypal/create-order`
pub async fn create_order(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<CreateOrderResponse>> {
    let request = validation::parse_create_order(&body)?;
    let pool = state.datastore.privileged().await?;

    let campaign = resolve_campaign(pool, &request).await?;

    let donation = db::insert_donation(
        pool,
        &NewDonation {
            campaign_id: campaign.id.clone(),
            project_id: request.campaign_slug.clone(),
            user_id: request.user_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            donor: request.donor.clone(),
        },
    )
    .await?
    .ok_or_else(|| PaymentError::Internal("failed to create donation".to_string()))?;

    match open_order(&state, pool, &campaign, &donation).await {
        Ok(order_id) => {
            info!(
                "Created order {order_id} for donation {} ({} {}) to {}",
                donation.id, donation.amount, donation.currency, campaign.slug
            );
            Ok(Json(CreateOrderResponse {
                order_id,
                donation_id: donation.id,
            }))
        }
        Err(e) => {
            // Keep the row from lingering in `pending` after a failed order.
            match db::transition(pool, DonationFilter::Id(&donation.id), DonationStatus::Failed)
                .await
            {
                Ok(_) => warn!("Marked donation {} failed: {e}", donation.id),
                Err(mark_err) => error!(
                    "Could not mark donation {} failed after '{e}': {mark_err}",
                    donation.id
                ),
            }
            Err(e)
        }
    }
}

/// Use the active campaign for the slug, or seed one from the project with
/// the same id.
async fn resolve_campaign(pool: &SqlitePool, request: &DonationRequest) -> Result<Campaign> {
    let slug = &request.campaign_slug;
    if let Some(campaign) = db::find_campaign_by_slug(pool, slug).await? {
        if campaign.is_active() {
            return Ok(campaign);
        }
    }

    let project = db::find_project(pool, slug)
        .await?
        .ok_or_else(|| PaymentError::NotFound("campaign not found or inactive".to_string()))?;

    let campaign =
        db::upsert_campaign_from_project(pool, slug, &project, &request.currency).await?;
    info!("Seeded campaign '{slug}' from project {}", project.id);
    Ok(campaign)
}

/// Create the PayPal order for `donation` and remember its id.
async fn open_order(
    state: &ApiState,
    pool: &SqlitePool,
    campaign: &Campaign,
    donation: &Donation,
) -> Result<String> {
    let amount = donation
        .amount()
        .map(format_amount)
        .unwrap_or_else(|| donation.amount.clone());

    let order = state
        .paypal
        .create_order(&OrderRequest {
            donation_id: &donation.id,
            campaign_slug: &campaign.slug,
            campaign_title: &campaign.title,
            amount: &amount,
            currency: &donation.currency,
            brand_name: state.paypal.config().brand_name.as_deref(),
        })
        .await?;

    let order_id = order
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| PaymentError::BadGateway("PayPal did not return an order id".to_string()))?;

    debug!("PayPal order {order_id} is {:?}", order.status);
    if !db::set_order_id(pool, &donation.id, &order_id).await? {
        return Err(PaymentError::Internal(format!(
            "donation {} is no longer pending",
            donation.id
        )));
    }
    Ok(order_id)
}

// ─────────────────────────────────────────────────────────
// Capture
// ─────────────────────────────────────────────────────────

/// `POST /api/paypal/capture-order`
pub async fn capture_order(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<CaptureOrderResponse>> {
    let order_id = validation::parse_capture_order(&body)?;
    let pool = state.datastore.privileged().await?;

    let captured = state.paypal.capture_order(&order_id).await?;
    let capture_id = captured
        .capture_id()
        .ok_or_else(|| {
            PaymentError::BadGateway("PayPal did not return a capture id".to_string())
        })?
        .to_string();
    let custom_id = captured.custom_id();

    let response = Json(CaptureOrderResponse {
        ok: true,
        status: DonationStatus::Confirmed.as_str(),
        capture_id: capture_id.clone(),
    });

    let existing = db::find_donation(pool, DonationFilter::OrderId(&order_id)).await?;
    if let Some(donation) = &existing {
        if donation.provider_capture_id.as_deref() == Some(capture_id.as_str()) {
            info!("Capture {capture_id} already recorded for donation {}", donation.id);
            return Ok(response);
        }
    }

    let target = match (&existing, custom_id) {
        (Some(donation), _) => DonationFilter::Id(&donation.id),
        (None, Some(custom_id)) => DonationFilter::Id(custom_id),
        (None, None) => DonationFilter::OrderId(&order_id),
    };

    let updated = db::confirm(
        pool,
        target,
        Some(&capture_id),
        chrono::Utc::now().timestamp(),
    )
    .await?;

    if updated > 0 {
        info!("Order {order_id} captured as {capture_id}");
        return Ok(response);
    }

    // Nothing changed: only report success if a concurrent path already
    // confirmed the donation with this capture.
    match db::find_donation(pool, target).await? {
        Some(donation) if donation.is_confirmed_with(&capture_id) => {
            info!("Capture {capture_id} confirmed concurrently for donation {}", donation.id);
            Ok(response)
        }
        Some(donation) => {
            error!(
                "Capture {capture_id} for order {order_id} ({:?}) not recorded: donation {} is {}",
                captured.status, donation.id, donation.status
            );
            Err(PaymentError::Conflict(format!(
                "donation {} is {} and cannot be confirmed",
                donation.id, donation.status
            )))
        }
        None => {
            error!(
                "Capture {capture_id} for order {order_id} ({:?}) matches no donation",
                captured.status
            );
            Err(PaymentError::NotFound(format!("no donation for order {order_id}")))
        }
    }
}
