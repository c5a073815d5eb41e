//! PayPal webhook receiver.
//!
//! Every delivery is verified by PayPal's `verify-webhook-signature` endpoint
//! before any donation is touched. Verified events are applied as forward-only
//! status transitions and acknowledged with 200 even when they match nothing,
//! since PayPal only redelivers on non-2xx responses.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::api::ApiState;
use crate::db::{self, DonationFilter};
use crate::errors::{PaymentError, Result};
use crate::events::{EventKind, WebhookEvent};
use crate::models::DonationStatus;
use crate::paypal::SignatureHeaders;

pub const HEADER_AUTH_ALGO: &str = "paypal-auth-algo";
pub const HEADER_CERT_URL: &str = "paypal-cert-url";
pub const HEADER_TRANSMISSION_ID: &str = "paypal-transmission-id";
pub const HEADER_TRANSMISSION_SIG: &str = "paypal-transmission-sig";
pub const HEADER_TRANSMISSION_TIME: &str = "paypal-transmission-time";

const VERIFIED: &str = "SUCCESS";

#[derive(Debug, Serialize)]
pub struct Ack {
    pub ok: bool,
}

/// Collect the five signature headers; all are required.
pub fn signature_headers(headers: &HeaderMap) -> Result<SignatureHeaders> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
            .ok_or(PaymentError::MissingSignatureHeaders)
    };

    Ok(SignatureHeaders {
        auth_algo: get(HEADER_AUTH_ALGO)?,
        cert_url: get(HEADER_CERT_URL)?,
        transmission_id: get(HEADER_TRANSMISSION_ID)?,
        transmission_sig: get(HEADER_TRANSMISSION_SIG)?,
        transmission_time: get(HEADER_TRANSMISSION_TIME)?,
    })
}

/// `POST /api/paypal/webhook`
pub async fn handle(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>> {
    let webhook_id = state.paypal.config().webhook_id()?;

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| PaymentError::Validation(format!("invalid JSON body: {e}")))?;
    let signature = signature_headers(&headers)?;

    let verification = state
        .paypal
        .verify_webhook_signature(&signature, webhook_id, &raw)
        .await?;
    if verification != VERIFIED {
        warn!(
            "Webhook {} failed verification: {verification:?}",
            signature.transmission_id
        );
        return Err(PaymentError::InvalidSignature);
    }

    let event: WebhookEvent = serde_json::from_value(raw)
        .map_err(|e| PaymentError::Validation(format!("invalid webhook event: {e}")))?;
    let pool = state.datastore.privileged().await?;

    if let Some(event_id) = event.id.as_deref() {
        if db::webhook_event_processed(pool, event_id).await? {
            info!("Webhook event {event_id} already processed");
            return Ok(Json(Ack { ok: true }));
        }
    }

    info!(
        "Webhook {} ({}) verified",
        event.id.as_deref().unwrap_or("-"),
        event.event_type
    );
    dispatch(pool, &event).await?;

    if let Some(event_id) = event.id.as_deref() {
        db::record_webhook_event(pool, event_id, &event.event_type, event.resource_id()).await?;
    }
    Ok(Json(Ack { ok: true }))
}

async fn dispatch(pool: &SqlitePool, event: &WebhookEvent) -> Result<()> {
    match event.kind() {
        EventKind::OrderApproved => on_order_approved(pool, event).await,
        EventKind::CaptureCompleted => on_capture_completed(pool, event).await,
        EventKind::CaptureRefunded => on_capture_refunded(pool, event).await,
        EventKind::CaptureDenied | EventKind::CaptureFailed => {
            on_capture_failed(pool, event).await
        }
        EventKind::Unknown => {
            info!("Ignoring webhook event type {}", event.event_type);
            Ok(())
        }
    }
}

async fn on_order_approved(pool: &SqlitePool, event: &WebhookEvent) -> Result<()> {
    let Some(order_id) = event.approved_order_id() else {
        return Ok(());
    };
    let rows = db::transition(
        pool,
        DonationFilter::OrderId(order_id),
        DonationStatus::Approved,
    )
    .await?;
    info!("Order {order_id} approved ({rows} donation(s) updated)");
    Ok(())
}

async fn on_capture_completed(pool: &SqlitePool, event: &WebhookEvent) -> Result<()> {
    let capture_id = event.resource_id();
    let order_id = event.related_order_id();
    let custom_id = event.custom_id();

    let filters: Vec<DonationFilter<'_>> = [
        order_id.map(DonationFilter::OrderId),
        capture_id.map(DonationFilter::CaptureId),
        custom_id.map(DonationFilter::Id),
    ]
    .into_iter()
    .flatten()
    .collect();
    if filters.is_empty() {
        warn!("{} carries no correlation id", event.kind().as_str());
        return Ok(());
    }

    let found = db::find_first_match(pool, &filters).await?;
    if let (Some(donation), Some(capture_id)) = (&found, capture_id) {
        if donation.is_confirmed_with(capture_id) {
            info!("Capture {capture_id} already confirmed for donation {}", donation.id);
            return Ok(());
        }
    }

    let target = found
        .as_ref()
        .map(|d| DonationFilter::Id(&d.id))
        .or(capture_id.map(DonationFilter::CaptureId))
        .or(order_id.map(DonationFilter::OrderId))
        .or(custom_id.map(DonationFilter::Id));
    let Some(target) = target else {
        return Ok(());
    };

    let rows = db::confirm(pool, target, capture_id, chrono::Utc::now().timestamp()).await?;
    if rows == 0 {
        warn!("Capture {capture_id:?} (order {order_id:?}) confirmed no donation");
    } else {
        info!("Capture {capture_id:?} confirmed via webhook");
    }
    Ok(())
}

async fn on_capture_refunded(pool: &SqlitePool, event: &WebhookEvent) -> Result<()> {
    let Some(capture_id) = event.refunded_capture_id() else {
        return Ok(());
    };
    let rows = db::transition(
        pool,
        DonationFilter::CaptureId(capture_id),
        DonationStatus::Refunded,
    )
    .await?;
    info!("Capture {capture_id} refunded ({rows} donation(s) updated)");
    Ok(())
}

async fn on_capture_failed(pool: &SqlitePool, event: &WebhookEvent) -> Result<()> {
    let mut rows = 0;
    if let Some(capture_id) = event.resource_id() {
        rows = db::transition(
            pool,
            DonationFilter::CaptureId(capture_id),
            DonationStatus::Failed,
        )
        .await?;
    }
    // A denied capture was never stored, so fall back to its order.
    if rows == 0 {
        if let Some(order_id) = event.related_order_id() {
            rows = db::transition(pool, DonationFilter::OrderId(order_id), DonationStatus::Failed)
                .await?;
        }
    }
    info!(
        "{} for capture {:?} ({rows} donation(s) updated)",
        event.kind().as_str(),
        event.resource_id()
    );
    Ok(())
}
