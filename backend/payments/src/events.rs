//! PayPal webhook event envelope and the event types this service acts on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// All webhook event kinds the reconciliation flow recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The buyer approved the order (`CHECKOUT.ORDER.APPROVED`).
    OrderApproved,
    /// Funds were captured (`PAYMENT.CAPTURE.COMPLETED`).
    CaptureCompleted,
    /// A capture was refunded (`PAYMENT.CAPTURE.REFUNDED`).
    CaptureRefunded,
    /// A capture was denied (`PAYMENT.CAPTURE.DENIED`).
    CaptureDenied,
    /// A capture failed (`PAYMENT.CAPTURE.FAILED`).
    CaptureFailed,
    /// Anything else PayPal may deliver to this endpoint.
    Unknown,
}

impl EventKind {
    pub fn from_event_type(event_type: &str) -> Self {
        match event_type {
            "CHECKOUT.ORDER.APPROVED" => Self::OrderApproved,
            "PAYMENT.CAPTURE.COMPLETED" => Self::CaptureCompleted,
            "PAYMENT.CAPTURE.REFUNDED" => Self::CaptureRefunded,
            "PAYMENT.CAPTURE.DENIED" => Self::CaptureDenied,
            "PAYMENT.CAPTURE.FAILED" => Self::CaptureFailed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderApproved => "order_approved",
            Self::CaptureCompleted => "capture_completed",
            Self::CaptureRefunded => "capture_refunded",
            Self::CaptureDenied => "capture_denied",
            Self::CaptureFailed => "capture_failed",
            Self::Unknown => "unknown",
        }
    }
}

/// The parts of a PayPal event envelope read by the handler. The raw JSON is
/// kept separately because signature verification needs the full body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    pub id: Option<String>,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub resource: Value,
}

impl WebhookEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::from_event_type(&self.event_type)
    }

    /// `resource.id`: the order id for order events, the capture id for
    /// capture events, the refund id for refunds.
    pub fn resource_id(&self) -> Option<&str> {
        str_at(&self.resource, &["id"])
    }

    /// `resource.supplementary_data.related_ids.order_id`
    pub fn related_order_id(&self) -> Option<&str> {
        str_at(
            &self.resource,
            &["supplementary_data", "related_ids", "order_id"],
        )
    }

    pub fn custom_id(&self) -> Option<&str> {
        str_at(&self.resource, &["custom_id"])
    }

    /// Order id of an `ORDER.APPROVED` event.
    pub fn approved_order_id(&self) -> Option<&str> {
        self.resource_id().or_else(|| self.related_order_id())
    }

    /// Capture id a refund refers to: the `up` link of the refund resource,
    /// else the resource id itself.
    pub fn refunded_capture_id(&self) -> Option<&str> {
        self.link_target("up")
            .filter(|href| href.contains("/captures/"))
            .and_then(last_path_segment)
            .or_else(|| self.resource_id())
    }

    fn link_target(&self, rel: &str) -> Option<&str> {
        self.resource
            .get("links")?
            .as_array()?
            .iter()
            .find(|link| link.get("rel").and_then(Value::as_str) == Some(rel))?
            .get("href")?
            .as_str()
    }
}

/// Walk `path` into `value` and return a non-empty string leaf.
fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))?
        .as_str()
        .filter(|s| !s.is_empty())
}

fn last_path_segment(href: &str) -> Option<&str> {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}
