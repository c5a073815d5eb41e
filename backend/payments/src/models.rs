//! Rows and domain types for campaigns and donations.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Donation lifecycle states.
///
/// ```text
/// pending --(order approved)--> approved
/// pending|approved --(capture)--> confirmed
/// confirmed --(refund)--> refunded
/// pending|approved|confirmed --(deny/fail)--> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Pending,
    Approved,
    Confirmed,
    Refunded,
    Failed,
}

impl DonationStatus {
    /// Parse a stored status, accepting the legacy `confirmado` spelling.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "confirmed" | "confirmado" => Some(Self::Confirmed),
            "refunded" => Some(Self::Refunded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Confirmed => "confirmed",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
        }
    }

    /// Stored status strings a donation may hold right before moving to `self`.
    pub fn predecessors(&self) -> &'static [&'static str] {
        match self {
            Self::Pending => &[],
            Self::Approved => &["pending"],
            Self::Confirmed => &["pending", "approved"],
            Self::Refunded => &["confirmed", "confirmado"],
            Self::Failed => &["pending", "approved", "confirmed", "confirmado"],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub goal_amount: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub goal_amount: Option<String>,
    pub currency: String,
    pub active: Option<bool>,
    pub created_at: i64,
}

impl Campaign {
    /// Only an explicit `false` deactivates a campaign.
    pub fn is_active(&self) -> bool {
        self.active != Some(false)
    }
}

/// Donor details as submitted, already redacted for anonymous donors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorSnapshot {
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_anonymous: bool,
    pub message: Option<String>,
}

pub const ANONYMOUS_DONOR_NAME: &str = "Anonymous";

impl DonorSnapshot {
    pub fn new(
        name: Option<String>,
        email: Option<String>,
        is_anonymous: bool,
        message: Option<String>,
    ) -> Self {
        if is_anonymous {
            Self {
                name: Some(ANONYMOUS_DONOR_NAME.to_string()),
                email: None,
                is_anonymous,
                message,
            }
        } else {
            Self {
                name,
                email,
                is_anonymous,
                message,
            }
        }
    }
}

/// A donation row as stored in / read from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: String,
    pub campaign_id: String,
    pub project_id: String,
    pub user_id: Option<String>,
    /// Decimal amount with two fractional digits
    pub amount: String,
    pub currency: String,
    pub status: String,
    pub provider_order_id: Option<String>,
    pub provider_capture_id: Option<String>,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub is_anonymous: bool,
    pub message: Option<String>,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
}

impl Donation {
    pub fn status(&self) -> Option<DonationStatus> {
        DonationStatus::parse(&self.status)
    }

    pub fn amount(&self) -> Option<Decimal> {
        Decimal::from_str(&self.amount).ok()
    }

    /// True when this donation already reached `confirmed` with `capture_id`.
    pub fn is_confirmed_with(&self, capture_id: &str) -> bool {
        self.provider_capture_id.as_deref() == Some(capture_id)
            && self.status() == Some(DonationStatus::Confirmed)
    }
}

/// Values for a freshly inserted `pending` donation.
#[derive(Debug, Clone)]
pub struct NewDonation {
    pub campaign_id: String,
    pub project_id: String,
    pub user_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub donor: DonorSnapshot,
}

/// Public fundraising progress for one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub goal_amount: Option<f64>,
    pub currency: String,
    pub confirmed_total: f64,
    pub confirmed_count: i64,
    pub progress_ratio: f64,
}

impl CampaignProgress {
    pub fn new(
        id: String,
        slug: String,
        title: String,
        goal_amount: Option<f64>,
        currency: String,
        confirmed_total: f64,
        confirmed_count: i64,
    ) -> Self {
        let progress_ratio = match goal_amount {
            Some(goal) if goal > 0.0 => confirmed_total / goal,
            _ => 0.0,
        };
        Self {
            id,
            slug,
            title,
            goal_amount,
            currency,
            confirmed_total,
            confirmed_count,
            progress_ratio,
        }
    }
}

/// Round to cents, halves away from zero.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Format an amount the way it is stored and sent to PayPal: two decimals.
pub fn format_amount(amount: Decimal) -> String {
    let mut value = round_cents(amount);
    value.rescale(2);
    value.to_string()
}
