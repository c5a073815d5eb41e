//! Request-body parsing and validation for the order endpoints.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{PaymentError, Result};
use crate::models::{round_cents, DonorSnapshot};

pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCreateOrder {
    campaign_slug: Option<Value>,
    amount: Option<Value>,
    currency: Option<String>,
    donor: Option<RawDonor>,
    user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDonor {
    name: Option<String>,
    email: Option<String>,
    #[serde(default)]
    is_anonymous: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCaptureOrder {
    #[serde(rename = "orderID")]
    order_id: Option<String>,
}

/// A validated donation request.
#[derive(Debug, Clone, PartialEq)]
pub struct DonationRequest {
    pub campaign_slug: String,
    /// Rounded to two decimals, strictly positive
    pub amount: Decimal,
    pub currency: String,
    pub donor: DonorSnapshot,
    pub user_id: Option<String>,
}

fn parse_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| PaymentError::Validation(format!("invalid JSON body: {e}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_create_order(body: &[u8]) -> Result<DonationRequest> {
    let raw: RawCreateOrder = parse_body(body)?;

    let campaign_slug = match raw.campaign_slug {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            return Err(PaymentError::Validation(
                "campaignSlug is required".to_string(),
            ))
        }
    };

    let amount = parse_amount(raw.amount.as_ref())?;
    let currency = parse_currency(raw.currency.as_deref())?;

    let donor = raw.donor.unwrap_or_default();
    let donor = DonorSnapshot::new(
        non_empty(donor.name),
        non_empty(donor.email),
        donor.is_anonymous,
        non_empty(donor.message),
    );

    Ok(DonationRequest {
        campaign_slug,
        amount,
        currency,
        donor,
        user_id: non_empty(raw.user_id),
    })
}

/// Accept a JSON number or numeric string that is finite and positive once
/// rounded to cents.
pub fn parse_amount(value: Option<&Value>) -> Result<Decimal> {
    let invalid = || PaymentError::Validation("amount must be a number greater than 0".to_string());

    let text = match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        _ => return Err(invalid()),
    };

    let amount = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map(round_cents)
        .map_err(|_| invalid())?;

    if amount <= Decimal::ZERO {
        return Err(invalid());
    }
    Ok(amount)
}

pub fn parse_currency(value: Option<&str>) -> Result<String> {
    let currency = value
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CURRENCY)
        .to_ascii_uppercase();

    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(PaymentError::Validation(format!(
            "currency must be a 3-letter ISO code, got '{currency}'"
        )));
    }
    Ok(currency)
}

/// Returns the `orderID` of a capture request.
pub fn parse_capture_order(body: &[u8]) -> Result<String> {
    let raw: RawCaptureOrder = parse_body(body)?;
    non_empty(raw.order_id)
        .ok_or_else(|| PaymentError::Validation("orderID is required".to_string()))
}
