//! PayPal REST client: OAuth2 token cache and authenticated JSON requests.
//!
//! ## Token lifecycle
//!
//! * A client-credentials token is fetched on first use and kept in memory.
//! * It is reused until fewer than [`TOKEN_REFRESH_MARGIN_SECS`] seconds of
//!   validity remain, then exchanged again. Refreshes are serialized behind a
//!   mutex so concurrent handlers share one exchange.
//! * Nothing is persisted; a restarted process starts with an empty cache.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PayPalConfig;
use crate::errors::{PaymentError, Result};

const TOKEN_REFRESH_MARGIN_SECS: i64 = 30;

// ─────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now > Duration::seconds(TOKEN_REFRESH_MARGIN_SECS)
    }
}

/// Inputs for a single-unit donation order.
#[derive(Debug, Clone)]
pub struct OrderRequest<'a> {
    pub donation_id: &'a str,
    pub campaign_slug: &'a str,
    pub campaign_title: &'a str,
    /// Amount already formatted with two decimals
    pub amount: &'a str,
    pub currency: &'a str,
    pub brand_name: Option<&'a str>,
}

impl OrderRequest<'_> {
    pub fn to_body(&self) -> Value {
        let mut context = json!({
            "shipping_preference": "NO_SHIPPING",
            "user_action": "PAY_NOW",
        });
        if let Some(brand) = self.brand_name {
            context["brand_name"] = json!(brand);
        }

        json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": self.campaign_slug,
                "custom_id": self.donation_id,
                "description": format!("Donation to {}", self.campaign_title),
                "amount": {
                    "currency_code": self.currency,
                    "value": self.amount,
                },
            }],
            "application_context": context,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreatedOrder {
    pub id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CapturedOrder {
    pub status: Option<String>,
    #[serde(default)]
    pub purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurchaseUnit {
    pub custom_id: Option<String>,
    #[serde(default)]
    pub payments: Option<Payments>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Payments {
    #[serde(default)]
    pub captures: Vec<Capture>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Capture {
    pub id: Option<String>,
    pub custom_id: Option<String>,
}

impl CapturedOrder {
    fn first_unit(&self) -> Option<&PurchaseUnit> {
        self.purchase_units.first()
    }

    fn first_capture(&self) -> Option<&Capture> {
        self.first_unit()?.payments.as_ref()?.captures.first()
    }

    pub fn capture_id(&self) -> Option<&str> {
        self.first_capture()?.id.as_deref().filter(|s| !s.is_empty())
    }

    /// The donation id attached at order creation, read from the capture and
    /// falling back to the purchase unit.
    pub fn custom_id(&self) -> Option<&str> {
        self.first_capture()
            .and_then(|c| c.custom_id.as_deref())
            .or_else(|| self.first_unit().and_then(|u| u.custom_id.as_deref()))
            .filter(|s| !s.is_empty())
    }
}

/// The five transmission headers PayPal signs every webhook delivery with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureHeaders {
    pub auth_algo: String,
    pub cert_url: String,
    pub transmission_id: String,
    pub transmission_sig: String,
    pub transmission_time: String,
}

#[derive(Debug, Deserialize)]
struct VerificationResponse {
    verification_status: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct PayPalClient {
    http: Client,
    config: PayPalConfig,
    token: Mutex<Option<AccessToken>>,
}

impl PayPalClient {
    pub fn new(http: Client, config: PayPalConfig) -> Self {
        Self {
            http,
            config,
            token: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PayPalConfig {
        &self.config
    }

    /// Return a bearer token, exchanging client credentials when the cached
    /// one is missing or about to expire.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let (client_id, client_secret) = self.config.credentials()?;
        let basic = BASE64.encode(format!("{client_id}:{client_secret}"));

        let resp = self
            .http
            .post(format!("{}/v1/oauth2/token", self.config.api_base()))
            .header(header::AUTHORIZATION, format!("Basic {basic}"))
            .header(header::ACCEPT, "application/json")
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PaymentError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = resp.json().await?;
        let fresh = AccessToken {
            value: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        };
        info!("Obtained PayPal access token (expires at {})", fresh.expires_at);

        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Issue an authenticated request against the PayPal API.
    ///
    /// JSON responses are parsed; anything else is returned as a string value.
    pub async fn fetch(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.api_base(), path);

        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let is_json = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let text = resp.text().await?;

        debug!("PayPal {method} {path} -> {status}");

        if !status.is_success() {
            return Err(PaymentError::Provider {
                status: status.as_u16(),
                body: text,
            });
        }

        if !is_json {
            return Ok(Value::String(text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn create_order(&self, order: &OrderRequest<'_>) -> Result<CreatedOrder> {
        let value = self
            .fetch(Method::POST, "/v2/checkout/orders", Some(&order.to_body()))
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    pub async fn capture_order(&self, order_id: &str) -> Result<CapturedOrder> {
        let value = self
            .fetch(
                Method::POST,
                &format!("/v2/checkout/orders/{order_id}/capture"),
                Some(&json!({})),
            )
            .await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    /// Ask PayPal whether `event` was signed for `webhook_id`. Returns the
    /// raw verification status (`SUCCESS` when authentic).
    pub async fn verify_webhook_signature(
        &self,
        headers: &SignatureHeaders,
        webhook_id: &str,
        event: &Value,
    ) -> Result<String> {
        let body = json!({
            "auth_algo": headers.auth_algo,
            "cert_url": headers.cert_url,
            "transmission_id": headers.transmission_id,
            "transmission_sig": headers.transmission_sig,
            "transmission_time": headers.transmission_time,
            "webhook_id": webhook_id,
            "webhook_event": event,
        });
        let value = self
            .fetch(
                Method::POST,
                "/v1/notifications/verify-webhook-signature",
                Some(&body),
            )
            .await?;
        let verification: VerificationResponse =
            serde_json::from_value(value).unwrap_or(VerificationResponse {
                verification_status: None,
            });
        Ok(verification.verification_status.unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
