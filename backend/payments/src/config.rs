//! Application configuration loaded from environment variables.
//!
//! Secrets (PayPal credentials, webhook id, database URL) are optional here
//! and validated at first use, so the server starts even when a deployment
//! only exercises part of the flow.

use crate::errors::{PaymentError, Result};

const SANDBOX_API_BASE: &str = "https://api-m.sandbox.paypal.com";
const LIVE_API_BASE: &str = "https://api-m.paypal.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayPalEnvironment {
    Sandbox,
    Live,
}

impl PayPalEnvironment {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "sandbox" => Ok(Self::Sandbox),
            "live" | "production" => Ok(Self::Live),
            other => Err(PaymentError::Config(format!(
                "PAYPAL_ENV must be 'sandbox' or 'live', got '{other}'"
            ))),
        }
    }

    pub fn api_base(&self) -> &'static str {
        match self {
            Self::Sandbox => SANDBOX_API_BASE,
            Self::Live => LIVE_API_BASE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub environment: PayPalEnvironment,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Webhook id registered in the PayPal dashboard, required to verify events
    pub webhook_id: Option<String>,
    /// Overrides the environment-derived API base (used for local mocks)
    pub api_base_override: Option<String>,
    pub brand_name: Option<String>,
}

impl PayPalConfig {
    pub fn api_base(&self) -> &str {
        self.api_base_override
            .as_deref()
            .unwrap_or_else(|| self.environment.api_base())
    }

    pub fn credentials(&self) -> Result<(&str, &str)> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(PaymentError::Config(
                "PayPal credentials missing: set PAYPAL_CLIENT_ID and PAYPAL_CLIENT_SECRET"
                    .to_string(),
            )),
        }
    }

    pub fn webhook_id(&self) -> Result<&str> {
        self.webhook_id.as_deref().ok_or_else(|| {
            PaymentError::Config(
                "PayPal webhook id missing: set PAYPAL_WEBHOOK_ID".to_string(),
            )
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the REST API server
    pub api_port: u16,
    /// Datastore URL (e.g. sqlite:./donations.db)
    pub database_url: Option<String>,
    pub paypal: PayPalConfig,
    /// How often (in seconds) to sweep stale pending donations; 0 disables
    pub sweep_interval_secs: u64,
    /// Age (in seconds) after which an order-less pending donation is failed
    pub pending_ttl_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            api_port: env_var("API_PORT")
                .unwrap_or_else(|| "3001".to_string())
                .parse()
                .map_err(|_| PaymentError::Config("Invalid API_PORT".to_string()))?,
            database_url: env_var("DATABASE_URL"),
            paypal: PayPalConfig {
                environment: PayPalEnvironment::parse(
                    &env_var("PAYPAL_ENV").unwrap_or_default(),
                )?,
                client_id: env_var("PAYPAL_CLIENT_ID"),
                client_secret: env_var("PAYPAL_CLIENT_SECRET"),
                webhook_id: env_var("PAYPAL_WEBHOOK_ID"),
                api_base_override: env_var("PAYPAL_API_BASE"),
                brand_name: env_var("PAYPAL_BRAND_NAME"),
            },
            sweep_interval_secs: env_var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|| "300".to_string())
                .parse()
                .map_err(|_| PaymentError::Config("Invalid SWEEP_INTERVAL_SECS".to_string()))?,
            pending_ttl_secs: parse_pending_ttl(env_var("PENDING_TTL_SECS").as_deref())?,
        })
    }
}

/// Must exceed the outbound HTTP timeout so an order still being opened is
/// never swept.
const MIN_PENDING_TTL_SECS: i64 = 60;

fn parse_pending_ttl(raw: Option<&str>) -> Result<i64> {
    let ttl: i64 = raw
        .unwrap_or("86400")
        .parse()
        .map_err(|_| PaymentError::Config("Invalid PENDING_TTL_SECS".to_string()))?;
    if ttl < MIN_PENDING_TTL_SECS {
        return Err(PaymentError::Config(format!(
            "PENDING_TTL_SECS must be at least {MIN_PENDING_TTL_SECS}"
        )));
    }
    Ok(ttl)
}

/// Read an environment variable, treating blank values as unset.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
