//! Application configuration loaded from environment variables.

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Base URL of the payment provider API (e.g. https://api.stripe.com/v1)
    pub payment_api_url: String,
    /// Secret API key used to authenticate against the payment provider
    pub payment_secret_key: String,
    /// Shared secret used to verify webhook signatures
    pub webhook_secret: String,
    /// Maximum accepted age of a signed webhook, in seconds
    pub webhook_tolerance_secs: i64,
    /// Where the provider sends donors after a successful recurring checkout
    pub checkout_success_url: String,
    /// Where the provider sends donors who abandon a recurring checkout
    pub checkout_cancel_url: String,
    /// Key prefix under which receipt documents are addressed
    pub receipt_document_prefix: String,
    /// PENDING donations older than this are expired; `0` disables the sweeper
    pub pending_expiry_secs: u64,
    /// How often (in seconds) the sweeper looks for stale donations
    pub sweep_interval_secs: u64,
    /// Timeout for outbound provider requests
    pub provider_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./ledger.db".to_string()),
            api_port: parse_var("API_PORT", "3002")?,
            payment_api_url: env_var("PAYMENT_API_URL")
                .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
            payment_secret_key: env_var("PAYMENT_SECRET_KEY").map_err(|_| {
                LedgerError::Config("PAYMENT_SECRET_KEY environment variable is required".to_string())
            })?,
            webhook_secret: env_var("WEBHOOK_SECRET").map_err(|_| {
                LedgerError::Config("WEBHOOK_SECRET environment variable is required".to_string())
            })?,
            webhook_tolerance_secs: parse_var("WEBHOOK_TOLERANCE_SECS", "300")?,
            checkout_success_url: env_var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/donate/success".to_string()),
            checkout_cancel_url: env_var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/donate/cancel".to_string()),
            receipt_document_prefix: env_var("RECEIPT_DOCUMENT_PREFIX")
                .unwrap_or_else(|_| "receipts".to_string()),
            pending_expiry_secs: parse_var("PENDING_EXPIRY_SECS", "0")?,
            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", "300")?,
            provider_timeout_secs: parse_var("PROVIDER_TIMEOUT_SECS", "30")?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| LedgerError::Config(format!("Missing env var: {key}")))
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| LedgerError::Config(format!("Invalid {key}")))
}
