//! Payment provider client: one-time intents and recurring checkouts.
//!
//! ## Failure policy
//!
//! * No retries happen here. A failed call leaves the donation PENDING and
//!   the caller decides whether to try again.
//! * Provider error bodies (`{"error": {"message": …}}`) are surfaced as
//!   [`LedgerError::Provider`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::donation::Frequency;
use crate::errors::{LedgerError, Result};
use crate::money::Money;

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Month,
    Year,
}

/// Billing interval of a recurring checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub unit: IntervalUnit,
    pub count: u32,
}

impl From<Frequency> for Interval {
    fn from(f: Frequency) -> Self {
        match f {
            Frequency::Monthly => Interval {
                unit: IntervalUnit::Month,
                count: 1,
            },
            Frequency::Quarterly => Interval {
                unit: IntervalUnit::Month,
                count: 3,
            },
            Frequency::Yearly => Interval {
                unit: IntervalUnit::Year,
                count: 1,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OneTimeIntent {
    pub amount: Money,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecurringCheckout {
    pub amount: Money,
    pub interval: Interval,
    pub metadata: BTreeMap<String, String>,
}

/// What the provider hands back when a payment is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentHandle {
    /// Intent or checkout-session id; confirmations refer to it.
    pub reference: String,
    /// Secret the browser uses to confirm a one-time intent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Hosted checkout page for recurring donations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(&self, request: &OneTimeIntent) -> Result<IntentHandle>;

    async fn create_recurring_checkout(&self, request: &RecurringCheckout) -> Result<IntentHandle>;
}

#[derive(Debug, Deserialize)]
struct ProviderObject {
    id: String,
    client_secret: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

pub struct HttpPaymentProvider {
    client: Client,
    base_url: String,
    auth_header: String,
    success_url: String,
    cancel_url: String,
}

impl HttpPaymentProvider {
    pub fn new(
        client: Client,
        base_url: &str,
        secret_key: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: basic_auth(secret_key),
            success_url: success_url.to_string(),
            cancel_url: cancel_url.to_string(),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<ProviderObject> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ProviderErrorBody>(&text)
                .map(|b| match b.error.kind {
                    Some(kind) => format!("{kind}: {}", b.error.message),
                    None => b.error.message,
                })
                .unwrap_or(text);
            warn!("Payment provider rejected {path} ({status}): {detail}");
            return Err(LedgerError::Provider(format!("{status}: {detail}")));
        }

        let object: ProviderObject = resp.json().await?;
        debug!("Payment provider created {path} object {}", object.id);
        Ok(object)
    }
}

/// `Authorization` value for the provider's key-as-username scheme.
fn basic_auth(secret_key: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{secret_key}:")))
}

fn intent_body(request: &OneTimeIntent) -> serde_json::Value {
    serde_json::json!({
        "amount": request.amount.amount_minor,
        "currency": request.amount.currency.as_str().to_ascii_lowercase(),
        "metadata": request.metadata,
        "automatic_payment_methods": { "enabled": true },
    })
}

fn checkout_body(request: &RecurringCheckout, success_url: &str, cancel_url: &str) -> serde_json::Value {
    serde_json::json!({
        "mode": "subscription",
        "success_url": success_url,
        "cancel_url": cancel_url,
        "metadata": request.metadata,
        "line_items": [{
            "quantity": 1,
            "price_data": {
                "currency": request.amount.currency.as_str().to_ascii_lowercase(),
                "unit_amount": request.amount.amount_minor,
                "product_data": { "name": "Recurring donation" },
                "recurring": {
                    "interval": request.interval.unit,
                    "interval_count": request.interval.count,
                },
            },
        }],
    })
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_intent(&self, request: &OneTimeIntent) -> Result<IntentHandle> {
        let object = self.post("/payment_intents", intent_body(request)).await?;
        Ok(IntentHandle {
            reference: object.id,
            client_secret: object.client_secret,
            redirect_url: None,
        })
    }

    async fn create_recurring_checkout(&self, request: &RecurringCheckout) -> Result<IntentHandle> {
        let body = checkout_body(request, &self.success_url, &self.cancel_url);
        let object = self.post("/checkout/sessions", body).await?;
        if object.url.is_none() {
            return Err(LedgerError::Provider(format!(
                "checkout session {} has no redirect url",
                object.id
            )));
        }
        Ok(IntentHandle {
            reference: object.id,
            client_secret: None,
            redirect_url: object.url,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    #[test]
    fn interval_from_frequency() {
        assert_eq!(
            Interval::from(Frequency::Monthly),
            Interval {
                unit: IntervalUnit::Month,
                count: 1
            }
        );
        assert_eq!(
            Interval::from(Frequency::Quarterly),
            Interval {
                unit: IntervalUnit::Month,
                count: 3
            }
        );
        assert_eq!(
            Interval::from(Frequency::Yearly),
            Interval {
                unit: IntervalUnit::Year,
                count: 1
            }
        );
    }

    #[test]
    fn basic_auth_encodes_key_as_username() {
        assert_eq!(basic_auth("sk_test"), "Basic c2tfdGVzdDo=");
    }

    #[test]
    fn checkout_body_carries_interval() {
        let request = RecurringCheckout {
            amount: Money::new(2_500, Currency::usd()),
            interval: Frequency::Quarterly.into(),
            metadata: BTreeMap::from([("donation_id".to_string(), "7".to_string())]),
        };
        let body = checkout_body(&request, "https://ok", "https://cancel");
        let price = &body["line_items"][0]["price_data"];
        assert_eq!(price["currency"], "usd");
        assert_eq!(price["unit_amount"], 2_500);
        assert_eq!(price["recurring"]["interval"], "month");
        assert_eq!(price["recurring"]["interval_count"], 3);
        assert_eq!(body["metadata"]["donation_id"], "7");
    }

    #[test]
    fn intent_body_uses_minor_units() {
        let request = OneTimeIntent {
            amount: Money::new(10_000, Currency::parse("eur").unwrap()),
            metadata: BTreeMap::new(),
        };
        let body = intent_body(&request);
        assert_eq!(body["amount"], 10_000);
        assert_eq!(body["currency"], "eur");
    }
}
