//! Payment provider webhook events.
//!
//! The provider posts JSON envelopes of the form
//! `{"id": …, "type": "payment_intent.succeeded", "data": {"object": {…}}}`.
//! Only the handful of types that settle a donation are decoded; everything
//! else maps to [`EventKind::Unknown`] and is acknowledged without action.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::errors::{LedgerError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "payment-signature";

/// All recognised webhook event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A one-time intent was charged (`payment_intent.succeeded`).
    PaymentSucceeded,
    /// A one-time intent was declined (`payment_intent.payment_failed`).
    PaymentFailed,
    /// A one-time intent was abandoned (`payment_intent.canceled`).
    PaymentCanceled,
    /// A hosted checkout finished (`checkout.session.completed`); only final
    /// when the session reports `payment_status = "paid"`.
    CheckoutCompleted,
    /// Delayed checkout payment cleared.
    CheckoutAsyncSucceeded,
    /// Delayed checkout payment bounced.
    CheckoutAsyncFailed,
    /// The donor never completed the hosted checkout.
    CheckoutExpired,
    /// Anything else the provider sends us.
    Unknown,
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "payment_intent.succeeded" => Self::PaymentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentFailed,
            "payment_intent.canceled" => Self::PaymentCanceled,
            "checkout.session.completed" => Self::CheckoutCompleted,
            "checkout.session.async_payment_succeeded" => Self::CheckoutAsyncSucceeded,
            "checkout.session.async_payment_failed" => Self::CheckoutAsyncFailed,
            "checkout.session.expired" => Self::CheckoutExpired,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded => "payment_succeeded",
            Self::PaymentFailed => "payment_failed",
            Self::PaymentCanceled => "payment_canceled",
            Self::CheckoutCompleted => "checkout_completed",
            Self::CheckoutAsyncSucceeded => "checkout_async_succeeded",
            Self::CheckoutAsyncFailed => "checkout_async_failed",
            Self::CheckoutExpired => "checkout_expired",
            Self::Unknown => "unknown",
        }
    }
}

/// Definitive result carried by a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Paid,
    Failed,
}

/// A decoded confirmation, ready for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationEvent {
    pub event_id: Option<String>,
    pub kind: EventKind,
    /// Intent or checkout-session id the event refers to.
    pub external_ref: String,
    /// `None` while a checkout is still waiting on a delayed payment.
    pub outcome: Option<Outcome>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub failure_reason: Option<String>,
    /// Donation id echoed back from the metadata we attached.
    pub donation_id: Option<i64>,
}

// ─────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────

/// Decode a webhook body. Returns `Ok(None)` for event types we ignore.
pub fn decode_event(payload: &[u8]) -> Result<Option<ConfirmationEvent>> {
    let envelope: Value = serde_json::from_slice(payload)?;
    let event_type = envelope
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::Validation("webhook event has no type".to_string()))?;

    let kind = EventKind::from_type(event_type);
    if kind == EventKind::Unknown {
        return Ok(None);
    }

    let object = envelope
        .pointer("/data/object")
        .ok_or_else(|| LedgerError::Validation("webhook event has no data.object".to_string()))?;
    let external_ref = object
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| LedgerError::Validation("webhook object has no id".to_string()))?;

    let outcome = match kind {
        EventKind::PaymentSucceeded | EventKind::CheckoutAsyncSucceeded => Some(Outcome::Paid),
        EventKind::CheckoutCompleted => {
            match object.get("payment_status").and_then(Value::as_str) {
                Some("paid") | Some("no_payment_required") => Some(Outcome::Paid),
                _ => None,
            }
        }
        EventKind::PaymentFailed
        | EventKind::PaymentCanceled
        | EventKind::CheckoutAsyncFailed
        | EventKind::CheckoutExpired => Some(Outcome::Failed),
        EventKind::Unknown => None,
    };

    let failure_reason = match outcome {
        Some(Outcome::Failed) => Some(
            find_nested(object, "message")
                .or_else(|| extract_field(object, &["cancellation_reason", "status"]))
                .unwrap_or_else(|| kind.as_str().to_string()),
        ),
        _ => None,
    };

    Ok(Some(ConfirmationEvent {
        event_id: envelope.get("id").and_then(Value::as_str).map(String::from),
        kind,
        external_ref,
        outcome,
        amount_minor: extract_field(object, &["amount_received", "amount", "amount_total"])
            .and_then(|a| a.parse().ok()),
        currency: extract_field(object, &["currency"]).map(|c| c.to_ascii_uppercase()),
        failure_reason,
        donation_id: object
            .get("metadata")
            .and_then(|m| extract_field(m, &["donation_id"]))
            .and_then(|id| id.parse().ok()),
    }))
}

fn extract_field(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(v) = value.get(key) {
            let s = match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            };
            if s.is_some() {
                return s;
            }
        }
    }
    None
}

fn find_nested(value: &Value, key: &str) -> Option<String> {
    if let Value::Object(map) = value {
        for (k, v) in map {
            if k == key {
                if let Some(s) = v.as_str() {
                    return Some(s.to_string());
                }
            }
            if let Some(found) = find_nested(v, key) {
                return Some(found);
            }
        }
    }
    None
}

// ─────────────────────────────────────────────────────────
// Signature verification
// ─────────────────────────────────────────────────────────

/// Check a `t=<unix>,v1=<hex>` signature header against the raw body.
///
/// The signed message is `"{t}.{body}"`; stale timestamps (older or newer
/// than `tolerance_secs`) are rejected to limit replays.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", t)) => timestamp = t.parse().ok(),
            Some(("v1", sig)) => {
                if let Ok(bytes) = hex::decode(sig) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| LedgerError::Signature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(LedgerError::Signature("missing v1 signature".to_string()));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(LedgerError::Signature(format!(
            "timestamp {timestamp} outside tolerance"
        )));
    }

    let valid = signatures.iter().any(|sig| {
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(sig).is_ok()
    });
    if !valid {
        return Err(LedgerError::Signature("signature mismatch".to_string()));
    }
    Ok(())
}

/// Produce a header value accepted by [`verify_signature`].
#[cfg(test)]
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
