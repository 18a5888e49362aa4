//! Fixed-point monetary amounts.
//!
//! Amounts are integer minor units (cents for USD) tagged with an ISO-4217
//! currency code. Arithmetic is checked: mixing currencies or overflowing
//! `i64` is an error, never a silent wrap.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{validation, Result};

/// Smallest accepted donation, in minor units ($1.00-equivalent).
pub const MIN_DONATION_MINOR: i64 = 100;

/// Upper-case three letter currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(validation(format!("invalid currency code '{code}'")));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = crate::errors::LedgerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn is_positive(&self) -> bool {
        self.amount_minor > 0
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money> {
        if self.currency != other.currency {
            return Err(validation(format!(
                "cannot add {} to {}",
                other.currency, self.currency
            )));
        }
        let amount_minor = self
            .amount_minor
            .checked_add(other.amount_minor)
            .ok_or_else(|| validation("amount overflow"))?;
        Ok(Money::new(amount_minor, self.currency.clone()))
    }

    /// Sum a sequence of amounts, all of which must be in `currency`.
    pub fn sum<'a>(currency: Currency, items: impl IntoIterator<Item = &'a Money>) -> Result<Money> {
        items
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(m))
    }

    /// Percentage of `goal` this amount represents, clamped to `[0, 100]`.
    ///
    /// A non-positive goal yields `0.0`; goals are validated positive before
    /// they are stored so this only guards arithmetic.
    pub fn percent_of(&self, goal: &Money) -> f64 {
        if goal.amount_minor <= 0 || self.currency != goal.currency {
            return 0.0;
        }
        let pct = self.amount_minor as f64 / goal.amount_minor as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}
