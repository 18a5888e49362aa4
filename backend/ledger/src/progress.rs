//! Campaign progress and platform statistics.
//!
//! Everything here is derived from COMPLETED donation rows at query time.
//! Nothing is cached, so the figures can never drift from the ledger.

use std::collections::{BTreeMap, HashSet};

use chrono::DateTime;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::campaign;
use crate::donation::{self, Donation, DonationStatus};
use crate::errors::{LedgerError, Result};
use crate::money::Money;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyBucket {
    /// `YYYY-MM`, UTC.
    pub month: String,
    pub amount: Money,
    pub donation_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignProgress {
    pub campaign_id: i64,
    pub goal: Money,
    pub current_amount: Money,
    pub donation_count: i64,
    pub donor_count: i64,
    pub progress_percent: f64,
    pub goal_reached: bool,
    pub monthly_buckets: Vec<MonthlyBucket>,
}

impl CampaignProgress {
    /// Fold the completed donations of one campaign. Rows that are not
    /// COMPLETED or belong elsewhere are ignored.
    pub fn from_completed(campaign_id: i64, goal: &Money, donations: &[Donation]) -> Result<Self> {
        let settled: Vec<&Donation> = donations
            .iter()
            .filter(|d| d.status == DonationStatus::Completed && d.campaign_id == Some(campaign_id))
            .collect();

        let current_amount = Money::sum(goal.currency.clone(), settled.iter().map(|d| &d.amount))?;
        let donors: HashSet<String> = settled.iter().map(|d| d.donor_key()).collect();

        let mut months: BTreeMap<String, (Money, i64)> = BTreeMap::new();
        for d in &settled {
            let month = completion_month(d)?;
            let slot = months
                .entry(month)
                .or_insert_with(|| (Money::zero(goal.currency.clone()), 0));
            slot.0 = slot.0.checked_add(&d.amount)?;
            slot.1 += 1;
        }

        Ok(Self {
            campaign_id,
            goal: goal.clone(),
            progress_percent: current_amount.percent_of(goal),
            goal_reached: goal.is_positive() && current_amount.amount_minor >= goal.amount_minor,
            current_amount,
            donation_count: settled.len() as i64,
            donor_count: donors.len() as i64,
            monthly_buckets: months
                .into_iter()
                .map(|(month, (amount, donation_count))| MonthlyBucket {
                    month,
                    amount,
                    donation_count,
                })
                .collect(),
        })
    }
}

fn completion_month(d: &Donation) -> Result<String> {
    let at = d.completed_at.unwrap_or(d.updated_at);
    DateTime::from_timestamp(at, 0)
        .map(|t| t.format("%Y-%m").to_string())
        .ok_or_else(|| LedgerError::Validation(format!("donation {} has an invalid completion time", d.id)))
}

/// Live progress of one campaign.
pub async fn campaign_progress(pool: &SqlitePool, campaign_id: i64) -> Result<CampaignProgress> {
    let campaign = campaign::find(pool, campaign_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("campaign {campaign_id}")))?;
    let donations = donation::completed(pool, Some(campaign_id)).await?;
    CampaignProgress::from_completed(campaign_id, &campaign.goal, &donations)
}

// ─────────────────────────────────────────────────────────
// Platform-wide statistics
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyTotal {
    pub amount: Money,
    pub donation_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformStats {
    /// One entry per currency, ordered by currency code.
    pub totals: Vec<CurrencyTotal>,
    /// Ordered by month, then currency.
    pub monthly_buckets: Vec<MonthlyBucket>,
    pub donation_count: i64,
    pub donor_count: i64,
    pub accepting_campaigns: i64,
}

impl PlatformStats {
    pub fn from_completed(donations: &[Donation], accepting_campaigns: i64) -> Result<Self> {
        let mut totals: BTreeMap<String, (Money, i64)> = BTreeMap::new();
        let mut months: BTreeMap<(String, String), (Money, i64)> = BTreeMap::new();
        let mut donors = HashSet::new();
        let mut donation_count = 0;

        for d in donations.iter().filter(|d| d.status == DonationStatus::Completed) {
            let code = d.amount.currency.as_str().to_string();
            add_to(&mut totals, code.clone(), &d.amount)?;
            add_to(&mut months, (completion_month(d)?, code), &d.amount)?;
            donors.insert(d.donor_key());
            donation_count += 1;
        }

        Ok(Self {
            totals: totals
                .into_values()
                .map(|(amount, donation_count)| CurrencyTotal {
                    amount,
                    donation_count,
                })
                .collect(),
            monthly_buckets: months
                .into_iter()
                .map(|((month, _), (amount, donation_count))| MonthlyBucket {
                    month,
                    amount,
                    donation_count,
                })
                .collect(),
            donation_count,
            donor_count: donors.len() as i64,
            accepting_campaigns,
        })
    }
}

fn add_to<K: Ord>(map: &mut BTreeMap<K, (Money, i64)>, key: K, amount: &Money) -> Result<()> {
    let slot = map
        .entry(key)
        .or_insert_with(|| (Money::zero(amount.currency.clone()), 0));
    slot.0 = slot.0.checked_add(amount)?;
    slot.1 += 1;
    Ok(())
}

pub async fn platform_stats(pool: &SqlitePool, now: i64) -> Result<PlatformStats> {
    let donations = donation::completed(pool, None).await?;
    let accepting = campaign::count_accepting(pool, now).await?;
    PlatformStats::from_completed(&donations, accepting)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
