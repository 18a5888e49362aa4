//! Payment confirmation reconciler.
//!
//! Opens provider payments for PENDING donations and applies the provider's
//! asynchronous confirmations to the ledger. Confirmations arrive
//! at-least-once and possibly concurrently; for any one donation they are
//! processed one at a time (keyed in-process lock) and every transition is a
//! conditional update, so a duplicate or late event can never settle a
//! donation twice.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, warn};

use crate::donation::{self, Completion, Donation, DonationStatus, DonorIdentity};
use crate::errors::{invalid_state, unauthorized, LedgerError, Result};
use crate::events::{ConfirmationEvent, Outcome};
use crate::identity::Actor;
use crate::payments::{IntentHandle, OneTimeIntent, PaymentProvider, RecurringCheckout};
use crate::receipts::{self, DocumentStore, Receipt};

/// What a confirmation did to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Completed {
        donation_id: i64,
        receipt_number: Option<String>,
    },
    AlreadyCompleted {
        donation_id: i64,
    },
    Failed {
        donation_id: i64,
    },
    AlreadyFailed {
        donation_id: i64,
    },
    /// Checkout finished but the money has not cleared yet.
    Awaiting {
        donation_id: i64,
    },
    /// No donation carries this reference; logged and dropped.
    Unmatched,
}

/// One async mutex per donation id currently being worked on.
#[derive(Default)]
struct DonationLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl DonationLocks {
    async fn acquire(&self, donation_id: i64) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Drop slots nobody holds or waits on.
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(donation_id).or_default().clone()
        };
        slot.lock_owned().await
    }
}

pub struct Reconciler {
    pool: SqlitePool,
    provider: Arc<dyn PaymentProvider>,
    documents: Arc<dyn DocumentStore>,
    locks: DonationLocks,
}

impl Reconciler {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn PaymentProvider>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            pool,
            provider,
            documents,
            locks: DonationLocks::default(),
        }
    }

    /// Ask the provider to collect a PENDING donation.
    ///
    /// A provider failure leaves the donation untouched so the caller can
    /// retry.
    pub async fn open_intent(&self, actor: &Actor, donation_id: i64, now: i64) -> Result<IntentHandle> {
        let _guard = self.locks.acquire(donation_id).await;

        let donation = donation::find(&self.pool, donation_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("donation {donation_id}")))?;
        let is_guest_gift = matches!(donation.donor, DonorIdentity::Guest { .. });
        if !(actor.is_admin() || donation.is_owned_by(actor) || is_guest_gift) {
            return Err(unauthorized("only the donor may pay for this donation"));
        }
        if donation.status != DonationStatus::Pending {
            return Err(invalid_state(format!(
                "donation {donation_id} is already {}",
                donation.status.as_str()
            )));
        }
        if let Some(existing) = &donation.external_ref {
            return Err(invalid_state(format!(
                "donation {donation_id} already has payment {existing}"
            )));
        }

        let metadata = intent_metadata(&donation);
        let handle = match (donation.recurring, donation.frequency) {
            (true, Some(frequency)) => {
                let request = RecurringCheckout {
                    amount: donation.amount.clone(),
                    interval: frequency.into(),
                    metadata,
                };
                self.provider.create_recurring_checkout(&request).await
            }
            _ => {
                let request = OneTimeIntent {
                    amount: donation.amount.clone(),
                    metadata,
                };
                self.provider.create_intent(&request).await
            }
        }
        .map_err(|e| {
            warn!(donation_id, "Could not open payment, donation stays pending: {e}");
            e
        })?;

        donation::attach_external_ref(&self.pool, donation_id, &handle.reference, now).await?;
        info!(donation_id, reference = %handle.reference, recurring = donation.recurring, "Payment opened");
        Ok(handle)
    }

    /// Apply one provider confirmation.
    pub async fn on_confirmation(&self, event: &ConfirmationEvent, now: i64) -> Result<ReconcileOutcome> {
        let Some(target) = self.match_donation(event).await? else {
            warn!(
                external_ref = %event.external_ref,
                event_id = ?event.event_id,
                "Confirmation does not match any donation; dropped"
            );
            return Ok(ReconcileOutcome::Unmatched);
        };
        let donation_id = target.id;
        let _guard = self.locks.acquire(donation_id).await;

        match event.outcome {
            None => {
                info!(donation_id, kind = event.kind.as_str(), "Payment not settled yet");
                Ok(ReconcileOutcome::Awaiting { donation_id })
            }
            Some(Outcome::Paid) => self.apply_paid(&target, event, now).await,
            Some(Outcome::Failed) => self.apply_failed(donation_id, event, now).await,
        }
    }

    async fn match_donation(&self, event: &ConfirmationEvent) -> Result<Option<Donation>> {
        if let Some(d) = donation::find_by_external_ref(&self.pool, &event.external_ref).await? {
            return Ok(Some(d));
        }
        // The webhook can beat our own write of the reference; fall back to
        // the donation id we put in the metadata.
        match event.donation_id {
            Some(id) => donation::find(&self.pool, id).await,
            None => Ok(None),
        }
    }

    async fn apply_paid(
        &self,
        target: &Donation,
        event: &ConfirmationEvent,
        now: i64,
    ) -> Result<ReconcileOutcome> {
        let donation_id = target.id;
        if let Err(e) = check_amount(target, event) {
            error!(target: "integrity", donation_id, external_ref = %event.external_ref, "{e}");
            return Err(e);
        }

        match donation::mark_completed(&self.pool, donation_id, &event.external_ref, now).await {
            Ok(Completion::Completed { receipt }) => {
                if let Some(receipt) = &receipt {
                    self.publish_receipt(receipt, donation_id).await;
                }
                Ok(ReconcileOutcome::Completed {
                    donation_id,
                    receipt_number: receipt.map(|r| r.receipt_number),
                })
            }
            Ok(Completion::AlreadyCompleted) => Ok(ReconcileOutcome::AlreadyCompleted { donation_id }),
            Err(LedgerError::Consistency(msg)) => {
                error!(target: "integrity", donation_id, external_ref = %event.external_ref, "{msg}");
                Err(LedgerError::Consistency(msg))
            }
            Err(LedgerError::InvalidState(msg)) => {
                warn!(donation_id, external_ref = %event.external_ref, "Stale payment confirmation: {msg}");
                Err(LedgerError::InvalidState(msg))
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_failed(
        &self,
        donation_id: i64,
        event: &ConfirmationEvent,
        now: i64,
    ) -> Result<ReconcileOutcome> {
        let reason = event
            .failure_reason
            .clone()
            .unwrap_or_else(|| event.kind.as_str().to_string());

        match donation::mark_failed(&self.pool, donation_id, &reason, now).await {
            Ok(()) => Ok(ReconcileOutcome::Failed { donation_id }),
            Err(LedgerError::InvalidState(msg)) => {
                info!(donation_id, "Duplicate failure confirmation ignored: {msg}");
                Ok(ReconcileOutcome::AlreadyFailed { donation_id })
            }
            Err(LedgerError::Consistency(msg)) => {
                error!(target: "integrity", donation_id, external_ref = %event.external_ref, "{msg}");
                Err(LedgerError::Consistency(msg))
            }
            Err(e) => Err(e),
        }
    }

    /// Hand the receipt to the document collaborator. Failures are logged;
    /// the receipt row already exists and the document can be produced later.
    async fn publish_receipt(&self, receipt: &Receipt, donation_id: i64) {
        let donation = match donation::find(&self.pool, donation_id).await {
            Ok(Some(d)) => d,
            Ok(None) => return,
            Err(e) => {
                warn!(donation_id, "Could not reload donation for receipt: {e}");
                return;
            }
        };
        match self.documents.submit(receipt, &donation).await {
            Ok(document_ref) => {
                if let Err(e) = receipts::attach_document(&self.pool, receipt.id, &document_ref).await {
                    warn!(receipt = %receipt.receipt_number, "Could not store document reference: {e}");
                }
            }
            Err(e) => warn!(receipt = %receipt.receipt_number, "Document store rejected receipt: {e}"),
        }
    }
}

fn intent_metadata(donation: &Donation) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    metadata.insert("donation_id".to_string(), donation.id.to_string());
    if let Some(campaign_id) = donation.campaign_id {
        metadata.insert("campaign_id".to_string(), campaign_id.to_string());
    }
    if let Some(frequency) = donation.frequency {
        metadata.insert("frequency".to_string(), frequency.as_str().to_string());
    }
    metadata
}

/// The provider must have charged what we asked for.
fn check_amount(donation: &Donation, event: &ConfirmationEvent) -> Result<()> {
    if let Some(amount) = event.amount_minor {
        if amount != donation.amount.amount_minor {
            return Err(LedgerError::Consistency(format!(
                "donation {} expects {} minor units, provider reported {amount}",
                donation.id, donation.amount.amount_minor
            )));
        }
    }
    if let Some(currency) = &event.currency {
        if !currency.eq_ignore_ascii_case(donation.amount.currency.as_str()) {
            return Err(LedgerError::Consistency(format!(
                "donation {} is in {}, provider reported {currency}",
                donation.id, donation.amount.currency
            )));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
