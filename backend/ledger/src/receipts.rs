//! Receipt issuance: one receipt per completed donation.
//!
//! Rendering the document is someone else's job: we persist the receipt row
//! and hand it to a [`DocumentStore`], keeping whatever opaque reference it
//! returns.

use async_trait::async_trait;
use chrono::DateTime;
use serde::Serialize;
use sqlx::{SqliteConnection, SqliteExecutor, SqlitePool};

use crate::donation::{self, Donation, DonationStatus};
use crate::errors::{invalid_state, LedgerError, Result};
use crate::identity::Actor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Receipt {
    pub id: i64,
    pub donation_id: i64,
    pub receipt_number: String,
    pub issued_at: i64,
    pub document_ref: Option<String>,
}

/// Human-presentable number, e.g. `RCP-20240101-00000042`.
///
/// Unique because each donation gets at most one receipt.
pub fn receipt_number(donation_id: i64, issued_at: i64) -> String {
    let date = DateTime::from_timestamp(issued_at, 0)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "00000000".to_string());
    format!("RCP-{date}-{donation_id:08}")
}

/// Persist the receipt for a freshly completed donation.
///
/// Runs on the caller's connection so it can share the completion
/// transaction.
pub async fn issue(conn: &mut SqliteConnection, donation: &Donation, now: i64) -> Result<Receipt> {
    if donation.status != DonationStatus::Completed {
        return Err(invalid_state(format!(
            "donation {} is {}; receipts are only issued for completed donations",
            donation.id,
            donation.status.as_str()
        )));
    }
    if find_for_donation(&mut *conn, donation.id).await?.is_some() {
        return Err(LedgerError::Conflict(format!(
            "receipt already issued for donation {}",
            donation.id
        )));
    }

    let number = receipt_number(donation.id, now);
    let inserted = sqlx::query(
        "INSERT INTO receipts (donation_id, receipt_number, issued_at) VALUES (?1, ?2, ?3)",
    )
    .bind(donation.id)
    .bind(&number)
    .bind(now)
    .execute(&mut *conn)
    .await;

    let id = match inserted {
        Ok(done) => done.last_insert_rowid(),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(LedgerError::Conflict(format!(
                "receipt already issued for donation {}",
                donation.id
            )))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Receipt {
        id,
        donation_id: donation.id,
        receipt_number: number,
        issued_at: now,
        document_ref: None,
    })
}

pub async fn find_for_donation(
    executor: impl SqliteExecutor<'_>,
    donation_id: i64,
) -> Result<Option<Receipt>> {
    let receipt = sqlx::query_as::<_, Receipt>(
        "SELECT id, donation_id, receipt_number, issued_at, document_ref FROM receipts WHERE donation_id = ?1",
    )
    .bind(donation_id)
    .fetch_optional(executor)
    .await?;
    Ok(receipt)
}

/// Record the collaborator's reference for the rendered document.
pub async fn attach_document(pool: &SqlitePool, receipt_id: i64, document_ref: &str) -> Result<()> {
    sqlx::query("UPDATE receipts SET document_ref = ?2 WHERE id = ?1 AND document_ref IS NULL")
        .bind(receipt_id)
        .bind(document_ref)
        .execute(pool)
        .await?;
    Ok(())
}

/// Receipt of a donation, for its donor or an admin.
pub async fn get_for_donation(pool: &SqlitePool, actor: &Actor, donation_id: i64) -> Result<Receipt> {
    donation::get(pool, actor, donation_id).await?;
    find_for_donation(pool, donation_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("receipt for donation {donation_id}")))
}

/// Downstream document collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Accept the receipt data and return an opaque document reference.
    async fn submit(&self, receipt: &Receipt, donation: &Donation) -> Result<String>;
}

/// Addresses receipt documents by number under a fixed prefix; the renderer
/// picks them up from there.
#[derive(Debug, Clone)]
pub struct KeyedDocumentStore {
    prefix: String,
}

impl KeyedDocumentStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DocumentStore for KeyedDocumentStore {
    async fn submit(&self, receipt: &Receipt, _donation: &Donation) -> Result<String> {
        Ok(format!("{}/{}.pdf", self.prefix, receipt.receipt_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::tests::NOW;
    use crate::db::test_pool;
    use crate::donation::tests::member_gift;

    #[test]
    fn receipt_number_format() {
        assert_eq!(receipt_number(42, 1_704_067_200), "RCP-20240101-00000042");
    }

    #[tokio::test]
    async fn issue_requires_completed_donation() {
        let pool = test_pool().await;
        let d = donation::initiate(&pool, &Actor::member("m"), member_gift(500, None), NOW)
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let res = issue(&mut conn, &d, NOW).await;
        assert!(matches!(res, Err(LedgerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn second_issue_is_a_conflict() {
        let pool = test_pool().await;
        let d = donation::initiate(&pool, &Actor::member("m"), member_gift(500, None), NOW)
            .await
            .unwrap();
        donation::mark_completed(&pool, d.id, "pi_1", NOW).await.unwrap();
        let completed = donation::find(&pool, d.id).await.unwrap().unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let res = issue(&mut conn, &completed, NOW).await;
        assert!(matches!(res, Err(LedgerError::Conflict(_))));
    }

    #[tokio::test]
    async fn document_reference_is_attached_once() {
        let pool = test_pool().await;
        let d = donation::initiate(&pool, &Actor::member("m"), member_gift(500, None), NOW)
            .await
            .unwrap();
        donation::mark_completed(&pool, d.id, "pi_1", NOW).await.unwrap();
        let receipt = find_for_donation(&pool, d.id).await.unwrap().unwrap();
        let completed = donation::find(&pool, d.id).await.unwrap().unwrap();

        let store = KeyedDocumentStore::new("receipts/");
        let key = store.submit(&receipt, &completed).await.unwrap();
        assert_eq!(key, format!("receipts/{}.pdf", receipt.receipt_number));

        attach_document(&pool, receipt.id, &key).await.unwrap();
        attach_document(&pool, receipt.id, "other").await.unwrap();

        let stored = get_for_donation(&pool, &Actor::member("m"), d.id).await.unwrap();
        assert_eq!(stored.document_ref.as_deref(), Some(key.as_str()));
        assert!(get_for_donation(&pool, &Actor::member("x"), d.id).await.is_err());
    }
}
