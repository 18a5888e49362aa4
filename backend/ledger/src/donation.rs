//! Donation ledger: creation, terminal transitions and redacted projections.
//!
//! A donation starts PENDING and moves exactly once to COMPLETED or FAILED.
//! Both moves are compare-and-swap updates on `status = 'pending'`; the
//! completion shares a transaction with receipt issuance so a receipt exists
//! if and only if the donation completed.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use tracing::{info, warn};

use crate::campaign;
use crate::errors::{invalid_state, unauthorized, validation, LedgerError, Result};
use crate::identity::Actor;
use crate::money::{Currency, Money, MIN_DONATION_MINOR};
use crate::receipts::{self, Receipt};

pub const MAX_MESSAGE_LEN: usize = 500;
pub const ANONYMOUS_DONOR: &str = "Anonymous Donor";
pub const EXPIRED_REASON: &str = "expired";
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    Completed,
    Failed,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Billing cadence of a recurring donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(Self::Monthly),
            "quarterly" => Some(Self::Quarterly),
            "yearly" => Some(Self::Yearly),
            _ => None,
        }
    }
}

/// Who gave the money. Exactly one mode is ever populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DonorIdentity {
    Member {
        user_id: String,
        display_name: Option<String>,
    },
    Guest {
        first_name: String,
        last_name: String,
        email: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Donation {
    pub id: i64,
    pub amount: Money,
    pub recurring: bool,
    pub frequency: Option<Frequency>,
    pub campaign_id: Option<i64>,
    pub donor: DonorIdentity,
    pub is_anonymous: bool,
    pub status: DonationStatus,
    pub failure_reason: Option<String>,
    pub external_ref: Option<String>,
    pub message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Donation {
    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        match &self.donor {
            DonorIdentity::Member { user_id, .. } => actor.is(user_id),
            DonorIdentity::Guest { .. } => false,
        }
    }

    /// Key used to count distinct donors.
    pub fn donor_key(&self) -> String {
        match &self.donor {
            DonorIdentity::Member { user_id, .. } => format!("user:{user_id}"),
            DonorIdentity::Guest { email, .. } => format!("guest:{}", email.to_lowercase()),
        }
    }

    /// Projection shown to `viewer`.
    ///
    /// Anonymous donations reveal no identity to anyone but the donating
    /// member, organizers and admins included.
    pub fn project(&self, viewer: &Actor) -> DonationView {
        let owner = self.is_owned_by(viewer);
        let mut view = DonationView {
            id: self.id,
            amount: self.amount.clone(),
            recurring: self.recurring,
            frequency: self.frequency,
            campaign_id: self.campaign_id,
            status: self.status,
            is_anonymous: self.is_anonymous,
            donor_name: ANONYMOUS_DONOR.to_string(),
            user_id: None,
            first_name: None,
            last_name: None,
            email: None,
            message: self.message.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        };
        if self.is_anonymous && !owner {
            return view;
        }

        match &self.donor {
            DonorIdentity::Member {
                user_id,
                display_name,
            } => {
                view.donor_name = display_name.clone().unwrap_or_else(|| user_id.clone());
                view.user_id = Some(user_id.clone());
            }
            DonorIdentity::Guest {
                first_name,
                last_name,
                email,
            } => {
                view.donor_name = format!("{first_name} {last_name}");
                view.first_name = Some(first_name.clone());
                view.last_name = Some(last_name.clone());
                if viewer.is_admin() {
                    view.email = Some(email.clone());
                }
            }
        }
        view
    }

    pub fn status_view(&self) -> DonationStatusView {
        let message = match self.status {
            DonationStatus::Pending => "Awaiting payment confirmation.",
            DonationStatus::Completed => "Thank you! Your donation has been received.",
            DonationStatus::Failed => "Payment could not be confirmed, no charge was made.",
        };
        DonationStatusView {
            id: self.id,
            status: self.status,
            amount: self.amount.clone(),
            campaign_id: self.campaign_id,
            recurring: self.recurring,
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DonationView {
    pub id: i64,
    pub amount: Money,
    pub recurring: bool,
    pub frequency: Option<Frequency>,
    pub campaign_id: Option<i64>,
    pub status: DonationStatus,
    pub is_anonymous: bool,
    pub donor_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub message: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// Post-checkout answer shown to the donor.
#[derive(Debug, Clone, Serialize)]
pub struct DonationStatusView {
    pub id: i64,
    pub status: DonationStatus,
    pub amount: Money,
    pub campaign_id: Option<i64>,
    pub recurring: bool,
    pub message: &'static str,
}

/// Donation request as submitted by a donor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDonation {
    pub amount_minor: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub campaign_id: Option<i64>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Public name for member donations.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Typed filter for donation listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DonationQuery {
    pub campaign_id: Option<i64>,
    pub status: Option<DonationStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Result of a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// First transition; carries the receipt issued alongside it.
    Completed { receipt: Option<Receipt> },
    /// The same confirmation was already applied.
    AlreadyCompleted,
}

// ─────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────

const DONATION_COLUMNS: &str = "id, amount_minor, currency, recurring, frequency, campaign_id, user_id, \
     display_name, guest_first_name, guest_last_name, guest_email, is_anonymous, status, \
     failure_reason, external_ref, message, created_at, updated_at, completed_at";

#[derive(Debug, sqlx::FromRow)]
struct DonationRow {
    id: i64,
    amount_minor: i64,
    currency: String,
    recurring: bool,
    frequency: Option<String>,
    campaign_id: Option<i64>,
    user_id: Option<String>,
    display_name: Option<String>,
    guest_first_name: Option<String>,
    guest_last_name: Option<String>,
    guest_email: Option<String>,
    is_anonymous: bool,
    status: String,
    failure_reason: Option<String>,
    external_ref: Option<String>,
    message: Option<String>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

fn decode_error(msg: String) -> LedgerError {
    LedgerError::Database(sqlx::Error::Decode(msg.into()))
}

impl TryFrom<DonationRow> for Donation {
    type Error = LedgerError;

    fn try_from(row: DonationRow) -> Result<Self> {
        let status = DonationStatus::parse(&row.status)
            .ok_or_else(|| decode_error(format!("unknown donation status '{}'", row.status)))?;
        let frequency = row
            .frequency
            .as_deref()
            .map(|f| Frequency::parse(f).ok_or_else(|| decode_error(format!("unknown frequency '{f}'"))))
            .transpose()?;
        let donor = match (row.user_id, row.guest_first_name, row.guest_last_name, row.guest_email) {
            (Some(user_id), None, None, None) => DonorIdentity::Member {
                user_id,
                display_name: row.display_name,
            },
            (None, Some(first_name), Some(last_name), Some(email)) => DonorIdentity::Guest {
                first_name,
                last_name,
                email,
            },
            _ => {
                return Err(decode_error(format!(
                    "donation {} has an inconsistent donor identity",
                    row.id
                )))
            }
        };
        Ok(Donation {
            id: row.id,
            amount: Money::new(row.amount_minor, Currency::parse(&row.currency)?),
            recurring: row.recurring,
            frequency,
            campaign_id: row.campaign_id,
            donor,
            is_anonymous: row.is_anonymous,
            status,
            failure_reason: row.failure_reason,
            external_ref: row.external_ref,
            message: row.message,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

pub async fn find(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<Donation>> {
    let row = sqlx::query_as::<_, DonationRow>(&format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;
    row.map(Donation::try_from).transpose()
}

pub async fn find_by_external_ref(
    executor: impl SqliteExecutor<'_>,
    external_ref: &str,
) -> Result<Option<Donation>> {
    let row = sqlx::query_as::<_, DonationRow>(&format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE external_ref = ?1"
    ))
    .bind(external_ref)
    .fetch_optional(executor)
    .await?;
    row.map(Donation::try_from).transpose()
}

async fn require(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Donation> {
    find(executor, id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("donation {id}")))
}

// ─────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────

fn required(field: &str, value: Option<&str>) -> Result<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| validation(format!("{field} is required for guest donations")))
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn resolve_donor(actor: &Actor, fields: &NewDonation) -> Result<DonorIdentity> {
    if let Some(user_id) = actor.member_id() {
        // Anonymous member gifts never store a public name.
        let display_name = if fields.is_anonymous {
            None
        } else {
            fields
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
        };
        return Ok(DonorIdentity::Member {
            user_id: user_id.to_string(),
            display_name,
        });
    }

    let first_name = required("first name", fields.first_name.as_deref())?;
    let last_name = required("last name", fields.last_name.as_deref())?;
    let email = required("email", fields.email.as_deref())?;
    if !is_plausible_email(&email) {
        return Err(validation(format!("'{email}' is not a valid email address")));
    }
    Ok(DonorIdentity::Guest {
        first_name,
        last_name,
        email,
    })
}

// ─────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────

/// Record a donation request as PENDING.
pub async fn initiate(
    pool: &SqlitePool,
    actor: &Actor,
    fields: NewDonation,
    now: i64,
) -> Result<Donation> {
    if fields.amount_minor < MIN_DONATION_MINOR {
        return Err(validation(format!(
            "donation amount must be at least {MIN_DONATION_MINOR} minor units"
        )));
    }
    let mut currency = match fields.currency.as_deref() {
        Some(code) => Some(Currency::parse(code)?),
        None => None,
    };
    match (fields.recurring, fields.frequency) {
        (true, None) => return Err(validation("recurring donations need a frequency")),
        (false, Some(_)) => {
            return Err(validation("frequency is only valid for recurring donations"))
        }
        _ => {}
    }
    let message = fields
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from);
    if let Some(m) = &message {
        if m.chars().count() > MAX_MESSAGE_LEN {
            return Err(validation(format!(
                "message exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }
    }
    let donor = resolve_donor(actor, &fields)?;

    if let Some(campaign_id) = fields.campaign_id {
        let campaign = campaign::find(pool, campaign_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("campaign {campaign_id}")))?;
        if !campaign.is_accepting_donations(now) {
            return Err(validation(format!(
                "campaign {campaign_id} is not accepting donations"
            )));
        }
        match &currency {
            Some(c) if *c != campaign.goal.currency => {
                return Err(validation(format!(
                    "campaign {campaign_id} collects {}, not {c}",
                    campaign.goal.currency
                )))
            }
            Some(_) => {}
            None => currency = Some(campaign.goal.currency.clone()),
        }
    }
    let amount = Money::new(fields.amount_minor, currency.unwrap_or_else(Currency::usd));

    let id = insert_pending(pool, &amount, &fields, &donor, message.as_deref(), now)
        .await?
        .ok_or_else(|| {
            validation(format!(
                "campaign {} is not accepting donations",
                fields.campaign_id.unwrap_or_default()
            ))
        })?;

    info!(
        donation_id = id,
        amount = %amount,
        campaign_id = ?fields.campaign_id,
        recurring = fields.recurring,
        "Donation initiated"
    );
    require(pool, id).await
}

/// Insert a PENDING row, re-checking the target campaign in the same
/// statement. `None` means the campaign closed, changed currency or
/// disappeared since it was read.
async fn insert_pending(
    pool: &SqlitePool,
    amount: &Money,
    fields: &NewDonation,
    donor: &DonorIdentity,
    message: Option<&str>,
    now: i64,
) -> Result<Option<i64>> {
    let (user_id, display_name, first_name, last_name, email) = match donor {
        DonorIdentity::Member {
            user_id,
            display_name,
        } => (Some(user_id), display_name.as_ref(), None, None, None),
        DonorIdentity::Guest {
            first_name,
            last_name,
            email,
        } => (None, None, Some(first_name), Some(last_name), Some(email)),
    };

    let inserted = sqlx::query(
        r#"
        INSERT INTO donations
            (amount_minor, currency, recurring, frequency, campaign_id, user_id, display_name,
             guest_first_name, guest_last_name, guest_email, is_anonymous, status, message,
             created_at, updated_at)
        SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'pending', ?12, ?13, ?13
        WHERE  ?5 IS NULL
           OR  EXISTS (SELECT 1 FROM campaigns
                       WHERE id = ?5 AND currency = ?2
                         AND status IN ('approved', 'active')
                         AND (end_date IS NULL OR end_date > ?13))
        "#,
    )
    .bind(amount.amount_minor)
    .bind(amount.currency.as_str())
    .bind(fields.recurring)
    .bind(fields.frequency.map(|f| f.as_str()))
    .bind(fields.campaign_id)
    .bind(user_id)
    .bind(display_name)
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(fields.is_anonymous)
    .bind(message)
    .bind(now)
    .execute(pool)
    .await?;

    if inserted.rows_affected() == 0 {
        return Ok(None);
    }
    Ok(Some(inserted.last_insert_rowid()))
}

/// Remember the provider reference of the intent opened for `id`.
pub async fn attach_external_ref(
    pool: &SqlitePool,
    id: i64,
    external_ref: &str,
    now: i64,
) -> Result<()> {
    let affected = sqlx::query(
        r#"
        UPDATE donations SET external_ref = ?2, updated_at = ?3
        WHERE  id = ?1 AND status = 'pending' AND external_ref IS NULL
        "#,
    )
    .bind(id)
    .bind(external_ref)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        let current = require(pool, id).await?;
        return Err(invalid_state(format!(
            "donation {id} is {} with reference {:?}",
            current.status.as_str(),
            current.external_ref
        )));
    }
    Ok(())
}

/// PENDING → COMPLETED, issuing the receipt in the same transaction.
///
/// Re-applying the same `external_ref` is a no-op; a different reference for
/// an already settled donation is a [`LedgerError::Consistency`].
pub async fn mark_completed(
    pool: &SqlitePool,
    id: i64,
    external_ref: &str,
    now: i64,
) -> Result<Completion> {
    let mut tx = pool.begin().await?;

    let affected = sqlx::query(
        r#"
        UPDATE donations
        SET    status = 'completed', completed_at = ?3, updated_at = ?3,
               external_ref = COALESCE(external_ref, ?2)
        WHERE  id = ?1 AND status = 'pending'
          AND  (external_ref IS NULL OR external_ref = ?2)
        "#,
    )
    .bind(id)
    .bind(external_ref)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if affected == 0 {
        let current = require(&mut *tx, id).await?;
        tx.rollback().await?;
        return match current.status {
            DonationStatus::Completed if current.external_ref.as_deref() == Some(external_ref) => {
                info!(donation_id = id, external_ref, "Duplicate completion ignored");
                Ok(Completion::AlreadyCompleted)
            }
            DonationStatus::Completed | DonationStatus::Pending => {
                Err(LedgerError::Consistency(format!(
                    "donation {id} is bound to {:?} but was confirmed by {external_ref}",
                    current.external_ref
                )))
            }
            DonationStatus::Failed => Err(invalid_state(format!(
                "donation {id} already failed and cannot complete"
            ))),
        };
    }

    let donation = require(&mut *tx, id).await?;
    let receipt = match receipts::issue(&mut *tx, &donation, now).await {
        Ok(receipt) => Some(receipt),
        Err(LedgerError::Conflict(msg)) => {
            warn!(donation_id = id, "Receipt already issued: {msg}");
            None
        }
        Err(e) => return Err(e),
    };
    tx.commit().await?;

    info!(donation_id = id, external_ref, amount = %donation.amount, "Donation completed");
    Ok(Completion::Completed { receipt })
}

/// PENDING → FAILED. From FAILED this is an [`LedgerError::InvalidState`],
/// from COMPLETED a [`LedgerError::Consistency`].
pub async fn mark_failed(pool: &SqlitePool, id: i64, reason: &str, now: i64) -> Result<()> {
    let affected = sqlx::query(
        r#"
        UPDATE donations SET status = 'failed', failure_reason = ?2, updated_at = ?3
        WHERE  id = ?1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(reason)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        let current = require(pool, id).await?;
        return match current.status {
            // Money was collected; a failure signal now contradicts the ledger.
            DonationStatus::Completed => Err(LedgerError::Consistency(format!(
                "donation {id} completed via {:?} but a failure was reported: {reason}",
                current.external_ref
            ))),
            _ => Err(invalid_state(format!(
                "donation {id} is already {}",
                current.status.as_str()
            ))),
        };
    }
    info!(donation_id = id, reason, "Donation failed");
    Ok(())
}

/// Fail every PENDING donation created before `cutoff`. Returns the count.
pub async fn expire_stale(pool: &SqlitePool, cutoff: i64, now: i64) -> Result<u64> {
    let affected = sqlx::query(
        r#"
        UPDATE donations SET status = 'failed', failure_reason = ?3, updated_at = ?2
        WHERE  status = 'pending' AND created_at < ?1
        "#,
    )
    .bind(cutoff)
    .bind(now)
    .bind(EXPIRED_REASON)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected)
}

/// Fetch a donation for its owner or an admin.
pub async fn get(pool: &SqlitePool, actor: &Actor, id: i64) -> Result<Donation> {
    let donation = require(pool, id).await?;
    if !(actor.is_admin() || donation.is_owned_by(actor)) {
        return Err(unauthorized("only the donor or an admin may view this donation"));
    }
    Ok(donation)
}

/// Post-checkout status of donation `id`. Member donations are limited to
/// their owner and admins; the status view of a guest donation carries no
/// identity and is open.
pub async fn resolve_status(pool: &SqlitePool, actor: &Actor, id: i64) -> Result<DonationStatusView> {
    let donation = require(pool, id).await?;
    let is_guest_gift = matches!(donation.donor, DonorIdentity::Guest { .. });
    if !(is_guest_gift || actor.is_admin() || donation.is_owned_by(actor)) {
        return Err(unauthorized("only the donor or an admin may view this donation"));
    }
    Ok(donation.status_view())
}

/// Post-checkout lookup by provider reference. The reference itself is the
/// capability, so guests can check on their own checkout.
pub async fn resolve_by_external_ref(
    pool: &SqlitePool,
    external_ref: &str,
) -> Result<DonationStatusView> {
    find_by_external_ref(pool, external_ref)
        .await?
        .map(|d| d.status_view())
        .ok_or_else(|| LedgerError::NotFound(format!("donation for reference {external_ref}")))
}

/// Caller-scoped listing: admins see everything, members their own gifts.
pub async fn list(pool: &SqlitePool, actor: &Actor, query: &DonationQuery) -> Result<Vec<Donation>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {DONATION_COLUMNS} FROM donations WHERE 1 = 1"));

    if !actor.is_admin() {
        let me = actor
            .member_id()
            .ok_or_else(|| unauthorized("sign in to list your donations"))?;
        qb.push(" AND user_id = ").push_bind(me.to_string());
    }
    if let Some(campaign_id) = query.campaign_id {
        qb.push(" AND campaign_id = ").push_bind(campaign_id);
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    push_page(&mut qb, query.limit, query.offset);

    let rows = qb.build_query_as::<DonationRow>().fetch_all(pool).await?;
    rows.into_iter().map(Donation::try_from).collect()
}

/// Public listing of a campaign's completed donations.
pub async fn list_for_campaign(
    pool: &SqlitePool,
    campaign_id: i64,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<Donation>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE status = 'completed' AND campaign_id = "
    ));
    qb.push_bind(campaign_id);
    push_page(&mut qb, limit, offset);

    let rows = qb.build_query_as::<DonationRow>().fetch_all(pool).await?;
    rows.into_iter().map(Donation::try_from).collect()
}

fn push_page(qb: &mut QueryBuilder<'_, Sqlite>, limit: Option<i64>, offset: Option<i64>) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
}

/// Completed donations, optionally restricted to one campaign.
pub async fn completed(pool: &SqlitePool, campaign_id: Option<i64>) -> Result<Vec<Donation>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE status = 'completed'"
    ));
    if let Some(id) = campaign_id {
        qb.push(" AND campaign_id = ").push_bind(id);
    }
    qb.push(" ORDER BY completed_at ASC, id ASC");

    let rows = qb.build_query_as::<DonationRow>().fetch_all(pool).await?;
    rows.into_iter().map(Donation::try_from).collect()
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
