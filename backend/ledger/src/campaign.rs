//! Campaign lifecycle: proposal, admin review, organizer edits, closing.
//!
//! ```text
//! Draft ──► Pending ──► Approved ──► Active ◄──► Ended
//!              │            └───────────────────►┘
//!              └──► Rejected
//! ```
//!
//! Every status change is a conditional `UPDATE ... WHERE status = ?` so two
//! reviewers racing on the same proposal cannot both win.

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use tracing::info;

use crate::errors::{invalid_state, unauthorized, validation, LedgerError, Result};
use crate::identity::Actor;
use crate::money::{Currency, Money};

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const DEFAULT_REJECTION_REASON: &str = "No reason provided";
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Saved by the organizer, not yet submitted.
    Draft,
    /// Awaiting an admin decision.
    Pending,
    /// Approved; accepting donations until its end date.
    Approved,
    /// Turned down by an admin. Terminal.
    Rejected,
    /// Explicitly launched after approval.
    Active,
    /// Closed to new donations.
    Ended,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }

    /// Statuses anyone may browse.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Approved | Self::Active | Self::Ended)
    }

    /// Content edits by the organizer are only allowed before review.
    pub fn is_pre_approval(&self) -> bool {
        matches!(self, Self::Draft | Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Campaign {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub goal: Money,
    pub organizer_id: String,
    pub cover_image: Option<String>,
    pub end_date: Option<i64>,
    pub status: CampaignStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    pub rejection_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Campaign {
    /// Only approved or launched campaigns whose end date (if any) lies in
    /// the future take money.
    pub fn is_accepting_donations(&self, now: i64) -> bool {
        matches!(
            self.status,
            CampaignStatus::Approved | CampaignStatus::Active
        ) && self.end_date.map_or(true, |end| end > now)
    }

    pub fn is_organizer(&self, actor: &Actor) -> bool {
        actor.is(&self.organizer_id)
    }

    fn can_manage(&self, actor: &Actor) -> bool {
        actor.is_admin() || self.is_organizer(actor)
    }

    fn is_visible_to(&self, actor: &Actor) -> bool {
        self.status.is_public() || self.can_manage(actor)
    }

    /// Externally visible shape; review notes are only shown to the people
    /// who can act on them.
    pub fn view(&self, viewer: &Actor, now: i64) -> CampaignView {
        let privileged = self.can_manage(viewer);
        CampaignView {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            goal: self.goal.clone(),
            organizer_id: self.organizer_id.clone(),
            cover_image: self.cover_image.clone(),
            end_date: self.end_date,
            status: self.status,
            is_active: self.is_accepting_donations(now),
            approved_by: self.approved_by.clone().filter(|_| privileged),
            approved_at: self.approved_at,
            rejection_reason: self.rejection_reason.clone().filter(|_| privileged),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignView {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub goal: Money,
    pub organizer_id: String,
    pub cover_image: Option<String>,
    pub end_date: Option<i64>,
    pub status: CampaignStatus,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    pub approved_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields supplied by an organizer when proposing a campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub title: String,
    pub description: String,
    pub goal_amount_minor: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub end_date: Option<i64>,
    /// `false` saves a draft instead of submitting for review.
    #[serde(default = "default_submit")]
    pub submit: bool,
}

fn default_submit() -> bool {
    true
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub goal_amount_minor: Option<i64>,
    pub currency: Option<String>,
    /// `Some(None)` (an explicit `null`) removes the end date.
    #[serde(default, deserialize_with = "present")]
    pub end_date: Option<Option<i64>>,
    pub cover_image: Option<String>,
    pub is_active: Option<bool>,
}

/// Distinguishes a field sent as `null` from one left out.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Typed filter for campaign listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignQuery {
    pub status: Option<CampaignStatus>,
    /// `true`: only campaigns accepting donations; `false`: only the rest.
    pub active: Option<bool>,
    pub organizer_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ─────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────

const CAMPAIGN_COLUMNS: &str = "id, title, description, goal_amount_minor, currency, organizer_id, \
     cover_image, end_date, status, approved_by, approved_at, rejection_reason, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: i64,
    title: String,
    description: String,
    goal_amount_minor: i64,
    currency: String,
    organizer_id: String,
    cover_image: Option<String>,
    end_date: Option<i64>,
    status: String,
    approved_by: Option<String>,
    approved_at: Option<i64>,
    rejection_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = LedgerError;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let status = CampaignStatus::parse(&row.status).ok_or_else(|| {
            LedgerError::Database(sqlx::Error::Decode(
                format!("unknown campaign status '{}'", row.status).into(),
            ))
        })?;
        Ok(Campaign {
            id: row.id,
            title: row.title,
            description: row.description,
            goal: Money::new(row.goal_amount_minor, Currency::parse(&row.currency)?),
            organizer_id: row.organizer_id,
            cover_image: row.cover_image,
            end_date: row.end_date,
            status,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejection_reason: row.rejection_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Load a campaign without any visibility check.
pub async fn find(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Option<Campaign>> {
    let row = sqlx::query_as::<_, CampaignRow>(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;
    row.map(Campaign::try_from).transpose()
}

async fn require(executor: impl SqliteExecutor<'_>, id: i64) -> Result<Campaign> {
    find(executor, id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("campaign {id}")))
}

// ─────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────

fn validate_text(field: &str, value: &str, max: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max {
        return Err(validation(format!("{field} exceeds {max} characters")));
    }
    Ok(trimmed.to_string())
}

fn validate_goal(amount_minor: i64) -> Result<()> {
    if amount_minor <= 0 {
        return Err(validation("goal amount must be greater than zero"));
    }
    Ok(())
}

fn validate_end_date(end_date: Option<i64>, now: i64) -> Result<()> {
    match end_date {
        Some(end) if end <= now => Err(validation("end date must be in the future")),
        _ => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────
// Lifecycle operations
// ─────────────────────────────────────────────────────────

/// Create a campaign owned by `actor`, PENDING unless saved as a draft.
pub async fn propose(
    pool: &SqlitePool,
    actor: &Actor,
    fields: NewCampaign,
    now: i64,
) -> Result<Campaign> {
    let organizer_id = actor
        .member_id()
        .ok_or_else(|| unauthorized("only signed-in members may propose campaigns"))?
        .to_string();

    let title = validate_text("title", &fields.title, MAX_TITLE_LEN)?;
    let description = validate_text("description", &fields.description, MAX_DESCRIPTION_LEN)?;
    validate_goal(fields.goal_amount_minor)?;
    validate_end_date(fields.end_date, now)?;
    let currency = match fields.currency.as_deref() {
        Some(code) => Currency::parse(code)?,
        None => Currency::usd(),
    };
    let status = if fields.submit {
        CampaignStatus::Pending
    } else {
        CampaignStatus::Draft
    };

    let id = sqlx::query(
        r#"
        INSERT INTO campaigns
            (title, description, goal_amount_minor, currency, organizer_id,
             cover_image, end_date, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
        "#,
    )
    .bind(&title)
    .bind(&description)
    .bind(fields.goal_amount_minor)
    .bind(currency.as_str())
    .bind(&organizer_id)
    .bind(&fields.cover_image)
    .bind(fields.end_date)
    .bind(status.as_str())
    .bind(now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    info!(campaign_id = id, organizer = %organizer_id, status = status.as_str(), "Campaign proposed");
    require(pool, id).await
}

/// Move a draft into the review queue.
pub async fn submit(pool: &SqlitePool, actor: &Actor, id: i64, now: i64) -> Result<Campaign> {
    let campaign = require(pool, id).await?;
    if !campaign.can_manage(actor) {
        return Err(unauthorized("only the organizer or an admin may submit a campaign"));
    }

    let affected = sqlx::query(
        "UPDATE campaigns SET status = 'pending', updated_at = ?2 WHERE id = ?1 AND status = 'draft'",
    )
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(invalid_state(format!(
            "campaign {id} can only be submitted from draft"
        )));
    }
    info!(campaign_id = id, "Campaign submitted for review");
    require(pool, id).await
}

/// Admin decision on a PENDING campaign.
pub async fn review(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    decision: ReviewDecision,
    rejection_reason: Option<String>,
    now: i64,
) -> Result<Campaign> {
    if !actor.is_admin() {
        return Err(unauthorized("only admins may review campaigns"));
    }
    let reviewer = actor.id.clone().unwrap_or_default();

    let (status, reason) = match decision {
        ReviewDecision::Approve => (CampaignStatus::Approved, None),
        ReviewDecision::Reject => {
            let reason = rejection_reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string());
            (CampaignStatus::Rejected, Some(reason))
        }
    };

    let affected = sqlx::query(
        r#"
        UPDATE campaigns
        SET    status = ?2, approved_by = ?3, approved_at = ?4,
               rejection_reason = ?5, updated_at = ?4
        WHERE  id = ?1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(&reviewer)
    .bind(now)
    .bind(&reason)
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        let current = require(pool, id).await?;
        return Err(invalid_state(format!(
            "campaign {id} is {} and cannot be reviewed",
            current.status.as_str()
        )));
    }

    info!(campaign_id = id, reviewer = %reviewer, decision = ?decision, "Campaign reviewed");
    require(pool, id).await
}

/// Apply an organizer or admin edit.
pub async fn update(
    pool: &SqlitePool,
    actor: &Actor,
    id: i64,
    changes: CampaignUpdate,
    now: i64,
) -> Result<Campaign> {
    let current = require(pool, id).await?;
    if !current.can_manage(actor) {
        return Err(unauthorized("only the organizer or an admin may edit this campaign"));
    }
    if !actor.is_admin() && !current.status.is_pre_approval() {
        return Err(unauthorized(
            "organizers may only edit a campaign before it is reviewed",
        ));
    }

    let mut next = current.clone();
    if let Some(title) = &changes.title {
        next.title = validate_text("title", title, MAX_TITLE_LEN)?;
    }
    if let Some(description) = &changes.description {
        next.description = validate_text("description", description, MAX_DESCRIPTION_LEN)?;
    }
    if let Some(goal) = changes.goal_amount_minor {
        validate_goal(goal)?;
        next.goal.amount_minor = goal;
    }
    if let Some(code) = &changes.currency {
        next.goal.currency = Currency::parse(code)?;
    }
    if let Some(end_date) = changes.end_date {
        validate_end_date(end_date, now)?;
        next.end_date = end_date;
    }
    if changes.cover_image.is_some() {
        next.cover_image = changes.cover_image.clone();
    }
    if let Some(active) = changes.is_active {
        next.status = toggled_status(current.status, active)?;
    }

    let goal_changed = next.goal.amount_minor != current.goal.amount_minor;
    let currency_changed = next.goal.currency != current.goal.currency;

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE campaigns SET title = ");
    qb.push_bind(&next.title)
        .push(", description = ")
        .push_bind(&next.description)
        .push(", goal_amount_minor = ")
        .push_bind(next.goal.amount_minor)
        .push(", currency = ")
        .push_bind(next.goal.currency.as_str())
        .push(", end_date = ")
        .push_bind(next.end_date)
        .push(", cover_image = ")
        .push_bind(&next.cover_image)
        .push(", status = ")
        .push_bind(next.status.as_str())
        .push(", updated_at = ")
        .push_bind(now)
        .push(" WHERE id = ")
        .push_bind(id)
        .push(" AND status = ")
        .push_bind(current.status.as_str());
    if goal_changed {
        qb.push(
            " AND NOT EXISTS (SELECT 1 FROM donations \
             WHERE donations.campaign_id = campaigns.id AND donations.status = 'completed')",
        );
    }
    // A pending donation settles in the currency it was opened with.
    if currency_changed {
        qb.push(
            " AND NOT EXISTS (SELECT 1 FROM donations \
             WHERE donations.campaign_id = campaigns.id \
             AND donations.status IN ('pending', 'completed'))",
        );
    }

    let affected = qb.build().execute(pool).await?.rows_affected();
    if affected == 0 {
        let latest = require(pool, id).await?;
        if latest.status != current.status {
            return Err(invalid_state(format!(
                "campaign {id} changed to {} while being edited",
                latest.status.as_str()
            )));
        }
        if currency_changed {
            return Err(invalid_state(
                "currency is fixed while donations are pending or collected",
            ));
        }
        return Err(invalid_state("goal is fixed once donations have been collected"));
    }

    info!(campaign_id = id, status = next.status.as_str(), "Campaign updated");
    require(pool, id).await
}

fn toggled_status(current: CampaignStatus, active: bool) -> Result<CampaignStatus> {
    use CampaignStatus::*;
    match (current, active) {
        (Approved | Ended | Active, true) => Ok(Active),
        (Approved | Active | Ended, false) => Ok(Ended),
        (other, _) => Err(invalid_state(format!(
            "a {} campaign cannot be opened or closed",
            other.as_str()
        ))),
    }
}

/// Remove a campaign that has not collected any money.
///
/// Donations still PENDING or FAILED survive with their campaign reference
/// cleared by the foreign key.
pub async fn delete(pool: &SqlitePool, actor: &Actor, id: i64) -> Result<()> {
    let campaign = require(pool, id).await?;
    if !campaign.can_manage(actor) {
        return Err(unauthorized("only the organizer or an admin may delete this campaign"));
    }

    let affected = sqlx::query(
        r#"
        DELETE FROM campaigns
        WHERE  id = ?1
          AND  NOT EXISTS (SELECT 1 FROM donations WHERE campaign_id = ?1 AND status = 'completed')
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    if affected == 0 {
        if find(pool, id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("campaign {id}")));
        }
        return Err(invalid_state(
            "campaigns with completed donations cannot be deleted",
        ));
    }
    info!(campaign_id = id, "Campaign deleted");
    Ok(())
}

/// Fetch a campaign the actor is allowed to see.
pub async fn get(pool: &SqlitePool, actor: &Actor, id: i64) -> Result<Campaign> {
    match find(pool, id).await? {
        Some(c) if c.is_visible_to(actor) => Ok(c),
        _ => Err(LedgerError::NotFound(format!("campaign {id}"))),
    }
}

/// List campaigns matching `query` and visible to `actor`, newest first.
pub async fn list(
    pool: &SqlitePool,
    actor: &Actor,
    query: &CampaignQuery,
    now: i64,
) -> Result<Vec<Campaign>> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE 1 = 1"));

    if !actor.is_admin() {
        qb.push(" AND (status IN ('approved', 'active', 'ended')");
        if let Some(me) = actor.member_id() {
            qb.push(" OR organizer_id = ").push_bind(me.to_string());
        }
        qb.push(")");
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(organizer) = &query.organizer_id {
        qb.push(" AND organizer_id = ").push_bind(organizer.clone());
    }
    match query.active {
        Some(true) => {
            qb.push(" AND status IN ('approved', 'active') AND (end_date IS NULL OR end_date > ")
                .push_bind(now)
                .push(")");
        }
        Some(false) => {
            qb.push(" AND NOT (status IN ('approved', 'active') AND (end_date IS NULL OR end_date > ")
                .push_bind(now)
                .push("))");
        }
        None => {}
    }
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows = qb
        .build_query_as::<CampaignRow>()
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(Campaign::try_from).collect()
}

/// Number of campaigns currently taking donations.
pub async fn count_accepting(pool: &SqlitePool, now: i64) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM campaigns WHERE status IN ('approved', 'active') AND (end_date IS NULL OR end_date > ?1)",
    )
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::test_pool;

    pub const NOW: i64 = 1_700_000_000;

    pub fn new_campaign(goal: i64) -> NewCampaign {
        NewCampaign {
            title: "Scholarship fund".to_string(),
            description: "Tuition support for first-generation students".to_string(),
            goal_amount_minor: goal,
            currency: None,
            cover_image: None,
            end_date: None,
            submit: true,
        }
    }

    /// Proposed by `org` and approved by `admin`.
    pub async fn approved_campaign(pool: &SqlitePool, goal: i64) -> Campaign {
        let c = propose(pool, &Actor::member("org"), new_campaign(goal), NOW)
            .await
            .unwrap();
        review(pool, &Actor::admin("admin"), c.id, ReviewDecision::Approve, None, NOW)
            .await
            .unwrap()
    }

    fn campaign_with(status: CampaignStatus, end_date: Option<i64>) -> Campaign {
        Campaign {
            id: 1,
            title: "t".to_string(),
            description: "d".to_string(),
            goal: Money::new(1_000, Currency::usd()),
            organizer_id: "org".to_string(),
            cover_image: None,
            end_date,
            status,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn accepting_donations_truth_table() {
        use CampaignStatus::*;
        for status in [Draft, Pending, Rejected, Ended] {
            assert!(!campaign_with(status, None).is_accepting_donations(NOW));
        }
        assert!(campaign_with(Approved, None).is_accepting_donations(NOW));
        assert!(campaign_with(Active, None).is_accepting_donations(NOW));
        assert!(campaign_with(Approved, Some(NOW + 60)).is_accepting_donations(NOW));
        assert!(campaign_with(Active, Some(NOW + 60)).is_accepting_donations(NOW));
        assert!(!campaign_with(Approved, Some(NOW - 60)).is_accepting_donations(NOW));
        assert!(!campaign_with(Approved, Some(NOW)).is_accepting_donations(NOW));
    }

    #[tokio::test]
    async fn propose_defaults_to_pending() {
        let pool = test_pool().await;
        let c = propose(&pool, &Actor::member("org"), new_campaign(500_000), NOW)
            .await
            .unwrap();
        assert_eq!(c.status, CampaignStatus::Pending);
        assert_eq!(c.goal, Money::new(500_000, Currency::usd()));
        assert_eq!(c.organizer_id, "org");
        assert!(c.approved_by.is_none());
    }

    #[tokio::test]
    async fn propose_as_draft() {
        let pool = test_pool().await;
        let mut fields = new_campaign(1_000);
        fields.submit = false;
        let c = propose(&pool, &Actor::member("org"), fields, NOW).await.unwrap();
        assert_eq!(c.status, CampaignStatus::Draft);

        let submitted = submit(&pool, &Actor::member("org"), c.id, NOW).await.unwrap();
        assert_eq!(submitted.status, CampaignStatus::Pending);

        let again = submit(&pool, &Actor::member("org"), c.id, NOW).await;
        assert!(matches!(again, Err(LedgerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn zero_goal_is_rejected_before_persistence() {
        let pool = test_pool().await;
        let res = propose(&pool, &Actor::member("org"), new_campaign(0), NOW).await;
        assert!(matches!(res, Err(LedgerError::Validation(_))));

        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM campaigns")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn propose_validates_fields() {
        let pool = test_pool().await;
        let org = Actor::member("org");

        let mut blank = new_campaign(1_000);
        blank.title = "   ".to_string();
        assert!(matches!(
            propose(&pool, &org, blank, NOW).await,
            Err(LedgerError::Validation(_))
        ));

        let mut past = new_campaign(1_000);
        past.end_date = Some(NOW - 1);
        assert!(matches!(
            propose(&pool, &org, past, NOW).await,
            Err(LedgerError::Validation(_))
        ));

        assert!(matches!(
            propose(&pool, &Actor::guest(), new_campaign(1_000), NOW).await,
            Err(LedgerError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn admin_rejection_records_reviewer_and_reason() {
        let pool = test_pool().await;
        let c = propose(&pool, &Actor::member("org"), new_campaign(500_000), NOW)
            .await
            .unwrap();

        let rejected = review(
            &pool,
            &Actor::admin("admin-1"),
            c.id,
            ReviewDecision::Reject,
            Some("insufficient detail".to_string()),
            NOW + 10,
        )
        .await
        .unwrap();

        assert_eq!(rejected.status, CampaignStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("insufficient detail"));
        assert_eq!(rejected.approved_by.as_deref(), Some("admin-1"));
        assert_eq!(rejected.approved_at, Some(NOW + 10));
        assert!(!rejected.is_accepting_donations(NOW + 10));
        assert!(!rejected.view(&Actor::guest(), NOW).is_active);
    }

    #[tokio::test]
    async fn rejection_without_reason_uses_default() {
        let pool = test_pool().await;
        let c = propose(&pool, &Actor::member("org"), new_campaign(1_000), NOW)
            .await
            .unwrap();
        let rejected = review(&pool, &Actor::admin("a"), c.id, ReviewDecision::Reject, None, NOW)
            .await
            .unwrap();
        assert_eq!(
            rejected.rejection_reason.as_deref(),
            Some(DEFAULT_REJECTION_REASON)
        );
    }

    #[tokio::test]
    async fn approval_clears_reason_and_opens_campaign() {
        let pool = test_pool().await;
        let c = approved_campaign(&pool, 1_000).await;
        assert_eq!(c.status, CampaignStatus::Approved);
        assert_eq!(c.approved_by.as_deref(), Some("admin"));
        assert!(c.rejection_reason.is_none());
        assert!(c.is_accepting_donations(NOW));
    }

    #[tokio::test]
    async fn review_requires_admin_and_pending() {
        let pool = test_pool().await;
        let c = propose(&pool, &Actor::member("org"), new_campaign(1_000), NOW)
            .await
            .unwrap();

        let by_organizer =
            review(&pool, &Actor::member("org"), c.id, ReviewDecision::Approve, None, NOW).await;
        assert!(matches!(by_organizer, Err(LedgerError::Authorization(_))));

        review(&pool, &Actor::admin("a"), c.id, ReviewDecision::Approve, None, NOW)
            .await
            .unwrap();
        let twice =
            review(&pool, &Actor::admin("b"), c.id, ReviewDecision::Reject, None, NOW).await;
        assert!(matches!(twice, Err(LedgerError::InvalidState(_))));

        let missing =
            review(&pool, &Actor::admin("a"), 999, ReviewDecision::Approve, None, NOW).await;
        assert!(matches!(missing, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn update_permissions() {
        let pool = test_pool().await;
        let c = propose(&pool, &Actor::member("org"), new_campaign(1_000), NOW)
            .await
            .unwrap();

        let changes = CampaignUpdate {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        let stranger = update(&pool, &Actor::member("other"), c.id, changes.clone(), NOW).await;
        assert!(matches!(stranger, Err(LedgerError::Authorization(_))));

        let edited = update(&pool, &Actor::member("org"), c.id, changes.clone(), NOW)
            .await
            .unwrap();
        assert_eq!(edited.title, "Renamed");
        assert_eq!(edited.status, CampaignStatus::Pending);

        review(&pool, &Actor::admin("a"), c.id, ReviewDecision::Approve, None, NOW)
            .await
            .unwrap();
        let late = update(&pool, &Actor::member("org"), c.id, changes.clone(), NOW).await;
        assert!(matches!(late, Err(LedgerError::Authorization(_))));

        let by_admin = update(&pool, &Actor::admin("a"), c.id, changes, NOW).await;
        assert!(by_admin.is_ok());
    }

    #[tokio::test]
    async fn update_rejects_invalid_goal() {
        let pool = test_pool().await;
        let c = propose(&pool, &Actor::member("org"), new_campaign(1_000), NOW)
            .await
            .unwrap();
        let res = update(
            &pool,
            &Actor::member("org"),
            c.id,
            CampaignUpdate {
                goal_amount_minor: Some(-5),
                ..Default::default()
            },
            NOW,
        )
        .await;
        assert!(matches!(res, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn is_active_toggles_between_active_and_ended() {
        let pool = test_pool().await;
        let c = approved_campaign(&pool, 1_000).await;
        let admin = Actor::admin("a");

        let launched = update(
            &pool,
            &admin,
            c.id,
            CampaignUpdate {
                is_active: Some(true),
                ..Default::default()
            },
            NOW,
        )
        .await
        .unwrap();
        assert_eq!(launched.status, CampaignStatus::Active);

        let ended = update(
            &pool,
            &admin,
            c.id,
            CampaignUpdate {
                is_active: Some(false),
                ..Default::default()
            },
            NOW,
        )
        .await
        .unwrap();
        assert_eq!(ended.status, CampaignStatus::Ended);
        assert!(!ended.is_accepting_donations(NOW));
        assert_eq!(ended.approved_by.as_deref(), Some("admin"));

        let pending = propose(&pool, &Actor::member("org"), new_campaign(1_000), NOW)
            .await
            .unwrap();
        let res = update(
            &pool,
            &admin,
            pending.id,
            CampaignUpdate {
                is_active: Some(true),
                ..Default::default()
            },
            NOW,
        )
        .await;
        assert!(matches!(res, Err(LedgerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn delete_is_forbidden_once_money_was_collected() {
        let pool = test_pool().await;
        let c = approved_campaign(&pool, 1_000).await;
        sqlx::query(
            "INSERT INTO donations (amount_minor, currency, campaign_id, user_id, status, created_at, updated_at, completed_at)
             VALUES (500, 'USD', ?1, 'donor', 'completed', ?2, ?2, ?2)",
        )
        .bind(c.id)
        .bind(NOW)
        .execute(&pool)
        .await
        .unwrap();

        let res = delete(&pool, &Actor::admin("a"), c.id).await;
        assert!(matches!(res, Err(LedgerError::InvalidState(_))));
        assert!(find(&pool, c.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_orphans_pending_donations() {
        let pool = test_pool().await;
        let c = approved_campaign(&pool, 1_000).await;
        sqlx::query(
            "INSERT INTO donations (amount_minor, currency, campaign_id, user_id, status, created_at, updated_at)
             VALUES (500, 'USD', ?1, 'donor', 'pending', ?2, ?2)",
        )
        .bind(c.id)
        .bind(NOW)
        .execute(&pool)
        .await
        .unwrap();

        assert!(matches!(
            delete(&pool, &Actor::member("stranger"), c.id).await,
            Err(LedgerError::Authorization(_))
        ));
        delete(&pool, &Actor::member("org"), c.id).await.unwrap();
        assert!(find(&pool, c.id).await.unwrap().is_none());

        let (campaign_id,): (Option<i64>,) =
            sqlx::query_as("SELECT campaign_id FROM donations LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(campaign_id, None);
    }

    #[tokio::test]
    async fn listing_respects_visibility() {
        let pool = test_pool().await;
        approved_campaign(&pool, 1_000).await;
        propose(&pool, &Actor::member("org"), new_campaign(2_000), NOW)
            .await
            .unwrap();

        let public = list(&pool, &Actor::guest(), &CampaignQuery::default(), NOW)
            .await
            .unwrap();
        assert_eq!(public.len(), 1);

        let own = list(&pool, &Actor::member("org"), &CampaignQuery::default(), NOW)
            .await
            .unwrap();
        assert_eq!(own.len(), 2);

        let pending_only = CampaignQuery {
            status: Some(CampaignStatus::Pending),
            ..Default::default()
        };
        let admin_view = list(&pool, &Actor::admin("a"), &pending_only, NOW)
            .await
            .unwrap();
        assert_eq!(admin_view.len(), 1);

        let active = CampaignQuery {
            active: Some(true),
            ..Default::default()
        };
        assert_eq!(
            list(&pool, &Actor::admin("a"), &active, NOW).await.unwrap().len(),
            1
        );
        let closed = CampaignQuery {
            active: Some(false),
            ..Default::default()
        };
        let closed = list(&pool, &Actor::admin("a"), &closed, NOW).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, CampaignStatus::Pending);
        assert_eq!(count_accepting(&pool, NOW).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn currency_is_fixed_while_donations_are_pending() {
        use crate::donation::{self, tests::member_gift};
        use crate::progress::campaign_progress;

        let pool = test_pool().await;
        let c = approved_campaign(&pool, 10_000).await;
        let d = donation::initiate(&pool, &Actor::member("donor"), member_gift(1_000, Some(c.id)), NOW)
            .await
            .unwrap();

        let to_euros = CampaignUpdate {
            currency: Some("EUR".to_string()),
            ..Default::default()
        };
        let res = update(&pool, &Actor::admin("a"), c.id, to_euros.clone(), NOW).await;
        assert!(matches!(res, Err(LedgerError::InvalidState(_))));
        assert_eq!(find(&pool, c.id).await.unwrap().unwrap().goal.currency, Currency::usd());

        // The goal amount alone may still move while nothing has settled.
        let raised = update(
            &pool,
            &Actor::admin("a"),
            c.id,
            CampaignUpdate {
                goal_amount_minor: Some(20_000),
                ..Default::default()
            },
            NOW,
        )
        .await
        .unwrap();
        assert_eq!(raised.goal, Money::new(20_000, Currency::usd()));

        donation::mark_completed(&pool, d.id, "pi_1", NOW).await.unwrap();
        let progress = campaign_progress(&pool, c.id).await.unwrap();
        assert_eq!(progress.current_amount, Money::new(1_000, Currency::usd()));

        let res = update(&pool, &Actor::admin("a"), c.id, to_euros, NOW).await;
        assert!(matches!(res, Err(LedgerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn currency_may_change_after_pending_donations_fail() {
        use crate::donation::{self, tests::member_gift};

        let pool = test_pool().await;
        let c = approved_campaign(&pool, 10_000).await;
        let d = donation::initiate(&pool, &Actor::member("donor"), member_gift(1_000, Some(c.id)), NOW)
            .await
            .unwrap();
        donation::mark_failed(&pool, d.id, "card_declined", NOW).await.unwrap();

        let edited = update(
            &pool,
            &Actor::admin("a"),
            c.id,
            CampaignUpdate {
                currency: Some("EUR".to_string()),
                ..Default::default()
            },
            NOW,
        )
        .await
        .unwrap();
        assert_eq!(edited.goal.currency.as_str(), "EUR");
    }

    #[test]
    fn explicit_null_end_date_is_a_change() {
        let cleared: CampaignUpdate = serde_json::from_str(r#"{"end_date": null}"#).unwrap();
        assert_eq!(cleared.end_date, Some(None));

        let untouched: CampaignUpdate = serde_json::from_str(r#"{"title": "x"}"#).unwrap();
        assert_eq!(untouched.end_date, None);

        let set: CampaignUpdate = serde_json::from_str(r#"{"end_date": 1700003600}"#).unwrap();
        assert_eq!(set.end_date, Some(Some(1_700_003_600)));
    }

    #[tokio::test]
    async fn end_date_can_be_cleared() {
        let pool = test_pool().await;
        let mut fields = new_campaign(1_000);
        fields.end_date = Some(NOW + 3_600);
        let c = propose(&pool, &Actor::member("org"), fields, NOW).await.unwrap();
        assert_eq!(c.end_date, Some(NOW + 3_600));

        let kept = update(
            &pool,
            &Actor::member("org"),
            c.id,
            CampaignUpdate {
                title: Some("Renamed".to_string()),
                ..Default::default()
            },
            NOW,
        )
        .await
        .unwrap();
        assert_eq!(kept.end_date, Some(NOW + 3_600));

        let cleared = update(
            &pool,
            &Actor::member("org"),
            c.id,
            CampaignUpdate {
                end_date: Some(None),
                ..Default::default()
            },
            NOW,
        )
        .await
        .unwrap();
        assert_eq!(cleared.end_date, None);
    }

    #[tokio::test]
    async fn rejection_reason_hidden_from_public() {
        let pool = test_pool().await;
        let c = propose(&pool, &Actor::member("org"), new_campaign(1_000), NOW)
            .await
            .unwrap();
        let rejected = review(
            &pool,
            &Actor::admin("a"),
            c.id,
            ReviewDecision::Reject,
            Some("too vague".to_string()),
            NOW,
        )
        .await
        .unwrap();

        assert_eq!(
            rejected.view(&Actor::member("org"), NOW).rejection_reason.as_deref(),
            Some("too vague")
        );
        assert!(rejected.view(&Actor::member("x"), NOW).rejection_reason.is_none());
        assert!(matches!(
            get(&pool, &Actor::member("x"), c.id).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
