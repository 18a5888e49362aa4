//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::campaign::{self, CampaignQuery, CampaignUpdate, CampaignView, NewCampaign, ReviewDecision};
use crate::donation::{self, DonationQuery, DonationStatusView, DonationView, NewDonation};
use crate::errors::{LedgerError, Result};
use crate::events::{self, SIGNATURE_HEADER};
use crate::identity::Actor;
use crate::payments::IntentHandle;
use crate::progress::{self, CampaignProgress, PlatformStats};
use crate::receipts::{self, Receipt};
use crate::reconciler::{ReconcileOutcome, Reconciler};

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub reconciler: Arc<Reconciler>,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

/// All routes, without middleware layers.
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/campaigns/:id",
            get(get_campaign).patch(update_campaign).delete(delete_campaign),
        )
        .route("/campaigns/:id/submit", post(submit_campaign))
        .route("/campaigns/:id/review", post(review_campaign))
        .route("/campaigns/:id/progress", get(get_campaign_progress))
        .route("/campaigns/:id/donations", get(list_campaign_donations))
        .route("/donations", get(list_donations).post(create_donation))
        .route("/donations/lookup", get(lookup_donation))
        .route("/donations/:id", get(get_donation))
        .route("/donations/:id/intent", post(open_intent))
        .route("/donations/:id/status", get(donation_status))
        .route("/donations/:id/receipt", get(get_receipt))
        .route("/stats", get(platform_stats))
        .route("/webhooks/payments", post(payment_webhook))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct CampaignsResponse {
    pub count: usize,
    pub campaigns: Vec<CampaignView>,
}

#[derive(Serialize)]
pub struct CampaignDetail {
    pub campaign: CampaignView,
    pub progress: CampaignProgress,
}

#[derive(Serialize)]
pub struct DonationsResponse {
    pub count: usize,
    pub donations: Vec<DonationView>,
}

#[derive(Serialize)]
pub struct DonationCreated {
    pub donation: DonationView,
    /// `None` when the provider could not be reached; retry through
    /// `POST /donations/:id/intent`.
    pub payment: Option<IntentHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_error: Option<String>,
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ReconcileOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl WebhookAck {
    fn applied(outcome: ReconcileOutcome) -> Self {
        Self {
            received: true,
            outcome: Some(outcome),
            note: None,
        }
    }

    fn noted(note: impl Into<String>) -> Self {
        Self {
            received: true,
            outcome: None,
            note: Some(note.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    #[serde(rename = "ref")]
    pub external_ref: String,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match &self {
            LedgerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Authorization(_) => StatusCode::FORBIDDEN,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InvalidState(_) | LedgerError::Consistency(_) | LedgerError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            LedgerError::Provider(_) | LedgerError::Http(_) => StatusCode::BAD_GATEWAY,
            LedgerError::Signature(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if self.is_client_error() {
            warn!("Request rejected ({status}): {self}");
        } else {
            error!("Request failed ({status}): {self}");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ─────────────────────────────────────────────────────────
// Campaign handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /campaigns`
pub async fn list_campaigns(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Query(query): Query<CampaignQuery>,
) -> Result<Json<CampaignsResponse>> {
    let at = now();
    let campaigns: Vec<CampaignView> = campaign::list(&state.pool, &actor, &query, at)
        .await?
        .iter()
        .map(|c| c.view(&actor, at))
        .collect();
    Ok(Json(CampaignsResponse {
        count: campaigns.len(),
        campaigns,
    }))
}

/// `POST /campaigns`
pub async fn create_campaign(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Json(fields): Json<NewCampaign>,
) -> Result<impl IntoResponse> {
    let at = now();
    let created = campaign::propose(&state.pool, &actor, fields, at).await?;
    Ok((StatusCode::CREATED, Json(created.view(&actor, at))))
}

/// `GET /campaigns/:id`
///
/// The campaign together with its live progress.
pub async fn get_campaign(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<CampaignDetail>> {
    let c = campaign::get(&state.pool, &actor, id).await?;
    let donations = donation::completed(&state.pool, Some(id)).await?;
    let progress = CampaignProgress::from_completed(id, &c.goal, &donations)?;
    Ok(Json(CampaignDetail {
        campaign: c.view(&actor, now()),
        progress,
    }))
}

/// `PATCH /campaigns/:id`
pub async fn update_campaign(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(changes): Json<CampaignUpdate>,
) -> Result<Json<CampaignView>> {
    let at = now();
    let c = campaign::update(&state.pool, &actor, id, changes, at).await?;
    Ok(Json(c.view(&actor, at)))
}

/// `DELETE /campaigns/:id`
pub async fn delete_campaign(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    campaign::delete(&state.pool, &actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /campaigns/:id/submit`
pub async fn submit_campaign(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<CampaignView>> {
    let at = now();
    let c = campaign::submit(&state.pool, &actor, id, at).await?;
    Ok(Json(c.view(&actor, at)))
}

/// `POST /campaigns/:id/review`
pub async fn review_campaign(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<CampaignView>> {
    let at = now();
    let c = campaign::review(&state.pool, &actor, id, req.decision, req.reason, at).await?;
    Ok(Json(c.view(&actor, at)))
}

/// `GET /campaigns/:id/progress`
pub async fn get_campaign_progress(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<CampaignProgress>> {
    campaign::get(&state.pool, &actor, id).await?;
    Ok(Json(progress::campaign_progress(&state.pool, id).await?))
}

/// `GET /campaigns/:id/donations`
///
/// Completed donations of a visible campaign, redacted for the caller.
pub async fn list_campaign_donations(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<DonationsResponse>> {
    campaign::get(&state.pool, &actor, id).await?;
    let donations: Vec<DonationView> =
        donation::list_for_campaign(&state.pool, id, page.limit, page.offset)
            .await?
            .iter()
            .map(|d| d.project(&actor))
            .collect();
    Ok(Json(DonationsResponse {
        count: donations.len(),
        donations,
    }))
}

// ─────────────────────────────────────────────────────────
// Donation handlers
// ─────────────────────────────────────────────────────────

/// `GET /donations`
pub async fn list_donations(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Query(query): Query<DonationQuery>,
) -> Result<Json<DonationsResponse>> {
    let donations: Vec<DonationView> = donation::list(&state.pool, &actor, &query)
        .await?
        .iter()
        .map(|d| d.project(&actor))
        .collect();
    Ok(Json(DonationsResponse {
        count: donations.len(),
        donations,
    }))
}

/// `POST /donations`
///
/// Records the donation, then opens the provider payment. A provider outage
/// still returns the PENDING donation so the client can retry the payment.
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Json(fields): Json<NewDonation>,
) -> Result<impl IntoResponse> {
    let at = now();
    let created = donation::initiate(&state.pool, &actor, fields, at).await?;

    let (payment, payment_error) = match state.reconciler.open_intent(&actor, created.id, at).await {
        Ok(handle) => (Some(handle), None),
        Err(e @ (LedgerError::Provider(_) | LedgerError::Http(_))) => (None, Some(e.to_string())),
        Err(e) => return Err(e),
    };
    let donation = donation::find(&state.pool, created.id)
        .await?
        .unwrap_or(created);

    Ok((
        StatusCode::CREATED,
        Json(DonationCreated {
            donation: donation.project(&actor),
            payment,
            payment_error,
        }),
    ))
}

/// `GET /donations/:id`
pub async fn get_donation(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<DonationView>> {
    let d = donation::get(&state.pool, &actor, id).await?;
    Ok(Json(d.project(&actor)))
}

/// `POST /donations/:id/intent`
pub async fn open_intent(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<IntentHandle>> {
    Ok(Json(state.reconciler.open_intent(&actor, id, now()).await?))
}

/// `GET /donations/:id/status`
pub async fn donation_status(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<DonationStatusView>> {
    Ok(Json(donation::resolve_status(&state.pool, &actor, id).await?))
}

/// `GET /donations/lookup?ref=`
pub async fn lookup_donation(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<LookupQuery>,
) -> Result<Json<DonationStatusView>> {
    Ok(Json(
        donation::resolve_by_external_ref(&state.pool, &q.external_ref).await?,
    ))
}

/// `GET /donations/:id/receipt`
pub async fn get_receipt(
    State(state): State<Arc<ApiState>>,
    actor: Actor,
    Path(id): Path<i64>,
) -> Result<Json<Receipt>> {
    Ok(Json(receipts::get_for_donation(&state.pool, &actor, id).await?))
}

/// `GET /stats`
pub async fn platform_stats(State(state): State<Arc<ApiState>>) -> Result<Json<PlatformStats>> {
    Ok(Json(progress::platform_stats(&state.pool, now()).await?))
}

// ─────────────────────────────────────────────────────────
// Provider webhook
// ─────────────────────────────────────────────────────────

/// `POST /webhooks/payments`
///
/// Anything that verified and decoded is acknowledged with 200 unless the
/// ledger itself failed, in which case the provider should redeliver.
pub async fn payment_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let at = now();
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| LedgerError::Signature(format!("missing {SIGNATURE_HEADER} header")))?;
    events::verify_signature(
        &state.webhook_secret,
        signature,
        &body,
        at,
        state.webhook_tolerance_secs,
    )?;

    let event = match events::decode_event(&body) {
        Ok(Some(event)) => event,
        Ok(None) => return Ok(Json(WebhookAck::noted("ignored"))),
        Err(LedgerError::Json(e)) => {
            return Err(LedgerError::Validation(format!("malformed webhook body: {e}")))
        }
        Err(e) => return Err(e),
    };

    match state.reconciler.on_confirmation(&event, at).await {
        Ok(outcome) => {
            info!(event_id = ?event.event_id, kind = event.kind.as_str(), "Webhook applied");
            Ok(Json(WebhookAck::applied(outcome)))
        }
        Err(LedgerError::InvalidState(msg)) => {
            warn!(event_id = ?event.event_id, "Webhook acknowledged without effect: {msg}");
            Ok(Json(WebhookAck::noted("stale")))
        }
        Err(LedgerError::Consistency(_)) => Ok(Json(WebhookAck::noted("conflict"))),
        Err(e) => Err(e),
    }
}

// ─────────────────────────────────────────────────────────
// Router tests
// ─────────────────────────────────────────────────────────
