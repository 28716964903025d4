//! REST API handlers: campaign sends, sequence triggers, provider webhooks,
//! the unsubscribe flow, and suppression management.

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;
use winback_core::config::SecretsConfig;
use winback_core::error::EngineError;
use winback_core::store::CampaignStore;
use winback_core::types::{
    CampaignRecord, EventRollup, ReengagementOutcome, SuppressionEntry, VariantRecord,
};
use winback_delivery::runner::CampaignRunner;
use winback_delivery::tokens::verify_unsubscribe_token;
use winback_sequence::plan::{create_sequence, StepDraft};
use winback_sequence::scheduler::{SchedulerReport, SequenceScheduler};
use winback_tracking::ingest::{EventIngestor, WebhookPayload};
use winback_provider::EmailTransport;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CampaignStore>,
    pub transport: Arc<dyn EmailTransport>,
    pub runner: Arc<CampaignRunner>,
    pub scheduler: Arc<SequenceScheduler>,
    pub ingestor: Arc<EventIngestor>,
    pub secrets: SecretsConfig,
    pub default_template: String,
    pub start_time: Instant,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn engine_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::CampaignState(_, _)
        | EngineError::MissingEnvelope
        | EngineError::InvalidToken => StatusCode::BAD_REQUEST,
        EngineError::InvalidSignature => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "request failed");
    }
    api_error(status, e.to_string())
}

/// Shared-secret bearer check. An unset secret disables the gate.
fn bearer_authorized(headers: &HeaderMap, secret: &Option<String>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {secret}"))
        .unwrap_or(false)
}

// ─── Campaigns ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub subject: String,
    pub body_html: String,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub preheader: Option<String>,
    /// When present, the campaign is created as an A/B pair: variant A
    /// carries the base content, variant B this override.
    #[serde(default)]
    pub variant_b: Option<VariantContent>,
    #[serde(default)]
    pub split_ratio: Option<f64>,
}

#[derive(Deserialize)]
pub struct VariantContent {
    pub subject: String,
    pub body_html: String,
    #[serde(default)]
    pub template_name: Option<String>,
}

#[derive(Serialize)]
pub struct CreateCampaignResponse {
    pub campaign: CampaignRecord,
    pub variants: Vec<VariantRecord>,
}

/// POST /v1/campaigns — create a draft campaign, optionally split-tested.
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<Json<CreateCampaignResponse>, ApiError> {
    if request.subject.is_empty() || request.body_html.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "subject and body_html are required",
        ));
    }

    let template_name = request
        .template_name
        .unwrap_or_else(|| state.default_template.clone());
    let mut campaign = CampaignRecord::draft(&request.subject, &request.body_html, &template_name);
    campaign.preheader = request.preheader;
    state
        .store
        .insert_campaign(campaign.clone())
        .await
        .map_err(engine_error)?;

    let mut variants = Vec::new();
    if let Some(variant_b) = request.variant_b {
        let split = request.split_ratio.unwrap_or(50.0);
        let variant_a = VariantRecord {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            variant_label: "A".to_string(),
            subject: request.subject.clone(),
            body_html: request.body_html.clone(),
            template_name: Some(template_name.clone()),
            split_percentage: split,
            total_recipients: 0,
            total_sent: 0,
            total_failed: 0,
        };
        let variant_b = VariantRecord {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            variant_label: "B".to_string(),
            subject: variant_b.subject,
            body_html: variant_b.body_html,
            template_name: variant_b.template_name.or(Some(template_name)),
            split_percentage: 100.0 - split,
            total_recipients: 0,
            total_sent: 0,
            total_failed: 0,
        };
        for variant in [variant_a, variant_b] {
            state
                .store
                .insert_variant(variant.clone())
                .await
                .map_err(engine_error)?;
            variants.push(variant);
        }
    }

    Ok(Json(CreateCampaignResponse { campaign, variants }))
}

#[derive(Serialize)]
pub struct CampaignDetailResponse {
    pub campaign: CampaignRecord,
    pub variants: Vec<VariantRecord>,
    pub events: EventRollup,
}

/// GET /v1/campaigns/{id} — campaign with variants and engagement rollup.
pub async fn campaign_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignDetailResponse>, ApiError> {
    let campaign = state
        .store
        .get_campaign(id)
        .await
        .map_err(engine_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "campaign not found"))?;
    let variants = state.store.variants(id).await.map_err(engine_error)?;
    let events = state.store.event_rollup(id).await.map_err(engine_error)?;
    Ok(Json(CampaignDetailResponse {
        campaign,
        variants,
        events,
    }))
}

#[derive(Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub status: String,
    pub total_recipients: usize,
    pub total_sent: usize,
    pub total_failed: usize,
}

/// POST /v1/campaigns/{id}/send — run one draft campaign to completion.
pub async fn send_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<SendResponse>, ApiError> {
    if !bearer_authorized(&headers, &state.secrets.send_secret) {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    metrics::counter!("api.campaign_sends").increment(1);
    let summary = state.runner.send_campaign(id).await.map_err(engine_error)?;
    Ok(Json(SendResponse {
        success: true,
        status: summary.status.as_str().to_string(),
        total_recipients: summary.total_recipients,
        total_sent: summary.total_sent,
        total_failed: summary.total_failed,
    }))
}

// ─── Sequences ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateSequenceRequest {
    pub name: String,
    #[serde(default = "default_spacing_days")]
    pub spacing_days: u32,
    pub start_at: DateTime<Utc>,
    pub steps: Vec<StepDraft>,
}

fn default_spacing_days() -> u32 {
    7
}

/// POST /v1/sequences — create a re-engagement sequence and its step
/// campaigns.
pub async fn create_sequence_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateSequenceRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if request.steps.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "steps must not be empty"));
    }
    let sequence = create_sequence(
        &state.store,
        &request.name,
        request.spacing_days,
        request.start_at,
        request.steps,
        &state.default_template,
    )
    .await
    .map_err(engine_error)?;
    Ok(Json(serde_json::json!({ "sequence": sequence })))
}

#[derive(Serialize)]
pub struct SequenceOutcomesResponse {
    pub outcomes: Vec<ReengagementOutcome>,
}

/// GET /v1/sequences/{id}/outcomes — recorded re-engagement outcomes.
pub async fn sequence_outcomes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SequenceOutcomesResponse>, ApiError> {
    state
        .store
        .get_sequence(id)
        .await
        .map_err(engine_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "sequence not found"))?;
    let outcomes = state
        .store
        .outcomes_for_sequence(id)
        .await
        .map_err(engine_error)?;
    Ok(Json(SequenceOutcomesResponse { outcomes }))
}

/// GET /v1/sequences/run — scheduled trigger: send due steps, reconcile
/// outcomes. Idempotent-safe; an empty pass reports `processed: 0`.
pub async fn run_sequences(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SchedulerReport>, ApiError> {
    if !bearer_authorized(&headers, &state.secrets.cron_secret) {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    let report = state.scheduler.tick(Utc::now()).await.map_err(engine_error)?;
    Ok(Json(report))
}

// ─── Webhooks ───────────────────────────────────────────────────────────

/// POST /v1/webhooks/email — inbound provider engagement events.
pub async fn email_webhook(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.ingestor.process(payload).await.map_err(engine_error)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

// ─── Unsubscribe flow ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct UnsubscribeQuery {
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct UnsubscribeStatus {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /unsubscribe?token=... — validate a token and surface the address
/// it names. Invalid tokens report a failure, never an error page.
pub async fn unsubscribe_status(
    State(state): State<AppState>,
    Query(query): Query<UnsubscribeQuery>,
) -> Json<UnsubscribeStatus> {
    let Some(token) = query.token else {
        return Json(UnsubscribeStatus {
            valid: false,
            email: None,
            error: Some("Missing unsubscribe token.".to_string()),
        });
    };
    if state.secrets.unsubscribe_secret.is_empty() {
        error!("unsubscribe secret not configured");
        return Json(UnsubscribeStatus {
            valid: false,
            email: None,
            error: Some("Server configuration error.".to_string()),
        });
    }
    match verify_unsubscribe_token(&token, &state.secrets.unsubscribe_secret) {
        Some(payload) => Json(UnsubscribeStatus {
            valid: true,
            email: Some(payload.email),
            error: None,
        }),
        None => Json(UnsubscribeStatus {
            valid: false,
            email: None,
            error: Some("Invalid or expired unsubscribe link.".to_string()),
        }),
    }
}

#[derive(Deserialize)]
pub struct UnsubscribeRequest {
    pub token: String,
}

/// POST /unsubscribe — confirm an unsubscribe: re-verify the token and
/// write the address to the provider suppression list.
pub async fn unsubscribe_confirm(
    State(state): State<AppState>,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.secrets.unsubscribe_secret.is_empty() {
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server configuration error.",
        ));
    }
    let payload = verify_unsubscribe_token(&request.token, &state.secrets.unsubscribe_secret)
        .ok_or_else(|| engine_error(EngineError::InvalidToken))?;

    let added = state
        .transport
        .add_suppression(&payload.email, None)
        .await
        .map_err(engine_error)?;
    if !added {
        error!(email = %payload.email, "failed to add address to unsubscribe list");
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Something went wrong. Please try again.",
        ));
    }
    Ok(Json(serde_json::json!({ "success": true, "email": payload.email })))
}

// ─── Suppression management ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SuppressionQuery {
    pub q: Option<String>,
}

#[derive(Serialize)]
pub struct SuppressionListResponse {
    pub entries: Vec<SuppressionEntry>,
    pub search: String,
}

fn entry_timestamp(entry: &SuppressionEntry) -> DateTime<Utc> {
    DateTime::parse_from_rfc2822(&entry.created_at)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            DateTime::parse_from_rfc3339(&entry.created_at).map(|t| t.with_timezone(&Utc))
        })
        .unwrap_or_default()
}

/// GET /v1/suppressions?q=... — newest-first listing, capped at 100.
/// Listing failures degrade to an empty page.
pub async fn list_suppressions(
    State(state): State<AppState>,
    Query(query): Query<SuppressionQuery>,
) -> Json<SuppressionListResponse> {
    let search = query.q.unwrap_or_default();
    let mut entries = match state.transport.suppressions().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "failed to load suppression list");
            Vec::new()
        }
    };

    if !search.is_empty() {
        let needle = search.to_lowercase();
        entries.retain(|e| e.address.to_lowercase().contains(&needle));
    }
    entries.sort_by_key(|e| std::cmp::Reverse(entry_timestamp(e)));
    entries.truncate(100);

    Json(SuppressionListResponse { entries, search })
}

#[derive(Deserialize)]
pub struct AddSuppressionRequest {
    pub email: String,
}

/// POST /v1/suppressions — add an address to the unsubscribe list.
pub async fn add_suppression(
    State(state): State<AppState>,
    Json(request): Json<AddSuppressionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let email = request.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Valid email address is required.",
        ));
    }
    let added = state
        .transport
        .add_suppression(&email, None)
        .await
        .map_err(engine_error)?;
    if !added {
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to add email.",
        ));
    }
    Ok(Json(serde_json::json!({ "added": true })))
}

/// DELETE /v1/suppressions/{address} — remove an address.
pub async fn remove_suppression(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if address.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing email address."));
    }
    let removed = state
        .transport
        .remove_suppression(&address)
        .await
        .map_err(engine_error)?;
    if !removed {
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to remove entry.",
        ));
    }
    Ok(Json(serde_json::json!({ "removed": true })))
}

// ─── Operational endpoints ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

/// GET /health — health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready — readiness probe.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
