//! Internal HTTP endpoints for the fleet upgrade driver

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fleet_core::internal_auth::{InternalKeySource, RequireInternalKey};
use fleet_core::problemdetails::Problem;
use fleet_entities::types::{CampaignStatus, ExecutionStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

use crate::scheduler::{
    BatchItem, CampaignSummary, NewCampaign, NextBatch, UpgradeCampaignScheduler,
    DEFAULT_BATCH_SIZE,
};

pub struct UpgradesAppState {
    pub scheduler: Arc<UpgradeCampaignScheduler>,
    pub internal_api_key: Option<String>,
}

impl InternalKeySource for UpgradesAppState {
    fn internal_api_key(&self) -> Option<&str> {
        self.internal_api_key.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    #[schema(example = "registry.example.com/tenant:v2")]
    pub target_image_tag: String,
    #[schema(example = "stable")]
    pub channel: String,
    /// Ceiling on executions in flight at once (default 10)
    pub batch_size: Option<i32>,
    /// Failure rate, in percent, above which the campaign halts (default 10)
    pub failure_threshold_percent: Option<i32>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CampaignCreated {
    pub id: Uuid,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct NextBatchQuery {
    /// Maximum executions to claim in this call
    pub batch_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExecutionStatusRequest {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub logs: Option<Value>,
    /// Shorthand recorded as `{"error": ...}` when no logs are sent
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionStatusRequest {
    fn into_parts(self) -> (ExecutionStatus, Option<Value>) {
        let logs = match (self.logs, self.error) {
            (Some(logs), _) if !logs.is_null() => Some(logs),
            (_, Some(error)) => Some(json!({ "error": error })),
            _ => None,
        };
        (self.status, logs)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CampaignStatusResponse {
    pub id: Uuid,
    pub status: CampaignStatus,
}

#[utoipa::path(
    tag = "Upgrades",
    post,
    path = "/internal/campaigns",
    request_body = CreateCampaignRequest,
    responses(
        (status = 200, description = "Campaign created and tenants queued", body = CampaignCreated),
        (status = 400, description = "Invalid campaign parameters"),
        (status = 401, description = "Missing or invalid internal key"),
    )
)]
async fn create_campaign(
    _auth: RequireInternalKey,
    State(state): State<Arc<UpgradesAppState>>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, Problem> {
    let campaign = state
        .scheduler
        .create_campaign(NewCampaign {
            target_image_tag: request.target_image_tag,
            channel: request.channel,
            batch_size: request.batch_size,
            failure_threshold_percent: request.failure_threshold_percent,
        })
        .await?;
    Ok(Json(CampaignCreated { id: campaign.id }))
}

#[utoipa::path(
    tag = "Upgrades",
    post,
    path = "/internal/campaigns/{id}/next-batch",
    params(
        ("id" = Uuid, Path, description = "Campaign ID"),
        NextBatchQuery
    ),
    responses(
        (status = 200, description = "Claimed executions, possibly empty", body = NextBatch),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 404, description = "Campaign not found"),
    )
)]
async fn next_batch(
    _auth: RequireInternalKey,
    State(state): State<Arc<UpgradesAppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<NextBatchQuery>,
) -> Result<impl IntoResponse, Problem> {
    let batch_size = query.batch_size.unwrap_or(DEFAULT_BATCH_SIZE as u64);
    let batch = state.scheduler.get_next_batch(id, batch_size).await?;
    Ok(Json(batch))
}

#[utoipa::path(
    tag = "Upgrades",
    post,
    path = "/internal/campaigns/executions/{id}/status",
    request_body = ExecutionStatusRequest,
    params(("id" = Uuid, Path, description = "Execution ID")),
    responses(
        (status = 200, description = "Status recorded", body = SuccessResponse),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 404, description = "Execution not found"),
    )
)]
async fn update_execution_status(
    _auth: RequireInternalKey,
    State(state): State<Arc<UpgradesAppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ExecutionStatusRequest>,
) -> Result<impl IntoResponse, Problem> {
    let (status, logs) = request.into_parts();
    state
        .scheduler
        .update_execution_status(id, status, logs)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[utoipa::path(
    tag = "Upgrades",
    get,
    path = "/internal/campaigns/{id}",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign with per-status execution counts", body = CampaignSummary),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 404, description = "Campaign not found"),
    )
)]
async fn get_campaign(
    _auth: RequireInternalKey,
    State(state): State<Arc<UpgradesAppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let summary = state.scheduler.summary(id).await?;
    Ok(Json(summary))
}

#[utoipa::path(
    tag = "Upgrades",
    post,
    path = "/internal/campaigns/{id}/pause",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign paused", body = CampaignStatusResponse),
        (status = 409, description = "Campaign already finished"),
    )
)]
async fn pause_campaign(
    _auth: RequireInternalKey,
    State(state): State<Arc<UpgradesAppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let campaign = state.scheduler.pause(id).await?;
    Ok(Json(CampaignStatusResponse {
        id: campaign.id,
        status: campaign.status,
    }))
}

#[utoipa::path(
    tag = "Upgrades",
    post,
    path = "/internal/campaigns/{id}/resume",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign running again", body = CampaignStatusResponse),
        (status = 409, description = "Campaign already finished"),
    )
)]
async fn resume_campaign(
    _auth: RequireInternalKey,
    State(state): State<Arc<UpgradesAppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let campaign = state.scheduler.resume(id).await?;
    Ok(Json(CampaignStatusResponse {
        id: campaign.id,
        status: campaign.status,
    }))
}

#[utoipa::path(
    tag = "Upgrades",
    post,
    path = "/internal/campaigns/{id}/complete",
    params(("id" = Uuid, Path, description = "Campaign ID")),
    responses(
        (status = 200, description = "Campaign completed", body = CampaignStatusResponse),
        (status = 409, description = "Executions still queued or in flight"),
    )
)]
async fn complete_campaign(
    _auth: RequireInternalKey,
    State(state): State<Arc<UpgradesAppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let campaign = state.scheduler.complete(id).await?;
    Ok(Json(CampaignStatusResponse {
        id: campaign.id,
        status: campaign.status,
    }))
}

pub fn configure_routes() -> Router<Arc<UpgradesAppState>> {
    Router::new()
        .route("/internal/campaigns", post(create_campaign))
        .route("/internal/campaigns/{id}", get(get_campaign))
        .route("/internal/campaigns/{id}/next-batch", post(next_batch))
        .route("/internal/campaigns/{id}/pause", post(pause_campaign))
        .route("/internal/campaigns/{id}/resume", post(resume_campaign))
        .route("/internal/campaigns/{id}/complete", post(complete_campaign))
        .route(
            "/internal/campaigns/executions/{id}/status",
            post(update_execution_status),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        create_campaign,
        next_batch,
        update_execution_status,
        get_campaign,
        pause_campaign,
        resume_campaign,
        complete_campaign,
    ),
    components(
        schemas(
            CreateCampaignRequest,
            CampaignCreated,
            ExecutionStatusRequest,
            SuccessResponse,
            CampaignStatusResponse,
            NextBatch,
            BatchItem,
            CampaignSummary,
            CampaignStatus,
            ExecutionStatus,
        )
    ),
    tags(
        (name = "Upgrades", description = "Fleet-wide rolling upgrade campaigns")
    )
)]
pub struct UpgradesApiDoc;
