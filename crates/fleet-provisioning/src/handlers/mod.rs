//! Internal HTTP endpoints driving the provisioning steps
//!
//! Called by the external sequencer with the shared `X-Internal-Key` header.

pub mod tenants;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use fleet_core::internal_auth::{InternalKeySource, RequireInternalKey};
use fleet_core::problemdetails::Problem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

use crate::domain::{AcmeChallenge, DomainKind, DomainOutcome, DomainStatus};
use crate::errors::PartialRollbackFailure;
use crate::orchestrator::{
    DatabaseStepResult, FinalizeResult, MigrationState, MigrationStatusReport,
    MigrationTriggerResult, OperationReport, OperationStepResult, RollbackOutcome,
    StepOrchestrator,
};

/// Application state for provisioning handlers
pub struct ProvisioningAppState {
    pub orchestrator: Arc<StepOrchestrator>,
    pub internal_api_key: Option<String>,
}

impl InternalKeySource for ProvisioningAppState {
    fn internal_api_key(&self) -> Option<&str> {
        self.internal_api_key.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub tenant_id: Uuid,
    /// Deploy operation to await; only read by `finalize`
    #[serde(default)]
    pub operation_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StepAck {
    #[schema(example = "ok")]
    pub status: String,
}

impl StepAck {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MigrationsQuery {
    /// Run the job instead of reconciling its definition
    #[serde(default)]
    pub trigger: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct NameQuery {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}

fn required_name(query: NameQuery) -> Result<String, Problem> {
    query
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Problem::bad_request("Missing name parameter"))
}

#[utoipa::path(
    tag = "Provisioning",
    post,
    path = "/internal/provisioning/database",
    request_body = StepRequest,
    responses(
        (status = 200, description = "Database provisioned", body = DatabaseStepResult),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 404, description = "Tenant not found"),
        (status = 503, description = "Database provider not initialized"),
    )
)]
async fn provision_database(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Json(request): Json<StepRequest>,
) -> Result<impl IntoResponse, Problem> {
    let result = state.orchestrator.provision_database(request.tenant_id).await?;
    Ok(Json(result))
}

#[utoipa::path(
    tag = "Provisioning",
    post,
    path = "/internal/provisioning/migrations",
    request_body = StepRequest,
    params(MigrationsQuery),
    responses(
        (status = 200, description = "Job reconciled (or triggered when trigger=true)", body = MigrationTriggerResult),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 422, description = "Tenant is missing a prerequisite"),
        (status = 504, description = "Operation timed out"),
    )
)]
async fn migrations(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Query(query): Query<MigrationsQuery>,
    Json(request): Json<StepRequest>,
) -> Result<impl IntoResponse, Problem> {
    let response = if query.trigger {
        Json(state.orchestrator.trigger_migration_job(request.tenant_id).await?).into_response()
    } else {
        Json(state.orchestrator.ensure_migration_job(request.tenant_id).await?).into_response()
    };
    Ok(response)
}

#[utoipa::path(
    tag = "Provisioning",
    post,
    path = "/internal/provisioning/service",
    request_body = StepRequest,
    responses(
        (status = 200, description = "Deployment started", body = OperationStepResult),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 422, description = "Tenant is missing a prerequisite"),
    )
)]
async fn start_deploy_service(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Json(request): Json<StepRequest>,
) -> Result<impl IntoResponse, Problem> {
    let result = state.orchestrator.start_deploy_service(request.tenant_id).await?;
    Ok(Json(result))
}

#[utoipa::path(
    tag = "Provisioning",
    post,
    path = "/internal/provisioning/finalize",
    request_body = StepRequest,
    responses(
        (status = 200, description = "Service ready and public", body = FinalizeResult),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 502, description = "Deployment failed"),
        (status = 504, description = "Deployment timed out"),
    )
)]
async fn finalize_deploy_service(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Json(request): Json<StepRequest>,
) -> Result<impl IntoResponse, Problem> {
    let result = state
        .orchestrator
        .finalize_deploy_service(request.tenant_id, request.operation_name)
        .await?;
    Ok(Json(result))
}

#[utoipa::path(
    tag = "Provisioning",
    post,
    path = "/internal/provisioning/domain",
    request_body = StepRequest,
    responses(
        (status = 200, description = "Domain configured", body = DomainOutcome),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 422, description = "Tenant has no subdomain"),
    )
)]
async fn configure_domain(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Json(request): Json<StepRequest>,
) -> Result<impl IntoResponse, Problem> {
    let result = state.orchestrator.configure_domain(request.tenant_id).await?;
    Ok(Json(result))
}

#[utoipa::path(
    tag = "Provisioning",
    post,
    path = "/internal/provisioning/activate",
    request_body = StepRequest,
    responses(
        (status = 200, description = "Tenant active", body = StepAck),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 409, description = "Tenant cannot be activated"),
        (status = 422, description = "Tenant is missing a prerequisite"),
    )
)]
async fn activate(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Json(request): Json<StepRequest>,
) -> Result<impl IntoResponse, Problem> {
    state.orchestrator.activate(request.tenant_id).await?;
    Ok(Json(StepAck::ok()))
}

#[utoipa::path(
    tag = "Provisioning",
    post,
    path = "/internal/provisioning/rollback",
    request_body = StepRequest,
    responses(
        (status = 200, description = "Resources released, tenant marked failed", body = RollbackOutcome),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 404, description = "Tenant not found"),
    )
)]
async fn rollback(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Json(request): Json<StepRequest>,
) -> Result<impl IntoResponse, Problem> {
    let result = state.orchestrator.rollback(request.tenant_id).await?;
    Ok(Json(result))
}

#[utoipa::path(
    tag = "Provisioning",
    get,
    path = "/internal/provisioning/migrations/status",
    params(NameQuery),
    responses(
        (status = 200, description = "Migration execution state", body = MigrationStatusReport),
        (status = 400, description = "Missing name parameter"),
        (status = 401, description = "Missing or invalid internal key"),
    )
)]
async fn migration_status(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Query(query): Query<NameQuery>,
) -> Result<impl IntoResponse, Problem> {
    let name = required_name(query)?;
    let report = state.orchestrator.migration_status(&name).await?;
    Ok(Json(report))
}

#[utoipa::path(
    tag = "Provisioning",
    get,
    path = "/internal/provisioning/operations",
    params(NameQuery),
    responses(
        (status = 200, description = "Long-running operation state", body = OperationReport),
        (status = 400, description = "Missing name parameter"),
        (status = 401, description = "Missing or invalid internal key"),
    )
)]
async fn operation_status(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Query(query): Query<NameQuery>,
) -> Result<impl IntoResponse, Problem> {
    let name = required_name(query)?;
    let report = state.orchestrator.operation_status(&name).await?;
    Ok(Json(report))
}

#[utoipa::path(
    tag = "Provisioning",
    get,
    path = "/internal/provisioning/domain/status",
    params(TenantQuery),
    responses(
        (status = 200, description = "Edge view of the tenant hostname", body = DomainStatus),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 422, description = "Tenant has no subdomain"),
    )
)]
async fn domain_status(
    _auth: RequireInternalKey,
    State(state): State<Arc<ProvisioningAppState>>,
    Query(query): Query<TenantQuery>,
) -> Result<impl IntoResponse, Problem> {
    let status = state.orchestrator.domain_status(query.tenant_id).await?;
    Ok(Json(status))
}

pub fn configure_routes() -> Router<Arc<ProvisioningAppState>> {
    Router::new()
        .route("/internal/provisioning/database", post(provision_database))
        .route("/internal/provisioning/migrations", post(migrations))
        .route("/internal/provisioning/service", post(start_deploy_service))
        .route("/internal/provisioning/finalize", post(finalize_deploy_service))
        .route("/internal/provisioning/domain", post(configure_domain))
        .route("/internal/provisioning/activate", post(activate))
        .route("/internal/provisioning/rollback", post(rollback))
        .route(
            "/internal/provisioning/migrations/status",
            get(migration_status),
        )
        .route("/internal/provisioning/operations", get(operation_status))
        .route("/internal/provisioning/domain/status", get(domain_status))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        provision_database,
        migrations,
        start_deploy_service,
        finalize_deploy_service,
        configure_domain,
        activate,
        rollback,
        migration_status,
        operation_status,
        domain_status,
    ),
    components(
        schemas(
            StepRequest,
            StepAck,
            DatabaseStepResult,
            OperationStepResult,
            MigrationTriggerResult,
            FinalizeResult,
            RollbackOutcome,
            PartialRollbackFailure,
            MigrationState,
            MigrationStatusReport,
            OperationReport,
            DomainOutcome,
            DomainKind,
            AcmeChallenge,
            DomainStatus,
        )
    ),
    tags(
        (name = "Provisioning", description = "Per-tenant provisioning steps")
    )
)]
pub struct ProvisioningApiDoc;
