//! Tenant records over HTTP: create, read, list, patch and soft-delete

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use fleet_core::internal_auth::{InternalKeySource, RequireInternalKey};
use fleet_core::problemdetails::Problem;
use fleet_core::DBDateTime;
use fleet_entities::tenants;
use fleet_entities::types::{TenantPlan, TenantStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::errors::ProvisioningError;
use crate::store::{NewTenant, TenantStore, TenantUpdate};

pub const DEFAULT_RELEASE_CHANNEL: &str = "stable";

pub struct TenantsAppState {
    pub store: Arc<dyn TenantStore>,
    pub internal_api_key: Option<String>,
}

impl InternalKeySource for TenantsAppState {
    fn internal_api_key(&self) -> Option<&str> {
        self.internal_api_key.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantRequest {
    #[schema(example = "Acme Store")]
    pub name: String,
    pub merchant_email: String,
    /// Platform token (`acme`) or a custom hostname (`shop.example.org`)
    pub subdomain: Option<String>,
    pub plan: Option<TenantPlan>,
    pub release_channel: Option<String>,
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub plan: Option<TenantPlan>,
    pub status: Option<TenantStatus>,
    /// Shallow-merged; a `null` member removes the key
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Map<String, Value>>,
}

/// Tenant as exposed over the API. Secrets and the database URL stay server-side.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantResponse {
    pub id: Uuid,
    pub name: String,
    pub merchant_email: String,
    pub subdomain: Option<String>,
    pub status: TenantStatus,
    pub plan: TenantPlan,
    pub api_url: Option<String>,
    pub current_image_tag: Option<String>,
    pub release_channel: String,
    pub failure_reason: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<Value>,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DBDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DBDateTime,
}

impl From<tenants::Model> for TenantResponse {
    fn from(tenant: tenants::Model) -> Self {
        Self {
            id: tenant.id,
            name: tenant.name,
            merchant_email: tenant.merchant_email,
            subdomain: tenant.subdomain,
            status: tenant.status,
            plan: tenant.plan,
            api_url: tenant.api_url,
            current_image_tag: tenant.current_image_tag,
            release_channel: tenant.release_channel,
            failure_reason: tenant.failure_reason,
            metadata: tenant.metadata,
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
        }
    }
}

/// Soft-deleted tenants are invisible to every route here.
async fn live_tenant(
    store: &dyn TenantStore,
    id: Uuid,
) -> Result<tenants::Model, ProvisioningError> {
    let tenant = store.find_tenant(id).await?;
    if tenant.deleted_at.is_some() {
        return Err(ProvisioningError::TenantNotFound(id));
    }
    Ok(tenant)
}

#[utoipa::path(
    tag = "Tenants",
    post,
    path = "/api/tenants",
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created in provisioning", body = TenantResponse),
        (status = 400, description = "Invalid tenant fields"),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 409, description = "Subdomain already in use"),
    )
)]
async fn create_tenant(
    _auth: RequireInternalKey,
    State(state): State<Arc<TenantsAppState>>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<impl IntoResponse, Problem> {
    let tenant = state
        .store
        .create_tenant(NewTenant {
            name: request.name,
            merchant_email: request.merchant_email,
            subdomain: request.subdomain,
            plan: request.plan.unwrap_or(TenantPlan::Free),
            release_channel: request
                .release_channel
                .unwrap_or_else(|| DEFAULT_RELEASE_CHANNEL.to_string()),
        })
        .await?;

    info!("Tenant {} created", tenant.id);
    Ok((StatusCode::CREATED, Json(TenantResponse::from(tenant))))
}

#[utoipa::path(
    tag = "Tenants",
    get,
    path = "/api/tenants",
    responses(
        (status = 200, description = "Tenants that have not been deleted", body = Vec<TenantResponse>),
        (status = 401, description = "Missing or invalid internal key"),
    )
)]
async fn list_tenants(
    _auth: RequireInternalKey,
    State(state): State<Arc<TenantsAppState>>,
) -> Result<impl IntoResponse, Problem> {
    let tenants = state.store.list_tenants().await?;
    Ok(Json(
        tenants
            .into_iter()
            .map(TenantResponse::from)
            .collect::<Vec<_>>(),
    ))
}

#[utoipa::path(
    tag = "Tenants",
    get,
    path = "/api/tenants/{id}",
    params(("id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 200, description = "Tenant", body = TenantResponse),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 404, description = "Tenant not found"),
    )
)]
async fn get_tenant(
    _auth: RequireInternalKey,
    State(state): State<Arc<TenantsAppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    let tenant = live_tenant(state.store.as_ref(), id).await?;
    Ok(Json(TenantResponse::from(tenant)))
}

#[utoipa::path(
    tag = "Tenants",
    patch,
    path = "/api/tenants/{id}",
    params(("id" = Uuid, Path, description = "Tenant ID")),
    request_body = UpdateTenantRequest,
    responses(
        (status = 200, description = "Updated tenant", body = TenantResponse),
        (status = 400, description = "Invalid tenant fields"),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 404, description = "Tenant not found"),
        (status = 409, description = "Status transition not allowed"),
    )
)]
async fn update_tenant(
    _auth: RequireInternalKey,
    State(state): State<Arc<TenantsAppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTenantRequest>,
) -> Result<impl IntoResponse, Problem> {
    let current = live_tenant(state.store.as_ref(), id).await?;

    if let Some(name) = &request.name {
        if name.trim().is_empty() {
            return Err(Problem::bad_request("Tenant name must not be empty"));
        }
    }
    if let Some(status) = request.status {
        if status == TenantStatus::Deleted {
            return Err(Problem::bad_request(
                "Use DELETE /api/tenants/{id} to delete a tenant",
            ));
        }
        if !current.status.can_transition_to(status) {
            return Err(ProvisioningError::InvalidTransition {
                from: current.status,
                to: status,
            }
            .into());
        }
    }

    let updated = state
        .store
        .update_tenant(
            id,
            TenantUpdate {
                name: request.name,
                plan: request.plan,
                status: request.status,
                metadata: request.metadata,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(TenantResponse::from(updated)))
}

#[utoipa::path(
    tag = "Tenants",
    delete,
    path = "/api/tenants/{id}",
    params(("id" = Uuid, Path, description = "Tenant ID")),
    responses(
        (status = 204, description = "Tenant marked deleted"),
        (status = 401, description = "Missing or invalid internal key"),
        (status = 404, description = "Tenant not found"),
    )
)]
async fn delete_tenant(
    _auth: RequireInternalKey,
    State(state): State<Arc<TenantsAppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Problem> {
    state.store.soft_delete_tenant(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure_tenant_routes() -> Router<Arc<TenantsAppState>> {
    Router::new()
        .route("/api/tenants", get(list_tenants).post(create_tenant))
        .route(
            "/api/tenants/{id}",
            get(get_tenant).patch(update_tenant).delete(delete_tenant),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(create_tenant, list_tenants, get_tenant, update_tenant, delete_tenant),
    components(schemas(
        CreateTenantRequest,
        UpdateTenantRequest,
        TenantResponse,
        TenantStatus,
        TenantPlan
    )),
    tags((name = "Tenants", description = "Tenant records"))
)]
pub struct TenantsApiDoc;
