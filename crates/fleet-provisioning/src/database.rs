//! Per-tenant database and role lifecycle on a shared branch

use fleet_providers::{DatabaseApi, ProviderError};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::branch_cache::BranchIdCache;
use crate::errors::ProvisioningError;

/// Branch used when the project flags none as default
pub const FALLBACK_BRANCH_ID: &str = "production";

pub fn role_name(tenant_id: Uuid) -> String {
    format!("user_{}", tenant_id.to_string().replace('-', "_"))
}

pub fn database_name(tenant_id: Uuid) -> String {
    format!("db_{}", tenant_id.to_string().replace('-', "_"))
}

pub struct DatabaseProvisioner {
    api: Arc<dyn DatabaseApi>,
    project_id: String,
    branch_cache: Arc<BranchIdCache>,
}

impl DatabaseProvisioner {
    pub fn new(
        api: Arc<dyn DatabaseApi>,
        project_id: impl Into<String>,
        branch_cache: Arc<BranchIdCache>,
    ) -> Self {
        Self {
            api,
            project_id: project_id.into(),
            branch_cache,
        }
    }

    /// Resolve the project's default branch through the cache.
    pub async fn resolve_branch(&self) -> Result<String, ProvisioningError> {
        let api = self.api.clone();
        let project_id = self.project_id.clone();

        self.branch_cache
            .get_or_resolve(&self.project_id, || async move {
                let branches = api.list_branches(&project_id).await?;
                let branch_id = branches
                    .into_iter()
                    .find(|b| b.default)
                    .map(|b| b.id)
                    .unwrap_or_else(|| {
                        warn!(
                            "No default branch flagged in project {}, using {}",
                            project_id, FALLBACK_BRANCH_ID
                        );
                        FALLBACK_BRANCH_ID.to_string()
                    });
                Ok::<_, ProvisioningError>(branch_id)
            })
            .await
    }

    async fn resolve_host(&self, branch_id: &str) -> Result<String, ProvisioningError> {
        let endpoints = self
            .api
            .list_branch_endpoints(&self.project_id, branch_id)
            .await?;

        endpoints
            .iter()
            .find(|e| e.endpoint_type == "read_write")
            .or_else(|| endpoints.first())
            .map(|e| e.host.clone())
            .ok_or_else(|| {
                ProviderError::UnexpectedResponse(format!(
                    "No endpoint found for the branch: {}",
                    branch_id
                ))
                .into()
            })
    }

    /// Create the tenant's role and database and return the connection URI.
    pub async fn create_tenant_database(&self, tenant_id: Uuid) -> Result<String, ProvisioningError> {
        let branch_id = self.resolve_branch().await?;
        let host = self.resolve_host(&branch_id).await?;

        let role = role_name(tenant_id);
        let database = database_name(tenant_id);

        info!("Creating role {} on branch {}", role, branch_id);
        let created = self
            .api
            .create_role(&self.project_id, &branch_id, &role)
            .await?;
        let password = created.password.ok_or_else(|| {
            ProviderError::UnexpectedResponse(
                "Failed to obtain password for tenant role".to_string(),
            )
        })?;

        info!("Creating database {} owned by {}", database, role);
        self.api
            .create_database(&self.project_id, &branch_id, &database, &role)
            .await?;

        Ok(format!(
            "postgres://{}:{}@{}/{}?sslmode=require",
            role,
            urlencoding::encode(&password),
            host,
            database
        ))
    }

    /// Delete the tenant's database, then its role.
    ///
    /// Not-found is ignored on either call. Other failures are logged, do not
    /// stop the second call, and the first of them is returned.
    pub async fn delete_tenant_database(&self, tenant_id: Uuid) -> Result<(), ProvisioningError> {
        let branch_id = self.resolve_branch().await?;
        let role = role_name(tenant_id);
        let database = database_name(tenant_id);

        let database_result = self
            .api
            .delete_database(&self.project_id, &branch_id, &database)
            .await;
        let database_result = tolerate_not_found("database", &database, database_result);

        let role_result = self
            .api
            .delete_role(&self.project_id, &branch_id, &role)
            .await;
        let role_result = tolerate_not_found("role", &role, role_result);

        database_result.and(role_result)
    }
}

fn tolerate_not_found(
    kind: &str,
    name: &str,
    result: Result<(), ProviderError>,
) -> Result<(), ProvisioningError> {
    match result {
        Ok(()) => {
            info!("Deleted {} {}", kind, name);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            info!("{} {} not found, skipping delete", kind, name);
            Ok(())
        }
        Err(e) => {
            warn!("Failed to delete {} {}: {}", kind, name, e);
            Err(e.into())
        }
    }
}
