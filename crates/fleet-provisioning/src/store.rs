//! Tenant record persistence used by the provisioning steps

use async_trait::async_trait;
use fleet_entities::types::{ProvisioningEventStatus, TenantPlan, TenantStatus};
use fleet_entities::{tenant_provisioning_events, tenants};
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlErr,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::ProvisioningError;

/// Field changes a step writes back to the tenant row. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub plan: Option<TenantPlan>,
    /// `Some(None)` clears the URL
    pub database_url: Option<Option<String>>,
    /// `Some(None)` clears the URL
    pub api_url: Option<Option<String>>,
    pub status: Option<TenantStatus>,
    /// `Some(None)` clears the reason
    pub failure_reason: Option<Option<String>>,
    /// Shallow-merged into metadata; a `null` value removes the key
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTenant {
    pub name: String,
    pub merchant_email: String,
    pub subdomain: Option<String>,
    pub plan: TenantPlan,
    pub release_channel: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProvisioningEvent {
    pub tenant_id: Uuid,
    pub step: String,
    pub status: ProvisioningEventStatus,
    pub details: Option<Value>,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_tenant(&self, id: Uuid) -> Result<tenants::Model, ProvisioningError>;

    async fn create_tenant(&self, tenant: NewTenant) -> Result<tenants::Model, ProvisioningError>;

    async fn update_tenant(
        &self,
        id: Uuid,
        update: TenantUpdate,
    ) -> Result<tenants::Model, ProvisioningError>;

    /// Tenants that have not been soft-deleted, oldest first.
    async fn list_tenants(&self) -> Result<Vec<tenants::Model>, ProvisioningError>;

    /// Mark a tenant deleted. Already-deleted tenants report not found.
    async fn soft_delete_tenant(&self, id: Uuid) -> Result<tenants::Model, ProvisioningError>;

    async fn append_event(&self, event: NewProvisioningEvent) -> Result<(), ProvisioningError>;

    /// Events for a tenant, oldest first.
    async fn list_events(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<tenant_provisioning_events::Model>, ProvisioningError>;
}

pub struct SeaOrmTenantStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmTenantStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn subdomain_taken(&self, subdomain: &str) -> Result<bool, ProvisioningError> {
        let existing = tenants::Entity::find()
            .filter(tenants::Column::Subdomain.eq(subdomain))
            .filter(tenants::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await?;
        Ok(existing.is_some())
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn merge_metadata(current: Option<Value>, patch: Map<String, Value>) -> Value {
    let mut merged = match current {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for (key, value) in patch {
        if value.is_null() {
            merged.remove(&key);
        } else {
            merged.insert(key, value);
        }
    }
    Value::Object(merged)
}

#[async_trait]
impl TenantStore for SeaOrmTenantStore {
    async fn find_tenant(&self, id: Uuid) -> Result<tenants::Model, ProvisioningError> {
        tenants::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or(ProvisioningError::TenantNotFound(id))
    }

    async fn create_tenant(&self, tenant: NewTenant) -> Result<tenants::Model, ProvisioningError> {
        if tenant.name.trim().is_empty() {
            return Err(ProvisioningError::Validation("Tenant name is required".to_string()));
        }
        if !tenant.merchant_email.contains('@') {
            return Err(ProvisioningError::Validation(format!(
                "Invalid merchant email: {}",
                tenant.merchant_email
            )));
        }
        let subdomain = tenant
            .subdomain
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        if let Some(subdomain) = &subdomain {
            if self.subdomain_taken(subdomain).await? {
                return Err(ProvisioningError::SubdomainInUse(subdomain.clone()));
            }
        }

        let model = tenants::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(tenant.name),
            merchant_email: Set(tenant.merchant_email),
            subdomain: Set(subdomain.clone()),
            database_url: Set(None),
            api_url: Set(None),
            redis_hash: Set(Some(random_hex(8))),
            status: Set(TenantStatus::Provisioning),
            plan: Set(tenant.plan),
            jwt_secret: Set(random_hex(32)),
            cookie_secret: Set(random_hex(32)),
            current_image_tag: Set(None),
            release_channel: Set(tenant.release_channel),
            failure_reason: Set(None),
            metadata: Set(None),
            deleted_at: Set(None),
            ..Default::default()
        };

        // The partial unique index still guards against a concurrent insert
        match model.insert(self.db.as_ref()).await {
            Ok(created) => {
                debug!("Created tenant {} in provisioning", created.id);
                Ok(created)
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Err(
                ProvisioningError::SubdomainInUse(subdomain.unwrap_or_default()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_tenant(
        &self,
        id: Uuid,
        update: TenantUpdate,
    ) -> Result<tenants::Model, ProvisioningError> {
        let current = self.find_tenant(id).await?;
        let metadata = update
            .metadata
            .map(|patch| merge_metadata(current.metadata.clone(), patch));

        let mut active: tenants::ActiveModel = current.into();
        if let Some(name) = update.name {
            active.name = Set(name);
        }
        if let Some(plan) = update.plan {
            active.plan = Set(plan);
        }
        if let Some(database_url) = update.database_url {
            active.database_url = Set(database_url);
        }
        if let Some(api_url) = update.api_url {
            active.api_url = Set(api_url);
        }
        if let Some(status) = update.status {
            active.status = Set(status);
        }
        if let Some(reason) = update.failure_reason {
            active.failure_reason = Set(reason);
        }
        if let Some(metadata) = metadata {
            active.metadata = Set(Some(metadata));
        }

        Ok(active.update(self.db.as_ref()).await?)
    }

    async fn list_tenants(&self) -> Result<Vec<tenants::Model>, ProvisioningError> {
        Ok(tenants::Entity::find()
            .filter(tenants::Column::DeletedAt.is_null())
            .order_by_asc(tenants::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    async fn soft_delete_tenant(&self, id: Uuid) -> Result<tenants::Model, ProvisioningError> {
        let current = self.find_tenant(id).await?;
        if current.deleted_at.is_some() {
            return Err(ProvisioningError::TenantNotFound(id));
        }

        let mut active: tenants::ActiveModel = current.into();
        active.status = Set(TenantStatus::Deleted);
        active.deleted_at = Set(Some(fleet_core::utc_now()));
        let deleted = active.update(self.db.as_ref()).await?;

        info!("Soft-deleted tenant {}", id);
        Ok(deleted)
    }

    async fn append_event(&self, event: NewProvisioningEvent) -> Result<(), ProvisioningError> {
        tenant_provisioning_events::ActiveModel {
            tenant_id: Set(event.tenant_id),
            step: Set(event.step),
            status: Set(event.status),
            details: Set(event.details),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    async fn list_events(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<tenant_provisioning_events::Model>, ProvisioningError> {
        Ok(tenant_provisioning_events::Entity::find()
            .filter(tenant_provisioning_events::Column::TenantId.eq(tenant_id))
            .order_by_asc(tenant_provisioning_events::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }
}
