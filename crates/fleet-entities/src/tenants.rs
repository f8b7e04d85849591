use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use fleet_core::DBDateTime;

use crate::types::{TenantPlan, TenantStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub merchant_email: String,
    /// Either a bare platform token (`acme`) or a custom hostname (`shop.example.org`)
    pub subdomain: Option<String>,
    pub database_url: Option<String>,
    pub api_url: Option<String>,
    pub redis_hash: Option<String>,
    pub status: TenantStatus,
    pub plan: TenantPlan,
    pub jwt_secret: String,
    pub cookie_secret: String,
    pub current_image_tag: Option<String>,
    pub release_channel: String,
    pub failure_reason: Option<String>,
    pub metadata: Option<Json>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
    pub deleted_at: Option<DBDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tenant_provisioning_events::Entity")]
    ProvisioningEvents,
    #[sea_orm(has_many = "super::tenant_upgrade_executions::Entity")]
    UpgradeExecutions,
}

impl Related<super::tenant_provisioning_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProvisioningEvents.def()
    }
}

impl Related<super::tenant_upgrade_executions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UpgradeExecutions.def()
    }
}

impl Model {
    /// Read a string member out of the metadata document.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = fleet_core::utc_now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
