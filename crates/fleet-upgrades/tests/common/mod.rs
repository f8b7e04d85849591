#![allow(dead_code)]

use fleet_database::test_utils::TestDatabase;
use fleet_entities::tenant_upgrade_executions as executions;
use fleet_entities::tenants;
use fleet_entities::types::{ExecutionStatus, TenantPlan, TenantStatus};
use fleet_upgrades::UpgradeCampaignScheduler;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use uuid::Uuid;

pub struct Fleet {
    pub test_db: TestDatabase,
    pub scheduler: Arc<UpgradeCampaignScheduler>,
}

impl Fleet {
    pub async fn new() -> Self {
        Self::on(TestDatabase::new().await.unwrap())
    }

    /// Backed by a pool, so concurrent scheduler calls hit separate connections.
    pub async fn pooled(connections: u32) -> Self {
        Self::on(TestDatabase::pooled(connections).await.unwrap())
    }

    fn on(test_db: TestDatabase) -> Self {
        let scheduler = Arc::new(UpgradeCampaignScheduler::new(test_db.connection()));
        Self { test_db, scheduler }
    }

    pub async fn tenant(&self, channel: &str, status: TenantStatus) -> tenants::Model {
        let id = Uuid::new_v4();
        tenants::ActiveModel {
            id: Set(id),
            name: Set(format!("Tenant {}", id)),
            merchant_email: Set("ops@tenant.test".to_string()),
            subdomain: Set(Some(format!("t{}", id.simple()))),
            status: Set(status),
            plan: Set(TenantPlan::Starter),
            jwt_secret: Set("jwt".to_string()),
            cookie_secret: Set("cookie".to_string()),
            current_image_tag: Set(Some("tenant:v1".to_string())),
            release_channel: Set(channel.to_string()),
            ..Default::default()
        }
        .insert(self.test_db.db.as_ref())
        .await
        .unwrap()
    }

    pub async fn active_tenants(&self, channel: &str, count: usize) -> Vec<tenants::Model> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            created.push(self.tenant(channel, TenantStatus::Active).await);
        }
        created
    }

    pub async fn reload_tenant(&self, id: Uuid) -> tenants::Model {
        tenants::Entity::find_by_id(id)
            .one(self.test_db.db.as_ref())
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn executions(&self, campaign_id: Uuid) -> Vec<executions::Model> {
        executions::Entity::find()
            .filter(executions::Column::CampaignId.eq(campaign_id))
            .all(self.test_db.db.as_ref())
            .await
            .unwrap()
    }

    pub async fn count_with(&self, campaign_id: Uuid, status: ExecutionStatus) -> usize {
        self.executions(campaign_id)
            .await
            .iter()
            .filter(|e| e.status == status)
            .count()
    }
}
