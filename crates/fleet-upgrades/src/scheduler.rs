//! Upgrade campaign admission control
//!
//! Executions move `queued -> snapshotting -> ... -> completed | failed | rolled_back`.
//! The scheduler owns the `queued -> snapshotting` edge (the batch claim); every
//! later edge is reported by the upgrade driver through
//! [`UpgradeCampaignScheduler::update_execution_status`].

use chrono::Utc;
use fleet_entities::types::{CampaignStatus, ExecutionStatus, TenantStatus};
use fleet_entities::{tenant_upgrade_executions as executions, tenants, upgrade_campaigns as campaigns};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait, TransactionTrait,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::UpgradeError;

/// In-flight ceiling used when a campaign does not set one
pub const DEFAULT_BATCH_SIZE: i32 = 10;
pub const DEFAULT_FAILURE_THRESHOLD_PERCENT: i32 = 10;

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub target_image_tag: String,
    pub channel: String,
    pub batch_size: Option<i32>,
    pub failure_threshold_percent: Option<i32>,
}

impl NewCampaign {
    pub fn new(target_image_tag: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            target_image_tag: target_image_tag.into(),
            channel: channel.into(),
            batch_size: None,
            failure_threshold_percent: None,
        }
    }

    fn validate(&self) -> Result<(), UpgradeError> {
        if self.target_image_tag.trim().is_empty() {
            return Err(UpgradeError::Validation(
                "targetImageTag must not be empty".to_string(),
            ));
        }
        if self.channel.trim().is_empty() {
            return Err(UpgradeError::Validation(
                "channel must not be empty".to_string(),
            ));
        }
        if matches!(self.batch_size, Some(size) if size < 1) {
            return Err(UpgradeError::Validation(
                "batchSize must be at least 1".to_string(),
            ));
        }
        if matches!(self.failure_threshold_percent, Some(p) if !(0..=100).contains(&p)) {
            return Err(UpgradeError::Validation(
                "failureThresholdPercent must be between 0 and 100".to_string(),
            ));
        }
        Ok(())
    }
}

/// One claimed execution handed to the upgrade driver.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub execution_id: Uuid,
    pub tenant_id: Uuid,
    pub target_image_tag: String,
    pub current_image_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NextBatch {
    pub batch: Vec<BatchItem>,
    pub campaign_status: CampaignStatus,
}

impl NextBatch {
    fn empty(campaign_status: CampaignStatus) -> Self {
        Self {
            batch: Vec::new(),
            campaign_status,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
    pub id: Uuid,
    pub target_image_tag: String,
    pub channel: String,
    pub status: CampaignStatus,
    pub batch_size: i32,
    pub failure_threshold_percent: i32,
    pub total: u64,
    /// Execution count per status; statuses with no executions are omitted
    pub counts: BTreeMap<String, u64>,
    pub created_at: chrono::DateTime<Utc>,
}

pub struct UpgradeCampaignScheduler {
    db: Arc<DatabaseConnection>,
}

impl UpgradeCampaignScheduler {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a campaign and queue every active tenant on its channel.
    ///
    /// Campaign and executions are written in one transaction. A channel with
    /// no active tenants still yields a (empty) campaign.
    pub async fn create_campaign(
        &self,
        request: NewCampaign,
    ) -> Result<campaigns::Model, UpgradeError> {
        request.validate()?;
        info!(
            "Creating upgrade campaign to {} on channel {}",
            request.target_image_tag, request.channel
        );

        let txn = self.db.begin().await?;

        let campaign = campaigns::ActiveModel {
            id: Set(Uuid::new_v4()),
            target_image_tag: Set(request.target_image_tag.clone()),
            release_channel: Set(request.channel.clone()),
            status: Set(CampaignStatus::Pending),
            batch_size: Set(request.batch_size.unwrap_or(DEFAULT_BATCH_SIZE)),
            failure_threshold_percent: Set(request
                .failure_threshold_percent
                .unwrap_or(DEFAULT_FAILURE_THRESHOLD_PERCENT)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let eligible: Vec<Uuid> = tenants::Entity::find()
            .select_only()
            .column(tenants::Column::Id)
            .filter(tenants::Column::ReleaseChannel.eq(request.channel.as_str()))
            .filter(tenants::Column::Status.eq(TenantStatus::Active))
            .order_by_asc(tenants::Column::CreatedAt)
            .into_tuple()
            .all(&txn)
            .await?;

        if eligible.is_empty() {
            warn!(
                "No eligible tenants found on channel {} for campaign {}",
                request.channel, campaign.id
            );
            txn.commit().await?;
            return Ok(campaign);
        }

        let now = Utc::now();
        let rows = eligible
            .iter()
            .map(|tenant_id| executions::ActiveModel {
                id: Set(Uuid::new_v4()),
                campaign_id: Set(campaign.id),
                tenant_id: Set(*tenant_id),
                status: Set(ExecutionStatus::Queued),
                logs: Set(None),
                started_at: Set(None),
                finished_at: Set(None),
                created_at: Set(now),
            });
        executions::Entity::insert_many(rows)
            .exec_without_returning(&txn)
            .await?;

        txn.commit().await?;

        info!(
            "Queued {} tenants for upgrade campaign {}",
            eligible.len(),
            campaign.id
        );
        Ok(campaign)
    }

    /// Claim up to `batch_size` queued executions, bounded by the campaign's
    /// in-flight ceiling.
    ///
    /// The claim is a single conditional update: only rows still `queued`
    /// flip to `snapshotting`, and only flipped rows are returned, so two
    /// concurrent callers never receive the same execution.
    pub async fn get_next_batch(
        &self,
        campaign_id: Uuid,
        batch_size: u64,
    ) -> Result<NextBatch, UpgradeError> {
        let campaign = self.find_campaign(campaign_id).await?;
        if campaign.status.is_halted() {
            debug!(
                "Campaign {} is {}, handing out no batch",
                campaign_id, campaign.status
            );
            return Ok(NextBatch::empty(campaign.status));
        }

        let status = if campaign.status == CampaignStatus::Pending {
            self.start_if_pending(campaign_id).await?
        } else {
            campaign.status
        };
        if status.is_halted() {
            return Ok(NextBatch::empty(status));
        }

        let in_flight = executions::Entity::find()
            .filter(executions::Column::CampaignId.eq(campaign_id))
            .filter(executions::Column::Status.is_in(ExecutionStatus::IN_FLIGHT))
            .count(self.db.as_ref())
            .await?;

        let ceiling = if campaign.batch_size > 0 {
            campaign.batch_size as u64
        } else {
            DEFAULT_BATCH_SIZE as u64
        };
        let available = ceiling.saturating_sub(in_flight);
        let fetch = batch_size.min(available);
        if fetch == 0 {
            debug!(
                "Campaign {} has {} executions in flight (ceiling {}), no slots free",
                campaign_id, in_flight, ceiling
            );
            return Ok(NextBatch::empty(status));
        }

        let oldest_queued = executions::Entity::find()
            .select_only()
            .column(executions::Column::Id)
            .filter(executions::Column::CampaignId.eq(campaign_id))
            .filter(executions::Column::Status.eq(ExecutionStatus::Queued))
            .order_by_asc(executions::Column::CreatedAt)
            .limit(fetch)
            .into_query();

        let mut claimed = executions::Entity::update_many()
            .col_expr(
                executions::Column::Status,
                Expr::value(ExecutionStatus::Snapshotting),
            )
            .col_expr(executions::Column::StartedAt, Expr::value(Utc::now()))
            .filter(executions::Column::Id.in_subquery(oldest_queued))
            .filter(executions::Column::Status.eq(ExecutionStatus::Queued))
            .exec_with_returning(self.db.as_ref())
            .await?;

        if claimed.is_empty() {
            return Ok(NextBatch::empty(status));
        }
        claimed.sort_by_key(|e| e.created_at);

        let current_tags: HashMap<Uuid, Option<String>> = tenants::Entity::find()
            .select_only()
            .column(tenants::Column::Id)
            .column(tenants::Column::CurrentImageTag)
            .filter(tenants::Column::Id.is_in(claimed.iter().map(|e| e.tenant_id)))
            .into_tuple::<(Uuid, Option<String>)>()
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .collect();

        let batch: Vec<BatchItem> = claimed
            .into_iter()
            .map(|execution| BatchItem {
                execution_id: execution.id,
                tenant_id: execution.tenant_id,
                target_image_tag: campaign.target_image_tag.clone(),
                current_image_tag: current_tags.get(&execution.tenant_id).cloned().flatten(),
            })
            .collect();

        info!(
            "Claimed {} executions for campaign {} ({} already in flight)",
            batch.len(),
            campaign_id,
            in_flight
        );
        Ok(NextBatch {
            batch,
            campaign_status: status,
        })
    }

    /// Record progress reported by the upgrade driver.
    ///
    /// A completed execution moves the tenant onto the campaign's target tag.
    /// A failed one re-evaluates the campaign's failure rate and may halt it.
    pub async fn update_execution_status(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        logs: Option<Value>,
    ) -> Result<executions::Model, UpgradeError> {
        info!("Updating execution {} to {}", execution_id, status);

        let txn = self.db.begin().await?;

        let execution = executions::Entity::find_by_id(execution_id)
            .one(&txn)
            .await?
            .ok_or(UpgradeError::ExecutionNotFound(execution_id))?;
        let campaign_id = execution.campaign_id;
        let tenant_id = execution.tenant_id;

        let now = Utc::now();
        let mut active: executions::ActiveModel = execution.into();
        active.status = Set(status);
        if let Some(logs) = logs {
            active.logs = Set(Some(logs));
        }
        if status == ExecutionStatus::Snapshotting {
            active.started_at = Set(Some(now));
        }
        if status.is_terminal() {
            active.finished_at = Set(Some(now));
        }
        let updated = active.update(&txn).await?;

        if status == ExecutionStatus::Completed {
            let campaign = campaigns::Entity::find_by_id(campaign_id)
                .one(&txn)
                .await?
                .ok_or(UpgradeError::CampaignNotFound(campaign_id))?;
            tenants::Entity::update_many()
                .col_expr(
                    tenants::Column::CurrentImageTag,
                    Expr::value(campaign.target_image_tag.clone()),
                )
                .col_expr(tenants::Column::UpdatedAt, Expr::value(now))
                .filter(tenants::Column::Id.eq(tenant_id))
                .exec(&txn)
                .await?;
            debug!(
                "Tenant {} now runs {}",
                tenant_id, campaign.target_image_tag
            );
        }

        txn.commit().await?;

        if status == ExecutionStatus::Failed {
            self.enforce_failure_threshold(campaign_id).await?;
        }

        Ok(updated)
    }

    /// Fail the campaign once its failure rate exceeds the threshold.
    async fn enforce_failure_threshold(&self, campaign_id: Uuid) -> Result<(), UpgradeError> {
        let counts = self.status_counts(campaign_id).await?;
        let total: u64 = counts.values().sum();
        if total == 0 {
            return Ok(());
        }
        let failed = counts
            .get(ExecutionStatus::Failed.as_str())
            .copied()
            .unwrap_or(0);
        let failure_rate = failed as f64 * 100.0 / total as f64;

        let campaign = self.find_campaign(campaign_id).await?;
        if campaign.status == CampaignStatus::Failed
            || failure_rate <= campaign.failure_threshold_percent as f64
        {
            return Ok(());
        }

        warn!(
            "Campaign {} failure rate {:.1}% exceeds threshold {}%, halting",
            campaign_id, failure_rate, campaign.failure_threshold_percent
        );
        self.set_status(campaign, CampaignStatus::Failed).await?;
        Ok(())
    }

    pub async fn pause(&self, campaign_id: Uuid) -> Result<campaigns::Model, UpgradeError> {
        let campaign = self.find_campaign(campaign_id).await?;
        match campaign.status {
            CampaignStatus::Paused => Ok(campaign),
            CampaignStatus::Pending | CampaignStatus::Running => {
                info!("Pausing campaign {}", campaign_id);
                self.set_status(campaign, CampaignStatus::Paused).await
            }
            from => Err(UpgradeError::InvalidTransition {
                from,
                to: CampaignStatus::Paused,
            }),
        }
    }

    pub async fn resume(&self, campaign_id: Uuid) -> Result<campaigns::Model, UpgradeError> {
        let campaign = self.find_campaign(campaign_id).await?;
        match campaign.status {
            CampaignStatus::Paused => {
                info!("Resuming campaign {}", campaign_id);
                self.set_status(campaign, CampaignStatus::Running).await
            }
            CampaignStatus::Pending | CampaignStatus::Running => Ok(campaign),
            from => Err(UpgradeError::InvalidTransition {
                from,
                to: CampaignStatus::Running,
            }),
        }
    }

    /// Mark the campaign completed once nothing is queued or in flight.
    pub async fn complete(&self, campaign_id: Uuid) -> Result<campaigns::Model, UpgradeError> {
        let campaign = self.find_campaign(campaign_id).await?;
        match campaign.status {
            CampaignStatus::Completed => return Ok(campaign),
            CampaignStatus::Failed => {
                return Err(UpgradeError::InvalidTransition {
                    from: CampaignStatus::Failed,
                    to: CampaignStatus::Completed,
                })
            }
            _ => {}
        }

        let remaining = executions::Entity::find()
            .filter(executions::Column::CampaignId.eq(campaign_id))
            .filter(executions::Column::Status.is_in(
                std::iter::once(ExecutionStatus::Queued).chain(ExecutionStatus::IN_FLIGHT),
            ))
            .count(self.db.as_ref())
            .await?;
        if remaining > 0 {
            return Err(UpgradeError::NotDrained { remaining });
        }

        info!("Campaign {} completed", campaign_id);
        self.set_status(campaign, CampaignStatus::Completed).await
    }

    pub async fn summary(&self, campaign_id: Uuid) -> Result<CampaignSummary, UpgradeError> {
        let campaign = self.find_campaign(campaign_id).await?;
        let counts = self.status_counts(campaign_id).await?;

        Ok(CampaignSummary {
            id: campaign.id,
            target_image_tag: campaign.target_image_tag,
            channel: campaign.release_channel,
            status: campaign.status,
            batch_size: campaign.batch_size,
            failure_threshold_percent: campaign.failure_threshold_percent,
            total: counts.values().sum(),
            counts,
            created_at: campaign.created_at,
        })
    }

    async fn find_campaign(&self, campaign_id: Uuid) -> Result<campaigns::Model, UpgradeError> {
        campaigns::Entity::find_by_id(campaign_id)
            .one(self.db.as_ref())
            .await?
            .ok_or(UpgradeError::CampaignNotFound(campaign_id))
    }

    /// Flip a pending campaign to running and report the status it ends up in.
    ///
    /// When the conditional update matches no row the campaign moved on
    /// concurrently, so its stored status is re-read.
    async fn start_if_pending(&self, campaign_id: Uuid) -> Result<CampaignStatus, UpgradeError> {
        let result = campaigns::Entity::update_many()
            .col_expr(
                campaigns::Column::Status,
                Expr::value(CampaignStatus::Running),
            )
            .col_expr(campaigns::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(campaigns::Column::Id.eq(campaign_id))
            .filter(campaigns::Column::Status.eq(CampaignStatus::Pending))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected > 0 {
            info!("Campaign {} is now running", campaign_id);
            return Ok(CampaignStatus::Running);
        }

        let current = self.find_campaign(campaign_id).await?;
        debug!(
            "Campaign {} left pending concurrently, now {}",
            campaign_id, current.status
        );
        Ok(current.status)
    }

    async fn set_status(
        &self,
        campaign: campaigns::Model,
        status: CampaignStatus,
    ) -> Result<campaigns::Model, UpgradeError> {
        let mut active: campaigns::ActiveModel = campaign.into();
        active.status = Set(status);
        Ok(active.update(self.db.as_ref()).await?)
    }

    async fn status_counts(&self, campaign_id: Uuid) -> Result<BTreeMap<String, u64>, UpgradeError> {
        let rows: Vec<(ExecutionStatus, i64)> = executions::Entity::find()
            .select_only()
            .column(executions::Column::Status)
            .column_as(executions::Column::Id.count(), "count")
            .filter(executions::Column::CampaignId.eq(campaign_id))
            .group_by(executions::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| (status.to_string(), count.max(0) as u64))
            .collect())
    }
}
