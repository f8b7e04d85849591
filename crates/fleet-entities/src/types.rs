use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use utoipa::ToSchema;

/// Lifecycle status of a tenant.
/// NOTE: Use db_type = "Text" for SQLite compatibility.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    #[sea_orm(string_value = "provisioning")]
    Provisioning,
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "suspended")]
    Suspended,
    #[sea_orm(string_value = "deleted")]
    Deleted,
    #[sea_orm(string_value = "provisioning_failed")]
    ProvisioningFailed,
}

impl Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
            TenantStatus::ProvisioningFailed => "provisioning_failed",
        }
    }


    /// Whether a forward transition to `next` is allowed.
    ///
    /// Re-applying the current status is always allowed so steps stay
    /// re-invokable. Rollback does not go through this check; it may move any
    /// non-deleted tenant straight to `ProvisioningFailed`.
    pub fn can_transition_to(&self, next: TenantStatus) -> bool {
        use TenantStatus::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Provisioning, Active)
                | (Provisioning, ProvisioningFailed)
                | (Provisioning, Deleted)
                | (ProvisioningFailed, Provisioning)
                | (ProvisioningFailed, Active)
                | (ProvisioningFailed, Deleted)
                | (Active, Suspended)
                | (Active, Deleted)
                | (Suspended, Active)
                | (Suspended, Deleted)
        )
    }
}

/// Commercial plan of a tenant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum TenantPlan {
    #[sea_orm(string_value = "free")]
    Free,
    #[sea_orm(string_value = "starter")]
    Starter,
    #[sea_orm(string_value = "professional")]
    Professional,
    #[sea_orm(string_value = "enterprise")]
    Enterprise,
}

impl Display for TenantPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TenantPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantPlan::Free => "free",
            TenantPlan::Starter => "starter",
            TenantPlan::Professional => "professional",
            TenantPlan::Enterprise => "enterprise",
        }
    }
}

/// Outcome recorded in a provisioning event bracket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningEventStatus {
    #[sea_orm(string_value = "started")]
    Started,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl Display for ProvisioningEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisioningEventStatus::Started => "started",
            ProvisioningEventStatus::Completed => "completed",
            ProvisioningEventStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Status of an upgrade campaign.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "paused")]
    Paused,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Running => "running",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Completed => "completed",
        }
    }

    /// Campaigns in these states hand out no further batches.
    pub fn is_halted(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Paused | CampaignStatus::Failed | CampaignStatus::Completed
        )
    }
}

/// Status of one tenant's execution within a campaign.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "snapshotting")]
    Snapshotting,
    #[sea_orm(string_value = "migrating")]
    Migrating,
    #[sea_orm(string_value = "deploying")]
    Deploying,
    #[sea_orm(string_value = "verifying")]
    Verifying,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "rolled_back")]
    RolledBack,
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ExecutionStatus {
    /// Statuses counted against a campaign's concurrency limit.
    pub const IN_FLIGHT: [ExecutionStatus; 4] = [
        ExecutionStatus::Snapshotting,
        ExecutionStatus::Migrating,
        ExecutionStatus::Deploying,
        ExecutionStatus::Verifying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Snapshotting => "snapshotting",
            ExecutionStatus::Migrating => "migrating",
            ExecutionStatus::Deploying => "deploying",
            ExecutionStatus::Verifying => "verifying",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RolledBack => "rolled_back",
        }
    }


    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::RolledBack
        )
    }
}
