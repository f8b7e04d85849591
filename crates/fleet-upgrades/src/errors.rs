use axum::http::StatusCode;
use fleet_core::problemdetails::{self, Problem};
use fleet_entities::types::CampaignStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Campaign cannot move from {from} to {to}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    /// Completion was requested while executions are still queued or in flight
    #[error("Campaign still has {remaining} unfinished executions")]
    NotDrained { remaining: u64 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl From<UpgradeError> for Problem {
    fn from(error: UpgradeError) -> Self {
        match error {
            UpgradeError::CampaignNotFound(_) | UpgradeError::ExecutionNotFound(_) => {
                problemdetails::new(StatusCode::NOT_FOUND)
                    .with_title("Not Found")
                    .with_detail(error.to_string())
            }
            UpgradeError::InvalidTransition { .. } => problemdetails::new(StatusCode::CONFLICT)
                .with_title("Invalid Campaign Transition")
                .with_detail(error.to_string()),
            UpgradeError::NotDrained { remaining } => problemdetails::new(StatusCode::CONFLICT)
                .with_title("Campaign Not Drained")
                .with_detail(error.to_string())
                .with_value("remaining", remaining),
            UpgradeError::Validation(msg) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Validation Error")
                .with_detail(msg),
            UpgradeError::Database(_) => problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                .with_title("Internal Error")
                .with_detail(error.to_string()),
        }
    }
}
