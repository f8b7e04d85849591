//! Provisioning error taxonomy

use fleet_core::problemdetails::{self, Problem};
use fleet_entities::types::TenantStatus;
use fleet_providers::ProviderError;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// A tenant field the step depends on has not been recorded yet
    #[error("Prerequisite missing for {step}: {message}")]
    PrerequisiteMissing { step: &'static str, message: String },

    #[error("Tenant not found: {0}")]
    TenantNotFound(Uuid),

    /// The provider was never constructed, usually because its credentials are absent
    #[error("{0} provider not initialized")]
    ProviderNotInitialized(&'static str),

    #[error("{0}")]
    ProviderCallFailed(#[from] ProviderError),

    #[error("Operation {operation} timed out after {}s", .timeout.as_secs())]
    OperationTimeout { operation: String, timeout: Duration },

    /// The operation finished with an embedded error; the message is the provider's
    #[error("{message}")]
    OperationFailed { operation: String, message: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: TenantStatus, to: TenantStatus },

    #[error("Subdomain already in use: {0}")]
    SubdomainInUse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl ProvisioningError {
    pub(crate) fn missing(step: &'static str, message: impl Into<String>) -> Self {
        ProvisioningError::PrerequisiteMissing {
            step,
            message: message.into(),
        }
    }
}

/// One cleanup call that failed during rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PartialRollbackFailure {
    pub resource: String,
    pub error: String,
}

impl From<ProvisioningError> for Problem {
    fn from(error: ProvisioningError) -> Self {
        match error {
            ProvisioningError::PrerequisiteMissing { .. } => {
                problemdetails::new(StatusCode::UNPROCESSABLE_ENTITY)
                    .with_title("Prerequisite Missing")
                    .with_detail(error.to_string())
            }
            ProvisioningError::TenantNotFound(id) => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("Tenant Not Found")
                .with_detail(format!("Tenant {} not found", id)),
            ProvisioningError::ProviderNotInitialized(_) => {
                problemdetails::new(StatusCode::SERVICE_UNAVAILABLE)
                    .with_title("Provider Not Initialized")
                    .with_detail(error.to_string())
            }
            ProvisioningError::ProviderCallFailed(ref inner) => {
                let mut problem = problemdetails::new(StatusCode::BAD_GATEWAY)
                    .with_title("Provider Call Failed")
                    .with_detail(inner.to_string());
                if let ProviderError::Api { status, .. } = inner {
                    problem = problem.with_value("upstreamStatus", *status);
                }
                problem
            }
            ProvisioningError::OperationTimeout { ref operation, .. } => {
                problemdetails::new(StatusCode::GATEWAY_TIMEOUT)
                    .with_title("Operation Timeout")
                    .with_detail(error.to_string())
                    .with_value("operation", operation.clone())
            }
            ProvisioningError::OperationFailed {
                ref operation,
                ref message,
            } => problemdetails::new(StatusCode::BAD_GATEWAY)
                .with_title("Operation Failed")
                .with_detail(message.clone())
                .with_value("operation", operation.clone()),
            ProvisioningError::InvalidTransition { .. } | ProvisioningError::SubdomainInUse(_) => {
                problemdetails::new(StatusCode::CONFLICT)
                    .with_title("Conflict")
                    .with_detail(error.to_string())
            }
            ProvisioningError::Validation(msg) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Validation Error")
                .with_detail(msg),
            ProvisioningError::Database(_) => {
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Internal Error")
                    .with_detail(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_outcome_reads_back_partial_failures() {
        let body = serde_json::json!({
            "failures": [{"resource": "role", "error": "permission denied"}]
        });

        let outcome: crate::orchestrator::RollbackOutcome = serde_json::from_value(body).unwrap();

        assert_eq!(outcome.operation_name, None);
        assert_eq!(
            outcome.failures,
            vec![PartialRollbackFailure {
                resource: "role".into(),
                error: "permission denied".into(),
            }]
        );
    }

    #[test]
    fn test_operation_failed_displays_provider_message_verbatim() {
        let err = ProvisioningError::OperationFailed {
            operation: "op-1".into(),
            message: "Revision 'tenant-1-00002' is not ready".into(),
        };
        assert_eq!(err.to_string(), "Revision 'tenant-1-00002' is not ready");
    }

    #[test]
    fn test_problem_status_mapping() {
        let cases = [
            (
                ProvisioningError::missing("deploy_service", "database URL missing"),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ProvisioningError::ProviderNotInitialized("Compute"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ProvisioningError::OperationTimeout {
                    operation: "op".into(),
                    timeout: Duration::from_secs(300),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ProvisioningError::InvalidTransition {
                    from: TenantStatus::Deleted,
                    to: TenantStatus::Active,
                },
                StatusCode::CONFLICT,
            ),
        ];

        for (error, status) in cases {
            let problem: Problem = error.into();
            assert_eq!(problem.status_code, status);
        }
    }
}
