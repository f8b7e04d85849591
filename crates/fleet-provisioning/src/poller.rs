//! Bounded waits on long-running compute operations

use fleet_providers::{ComputeApi, Operation};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::ProvisioningError;

/// How often to re-check an operation and when to give up on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    /// Service and job create/patch operations
    pub const fn deploy() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }

    /// Job run operations, which only wait for the execution to be scheduled
    pub const fn job_trigger() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct OperationPoller {
    compute: Arc<dyn ComputeApi>,
}

impl OperationPoller {
    pub fn new(compute: Arc<dyn ComputeApi>) -> Self {
        Self { compute }
    }

    /// Wait for `operation` to finish and return its embedded result, if any.
    ///
    /// The deadline is fixed when the wait starts; every re-check counts
    /// against it.
    pub async fn wait(
        &self,
        operation: Operation,
        policy: PollPolicy,
    ) -> Result<Option<Value>, ProvisioningError> {
        let started = Instant::now();
        let deadline = started + policy.timeout;
        let name = operation.name.clone();
        let mut current = operation;

        loop {
            if current.done {
                return Self::settle(&name, current);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Operation {} still running after {}s, giving up",
                    name,
                    policy.timeout.as_secs()
                );
                return Err(ProvisioningError::OperationTimeout {
                    operation: name,
                    timeout: policy.timeout,
                });
            }

            tokio::time::sleep(policy.interval.min(deadline - now)).await;

            current = self.compute.get_operation(&name).await?;
            debug!(
                "Operation {} done={} after {}ms",
                name,
                current.done,
                started.elapsed().as_millis()
            );
        }
    }

    fn settle(name: &str, operation: Operation) -> Result<Option<Value>, ProvisioningError> {
        if let Some(error) = operation.error {
            warn!("Operation {} failed: {}", name, error.message);
            return Err(ProvisioningError::OperationFailed {
                operation: name.to_string(),
                message: error.message,
            });
        }
        info!("Operation {} completed", name);
        Ok(operation.response)
    }
}
