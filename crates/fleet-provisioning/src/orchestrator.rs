//! Individually invokable provisioning steps
//!
//! Each public step loads the tenant, checks what the step needs, calls the
//! provider logic, writes the resulting fields back and brackets the whole
//! call with started/completed (or failed) audit events. Step ordering
//! belongs to the caller. Concurrent calls for the same tenant are not
//! serialized here.

use fleet_core::{ProviderSettings, TenantRuntimeSettings};
use fleet_entities::tenants;
use fleet_entities::types::{ProvisioningEventStatus, TenantStatus};
use fleet_providers::{ComputeApi, JobExecution, Operation, ProviderError, ProviderSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::branch_cache::BranchIdCache;
use crate::database::DatabaseProvisioner;
use crate::domain::{DomainConfigurator, DomainOutcome, DomainStatus};
use crate::errors::{PartialRollbackFailure, ProvisioningError};
use crate::poller::PollPolicy;
use crate::reconciler::{DesiredResource, ResourceKind, ResourceReconciler};
use crate::specs::{job_spec, service_spec, tenant_environment, ResourceNames, Workload};
use crate::store::{NewProvisioningEvent, TenantStore, TenantUpdate};

/// Audit step names
pub mod steps {
    pub const CREATE_DB: &str = "create_db";
    pub const MIGRATE_DB: &str = "migrate_db";
    pub const DEPLOY_SERVICE: &str = "deploy_service";
    pub const SETUP_DOMAIN: &str = "setup_domain";
    pub const ACTIVATE_TENANT: &str = "activate_tenant";
    pub const ROLLBACK: &str = "rollback";
}

pub const ROLLBACK_REASON: &str = "Provisioning workflow failed and rolled back";

const DEPLOY_OPERATION_KEY: &str = "deployOperation";
const ACME_CHALLENGE_KEY: &str = "acmeChallenge";

const DATABASE_PROVIDER: &str = "Neon";
const COMPUTE_PROVIDER: &str = "Cloud Run";
const EDGE_PROVIDER: &str = "Cloudflare";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStepResult {
    pub database_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationStepResult {
    pub operation_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationTriggerResult {
    pub operation_name: String,
    /// Execution to poll through the migration status route
    pub execution_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResult {
    pub api_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    pub failures: Vec<PartialRollbackFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MigrationStatusReport {
    pub status: MigrationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationStatusReport {
    /// Collapse the execution counters into a single migration state.
    pub fn from_execution(execution: &JobExecution) -> Self {
        if execution.succeeded_count > 0 {
            return Self {
                status: MigrationState::Success,
                error: None,
            };
        }
        if execution.failed_count > 0 {
            let message = execution
                .conditions
                .iter()
                .find(|c| c.state == "CONDITION_FAILED")
                .and_then(|c| c.message.clone())
                .unwrap_or_else(|| "Job execution failed".to_string());
            return Self {
                status: MigrationState::Failed,
                error: Some(message),
            };
        }
        if execution.cancelled_count > 0 {
            return Self {
                status: MigrationState::Failed,
                error: Some("Job execution cancelled".to_string()),
            };
        }
        Self {
            status: MigrationState::Running,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OperationReport {
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl From<Operation> for OperationReport {
    fn from(operation: Operation) -> Self {
        Self {
            done: operation.done,
            error: operation.error.map(|e| e.message),
            response: operation.response,
        }
    }
}

struct ComputeHandle {
    api: Arc<dyn ComputeApi>,
    reconciler: ResourceReconciler,
    names: ResourceNames,
    service_account: Option<String>,
}

pub struct StepOrchestrator {
    store: Arc<dyn TenantStore>,
    runtime: TenantRuntimeSettings,
    database: Option<DatabaseProvisioner>,
    compute: Option<ComputeHandle>,
    domains: Option<DomainConfigurator>,
}

impl StepOrchestrator {
    pub fn new(
        store: Arc<dyn TenantStore>,
        providers: &ProviderSet,
        settings: &ProviderSettings,
        branch_cache: Arc<BranchIdCache>,
    ) -> Self {
        let database = match (&providers.database, &settings.neon) {
            (Some(api), Some(neon)) => Some(DatabaseProvisioner::new(
                api.clone(),
                neon.project_id.clone(),
                branch_cache,
            )),
            _ => None,
        };

        let compute = match (&providers.compute, &settings.gcp) {
            (Some(api), Some(gcp)) => Some(ComputeHandle {
                api: api.clone(),
                reconciler: ResourceReconciler::new(api.clone()),
                names: ResourceNames::new(gcp.project_id.clone(), gcp.region.clone()),
                service_account: gcp.service_account.clone(),
            }),
            _ => None,
        };

        let domains = providers.edge.as_ref().map(|edge| {
            DomainConfigurator::new(
                edge.clone(),
                settings.tenant.base_domain.clone(),
                settings.tenant.storefront_hostname.clone(),
            )
        });

        Self {
            store,
            runtime: settings.tenant.clone(),
            database,
            compute,
            domains,
        }
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    fn database(&self) -> Result<&DatabaseProvisioner, ProvisioningError> {
        self.database
            .as_ref()
            .ok_or(ProvisioningError::ProviderNotInitialized(DATABASE_PROVIDER))
    }

    fn compute(&self) -> Result<&ComputeHandle, ProvisioningError> {
        self.compute
            .as_ref()
            .ok_or(ProvisioningError::ProviderNotInitialized(COMPUTE_PROVIDER))
    }

    fn domains(&self) -> Result<&DomainConfigurator, ProvisioningError> {
        self.domains
            .as_ref()
            .ok_or(ProvisioningError::ProviderNotInitialized(EDGE_PROVIDER))
    }

    fn image(&self) -> Result<&str, ProvisioningError> {
        self.runtime
            .image_tag
            .as_deref()
            .ok_or(ProvisioningError::ProviderNotInitialized(COMPUTE_PROVIDER))
    }

    /// Write an audit event; failures are logged and swallowed.
    async fn record(
        &self,
        tenant_id: Uuid,
        step: &'static str,
        status: ProvisioningEventStatus,
        details: Option<Value>,
    ) {
        let event = NewProvisioningEvent {
            tenant_id,
            step: step.to_string(),
            status,
            details,
        };
        if let Err(e) = self.store.append_event(event).await {
            error!(
                "Failed to write provisioning event {}/{} for tenant {}: {}",
                step, status, tenant_id, e
            );
        }
    }

    async fn run_step<T>(
        &self,
        tenant_id: Uuid,
        step: &'static str,
        action: impl Future<Output = Result<T, ProvisioningError>>,
    ) -> Result<T, ProvisioningError> {
        self.record(tenant_id, step, ProvisioningEventStatus::Started, None)
            .await;

        match action.await {
            Ok(value) => {
                self.record(tenant_id, step, ProvisioningEventStatus::Completed, None)
                    .await;
                Ok(value)
            }
            Err(e) => {
                warn!("Step {} failed for tenant {}: {}", step, tenant_id, e);
                self.record(
                    tenant_id,
                    step,
                    ProvisioningEventStatus::Failed,
                    Some(json!({ "error": e.to_string() })),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn find_tenant(&self, tenant_id: Uuid) -> Result<tenants::Model, ProvisioningError> {
        self.store.find_tenant(tenant_id).await
    }

    // --- database -------------------------------------------------------

    pub async fn provision_database(
        &self,
        tenant_id: Uuid,
    ) -> Result<DatabaseStepResult, ProvisioningError> {
        self.run_step(tenant_id, steps::CREATE_DB, async {
            let database = self.database()?;
            let tenant = self.find_tenant(tenant_id).await?;

            if let Some(database_url) = tenant.database_url.filter(|u| !u.is_empty()) {
                info!("Tenant {} already has a database, skipping", tenant_id);
                return Ok(DatabaseStepResult { database_url });
            }

            info!("Provisioning database for tenant {}", tenant_id);
            let database_url = database.create_tenant_database(tenant_id).await?;
            self.store
                .update_tenant(
                    tenant_id,
                    TenantUpdate {
                        database_url: Some(Some(database_url.clone())),
                        ..Default::default()
                    },
                )
                .await?;

            Ok(DatabaseStepResult { database_url })
        })
        .await
    }

    // --- migrations -----------------------------------------------------

    pub async fn ensure_migration_job(
        &self,
        tenant_id: Uuid,
    ) -> Result<OperationStepResult, ProvisioningError> {
        self.run_step(tenant_id, steps::MIGRATE_DB, async {
            let compute = self.compute()?;
            let tenant = self.find_tenant(tenant_id).await?;
            let env = tenant_environment(
                &tenant,
                &self.runtime,
                Workload::MigrationJob,
                steps::MIGRATE_DB,
            )?;
            let image = self.image()?;

            info!("Ensuring migration job for tenant {}", tenant_id);
            let operation = compute
                .reconciler
                .reconcile(DesiredResource {
                    kind: ResourceKind::Job,
                    parent: compute.names.parent(),
                    id: ResourceNames::job_id(tenant_id),
                    spec: job_spec(image, &env, compute.service_account.as_deref()),
                })
                .await?;
            let operation_name = operation.name.clone();
            compute
                .reconciler
                .poller()
                .wait(operation, PollPolicy::deploy())
                .await?;

            Ok(OperationStepResult { operation_name })
        })
        .await
    }

    pub async fn trigger_migration_job(
        &self,
        tenant_id: Uuid,
    ) -> Result<MigrationTriggerResult, ProvisioningError> {
        self.run_step(tenant_id, steps::MIGRATE_DB, async {
            let compute = self.compute()?;
            self.find_tenant(tenant_id).await?;

            let job_name = compute.names.job_name(tenant_id);
            info!("Triggering migration job {}", job_name);
            let operation = compute.api.run_job(&job_name).await?;
            let operation_name = operation.name.clone();

            let response = compute
                .reconciler
                .poller()
                .wait(operation, PollPolicy::job_trigger())
                .await?;
            let execution_name = response
                .as_ref()
                .and_then(|r| r.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string);

            Ok(MigrationTriggerResult {
                operation_name,
                execution_name,
            })
        })
        .await
    }

    /// Report a migration execution's state; lookup errors become `failed`.
    pub async fn migration_status(
        &self,
        execution_name: &str,
    ) -> Result<MigrationStatusReport, ProvisioningError> {
        let compute = self.compute()?;

        match compute.api.get_execution(execution_name).await {
            Ok(execution) => Ok(MigrationStatusReport::from_execution(&execution)),
            Err(e) => {
                warn!("Failed to read execution {}: {}", execution_name, e);
                Ok(MigrationStatusReport {
                    status: MigrationState::Failed,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    pub async fn operation_status(
        &self,
        operation_name: &str,
    ) -> Result<OperationReport, ProvisioningError> {
        let compute = self.compute()?;
        let operation = compute.api.get_operation(operation_name).await?;
        Ok(operation.into())
    }

    // --- service --------------------------------------------------------

    /// Start deploying the tenant service without waiting for it.
    pub async fn start_deploy_service(
        &self,
        tenant_id: Uuid,
    ) -> Result<OperationStepResult, ProvisioningError> {
        self.run_step(tenant_id, steps::DEPLOY_SERVICE, async {
            let compute = self.compute()?;
            let tenant = self.find_tenant(tenant_id).await?;
            let env = tenant_environment(
                &tenant,
                &self.runtime,
                Workload::Service,
                steps::DEPLOY_SERVICE,
            )?;
            let image = self.image()?;

            info!("Starting service deployment for tenant {}", tenant_id);
            let operation = compute
                .reconciler
                .reconcile(DesiredResource {
                    kind: ResourceKind::Service,
                    parent: compute.names.parent(),
                    id: ResourceNames::service_id(tenant_id),
                    spec: service_spec(image, &env, compute.service_account.as_deref()),
                })
                .await?;

            let mut metadata = Map::new();
            metadata.insert(DEPLOY_OPERATION_KEY.to_string(), json!(operation.name));
            self.store
                .update_tenant(
                    tenant_id,
                    TenantUpdate {
                        metadata: Some(metadata),
                        ..Default::default()
                    },
                )
                .await?;

            Ok(OperationStepResult {
                operation_name: operation.name,
            })
        })
        .await
    }

    /// Wait for the deployment, open it to the public and record its URL.
    pub async fn finalize_deploy_service(
        &self,
        tenant_id: Uuid,
        operation_name: Option<String>,
    ) -> Result<FinalizeResult, ProvisioningError> {
        self.run_step(tenant_id, steps::DEPLOY_SERVICE, async {
            let compute = self.compute()?;
            let tenant = self.find_tenant(tenant_id).await?;

            let pending = operation_name
                .filter(|n| !n.is_empty())
                .or_else(|| tenant.metadata_str(DEPLOY_OPERATION_KEY).map(str::to_string));
            match pending {
                Some(name) => {
                    let operation = compute.api.get_operation(&name).await?;
                    compute
                        .reconciler
                        .poller()
                        .wait(operation, PollPolicy::deploy())
                        .await?;
                }
                None => debug!("No pending deploy operation for tenant {}", tenant_id),
            }

            let service_name = compute.names.service_name(tenant_id);
            compute.reconciler.ensure_public_access(&service_name).await?;

            let service = compute.api.get_resource(&service_name).await?;
            let api_url = service.uri.filter(|u| !u.is_empty()).ok_or_else(|| {
                ProviderError::UnexpectedResponse("Service deployed but URI is missing".to_string())
            })?;

            let mut metadata = Map::new();
            metadata.insert(DEPLOY_OPERATION_KEY.to_string(), Value::Null);
            self.store
                .update_tenant(
                    tenant_id,
                    TenantUpdate {
                        api_url: Some(Some(api_url.clone())),
                        metadata: Some(metadata),
                        ..Default::default()
                    },
                )
                .await?;

            info!("Tenant {} service ready at {}", tenant_id, api_url);
            Ok(FinalizeResult { api_url })
        })
        .await
    }

    // --- domain ---------------------------------------------------------

    pub async fn configure_domain(
        &self,
        tenant_id: Uuid,
    ) -> Result<DomainOutcome, ProvisioningError> {
        self.run_step(tenant_id, steps::SETUP_DOMAIN, async {
            let domains = self.domains()?;
            let tenant = self.find_tenant(tenant_id).await?;
            let subdomain = tenant
                .subdomain
                .as_deref()
                .ok_or_else(|| ProvisioningError::missing(steps::SETUP_DOMAIN, "Subdomain missing"))?;

            let outcome = domains.configure(tenant_id, subdomain).await?;

            if let Some(challenge) = &outcome.acme_challenge {
                let mut metadata = Map::new();
                metadata.insert(
                    ACME_CHALLENGE_KEY.to_string(),
                    json!({ "token": challenge.token, "response": challenge.response }),
                );
                self.store
                    .update_tenant(
                        tenant_id,
                        TenantUpdate {
                            metadata: Some(metadata),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!("Stored ACME challenge for {}", outcome.hostname);
            }

            Ok(outcome)
        })
        .await
    }

    pub async fn domain_status(&self, tenant_id: Uuid) -> Result<DomainStatus, ProvisioningError> {
        let domains = self.domains()?;
        let tenant = self.find_tenant(tenant_id).await?;
        let subdomain = tenant
            .subdomain
            .as_deref()
            .ok_or_else(|| ProvisioningError::missing(steps::SETUP_DOMAIN, "Subdomain missing"))?;

        domains.status(subdomain).await
    }

    // --- activation -----------------------------------------------------

    pub async fn activate(&self, tenant_id: Uuid) -> Result<(), ProvisioningError> {
        self.run_step(tenant_id, steps::ACTIVATE_TENANT, async {
            let tenant = self.find_tenant(tenant_id).await?;
            if tenant.subdomain.is_none() {
                return Err(ProvisioningError::missing(
                    steps::ACTIVATE_TENANT,
                    "Subdomain missing",
                ));
            }
            if tenant.api_url.is_none() {
                return Err(ProvisioningError::missing(
                    steps::ACTIVATE_TENANT,
                    "API URL missing",
                ));
            }
            if !tenant.status.can_transition_to(TenantStatus::Active) {
                return Err(ProvisioningError::InvalidTransition {
                    from: tenant.status,
                    to: TenantStatus::Active,
                });
            }

            info!("Activating tenant {}", tenant_id);
            self.store
                .update_tenant(
                    tenant_id,
                    TenantUpdate {
                        status: Some(TenantStatus::Active),
                        failure_reason: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            Ok(())
        })
        .await
    }

    // --- rollback -------------------------------------------------------

    async fn delete_database(&self, tenant_id: Uuid) -> Result<(), String> {
        let database = self.database().map_err(|e| e.to_string())?;
        database
            .delete_tenant_database(tenant_id)
            .await
            .map_err(|e| e.to_string())
    }

    async fn delete_service(&self, tenant_id: Uuid) -> Result<Option<String>, String> {
        let compute = self.compute().map_err(|e| e.to_string())?;
        let service_name = compute.names.service_name(tenant_id);

        match compute.api.delete_resource(&service_name).await {
            Ok(operation) => Ok(Some(operation.name).filter(|n| !n.is_empty())),
            Err(e) if e.is_not_found() => {
                info!("Service {} already gone", service_name);
                Ok(None)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Best-effort removal of the tenant's database and service.
    ///
    /// Both deletions run concurrently and neither failure stops the other
    /// or the final status update.
    pub async fn rollback(&self, tenant_id: Uuid) -> Result<RollbackOutcome, ProvisioningError> {
        self.run_step(tenant_id, steps::ROLLBACK, async {
            let tenant = self.find_tenant(tenant_id).await?;
            if tenant.status == TenantStatus::Deleted {
                return Err(ProvisioningError::InvalidTransition {
                    from: tenant.status,
                    to: TenantStatus::ProvisioningFailed,
                });
            }

            info!("Rolling back resources for tenant {}", tenant_id);
            let (database_result, service_result) = futures::join!(
                self.delete_database(tenant_id),
                self.delete_service(tenant_id)
            );

            // A URL is cleared only once its resource is gone
            let mut update = TenantUpdate {
                status: Some(TenantStatus::ProvisioningFailed),
                failure_reason: Some(Some(ROLLBACK_REASON.to_string())),
                ..Default::default()
            };
            let mut failures = Vec::new();
            match database_result {
                Ok(()) => update.database_url = Some(None),
                Err(error) => failures.push(PartialRollbackFailure {
                    resource: "database".to_string(),
                    error,
                }),
            }
            let operation_name = match service_result {
                Ok(name) => {
                    update.api_url = Some(None);
                    name
                }
                Err(error) => {
                    failures.push(PartialRollbackFailure {
                        resource: "service".to_string(),
                        error,
                    });
                    None
                }
            };

            if !failures.is_empty() {
                error!(
                    "Rollback partially failed for tenant {}: {:?}",
                    tenant_id, failures
                );
            }

            self.store.update_tenant(tenant_id, update).await?;

            Ok(RollbackOutcome {
                operation_name,
                failures,
            })
        })
        .await
    }
}
