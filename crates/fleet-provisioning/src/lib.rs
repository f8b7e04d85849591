//! Tenant provisioning for the fleet control plane
//!
//! Leaves first: [`poller`] waits on long-running operations,
//! [`reconciler`] converges compute resources, [`database`] and [`domain`]
//! handle the tenant database and hostname, and [`orchestrator`] exposes one
//! audited entry point per provisioning step.

pub mod branch_cache;
pub mod database;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod orchestrator;
pub mod poller;
pub mod reconciler;
pub mod specs;
pub mod store;

pub use branch_cache::{BranchIdCache, DEFAULT_BRANCH_TTL};
pub use database::DatabaseProvisioner;
pub use domain::{DomainConfigurator, DomainOutcome};
pub use errors::{PartialRollbackFailure, ProvisioningError};
pub use handlers::tenants::{configure_tenant_routes, TenantsApiDoc, TenantsAppState};
pub use handlers::{configure_routes, ProvisioningApiDoc, ProvisioningAppState};
pub use orchestrator::StepOrchestrator;
pub use poller::{OperationPoller, PollPolicy};
pub use reconciler::ResourceReconciler;
pub use store::{SeaOrmTenantStore, TenantStore};
