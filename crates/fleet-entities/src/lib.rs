pub mod types;

pub mod tenants;
pub mod tenant_provisioning_events;
pub mod upgrade_campaigns;
pub mod tenant_upgrade_executions;

pub mod prelude;
