pub use super::tenant_provisioning_events::Entity as TenantProvisioningEvents;
pub use super::tenant_upgrade_executions::Entity as TenantUpgradeExecutions;
pub use super::tenants::Entity as Tenants;
pub use super::upgrade_campaigns::Entity as UpgradeCampaigns;
