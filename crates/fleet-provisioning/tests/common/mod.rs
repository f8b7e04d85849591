//! Shared fixtures: an in-memory cloud and a SQLite-backed orchestrator

#![allow(dead_code)]

use async_trait::async_trait;
use fleet_core::{
    CloudflareSettings, GcpSettings, NeonSettings, ProviderSettings, TenantRuntimeSettings,
};
use fleet_database::test_utils::TestDatabase;
use fleet_entities::tenants;
use fleet_entities::types::TenantPlan;
use fleet_providers::{
    Branch, BranchEndpoint, ComputeApi, CreateResource, CustomHostname, CustomHostnameSsl,
    DatabaseApi, DatabaseRole, DnsRecord, DnsRecordRequest, EdgeApi, IamPolicy, JobExecution,
    Operation, ProviderError, ProviderResult, ProviderSet, Resource, ValidationRecord,
};
use fleet_provisioning::store::{NewProvisioningEvent, NewTenant, TenantUpdate};
use fleet_provisioning::{
    BranchIdCache, ProvisioningError, SeaOrmTenantStore, StepOrchestrator, TenantStore,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One object standing in for every provider, recording each call.
#[derive(Default)]
pub struct FakeCloud {
    pub calls: Mutex<Vec<String>>,
    pub resources: Mutex<HashMap<String, Resource>>,
    pub policies: Mutex<HashMap<String, IamPolicy>>,
    pub custom_hostnames: Mutex<Vec<CustomHostname>>,
    pub fail_database_delete: Mutex<bool>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn done(name: &str, response: Option<Value>) -> Operation {
        Operation {
            name: name.to_string(),
            done: true,
            error: None,
            response,
        }
    }
}

#[async_trait]
impl DatabaseApi for FakeCloud {
    async fn list_branches(&self, _project_id: &str) -> ProviderResult<Vec<Branch>> {
        self.record("list_branches");
        Ok(vec![Branch {
            id: "br-main".to_string(),
            name: "main".to_string(),
            default: true,
        }])
    }

    async fn list_branch_endpoints(
        &self,
        _project_id: &str,
        _branch_id: &str,
    ) -> ProviderResult<Vec<BranchEndpoint>> {
        Ok(vec![BranchEndpoint {
            id: "ep-1".to_string(),
            host: "ep-1.neon.tech".to_string(),
            endpoint_type: "read_write".to_string(),
        }])
    }

    async fn create_role(
        &self,
        _project_id: &str,
        _branch_id: &str,
        role_name: &str,
    ) -> ProviderResult<DatabaseRole> {
        self.record(format!("create_role {}", role_name));
        Ok(DatabaseRole {
            name: role_name.to_string(),
            password: Some("p@ss".to_string()),
        })
    }

    async fn create_database(
        &self,
        _project_id: &str,
        _branch_id: &str,
        database_name: &str,
        _owner_name: &str,
    ) -> ProviderResult<()> {
        self.record(format!("create_database {}", database_name));
        Ok(())
    }

    async fn delete_database(
        &self,
        _project_id: &str,
        _branch_id: &str,
        database_name: &str,
    ) -> ProviderResult<()> {
        self.record(format!("delete_database {}", database_name));
        if *self.fail_database_delete.lock().unwrap() {
            return Err(ProviderError::Api {
                status: 500,
                codes: vec![],
                message: "branch is locked".to_string(),
            });
        }
        Ok(())
    }

    async fn delete_role(
        &self,
        _project_id: &str,
        _branch_id: &str,
        role_name: &str,
    ) -> ProviderResult<()> {
        self.record(format!("delete_role {}", role_name));
        Err(ProviderError::NotFound(role_name.to_string()))
    }
}

#[async_trait]
impl ComputeApi for FakeCloud {
    async fn get_resource(&self, name: &str) -> ProviderResult<Resource> {
        self.resources
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn create_resource(&self, request: CreateResource) -> ProviderResult<Operation> {
        let (collection, id) = match (&request.service_id, &request.job_id) {
            (Some(id), None) => ("services", id.clone()),
            (None, Some(id)) => ("jobs", id.clone()),
            _ => panic!("exactly one of service_id and job_id must be set"),
        };
        let name = format!("{}/{}/{}", request.parent, collection, id);
        self.record(format!("create {}", name));
        self.resources.lock().unwrap().insert(
            name.clone(),
            Resource {
                name: name.clone(),
                uri: (collection == "services").then(|| format!("https://{}.a.run.app", id)),
                etag: None,
            },
        );
        Ok(FakeCloud::done(&format!("operations/create-{}", id), None))
    }

    async fn patch_resource(&self, name: &str, _spec: Value) -> ProviderResult<Operation> {
        self.record(format!("patch {}", name));
        Ok(FakeCloud::done("operations/patch", None))
    }

    async fn delete_resource(&self, name: &str) -> ProviderResult<Operation> {
        self.record(format!("delete {}", name));
        match self.resources.lock().unwrap().remove(name) {
            Some(_) => Ok(Operation {
                name: "operations/delete".to_string(),
                ..Default::default()
            }),
            None => Err(ProviderError::NotFound(name.to_string())),
        }
    }

    async fn get_iam_policy(&self, name: &str) -> ProviderResult<IamPolicy> {
        Ok(self
            .policies
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_iam_policy(&self, name: &str, policy: IamPolicy) -> ProviderResult<IamPolicy> {
        self.record(format!("set_iam_policy {}", name));
        self.policies
            .lock()
            .unwrap()
            .insert(name.to_string(), policy.clone());
        Ok(policy)
    }

    async fn run_job(&self, name: &str) -> ProviderResult<Operation> {
        self.record(format!("run {}", name));
        Ok(FakeCloud::done(
            "operations/run",
            Some(json!({ "name": format!("{}/executions/exec-1", name) })),
        ))
    }

    async fn get_execution(&self, name: &str) -> ProviderResult<JobExecution> {
        Ok(JobExecution {
            name: name.to_string(),
            succeeded_count: 1,
            ..Default::default()
        })
    }

    async fn get_operation(&self, name: &str) -> ProviderResult<Operation> {
        Ok(FakeCloud::done(name, None))
    }
}

#[async_trait]
impl EdgeApi for FakeCloud {
    async fn create_dns_record(&self, record: DnsRecordRequest) -> ProviderResult<DnsRecord> {
        self.record(format!("dns {}", record.name));
        Ok(DnsRecord {
            id: "rec-1".to_string(),
            name: record.name,
            record_type: record.record_type,
            content: record.content,
        })
    }

    async fn create_custom_hostname(&self, hostname: &str) -> ProviderResult<CustomHostname> {
        self.record(format!("custom_hostname {}", hostname));
        let created = CustomHostname {
            id: "ch-1".to_string(),
            hostname: hostname.to_string(),
            status: Some("pending".to_string()),
            ssl: Some(CustomHostnameSsl {
                validation_records: vec![ValidationRecord {
                    http_url: Some(format!(
                        "http://{}/.well-known/acme-challenge/tok-42",
                        hostname
                    )),
                    http_body: Some("tok-42.body".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            verification_errors: vec![],
        };
        self.custom_hostnames.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn list_custom_hostnames(&self, hostname: &str) -> ProviderResult<Vec<CustomHostname>> {
        Ok(self
            .custom_hostnames
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.hostname == hostname)
            .cloned()
            .collect())
    }
}

pub fn settings() -> ProviderSettings {
    ProviderSettings {
        environment: "test".to_string(),
        internal_api_key: Some("internal-secret".to_string()),
        neon: Some(NeonSettings {
            api_key: "neon-key".to_string(),
            project_id: "proj-1".to_string(),
        }),
        gcp: Some(GcpSettings {
            project_id: "vendin".to_string(),
            region: "us-east1".to_string(),
            credentials: None,
            service_account: Some("runner@vendin.iam.gserviceaccount.com".to_string()),
        }),
        cloudflare: Some(CloudflareSettings {
            api_token: "cf".to_string(),
            zone_id: "zone".to_string(),
        }),
        tenant: TenantRuntimeSettings {
            image_tag: Some("registry.example.com/tenant:v1".to_string()),
            redis_url: Some("rediss://cache.example.com".to_string()),
            gemini_api_key: None,
            base_domain: "-my.vendin.store".to_string(),
            storefront_hostname: "storefront.vendin.store".to_string(),
        },
    }
}

pub fn providers(cloud: &Arc<FakeCloud>) -> ProviderSet {
    ProviderSet {
        database: Some(cloud.clone()),
        compute: Some(cloud.clone()),
        edge: Some(cloud.clone()),
    }
}

pub struct Harness {
    pub test_db: TestDatabase,
    pub store: Arc<SeaOrmTenantStore>,
    pub cloud: Arc<FakeCloud>,
    pub orchestrator: Arc<StepOrchestrator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_providers(|cloud| providers(cloud)).await
    }

    pub async fn with_providers(build: impl FnOnce(&Arc<FakeCloud>) -> ProviderSet) -> Self {
        let test_db = TestDatabase::new().await.unwrap();
        let store = Arc::new(SeaOrmTenantStore::new(test_db.connection()));
        let cloud = FakeCloud::new();
        let orchestrator = Arc::new(StepOrchestrator::new(
            store.clone(),
            &build(&cloud),
            &settings(),
            Arc::new(BranchIdCache::default()),
        ));
        Self {
            test_db,
            store,
            cloud,
            orchestrator,
        }
    }

    pub async fn tenant(&self, subdomain: &str) -> tenants::Model {
        self.store
            .create_tenant(NewTenant {
                name: "Acme".to_string(),
                merchant_email: "ops@acme.test".to_string(),
                subdomain: Some(subdomain.to_string()),
                plan: TenantPlan::Starter,
                release_channel: "stable".to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn reload(&self, id: Uuid) -> tenants::Model {
        self.store.find_tenant(id).await.unwrap()
    }

    pub async fn event_log(&self, id: Uuid) -> Vec<(String, String)> {
        self.store
            .list_events(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.step, e.status.to_string()))
            .collect()
    }
}

/// Delegates to a real store but refuses every audit write.
pub struct EventlessStore {
    pub inner: Arc<SeaOrmTenantStore>,
}

#[async_trait]
impl TenantStore for EventlessStore {
    async fn find_tenant(&self, id: Uuid) -> Result<tenants::Model, ProvisioningError> {
        self.inner.find_tenant(id).await
    }

    async fn create_tenant(&self, tenant: NewTenant) -> Result<tenants::Model, ProvisioningError> {
        self.inner.create_tenant(tenant).await
    }

    async fn update_tenant(
        &self,
        id: Uuid,
        update: TenantUpdate,
    ) -> Result<tenants::Model, ProvisioningError> {
        self.inner.update_tenant(id, update).await
    }

    async fn list_tenants(&self) -> Result<Vec<tenants::Model>, ProvisioningError> {
        self.inner.list_tenants().await
    }

    async fn soft_delete_tenant(&self, id: Uuid) -> Result<tenants::Model, ProvisioningError> {
        self.inner.soft_delete_tenant(id).await
    }

    async fn append_event(&self, _event: NewProvisioningEvent) -> Result<(), ProvisioningError> {
        Err(ProvisioningError::Database(sea_orm::DbErr::Custom(
            "event table unavailable".to_string(),
        )))
    }

    async fn list_events(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<fleet_entities::tenant_provisioning_events::Model>, ProvisioningError> {
        self.inner.list_events(tenant_id).await
    }
}
