//! Capability interfaces, one per infrastructure concern
//!
//! Provisioning code depends only on these traits; tests substitute
//! in-memory fakes for the HTTP clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProviderError;

pub type ProviderResult<T> = Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// Database lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchEndpoint {
    pub id: String,
    pub host: String,
    #[serde(rename = "type", default)]
    pub endpoint_type: String,
}

/// A role as returned on creation; the password is only revealed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseRole {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[async_trait]
pub trait DatabaseApi: Send + Sync {
    async fn list_branches(&self, project_id: &str) -> ProviderResult<Vec<Branch>>;

    async fn list_branch_endpoints(
        &self,
        project_id: &str,
        branch_id: &str,
    ) -> ProviderResult<Vec<BranchEndpoint>>;

    async fn create_role(
        &self,
        project_id: &str,
        branch_id: &str,
        role_name: &str,
    ) -> ProviderResult<DatabaseRole>;

    async fn create_database(
        &self,
        project_id: &str,
        branch_id: &str,
        database_name: &str,
        owner_name: &str,
    ) -> ProviderResult<()>;

    async fn delete_database(
        &self,
        project_id: &str,
        branch_id: &str,
        database_name: &str,
    ) -> ProviderResult<()>;

    async fn delete_role(
        &self,
        project_id: &str,
        branch_id: &str,
        role_name: &str,
    ) -> ProviderResult<()>;
}

// ---------------------------------------------------------------------------
// Compute lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// A long-running operation handle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

/// The subset of a service or job resource the control plane reads back.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
}

/// Create request; exactly one of `service_id` and `job_id` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateResource {
    pub parent: String,
    pub service_id: Option<String>,
    pub job_id: Option<String>,
    pub spec: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IamPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default)]
    pub bindings: Vec<PolicyBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCondition {
    #[serde(rename = "type", default)]
    pub condition_type: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// A job execution as reported by the compute provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    pub name: String,
    #[serde(default)]
    pub succeeded_count: i32,
    #[serde(default)]
    pub failed_count: i32,
    #[serde(default)]
    pub cancelled_count: i32,
    #[serde(default)]
    pub running_count: i32,
    #[serde(default)]
    pub conditions: Vec<ExecutionCondition>,
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Read a service or job by its full resource name.
    async fn get_resource(&self, name: &str) -> ProviderResult<Resource>;

    async fn create_resource(&self, request: CreateResource) -> ProviderResult<Operation>;

    async fn patch_resource(&self, name: &str, spec: Value) -> ProviderResult<Operation>;

    async fn delete_resource(&self, name: &str) -> ProviderResult<Operation>;

    async fn get_iam_policy(&self, name: &str) -> ProviderResult<IamPolicy>;

    async fn set_iam_policy(&self, name: &str, policy: IamPolicy) -> ProviderResult<IamPolicy>;

    async fn run_job(&self, name: &str) -> ProviderResult<Operation>;

    async fn get_execution(&self, name: &str) -> ProviderResult<JobExecution>;

    async fn get_operation(&self, name: &str) -> ProviderResult<Operation>;
}

// ---------------------------------------------------------------------------
// DNS / edge lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecordRequest {
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    pub proxied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationRecord {
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub http_body: Option<String>,
    #[serde(default)]
    pub txt_name: Option<String>,
    #[serde(default)]
    pub txt_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomHostnameSsl {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(rename = "type", default)]
    pub ssl_type: Option<String>,
    #[serde(default)]
    pub validation_records: Vec<ValidationRecord>,
    #[serde(default)]
    pub validation_errors: Vec<ValidationError>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomHostname {
    #[serde(default)]
    pub id: String,
    pub hostname: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ssl: Option<CustomHostnameSsl>,
    #[serde(default)]
    pub verification_errors: Vec<String>,
}

#[async_trait]
pub trait EdgeApi: Send + Sync {
    async fn create_dns_record(&self, record: DnsRecordRequest) -> ProviderResult<DnsRecord>;

    /// Register a hostname with HTTP-01 domain validation.
    async fn create_custom_hostname(&self, hostname: &str) -> ProviderResult<CustomHostname>;

    async fn list_custom_hostnames(&self, hostname: &str) -> ProviderResult<Vec<CustomHostname>>;
}
