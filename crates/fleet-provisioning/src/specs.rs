//! Resource naming and desired-state specs for tenant compute resources

use fleet_core::TenantRuntimeSettings;
use fleet_entities::tenants;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::ProvisioningError;

pub const CONTAINER_PORT: u16 = 9000;
pub const HEALTH_PATH: &str = "/health";
pub const MIGRATION_COMMAND: [&str; 2] = ["./node_modules/.bin/medusa", "db:migrate"];

/// Derives resource names from tenant ids within one project and region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    project_id: String,
    region: String,
}

impl ResourceNames {
    pub fn new(project_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            region: region.into(),
        }
    }

    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project_id, self.region)
    }

    pub fn service_id(tenant_id: Uuid) -> String {
        format!("tenant-{}", tenant_id)
    }

    pub fn job_id(tenant_id: Uuid) -> String {
        format!("migration-{}", tenant_id)
    }

    pub fn service_name(&self, tenant_id: Uuid) -> String {
        format!("{}/services/{}", self.parent(), Self::service_id(tenant_id))
    }

    pub fn job_name(&self, tenant_id: Uuid) -> String {
        format!("{}/jobs/{}", self.parent(), Self::job_id(tenant_id))
    }
}

/// Which process the environment is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workload {
    Service,
    MigrationJob,
}

/// Build the application environment for a tenant workload.
///
/// Fails when the tenant lacks a database URL or redis hash, or when the
/// shared redis URL is not configured.
pub fn tenant_environment(
    tenant: &tenants::Model,
    runtime: &TenantRuntimeSettings,
    workload: Workload,
    step: &'static str,
) -> Result<BTreeMap<String, String>, ProvisioningError> {
    let database_url = tenant
        .database_url
        .as_deref()
        .ok_or_else(|| ProvisioningError::missing(step, "Database URL missing"))?;
    let redis_hash = tenant
        .redis_hash
        .as_deref()
        .ok_or_else(|| ProvisioningError::missing(step, "Redis hash missing"))?;
    let redis_url = runtime
        .redis_url
        .as_deref()
        .ok_or_else(|| ProvisioningError::missing(step, "Upstash Redis URL missing"))?;

    let mut env = BTreeMap::new();
    env.insert("DATABASE_URL".to_string(), database_url.to_string());
    env.insert("REDIS_URL".to_string(), redis_url.to_string());
    env.insert("REDIS_PREFIX".to_string(), format!("t_{}:", redis_hash));
    env.insert("JWT_SECRET".to_string(), tenant.jwt_secret.clone());
    env.insert("COOKIE_SECRET".to_string(), tenant.cookie_secret.clone());
    env.insert("NODE_ENV".to_string(), "production".to_string());

    if workload == Workload::Service {
        let subdomain = tenant
            .subdomain
            .as_deref()
            .ok_or_else(|| ProvisioningError::missing(step, "Subdomain missing"))?;
        let cors = cors_origins(subdomain, &runtime.base_domain);

        env.insert("HOST".to_string(), "0.0.0.0".to_string());
        env.insert("STORE_CORS".to_string(), cors.clone());
        env.insert("ADMIN_CORS".to_string(), cors);
        if let Some(key) = &runtime.gemini_api_key {
            env.insert("GEMINI_API_KEY".to_string(), key.clone());
        }
    }

    Ok(env)
}

fn cors_origins(subdomain: &str, base_domain: &str) -> String {
    let tenant_origin = if subdomain.contains('.') {
        format!("https://{}", subdomain)
    } else {
        format!("https://{}{}", subdomain, base_domain)
    };
    format!(
        "{},http://localhost:{},https://{}",
        tenant_origin,
        CONTAINER_PORT,
        base_domain.trim_start_matches(['-', '.'])
    )
}

fn project_env(env: &BTreeMap<String, String>) -> Vec<Value> {
    env.iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect()
}

fn http_health_check(initial_delay: u32, timeout: u32, failure_threshold: u32, period: u32) -> Value {
    json!({
        "httpGet": { "path": HEALTH_PATH, "port": CONTAINER_PORT },
        "initialDelaySeconds": initial_delay,
        "timeoutSeconds": timeout,
        "failureThreshold": failure_threshold,
        "periodSeconds": period,
    })
}

/// Desired state of a tenant's long-running service.
pub fn service_spec(
    image: &str,
    env: &BTreeMap<String, String>,
    service_account: Option<&str>,
) -> Value {
    let container = json!({
        "image": image,
        "env": project_env(env),
        "ports": [{ "containerPort": CONTAINER_PORT }],
        "startupProbe": http_health_check(10, 3, 24, 10),
        "livenessProbe": http_health_check(30, 5, 3, 15),
        "resources": {
            "limits": { "memory": "512Mi", "cpu": "1" },
            "cpuIdle": true,
        },
    });

    json!({
        "template": {
            "serviceAccount": service_account,
            "containers": [container],
            "scaling": { "minInstanceCount": 0, "maxInstanceCount": 3 },
        }
    })
}

/// Desired state of a tenant's one-shot migration job.
pub fn job_spec(
    image: &str,
    env: &BTreeMap<String, String>,
    service_account: Option<&str>,
) -> Value {
    json!({
        "template": {
            "template": {
                "containers": [{
                    "image": image,
                    "command": MIGRATION_COMMAND,
                    "env": project_env(env),
                    "resources": {
                        "limits": { "memory": "1024Mi", "cpu": "1" },
                    },
                }],
                "serviceAccount": service_account,
            }
        }
    })
}
