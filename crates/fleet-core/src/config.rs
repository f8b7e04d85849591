//! Configuration loaded from the process environment
//!
//! Every provider block is optional: a provider whose credentials are missing
//! is simply not constructed, and the steps that need it report
//! `ProviderNotInitialized`. [`ProviderSettings::validate`] decides which
//! omissions are fatal for the current environment.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

pub const DEFAULT_TENANT_BASE_DOMAIN: &str = "-my.vendin.store";
pub const DEFAULT_STOREFRONT_HOSTNAME: &str = "storefront.vendin.store";

/// Neon (database provider) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeonSettings {
    pub api_key: String,
    pub project_id: String,
}

/// Google Cloud (compute provider) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpSettings {
    pub project_id: String,
    pub region: String,
    /// Inline service-account JSON or a path to the key file
    pub credentials: Option<String>,
    pub service_account: Option<String>,
}

/// Cloudflare (DNS/edge provider) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudflareSettings {
    pub api_token: String,
    pub zone_id: String,
}

/// Settings describing what runs inside every tenant instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRuntimeSettings {
    pub image_tag: Option<String>,
    pub redis_url: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Suffix appended to platform-issued subdomains, e.g. `-my.vendin.store`
    pub base_domain: String,
    /// Shared storefront host that tenant CNAMEs point at
    pub storefront_hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub environment: String,
    pub internal_api_key: Option<String>,
    pub neon: Option<NeonSettings>,
    pub gcp: Option<GcpSettings>,
    pub cloudflare: Option<CloudflareSettings>,
    pub tenant: TenantRuntimeSettings,
}

impl ProviderSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = get("FLEET_ENV")
            .or_else(|| get("NODE_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let neon = match (get("NEON_API_KEY"), get("NEON_PROJECT_ID")) {
            (Some(api_key), Some(project_id)) => Some(NeonSettings {
                api_key,
                project_id,
            }),
            _ => None,
        };

        // Secret managers cap value sizes, so the key may arrive split in three parts
        let credentials = get("GOOGLE_APPLICATION_CREDENTIALS").or_else(|| {
            match (
                get("GOOGLE_APPLICATION_CREDENTIALS_PART_1"),
                get("GOOGLE_APPLICATION_CREDENTIALS_PART_2"),
                get("GOOGLE_APPLICATION_CREDENTIALS_PART_3"),
            ) {
                (Some(p1), Some(p2), Some(p3)) => Some(format!("{}{}{}", p1, p2, p3)),
                _ => None,
            }
        });

        let gcp = match (get("GCP_PROJECT_ID"), get("GCP_REGION")) {
            (Some(project_id), Some(region)) => Some(GcpSettings {
                project_id,
                region,
                credentials,
                service_account: get("CLOUD_RUN_SERVICE_ACCOUNT"),
            }),
            _ => None,
        };

        let cloudflare = match (get("CLOUDFLARE_API_TOKEN"), get("CLOUDFLARE_ZONE_ID")) {
            (Some(api_token), Some(zone_id)) => Some(CloudflareSettings { api_token, zone_id }),
            _ => None,
        };

        Self {
            environment,
            internal_api_key: get("INTERNAL_API_KEY"),
            neon,
            gcp,
            cloudflare,
            tenant: TenantRuntimeSettings {
                image_tag: get("TENANT_IMAGE_TAG"),
                redis_url: get("UPSTASH_REDIS_URL"),
                gemini_api_key: get("GEMINI_API_KEY"),
                base_domain: get("TENANT_BASE_DOMAIN")
                    .unwrap_or_else(|| DEFAULT_TENANT_BASE_DOMAIN.to_string()),
                storefront_hostname: get("STOREFRONT_HOSTNAME")
                    .unwrap_or_else(|| DEFAULT_STOREFRONT_HOSTNAME.to_string()),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Names of the variables that must be present but are not.
    pub fn missing_variables(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if self.tenant.redis_url.is_none() {
            missing.push("UPSTASH_REDIS_URL");
        }

        if !self.is_production() {
            return missing;
        }

        if self.internal_api_key.is_none() {
            missing.push("INTERNAL_API_KEY");
        }
        if self.neon.is_none() {
            missing.extend(["NEON_API_KEY", "NEON_PROJECT_ID"]);
        }
        match &self.gcp {
            None => missing.extend(["GCP_PROJECT_ID", "GCP_REGION"]),
            Some(gcp) => {
                if gcp.credentials.is_none() {
                    missing.push("GOOGLE_APPLICATION_CREDENTIALS");
                }
                if gcp.service_account.is_none() {
                    missing.push("CLOUD_RUN_SERVICE_ACCOUNT");
                }
            }
        }
        if self.tenant.image_tag.is_none() {
            missing.push("TENANT_IMAGE_TAG");
        }
        if self.tenant.gemini_api_key.is_none() {
            missing.push("GEMINI_API_KEY");
        }
        if self.cloudflare.is_none() {
            missing.extend(["CLOUDFLARE_API_TOKEN", "CLOUDFLARE_ZONE_ID"]);
        }

        missing
    }

    /// Fail with the full list of missing variables, if any.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let missing = self.missing_variables();
        if missing.is_empty() {
            return Ok(());
        }

        tracing::error!(
            "Missing configuration for {} environment: {}",
            self.environment,
            missing.join(", ")
        );
        Err(ServiceError::Configuration {
            message: format!("Missing infrastructure configuration: {}", missing.join(", ")),
        })
    }
}
