//! Tenant domain routing: platform subdomains and custom hostnames

use fleet_providers::{CustomHostname, DnsRecordRequest, EdgeApi};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ProvisioningError;

/// Edge error codes for a record that already exists at the same host
pub const DUPLICATE_RECORD_CODES: [i64; 2] = [81053, 81057];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DomainKind {
    /// Platform subdomain behind the wildcard certificate
    Default,
    /// Merchant-owned hostname validated over HTTP-01
    Custom,
}

/// HTTP-01 challenge to serve at `/.well-known/acme-challenge/{token}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AcmeChallenge {
    pub token: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainOutcome {
    pub hostname: String,
    pub kind: DomainKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acme_challenge: Option<AcmeChallenge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainStatus {
    pub hostname: String,
    /// `None` when the edge has no custom hostname registered
    pub status: Option<String>,
    pub ssl_status: Option<String>,
    pub verification_errors: Vec<String>,
}

pub struct DomainConfigurator {
    edge: Arc<dyn EdgeApi>,
    base_domain: String,
    storefront_hostname: String,
}

impl DomainConfigurator {
    pub fn new(
        edge: Arc<dyn EdgeApi>,
        base_domain: impl Into<String>,
        storefront_hostname: impl Into<String>,
    ) -> Self {
        Self {
            edge,
            base_domain: base_domain.into(),
            storefront_hostname: storefront_hostname.into(),
        }
    }

    pub fn is_custom(subdomain: &str) -> bool {
        subdomain.contains('.')
    }

    /// Full hostname a tenant is served on.
    pub fn hostname_for(&self, subdomain: &str) -> String {
        if Self::is_custom(subdomain) {
            subdomain.to_string()
        } else {
            format!("{}{}", subdomain, self.base_domain)
        }
    }

    pub async fn configure(
        &self,
        tenant_id: Uuid,
        subdomain: &str,
    ) -> Result<DomainOutcome, ProvisioningError> {
        if subdomain.trim().is_empty() {
            return Err(ProvisioningError::Validation(
                "Subdomain must not be empty".to_string(),
            ));
        }

        if Self::is_custom(subdomain) {
            self.configure_custom(subdomain).await
        } else {
            self.configure_default(tenant_id, subdomain).await
        }
    }

    async fn configure_default(
        &self,
        tenant_id: Uuid,
        subdomain: &str,
    ) -> Result<DomainOutcome, ProvisioningError> {
        let hostname = self.hostname_for(subdomain);
        let record = DnsRecordRequest {
            record_type: "CNAME".to_string(),
            name: hostname.clone(),
            content: self.storefront_hostname.clone(),
            proxied: true,
            comment: Some(format!("Default domain for tenant {}", tenant_id)),
        };

        match self.edge.create_dns_record(record).await {
            Ok(created) => info!("Created CNAME {} for tenant {}", created.name, tenant_id),
            Err(e) if DUPLICATE_RECORD_CODES.iter().any(|code| e.has_code(*code)) => {
                warn!("CNAME {} already exists, keeping it: {}", hostname, e);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(DomainOutcome {
            hostname,
            kind: DomainKind::Default,
            acme_challenge: None,
        })
    }

    async fn configure_custom(&self, hostname: &str) -> Result<DomainOutcome, ProvisioningError> {
        let existing = self
            .edge
            .list_custom_hostnames(hostname)
            .await?
            .into_iter()
            .find(|h| h.hostname == hostname);

        let registered = match existing {
            Some(found) => {
                warn!(
                    "Custom hostname {} already registered ({}), keeping it",
                    hostname, found.id
                );
                found
            }
            None => {
                let created = self.edge.create_custom_hostname(hostname).await?;
                info!(
                    "Registered custom hostname {} ({})",
                    created.hostname,
                    created.status.as_deref().unwrap_or("unknown")
                );
                created
            }
        };

        let acme_challenge = acme_challenge(&registered);
        if acme_challenge.is_none() {
            warn!("No HTTP validation record returned for {}", hostname);
        }

        Ok(DomainOutcome {
            hostname: hostname.to_string(),
            kind: DomainKind::Custom,
            acme_challenge,
        })
    }

    /// Report the edge's view of a tenant's custom hostname.
    pub async fn status(&self, subdomain: &str) -> Result<DomainStatus, ProvisioningError> {
        let hostname = self.hostname_for(subdomain);
        let found = self
            .edge
            .list_custom_hostnames(&hostname)
            .await?
            .into_iter()
            .find(|h| h.hostname == hostname);

        Ok(match found {
            Some(h) => {
                let ssl = h.ssl.unwrap_or_default();
                let mut verification_errors = h.verification_errors;
                verification_errors.extend(ssl.validation_errors.into_iter().map(|e| e.message));
                DomainStatus {
                    hostname,
                    status: h.status,
                    ssl_status: ssl.status,
                    verification_errors,
                }
            }
            None => DomainStatus {
                hostname,
                status: None,
                ssl_status: None,
                verification_errors: Vec::new(),
            },
        })
    }
}

/// Extract the HTTP-01 token and body from a custom hostname response.
pub fn acme_challenge(hostname: &CustomHostname) -> Option<AcmeChallenge> {
    hostname
        .ssl
        .as_ref()?
        .validation_records
        .iter()
        .find_map(|record| {
            let url = record.http_url.as_deref()?;
            let body = record.http_body.as_deref()?;
            let token = url.rsplit('/').find(|segment| !segment.is_empty())?;
            Some(AcmeChallenge {
                token: token.to_string(),
                response: body.to_string(),
            })
        })
}
