//! Infrastructure provider clients
//!
//! One capability trait per concern ([`DatabaseApi`], [`ComputeApi`],
//! [`EdgeApi`]) with a reqwest-backed implementation for each.

pub mod cloud_run;
pub mod cloudflare;
pub mod credentials;
pub mod errors;
pub mod neon;
pub mod traits;

pub use cloud_run::CloudRunClient;
pub use cloudflare::CloudflareClient;
pub use credentials::GcpCredentials;
pub use errors::ProviderError;
pub use neon::NeonClient;
pub use traits::*;

use fleet_core::ProviderSettings;
use std::sync::Arc;
use tracing::{info, warn};

/// The provider clients that could be constructed from the current settings.
#[derive(Clone, Default)]
pub struct ProviderSet {
    pub database: Option<Arc<dyn DatabaseApi>>,
    pub compute: Option<Arc<dyn ComputeApi>>,
    pub edge: Option<Arc<dyn EdgeApi>>,
}

impl ProviderSet {
    /// Build every provider whose credentials are configured.
    ///
    /// A provider that cannot be built is left out with a warning; the steps
    /// depending on it fail later as not initialized.
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let database = match &settings.neon {
            Some(neon) => match NeonClient::new(neon.api_key.clone()) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn DatabaseApi>),
                Err(e) => {
                    warn!("Failed to initialize Neon client: {}", e);
                    None
                }
            },
            None => {
                warn!("NEON_API_KEY or NEON_PROJECT_ID not set; database provider disabled");
                None
            }
        };

        let compute = match settings
            .gcp
            .as_ref()
            .and_then(|gcp| gcp.credentials.as_deref())
        {
            Some(raw) => match GcpCredentials::from_service_account(raw).and_then(CloudRunClient::new)
            {
                Ok(client) => Some(Arc::new(client) as Arc<dyn ComputeApi>),
                Err(e) => {
                    warn!("Failed to initialize Cloud Run client: {}", e);
                    None
                }
            },
            None => {
                warn!("GCP project or credentials not set; compute provider disabled");
                None
            }
        };

        let edge = match &settings.cloudflare {
            Some(cf) => match CloudflareClient::new(cf.api_token.clone(), cf.zone_id.clone()) {
                Ok(client) => Some(Arc::new(client) as Arc<dyn EdgeApi>),
                Err(e) => {
                    warn!("Failed to initialize Cloudflare client: {}", e);
                    None
                }
            },
            None => {
                warn!("CLOUDFLARE_API_TOKEN or CLOUDFLARE_ZONE_ID not set; edge provider disabled");
                None
            }
        };

        info!(
            "Providers initialized: database={}, compute={}, edge={}",
            database.is_some(),
            compute.is_some(),
            edge.is_some()
        );

        Self {
            database,
            compute,
            edge,
        }
    }
}
