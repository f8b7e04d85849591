//! Cloudflare edge provider
//!
//! DNS records and Cloudflare for SaaS custom hostnames in a single zone,
//! via the client/v4 REST API with a scoped API token.
//! Required token permissions: Zone:DNS:Edit, Zone:SSL and Certificates:Edit

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::errors::ProviderError;
use crate::traits::{CustomHostname, DnsRecord, DnsRecordRequest, EdgeApi, ProviderResult};

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

pub struct CloudflareClient {
    client: Client,
    api_token: String,
    zone_id: String,
    base_url: String,
}

/// Standard Cloudflare response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CloudflareMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct CustomHostnameRequest<'a> {
    hostname: &'a str,
    ssl: SslSettings<'a>,
}

#[derive(Debug, Serialize)]
struct SslSettings<'a> {
    method: &'a str,
    #[serde(rename = "type")]
    ssl_type: &'a str,
}

impl CloudflareClient {
    pub fn new(api_token: String, zone_id: String) -> Result<Self, ProviderError> {
        Self::with_base_url(api_token, zone_id, CLOUDFLARE_API_BASE.to_string())
    }

    /// Create a client against a custom base URL (for testing)
    pub fn with_base_url(
        api_token: String,
        zone_id: String,
        base_url: String,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_token,
            zone_id,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn api_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&(impl Serialize + Sync)>,
    ) -> ProviderResult<T> {
        let url = format!(
            "{}/zones/{}{}",
            self.base_url,
            urlencoding::encode(&self.zone_id),
            path
        );
        debug!("Cloudflare API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) if status >= 400 => {
                debug!("Unparseable Cloudflare error body: {}", e);
                return Err(ProviderError::api(status, text));
            }
            Err(e) => return Err(e.into()),
        };

        if !envelope.success || status >= 400 {
            let message = envelope
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.message, e.code))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ProviderError::Api {
                status,
                codes: envelope.errors.iter().map(|e| e.code).collect(),
                message,
            });
        }

        envelope
            .result
            .ok_or_else(|| ProviderError::UnexpectedResponse(format!("{} returned no result", path)))
    }
}

#[async_trait]
impl EdgeApi for CloudflareClient {
    async fn create_dns_record(&self, record: DnsRecordRequest) -> ProviderResult<DnsRecord> {
        self.api_request(Method::POST, "/dns_records", &[], Some(&record))
            .await
    }

    async fn create_custom_hostname(&self, hostname: &str) -> ProviderResult<CustomHostname> {
        let body = CustomHostnameRequest {
            hostname,
            ssl: SslSettings {
                method: "http",
                ssl_type: "dv",
            },
        };
        self.api_request(Method::POST, "/custom_hostnames", &[], Some(&body))
            .await
    }

    async fn list_custom_hostnames(&self, hostname: &str) -> ProviderResult<Vec<CustomHostname>> {
        self.api_request(
            Method::GET,
            "/custom_hostnames",
            &[("hostname", hostname)],
            None::<&()>,
        )
        .await
    }
}
