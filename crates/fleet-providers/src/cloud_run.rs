//! Google Cloud Run (Admin API v2) compute provider
//!
//! Authentication uses a service account key: a self-signed RS256 JWT is
//! exchanged for an OAuth access token, which is cached until shortly before
//! it expires.
//!
//! Required IAM Roles:
//! - roles/run.admin
//! - roles/iam.serviceAccountUser (when deploying with a runtime service account)

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::credentials::GcpCredentials;
use crate::errors::ProviderError;
use crate::traits::{
    ComputeApi, CreateResource, IamPolicy, JobExecution, Operation, ProviderResult, Resource,
};

const CLOUD_RUN_API_BASE: &str = "https://run.googleapis.com/v2";
const GCP_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Refresh this long before the token actually expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct CloudRunClient {
    client: Client,
    credentials: GcpCredentials,
    base_url: String,
    token_url: String,
    access_token: tokio::sync::RwLock<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct SetIamPolicyRequest {
    policy: IamPolicy,
}

impl CloudRunClient {
    pub fn new(credentials: GcpCredentials) -> Result<Self, ProviderError> {
        Self::build(
            credentials,
            CLOUD_RUN_API_BASE.to_string(),
            GCP_TOKEN_URL.to_string(),
            None,
        )
    }

    /// Create a client against a custom API and token endpoint (for testing)
    pub fn with_endpoints(
        credentials: GcpCredentials,
        base_url: String,
        token_url: String,
    ) -> Result<Self, ProviderError> {
        Self::build(credentials, base_url, token_url, None)
    }

    /// Create a client with a pre-set access token (for testing)
    pub fn with_test_token(
        credentials: GcpCredentials,
        base_url: String,
        token: String,
    ) -> Result<Self, ProviderError> {
        Self::build(
            credentials,
            base_url,
            GCP_TOKEN_URL.to_string(),
            Some(CachedToken {
                value: token,
                expires_at: Instant::now() + Duration::from_secs(3600),
            }),
        )
    }

    fn build(
        credentials: GcpCredentials,
        base_url: String,
        token_url: String,
        token: Option<CachedToken>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            token_url,
            access_token: tokio::sync::RwLock::new(token),
        })
    }

    /// Get access token for API requests
    async fn get_access_token(&self) -> ProviderResult<String> {
        {
            let token = self.access_token.read().await;
            if let Some(cached) = token.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.value.clone());
                }
            }
        }

        let jwt = self.create_jwt()?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(ProviderError::InvalidCredentials(format!(
                "Failed to get access token: {}",
                error
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token_response.expires_in)
            .saturating_sub(TOKEN_EXPIRY_MARGIN);

        {
            let mut token = self.access_token.write().await;
            *token = Some(CachedToken {
                value: token_response.access_token.clone(),
                expires_at: Instant::now() + lifetime,
            });
        }

        Ok(token_response.access_token)
    }

    /// Create JWT for service account authentication
    fn create_jwt(&self) -> ProviderResult<String> {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

        let now = chrono::Utc::now().timestamp();
        let exp = now + 3600;

        let header = serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        });

        let claims = serde_json::json!({
            "iss": self.credentials.service_account_email,
            "scope": CLOUD_PLATFORM_SCOPE,
            "aud": self.token_url,
            "iat": now,
            "exp": exp
        });

        let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string().as_bytes());
        let claims_b64 = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        let message = format!("{}.{}", header_b64, claims_b64);

        let signature = sign_rs256(&message, &self.credentials.private_key)?;
        Ok(format!("{}.{}", message, URL_SAFE_NO_PAD.encode(signature)))
    }

    async fn api_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&(impl Serialize + Sync)>,
    ) -> ProviderResult<T> {
        let token = self.get_access_token().await?;
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        debug!("Cloud Run API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.as_u16() == 404 {
            return Err(ProviderError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let message = serde_json::from_str::<GoogleErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(ProviderError::api(status.as_u16(), message));
        }

        if text.is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        serde_json::from_str(&text).map_err(|e| {
            ProviderError::UnexpectedResponse(format!("{} - Body: {}", e, text))
        })
    }
}

/// Sign message with RS256 (RSA-SHA256)
fn sign_rs256(message: &str, private_key_pem: &str) -> ProviderResult<Vec<u8>> {
    use rsa::pkcs1v15::SigningKey;
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::RsaPrivateKey;
    use sha2::Sha256;

    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| ProviderError::InvalidCredentials(format!("Invalid private key: {}", e)))?;

    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature = signing_key.sign(message.as_bytes());

    Ok(signature.to_vec())
}

#[async_trait]
impl ComputeApi for CloudRunClient {
    async fn get_resource(&self, name: &str) -> ProviderResult<Resource> {
        self.api_request(Method::GET, name, &[], None::<&()>).await
    }

    async fn create_resource(&self, request: CreateResource) -> ProviderResult<Operation> {
        let (collection, id_param, id) = match (&request.service_id, &request.job_id) {
            (Some(service_id), None) => ("services", "serviceId", service_id.as_str()),
            (None, Some(job_id)) => ("jobs", "jobId", job_id.as_str()),
            _ => {
                return Err(ProviderError::UnexpectedResponse(
                    "create request must name exactly one of service or job".to_string(),
                ))
            }
        };

        let path = format!("{}/{}", request.parent, collection);
        self.api_request(Method::POST, &path, &[(id_param, id)], Some(&request.spec))
            .await
    }

    async fn patch_resource(&self, name: &str, spec: Value) -> ProviderResult<Operation> {
        self.api_request(Method::PATCH, name, &[], Some(&spec)).await
    }

    async fn delete_resource(&self, name: &str) -> ProviderResult<Operation> {
        self.api_request(Method::DELETE, name, &[], None::<&()>)
            .await
    }

    async fn get_iam_policy(&self, name: &str) -> ProviderResult<IamPolicy> {
        let path = format!("{}:getIamPolicy", name);
        self.api_request(Method::GET, &path, &[], None::<&()>).await
    }

    async fn set_iam_policy(&self, name: &str, policy: IamPolicy) -> ProviderResult<IamPolicy> {
        let path = format!("{}:setIamPolicy", name);
        let body = SetIamPolicyRequest { policy };
        self.api_request(Method::POST, &path, &[], Some(&body)).await
    }

    async fn run_job(&self, name: &str) -> ProviderResult<Operation> {
        let path = format!("{}:run", name);
        self.api_request(Method::POST, &path, &[], Some(&serde_json::json!({})))
            .await
    }

    async fn get_execution(&self, name: &str) -> ProviderResult<JobExecution> {
        self.api_request(Method::GET, name, &[], None::<&()>).await
    }

    async fn get_operation(&self, name: &str) -> ProviderResult<Operation> {
        self.api_request(Method::GET, name, &[], None::<&()>).await
    }
}
