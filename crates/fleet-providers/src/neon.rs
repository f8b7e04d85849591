//! Neon serverless Postgres provider
//!
//! Talks to the Neon management API v2 with a project-scoped API key.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::errors::ProviderError;
use crate::traits::{Branch, BranchEndpoint, DatabaseApi, DatabaseRole, ProviderResult};

const NEON_API_BASE: &str = "https://console.neon.tech/api/v2";

pub struct NeonClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BranchesResponse {
    #[serde(default)]
    branches: Vec<Branch>,
}

#[derive(Debug, Deserialize)]
struct EndpointsResponse {
    #[serde(default)]
    endpoints: Vec<BranchEndpoint>,
}

#[derive(Debug, Deserialize)]
struct RoleResponse {
    role: DatabaseRole,
}

#[derive(Debug, Serialize)]
struct CreateRoleRequest<'a> {
    role: NamedRole<'a>,
}

#[derive(Debug, Serialize)]
struct NamedRole<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateDatabaseRequest<'a> {
    database: NewDatabase<'a>,
}

#[derive(Debug, Serialize)]
struct NewDatabase<'a> {
    name: &'a str,
    owner_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct NeonErrorBody {
    #[serde(default)]
    message: String,
}

impl NeonClient {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, NEON_API_BASE.to_string())
    }

    /// Create a client against a custom base URL (for testing)
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn branch_path(project_id: &str, branch_id: &str) -> String {
        format!(
            "/projects/{}/branches/{}",
            urlencoding::encode(project_id),
            urlencoding::encode(branch_id)
        )
    }

    async fn api_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&(impl Serialize + Sync)>,
    ) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Neon API request: {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json");
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
            let message = serde_json::from_str::<NeonErrorBody>(&text)
                .map(|b| b.message)
                .unwrap_or(text);
            return Err(ProviderError::api(status.as_u16(), message));
        }

        if text.is_empty() {
            return Ok(serde_json::from_str("null")?);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl DatabaseApi for NeonClient {
    async fn list_branches(&self, project_id: &str) -> ProviderResult<Vec<Branch>> {
        let path = format!("/projects/{}/branches", urlencoding::encode(project_id));
        let response: BranchesResponse = self.api_request(Method::GET, &path, None::<&()>).await?;
        Ok(response.branches)
    }

    async fn list_branch_endpoints(
        &self,
        project_id: &str,
        branch_id: &str,
    ) -> ProviderResult<Vec<BranchEndpoint>> {
        let path = format!("{}/endpoints", Self::branch_path(project_id, branch_id));
        let response: EndpointsResponse =
            self.api_request(Method::GET, &path, None::<&()>).await?;
        Ok(response.endpoints)
    }

    async fn create_role(
        &self,
        project_id: &str,
        branch_id: &str,
        role_name: &str,
    ) -> ProviderResult<DatabaseRole> {
        let path = format!("{}/roles", Self::branch_path(project_id, branch_id));
        let body = CreateRoleRequest {
            role: NamedRole { name: role_name },
        };
        let response: RoleResponse = self.api_request(Method::POST, &path, Some(&body)).await?;
        Ok(response.role)
    }

    async fn create_database(
        &self,
        project_id: &str,
        branch_id: &str,
        database_name: &str,
        owner_name: &str,
    ) -> ProviderResult<()> {
        let path = format!("{}/databases", Self::branch_path(project_id, branch_id));
        let body = CreateDatabaseRequest {
            database: NewDatabase {
                name: database_name,
                owner_name,
            },
        };
        let _: serde_json::Value = self.api_request(Method::POST, &path, Some(&body)).await?;
        Ok(())
    }

    async fn delete_database(
        &self,
        project_id: &str,
        branch_id: &str,
        database_name: &str,
    ) -> ProviderResult<()> {
        let path = format!(
            "{}/databases/{}",
            Self::branch_path(project_id, branch_id),
            urlencoding::encode(database_name)
        );
        let _: serde_json::Value = self.api_request(Method::DELETE, &path, None::<&()>).await?;
        Ok(())
    }

    async fn delete_role(
        &self,
        project_id: &str,
        branch_id: &str,
        role_name: &str,
    ) -> ProviderResult<()> {
        let path = format!(
            "{}/roles/{}",
            Self::branch_path(project_id, branch_id),
            urlencoding::encode(role_name)
        );
        let _: serde_json::Value = self.api_request(Method::DELETE, &path, None::<&()>).await?;
        Ok(())
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> NeonClient {
        NeonClient::with_base_url("neon_test_key".to_string(), server.uri()).unwrap()
    }

    #[tokio::test]
    async fn test_list_branches() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/proj-1/branches"))
            .and(header("Authorization", "Bearer neon_test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "branches": [
                    {"id": "br-dev", "name": "dev", "default": false},
                    {"id": "br-main", "name": "main", "default": true}
                ]
            })))
            .mount(&server)
            .await;

        let branches = client(&server).list_branches("proj-1").await.unwrap();

        assert_eq!(branches.len(), 2);
        assert!(branches[1].default);
        assert_eq!(branches[1].id, "br-main");
    }

    #[tokio::test]
    async fn test_create_role_returns_password() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/projects/proj-1/branches/br-main/roles"))
            .and(body_json(serde_json::json!({"role": {"name": "user_abc"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "role": {"name": "user_abc", "password": "s3cret"},
                "operations": []
            })))
            .mount(&server)
            .await;

        let role = client(&server)
            .create_role("proj-1", "br-main", "user_abc")
            .await
            .unwrap();

        assert_eq!(role.password.as_deref(), Some("s3cret"));
    }

    #[tokio::test]
    async fn test_create_database_sends_owner() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/projects/proj-1/branches/br-main/databases"))
            .and(body_json(serde_json::json!({
                "database": {"name": "db_abc", "owner_name": "user_abc"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "database": {"name": "db_abc", "owner_name": "user_abc"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .create_database("proj-1", "br-main", "db_abc", "user_abc")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_database_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/projects/proj-1/branches/br-main/databases/db_gone"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"message": "database not found"})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .delete_database("proj-1", "br-main", "db_gone")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_api_error_carries_message() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/projects/proj-1/branches"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({"message": "rate limited"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).list_branches("proj-1").await.unwrap_err();

        match err {
            ProviderError::Api { status, message, .. } => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limited");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
