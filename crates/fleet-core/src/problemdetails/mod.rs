//! RFC 7807 problem responses for the internal API.

use std::collections::BTreeMap;

use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::{response::IntoResponse, Json};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Schema of a problem body, used only for OpenAPI documentation.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "title": "Prerequisite Missing",
    "detail": "Tenant 7d0c... has no database URL recorded",
    "status": 422
}))]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_url: Option<String>,
    /// A short, human-readable summary of the problem type
    pub title: String,
    /// A human-readable explanation specific to this occurrence of the problem
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// HTTP status code of the response
    pub status: u16,
    /// Additional properties of the problem
    #[schema(additional_properties = true)]
    pub extensions: BTreeMap<String, Value>,
}

/// A problem response under construction.
#[derive(Debug, Clone)]
pub struct Problem {
    pub status_code: StatusCode,
    pub body: BTreeMap<String, Value>,
}

/// Start a new `Problem` carrying `status_code`.
pub fn new<S>(status_code: S) -> Problem
where
    S: Into<StatusCode>,
{
    let status_code = status_code.into();
    let mut body = BTreeMap::new();
    body.insert("status".to_owned(), Value::from(status_code.as_u16()));
    Problem { status_code, body }
}

impl Problem {
    pub fn with_type<S: Into<String>>(self, value: S) -> Self {
        self.with_value("type", value.into())
    }

    pub fn with_title<S: Into<String>>(self, value: S) -> Self {
        self.with_value("title", value.into())
    }

    pub fn with_detail<S: Into<String>>(self, value: S) -> Self {
        self.with_value("detail", value.into())
    }

    /// Attach an arbitrary extension member.
    pub fn with_value<V>(mut self, key: &str, value: V) -> Self
    where
        V: Into<Value>,
    {
        self.body.insert(key.to_owned(), value.into());
        self
    }

    /// Shorthand for a 500 carrying the error text as detail.
    pub fn internal<E: std::fmt::Display>(error: E) -> Self {
        new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_title("Internal Server Error")
            .with_detail(error.to_string())
    }

    /// Shorthand for a 400 with the given detail.
    pub fn bad_request<S: Into<String>>(detail: S) -> Self {
        new(StatusCode::BAD_REQUEST)
            .with_title("Bad Request")
            .with_detail(detail)
    }
}

/// Result type where the error is always a `Problem`.
pub type Result<T> = std::result::Result<T, Problem>;

impl IntoResponse for Problem {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status_code, Json(self.body)).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE));
        response
    }
}
