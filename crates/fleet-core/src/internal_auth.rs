//! Shared-secret authentication for internal routes
//!
//! Handlers take [`RequireInternalKey`] as an argument; the extractor rejects
//! the request with a 401 problem unless the `X-Internal-Key` header matches
//! the key exposed by the router state.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use std::sync::Arc;
use tracing::warn;

use crate::problemdetails::{self, Problem};

pub const INTERNAL_KEY_HEADER: &str = "X-Internal-Key";

/// Router state that knows the configured internal API key.
pub trait InternalKeySource: Send + Sync {
    fn internal_api_key(&self) -> Option<&str>;
}

/// Proof that the caller presented the internal API key.
#[derive(Debug, Clone, Copy)]
pub struct RequireInternalKey;

fn unauthorized() -> Problem {
    problemdetails::new(StatusCode::UNAUTHORIZED)
        .with_title("Unauthorized")
        .with_detail("A valid internal API key is required")
}

impl<S> FromRequestParts<Arc<S>> for RequireInternalKey
where
    S: InternalKeySource + 'static,
{
    type Rejection = Problem;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<S>) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(INTERNAL_KEY_HEADER)
            .and_then(|v| v.to_str().ok());

        match (presented, state.internal_api_key()) {
            (Some(presented), Some(expected)) if presented == expected => Ok(RequireInternalKey),
            (_, None) => {
                warn!("Rejected internal request: no internal API key configured");
                Err(unauthorized())
            }
            _ => {
                warn!("Unauthorized attempt to access {}", parts.uri.path());
                Err(unauthorized())
            }
        }
    }
}
