//! Core utilities and types shared across all fleet crates

pub mod config;
pub mod error;
pub mod internal_auth;
pub mod problemdetails;
pub mod types;

pub use problemdetails::ProblemDetails;

// Re-export commonly used types
pub use config::*;
pub use error::*;
pub use types::*;

// Re-export external dependencies
pub use anyhow;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
