//! Shared type aliases

use chrono::{DateTime as ChronoDateTime, Utc};

/// Timestamp type used by every persisted entity.
///
/// Stored as `timestamp with time zone` on Postgres and as RFC 3339 text on SQLite.
pub type DBDateTime = ChronoDateTime<Utc>;

/// Returns the current time as a [`DBDateTime`].
pub fn utc_now() -> DBDateTime {
    Utc::now()
}
