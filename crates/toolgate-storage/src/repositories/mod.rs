//! SQLite repository implementations.

mod backend_repository;
mod credential_repository;
mod secret_store;

pub use backend_repository::SqliteBackendRepository;
pub use credential_repository::SqliteCredentialRepository;
pub use secret_store::SqliteSecretStore;

use chrono::{DateTime, Utc};

/// Parse a stored datetime, accepting both RFC 3339 and SQLite's
/// `datetime('now')` format.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return dt.and_utc();
    }
    Utc::now()
}

pub(crate) fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|dt| parse_datetime(&dt))
}
