pub mod auth;
pub mod backend;
pub mod donations;
pub mod expenses;
pub mod mailer;
pub mod middleware;
pub mod ngos;
pub mod projects;

use tracing::warn;
use uuid::Uuid;

/// Stored ids are written from `Uuid::to_string`, so a parse failure means
/// row corruption; log it and fall back instead of failing the response.
pub(crate) fn parse_uuid(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", context, raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_opt_uuid(raw: Option<&str>, context: &str) -> Option<Uuid> {
    raw.map(|r| parse_uuid(r, context))
}
