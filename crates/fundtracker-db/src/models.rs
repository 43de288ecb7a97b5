//! Database row types — these map directly to SQLite rows.
//! Distinct from fundtracker-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};
use tracing::warn;

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

pub struct NgoRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub registration_number: Option<String>,
    pub is_verified: bool,
    pub verified_at: Option<String>,
    pub verified_by: Option<String>,
    pub created_at: String,
}

pub struct ProjectRow {
    pub id: String,
    pub ngo_id: String,
    pub name: String,
    pub description: Option<String>,
    pub target_amount: i64,
    pub status: String,
    pub created_at: String,
}

pub struct DonationRow {
    pub id: String,
    pub project_id: String,
    pub donor_id: Option<String>,
    pub amount: i64,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub status: String,
    pub transaction_id: Option<String>,
    pub created_at: String,
}

pub struct ExpenseRow {
    pub id: String,
    pub project_id: String,
    pub amount: i64,
    pub purpose: String,
    pub description: Option<String>,
    pub expense_date: Option<String>,
    pub proof_url: Option<String>,
    pub is_flagged: bool,
    pub flagged_by: Option<String>,
    pub flagged_reason: Option<String>,
    pub created_at: String,
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Parse as naive UTC and convert, falling back to the RFC 3339 form.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
