use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AppRole;

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: AppRole,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub role: AppRole,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub email: String,
    pub role: AppRole,
    pub token: String,
}

// -- NGOs --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateNgoRequest {
    pub name: String,
    pub description: Option<String>,
    pub registration_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetVerificationRequest {
    pub is_verified: bool,
}

#[derive(Debug, Serialize)]
pub struct NgoResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub registration_number: Option<String>,
    pub is_verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// -- Projects --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub target_amount: i64,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: Uuid,
    pub ngo_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub target_amount: i64,
    /// Sum of completed donations — the fund-utilization arithmetic is done
    /// server-side so every consumer sees the same number.
    pub raised_amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// -- Donations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDonationRequest {
    pub amount: i64,
    pub message: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    /// Optional idempotency key. Re-submitting the same key returns the
    /// donation created by the first submission instead of inserting twice.
    pub transaction_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DonationResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub donor_id: Option<Uuid>,
    pub amount: i64,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// -- Expenses --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateExpenseRequest {
    pub amount: i64,
    pub purpose: String,
    pub description: Option<String>,
    pub expense_date: Option<String>,
    pub proof_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagExpenseRequest {
    pub is_flagged: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExpenseResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub amount: i64,
    pub purpose: String,
    pub description: Option<String>,
    pub expense_date: Option<String>,
    pub proof_url: Option<String>,
    pub is_flagged: bool,
    pub flagged_by: Option<Uuid>,
    pub flagged_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
