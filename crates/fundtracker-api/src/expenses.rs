use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};
use uuid::Uuid;

use fundtracker_db::models::{ExpenseRow, parse_timestamp};
use fundtracker_types::api::{CreateExpenseRequest, ExpenseResponse, FlagExpenseRequest};
use fundtracker_types::models::{AppRole, Claims};

use crate::auth::{AppState, join_error};
use crate::middleware::require_role;
use crate::{parse_opt_uuid, parse_uuid};

/// Operators record spending against their own projects only. The project's
/// owning NGO must belong to the caller.
pub async fn create_expense(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateExpenseRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_role(&claims, AppRole::Ngo)?;

    if req.amount <= 0 || req.purpose.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let expense_id = Uuid::new_v4();
    let db = state.clone();
    let pid = project_id.to_string();
    let caller = claims.sub.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        let Some((ngo_id, _)) = db.db.ngo_for_project(&pid)? else {
            return Ok(Outcome::NoProject);
        };
        match db.db.ngo_owned_by(&caller)? {
            Some(ngo) if ngo.id == ngo_id => {}
            _ => return Ok(Outcome::NotOwner),
        }
        db.db.insert_expense(
            &expense_id.to_string(),
            &pid,
            req.amount,
            req.purpose.trim(),
            req.description.as_deref(),
            req.expense_date.as_deref(),
            req.proof_url.as_deref(),
        )?;
        let row = db
            .db
            .expenses_for_project(&pid)?
            .into_iter()
            .find(|e| e.id == expense_id.to_string())
            .ok_or_else(|| anyhow::anyhow!("inserted expense not found"))?;
        Ok::<_, anyhow::Error>(Outcome::Created(row))
    })
    .await
    .map_err(join_error)?
    .map_err(|e| {
        error!("Expense insert failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let row = match outcome {
        Outcome::NoProject => return Err(StatusCode::NOT_FOUND),
        Outcome::NotOwner => return Err(StatusCode::FORBIDDEN),
        Outcome::Created(row) => row,
    };

    Ok((StatusCode::CREATED, Json(expense_response(row))))
}

pub async fn list_expenses(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let pid = project_id.to_string();
    let rows = tokio::task::spawn_blocking(move || {
        if db.db.get_project(&pid)?.is_none() {
            return Ok(None);
        }
        db.db.expenses_for_project(&pid).map(Some)
    })
    .await
    .map_err(join_error)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(
        rows.into_iter().map(expense_response).collect::<Vec<_>>(),
    ))
}

/// Admin oversight: flag (or clear) an expense as suspicious.
pub async fn flag_expense(
    State(state): State<AppState>,
    Path(expense_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<FlagExpenseRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_role(&claims, AppRole::Admin)?;

    let db = state.clone();
    let id = expense_id.to_string();
    let admin = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || {
        db.db
            .set_expense_flag(&id, req.is_flagged, &admin, req.reason.as_deref())
    })
    .await
    .map_err(join_error)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    info!(
        "Expense {} flag set to {} by {}",
        expense_id, row.is_flagged, claims.sub
    );

    Ok(Json(expense_response(row)))
}

pub async fn list_flagged(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_role(&claims, AppRole::Admin)?;

    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.flagged_expenses())
        .await
        .map_err(join_error)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(
        rows.into_iter().map(expense_response).collect::<Vec<_>>(),
    ))
}

enum Outcome {
    NoProject,
    NotOwner,
    Created(ExpenseRow),
}

fn expense_response(row: ExpenseRow) -> ExpenseResponse {
    ExpenseResponse {
        id: parse_uuid(&row.id, "expense id"),
        project_id: parse_uuid(&row.project_id, "expense project id"),
        amount: row.amount,
        purpose: row.purpose,
        description: row.description,
        expense_date: row.expense_date,
        proof_url: row.proof_url,
        is_flagged: row.is_flagged,
        flagged_by: parse_opt_uuid(row.flagged_by.as_deref(), "flagging admin id"),
        flagged_reason: row.flagged_reason,
        created_at: parse_timestamp(&row.created_at),
    }
}
