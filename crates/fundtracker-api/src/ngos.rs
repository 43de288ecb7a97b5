use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};
use uuid::Uuid;

use fundtracker_db::models::{NgoRow, parse_timestamp};
use fundtracker_types::api::{CreateNgoRequest, NgoResponse, SetVerificationRequest};
use fundtracker_types::events::{NgoState, NgoUpdated};
use fundtracker_types::models::{AppRole, Claims};

use crate::auth::{AppState, join_error};
use crate::middleware::require_role;
use crate::{parse_opt_uuid, parse_uuid};

pub async fn list_ngos(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.list_ngos())
        .await
        .map_err(join_error)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(rows.into_iter().map(ngo_response).collect::<Vec<_>>()))
}

pub async fn get_ngo(
    State(state): State<AppState>,
    Path(ngo_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let id = ngo_id.to_string();
    let row = tokio::task::spawn_blocking(move || db.db.get_ngo(&id))
        .await
        .map_err(join_error)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ngo_response(row)))
}

/// Operators register exactly one organization.
pub async fn create_ngo(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateNgoRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_role(&claims, AppRole::Ngo)?;

    if req.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let ngo_id = Uuid::new_v4();
    let db = state.clone();
    let owner = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || {
        if db.db.ngo_owned_by(&owner)?.is_some() {
            return Ok(None);
        }
        db.db.insert_ngo(
            &ngo_id.to_string(),
            &owner,
            req.name.trim(),
            req.description.as_deref(),
            req.registration_number.as_deref(),
        )?;
        db.db.get_ngo(&ngo_id.to_string())
    })
    .await
    .map_err(join_error)?
    .map_err(|e| {
        error!("NGO creation failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::CONFLICT)?;

    Ok((StatusCode::CREATED, Json(ngo_response(row))))
}

/// Admin-only verify/revoke. Publishes the row change with before and after
/// images so the notification pipeline can see the flag transition.
pub async fn set_verification(
    State(state): State<AppState>,
    Path(ngo_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SetVerificationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_role(&claims, AppRole::Admin)?;

    let db = state.clone();
    let id = ngo_id.to_string();
    let admin = claims.sub.to_string();
    let (old, new) = tokio::task::spawn_blocking(move || {
        db.db.set_ngo_verification(&id, req.is_verified, &admin)
    })
    .await
    .map_err(join_error)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    info!(
        "NGO {} verification {} -> {} by {}",
        ngo_id, old.is_verified, new.is_verified, claims.sub
    );

    state.dispatcher.publish_ngo_update(NgoUpdated {
        old: ngo_state(&old),
        new: ngo_state(&new),
    });

    // Email the owner, fire-and-forget.
    if let Some(mailer) = state.mailer.clone() {
        let db = state.clone();
        let owner = new.user_id.clone();
        let ngo_name = new.name.clone();
        let verified = new.is_verified;
        tokio::spawn(async move {
            let email = tokio::task::spawn_blocking(move || db.db.get_user_email(&owner)).await;
            if let Ok(Ok(Some(email))) = email {
                mailer.send_verification_changed(&email, &ngo_name, verified).await;
            }
        });
    }

    Ok(Json(ngo_response(new)))
}

fn ngo_state(row: &NgoRow) -> NgoState {
    NgoState {
        id: parse_uuid(&row.id, "ngo id"),
        owner_id: parse_uuid(&row.user_id, "ngo owner id"),
        name: row.name.clone(),
        is_verified: row.is_verified,
    }
}

fn ngo_response(row: NgoRow) -> NgoResponse {
    NgoResponse {
        id: parse_uuid(&row.id, "ngo id"),
        owner_id: parse_uuid(&row.user_id, "ngo owner id"),
        name: row.name,
        description: row.description,
        registration_number: row.registration_number,
        is_verified: row.is_verified,
        verified_at: row.verified_at.as_deref().map(parse_timestamp),
        verified_by: parse_opt_uuid(row.verified_by.as_deref(), "verifier id"),
        created_at: parse_timestamp(&row.created_at),
    }
}
