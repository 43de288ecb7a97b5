use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use fundtracker_db::models::{ProjectRow, parse_timestamp};
use fundtracker_types::api::{CreateProjectRequest, ProjectResponse};
use fundtracker_types::models::{AppRole, Claims};

use crate::auth::{AppState, join_error};
use crate::middleware::require_role;
use crate::parse_uuid;

pub async fn list_projects(State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || {
        let projects = db.db.list_projects()?;
        projects
            .into_iter()
            .map(|p| {
                let raised = db.db.total_donated(&p.id)?;
                Ok((p, raised))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await
    .map_err(join_error)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(
        rows.into_iter()
            .map(|(p, raised)| project_response(p, raised))
            .collect::<Vec<_>>(),
    ))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let id = project_id.to_string();
    let row = tokio::task::spawn_blocking(move || {
        let project = db.db.get_project(&id)?;
        match project {
            Some(p) => {
                let raised = db.db.total_donated(&p.id)?;
                Ok(Some((p, raised)))
            }
            None => Ok::<_, anyhow::Error>(None),
        }
    })
    .await
    .map_err(join_error)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    let (project, raised) = row;
    Ok(Json(project_response(project, raised)))
}

/// Projects belong to the caller's NGO, so creation requires both the NGO
/// role and a registered organization.
pub async fn create_project(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_role(&claims, AppRole::Ngo)?;

    if req.name.trim().is_empty() || req.target_amount <= 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let project_id = Uuid::new_v4();
    let db = state.clone();
    let owner = claims.sub.to_string();
    let row = tokio::task::spawn_blocking(move || {
        let Some(ngo) = db.db.ngo_owned_by(&owner)? else {
            return Ok(None);
        };
        db.db.insert_project(
            &project_id.to_string(),
            &ngo.id,
            req.name.trim(),
            req.description.as_deref(),
            req.target_amount,
        )?;
        db.db.get_project(&project_id.to_string())
    })
    .await
    .map_err(join_error)?
    .map_err(|e| {
        error!("Project creation failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .ok_or(StatusCode::FORBIDDEN)?;

    Ok((StatusCode::CREATED, Json(project_response(row, 0))))
}

fn project_response(row: ProjectRow, raised_amount: i64) -> ProjectResponse {
    ProjectResponse {
        id: parse_uuid(&row.id, "project id"),
        ngo_id: parse_uuid(&row.ngo_id, "project ngo id"),
        name: row.name,
        description: row.description,
        target_amount: row.target_amount,
        raised_amount,
        status: row.status,
        created_at: parse_timestamp(&row.created_at),
    }
}
