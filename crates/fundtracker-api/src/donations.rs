use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use fundtracker_db::models::{DonationRow, parse_timestamp};
use fundtracker_types::api::{CreateDonationRequest, DonationResponse};
use fundtracker_types::events::DonationInserted;
use fundtracker_types::models::{AppRole, Claims};

use crate::auth::{AppState, join_error};
use crate::middleware::require_role;
use crate::{parse_opt_uuid, parse_uuid};

/// Donations are synchronous: the row lands as 'completed' and the insert
/// event is published before the response goes out.
pub async fn create_donation(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateDonationRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_role(&claims, AppRole::Donor)?;

    if req.amount <= 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let donation_id = Uuid::new_v4();
    let db = state.clone();
    let pid = project_id.to_string();
    let donor = claims.sub.to_string();
    let outcome = tokio::task::spawn_blocking(move || {
        if db.db.get_project(&pid)?.is_none() {
            return Ok(Outcome::NoProject);
        }
        // A retried submission with a known transaction id short-circuits to
        // the original row.
        if let Some(tx_id) = req.transaction_id.as_deref() {
            if let Some(existing) = db.db.donation_by_transaction(tx_id)? {
                return Ok(Outcome::Existing(existing));
            }
        }
        db.db.insert_donation(
            &donation_id.to_string(),
            &pid,
            Some(&donor),
            req.amount,
            req.message.as_deref(),
            req.is_anonymous,
            req.transaction_id.as_deref(),
        )?;
        let row = db
            .db
            .donations_for_project(&pid)?
            .into_iter()
            .find(|d| d.id == donation_id.to_string())
            .ok_or_else(|| anyhow::anyhow!("inserted donation not found"))?;
        Ok::<_, anyhow::Error>(Outcome::Created(row))
    })
    .await
    .map_err(join_error)?
    .map_err(|e| {
        error!("Donation insert failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let (row, created) = match outcome {
        Outcome::NoProject => return Err(StatusCode::NOT_FOUND),
        Outcome::Existing(row) => (row, false),
        Outcome::Created(row) => (row, true),
    };

    if created {
        state.dispatcher.publish_donation(DonationInserted {
            id: parse_uuid(&row.id, "donation id"),
            project_id,
            donor_id: parse_opt_uuid(row.donor_id.as_deref(), "donor id"),
            amount: row.amount,
            created_at: parse_timestamp(&row.created_at),
        });

        notify_operator(&state, project_id, row.amount);
    }

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(donation_response(row))))
}

pub async fn list_donations(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let pid = project_id.to_string();
    let rows = tokio::task::spawn_blocking(move || {
        if db.db.get_project(&pid)?.is_none() {
            return Ok(None);
        }
        db.db.donations_for_project(&pid).map(Some)
    })
    .await
    .map_err(join_error)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(
        rows.into_iter().map(donation_response).collect::<Vec<_>>(),
    ))
}

enum Outcome {
    NoProject,
    Existing(DonationRow),
    Created(DonationRow),
}

/// Email the project's NGO operator, fire-and-forget.
fn notify_operator(state: &AppState, project_id: Uuid, amount: i64) {
    let Some(mailer) = state.mailer.clone() else {
        return;
    };
    let db = state.clone();
    tokio::spawn(async move {
        let pid = project_id.to_string();
        let lookup = tokio::task::spawn_blocking(move || {
            let Some((ngo_id, project_name)) = db.db.ngo_for_project(&pid)? else {
                return Ok(None);
            };
            let Some(ngo) = db.db.get_ngo(&ngo_id)? else {
                return Ok(None);
            };
            let email = db.db.get_user_email(&ngo.user_id)?;
            Ok::<_, anyhow::Error>(email.map(|e| (e, project_name)))
        })
        .await;
        if let Ok(Ok(Some((email, project_name)))) = lookup {
            mailer
                .send_donation_received(&email, &project_name, amount)
                .await;
        }
    });
}

fn donation_response(row: DonationRow) -> DonationResponse {
    // Anonymous donations never expose the donor id, even to the operator.
    let donor_id = if row.is_anonymous {
        None
    } else {
        parse_opt_uuid(row.donor_id.as_deref(), "donor id")
    };
    DonationResponse {
        id: parse_uuid(&row.id, "donation id"),
        project_id: parse_uuid(&row.project_id, "donation project id"),
        donor_id,
        amount: row.amount,
        message: row.message,
        is_anonymous: row.is_anonymous,
        status: row.status,
        created_at: parse_timestamp(&row.created_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_donation_hides_donor() {
        let row = DonationRow {
            id: Uuid::new_v4().to_string(),
            project_id: Uuid::new_v4().to_string(),
            donor_id: Some(Uuid::new_v4().to_string()),
            amount: 100,
            message: None,
            is_anonymous: true,
            status: "completed".into(),
            transaction_id: None,
            created_at: "2026-01-01 00:00:00".into(),
        };
        assert!(donation_response(row).donor_id.is_none());
    }

    #[test]
    fn named_donation_keeps_donor() {
        let donor = Uuid::new_v4();
        let row = DonationRow {
            id: Uuid::new_v4().to_string(),
            project_id: Uuid::new_v4().to_string(),
            donor_id: Some(donor.to_string()),
            amount: 100,
            message: Some("keep going".into()),
            is_anonymous: false,
            status: "completed".into(),
            transaction_id: None,
            created_at: "2026-01-01 00:00:00".into(),
        };
        assert_eq!(donation_response(row).donor_id, Some(donor));
    }
}
