use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::error;
use uuid::Uuid;

use fundtracker_db::Database;
use fundtracker_gateway::dispatcher::Dispatcher;
use fundtracker_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use fundtracker_types::models::{AppRole, Claims};

use crate::mailer::Mailer;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub mailer: Option<Mailer>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    if !req.email.contains('@') || req.email.len() > 254 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 6 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.full_name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user_id = Uuid::new_v4();
    let email = req.email.clone();
    let role = req.role;

    // Check if email is taken
    let db = state.clone();
    let lookup_email = email.clone();
    if tokio::task::spawn_blocking(move || db.db.get_user_by_email(&lookup_email))
        .await
        .map_err(join_error)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_some()
    {
        return Err(StatusCode::CONFLICT);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .to_string();

    // Identity first, then exactly one role assignment. A role failure after
    // the identity exists must surface as an error, never as silent success.
    let db = state.clone();
    let uid = user_id.to_string();
    let reg_email = email.clone();
    let full_name = req.full_name.clone();
    tokio::task::spawn_blocking(move || {
        db.db.create_identity(&uid, &reg_email, &password_hash, &full_name)?;
        db.db.assign_role(&uid, role.as_str())
    })
    .await
    .map_err(join_error)?
    .map_err(|e| {
        error!("Signup failed for {}: {}", email, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let token = create_token(&state.jwt_secret, user_id, &email, role)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            role,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let email = req.email.clone();
    let user = tokio::task::spawn_blocking(move || db.db.get_user_by_email(&email))
        .await
        .map_err(join_error)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = user.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    // The role assignment is part of the session contract: no token without it.
    let db = state.clone();
    let uid = user.id.clone();
    let role = tokio::task::spawn_blocking(move || db.db.get_role(&uid))
        .await
        .map_err(join_error)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .and_then(|r| AppRole::parse(&r))
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, user_id, &user.email, role)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id,
        email: user.email,
        role,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str, role: AppRole) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        role,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> StatusCode {
    error!("spawn_blocking join error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
