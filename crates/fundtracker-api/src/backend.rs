//! DB-backed implementations of the gateway's ports: the auth backend the
//! session resolver drives, and the lookup directory the notification
//! pipeline correlates through.

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::warn;
use uuid::Uuid;

use fundtracker_gateway::pipeline::{LookupError, ProjectDirectory, ProjectOwner};
use fundtracker_gateway::session::{AuthBackend, AuthError};
use fundtracker_types::models::{AppRole, Claims, Identity};

use crate::auth::AppState;

pub struct DbAuthBackend {
    state: AppState,
}

impl DbAuthBackend {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl AuthBackend for DbAuthBackend {
    async fn verify_credentials(&self, email: &str, password: &str)
    -> Result<Identity, AuthError> {
        let state = self.state.clone();
        let lookup_email = email.to_string();
        let user = tokio::task::spawn_blocking(move || state.db.get_user_by_email(&lookup_email))
            .await
            .map_err(unavailable)?
            .map_err(unavailable)?
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| AuthError::Unavailable(format!("stored hash unreadable: {}", e)))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| AuthError::InvalidCredentials)?;

        Ok(Identity {
            user_id: user
                .id
                .parse()
                .map_err(|e| AuthError::Unavailable(format!("corrupt user id: {}", e)))?,
            email: user.email,
        })
    }

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Identity, AuthError> {
        let state = self.state.clone();
        let lookup_email = email.to_string();
        let taken = tokio::task::spawn_blocking(move || state.db.get_user_by_email(&lookup_email))
            .await
            .map_err(unavailable)?
            .map_err(unavailable)?
            .is_some();
        if taken {
            return Err(AuthError::DuplicateEmail);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Unavailable(format!("hashing failed: {}", e)))?
            .to_string();

        let user_id = Uuid::new_v4();
        let state = self.state.clone();
        let uid = user_id.to_string();
        let new_email = email.to_string();
        let name = full_name.to_string();
        tokio::task::spawn_blocking(move || {
            state.db.create_identity(&uid, &new_email, &password_hash, &name)
        })
        .await
        .map_err(unavailable)?
        .map_err(unavailable)?;

        Ok(Identity {
            user_id,
            email: email.to_string(),
        })
    }

    async fn assign_role(&self, user_id: Uuid, role: AppRole) -> Result<(), AuthError> {
        let state = self.state.clone();
        let uid = user_id.to_string();
        tokio::task::spawn_blocking(move || state.db.assign_role(&uid, role.as_str()))
            .await
            .map_err(unavailable)?
            .map_err(unavailable)
    }

    async fn lookup_role(&self, user_id: Uuid) -> Result<AppRole, AuthError> {
        let state = self.state.clone();
        let uid = user_id.to_string();
        let raw = tokio::task::spawn_blocking(move || state.db.get_role(&uid))
            .await
            .map_err(unavailable)?
            .map_err(unavailable)?;

        raw.as_deref().and_then(AppRole::parse).ok_or_else(|| {
            // Every identity gets a role at signup; absence is a data defect,
            // not an anonymous session.
            warn!("No role assignment for {}", user_id);
            AuthError::Unavailable("role assignment missing".into())
        })
    }

    async fn resume(&self, token: &str) -> Result<Identity, AuthError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.state.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        let claims = token_data.claims;
        let state = self.state.clone();
        let uid = claims.sub.to_string();
        let email = tokio::task::spawn_blocking(move || state.db.get_user_email(&uid))
            .await
            .map_err(unavailable)?
            .map_err(unavailable)?
            .ok_or(AuthError::InvalidToken)?;

        Ok(Identity {
            user_id: claims.sub,
            email,
        })
    }
}

fn unavailable(e: impl std::fmt::Display) -> AuthError {
    AuthError::Unavailable(e.to_string())
}

pub struct DbProjectDirectory {
    state: AppState,
}

impl DbProjectDirectory {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ProjectDirectory for DbProjectDirectory {
    async fn ngo_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Option<ProjectOwner>, LookupError> {
        let state = self.state.clone();
        let pid = project_id.to_string();
        let row = tokio::task::spawn_blocking(move || state.db.ngo_for_project(&pid))
            .await
            .map_err(transient)?
            .map_err(transient)?;

        match row {
            Some((ngo_id, project_name)) => Ok(Some(ProjectOwner {
                ngo_id: ngo_id.parse().map_err(transient)?,
                project_name,
            })),
            None => Ok(None),
        }
    }

    async fn ngo_owned_by(&self, user_id: Uuid) -> Result<Option<Uuid>, LookupError> {
        let state = self.state.clone();
        let uid = user_id.to_string();
        let row = tokio::task::spawn_blocking(move || state.db.ngo_owned_by(&uid))
            .await
            .map_err(transient)?
            .map_err(transient)?;

        match row {
            Some(ngo) => Ok(Some(ngo.id.parse().map_err(transient)?)),
            None => Ok(None),
        }
    }
}

fn transient(e: impl std::fmt::Display) -> LookupError {
    LookupError::Transient(e.to_string())
}
