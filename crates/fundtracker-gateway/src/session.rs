//! Session/Role Resolver: the single source of truth for "who is acting,
//! and in what capacity."
//!
//! The state machine is `Loading -> {Authenticated | Anonymous}` and
//! re-entrant for the lifetime of one connection. `Authenticated` carries
//! both identity and role in one variant, so no consumer can ever observe
//! an identity without a role.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use fundtracker_types::models::{AppRole, Identity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state: identity and role not yet resolved. Route gating must
    /// not redirect while here.
    Loading,
    Anonymous,
    Authenticated { identity: Identity, role: AppRole },
}

/// Synchronous role read for gating decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    /// Resolution still in flight — do not redirect yet.
    Pending,
    /// Signed out: no role, distinct from "not yet loaded".
    NoRole,
    Assigned(AppRole),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("this email is already registered")]
    DuplicateEmail,
    #[error("invalid or expired session token")]
    InvalidToken,
    /// Identity was created but the role assignment failed to persist.
    /// The signup did not complete; the caller must not treat it as success.
    #[error("account created but role assignment failed: {0}")]
    RoleAssignmentFailed(String),
    #[error("service currently unavailable: {0}")]
    Unavailable(String),
    /// A sign-out (or newer sign-in) landed while this call was in flight;
    /// its result was discarded.
    #[error("superseded by a newer session change")]
    Superseded,
}

impl AuthError {
    /// User-correctable errors invite a retry with different input;
    /// everything else is transient or internal.
    pub fn user_correctable(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::DuplicateEmail | Self::InvalidToken
        )
    }
}

/// External identity provider plus the one extra role-assignment read.
/// The resolver is a thin orchestrator on top of this contract.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn verify_credentials(&self, email: &str, password: &str)
    -> Result<Identity, AuthError>;

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Identity, AuthError>;

    async fn assign_role(&self, user_id: Uuid, role: AppRole) -> Result<(), AuthError>;

    async fn lookup_role(&self, user_id: Uuid) -> Result<AppRole, AuthError>;

    /// Resume a previous session from a stored bearer token.
    async fn resume(&self, token: &str) -> Result<Identity, AuthError>;
}

struct Inner {
    state: SessionState,
    /// Bumped on every committed transition. An async operation records the
    /// epoch when it starts and commits only if it is unchanged, so a
    /// late-arriving sign-in can never overwrite a more recent sign-out.
    epoch: u64,
}

pub struct SessionResolver {
    backend: Arc<dyn AuthBackend>,
    inner: Mutex<Inner>,
}

impl SessionResolver {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner {
                state: SessionState::Loading,
                epoch: 0,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn current_role(&self) -> RoleState {
        match &self.lock().state {
            SessionState::Loading => RoleState::Pending,
            SessionState::Anonymous => RoleState::NoRole,
            SessionState::Authenticated { role, .. } => RoleState::Assigned(*role),
        }
    }

    /// Settle the initial `Loading` state: with a stored token, re-run the
    /// identity+role join; without one, report no session.
    pub async fn restore(&self, token: Option<&str>) -> Result<SessionState, AuthError> {
        match token {
            None => {
                let mut inner = self.lock();
                if matches!(inner.state, SessionState::Loading) {
                    inner.epoch += 1;
                    inner.state = SessionState::Anonymous;
                }
                Ok(inner.state.clone())
            }
            Some(token) => {
                let epoch = self.lock().epoch;
                let resumed = async {
                    let identity = self.backend.resume(token).await?;
                    let role = self.backend.lookup_role(identity.user_id).await?;
                    Ok((identity, role))
                }
                .await;
                self.settle(epoch, resumed)
                    .map(|(identity, role)| SessionState::Authenticated { identity, role })
            }
        }
    }

    /// Delegates to the provider, then joins the role assignment. The state
    /// machine only reaches `Authenticated` once both are available.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(Identity, AppRole), AuthError> {
        let epoch = self.lock().epoch;
        let outcome = async {
            let identity = self.backend.verify_credentials(email, password).await?;
            let role = self.backend.lookup_role(identity.user_id).await?;
            Ok((identity, role))
        }
        .await;
        self.settle(epoch, outcome)
    }

    /// Creates the identity, then persists exactly one role assignment equal
    /// to `role`. A role-assignment failure after identity creation is
    /// surfaced as `RoleAssignmentFailed`, never as silent success.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: AppRole,
    ) -> Result<(Identity, AppRole), AuthError> {
        let epoch = self.lock().epoch;
        let outcome = async {
            let identity = self
                .backend
                .create_identity(email, password, full_name)
                .await?;
            self.backend
                .assign_role(identity.user_id, role)
                .await
                .map_err(|e| AuthError::RoleAssignmentFailed(e.to_string()))?;
            Ok((identity, role))
        }
        .await;
        self.settle(epoch, outcome)
    }

    /// Drive the machine to `Anonymous`, clearing identity and role
    /// synchronously. Idempotent: redundant sign-out is a no-op.
    pub fn sign_out(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.state = SessionState::Anonymous;
    }

    /// Apply the outcome of an async resolution, unless a newer transition
    /// committed in the meantime — then the stale result is discarded.
    fn settle(
        &self,
        epoch: u64,
        outcome: Result<(Identity, AppRole), AuthError>,
    ) -> Result<(Identity, AppRole), AuthError> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!("Discarding stale auth resolution (epoch {} != {})", epoch, inner.epoch);
            return Err(AuthError::Superseded);
        }
        match outcome {
            Ok((identity, role)) => {
                inner.epoch += 1;
                inner.state = SessionState::Authenticated {
                    identity: identity.clone(),
                    role,
                };
                Ok((identity, role))
            }
            Err(e) => {
                inner.epoch += 1;
                inner.state = SessionState::Anonymous;
                Err(e)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // State updates cannot panic mid-write, so a poisoned guard is still
        // coherent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Backend with one fixed account; credential checks can be gated on a
    /// Notify so tests control when the resolution lands.
    struct FixedBackend {
        identity: Identity,
        role: AppRole,
        password: String,
        gate: Option<Arc<Notify>>,
    }

    impl FixedBackend {
        fn new(role: AppRole) -> Self {
            Self {
                identity: Identity {
                    user_id: Uuid::new_v4(),
                    email: "u1@example.org".into(),
                },
                role,
                password: "hunter22".into(),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl AuthBackend for FixedBackend {
        async fn verify_credentials(
            &self,
            email: &str,
            password: &str,
        ) -> Result<Identity, AuthError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if email == self.identity.email && password == self.password {
                Ok(self.identity.clone())
            } else {
                Err(AuthError::InvalidCredentials)
            }
        }

        async fn create_identity(
            &self,
            _email: &str,
            _password: &str,
            _full_name: &str,
        ) -> Result<Identity, AuthError> {
            Ok(self.identity.clone())
        }

        async fn assign_role(&self, _user_id: Uuid, _role: AppRole) -> Result<(), AuthError> {
            Ok(())
        }

        async fn lookup_role(&self, _user_id: Uuid) -> Result<AppRole, AuthError> {
            Ok(self.role)
        }

        async fn resume(&self, token: &str) -> Result<Identity, AuthError> {
            if token == "valid" {
                Ok(self.identity.clone())
            } else {
                Err(AuthError::InvalidToken)
            }
        }
    }

    #[tokio::test]
    async fn starts_loading_then_settles_anonymous() {
        let resolver = SessionResolver::new(Arc::new(FixedBackend::new(AppRole::Donor)));
        assert_eq!(resolver.current_role(), RoleState::Pending);

        resolver.restore(None).await.unwrap();
        assert_eq!(resolver.current_role(), RoleState::NoRole);
        assert_eq!(resolver.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn sign_in_resolves_identity_and_role_together() {
        let resolver = SessionResolver::new(Arc::new(FixedBackend::new(AppRole::Ngo)));
        resolver.restore(None).await.unwrap();

        let (identity, role) = resolver.sign_in("u1@example.org", "hunter22").await.unwrap();
        assert_eq!(role, AppRole::Ngo);
        assert_eq!(resolver.current_role(), RoleState::Assigned(AppRole::Ngo));
        match resolver.state() {
            SessionState::Authenticated { identity: i, role } => {
                assert_eq!(i, identity);
                assert_eq!(role, AppRole::Ngo);
            }
            other => panic!("expected Authenticated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_credentials_leave_anonymous() {
        let resolver = SessionResolver::new(Arc::new(FixedBackend::new(AppRole::Donor)));
        resolver.restore(None).await.unwrap();

        let err = resolver.sign_in("u1@example.org", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert!(err.user_correctable());
        assert_eq!(resolver.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn sign_out_is_idempotent_and_clears_role() {
        let resolver = SessionResolver::new(Arc::new(FixedBackend::new(AppRole::Donor)));
        resolver.restore(None).await.unwrap();
        resolver.sign_in("u1@example.org", "hunter22").await.unwrap();

        resolver.sign_out();
        assert_eq!(resolver.current_role(), RoleState::NoRole);
        resolver.sign_out();
        assert_eq!(resolver.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn late_sign_in_does_not_overwrite_sign_out() {
        let gate = Arc::new(Notify::new());
        let mut backend = FixedBackend::new(AppRole::Ngo);
        backend.gate = Some(gate.clone());
        let resolver = Arc::new(SessionResolver::new(Arc::new(backend)));
        resolver.restore(None).await.unwrap();

        let r = resolver.clone();
        let pending =
            tokio::spawn(async move { r.sign_in("u1@example.org", "hunter22").await });

        // Let the sign-in reach the gated credential check, then sign out.
        tokio::time::sleep(Duration::from_millis(10)).await;
        resolver.sign_out();
        gate.notify_one();

        let outcome = pending.await.unwrap();
        assert!(matches!(outcome, Err(AuthError::Superseded)));
        assert_eq!(resolver.state(), SessionState::Anonymous);
        assert_eq!(resolver.current_role(), RoleState::NoRole);
    }

    #[tokio::test]
    async fn sign_up_persists_requested_role() {
        let resolver = SessionResolver::new(Arc::new(FixedBackend::new(AppRole::Donor)));
        resolver.restore(None).await.unwrap();

        let (_, role) = resolver
            .sign_up("u1@example.org", "hunter22", "User One", AppRole::Donor)
            .await
            .unwrap();
        assert_eq!(role, AppRole::Donor);
        assert_eq!(resolver.current_role(), RoleState::Assigned(AppRole::Donor));
    }

    #[tokio::test]
    async fn failed_role_assignment_surfaces_partial_signup() {
        struct NoRoleBackend(FixedBackend);

        #[async_trait]
        impl AuthBackend for NoRoleBackend {
            async fn verify_credentials(&self, e: &str, p: &str) -> Result<Identity, AuthError> {
                self.0.verify_credentials(e, p).await
            }
            async fn create_identity(
                &self,
                e: &str,
                p: &str,
                n: &str,
            ) -> Result<Identity, AuthError> {
                self.0.create_identity(e, p, n).await
            }
            async fn assign_role(&self, _: Uuid, _: AppRole) -> Result<(), AuthError> {
                Err(AuthError::Unavailable("role table write failed".into()))
            }
            async fn lookup_role(&self, u: Uuid) -> Result<AppRole, AuthError> {
                self.0.lookup_role(u).await
            }
            async fn resume(&self, t: &str) -> Result<Identity, AuthError> {
                self.0.resume(t).await
            }
        }

        let resolver = SessionResolver::new(Arc::new(NoRoleBackend(FixedBackend::new(
            AppRole::Ngo,
        ))));
        resolver.restore(None).await.unwrap();

        let err = resolver
            .sign_up("u1@example.org", "hunter22", "User One", AppRole::Ngo)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::RoleAssignmentFailed(_)));
        // Never Authenticated without a persisted role.
        assert_eq!(resolver.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn restore_with_token_rejoins_role() {
        let resolver = SessionResolver::new(Arc::new(FixedBackend::new(AppRole::Admin)));
        let state = resolver.restore(Some("valid")).await.unwrap();
        assert!(matches!(state, SessionState::Authenticated { role: AppRole::Admin, .. }));

        let resolver = SessionResolver::new(Arc::new(FixedBackend::new(AppRole::Admin)));
        let err = resolver.restore(Some("expired")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
        assert_eq!(resolver.state(), SessionState::Anonymous);
    }
}
