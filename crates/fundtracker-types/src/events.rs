use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::AppRole;

/// Row payload for a newly inserted donation. Donations are immutable facts,
/// so the feed only ever carries inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonationInserted {
    pub id: Uuid,
    pub project_id: Uuid,
    /// None when the donation was made anonymously.
    pub donor_id: Option<Uuid>,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of the NGO columns the verification feed cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgoState {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub is_verified: bool,
}

/// Row-update payload for the NGO table: before and after images, so a
/// consumer can detect the verification flag transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NgoUpdated {
    pub old: NgoState,
    pub new: NgoState,
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Urgent,
}

/// A transient user-facing notification. The display surface owns queuing
/// and dismissal; this is just the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

/// Commands sent FROM client TO server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate with credentials.
    SignIn { email: String, password: String },

    /// Create an account and pick a role in one step.
    SignUp {
        email: String,
        password: String,
        full_name: String,
        role: AppRole,
    },

    /// Resume a previous session from a stored bearer token.
    Resume { token: String },

    /// End the current session. Safe to send when already signed out.
    SignOut,
}

/// Events sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Session established: identity and role both resolved.
    Ready {
        user_id: Uuid,
        email: String,
        role: AppRole,
    },

    /// Sign-in/sign-up/resume failed. `recoverable` distinguishes
    /// user-correctable input from transient service failures.
    AuthFailed { reason: String, recoverable: bool },

    /// Session ended; all subscriptions for it were released.
    SignedOut,

    /// A correlated realtime notification for the signed-in identity.
    Notify(Notification),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_command_wire_shape() {
        let cmd = ClientCommand::SignIn {
            email: "a@b.c".into(),
            password: "hunter22".into(),
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"SignIn\""));
        assert!(json.contains("\"data\""));

        let back: ClientCommand = serde_json::from_str(&json).unwrap();
        match back {
            ClientCommand::SignIn { email, .. } => assert_eq!(email, "a@b.c"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn notify_event_carries_severity() {
        let event = ServerEvent::Notify(Notification {
            severity: Severity::Urgent,
            title: "Verification revoked".into(),
            description: "x".into(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"severity\":\"urgent\""));
    }
}
