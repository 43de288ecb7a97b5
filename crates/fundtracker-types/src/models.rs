use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The single permission class bound to an identity. Assigned exactly once
/// at signup and never mutated afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Admin,
    Ngo,
    Donor,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Ngo => "ngo",
            Self::Donor => "donor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "ngo" => Some(Self::Ngo),
            "donor" => Some(Self::Donor),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims shared across fundtracker-api (REST middleware) and
/// fundtracker-gateway (WebSocket session resume). Canonical definition lives
/// here to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: AppRole,
    pub exp: usize,
}

/// An authenticated account reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [AppRole::Admin, AppRole::Ngo, AppRole::Donor] {
            assert_eq!(AppRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(AppRole::parse("superuser"), None);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AppRole::Ngo).unwrap(), "\"ngo\"");
    }
}
