//! API key types and scope definitions

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::audit::SessionUser;

/// Permission scope for API keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Can record audit events
    #[serde(rename = "user")]
    User,
    /// Can read stats, query and export the audit trail
    #[serde(rename = "admin")]
    Admin,
    /// Wildcard - all scopes
    #[serde(rename = "*")]
    All,
}

impl std::str::FromStr for Scope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "*" | "all" => Ok(Self::All),
            _ => Err(()),
        }
    }
}

impl Scope {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::All => "*",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// API key with associated metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Unique identifier
    pub id: String,
    /// Hash of the actual key (never store plaintext)
    pub key_hash: String,
    /// Human-readable name for the key
    pub name: String,
    /// Application user this key acts as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Permissions granted to this key
    pub scopes: HashSet<Scope>,
    /// When the key was created
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Optional expiration time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ApiKey {
    /// Check if this key has the required scope. `admin` implies `user`.
    pub fn has_scope(&self, required: Scope) -> bool {
        self.scopes.contains(&Scope::All)
            || self.scopes.contains(&required)
            || (required == Scope::User && self.scopes.contains(&Scope::Admin))
    }

    /// Check if this key has expired
    pub fn is_expired(&self) -> bool {
        if let Some(expires) = self.expires_at {
            chrono::Utc::now() > expires
        } else {
            false
        }
    }

    /// Session identity attached to audit rows written with this key
    pub fn session_user(&self) -> SessionUser {
        SessionUser {
            id: self.user_id.clone().unwrap_or_else(|| self.id.clone()),
            username: Some(self.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(scopes: &[Scope]) -> ApiKey {
        ApiKey {
            id: "test-id".to_string(),
            key_hash: "hash".to_string(),
            name: "test".to_string(),
            user_id: None,
            scopes: scopes.iter().copied().collect(),
            created_at: chrono::Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_scope_from_str() {
        assert_eq!("user".parse::<Scope>().ok(), Some(Scope::User));
        assert_eq!("admin".parse::<Scope>().ok(), Some(Scope::Admin));
        assert_eq!("*".parse::<Scope>().ok(), Some(Scope::All));
        assert_eq!("all".parse::<Scope>().ok(), Some(Scope::All));
        assert_eq!("ADMIN".parse::<Scope>().ok(), Some(Scope::Admin)); // case insensitive
        assert_eq!("check".parse::<Scope>().ok(), None);
    }

    #[test]
    fn test_scope_as_str() {
        assert_eq!(Scope::User.as_str(), "user");
        assert_eq!(Scope::Admin.as_str(), "admin");
        assert_eq!(Scope::All.as_str(), "*");
    }

    #[test]
    fn test_user_key_is_not_admin() {
        let key = key(&[Scope::User]);
        assert!(key.has_scope(Scope::User));
        assert!(!key.has_scope(Scope::Admin));
    }

    #[test]
    fn test_admin_implies_user() {
        let key = key(&[Scope::Admin]);
        assert!(key.has_scope(Scope::Admin));
        assert!(key.has_scope(Scope::User));
    }

    #[test]
    fn test_wildcard() {
        let key = key(&[Scope::All]);
        assert!(key.has_scope(Scope::User));
        assert!(key.has_scope(Scope::Admin));
    }

    #[test]
    fn test_api_key_expiry() {
        let mut k = key(&[]);
        assert!(!k.is_expired());

        k.expires_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        assert!(!k.is_expired());

        k.expires_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
        assert!(k.is_expired());
    }

    #[test]
    fn test_session_user() {
        let mut k = key(&[Scope::User]);
        assert_eq!(k.session_user().id, "test-id");
        assert_eq!(k.session_user().username.as_deref(), Some("test"));

        k.user_id = Some("u42".to_string());
        assert_eq!(k.session_user().id, "u42");
    }
}
