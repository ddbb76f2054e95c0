//! Per-request metadata attached to audit rows

use serde::{Deserialize, Serialize};

/// Authenticated caller, if any
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub username: Option<String>,
}

/// Request metadata captured by the HTTP layer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub session: Option<SessionUser>,
}

impl RequestContext {
    pub fn with_session(mut self, session: SessionUser) -> Self {
        self.session = Some(session);
        self
    }

    /// Explicit user id wins; the session backfills it and supplies the username.
    pub(crate) fn resolve_user(&self, explicit: Option<&str>) -> (Option<String>, Option<String>) {
        let session = self.session.as_ref();
        let user_id = explicit
            .map(str::to_string)
            .or_else(|| session.map(|s| s.id.clone()));
        let username = session.and_then(|s| s.username.clone());
        (user_id, username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_user() {
        let anonymous = RequestContext::default();
        assert_eq!(anonymous.resolve_user(None), (None, None));
        assert_eq!(
            anonymous.resolve_user(Some("u1")),
            (Some("u1".to_string()), None)
        );

        let ctx = RequestContext::default().with_session(SessionUser {
            id: "u7".to_string(),
            username: Some("admin".to_string()),
        });
        assert_eq!(
            ctx.resolve_user(None),
            (Some("u7".to_string()), Some("admin".to_string()))
        );
        assert_eq!(
            ctx.resolve_user(Some("u1")),
            (Some("u1".to_string()), Some("admin".to_string()))
        );
    }
}
