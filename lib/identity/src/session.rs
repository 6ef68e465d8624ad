//! Cookie-backed sessions for signed-in users.
//!
//! A session is created strictly after claims synchronization succeeds, so a
//! session never references a local user that does not exist. Requests made
//! under a session authorize against the roles captured here, never by
//! re-contacting the identity provider.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::role::{RoleName, RoleSet};
use amber_turnstile_core::UserId;

/// Unique identifier for a session.
///
/// Session IDs are opaque strings; the cookie value is the ID itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new session ID from a string.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self(id)
    }

    /// Returns the session ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An active session referencing a synced local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session.
    id: SessionId,
    /// The signed-in user's local ID.
    user_id: UserId,
    /// Roles captured from the local user at sign-in time.
    roles: RoleSet,
    /// When the session was created.
    created_at: DateTime<Utc>,
    /// When the session expires.
    expires_at: DateTime<Utc>,
    /// Provider access token (for API calls that need it).
    access_token: Option<String>,
    /// Provider refresh token (present when offline access was requested).
    refresh_token: Option<String>,
}

impl Session {
    /// Creates a new session for the given user, valid for the given duration.
    #[must_use]
    pub fn new(id: SessionId, user_id: UserId, roles: RoleSet, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            roles,
            created_at: now,
            expires_at: now + duration,
            access_token: None,
            refresh_token: None,
        }
    }

    /// Creates a session carrying provider tokens.
    ///
    /// Either token may be absent independently; a refresh token without an
    /// access token is kept.
    #[must_use]
    pub fn with_tokens(
        id: SessionId,
        user_id: UserId,
        roles: RoleSet,
        duration: Duration,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Self {
        let mut session = Self::new(id, user_id, roles, duration);
        session.access_token = access_token;
        session.refresh_token = refresh_token;
        session
    }

    /// Creates a session with all fields specified.
    ///
    /// Use this when reconstituting a session from storage.
    #[must_use]
    pub fn with_all_fields(
        id: SessionId,
        user_id: UserId,
        roles: RoleSet,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            id,
            user_id,
            roles,
            created_at,
            expires_at,
            access_token,
            refresh_token,
        }
    }

    /// Returns the session ID.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the signed-in user's ID.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the roles captured at sign-in.
    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Returns when the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the session expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns the provider access token, if present.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns the provider refresh token, if present.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns true if the session is still valid (not expired).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired()
    }

    /// Returns true if the session carries the given role.
    #[must_use]
    pub fn has_role(&self, role: &RoleName) -> bool {
        self.roles.contains(role)
    }
}
