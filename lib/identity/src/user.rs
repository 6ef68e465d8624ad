//! The local user record owned by the identity store.
//!
//! Local users are keyed by the external subject claim. They are created on
//! first sign-in and refreshed on every subsequent one: email, display name,
//! and role assignments are overwritten from the latest external identity,
//! last write wins. The sign-in flow never deletes a user.

use crate::role::RoleSet;
use amber_turnstile_core::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user record in the local identity store.
///
/// All authorization after sign-in runs against this record, never against
/// the identity provider's token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Internal platform user ID.
    id: UserId,
    /// External subject claim - unique identifier from the identity provider.
    subject: String,
    /// Email address (from the email claim, if available).
    email: Option<String>,
    /// Display name (from the configured name claim).
    display_name: Option<String>,
    /// Role assignments, kept in sync with the latest sign-in's role claims.
    roles: RoleSet,
    /// When the user record was created.
    created_at: DateTime<Utc>,
    /// When the user record was last updated.
    updated_at: DateTime<Utc>,
}

impl LocalUser {
    /// Creates a new user for a subject seen for the first time.
    #[must_use]
    pub fn new(subject: String) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            subject,
            email: None,
            display_name: None,
            roles: RoleSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a user with all fields specified.
    ///
    /// Use this when reconstituting a user from storage.
    #[must_use]
    pub fn with_all_fields(
        id: UserId,
        subject: String,
        email: Option<String>,
        display_name: Option<String>,
        roles: RoleSet,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            subject,
            email,
            display_name,
            roles,
            created_at,
            updated_at,
        }
    }

    /// Returns the user's internal platform ID.
    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    /// Returns the external subject claim.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the user's email address, if available.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the user's display name, if available.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Returns the user's current role assignments.
    #[must_use]
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    /// Returns when the user was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the user was last updated.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Overwrites the user's email address.
    pub fn set_email(&mut self, email: Option<String>) {
        self.email = email;
        self.updated_at = Utc::now();
    }

    /// Overwrites the user's display name.
    pub fn set_display_name(&mut self, display_name: Option<String>) {
        self.display_name = display_name;
        self.updated_at = Utc::now();
    }

    /// Replaces the user's role assignments with the given target set.
    pub fn set_roles(&mut self, roles: RoleSet) {
        self.roles = roles;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleName;

    #[test]
    fn new_user_has_generated_id() {
        let user = LocalUser::new("azure|123".to_string());
        assert!(user.id().to_string().starts_with("usr_"));
    }

    #[test]
    fn new_user_has_no_optional_fields() {
        let user = LocalUser::new("azure|123".to_string());
        assert!(user.email().is_none());
        assert!(user.display_name().is_none());
        assert!(user.roles().is_empty());
        assert_eq!(user.created_at(), user.updated_at());
    }

    #[test]
    fn set_email_updates_timestamp() {
        let mut user = LocalUser::new("azure|123".to_string());
        let original_updated_at = user.updated_at();

        std::thread::sleep(std::time::Duration::from_millis(1));

        user.set_email(Some("user@example.com".to_string()));

        assert_eq!(user.email(), Some("user@example.com"));
        assert!(user.updated_at() > original_updated_at);
    }

    #[test]
    fn set_roles_replaces_assignments() {
        let mut user = LocalUser::new("azure|123".to_string());
        user.set_roles(RoleSet::from_claims(&["Editors".to_string()]));
        assert!(user.roles().contains(&RoleName::from("Editors")));

        user.set_roles(RoleSet::from_claims(&["WebAdmins".to_string()]));
        assert!(!user.roles().contains(&RoleName::from("Editors")));
        assert!(user.roles().contains(&RoleName::from("WebAdmins")));
    }

    #[test]
    fn with_all_fields_preserves_values() {
        let id = UserId::new();
        let created = Utc::now() - chrono::Duration::days(30);
        let updated = Utc::now() - chrono::Duration::days(1);
        let roles = RoleSet::from_claims(&["Editors".to_string()]);

        let user = LocalUser::with_all_fields(
            id,
            "azure|456".to_string(),
            Some("alice@example.com".to_string()),
            Some("Alice".to_string()),
            roles.clone(),
            created,
            updated,
        );

        assert_eq!(user.id(), id);
        assert_eq!(user.subject(), "azure|456");
        assert_eq!(user.email(), Some("alice@example.com"));
        assert_eq!(user.display_name(), Some("Alice"));
        assert_eq!(user.roles(), &roles);
        assert_eq!(user.created_at(), created);
        assert_eq!(user.updated_at(), updated);
    }

    #[test]
    fn user_serialization_roundtrip() {
        let mut user = LocalUser::new("azure|123".to_string());
        user.set_email(Some("test@example.com".to_string()));
        user.set_roles(RoleSet::from_claims(&["Editors".to_string()]));

        let json = serde_json::to_string(&user).expect("serialize");
        let parsed: LocalUser = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(user, parsed);
    }
}
