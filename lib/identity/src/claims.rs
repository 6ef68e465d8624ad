//! The external identity handed over by the identity provider.

/// A validated external identity, one per sign-in attempt.
///
/// Produced by the OIDC validation step from the ID token's claims and
/// consumed once by the claims synchronizer. It is never persisted as-is;
/// the synchronizer materializes a [`LocalUser`](crate::LocalUser) from it.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    /// The subject claim, stable per identity provider.
    pub subject: String,
    /// Email address, if the provider sent one.
    pub email: Option<String>,
    /// Display name (from the configured name claim, if present).
    pub display_name: Option<String>,
    /// Role names extracted from the configured role claim.
    pub roles: Vec<String>,
}

impl ExternalIdentity {
    /// Creates an identity carrying only the subject claim.
    #[must_use]
    pub fn new(subject: String) -> Self {
        Self {
            subject,
            email: None,
            display_name: None,
            roles: Vec::new(),
        }
    }

    /// Sets the email claim.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }

    /// Sets the role claims.
    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}
