//! Authentication configuration.
//!
//! This module provides the configuration surface for connecting to an
//! external OIDC identity provider and for mapping its claims into the
//! local identity store.

use serde::{Deserialize, Serialize};

/// Fixed callback path the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/signin-oidc";

/// Configuration for the OIDC identity provider and claim mapping.
///
/// For Azure AD the issuer URL takes the form
/// `https://login.microsoftonline.com/<tenant-id>/v2.0`.
///
/// Fields with defaults can be omitted when loading from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The OIDC issuer URL, used for discovery.
    issuer_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// The redirect URI for the callback
    /// (e.g., "https://app.example.com/signin-oidc").
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,offline_access,email,profile"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// The claim in the ID token that carries role names.
    /// Default: "roles"
    #[serde(default = "default_role_claim")]
    role_claim: String,
    /// The claim in the ID token that carries the display name.
    /// Default: "name"
    #[serde(default = "default_name_claim")]
    name_claim: String,
    /// The role that grants administrative access.
    /// Default: "WebAdmins"
    #[serde(default = "default_admin_role")]
    admin_role: String,
    /// Whether to validate the token's issuer against the discovered metadata.
    ///
    /// Defaults to true. Multi-tenant Azure AD registrations issue tokens
    /// whose `iss` varies per tenant and need this off; disabling it widens
    /// the set of accepted issuers and is warned about at startup.
    #[serde(default = "default_validate_issuer")]
    validate_issuer: bool,
}

fn default_scopes() -> String {
    "openid,offline_access,email,profile".to_string()
}

fn default_role_claim() -> String {
    "roles".to_string()
}

fn default_name_claim() -> String {
    "name".to_string()
}

fn default_admin_role() -> String {
    "WebAdmins".to_string()
}

fn default_validate_issuer() -> bool {
    true
}

impl AuthConfig {
    /// Creates a new configuration with defaults for optional fields.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            scopes: default_scopes(),
            role_claim: default_role_claim(),
            name_claim: default_name_claim(),
            admin_role: default_admin_role(),
            validate_issuer: default_validate_issuer(),
        }
    }

    /// Creates a configuration builder for more customization.
    #[must_use]
    pub fn builder(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> AuthConfigBuilder {
        AuthConfigBuilder::new(issuer_url, client_id, client_secret, redirect_uri)
    }

    /// Returns the OIDC issuer URL.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes.split(',').map(str::trim).collect()
    }

    /// Returns the name of the claim carrying role names.
    #[must_use]
    pub fn role_claim(&self) -> &str {
        &self.role_claim
    }

    /// Returns the name of the claim carrying the display name.
    #[must_use]
    pub fn name_claim(&self) -> &str {
        &self.name_claim
    }

    /// Returns the role name that grants administrative access.
    #[must_use]
    pub fn admin_role(&self) -> &str {
        &self.admin_role
    }

    /// Returns whether issuer validation is enabled.
    #[must_use]
    pub fn validate_issuer(&self) -> bool {
        self.validate_issuer
    }
}

/// Builder for `AuthConfig`.
#[derive(Debug)]
pub struct AuthConfigBuilder {
    issuer_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    role_claim: String,
    name_claim: String,
    admin_role: String,
    validate_issuer: bool,
}

impl AuthConfigBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            scopes: default_scopes().split(',').map(String::from).collect(),
            role_claim: default_role_claim(),
            name_claim: default_name_claim(),
            admin_role: default_admin_role(),
            validate_issuer: default_validate_issuer(),
        }
    }

    /// Sets the OAuth2 scopes to request.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Adds a scope to the list of scopes to request.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Sets the claim name for roles.
    #[must_use]
    pub fn role_claim(mut self, claim: String) -> Self {
        self.role_claim = claim;
        self
    }

    /// Sets the claim name for the display name.
    #[must_use]
    pub fn name_claim(mut self, claim: String) -> Self {
        self.name_claim = claim;
        self
    }

    /// Sets the role name that grants administrative access.
    #[must_use]
    pub fn admin_role(mut self, role: String) -> Self {
        self.admin_role = role;
        self
    }

    /// Toggles issuer validation.
    ///
    /// Turning this off is a trust decision; the server logs a warning when
    /// it starts with issuer validation disabled.
    #[must_use]
    pub fn validate_issuer(mut self, validate: bool) -> Self {
        self.validate_issuer = validate;
        self
    }

    /// Builds the `AuthConfig`.
    #[must_use]
    pub fn build(self) -> AuthConfig {
        AuthConfig {
            issuer_url: self.issuer_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            redirect_uri: self.redirect_uri,
            scopes: self.scopes.join(","),
            role_claim: self.role_claim,
            name_claim: self.name_claim,
            admin_role: self.admin_role,
            validate_issuer: self.validate_issuer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AuthConfig {
        AuthConfig::new(
            "https://login.microsoftonline.com/tenant-id/v2.0".to_string(),
            "client-id".to_string(),
            "client-secret".to_string(),
            "https://app.example.com/signin-oidc".to_string(),
        )
    }

    #[test]
    fn new_config_has_defaults() {
        let config = test_config();

        assert_eq!(
            config.issuer_url(),
            "https://login.microsoftonline.com/tenant-id/v2.0"
        );
        assert_eq!(config.client_id(), "client-id");
        assert!(config.scopes().contains(&"openid"));
        assert!(config.scopes().contains(&"offline_access"));
        assert!(config.scopes().contains(&"email"));
        assert!(config.scopes().contains(&"profile"));
        assert_eq!(config.role_claim(), "roles");
        assert_eq!(config.name_claim(), "name");
        assert_eq!(config.admin_role(), "WebAdmins");
        assert!(config.validate_issuer());
    }

    #[test]
    fn builder_allows_customization() {
        let config = AuthConfig::builder(
            "https://auth.example.com".to_string(),
            "client-id".to_string(),
            "client-secret".to_string(),
            "https://app.example.com/signin-oidc".to_string(),
        )
        .role_claim("groups".to_string())
        .admin_role("CmsAdmins".to_string())
        .validate_issuer(false)
        .add_scope("groups".to_string())
        .build();

        assert_eq!(config.role_claim(), "groups");
        assert_eq!(config.admin_role(), "CmsAdmins");
        assert!(!config.validate_issuer());
        assert!(config.scopes().contains(&"groups"));
    }

    #[test]
    fn builder_add_scope_does_not_duplicate() {
        let config = AuthConfig::builder(
            "https://auth.example.com".to_string(),
            "client-id".to_string(),
            "client-secret".to_string(),
            "https://app.example.com/signin-oidc".to_string(),
        )
        .add_scope("openid".to_string()) // Already present
        .add_scope("custom".to_string())
        .build();

        let openid_count = config.scopes().iter().filter(|s| *s == &"openid").count();
        assert_eq!(openid_count, 1);
        assert!(config.scopes().contains(&"custom"));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "issuer_url": "https://login.microsoftonline.com/tenant-id/v2.0",
            "client_id": "my-client",
            "client_secret": "secret",
            "redirect_uri": "https://app.example.com/signin-oidc"
        }"#;

        let config: AuthConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(config.client_id(), "my-client");
        assert_eq!(
            config.scopes(),
            vec!["openid", "offline_access", "email", "profile"]
        );
        assert_eq!(config.role_claim(), "roles");
        assert!(config.validate_issuer());
    }

    #[test]
    fn issuer_validation_toggle_survives_serialization() {
        let config = AuthConfig::builder(
            "https://auth.example.com".to_string(),
            "client-id".to_string(),
            "client-secret".to_string(),
            "https://app.example.com/signin-oidc".to_string(),
        )
        .validate_issuer(false)
        .build();

        let json = serde_json::to_string(&config).expect("serialize");
        let parsed: AuthConfig = serde_json::from_str(&json).expect("deserialize");
        assert!(!parsed.validate_issuer());
    }
}
