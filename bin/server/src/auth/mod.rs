//! Authentication module for the amber-turnstile server.
//!
//! This module provides:
//! - OIDC authentication against an external identity provider
//! - Claims synchronization into the Postgres identity store
//! - Database-backed session management
//! - Authentication middleware/extractors for Axum routes
//!
//! # Authorization Model
//!
//! The identity provider is authoritative for who a user is and which roles
//! they hold. Every sign-in reconciles the local store with the token's
//! claims, and a session is issued only after that succeeds. All requests
//! after sign-in authorize against the roles captured in the session;
//! role changes at the provider take effect on the next sign-in (or session
//! expiry), so session duration bounds the revocation latency.

pub mod middleware;
pub mod oidc;
pub mod routes;
pub mod store;

use crate::config::SessionConfig;
use amber_turnstile_identity::SessionEstablisher;
use sqlx::PgPool;
use std::sync::Arc;

pub use middleware::{CurrentUser, OptionalAuth, RequireAdmin, RequireAuth};
pub use oidc::OidcClient;
pub use routes::{callback, login, logout};
pub use store::{PgIdentityStore, SessionRepository};

/// Shared application state.
pub struct AppState {
    /// Database connection pool.
    pub db_pool: PgPool,
    /// OIDC client for authentication.
    pub oidc_client: OidcClient,
    /// Runs the sign-in flow and issues sessions.
    pub establisher: SessionEstablisher,
    /// Session configuration.
    pub session_config: SessionConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(db_pool: PgPool, oidc_client: OidcClient, session_config: SessionConfig) -> Self {
        let store = Arc::new(PgIdentityStore::new(db_pool.clone()));
        let establisher = SessionEstablisher::new(
            store,
            chrono::Duration::minutes(session_config.duration_minutes),
        );
        Self {
            db_pool,
            oidc_client,
            establisher,
            session_config,
        }
    }
}
