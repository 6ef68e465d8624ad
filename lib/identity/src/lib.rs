//! Identity synchronization and session establishment for amber-turnstile.
//!
//! This crate provides:
//! - Claims synchronization (`ClaimsSynchronizer`, `ExternalIdentity`)
//! - Local identity records (`LocalUser`, `LocalRole`, `RoleSet`)
//! - The sign-in state machine (`SignInFlow`, `SessionEstablisher`)
//! - Session management (`Session`, `SessionId`)
//! - Identity provider configuration (`AuthConfig`)
//!
//! # Model
//!
//! The external identity provider is the source of truth for who a user is
//! and which roles they hold. Every successful sign-in reconciles the local
//! store with the provider's claims, and only then is a session issued.
//! Requests authorize against the roles captured in the session, never by
//! re-contacting the provider.
//!
//! # Example
//!
//! ```
//! use amber_turnstile_identity::{ExternalIdentity, RoleSet, Session, SessionId};
//! use amber_turnstile_core::UserId;
//! use chrono::Duration;
//!
//! // Claims as delivered by a validated ID token
//! let identity = ExternalIdentity::new("azure|123456".to_string())
//!     .with_email(Some("alice@example.com".to_string()))
//!     .with_roles(vec!["Editors".to_string(), "WebAdmins".to_string()]);
//!
//! // Role names compare case-insensitively
//! let roles = RoleSet::from_claims(&identity.roles);
//! assert!(roles.contains(&"webadmins".into()));
//!
//! // Sessions capture the synced roles for the rest of the visit
//! let session = Session::new(
//!     SessionId::from("sess_abc123"),
//!     UserId::new(),
//!     roles,
//!     Duration::hours(8),
//! );
//! assert!(session.has_role(&"Editors".into()));
//! ```

pub mod claims;
pub mod config;
pub mod error;
pub mod flow;
pub mod role;
pub mod session;
pub mod store;
pub mod sync;
pub mod user;

// Re-export main types at crate root
pub use claims::ExternalIdentity;
pub use config::{AuthConfig, AuthConfigBuilder, CALLBACK_PATH};
pub use error::{EstablishError, FlowError, StoreError, SyncError};
pub use flow::{ChallengeDecision, SessionEstablisher, SignInFlow, SignInState, challenge_decision};
pub use role::{LocalRole, RoleName, RoleSet};
pub use session::{Session, SessionId};
pub use store::{IdentityStore, MemoryIdentityStore};
pub use sync::ClaimsSynchronizer;
pub use user::LocalUser;
