//! Error types for the identity crate.
//!
//! - `StoreError`: identity store failures
//! - `SyncError`: claims synchronization failures
//! - `FlowError`: sign-in state machine misuse
//! - `EstablishError`: session establishment failures

use crate::flow::SignInState;
use amber_turnstile_core::UserId;
use std::fmt;

/// Errors from the identity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or a write failed mid-way.
    /// Transient; the sign-in may be retried.
    Unavailable { details: String },
    /// A role assignment referenced a user the store does not know.
    UnknownUser { user_id: UserId },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { details } => {
                write!(f, "identity store unavailable: {details}")
            }
            Self::UnknownUser { user_id } => {
                write!(f, "identity store has no user {user_id}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from claims synchronization.
///
/// Either variant is terminal for the sign-in attempt: no session cookie
/// is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The external identity carried no subject claim. Logged as a
    /// misconfiguration signal, since the provider is expected to send one.
    MissingSubjectClaim,
    /// The identity store was unavailable. Transient; surfaced as a failed
    /// sign-in with a retryable hint rather than silently ignored.
    StoreUnavailable { details: String },
}

impl SyncError {
    /// Returns true if retrying the sign-in may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSubjectClaim => {
                write!(f, "external identity carries no subject claim")
            }
            Self::StoreUnavailable { details } => {
                write!(f, "identity store unavailable during sync: {details}")
            }
        }
    }
}

impl std::error::Error for SyncError {}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { details } => Self::StoreUnavailable { details },
            StoreError::UnknownUser { user_id } => Self::StoreUnavailable {
                details: format!("user {user_id} vanished mid-sync"),
            },
        }
    }
}

/// Error from driving the sign-in state machine out of order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowError {
    /// The state the flow was in.
    pub from: SignInState,
    /// The state the caller tried to move to.
    pub to: SignInState,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid sign-in transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for FlowError {}

/// Errors from session establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstablishError {
    /// Claims synchronization failed; the flow ends in Rejected.
    Sync(SyncError),
    /// The state machine was driven out of order.
    Flow(FlowError),
}

impl fmt::Display for EstablishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(err) => write!(f, "session not established: {err}"),
            Self::Flow(err) => write!(f, "session not established: {err}"),
        }
    }
}

impl std::error::Error for EstablishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sync(err) => Some(err),
            Self::Flow(err) => Some(err),
        }
    }
}

impl From<SyncError> for EstablishError {
    fn from(err: SyncError) -> Self {
        Self::Sync(err)
    }
}

impl From<FlowError> for EstablishError {
    fn from(err: FlowError) -> Self {
        Self::Flow(err)
    }
}
