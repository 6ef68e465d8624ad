//! The sign-in flow state machine and session establishment.
//!
//! Instead of hiding the sign-in sequence in framework event hooks, the flow
//! is driven through explicit, ordered transitions:
//!
//! ```text
//! Anonymous -> Challenged -> ExternalValidated -> LocalSynced -> SessionActive
//!                   \                 \
//!                    +-----------------+--> Rejected
//! ```
//!
//! A session cookie is issued strictly after claims synchronization
//! succeeds, so no session ever references a local user that does not exist.

use crate::claims::ExternalIdentity;
use crate::error::{EstablishError, FlowError, SyncError};
use crate::session::{Session, SessionId};
use crate::store::IdentityStore;
use crate::sync::ClaimsSynchronizer;
use chrono::Duration;
use std::fmt;
use std::sync::Arc;

/// States of a single sign-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInState {
    /// No session; nothing has happened yet.
    Anonymous,
    /// A redirect to the identity provider has been issued.
    Challenged,
    /// The provider's token passed validation.
    ExternalValidated,
    /// The local identity store has been reconciled with the token's claims.
    LocalSynced,
    /// A session cookie has been issued. Terminal.
    SessionActive,
    /// The attempt failed; no session cookie was issued. Terminal.
    Rejected,
}

impl SignInState {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionActive | Self::Rejected)
    }
}

impl fmt::Display for SignInState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Anonymous => "anonymous",
            Self::Challenged => "challenged",
            Self::ExternalValidated => "external-validated",
            Self::LocalSynced => "local-synced",
            Self::SessionActive => "session-active",
            Self::Rejected => "rejected",
        };
        write!(f, "{name}")
    }
}

/// Outcome of deciding whether to challenge an unauthenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeDecision {
    /// Redirect the caller to the identity provider.
    RedirectToProvider,
    /// The response already carries an internally produced 401; issuing a
    /// redirect now would loop. Leave the response alone.
    Suppressed,
}

/// Decides whether an unauthenticated request should be redirected to the
/// identity provider.
///
/// The loop guard: when the response already carries an internally produced
/// unauthorized status, the redirect is suppressed.
#[must_use]
pub fn challenge_decision(response_already_unauthorized: bool) -> ChallengeDecision {
    if response_already_unauthorized {
        tracing::debug!("provider redirect suppressed: response already unauthorized");
        ChallengeDecision::Suppressed
    } else {
        ChallengeDecision::RedirectToProvider
    }
}

/// Tracks one sign-in attempt through its states.
#[derive(Debug)]
pub struct SignInFlow {
    state: SignInState,
}

impl Default for SignInFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl SignInFlow {
    /// Starts a new flow in `Anonymous`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SignInState::Anonymous,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SignInState {
        self.state
    }

    /// `Anonymous -> Challenged`, unless the loop guard suppresses the
    /// redirect, in which case the flow stays in `Anonymous`.
    pub fn challenge(
        &mut self,
        response_already_unauthorized: bool,
    ) -> Result<ChallengeDecision, FlowError> {
        self.require(SignInState::Anonymous, SignInState::Challenged)?;
        let decision = challenge_decision(response_already_unauthorized);
        if decision == ChallengeDecision::RedirectToProvider {
            self.enter(SignInState::Challenged);
        }
        Ok(decision)
    }

    /// `Challenged -> ExternalValidated`: the provider's token passed
    /// signature and expiry checks.
    pub fn external_validated(&mut self) -> Result<(), FlowError> {
        self.require(SignInState::Challenged, SignInState::ExternalValidated)?;
        self.enter(SignInState::ExternalValidated);
        Ok(())
    }

    /// Token validation failed: `Challenged | ExternalValidated -> Rejected`.
    ///
    /// The reason is traced and should also be written back to the caller,
    /// not swallowed.
    pub fn validation_failed(&mut self, reason: &str) -> Result<(), FlowError> {
        if self.state != SignInState::Challenged && self.state != SignInState::ExternalValidated {
            return Err(FlowError {
                from: self.state,
                to: SignInState::Rejected,
            });
        }
        tracing::warn!(reason, "sign-in rejected: token validation failed");
        self.enter(SignInState::Rejected);
        Ok(())
    }

    /// `ExternalValidated -> LocalSynced`: the identity store now matches
    /// the token's claims.
    pub fn local_synced(&mut self) -> Result<(), FlowError> {
        self.require(SignInState::ExternalValidated, SignInState::LocalSynced)?;
        self.enter(SignInState::LocalSynced);
        Ok(())
    }

    /// Claims synchronization failed: `ExternalValidated -> Rejected`.
    pub fn sync_failed(&mut self, error: &SyncError) -> Result<(), FlowError> {
        self.require(SignInState::ExternalValidated, SignInState::Rejected)?;
        tracing::warn!(%error, retryable = error.is_retryable(), "sign-in rejected: claims sync failed");
        self.enter(SignInState::Rejected);
        Ok(())
    }

    /// `LocalSynced -> SessionActive`: a session cookie has been issued.
    pub fn session_active(&mut self) -> Result<(), FlowError> {
        self.require(SignInState::LocalSynced, SignInState::SessionActive)?;
        self.enter(SignInState::SessionActive);
        Ok(())
    }

    fn require(&self, from: SignInState, to: SignInState) -> Result<(), FlowError> {
        if self.state != from {
            return Err(FlowError {
                from: self.state,
                to,
            });
        }
        Ok(())
    }

    fn enter(&mut self, state: SignInState) {
        tracing::trace!(from = %self.state, to = %state, "sign-in transition");
        self.state = state;
    }
}

/// Owns the cookie session scheme: runs the sign-in flow end to end and
/// issues sessions only for synced local users.
pub struct SessionEstablisher {
    synchronizer: ClaimsSynchronizer,
    session_duration: Duration,
}

impl SessionEstablisher {
    /// Creates an establisher over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>, session_duration: Duration) -> Self {
        Self {
            synchronizer: ClaimsSynchronizer::new(store),
            session_duration,
        }
    }

    /// Returns the claims synchronizer.
    #[must_use]
    pub fn synchronizer(&self) -> &ClaimsSynchronizer {
        &self.synchronizer
    }

    /// Returns the configured session duration.
    #[must_use]
    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    /// Completes a sign-in for a validated external identity.
    ///
    /// The caller drives the same flow through `Challenged` and
    /// `ExternalValidated`; this continues it through `LocalSynced` to
    /// `SessionActive`. On any synchronization failure the flow ends in
    /// `Rejected` and no session is returned. A flow that has not reached
    /// `ExternalValidated` is refused before the store is touched.
    pub async fn establish(
        &self,
        flow: &mut SignInFlow,
        session_id: SessionId,
        identity: &ExternalIdentity,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> Result<Session, EstablishError> {
        if flow.state() != SignInState::ExternalValidated {
            return Err(FlowError {
                from: flow.state(),
                to: SignInState::LocalSynced,
            }
            .into());
        }

        let user = match self.synchronizer.synchronize(identity).await {
            Ok(user) => user,
            Err(err) => {
                flow.sync_failed(&err)?;
                return Err(err.into());
            }
        };
        flow.local_synced()?;

        let session = Session::with_tokens(
            session_id,
            user.id(),
            user.roles().clone(),
            self.session_duration,
            access_token,
            refresh_token,
        );
        flow.session_active()?;

        tracing::info!(
            user_id = %user.id(),
            session_id = %session.id(),
            "session established"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::role::{LocalRole, RoleName, RoleSet};
    use crate::store::MemoryIdentityStore;
    use crate::user::LocalUser;
    use amber_turnstile_core::UserId;
    use async_trait::async_trait;

    fn identity(subject: &str, roles: &[&str]) -> ExternalIdentity {
        ExternalIdentity::new(subject.to_string())
            .with_roles(roles.iter().map(|r| r.to_string()).collect())
    }

    fn validated_flow() -> SignInFlow {
        let mut flow = SignInFlow::new();
        flow.challenge(false).unwrap();
        flow.external_validated().unwrap();
        flow
    }

    #[test]
    fn happy_path_transitions() {
        let mut flow = SignInFlow::new();
        assert_eq!(flow.state(), SignInState::Anonymous);

        let decision = flow.challenge(false).unwrap();
        assert_eq!(decision, ChallengeDecision::RedirectToProvider);
        assert_eq!(flow.state(), SignInState::Challenged);

        flow.external_validated().unwrap();
        assert_eq!(flow.state(), SignInState::ExternalValidated);

        flow.local_synced().unwrap();
        assert_eq!(flow.state(), SignInState::LocalSynced);

        flow.session_active().unwrap();
        assert_eq!(flow.state(), SignInState::SessionActive);
        assert!(flow.state().is_terminal());
    }

    #[test]
    fn challenge_is_suppressed_when_response_already_unauthorized() {
        let mut flow = SignInFlow::new();

        let decision = flow.challenge(true).unwrap();

        assert_eq!(decision, ChallengeDecision::Suppressed);
        // The flow never left Anonymous; there is nothing to loop on.
        assert_eq!(flow.state(), SignInState::Anonymous);
    }

    #[test]
    fn validation_failure_rejects_from_challenged() {
        let mut flow = SignInFlow::new();
        flow.challenge(false).unwrap();

        flow.validation_failed("signature mismatch").unwrap();

        assert_eq!(flow.state(), SignInState::Rejected);
        assert!(flow.state().is_terminal());
    }

    #[test]
    fn validation_failure_rejects_from_external_validated() {
        let mut flow = SignInFlow::new();
        flow.challenge(false).unwrap();
        flow.external_validated().unwrap();

        flow.validation_failed("audience mismatch").unwrap();

        assert_eq!(flow.state(), SignInState::Rejected);
    }

    #[test]
    fn sync_failure_rejects() {
        let mut flow = SignInFlow::new();
        flow.challenge(false).unwrap();
        flow.external_validated().unwrap();

        flow.sync_failed(&SyncError::MissingSubjectClaim).unwrap();

        assert_eq!(flow.state(), SignInState::Rejected);
    }

    #[test]
    fn out_of_order_transition_is_rejected() {
        let mut flow = SignInFlow::new();

        let err = flow.session_active().unwrap_err();

        assert_eq!(err.from, SignInState::Anonymous);
        assert_eq!(err.to, SignInState::SessionActive);
        assert_eq!(flow.state(), SignInState::Anonymous);
    }

    #[test]
    fn no_transitions_out_of_rejected() {
        let mut flow = SignInFlow::new();
        flow.challenge(false).unwrap();
        flow.validation_failed("expired").unwrap();

        assert!(flow.external_validated().is_err());
        assert!(flow.local_synced().is_err());
        assert!(flow.session_active().is_err());
        assert_eq!(flow.state(), SignInState::Rejected);
    }

    #[tokio::test]
    async fn establish_issues_session_for_synced_user() {
        let store = Arc::new(MemoryIdentityStore::new());
        let establisher = SessionEstablisher::new(store.clone(), Duration::minutes(30));

        let mut flow = validated_flow();
        let session = establisher
            .establish(
                &mut flow,
                SessionId::from("sess_1"),
                &identity("azure|123", &["Editors"]),
                Some("access".to_string()),
                Some("refresh".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(flow.state(), SignInState::SessionActive);

        // The referenced user exists and the session carries its roles
        let user = store
            .find_user_by_subject("azure|123")
            .await
            .unwrap()
            .expect("user should exist");
        assert_eq!(session.user_id(), user.id());
        assert_eq!(session.roles(), user.roles());
        assert!(session.has_role(&RoleName::from("editors")));
        assert_eq!(session.access_token(), Some("access"));
        assert!(session.is_valid());
    }

    #[tokio::test]
    async fn establish_rejects_missing_subject_without_touching_store() {
        let store = Arc::new(MemoryIdentityStore::new());
        let establisher = SessionEstablisher::new(store.clone(), Duration::minutes(30));

        let mut flow = validated_flow();
        let err = establisher
            .establish(
                &mut flow,
                SessionId::from("sess_1"),
                &identity("", &[]),
                None,
                None,
            )
            .await
            .unwrap_err();

        assert_eq!(err, EstablishError::Sync(SyncError::MissingSubjectClaim));
        assert_eq!(flow.state(), SignInState::Rejected);
        assert_eq!(store.user_count().await, 0);
    }

    #[tokio::test]
    async fn establish_refuses_unvalidated_flow_without_touching_store() {
        let store = Arc::new(MemoryIdentityStore::new());
        let establisher = SessionEstablisher::new(store.clone(), Duration::minutes(30));

        let mut flow = SignInFlow::new();
        let err = establisher
            .establish(
                &mut flow,
                SessionId::from("sess_1"),
                &identity("azure|123", &["Editors"]),
                None,
                None,
            )
            .await
            .unwrap_err();

        match err {
            EstablishError::Flow(flow_err) => {
                assert_eq!(flow_err.from, SignInState::Anonymous);
            }
            other => panic!("expected flow error, got {other:?}"),
        }
        assert_eq!(store.user_count().await, 0);
    }

    #[tokio::test]
    async fn establish_keeps_refresh_token_without_access_token() {
        let store = Arc::new(MemoryIdentityStore::new());
        let establisher = SessionEstablisher::new(store, Duration::minutes(30));

        let mut flow = validated_flow();
        let session = establisher
            .establish(
                &mut flow,
                SessionId::from("sess_1"),
                &identity("azure|123", &[]),
                None,
                Some("refresh".to_string()),
            )
            .await
            .unwrap();

        assert!(session.access_token().is_none());
        assert_eq!(session.refresh_token(), Some("refresh"));
    }

    struct UnavailableStore;

    #[async_trait]
    impl IdentityStore for UnavailableStore {
        async fn find_user_by_subject(
            &self,
            _subject: &str,
        ) -> Result<Option<LocalUser>, StoreError> {
            Err(StoreError::Unavailable {
                details: "timeout".to_string(),
            })
        }

        async fn find_user_by_id(&self, _user_id: UserId) -> Result<Option<LocalUser>, StoreError> {
            Err(StoreError::Unavailable {
                details: "timeout".to_string(),
            })
        }

        async fn upsert_user(&self, _user: &LocalUser) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                details: "timeout".to_string(),
            })
        }

        async fn find_or_create_role(&self, _name: &RoleName) -> Result<LocalRole, StoreError> {
            Err(StoreError::Unavailable {
                details: "timeout".to_string(),
            })
        }

        async fn set_user_roles(
            &self,
            _user_id: UserId,
            _roles: &RoleSet,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                details: "timeout".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn establish_rejects_when_store_is_unavailable() {
        let establisher =
            SessionEstablisher::new(Arc::new(UnavailableStore), Duration::minutes(30));

        let mut flow = validated_flow();
        let err = establisher
            .establish(
                &mut flow,
                SessionId::from("sess_1"),
                &identity("azure|123", &["Editors"]),
                None,
                None,
            )
            .await
            .unwrap_err();

        match err {
            EstablishError::Sync(sync_err) => assert!(sync_err.is_retryable()),
            other => panic!("expected sync error, got {other:?}"),
        }
        assert_eq!(flow.state(), SignInState::Rejected);
    }
}
