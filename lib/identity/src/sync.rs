//! Claims synchronization.
//!
//! Takes a validated external identity and reconciles the local identity
//! store with it: the user record is created on first sign-in and refreshed
//! on every subsequent one, and role assignments are set to exactly the
//! identity's role claims. Synchronization is authoritative, not additive.

use crate::claims::ExternalIdentity;
use crate::error::SyncError;
use crate::role::RoleSet;
use crate::store::IdentityStore;
use crate::user::LocalUser;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Reconciles local users and roles with external identities.
///
/// Concurrent sign-ins for different subjects proceed independently.
/// Sign-ins for the same subject are serialized through a per-subject lock,
/// so two overlapping attempts can never interleave their writes; whichever
/// finishes last wins in full.
pub struct ClaimsSynchronizer {
    store: Arc<dyn IdentityStore>,
    // Per-subject guards. Entries are tiny and kept for the process
    // lifetime; the set of distinct subjects is bounded by the user base.
    subject_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ClaimsSynchronizer {
    /// Creates a synchronizer over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            subject_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Synchronizes the local store with a validated external identity.
    ///
    /// Looks up the user by subject, creating one on first sign-in. Email
    /// and display name are overwritten unconditionally from the identity,
    /// and the role assignments are replaced with exactly the identity's
    /// role claims (missing roles are created on demand).
    ///
    /// Returns the synced user; the caller may only issue a session cookie
    /// after this returns Ok.
    ///
    /// # Errors
    ///
    /// - [`SyncError::MissingSubjectClaim`] if the identity carries no
    ///   subject. Fatal for the attempt.
    /// - [`SyncError::StoreUnavailable`] if the store failed. Transient;
    ///   the sign-in may be retried.
    pub async fn synchronize(&self, identity: &ExternalIdentity) -> Result<LocalUser, SyncError> {
        let subject = identity.subject.trim();
        if subject.is_empty() {
            // Misconfiguration signal: the provider is not sending the
            // expected claim.
            tracing::warn!("sign-in rejected: external identity carries no subject claim");
            return Err(SyncError::MissingSubjectClaim);
        }

        let guard = self.subject_guard(subject).await;
        let _locked = guard.lock().await;

        let existing = self.store.find_user_by_subject(subject).await?;
        let is_new_user = existing.is_none();
        let mut user = existing.unwrap_or_else(|| LocalUser::new(subject.to_string()));

        // Last write wins; no merge.
        user.set_email(identity.email.clone());
        user.set_display_name(identity.display_name.clone());
        user.set_roles(RoleSet::from_claims(&identity.roles));

        self.store.synchronize_user(&user).await?;

        tracing::debug!(
            subject,
            user_id = %user.id(),
            is_new_user,
            role_count = user.roles().len(),
            "synchronized local user"
        );

        Ok(user)
    }

    async fn subject_guard(&self, subject: &str) -> Arc<Mutex<()>> {
        let mut locks = self.subject_locks.lock().await;
        locks
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
