//! The identity store consumed by the claims synchronizer.
//!
//! The store owns `LocalUser` and `LocalRole` records. Implementations must
//! make a whole sign-in's writes land atomically: a reader never observes a
//! user whose profile fields and role assignments come from different
//! sign-ins. The Postgres store in the server does this with a transaction;
//! the in-memory store here does it with a single critical section.

use crate::error::StoreError;
use crate::role::{LocalRole, RoleName, RoleSet};
use crate::user::LocalUser;
use amber_turnstile_core::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage interface for local users and roles.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Looks up a user by their external subject claim.
    async fn find_user_by_subject(&self, subject: &str) -> Result<Option<LocalUser>, StoreError>;

    /// Looks up a user by their internal platform ID.
    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<LocalUser>, StoreError>;

    /// Creates or replaces a user record, keyed by subject.
    async fn upsert_user(&self, user: &LocalUser) -> Result<(), StoreError>;

    /// Returns the role with the given name, creating it if absent.
    ///
    /// Role names are unique case-insensitively; the first-seen spelling
    /// is preserved.
    async fn find_or_create_role(&self, name: &RoleName) -> Result<LocalRole, StoreError>;

    /// Replaces a user's role assignments with exactly the given set.
    async fn set_user_roles(&self, user_id: UserId, roles: &RoleSet) -> Result<(), StoreError>;

    /// Applies all of a sign-in's writes: the user upsert, any missing
    /// roles, and the authoritative role assignment.
    ///
    /// The default implementation chains the fine-grained operations;
    /// implementations override it to make the writes atomic.
    async fn synchronize_user(&self, user: &LocalUser) -> Result<(), StoreError> {
        self.upsert_user(user).await?;
        for name in user.roles().iter() {
            self.find_or_create_role(name).await?;
        }
        self.set_user_roles(user.id(), user.roles()).await
    }
}

#[derive(Default)]
struct MemoryState {
    /// Users keyed by subject claim.
    users: HashMap<String, LocalUser>,
    /// Roles keyed by name; the key's case-insensitive hash enforces
    /// uniqueness.
    roles: HashMap<RoleName, LocalRole>,
}

/// In-memory identity store for tests and local development.
#[derive(Default)]
pub struct MemoryIdentityStore {
    inner: RwLock<MemoryState>,
}

impl MemoryIdentityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of users in the store.
    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    /// Returns the number of roles in the store.
    pub async fn role_count(&self) -> usize {
        self.inner.read().await.roles.len()
    }

    /// Returns the role record for the given name, if present.
    pub async fn role(&self, name: &RoleName) -> Option<LocalRole> {
        self.inner.read().await.roles.get(name).cloned()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find_user_by_subject(&self, subject: &str) -> Result<Option<LocalUser>, StoreError> {
        Ok(self.inner.read().await.users.get(subject).cloned())
    }

    async fn find_user_by_id(&self, user_id: UserId) -> Result<Option<LocalUser>, StoreError> {
        let state = self.inner.read().await;
        Ok(state.users.values().find(|u| u.id() == user_id).cloned())
    }

    async fn upsert_user(&self, user: &LocalUser) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        state
            .users
            .insert(user.subject().to_string(), user.clone());
        Ok(())
    }

    async fn find_or_create_role(&self, name: &RoleName) -> Result<LocalRole, StoreError> {
        let mut state = self.inner.write().await;
        if let Some(role) = state.roles.get(name) {
            return Ok(role.clone());
        }
        let role = LocalRole::new(name.clone());
        state.roles.insert(name.clone(), role.clone());
        Ok(role)
    }

    async fn set_user_roles(&self, user_id: UserId, roles: &RoleSet) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        let user = state
            .users
            .values_mut()
            .find(|u| u.id() == user_id)
            .ok_or(StoreError::UnknownUser { user_id })?;
        user.set_roles(roles.clone());
        Ok(())
    }

    // All writes under one lock, so a concurrent reader sees either the
    // previous sign-in's state or this one's, never a mix.
    async fn synchronize_user(&self, user: &LocalUser) -> Result<(), StoreError> {
        let mut state = self.inner.write().await;
        for name in user.roles().iter() {
            if !state.roles.contains_key(name) {
                state
                    .roles
                    .insert(name.clone(), LocalRole::new(name.clone()));
            }
        }
        state
            .users
            .insert(user.subject().to_string(), user.clone());
        Ok(())
    }
}
