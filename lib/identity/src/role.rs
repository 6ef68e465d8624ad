//! Role types for the local identity store.
//!
//! Roles are created on demand when an external identity references a role
//! name not yet present locally. Role names are unique case-insensitively,
//! and the first-seen spelling is the one that sticks.

use amber_turnstile_core::RoleId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A role name with case-insensitive identity.
///
/// Two role names that differ only in ASCII case compare equal, hash equal,
/// and sort together. The original spelling is preserved for display and
/// storage, so `"WebAdmins"` stays `"WebAdmins"` even when a later sign-in
/// sends `"webadmins"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    /// Creates a role name, preserving the given spelling.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the role name as originally spelled.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for RoleName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for RoleName {}

impl PartialOrd for RoleName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RoleName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .bytes()
            .map(|b| b.to_ascii_lowercase())
            .cmp(other.0.bytes().map(|b| b.to_ascii_lowercase()))
    }
}

impl Hash for RoleName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoleName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoleName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A role record in the local identity store.
///
/// Roles are never deleted by the sign-in flow; they accumulate as external
/// identities reference them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRole {
    /// Internal role ID.
    id: RoleId,
    /// The role name, with its first-seen spelling.
    name: RoleName,
}

impl LocalRole {
    /// Creates a new role with a generated ID.
    #[must_use]
    pub fn new(name: RoleName) -> Self {
        Self {
            id: RoleId::new(),
            name,
        }
    }

    /// Creates a role with all fields specified, for reconstitution from storage.
    #[must_use]
    pub fn with_all_fields(id: RoleId, name: RoleName) -> Self {
        Self { id, name }
    }

    /// Returns the role's internal ID.
    #[must_use]
    pub fn id(&self) -> RoleId {
        self.id
    }

    /// Returns the role's name.
    #[must_use]
    pub fn name(&self) -> &RoleName {
        &self.name
    }
}

/// Set of role names assigned to a user.
///
/// Role synchronization is authoritative: the set always reflects exactly the
/// role claims of the latest sign-in, with additions and removals both applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet {
    roles: BTreeSet<RoleName>,
}

impl RoleSet {
    /// Creates an empty role set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the target role set from raw role claim values.
    ///
    /// Blank claim values are ignored. When the same name appears twice with
    /// different casing, the first spelling wins.
    #[must_use]
    pub fn from_claims(claims: &[String]) -> Self {
        let mut roles = BTreeSet::new();
        for claim in claims {
            let trimmed = claim.trim();
            if trimmed.is_empty() {
                continue;
            }
            let name = RoleName::new(trimmed);
            if !roles.contains(&name) {
                roles.insert(name);
            }
        }
        Self { roles }
    }

    /// Adds a role to the set. Returns false if an equal name was already present.
    pub fn insert(&mut self, name: RoleName) -> bool {
        if self.roles.contains(&name) {
            return false;
        }
        self.roles.insert(name)
    }

    /// Returns true if the set contains the given role name (case-insensitive).
    #[must_use]
    pub fn contains(&self, name: &RoleName) -> bool {
        self.roles.contains(name)
    }

    /// Iterates over the role names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &RoleName> {
        self.roles.iter()
    }

    /// Returns the number of roles in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl FromIterator<RoleName> for RoleSet {
    fn from_iter<I: IntoIterator<Item = RoleName>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_name_equality_ignores_case() {
        assert_eq!(RoleName::from("WebAdmins"), RoleName::from("webadmins"));
        assert_ne!(RoleName::from("WebAdmins"), RoleName::from("Editors"));
    }

    #[test]
    fn role_name_preserves_spelling() {
        let name = RoleName::from("WebAdmins");
        assert_eq!(name.as_str(), "WebAdmins");
        assert_eq!(name.to_string(), "WebAdmins");
    }

    #[test]
    fn role_name_hash_consistent_with_eq() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(RoleName::from("Editors"));
        set.insert(RoleName::from("EDITORS"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn from_claims_deduplicates_case_insensitively() {
        let claims = vec![
            "Editors".to_string(),
            "editors".to_string(),
            "WebAdmins".to_string(),
        ];
        let set = RoleSet::from_claims(&claims);

        assert_eq!(set.len(), 2);
        assert!(set.contains(&"editors".into()));
        assert!(set.contains(&"webadmins".into()));
        // First spelling wins
        let spellings: Vec<&str> = set.iter().map(RoleName::as_str).collect();
        assert!(spellings.contains(&"Editors"));
    }

    #[test]
    fn from_claims_skips_blank_values() {
        let claims = vec!["".to_string(), "  ".to_string(), "Editors".to_string()];
        let set = RoleSet::from_claims(&claims);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn insert_keeps_first_spelling() {
        let mut set = RoleSet::new();
        assert!(set.insert(RoleName::from("WebAdmins")));
        assert!(!set.insert(RoleName::from("webadmins")));

        let spellings: Vec<&str> = set.iter().map(RoleName::as_str).collect();
        assert_eq!(spellings, vec!["WebAdmins"]);
    }

    #[test]
    fn role_set_equality_ignores_order_and_case() {
        let a = RoleSet::from_claims(&["Editors".to_string(), "WebAdmins".to_string()]);
        let b = RoleSet::from_claims(&["webadmins".to_string(), "editors".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn local_role_has_generated_id() {
        let role = LocalRole::new(RoleName::from("Editors"));
        assert!(role.id().to_string().starts_with("role_"));
        assert_eq!(role.name().as_str(), "Editors");
    }

    #[test]
    fn role_set_serialization_roundtrip() {
        let set = RoleSet::from_claims(&["Editors".to_string(), "WebAdmins".to_string()]);
        let json = serde_json::to_string(&set).expect("serialize");
        let parsed: RoleSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(set, parsed);
    }
}
