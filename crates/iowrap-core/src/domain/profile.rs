//! The profile activation set.
//!
//! A profile groups subscriptions so a consumer can switch a whole set of
//! bindings on or off without unsubscribing them.  The set is process-wide:
//! toggling a profile through any provider affects every provider, because
//! they all hold a handle to the same [`ProfileActivationSet::shared`]
//! instance.  Tests construct isolated sets with [`ProfileActivationSet::new`].
//!
//! The dispatch path reads the set on every sample, so reads take a shared
//! `RwLock` guard and writes are rare.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use super::descriptor::ProfileId;

static SHARED: OnceLock<ProfileActivationSet> = OnceLock::new();

/// Cloneable handle onto a set of active profile ids.
#[derive(Debug, Clone, Default)]
pub struct ProfileActivationSet {
    active: Arc<RwLock<HashSet<ProfileId>>>,
}

impl ProfileActivationSet {
    /// Creates an isolated, empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide set shared by every provider.
    pub fn shared() -> Self {
        SHARED.get_or_init(Self::new).clone()
    }

    /// Activates or deactivates `profile`.
    ///
    /// Returns `true` if membership changed.  Calling twice with the same
    /// arguments leaves the set as the first call left it.
    pub fn set_state(&self, profile: ProfileId, active: bool) -> bool {
        let mut set = self.active.write().unwrap_or_else(PoisonError::into_inner);
        let changed = if active {
            set.insert(profile)
        } else {
            set.remove(&profile)
        };
        if changed {
            debug!(%profile, active, "profile state changed");
        }
        changed
    }

    pub fn is_active(&self, profile: &ProfileId) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(profile)
    }

    pub fn len(&self) -> usize {
        self.active.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deactivates every profile.
    pub fn clear(&self) {
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_set_state_true_twice_is_idempotent() {
        // Arrange
        let set = ProfileActivationSet::new();
        let profile = Uuid::new_v4();

        // Act
        let first = set.set_state(profile, true);
        let second = set.set_state(profile, true);

        // Assert
        assert!(first);
        assert!(!second, "second activation must not change the set");
        assert_eq!(set.len(), 1);
        assert!(set.is_active(&profile));
    }

    #[test]
    fn test_set_state_false_removes_profile() {
        let set = ProfileActivationSet::new();
        let profile = Uuid::new_v4();
        set.set_state(profile, true);

        assert!(set.set_state(profile, false));
        assert!(!set.is_active(&profile));
        assert!(set.is_empty());
    }

    #[test]
    fn test_clones_observe_the_same_set() {
        // Arrange
        let a = ProfileActivationSet::new();
        let b = a.clone();
        let profile = Uuid::new_v4();

        // Act
        a.set_state(profile, true);

        // Assert
        assert!(b.is_active(&profile));
    }

    #[test]
    fn test_shared_returns_the_same_underlying_set() {
        let profile = Uuid::new_v4();
        ProfileActivationSet::shared().set_state(profile, true);
        assert!(ProfileActivationSet::shared().is_active(&profile));
        ProfileActivationSet::shared().set_state(profile, false);
    }

    #[test]
    fn test_isolated_sets_do_not_interfere() {
        let a = ProfileActivationSet::new();
        let b = ProfileActivationSet::new();
        let profile = Uuid::new_v4();
        a.set_state(profile, true);
        assert!(!b.is_active(&profile));
    }
}
