//! The in-memory secondary-resource owner index (§4.5, §9 "cyclic
//! references" design note): one-way owner pointers on the data model plus
//! an index from owner key to secondary keys, so a secondary-resource event
//! can re-enqueue its owning CSV without the CSV needing a back-pointer.
//!
//! This is the crate's one piece of process-wide mutable state besides the
//! subscription-sync counter (§5), and follows the same
//! encapsulate-behind-a-lock discipline.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Identifies an owning object: its kind, namespace, and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Identifies a secondary (owned) object the same way.
pub type SecondaryKey = OwnerKey;

#[derive(Default)]
pub struct OwnerIndex {
    forward: RwLock<HashMap<OwnerKey, HashSet<SecondaryKey>>>,
}

impl OwnerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `secondary` is owned by `owner`, called from a
    /// secondary-resource informer's add/update handler.
    pub fn record(&self, owner: OwnerKey, secondary: SecondaryKey) {
        let mut guard = self.forward.write().expect("owner index lock poisoned");
        guard.entry(owner).or_default().insert(secondary);
    }

    /// Removes `secondary` from `owner`'s set, called on a secondary-resource
    /// delete event.
    pub fn forget(&self, owner: &OwnerKey, secondary: &SecondaryKey) {
        let mut guard = self.forward.write().expect("owner index lock poisoned");
        if let Some(secondaries) = guard.get_mut(owner) {
            secondaries.remove(secondary);
            if secondaries.is_empty() {
                guard.remove(owner);
            }
        }
    }

    /// The secondary keys currently recorded under `owner`, used to decide
    /// what to re-enqueue on an owner-level event.
    pub fn keys_for(&self, owner: &OwnerKey) -> Vec<SecondaryKey> {
        let guard = self.forward.read().expect("owner index lock poisoned");
        guard.get(owner).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> OwnerKey {
        OwnerKey {
            kind: "ClusterServiceVersion".into(),
            namespace: "olm".into(),
            name: name.into(),
        }
    }

    fn secondary(name: &str) -> SecondaryKey {
        SecondaryKey {
            kind: "Deployment".into(),
            namespace: "olm".into(),
            name: name.into(),
        }
    }

    #[test]
    fn records_and_returns_secondaries_for_an_owner() {
        let index = OwnerIndex::new();
        index.record(key("csv-a"), secondary("operator"));
        assert_eq!(index.keys_for(&key("csv-a")), vec![secondary("operator")]);
    }

    #[test]
    fn forgetting_last_secondary_drops_the_owner_entry() {
        let index = OwnerIndex::new();
        index.record(key("csv-a"), secondary("operator"));
        index.forget(&key("csv-a"), &secondary("operator"));
        assert!(index.keys_for(&key("csv-a")).is_empty());
    }

    #[test]
    fn unrelated_owners_do_not_interfere() {
        let index = OwnerIndex::new();
        index.record(key("csv-a"), secondary("operator-a"));
        index.record(key("csv-b"), secondary("operator-b"));
        assert_eq!(index.keys_for(&key("csv-a")), vec![secondary("operator-a")]);
        assert_eq!(index.keys_for(&key("csv-b")), vec![secondary("operator-b")]);
    }
}
