//! Cross-instance ownership of graph identities.
//!
//! The index is the only state instances share. It is locked for short,
//! synchronous critical sections and never across provider or gateway calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use graphsync_core::{AppliedSnapshot, EntityKey, InstanceId, RelationKey};
use tokio::sync::{Mutex, MutexGuard};

/// Anything that can be owned: an entity or a resolved relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    Entity(EntityKey),
    Relation(RelationKey),
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(k) => k.fmt(f),
            Self::Relation(k) => k.fmt(f),
        }
    }
}

fn snapshot_identities(snapshot: &AppliedSnapshot) -> impl Iterator<Item = Identity> + '_ {
    snapshot
        .entities()
        .keys()
        .cloned()
        .map(Identity::Entity)
        .chain(snapshot.relations().keys().cloned().map(Identity::Relation))
}

/// Map from identity to owning instance.
#[derive(Debug, Default)]
pub struct OwnershipIndex {
    owners: HashMap<Identity, InstanceId>,
}

impl OwnershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner_of(&self, identity: &Identity) -> Option<&InstanceId> {
        self.owners.get(identity)
    }

    /// The owner if it is someone other than `instance`.
    pub fn foreign_owner(&self, identity: &Identity, instance: &InstanceId) -> Option<&InstanceId> {
        self.owners.get(identity).filter(|owner| *owner != instance)
    }

    /// Claim identities not yet owned by anyone. Identities owned by
    /// another instance are left alone; the caller has already filtered them.
    pub fn reserve<'a>(
        &mut self,
        instance: &InstanceId,
        identities: impl IntoIterator<Item = &'a Identity>,
    ) {
        for identity in identities {
            self.owners
                .entry(identity.clone())
                .or_insert_with(|| instance.clone());
        }
    }

    /// Make `instance`'s claims exactly the contents of `snapshot`.
    ///
    /// Used both to commit after a successful apply and to release
    /// reservations after a failed, timed out or cancelled tick.
    pub fn sync_to(&mut self, instance: &InstanceId, snapshot: &AppliedSnapshot) {
        self.owners.retain(|_, owner| owner != instance);
        for identity in snapshot_identities(snapshot) {
            self.owners.entry(identity).or_insert_with(|| instance.clone());
        }
    }

    /// Drop every claim held by `instance`.
    pub fn forget(&mut self, instance: &InstanceId) {
        self.owners.retain(|_, owner| owner != instance);
    }

    pub fn claims_of(&self, instance: &InstanceId) -> usize {
        self.owners.values().filter(|owner| *owner == instance).count()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Handle to the process-wide ownership index.
#[derive(Debug, Clone, Default)]
pub struct SharedOwnership {
    inner: Arc<Mutex<OwnershipIndex>>,
}

impl SharedOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, OwnershipIndex> {
        self.inner.lock().await
    }

    /// Release reservations: claims go back to what `snapshot` holds.
    pub async fn restore(&self, instance: &InstanceId, snapshot: &AppliedSnapshot) {
        self.lock().await.sync_to(instance, snapshot);
    }

    /// Record a newly applied snapshot as the instance's claims.
    pub async fn commit(&self, instance: &InstanceId, snapshot: &AppliedSnapshot) {
        self.lock().await.sync_to(instance, snapshot);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use graphsync_core::Entity;

    use super::*;

    fn id(name: &str) -> InstanceId {
        InstanceId::new(name).unwrap()
    }

    fn repo(name: &str) -> Identity {
        Identity::Entity(EntityKey::new("Repo", "default", name).unwrap())
    }

    #[test]
    fn test_reserve_does_not_steal() {
        let mut index = OwnershipIndex::new();
        index.reserve(&id("a"), &[repo("x")]);
        index.reserve(&id("b"), &[repo("x"), repo("y")]);
        assert_eq!(index.owner_of(&repo("x")), Some(&id("a")));
        assert_eq!(index.owner_of(&repo("y")), Some(&id("b")));
    }

    #[test]
    fn test_foreign_owner_ignores_self() {
        let mut index = OwnershipIndex::new();
        index.reserve(&id("a"), &[repo("x")]);
        assert!(index.foreign_owner(&repo("x"), &id("a")).is_none());
        assert_eq!(index.foreign_owner(&repo("x"), &id("b")), Some(&id("a")));
    }

    #[test]
    fn test_sync_to_releases_unapplied_reservations() {
        let mut index = OwnershipIndex::new();
        let snapshot = AppliedSnapshot::from_parts(
            id("a"),
            [Entity::new("Repo", "default", "x").unwrap()],
            [],
        );
        index.reserve(&id("a"), &[repo("x"), repo("y")]);
        index.sync_to(&id("a"), &snapshot);
        assert_eq!(index.claims_of(&id("a")), 1);
        assert!(index.owner_of(&repo("y")).is_none());
    }

    #[test]
    fn test_forget() {
        let mut index = OwnershipIndex::new();
        index.reserve(&id("a"), &[repo("x")]);
        index.reserve(&id("b"), &[repo("y")]);
        index.forget(&id("a"));
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_restore() {
        let shared = SharedOwnership::new();
        shared.lock().await.reserve(&id("a"), &[repo("x")]);
        shared
            .restore(&id("a"), &AppliedSnapshot::empty(id("a")))
            .await;
        assert!(shared.lock().await.is_empty());
    }
}
