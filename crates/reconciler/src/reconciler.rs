//! Identity diff between a resolved state and an applied snapshot.

use std::collections::{BTreeMap, BTreeSet};

use graphsync_core::{
    AppliedSnapshot, Entity, EntityKey, InstanceId, MutationSet, RelationKey, ResolvedRelation,
};
use tracing::{debug, warn};

use crate::ownership::{Identity, OwnershipIndex};
use crate::types::{OwnershipConflict, ReconcileOutcome, ResolvedState};

/// Compute the minimal mutation set moving `snapshot` to `resolved`.
///
/// - creates are reported identities missing from the snapshot
/// - deletes are snapshot identities no longer reported
/// - identities present in both become updates only if the value changed
///
/// Identities owned by another instance are dropped and returned as
/// conflicts. Every emitted item carries `instance` as its owner.
pub fn reconcile(
    instance: &InstanceId,
    resolved: &ResolvedState,
    snapshot: &AppliedSnapshot,
    ownership: &OwnershipIndex,
) -> ReconcileOutcome {
    let mut mutations = MutationSet::empty(instance.clone());
    let mut conflicts = Vec::new();
    let mut unchanged = 0;

    // Later reports of the same key replace earlier ones.
    let reported: BTreeMap<&EntityKey, &Entity> =
        resolved.entities.iter().map(|e| (e.key(), e)).collect();

    for (key, entity) in &reported {
        let identity = Identity::Entity((*key).clone());
        if let Some(owner) = ownership.foreign_owner(&identity, instance) {
            warn!(
                instance = %instance,
                owner = %owner,
                entity = %key,
                "Dropping entity owned by another instance"
            );
            conflicts.push(OwnershipConflict {
                identity,
                owner: owner.clone(),
            });
            continue;
        }
        match snapshot.entity(key) {
            None => mutations
                .create_entities
                .push((*entity).clone().with_owner(instance.clone())),
            Some(applied) if !applied.same_content(entity) => mutations
                .update_entities
                .push((*entity).clone().with_owner(instance.clone())),
            Some(_) => unchanged += 1,
        }
    }

    mutations.delete_entities = snapshot
        .entities()
        .keys()
        .filter(|k| !reported.contains_key(k))
        .cloned()
        .collect();

    let reported_relations: BTreeSet<&RelationKey> = resolved.relations.iter().collect();

    for key in &reported_relations {
        let identity = Identity::Relation((*key).clone());
        if let Some(owner) = ownership.foreign_owner(&identity, instance) {
            warn!(
                instance = %instance,
                owner = %owner,
                relation = %key,
                "Dropping relation owned by another instance"
            );
            conflicts.push(OwnershipConflict {
                identity,
                owner: owner.clone(),
            });
            continue;
        }
        if snapshot.relations().contains_key(*key) {
            unchanged += 1;
        } else {
            mutations
                .create_relations
                .push(ResolvedRelation::new((*key).clone(), instance.clone()));
        }
    }

    mutations.delete_relations = snapshot
        .relations()
        .keys()
        .filter(|k| !reported_relations.contains(k))
        .cloned()
        .collect();

    debug!(
        instance = %instance,
        creates = mutations.create_entities.len(),
        updates = mutations.update_entities.len(),
        deletes = mutations.delete_entities.len(),
        relation_creates = mutations.create_relations.len(),
        relation_deletes = mutations.delete_relations.len(),
        conflicts = conflicts.len(),
        "Computed mutation set"
    );

    ReconcileOutcome {
        mutations,
        conflicts,
        unchanged,
    }
}

/// Identities a mutation set newly claims for its owner.
pub fn claimed_identities(mutations: &MutationSet) -> Vec<Identity> {
    mutations
        .create_entities
        .iter()
        .chain(&mutations.update_entities)
        .map(|e| Identity::Entity(e.key().clone()))
        .chain(
            mutations
                .create_relations
                .iter()
                .map(|r| Identity::Relation(r.key().clone())),
        )
        .collect()
}
