//! Core types for the reconciler.

use graphsync_core::{Entity, InstanceId, MutationSet, RelationKey, TickId};

use crate::ownership::Identity;

/// Reported state after deferred endpoints have been resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedState {
    pub entities: Vec<Entity>,
    pub relations: Vec<RelationKey>,
    /// Selectors that matched nothing this tick.
    pub misses: Vec<String>,
}

/// A claim dropped because another instance owns the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipConflict {
    pub identity: Identity,
    pub owner: InstanceId,
}

/// Result of diffing one resolved state against a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub mutations: MutationSet,
    pub conflicts: Vec<OwnershipConflict>,
    /// Reported identities that needed no change.
    pub unchanged: usize,
}

impl ReconcileOutcome {
    pub fn is_converged(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Summary of one tick, logged and surfaced through health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: TickId,
    pub instance: InstanceId,
    pub entities_created: usize,
    pub entities_updated: usize,
    pub entities_deleted: usize,
    pub relations_created: usize,
    pub relations_deleted: usize,
    pub unchanged: usize,
    pub resolution_misses: usize,
    pub conflicts: usize,
    /// Relations dropped because the provider does not produce relations.
    pub dropped_relations: usize,
}

impl TickReport {
    pub fn new(tick: TickId, instance: InstanceId) -> Self {
        Self {
            tick,
            instance,
            entities_created: 0,
            entities_updated: 0,
            entities_deleted: 0,
            relations_created: 0,
            relations_deleted: 0,
            unchanged: 0,
            resolution_misses: 0,
            conflicts: 0,
            dropped_relations: 0,
        }
    }

    /// Fill in the mutation counts from an outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: &ReconcileOutcome) -> Self {
        let m = &outcome.mutations;
        self.entities_created = m.create_entities.len();
        self.entities_updated = m.update_entities.len();
        self.entities_deleted = m.delete_entities.len();
        self.relations_created = m.create_relations.len();
        self.relations_deleted = m.delete_relations.len();
        self.unchanged = outcome.unchanged;
        self.conflicts = outcome.conflicts.len();
        self
    }

    /// Nothing needed to change.
    pub const fn converged(&self) -> bool {
        self.entities_created == 0
            && self.entities_updated == 0
            && self.entities_deleted == 0
            && self.relations_created == 0
            && self.relations_deleted == 0
    }
}
