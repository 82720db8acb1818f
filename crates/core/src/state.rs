//! Reported state, applied snapshots and the mutation sets between them.

use chrono::{DateTime, Utc};
use im::OrdMap;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKey};
use crate::ids::InstanceId;
use crate::relation::{Relation, RelationKey, ResolvedRelation};

/// Everything one provider claims exists for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportedState {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl ReportedState {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Append another batch, as produced by incremental discovery.
    pub fn extend(&mut self, other: Self) {
        self.entities.extend(other.entities);
        self.relations.extend(other.relations);
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// The minimal change that moves the graph from a snapshot to a reported
/// state. Applied all-or-nothing by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationSet {
    pub owner: InstanceId,
    pub create_entities: Vec<Entity>,
    pub update_entities: Vec<Entity>,
    pub delete_entities: Vec<EntityKey>,
    pub create_relations: Vec<ResolvedRelation>,
    pub delete_relations: Vec<RelationKey>,
}

impl MutationSet {
    pub const fn empty(owner: InstanceId) -> Self {
        Self {
            owner,
            create_entities: Vec::new(),
            update_entities: Vec::new(),
            delete_entities: Vec::new(),
            create_relations: Vec::new(),
            delete_relations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.create_entities.is_empty()
            && self.update_entities.is_empty()
            && self.delete_entities.is_empty()
            && self.create_relations.is_empty()
            && self.delete_relations.is_empty()
    }

    /// Total number of individual mutations.
    pub fn len(&self) -> usize {
        self.create_entities.len()
            + self.update_entities.len()
            + self.delete_entities.len()
            + self.create_relations.len()
            + self.delete_relations.len()
    }

    /// Entity kinds touched by creates or updates, deduplicated.
    pub fn written_kinds(&self) -> Vec<String> {
        use itertools::Itertools;
        self.create_entities
            .iter()
            .chain(&self.update_entities)
            .map(|e| e.kind().to_string())
            .sorted()
            .dedup()
            .collect()
    }
}

/// What the core believes is committed for one instance. Replaced only
/// after a successful apply; every item carries the snapshot's owner.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedSnapshot {
    owner: InstanceId,
    entities: OrdMap<EntityKey, Entity>,
    relations: OrdMap<RelationKey, ResolvedRelation>,
    tick: u64,
    applied_at: Option<DateTime<Utc>>,
}

impl AppliedSnapshot {
    /// Snapshot of an instance that has never applied anything.
    pub fn empty(owner: InstanceId) -> Self {
        Self {
            owner,
            entities: OrdMap::new(),
            relations: OrdMap::new(),
            tick: 0,
            applied_at: None,
        }
    }

    /// Build a snapshot directly from its contents, stamping the owner
    /// on every item.
    pub fn from_parts(
        owner: InstanceId,
        entities: impl IntoIterator<Item = Entity>,
        relations: impl IntoIterator<Item = RelationKey>,
    ) -> Self {
        let entities = entities
            .into_iter()
            .map(|e| (e.key().clone(), e.with_owner(owner.clone())))
            .collect();
        let relations = relations
            .into_iter()
            .map(|k| (k.clone(), ResolvedRelation::new(k, owner.clone())))
            .collect();
        Self {
            owner,
            entities,
            relations,
            tick: 0,
            applied_at: None,
        }
    }

    pub const fn owner(&self) -> &InstanceId {
        &self.owner
    }

    pub const fn entities(&self) -> &OrdMap<EntityKey, Entity> {
        &self.entities
    }

    pub const fn relations(&self) -> &OrdMap<RelationKey, ResolvedRelation> {
        &self.relations
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub const fn tick(&self) -> u64 {
        self.tick
    }

    pub const fn applied_at(&self) -> Option<DateTime<Utc>> {
        self.applied_at
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    /// The snapshot that results from successfully applying `mutations`.
    ///
    /// Structural sharing keeps this cheap; `self` is left untouched so a
    /// failed or cancelled tick can simply drop the new value.
    #[must_use]
    pub fn advance(&self, mutations: &MutationSet, at: DateTime<Utc>) -> Self {
        let mut entities = self.entities.clone();
        for key in &mutations.delete_entities {
            entities.remove(key);
        }
        for entity in mutations
            .create_entities
            .iter()
            .chain(&mutations.update_entities)
        {
            entities.insert(
                entity.key().clone(),
                entity.clone().with_owner(self.owner.clone()),
            );
        }

        let mut relations = self.relations.clone();
        for key in &mutations.delete_relations {
            relations.remove(key);
        }
        for rel in &mutations.create_relations {
            relations.insert(
                rel.key().clone(),
                ResolvedRelation::new(rel.key().clone(), self.owner.clone()),
            );
        }

        Self {
            owner: self.owner.clone(),
            entities,
            relations,
            tick: self.tick.saturating_add(1),
            applied_at: Some(at),
        }
    }
}
