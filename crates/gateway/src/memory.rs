//! In-memory graph sink: reference implementation and test double.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graphsync_core::{
    AppliedSnapshot, Entity, EntityKey, EntityTypeDef, Error, FieldSelector, InstanceId,
    MutationSet, RelationKey, ResolvedRelation, Result,
};
use tokio::sync::{Mutex, RwLock};

use crate::gateway::ApplyGateway;

#[derive(Debug, Default)]
struct Graph {
    types: BTreeMap<String, EntityTypeDef>,
    entities: BTreeMap<EntityKey, Entity>,
    relations: BTreeMap<RelationKey, ResolvedRelation>,
}

impl Graph {
    /// Check every mutation against the current graph without touching it.
    fn check(&self, mutations: &MutationSet, strict_types: bool) -> Result<()> {
        for entity in mutations
            .create_entities
            .iter()
            .chain(&mutations.update_entities)
        {
            if strict_types && !self.types.contains_key(entity.kind()) {
                return Err(Error::structural_apply(
                    entity.kind(),
                    "entity type definition not found",
                ));
            }
            if let Some(owner) = self.entities.get(entity.key()).and_then(Entity::owner) {
                if owner != &mutations.owner {
                    return Err(Error::ownership_conflict(
                        entity.key().to_string(),
                        mutations.owner.as_str(),
                        owner.as_str(),
                    ));
                }
            }
        }
        for rel in &mutations.create_relations {
            if let Some(existing) = self.relations.get(rel.key()) {
                if existing.owner() != &mutations.owner {
                    return Err(Error::ownership_conflict(
                        rel.key().to_string(),
                        mutations.owner.as_str(),
                        existing.owner().as_str(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, mutations: &MutationSet) {
        for key in &mutations.delete_relations {
            self.relations.remove(key);
        }
        for key in &mutations.delete_entities {
            if self
                .entities
                .get(key)
                .is_some_and(|e| e.owner() == Some(&mutations.owner))
            {
                self.entities.remove(key);
            }
        }
        for entity in mutations
            .create_entities
            .iter()
            .chain(&mutations.update_entities)
        {
            self.entities.insert(
                entity.key().clone(),
                entity.clone().with_owner(mutations.owner.clone()),
            );
        }
        for rel in &mutations.create_relations {
            self.relations.insert(rel.key().clone(), rel.clone());
        }
    }
}

/// Graph store held in memory.
///
/// With strict types enabled (the default), writes to kinds that were never
/// registered through [`ApplyGateway::ensure_types`] fail structurally.
#[derive(Default)]
pub struct InMemoryGateway {
    graph: RwLock<Graph>,
    strict_types: bool,
    injected_failures: Mutex<VecDeque<Error>>,
    apply_delay: Mutex<Option<Duration>>,
    apply_calls: Mutex<usize>,
    ensure_calls: Mutex<usize>,
}

impl InMemoryGateway {
    /// Create a gateway that requires types to be registered before use.
    pub fn new() -> Self {
        Self {
            strict_types: true,
            ..Self::default()
        }
    }

    /// Create a gateway that accepts any entity kind.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Create a new strict gateway wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Queue an error to be returned by an upcoming `apply`; queued errors are
    /// returned one per call, in order.
    pub async fn fail_next_apply(&self, error: Error) {
        self.injected_failures.lock().await.push_back(error);
    }

    /// Delay every subsequent `apply`; used to exercise tick timeouts.
    pub async fn set_apply_delay(&self, delay: Option<Duration>) {
        *self.apply_delay.lock().await = delay;
    }

    /// Forget a registered type, as if the store lost its schema.
    pub async fn drop_type(&self, kind: &str) {
        self.graph.write().await.types.remove(kind);
    }

    pub async fn entity(&self, key: &EntityKey) -> Option<Entity> {
        self.graph.read().await.entities.get(key).cloned()
    }

    pub async fn entities(&self) -> Vec<Entity> {
        self.graph.read().await.entities.values().cloned().collect()
    }

    pub async fn relations(&self) -> Vec<ResolvedRelation> {
        self.graph.read().await.relations.values().cloned().collect()
    }

    pub async fn has_type(&self, kind: &str) -> bool {
        self.graph.read().await.types.contains_key(kind)
    }

    pub async fn apply_calls(&self) -> usize {
        *self.apply_calls.lock().await
    }

    pub async fn ensure_calls(&self) -> usize {
        *self.ensure_calls.lock().await
    }

    /// Seed an entity directly, bypassing ownership checks.
    pub async fn seed(&self, entity: Entity) {
        self.graph
            .write()
            .await
            .entities
            .insert(entity.key().clone(), entity);
    }
}

#[async_trait]
impl ApplyGateway for InMemoryGateway {
    async fn apply(&self, mutations: &MutationSet) -> Result<()> {
        *self.apply_calls.lock().await += 1;

        let delay = *self.apply_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.injected_failures.lock().await.pop_front() {
            return Err(error);
        }

        let mut graph = self.graph.write().await;
        graph.check(mutations, self.strict_types)?;
        graph.commit(mutations);
        Ok(())
    }

    async fn query(&self, selector: &FieldSelector) -> Result<Vec<EntityKey>> {
        let graph = self.graph.read().await;
        Ok(graph
            .entities
            .values()
            .filter(|e| selector.matches(e))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn ensure_types(&self, types: &[EntityTypeDef]) -> Result<()> {
        *self.ensure_calls.lock().await += 1;
        let mut graph = self.graph.write().await;
        for def in types {
            graph.types.insert(def.kind.clone(), def.clone());
        }
        Ok(())
    }

    async fn owned_by(&self, owner: &InstanceId) -> Result<AppliedSnapshot> {
        let graph = self.graph.read().await;
        let entities = graph
            .entities
            .values()
            .filter(|e| e.owner() == Some(owner))
            .cloned();
        let relations = graph
            .relations
            .values()
            .filter(|r| r.owner() == owner)
            .map(|r| r.key().clone());
        Ok(AppliedSnapshot::from_parts(owner.clone(), entities, relations))
    }
}
