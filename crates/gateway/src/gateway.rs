//! The apply gateway contract and a tracing decorator.

use async_trait::async_trait;
use graphsync_core::{
    AppliedSnapshot, EntityKey, EntityTypeDef, FieldSelector, InstanceId, MutationSet, Result,
};

/// Sink that commits mutation sets to the graph store and answers
/// selector queries against committed state.
#[async_trait]
pub trait ApplyGateway: Send + Sync {
    /// Apply a mutation set atomically: either every mutation lands or none.
    ///
    /// A write to an entity kind the store does not know must fail with
    /// [`graphsync_core::Error::StructuralApply`].
    async fn apply(&self, mutations: &MutationSet) -> Result<()>;

    /// Keys of committed entities matching `selector`, in key order.
    async fn query(&self, selector: &FieldSelector) -> Result<Vec<EntityKey>>;

    /// Register (or re-register) entity type definitions. Idempotent.
    async fn ensure_types(&self, types: &[EntityTypeDef]) -> Result<()>;

    /// Everything committed under `owner`, as a snapshot. Rebuilds an
    /// instance's applied state after a restart.
    async fn owned_by(&self, owner: &InstanceId) -> Result<AppliedSnapshot>;
}

#[async_trait]
impl<G: ApplyGateway + ?Sized> ApplyGateway for std::sync::Arc<G> {
    async fn apply(&self, mutations: &MutationSet) -> Result<()> {
        (**self).apply(mutations).await
    }

    async fn query(&self, selector: &FieldSelector) -> Result<Vec<EntityKey>> {
        (**self).query(selector).await
    }

    async fn ensure_types(&self, types: &[EntityTypeDef]) -> Result<()> {
        (**self).ensure_types(types).await
    }

    async fn owned_by(&self, owner: &InstanceId) -> Result<AppliedSnapshot> {
        (**self).owned_by(owner).await
    }
}

/// A wrapper that adds tracing to a gateway.
pub struct TracingGateway<G: ApplyGateway> {
    inner: G,
}

impl<G: ApplyGateway> TracingGateway<G> {
    /// Create a new tracing gateway.
    pub const fn new(inner: G) -> Self {
        Self { inner }
    }

    pub const fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: ApplyGateway> ApplyGateway for TracingGateway<G> {
    async fn apply(&self, mutations: &MutationSet) -> Result<()> {
        tracing::debug!(
            owner = %mutations.owner,
            create_entities = mutations.create_entities.len(),
            update_entities = mutations.update_entities.len(),
            delete_entities = mutations.delete_entities.len(),
            create_relations = mutations.create_relations.len(),
            delete_relations = mutations.delete_relations.len(),
            kinds = ?mutations.written_kinds(),
            "Applying mutation set"
        );
        let result = self.inner.apply(mutations).await;
        match &result {
            Ok(()) => tracing::trace!(owner = %mutations.owner, "Mutation set applied"),
            Err(e) => tracing::debug!(owner = %mutations.owner, error = %e, "Apply rejected"),
        }
        result
    }

    async fn query(&self, selector: &FieldSelector) -> Result<Vec<EntityKey>> {
        tracing::debug!(selector = %selector, "Querying entities");
        let result = self.inner.query(selector).await;
        if let Ok(keys) = &result {
            tracing::trace!(selector = %selector, matches = keys.len(), "Query answered");
        }
        result
    }

    async fn ensure_types(&self, types: &[EntityTypeDef]) -> Result<()> {
        tracing::debug!(count = types.len(), "Registering entity types");
        self.inner.ensure_types(types).await
    }

    async fn owned_by(&self, owner: &InstanceId) -> Result<AppliedSnapshot> {
        let result = self.inner.owned_by(owner).await;
        if let Ok(snapshot) = &result {
            tracing::debug!(
                owner = %owner,
                entities = snapshot.entities().len(),
                relations = snapshot.relations().len(),
                "Read owned state"
            );
        }
        result
    }
}
