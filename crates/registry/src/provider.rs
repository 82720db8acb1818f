//! The provider contract.
//!
//! A provider exposes its optional behaviours as separate interfaces; the
//! core asks for each one and treats `None` as "not supported" instead of
//! probing for methods.

use async_trait::async_trait;
use futures::stream::BoxStream;
use graphsync_core::{
    EntityTypeDef, InstanceId, ProviderDescriptor, RelationTypeDecl, ReportedState, Result, TickId,
};

/// What a single discovery call is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryScope {
    pub instance: InstanceId,
    pub namespace: String,
    pub tick: TickId,
}

impl DiscoveryScope {
    pub fn new(instance: InstanceId, namespace: impl Into<String>) -> Self {
        Self {
            instance,
            namespace: namespace.into(),
            tick: TickId::new(),
        }
    }
}

/// One-shot discovery: everything the provider sees, in a single state.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn discover(&self, scope: &DiscoveryScope) -> Result<ReportedState>;
}

/// Providers implementing this may report relations alongside entities.
pub trait RelationProducing: Send + Sync {
    /// Relation types this provider emits, with their multiplicity.
    fn relation_types(&self) -> Vec<RelationTypeDecl>;
}

/// Discovery as a finite stream of batches, consumed with backpressure.
/// The batches of one tick together form its reported state.
pub trait Incremental: Send + Sync {
    fn discover_batches<'a>(
        &'a self,
        scope: &'a DiscoveryScope,
    ) -> BoxStream<'a, Result<ReportedState>>;
}

/// A constructed provider, bound to one instance config.
pub trait Provider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Schemas to register with the graph before the first write.
    fn entity_types(&self) -> Vec<EntityTypeDef>;

    fn discovery(&self) -> Option<&dyn Discovery> {
        None
    }

    fn relations(&self) -> Option<&dyn RelationProducing> {
        None
    }

    fn incremental(&self) -> Option<&dyn Incremental> {
        None
    }
}
