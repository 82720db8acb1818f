//! Deferred relation resolution.
//!
//! Selectors are evaluated against committed graph state overlaid with the
//! entities the current tick is about to apply, so a relation may point at
//! an entity created in the same mutation set. Nothing is cached between
//! ticks.

use graphsync_core::{
    AppliedSnapshot, Endpoint, Entity, EntityKey, FieldSelector, ProviderDescriptor, Relation,
    RelationKey, RelationMultiplicity, Result,
};
use graphsync_gateway::ApplyGateway;
use itertools::Itertools;
use tracing::debug;

use crate::types::ResolvedState;

/// What a resolution reads besides the gateway.
pub struct ReadContext<'a> {
    /// Entities reported this tick.
    pub pending: &'a [Entity],
    /// The instance's current snapshot; its entities are superseded by `pending`.
    pub snapshot: &'a AppliedSnapshot,
}

/// Resolves field selectors through an [`ApplyGateway`].
pub struct RelationResolver<'a> {
    gateway: &'a dyn ApplyGateway,
}

impl<'a> RelationResolver<'a> {
    pub fn new(gateway: &'a dyn ApplyGateway) -> Self {
        Self { gateway }
    }

    /// All entity keys matching `selector`, sorted.
    ///
    /// Committed entities owned by this instance are replaced by the
    /// pending versions: one the tick is deleting no longer matches, and
    /// one it is changing matches on its new properties.
    ///
    /// # Errors
    ///
    /// Propagates gateway query failures.
    pub async fn resolve(
        &self,
        selector: &FieldSelector,
        ctx: &ReadContext<'_>,
    ) -> Result<Vec<EntityKey>> {
        let committed = self.gateway.query(selector).await?;
        let pending = ctx
            .pending
            .iter()
            .filter(|e| selector.matches(e))
            .map(|e| e.key().clone());

        Ok(committed
            .into_iter()
            .filter(|k| !ctx.snapshot.entities().contains_key(k))
            .chain(pending)
            .sorted()
            .dedup()
            .collect())
    }

    async fn endpoint(
        &self,
        endpoint: &Endpoint,
        multiplicity: RelationMultiplicity,
        ctx: &ReadContext<'_>,
        misses: &mut Vec<String>,
    ) -> Result<Vec<EntityKey>> {
        match endpoint {
            Endpoint::Concrete(key) => Ok(vec![key.clone()]),
            Endpoint::Deferred(selector) => {
                let matches = self.resolve(selector, ctx).await?;
                if matches.is_empty() {
                    debug!(selector = %selector, "Selector matched nothing");
                    misses.push(selector.to_string());
                }
                Ok(match multiplicity {
                    RelationMultiplicity::FanOut => matches,
                    RelationMultiplicity::FirstMatch => matches.into_iter().take(1).collect(),
                })
            }
        }
    }

    /// Turn reported relations into concrete relation keys.
    ///
    /// A relation with an endpoint that matches nothing is omitted for this
    /// tick and recorded as a miss. Multiple matches on both sides yield
    /// every source/target pair, subject to the declared multiplicity.
    ///
    /// # Errors
    ///
    /// Propagates gateway query failures; a failed tick applies nothing.
    pub async fn resolve_relations(
        &self,
        entities: Vec<Entity>,
        relations: &[Relation],
        descriptor: &ProviderDescriptor,
        snapshot: &AppliedSnapshot,
    ) -> Result<ResolvedState> {
        let ctx = ReadContext {
            pending: &entities,
            snapshot,
        };
        let mut misses = Vec::new();
        let mut keys = Vec::new();

        for relation in relations {
            let multiplicity = descriptor.multiplicity(&relation.relation);
            let sources = self
                .endpoint(&relation.source, multiplicity, &ctx, &mut misses)
                .await?;
            let targets = self
                .endpoint(&relation.target, multiplicity, &ctx, &mut misses)
                .await?;

            keys.extend(
                sources
                    .iter()
                    .cartesian_product(targets.iter())
                    .map(|(source, target)| RelationKey {
                        relation: relation.relation.clone(),
                        namespace: relation.namespace.clone(),
                        source: source.clone(),
                        target: target.clone(),
                    }),
            );
        }

        let relations = keys.into_iter().sorted().dedup().collect();
        Ok(ResolvedState {
            entities,
            relations,
            misses,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use graphsync_core::{InstanceId, MutationSet, RelationTypeDecl};
    use graphsync_gateway::InMemoryGateway;
    use semver::Version;

    use super::*;

    fn owner(name: &str) -> InstanceId {
        InstanceId::new(name).unwrap()
    }

    fn team(name: &str, slug: &str) -> Entity {
        Entity::new("Team", "default", name)
            .unwrap()
            .with_property("slug", slug)
    }

    fn repo(name: &str) -> Entity {
        Entity::new("Repo", "default", name).unwrap()
    }

    async fn gateway_with(owner_name: &str, entities: Vec<Entity>) -> InMemoryGateway {
        let gateway = InMemoryGateway::permissive();
        let mut set = MutationSet::empty(owner(owner_name));
        set.create_entities = entities;
        gateway.apply(&set).await.unwrap();
        gateway
    }

    fn owns(selector: FieldSelector, target: &Entity) -> Relation {
        Relation::new("OWNS", "default", selector, target.key().clone()).unwrap()
    }

    fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new("test", Version::new(1, 0, 0))
    }

    #[tokio::test]
    async fn test_single_match_resolves_to_one_relation() {
        let gateway = gateway_with("ldap", vec![team("platform", "plat")]).await;
        let resolver = RelationResolver::new(&gateway);
        let snapshot = AppliedSnapshot::empty(owner("github"));
        let relation = owns(FieldSelector::property("slug", "plat").with_kind("Team"), &repo("x"));

        let resolved = resolver
            .resolve_relations(vec![repo("x")], &[relation], &descriptor(), &snapshot)
            .await
            .unwrap();

        assert_eq!(resolved.relations.len(), 1);
        assert_eq!(resolved.relations.first().unwrap().source.name, "platform");
        assert!(resolved.misses.is_empty());
    }

    #[tokio::test]
    async fn test_zero_matches_omits_relation() {
        let gateway = gateway_with("ldap", vec![]).await;
        let resolver = RelationResolver::new(&gateway);
        let snapshot = AppliedSnapshot::empty(owner("github"));
        let relation = owns(FieldSelector::property("slug", "ghost").with_kind("Team"), &repo("x"));

        let resolved = resolver
            .resolve_relations(vec![repo("x")], &[relation], &descriptor(), &snapshot)
            .await
            .unwrap();

        assert!(resolved.relations.is_empty());
        assert_eq!(resolved.misses.len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_and_first_match() {
        let gateway = gateway_with("ldap", vec![team("b", "core"), team("a", "core")]).await;
        let resolver = RelationResolver::new(&gateway);
        let snapshot = AppliedSnapshot::empty(owner("github"));
        let relation = owns(FieldSelector::property("slug", "core").with_kind("Team"), &repo("x"));

        let fan_out = resolver
            .resolve_relations(vec![], std::slice::from_ref(&relation), &descriptor(), &snapshot)
            .await
            .unwrap();
        assert_eq!(fan_out.relations.len(), 2);

        let first_only = descriptor().with_relation_type(
            RelationTypeDecl::new("OWNS").with_multiplicity(RelationMultiplicity::FirstMatch),
        );
        let first = resolver
            .resolve_relations(vec![], &[relation], &first_only, &snapshot)
            .await
            .unwrap();
        assert_eq!(first.relations.len(), 1);
        assert_eq!(first.relations.first().unwrap().source.name, "a");
    }

    #[tokio::test]
    async fn test_sees_entities_from_same_tick() {
        let gateway = gateway_with("other", vec![]).await;
        let resolver = RelationResolver::new(&gateway);
        let snapshot = AppliedSnapshot::empty(owner("github"));
        let relation = owns(FieldSelector::property("slug", "new").with_kind("Team"), &repo("x"));

        let resolved = resolver
            .resolve_relations(
                vec![repo("x"), team("fresh", "new")],
                &[relation],
                &descriptor(),
                &snapshot,
            )
            .await
            .unwrap();
        assert_eq!(resolved.relations.len(), 1);
    }

    #[tokio::test]
    async fn test_own_entity_being_deleted_no_longer_matches() {
        let gateway = gateway_with("github", vec![team("old", "gone")]).await;
        let resolver = RelationResolver::new(&gateway);
        let snapshot = AppliedSnapshot::from_parts(owner("github"), [team("old", "gone")], []);
        let selector = FieldSelector::property("slug", "gone");

        let ctx = ReadContext {
            pending: &[],
            snapshot: &snapshot,
        };
        assert!(resolver.resolve(&selector, &ctx).await.unwrap().is_empty());
    }
}
