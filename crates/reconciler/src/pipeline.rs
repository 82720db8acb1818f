//! One tick of the reconciliation pipeline:
//! discover, resolve, reconcile, apply, advance.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use graphsync_core::{AppliedSnapshot, Error, InstanceId, ReportedState, Result};
use graphsync_gateway::ApplyGateway;
use graphsync_registry::{DiscoveryScope, Provider};
use tracing::{debug, info, warn};

use crate::ownership::SharedOwnership;
use crate::reconciler::{claimed_identities, reconcile};
use crate::resolver::RelationResolver;
use crate::types::TickReport;

/// Result of a successful tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub snapshot: AppliedSnapshot,
    pub report: TickReport,
}

/// Runs ticks against a gateway, sharing one ownership index across
/// every instance.
#[derive(Clone)]
pub struct ReconcilePipeline {
    gateway: Arc<dyn ApplyGateway>,
    ownership: SharedOwnership,
}

impl ReconcilePipeline {
    pub fn new(gateway: Arc<dyn ApplyGateway>, ownership: SharedOwnership) -> Self {
        Self { gateway, ownership }
    }

    pub fn ownership(&self) -> &SharedOwnership {
        &self.ownership
    }

    pub fn gateway(&self) -> &Arc<dyn ApplyGateway> {
        &self.gateway
    }

    /// Register the provider's entity types with the graph.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn register_types(&self, provider: &dyn Provider) -> Result<()> {
        let types = provider.entity_types();
        debug!(
            provider = %provider.descriptor().name,
            count = types.len(),
            "Ensuring entity types"
        );
        self.gateway.ensure_types(&types).await
    }

    /// Rebuild an instance's snapshot from what the graph holds under its
    /// name and claim those identities.
    ///
    /// # Errors
    ///
    /// Propagates gateway failures.
    pub async fn recover(&self, instance: &InstanceId) -> Result<AppliedSnapshot> {
        let snapshot = self.gateway.owned_by(instance).await?;
        self.ownership.commit(instance, &snapshot).await;
        info!(
            instance = %instance,
            entities = snapshot.entities().len(),
            relations = snapshot.relations().len(),
            "Recovered applied state from the graph"
        );
        Ok(snapshot)
    }

    /// Release any ownership reservations a failed or abandoned tick left
    /// behind.
    pub async fn release(&self, instance: &InstanceId, snapshot: &AppliedSnapshot) {
        self.ownership.restore(instance, snapshot).await;
    }

    /// Run one tick for one instance.
    ///
    /// On success the returned snapshot replaces the caller's. On any error
    /// nothing has been applied, `snapshot` remains the truth and the
    /// instance's ownership claims are restored to match it.
    ///
    /// # Errors
    ///
    /// Returns the first failure from discovery, resolution or apply.
    pub async fn run_tick(
        &self,
        provider: &dyn Provider,
        scope: &DiscoveryScope,
        snapshot: &AppliedSnapshot,
    ) -> Result<TickOutcome> {
        let instance = &scope.instance;
        let descriptor = provider.descriptor();
        let mut report = TickReport::new(scope.tick, instance.clone());

        let mut reported = discover(provider, scope).await?;

        if provider.relations().is_none() && !reported.relations.is_empty() {
            warn!(
                instance = %instance,
                provider = %descriptor.name,
                dropped = reported.relations.len(),
                "Provider does not produce relations; dropping reported relations"
            );
            report.dropped_relations = reported.relations.len();
            reported.relations.clear();
        }

        let resolver = RelationResolver::new(self.gateway.as_ref());
        let resolved = resolver
            .resolve_relations(reported.entities, &reported.relations, descriptor, snapshot)
            .await?;
        report.resolution_misses = resolved.misses.len();

        let outcome = {
            let mut index = self.ownership.lock().await;
            let outcome = reconcile(instance, &resolved, snapshot, &index);
            index.reserve(instance, &claimed_identities(&outcome.mutations));
            outcome
        };
        let report = report.with_outcome(&outcome);

        if !outcome.mutations.is_empty() {
            if let Err(e) = self.gateway.apply(&outcome.mutations).await {
                self.release(instance, snapshot).await;
                return Err(e);
            }
        }

        let next = snapshot.advance(&outcome.mutations, Utc::now());
        self.ownership.commit(instance, &next).await;

        info!(
            instance = %instance,
            tick = %scope.tick,
            created = report.entities_created,
            updated = report.entities_updated,
            deleted = report.entities_deleted,
            relations_created = report.relations_created,
            relations_deleted = report.relations_deleted,
            misses = report.resolution_misses,
            conflicts = report.conflicts,
            "Tick applied"
        );

        Ok(TickOutcome {
            snapshot: next,
            report,
        })
    }
}

/// Collect the provider's reported state for this tick. Incremental
/// providers are drained batch by batch; any failed batch fails the tick.
async fn discover(provider: &dyn Provider, scope: &DiscoveryScope) -> Result<ReportedState> {
    if let Some(incremental) = provider.incremental() {
        let mut batches = incremental.discover_batches(scope);
        let mut state = ReportedState::new();
        let mut count = 0_usize;
        while let Some(batch) = batches.next().await {
            state.extend(batch?);
            count += 1;
        }
        debug!(instance = %scope.instance, batches = count, "Incremental discovery finished");
        return Ok(state);
    }

    if let Some(discovery) = provider.discovery() {
        return discovery.discover(scope).await;
    }

    Err(Error::MissingCapability {
        provider: provider.descriptor().name.clone(),
        capability: "discovery".to_string(),
    })
}
