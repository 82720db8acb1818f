//! Scheduler Behavioral Tests - BDD Style
//!
//! Following BDD naming convention: given_<context>_when_<action>_then_<outcome>

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use graphsync_core::{
    Capability, Entity, EntityTypeDef, Error, InstanceId, ProviderDescriptor,
    ProviderInstanceConfig, ReportedState, Result, SchedulerSettings,
};
use graphsync_gateway::InMemoryGateway;
use graphsync_reconciler::{ReconcilePipeline, SharedOwnership};
use graphsync_registry::{
    Discovery, DiscoveryScope, PluginSource, Provider, RegistryBuilder, deprecation_notice,
};
use graphsync_scheduler::{DisableReason, Scheduler, SlotState};
use semver::Version;

// ============================================================================
// Test provider
// ============================================================================

/// Shared script: tests change what every provider built from it reports.
#[derive(Clone)]
struct Script {
    state: Arc<Mutex<Result<ReportedState>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl Script {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(Ok(ReportedState::new()))),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    fn report(&self, state: Result<ReportedState>) {
        if let Ok(mut slot) = self.state.lock() {
            *slot = state;
        }
    }

    fn slow(&self, delay: Duration) {
        if let Ok(mut slot) = self.delay.lock() {
            *slot = Some(delay);
        }
    }
}

struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    script: Script,
}

#[async_trait]
impl Discovery for ScriptedProvider {
    async fn discover(&self, _scope: &DiscoveryScope) -> Result<ReportedState> {
        let delay = self.script.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .state
            .lock()
            .map_err(|_| Error::transient_provider("scripted", "poisoned"))?
            .clone()
    }
}

impl Provider for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn entity_types(&self) -> Vec<EntityTypeDef> {
        vec![EntityTypeDef::new("Repo")]
    }

    fn discovery(&self) -> Option<&dyn Discovery> {
        Some(self)
    }
}

fn descriptor(name: &str) -> ProviderDescriptor {
    ProviderDescriptor::new(name, Version::new(1, 0, 0))
        .with_capability(Capability::Discovery)
        .with_entity_type("Repo")
}

fn source(scripts: &[(&str, Script, ProviderDescriptor)]) -> PluginSource {
    scripts
        .iter()
        .fold(PluginSource::new("tests"), |source, (_, script, descriptor)| {
            let script = script.clone();
            let built = descriptor.clone();
            source.with_provider(descriptor.clone(), move |_config| {
                Ok(Box::new(ScriptedProvider {
                    descriptor: built.clone(),
                    script: script.clone(),
                }) as Box<dyn Provider>)
            })
        })
}

fn framework() -> Version {
    Version::new(0, 1, 0)
}

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        tick_timeout_secs: 5,
        max_backoff_multiplier: 8,
        initial_delay_secs: 0,
        stagger_secs: 0,
    }
}

fn instance(name: &str, provider: &str) -> Result<ProviderInstanceConfig> {
    Ok(ProviderInstanceConfig::new(InstanceId::new(name)?, provider).with_every(10))
}

fn repo(name: &str) -> Result<Entity> {
    Entity::new("Repo", "default", name)
}

fn scheduler(
    providers: &[(&str, Script, ProviderDescriptor)],
) -> Result<(Arc<InMemoryGateway>, Scheduler)> {
    scheduler_with(providers, settings())
}

fn scheduler_with(
    providers: &[(&str, Script, ProviderDescriptor)],
    settings: SchedulerSettings,
) -> Result<(Arc<InMemoryGateway>, Scheduler)> {
    let registry = Arc::new(RegistryBuilder::new().source(source(providers)).build()?);
    let gateway = Arc::new(InMemoryGateway::new());
    let pipeline = ReconcilePipeline::new(gateway.clone(), SharedOwnership::new());
    Ok((gateway, Scheduler::new(registry, pipeline, settings, framework())))
}

// ============================================================================
// 1. BACKOFF
// ============================================================================

#[tokio::test(start_paused = true)]
async fn given_failing_instance_when_ticked_repeatedly_then_delay_doubles_to_cap_and_resets(
) -> Result<()> {
    // GIVEN: An instance whose provider keeps failing
    let script = Script::new();
    script.report(Err(Error::transient_provider("github", "rate limited")));
    let (_, mut scheduler) = scheduler(&[("github", script.clone(), descriptor("github"))])?;
    scheduler.add_instance(instance("github-a", "github")?)?;

    // WHEN: Five ticks fail in a row
    let mut delays = Vec::new();
    for _ in 0..5 {
        let result = scheduler.tick_now("github-a").await;
        assert!(result.as_ref().is_err_and(Error::is_transient));
        delays.push(scheduler.health("github-a")?.current_delay);
    }

    // THEN: The delay doubles until it reaches every × max multiplier
    assert_eq!(
        delays,
        [20, 40, 80, 80, 80].map(Duration::from_secs).to_vec()
    );
    let health = scheduler.health("github-a")?;
    assert_eq!(health.state, SlotState::Backoff);
    assert_eq!(health.consecutive_failures, 5);
    assert!(health.last_error.is_some());

    // WHEN: The provider recovers
    script.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let report = scheduler.tick_now("github-a").await?;

    // THEN: The failure count and delay reset
    assert_eq!(report.entities_created, 1);
    let health = scheduler.health("github-a")?;
    assert_eq!(health.state, SlotState::Idle);
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.current_delay, Duration::from_secs(10));
    assert!(health.last_error.is_none());
    assert!(health.last_success.is_some());
    Ok(())
}

// ============================================================================
// 2. FAILURE ISOLATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn given_one_failing_instance_when_scheduler_runs_then_sibling_keeps_its_cadence(
) -> Result<()> {
    // GIVEN: A healthy instance and a failing one on the same scheduler
    let healthy = Script::new();
    healthy.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let failing = Script::new();
    failing.report(Err(Error::transient_provider("gitlab", "unreachable")));
    let (gateway, mut scheduler) = scheduler(&[
        ("github", healthy, descriptor("github")),
        ("gitlab", failing, descriptor("gitlab")),
    ])?;
    scheduler.add_instance(instance("github-a", "github")?)?;
    scheduler.add_instance(instance("gitlab-b", "gitlab")?)?;

    // WHEN: The scheduler runs for 35 seconds
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(35)).await;

    // THEN: The healthy instance ticked every 10s, the failing one backed off
    let good = scheduler.health("github-a")?;
    let bad = scheduler.health("gitlab-b")?;
    assert!(good.total_ticks >= 4, "healthy ticks: {}", good.total_ticks);
    assert_eq!(good.consecutive_failures, 0);
    assert!(bad.consecutive_failures >= 1);
    assert!(bad.total_ticks < good.total_ticks);
    assert!(gateway.entity(repo("x")?.key()).await.is_some());

    scheduler.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn given_stagger_when_scheduler_starts_then_first_ticks_are_spread_out() -> Result<()> {
    // GIVEN: Three instances and a 5s stagger
    let stagger = SchedulerSettings {
        stagger_secs: 5,
        ..settings()
    };
    let (_, mut scheduler) =
        scheduler_with(&[("github", Script::new(), descriptor("github"))], stagger)?;
    for name in ["github-a", "github-b", "github-c"] {
        scheduler.add_instance(instance(name, "github")?)?;
    }

    // WHEN: The scheduler has run for 1s
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // THEN: Only the first instance has ticked
    let ticks = |scheduler: &Scheduler| -> Result<Vec<u64>> {
        ["github-a", "github-b", "github-c"]
            .iter()
            .map(|name| scheduler.health(name).map(|h| h.total_ticks))
            .collect()
    };
    assert_eq!(ticks(&scheduler)?, vec![1, 0, 0]);

    // WHEN: 5s more pass
    tokio::time::sleep(Duration::from_secs(5)).await;

    // THEN: The second has ticked, the third not yet
    assert_eq!(ticks(&scheduler)?, vec![1, 1, 0]);

    scheduler.shutdown().await;
    Ok(())
}

// ============================================================================
// 3. SKIP IF RUNNING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn given_tick_in_flight_when_forced_then_second_tick_is_skipped() -> Result<()> {
    // GIVEN: A started instance whose discovery takes 3 seconds
    let script = Script::new();
    script.slow(Duration::from_secs(3));
    let (_, mut scheduler) = scheduler(&[("github", script, descriptor("github"))])?;
    scheduler.add_instance(instance("github-a", "github")?.with_every(60))?;
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.health("github-a")?.state, SlotState::Running);

    // WHEN: An operator forces a tick and asks for a synchronous one
    scheduler.force_tick("github-a")?;
    let now = scheduler.tick_now("github-a").await;

    // THEN: The synchronous request is refused and no extra tick runs
    assert!(matches!(now, Err(Error::AlreadyRunning { .. })));
    tokio::time::sleep(Duration::from_secs(10)).await;
    let health = scheduler.health("github-a")?;
    assert_eq!(health.total_ticks, 1);
    assert_eq!(health.state, SlotState::Idle);

    scheduler.shutdown().await;
    Ok(())
}

// ============================================================================
// 4. TIMEOUT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn given_slow_apply_when_tick_exceeds_timeout_then_backoff_and_nothing_applied(
) -> Result<()> {
    // GIVEN: A gateway that takes longer than the 5s tick timeout
    let script = Script::new();
    script.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let (gateway, mut scheduler) = scheduler(&[("github", script, descriptor("github"))])?;
    scheduler.add_instance(instance("github-a", "github")?)?;
    gateway.set_apply_delay(Some(Duration::from_secs(30))).await;

    // WHEN: The tick runs
    let result = scheduler.tick_now("github-a").await;

    // THEN: It times out, backs off and leaves no trace
    assert!(matches!(result, Err(Error::Timeout { after_ms: 5000, .. })));
    let health = scheduler.health("github-a")?;
    assert_eq!(health.state, SlotState::Backoff);
    assert_eq!(health.consecutive_failures, 1);
    assert!(gateway.entities().await.is_empty());
    let instance_id = InstanceId::new("github-a")?;
    assert_eq!(
        scheduler.pipeline().ownership().lock().await.claims_of(&instance_id),
        0
    );

    // WHEN: The gateway speeds up again
    gateway.set_apply_delay(None).await;
    let report = scheduler.tick_now("github-a").await?;

    // THEN: The create is retried from the unchanged snapshot
    assert_eq!(report.entities_created, 1);
    Ok(())
}

// ============================================================================
// 5. OPERATOR STOP / START
// ============================================================================

#[tokio::test(start_paused = true)]
async fn given_stopped_instance_when_started_again_then_it_ticks() -> Result<()> {
    // GIVEN: An instance an operator stopped
    let script = Script::new();
    let (_, mut scheduler) = scheduler(&[("github", script, descriptor("github"))])?;
    scheduler.add_instance(instance("github-a", "github")?)?;
    scheduler.stop_instance("github-a").await?;

    // WHEN: A tick is requested
    let refused = scheduler.tick_now("github-a").await;

    // THEN: The instance is disabled
    assert!(matches!(refused, Err(Error::InstanceDisabled { .. })));
    let health = scheduler.health("github-a")?;
    assert_eq!(health.state, SlotState::Disabled);
    assert_eq!(health.disabled, Some(DisableReason::Operator));

    // WHEN: The operator starts it again
    scheduler.start_instance("github-a").await?;

    // THEN: It ticks normally
    scheduler.tick_now("github-a").await?;
    assert_eq!(scheduler.health("github-a")?.state, SlotState::Idle);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn given_tick_in_flight_when_stopped_then_tick_cancelled_and_nothing_applied(
) -> Result<()> {
    // GIVEN: A running instance in the middle of a slow discovery
    let script = Script::new();
    script.slow(Duration::from_secs(3));
    script.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let (gateway, mut scheduler) = scheduler(&[("github", script, descriptor("github"))])?;
    scheduler.add_instance(instance("github-a", "github")?)?;
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    // WHEN: The operator stops it
    scheduler.stop_instance("github-a").await?;
    tokio::time::sleep(Duration::from_secs(30)).await;

    // THEN: Nothing was applied and the instance stays disabled
    assert!(gateway.entities().await.is_empty());
    let health = scheduler.health("github-a")?;
    assert_eq!(health.disabled, Some(DisableReason::Operator));
    assert_eq!(health.total_ticks, 0);

    scheduler.shutdown().await;
    Ok(())
}

// ============================================================================
// 6. COMPATIBILITY
// ============================================================================

#[tokio::test]
async fn given_provider_for_newer_major_when_added_then_instance_disabled_for_good() -> Result<()>
{
    // GIVEN: A provider that needs framework 1.x on a 0.1 framework
    let script = Script::new();
    let newer = descriptor("future").with_min_framework_version(Version::new(1, 0, 0));
    let (_, mut scheduler) = scheduler(&[("future", script, newer)])?;

    // WHEN: An instance of it is added
    scheduler.add_instance(instance("future-a", "future")?)?;

    // THEN: It is disabled and cannot be re-enabled
    let health = scheduler.health("future-a")?;
    assert_eq!(health.state, SlotState::Disabled);
    assert!(matches!(health.disabled, Some(DisableReason::Incompatible(_))));
    assert!(matches!(
        scheduler.start_instance("future-a").await,
        Err(Error::InstanceDisabled { .. })
    ));
    assert!(scheduler.tick_now("future-a").await.is_err());
    Ok(())
}

#[tokio::test]
async fn given_incompatible_instance_when_stopped_then_start_still_refused() -> Result<()> {
    // GIVEN: An instance disabled because its provider needs framework 1.x
    let script = Script::new();
    script.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let newer = descriptor("future").with_min_framework_version(Version::new(1, 0, 0));
    let (gateway, mut scheduler) = scheduler(&[("future", script, newer)])?;
    scheduler.add_instance(instance("future-a", "future")?)?;

    // WHEN: An operator stops it and then starts it
    scheduler.stop_instance("future-a").await?;
    let started = scheduler.start_instance("future-a").await;

    // THEN: It keeps its incompatible reason and never ticks
    assert!(matches!(started, Err(Error::InstanceDisabled { .. })));
    let health = scheduler.health("future-a")?;
    assert!(matches!(health.disabled, Some(DisableReason::Incompatible(_))));
    assert!(matches!(
        scheduler.tick_now("future-a").await,
        Err(Error::InstanceDisabled { .. })
    ));
    assert_eq!(scheduler.health("future-a")?.total_ticks, 0);
    assert!(gateway.entities().await.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn given_running_incompatible_slot_when_stopped_then_start_still_refused() -> Result<()> {
    // GIVEN: A started scheduler holding an incompatible instance
    let script = Script::new();
    script.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let newer = descriptor("future").with_min_framework_version(Version::new(1, 0, 0));
    let (gateway, mut scheduler) = scheduler(&[("future", script, newer)])?;
    scheduler.add_instance(instance("future-a", "future")?)?;
    scheduler.start();

    // WHEN: An operator stops and starts it, then time passes
    scheduler.stop_instance("future-a").await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let started = scheduler.start_instance("future-a").await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    // THEN: The start is refused and nothing reached the graph
    assert!(matches!(started, Err(Error::InstanceDisabled { .. })));
    let health = scheduler.health("future-a")?;
    assert!(matches!(health.disabled, Some(DisableReason::Incompatible(_))));
    assert_eq!(health.total_ticks, 0);
    assert!(gateway.entities().await.is_empty());

    scheduler.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn given_newer_minor_requirement_when_added_then_instance_ticks() -> Result<()> {
    // GIVEN: A provider targeting framework 0.2 on a 0.1 framework
    let script = Script::new();
    script.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let newer = descriptor("github").with_min_framework_version(Version::new(0, 2, 0));
    let (gateway, mut scheduler) = scheduler(&[("github", script, newer)])?;

    // WHEN: An instance of it is added and ticked
    scheduler.add_instance(instance("github-a", "github")?)?;
    let report = scheduler.tick_now("github-a").await?;

    // THEN: The warning does not block scheduling
    assert_eq!(report.entities_created, 1);
    let health = scheduler.health("github-a")?;
    assert!(health.disabled.is_none());
    assert_eq!(health.state, SlotState::Idle);
    assert!(gateway.entity(repo("x")?.key()).await.is_some());
    Ok(())
}

#[tokio::test]
async fn given_deprecated_provider_when_ticked_then_still_applies() -> Result<()> {
    // GIVEN: A deprecated provider that names its replacement
    let script = Script::new();
    script.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let old = descriptor("legacy").deprecated(Some("github"), None);
    assert!(deprecation_notice(&old).is_some_and(|n| n.contains("'github'")));
    let (gateway, mut scheduler) = scheduler(&[("legacy", script.clone(), old)])?;
    scheduler.add_instance(instance("legacy-a", "legacy")?)?;

    // WHEN: It ticks twice
    let first = scheduler.tick_now("legacy-a").await?;
    script.report(Ok(ReportedState::new()
        .with_entity(repo("x")?)
        .with_entity(repo("y")?)));
    let second = scheduler.tick_now("legacy-a").await?;

    // THEN: Both ticks applied and the instance is healthy
    assert_eq!(first.entities_created, 1);
    assert_eq!(second.entities_created, 1);
    assert_eq!(gateway.entities().await.len(), 2);
    let health = scheduler.health("legacy-a")?;
    assert_eq!(health.total_ticks, 2);
    assert!(!health.is_degraded());
    Ok(())
}

#[tokio::test]
async fn given_unknown_provider_when_added_then_rejected() -> Result<()> {
    let (_, mut scheduler) = scheduler(&[("github", Script::new(), descriptor("github"))])?;

    let result = scheduler.add_instance(instance("nope-a", "nope")?);

    assert!(matches!(result, Err(Error::UnknownProvider { .. })));
    assert!(matches!(
        scheduler.health("nope-a"),
        Err(Error::UnknownInstance { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn given_duplicate_instance_name_when_added_then_rejected() -> Result<()> {
    let (_, mut scheduler) = scheduler(&[("github", Script::new(), descriptor("github"))])?;
    scheduler.add_instance(instance("github-a", "github")?)?;

    let result = scheduler.add_instance(instance("github-a", "github")?);

    assert!(matches!(result, Err(Error::Config { .. })));
    assert_eq!(scheduler.instances(), vec!["github-a".to_string()]);
    Ok(())
}

// ============================================================================
// 7. STRUCTURAL FAILURE RECOVERY
// ============================================================================

#[tokio::test]
async fn given_lost_type_when_tick_fails_structurally_then_next_tick_reregisters_types(
) -> Result<()> {
    // GIVEN: An instance whose first tick registered its types
    let script = Script::new();
    script.report(Ok(ReportedState::new().with_entity(repo("x")?)));
    let (gateway, mut scheduler) = scheduler(&[("github", script.clone(), descriptor("github"))])?;
    scheduler.add_instance(instance("github-a", "github")?)?;
    scheduler.tick_now("github-a").await?;
    assert_eq!(gateway.ensure_calls().await, 1);

    // WHEN: The store loses the type and the provider reports a new repo
    gateway.drop_type("Repo").await;
    script.report(Ok(ReportedState::new()
        .with_entity(repo("x")?)
        .with_entity(repo("y")?)));
    let failed = scheduler.tick_now("github-a").await;

    // THEN: The tick fails once without retrying inside the tick
    assert!(matches!(failed, Err(Error::StructuralApply { .. })));
    assert_eq!(gateway.ensure_calls().await, 1);

    // WHEN: The next tick runs
    let report = scheduler.tick_now("github-a").await?;

    // THEN: Types were registered again before applying
    assert_eq!(gateway.ensure_calls().await, 2);
    assert_eq!(report.entities_created, 1);
    Ok(())
}

// ============================================================================
// 8. RESTART RECOVERY
// ============================================================================

#[tokio::test]
async fn given_entities_owned_in_graph_when_instance_restarts_then_vanished_ones_deleted(
) -> Result<()> {
    // GIVEN: A graph holding x and y from a previous run of github-a, plus z
    // owned by another instance
    let owner = InstanceId::new("github-a")?;
    let other = InstanceId::new("gitlab-a")?;
    let script = Script::new();
    script.report(Ok(ReportedState::new().with_entity(repo("y")?)));
    let (gateway, mut scheduler) = scheduler(&[("github", script, descriptor("github"))])?;
    gateway.seed(repo("x")?.with_owner(owner.clone())).await;
    gateway.seed(repo("y")?.with_owner(owner.clone())).await;
    gateway.seed(repo("z")?.with_owner(other)).await;

    // WHEN: A fresh scheduler ticks github-a, which now reports only y
    scheduler.add_instance(instance("github-a", "github")?)?;
    let report = scheduler.tick_now("github-a").await?;

    // THEN: x is deleted, y is untouched and z is left alone
    assert_eq!(report.entities_created, 0);
    assert_eq!(report.entities_updated, 0);
    assert_eq!(report.entities_deleted, 1);
    assert!(gateway.entity(repo("x")?.key()).await.is_none());
    assert!(gateway.entity(repo("y")?.key()).await.is_some());
    assert!(gateway.entity(repo("z")?.key()).await.is_some());
    assert_eq!(scheduler.pipeline().ownership().lock().await.claims_of(&owner), 1);

    // WHEN: The next tick reports the same
    let again = scheduler.tick_now("github-a").await?;

    // THEN: Nothing changes
    assert_eq!(again.entities_deleted, 0);
    assert_eq!(again.entities_created, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn given_started_scheduler_when_shutdown_then_all_slots_exit() -> Result<()> {
    let (_, mut scheduler) = scheduler(&[("github", Script::new(), descriptor("github"))])?;
    scheduler.add_instance(instance("github-a", "github")?)?;
    scheduler.add_instance(instance("github-b", "github")?)?;
    scheduler.start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let names = scheduler.instances();
    let health = scheduler.health_all();
    scheduler.shutdown().await;

    assert_eq!(names, vec!["github-a".to_string(), "github-b".to_string()]);
    assert_eq!(health.len(), 2);
    assert!(health.iter().all(|h| h.total_ticks == 1));
    Ok(())
}
