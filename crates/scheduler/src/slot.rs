//! One execution slot per provider instance.
//!
//! A slot owns its snapshot, its lazily built provider and its timer. Ticks
//! within a slot are strictly sequential; commands that arrive while a tick
//! is running are answered without queueing another tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use graphsync_core::{
    AppliedSnapshot, Error, ProviderInstanceConfig, Result, SchedulerSettings,
};
use graphsync_reconciler::{ReconcilePipeline, TickOutcome, TickReport};
use graphsync_registry::{DiscoveryScope, Provider, ProviderFactory, deprecation_notice};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backoff::calculate_backoff;
use crate::health::{DisableReason, InstanceHealth, SlotState};

/// Messages from the scheduler to a running slot.
#[derive(Debug)]
pub enum SlotCommand {
    /// Tick as soon as possible; skipped if a tick is running.
    ForceTick,
    /// Tick and report the outcome.
    TickNow(oneshot::Sender<Result<TickReport>>),
    /// Re-enable after an operator stop.
    Start,
    /// Cancel any in-flight tick and disable.
    Stop,
}

/// Everything one tick needs, detached from the slot so the slot can keep
/// answering commands while the tick runs.
struct TickJob {
    pipeline: ReconcilePipeline,
    provider: Arc<dyn Provider>,
    scope: DiscoveryScope,
    snapshot: AppliedSnapshot,
    register_types: bool,
    recover: bool,
}

impl TickJob {
    async fn execute(self) -> Result<TickOutcome> {
        if self.register_types {
            self.pipeline.register_types(self.provider.as_ref()).await?;
        }
        let snapshot = if self.recover {
            self.pipeline.recover(&self.scope.instance).await?
        } else {
            self.snapshot
        };
        self.pipeline
            .run_tick(self.provider.as_ref(), &self.scope, &snapshot)
            .await
    }
}

/// How the run loop should continue after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct InstanceSlot {
    config: ProviderInstanceConfig,
    factory: ProviderFactory,
    pipeline: ReconcilePipeline,
    settings: SchedulerSettings,
    provider: Option<Arc<dyn Provider>>,
    snapshot: AppliedSnapshot,
    /// False until a tick has succeeded on top of the state recovered
    /// from the graph.
    recovered: bool,
    types_stale: bool,
    first_delay: Duration,
    health: watch::Sender<InstanceHealth>,
}

impl InstanceSlot {
    pub fn new(
        config: ProviderInstanceConfig,
        factory: ProviderFactory,
        pipeline: ReconcilePipeline,
        settings: SchedulerSettings,
    ) -> (Self, watch::Receiver<InstanceHealth>) {
        let health = InstanceHealth::new(
            config.name.clone(),
            factory.descriptor().name.clone(),
            config.interval(),
        );
        let (tx, rx) = watch::channel(health);
        let slot = Self {
            snapshot: AppliedSnapshot::empty(config.name.clone()),
            config,
            factory,
            pipeline,
            settings,
            provider: None,
            recovered: false,
            types_stale: true,
            first_delay: Duration::ZERO,
            health: tx,
        };
        (slot, rx)
    }

    /// Wait `delay` before the first scheduled tick.
    #[must_use]
    pub fn with_first_delay(mut self, delay: Duration) -> Self {
        self.first_delay = delay;
        self
    }

    pub const fn config(&self) -> &ProviderInstanceConfig {
        &self.config
    }

    pub const fn snapshot(&self) -> &AppliedSnapshot {
        &self.snapshot
    }

    fn update_health(&self, f: impl FnOnce(&mut InstanceHealth)) {
        self.health.send_modify(f);
    }

    fn disabled_reason(&self) -> Option<DisableReason> {
        self.health.borrow().disabled.clone()
    }

    fn is_enabled(&self) -> bool {
        self.disabled_reason().is_none()
    }

    /// Disable the slot. An incompatible provider keeps that reason, so a
    /// later operator stop cannot turn it into something `enable` undoes.
    pub fn disable(&self, reason: DisableReason) {
        if let Some(DisableReason::Incompatible(_)) = self.disabled_reason() {
            debug!(instance = %self.config.name, "Instance already disabled as incompatible");
            return;
        }
        info!(instance = %self.config.name, reason = ?reason, "Instance disabled");
        self.update_health(|h| {
            h.state = SlotState::Disabled;
            h.disabled = Some(reason);
        });
    }

    /// Re-enable after an operator stop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstanceDisabled`] for an incompatible provider.
    pub fn enable(&self) -> Result<()> {
        match self.disabled_reason() {
            Some(DisableReason::Incompatible(_)) => Err(Error::InstanceDisabled {
                instance: self.config.name.to_string(),
            }),
            Some(DisableReason::Operator) => {
                info!(instance = %self.config.name, "Instance re-enabled");
                self.update_health(|h| {
                    h.state = SlotState::Idle;
                    h.disabled = None;
                });
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn provider(&mut self) -> Result<Arc<dyn Provider>> {
        if let Some(provider) = &self.provider {
            return Ok(Arc::clone(provider));
        }
        let provider: Arc<dyn Provider> = Arc::from(self.factory.instantiate(&self.config)?);
        self.provider = Some(Arc::clone(&provider));
        Ok(provider)
    }

    fn prepare(&mut self) -> Result<TickJob> {
        let provider = self.provider()?;
        if let Some(notice) = deprecation_notice(provider.descriptor()) {
            warn!(instance = %self.config.name, "{notice}");
        }
        let scope = DiscoveryScope::new(self.config.name.clone(), self.config.namespace.clone());
        if self.types_stale {
            debug!(instance = %self.config.name, "Entity type definitions will be registered");
        }
        Ok(TickJob {
            pipeline: self.pipeline.clone(),
            provider,
            scope,
            snapshot: self.snapshot.clone(),
            register_types: self.types_stale,
            recover: !self.recovered,
        })
    }

    fn timeout_error(&self) -> Error {
        Error::Timeout {
            instance: self.config.name.to_string(),
            after_ms: u64::try_from(self.settings.tick_timeout().as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn cancelled_error(&self) -> Error {
        Error::Cancelled {
            instance: self.config.name.to_string(),
        }
    }

    /// Record a finished tick and return the delay until the next one.
    async fn finish(&mut self, result: &Result<TickOutcome>) -> Duration {
        let interval = self.config.interval();
        match result {
            Ok(outcome) => {
                self.snapshot = outcome.snapshot.clone();
                self.recovered = true;
                self.types_stale = false;
                let report = outcome.report.clone();
                self.update_health(|h| {
                    h.state = SlotState::Idle;
                    h.last_error = None;
                    h.consecutive_failures = 0;
                    h.current_delay = interval;
                    h.total_ticks += 1;
                    h.last_success = Some(Utc::now());
                    h.last_report = Some(report);
                });
                interval
            }
            Err(e) => {
                self.pipeline.release(&self.config.name, &self.snapshot).await;
                if matches!(e, Error::StructuralApply { .. }) {
                    self.types_stale = true;
                }
                if e.is_fatal() {
                    error!(
                        instance = %self.config.name,
                        error = %e,
                        "Fatal error; disabling instance"
                    );
                    let message = e.to_string();
                    self.update_health(|h| {
                        h.total_ticks += 1;
                        h.last_error = Some(message.clone());
                        h.state = SlotState::Disabled;
                        h.disabled = Some(DisableReason::Incompatible(message));
                    });
                    return interval;
                }

                let failures = self.health.borrow().consecutive_failures.saturating_add(1);
                let delay =
                    calculate_backoff(failures, interval, self.settings.max_backoff_multiplier);
                warn!(
                    instance = %self.config.name,
                    error = %e,
                    kind = e.kind(),
                    failures,
                    delay_secs = delay.as_secs(),
                    "Tick failed; backing off"
                );
                let message = e.to_string();
                self.update_health(|h| {
                    h.state = SlotState::Backoff;
                    h.total_ticks += 1;
                    h.last_error = Some(message);
                    h.consecutive_failures = failures;
                    h.current_delay = delay;
                });
                delay
            }
        }
    }

    /// Run one tick to completion in the caller's task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InstanceDisabled`] for a disabled instance, otherwise
    /// whatever failed the tick.
    pub async fn tick_inline(&mut self) -> Result<TickReport> {
        if !self.is_enabled() {
            return Err(Error::InstanceDisabled {
                instance: self.config.name.to_string(),
            });
        }
        let result = match self.prepare() {
            Ok(job) => {
                self.update_health(|h| h.state = SlotState::Running);
                tokio::time::timeout(self.settings.tick_timeout(), job.execute())
                    .await
                    .unwrap_or_else(|_| Err(self.timeout_error()))
            }
            Err(e) => Err(e),
        };
        self.finish(&result).await;
        result.map(|outcome| outcome.report)
    }

    /// Run one tick while still serving commands and shutdown.
    async fn drive_tick(
        &mut self,
        commands: &mut mpsc::Receiver<SlotCommand>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (Result<TickReport>, Duration, Flow) {
        let job = match self.prepare() {
            Ok(job) => job,
            Err(e) => {
                let result = Err(e);
                let delay = self.finish(&result).await;
                return (result.map(|o: TickOutcome| o.report), delay, Flow::Continue);
            }
        };

        self.update_health(|h| h.state = SlotState::Running);
        let tick = tokio::time::timeout(self.settings.tick_timeout(), job.execute());
        tokio::pin!(tick);

        let mut flow = Flow::Continue;
        let mut stop_requested = false;
        let result = loop {
            tokio::select! {
                res = &mut tick => {
                    break res.unwrap_or_else(|_| Err(self.timeout_error()));
                }
                cmd = commands.recv() => match cmd {
                    Some(SlotCommand::ForceTick) => {
                        info!(
                            instance = %self.config.name,
                            "Tick already running; skipping forced tick"
                        );
                    }
                    Some(SlotCommand::TickNow(reply)) => {
                        let _ = reply.send(Err(Error::AlreadyRunning {
                            instance: self.config.name.to_string(),
                        }));
                    }
                    Some(SlotCommand::Start) => {}
                    Some(SlotCommand::Stop) => {
                        stop_requested = true;
                        break Err(self.cancelled_error());
                    }
                    None => {
                        flow = Flow::Exit;
                        break Err(self.cancelled_error());
                    }
                },
                _ = shutdown.changed() => {
                    flow = Flow::Exit;
                    break Err(self.cancelled_error());
                }
            }
        };

        let delay = if matches!(result, Err(Error::Cancelled { .. })) {
            info!(instance = %self.config.name, "In-flight tick cancelled");
            self.pipeline.release(&self.config.name, &self.snapshot).await;
            self.update_health(|h| h.state = SlotState::Idle);
            if stop_requested {
                self.disable(DisableReason::Operator);
            }
            self.config.interval()
        } else {
            self.finish(&result).await
        };

        (result.map(|o| o.report), delay, flow)
    }

    /// The slot's event loop. Runs until shutdown or until the scheduler
    /// drops its command sender.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SlotCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            instance = %self.config.name,
            provider = %self.factory.descriptor().name,
            every_secs = self.config.every,
            "Starting instance slot"
        );
        let mut next_at = Instant::now() + self.first_delay;

        loop {
            let enabled = self.is_enabled();
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                cmd = commands.recv() => match cmd {
                    None => break,
                    Some(SlotCommand::ForceTick) if enabled => {
                        let (_, delay, flow) = self.drive_tick(&mut commands, &mut shutdown).await;
                        next_at = Instant::now() + delay;
                        if flow == Flow::Exit {
                            break;
                        }
                    }
                    Some(SlotCommand::TickNow(reply)) if enabled => {
                        let (result, delay, flow) =
                            self.drive_tick(&mut commands, &mut shutdown).await;
                        let _ = reply.send(result);
                        next_at = Instant::now() + delay;
                        if flow == Flow::Exit {
                            break;
                        }
                    }
                    Some(SlotCommand::ForceTick) => {
                        debug!(
                            instance = %self.config.name,
                            "Instance disabled; ignoring forced tick"
                        );
                    }
                    Some(SlotCommand::TickNow(reply)) => {
                        let _ = reply.send(Err(Error::InstanceDisabled {
                            instance: self.config.name.to_string(),
                        }));
                    }
                    Some(SlotCommand::Start) => {
                        if self.enable().is_ok() {
                            next_at = Instant::now();
                        }
                    }
                    Some(SlotCommand::Stop) => self.disable(DisableReason::Operator),
                },
                () = tokio::time::sleep_until(next_at), if enabled => {
                    let (_, delay, flow) = self.drive_tick(&mut commands, &mut shutdown).await;
                    next_at = Instant::now() + delay;
                    if flow == Flow::Exit {
                        break;
                    }
                }
            }
        }

        info!(instance = %self.config.name, "Instance slot stopped");
    }
}
