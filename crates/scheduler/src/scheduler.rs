//! The scheduler: owns one slot per instance and the operator surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use graphsync_core::{
    Error, GraphsyncConfig, ProviderInstanceConfig, Result, SchedulerSettings,
};
use graphsync_gateway::ApplyGateway;
use graphsync_reconciler::{ReconcilePipeline, SharedOwnership, TickReport};
use graphsync_registry::{Compatibility, Registry, check_compatibility};
use semver::Version;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::health::{DisableReason, InstanceHealth};
use crate::slot::{InstanceSlot, SlotCommand};

const COMMAND_BUFFER: usize = 8;

enum SlotHandle {
    /// Added but not yet started.
    Pending(Box<InstanceSlot>, watch::Receiver<InstanceHealth>),
    Running {
        commands: mpsc::Sender<SlotCommand>,
        health: watch::Receiver<InstanceHealth>,
        task: JoinHandle<()>,
    },
}

impl SlotHandle {
    fn health(&self) -> InstanceHealth {
        match self {
            Self::Pending(_, health) | Self::Running { health, .. } => health.borrow().clone(),
        }
    }
}

/// Schedules every configured instance independently.
pub struct Scheduler {
    registry: Arc<Registry>,
    pipeline: ReconcilePipeline,
    settings: SchedulerSettings,
    framework: Version,
    slots: BTreeMap<String, SlotHandle>,
    shutdown: watch::Sender<bool>,
    started: bool,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        pipeline: ReconcilePipeline,
        settings: SchedulerSettings,
        framework: Version,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            pipeline,
            settings,
            framework,
            slots: BTreeMap::new(),
            shutdown,
            started: false,
        }
    }

    /// Build a scheduler with every instance in `config` added.
    ///
    /// # Errors
    ///
    /// Returns an error if an instance names an unknown provider or a name
    /// is used twice.
    pub fn from_config(
        config: &GraphsyncConfig,
        registry: Arc<Registry>,
        gateway: Arc<dyn ApplyGateway>,
        framework: Version,
    ) -> Result<Self> {
        let pipeline = ReconcilePipeline::new(gateway, SharedOwnership::new());
        let mut scheduler = Self::new(registry, pipeline, config.scheduler.clone(), framework);
        config
            .instances
            .iter()
            .try_for_each(|instance| scheduler.add_instance(instance.clone()))?;
        Ok(scheduler)
    }

    /// Add an instance. It starts ticking immediately if the scheduler has
    /// been started.
    ///
    /// An instance whose provider is incompatible with the running framework
    /// is added in the Disabled state rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProvider`] or a [`Error::Config`] for a
    /// duplicate instance name.
    pub fn add_instance(&mut self, config: ProviderInstanceConfig) -> Result<()> {
        let name = config.name.to_string();
        if self.slots.contains_key(&name) {
            return Err(Error::config(format!("duplicate instance name '{name}'")));
        }
        config.validate()?;
        let factory = self.registry.resolve(&config.provider)?;

        let (slot, health) = InstanceSlot::new(
            config,
            factory.clone(),
            self.pipeline.clone(),
            self.settings.clone(),
        );
        let slot = slot.with_first_delay(self.settings.first_tick_delay(self.slots.len()));

        match check_compatibility(factory.descriptor(), &self.framework) {
            Ok(Compatibility::Compatible) => {}
            Ok(Compatibility::Warning(message)) => {
                warn!(instance = %name, "{message}");
            }
            Err(e) => {
                warn!(instance = %name, error = %e, "Provider incompatible; instance disabled");
                slot.disable(DisableReason::Incompatible(e.to_string()));
            }
        }

        let handle = if self.started {
            self.spawn(slot, health)
        } else {
            SlotHandle::Pending(Box::new(slot), health)
        };
        info!(instance = %name, "Instance added");
        self.slots.insert(name, handle);
        Ok(())
    }

    fn spawn(&self, slot: InstanceSlot, health: watch::Receiver<InstanceHealth>) -> SlotHandle {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(slot.run(rx, self.shutdown.subscribe()));
        SlotHandle::Running {
            commands,
            health,
            task,
        }
    }

    /// Spawn a task per instance. Each keeps its own timer.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let pending = std::mem::take(&mut self.slots);
        self.slots = pending
            .into_iter()
            .map(|(name, handle)| match handle {
                SlotHandle::Pending(slot, health) => (name, self.spawn(*slot, health)),
                running @ SlotHandle::Running { .. } => (name, running),
            })
            .collect();
        info!(instances = self.slots.len(), "Scheduler started");
    }

    fn slot(&self, name: &str) -> Result<&SlotHandle> {
        self.slots.get(name).ok_or_else(|| Error::UnknownInstance {
            name: name.to_string(),
        })
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut SlotHandle> {
        self.slots.get_mut(name).ok_or_else(|| Error::UnknownInstance {
            name: name.to_string(),
        })
    }

    async fn send(&self, name: &str, command: SlotCommand) -> Result<()> {
        match self.slot(name)? {
            SlotHandle::Running { commands, .. } => commands.send(command).await.map_err(|_| {
                Error::Cancelled {
                    instance: name.to_string(),
                }
            }),
            SlotHandle::Pending(..) => Ok(()),
        }
    }

    /// Re-enable an instance an operator stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownInstance`], or [`Error::InstanceDisabled`]
    /// for an instance disabled by an incompatible provider.
    pub async fn start_instance(&self, name: &str) -> Result<()> {
        match self.slot(name)? {
            SlotHandle::Pending(slot, _) => slot.enable(),
            SlotHandle::Running { health, .. } => {
                if matches!(health.borrow().disabled, Some(DisableReason::Incompatible(_))) {
                    return Err(Error::InstanceDisabled {
                        instance: name.to_string(),
                    });
                }
                self.send(name, SlotCommand::Start).await
            }
        }
    }

    /// Cancel any in-flight tick and disable the instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownInstance`].
    pub async fn stop_instance(&self, name: &str) -> Result<()> {
        match self.slot(name)? {
            SlotHandle::Pending(slot, _) => {
                slot.disable(DisableReason::Operator);
                Ok(())
            }
            SlotHandle::Running { .. } => self.send(name, SlotCommand::Stop).await,
        }
    }

    /// Ask an instance to tick now. Skipped if it is already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownInstance`].
    pub fn force_tick(&self, name: &str) -> Result<()> {
        match self.slot(name)? {
            SlotHandle::Running { commands, .. } => {
                if commands.try_send(SlotCommand::ForceTick).is_err() {
                    info!(instance = %name, "Instance busy; forced tick skipped");
                }
                Ok(())
            }
            SlotHandle::Pending(..) => {
                info!(instance = %name, "Scheduler not started; forced tick skipped");
                Ok(())
            }
        }
    }

    /// Run a tick and wait for its report. Before [`Self::start`] the tick
    /// runs in the caller's task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if a tick is in flight, or the error
    /// that failed the tick.
    pub async fn tick_now(&mut self, name: &str) -> Result<TickReport> {
        match self.slot_mut(name)? {
            SlotHandle::Pending(slot, _) => slot.tick_inline().await,
            SlotHandle::Running { commands, .. } => {
                let (reply, rx) = oneshot::channel();
                let cancelled = || Error::Cancelled {
                    instance: name.to_string(),
                };
                commands
                    .send(SlotCommand::TickNow(reply))
                    .await
                    .map_err(|_| cancelled())?;
                rx.await.map_err(|_| cancelled())?
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownInstance`].
    pub fn health(&self, name: &str) -> Result<InstanceHealth> {
        self.slot(name).map(SlotHandle::health)
    }

    /// Health of every instance, by name.
    pub fn health_all(&self) -> Vec<InstanceHealth> {
        self.slots.values().map(SlotHandle::health).collect()
    }

    pub fn instances(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn pipeline(&self) -> &ReconcilePipeline {
        &self.pipeline
    }

    /// Signal every slot to stop, cancelling in-flight ticks, and wait for
    /// them to exit.
    pub async fn shutdown(self) {
        info!("Shutting down scheduler");
        let _ = self.shutdown.send(true);
        for (name, handle) in self.slots {
            if let SlotHandle::Running { task, .. } = handle {
                if let Err(e) = task.await {
                    warn!(instance = %name, error = %e, "Instance task ended abnormally");
                }
            }
        }
        info!("Scheduler stopped");
    }
}
