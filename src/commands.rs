//! Command implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use graphsync_core::{FRAMEWORK_VERSION, GraphsyncConfig, ResultExt};
use graphsync_gateway::{ApplyGateway, InMemoryGateway, TracingGateway};
use graphsync_providers::builtin_registry;
use graphsync_reconciler::TickReport;
use graphsync_registry::{Compatibility, Registry, check_compatibility, parse_framework_version};
use graphsync_scheduler::Scheduler;
use semver::Version;
use tokio::signal;
use tracing::{error, info, warn};

fn load_config(path: &Path) -> Result<GraphsyncConfig> {
    GraphsyncConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn framework_version(config: Option<&GraphsyncConfig>) -> Result<Version> {
    match config.and_then(|c| c.framework_version.clone()) {
        Some(version) => Ok(version),
        None => parse_framework_version(FRAMEWORK_VERSION)
            .context("Built-in framework version is not a semantic version"),
    }
}

fn registry() -> Result<Arc<Registry>> {
    Ok(Arc::new(
        builtin_registry().context("Failed to assemble the provider registry")?,
    ))
}

fn gateway() -> Arc<dyn ApplyGateway> {
    Arc::new(TracingGateway::new(InMemoryGateway::new()))
}

fn scheduler(config: &GraphsyncConfig) -> Result<Scheduler> {
    let framework = framework_version(Some(config))?;
    info!(framework = %framework, instances = config.instances.len(), "Building scheduler");
    Scheduler::from_config(config, registry()?, gateway(), framework)
        .context("Failed to add configured instances")
}

/// Schedule every instance until Ctrl+C, then shut down gracefully.
pub async fn run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let mut scheduler = scheduler(&config)?;
    scheduler.start();

    wait_for_shutdown().await;

    for health in scheduler.health_all() {
        info!(
            instance = %health.instance,
            state = %health.state,
            ticks = health.total_ticks,
            failures = health.consecutive_failures,
            "Final instance state"
        );
    }
    scheduler.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}

fn print_report(report: &TickReport) {
    println!(
        "{}: +{} ~{} -{} entities, +{} -{} relations, {} unchanged, {} unresolved, {} conflicts",
        report.instance,
        report.entities_created,
        report.entities_updated,
        report.entities_deleted,
        report.relations_created,
        report.relations_deleted,
        report.unchanged,
        report.resolution_misses,
        report.conflicts,
    );
}

/// One tick per instance. Fails if any instance failed.
pub async fn once(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let mut scheduler = scheduler(&config)?;

    let mut failed = Vec::new();
    for name in scheduler.instances() {
        match scheduler.tick_now(&name).await {
            Ok(report) => print_report(&report),
            Err(e) => {
                println!("{name}: failed ({}): {e}", e.kind());
                failed.push(name);
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        bail!("{} instance(s) failed: {}", failed.len(), failed.join(", "))
    }
}

/// List providers with their compatibility verdict.
pub fn providers(json: bool) -> Result<()> {
    let registry = registry()?;
    let framework = framework_version(None)?;
    let descriptors = registry.list();

    if json {
        let rendered = serde_json::to_string_pretty(&descriptors)
            .context("Failed to render provider descriptors")?;
        println!("{rendered}");
        return Ok(());
    }

    for descriptor in &descriptors {
        let verdict = match check_compatibility(descriptor, &framework) {
            Ok(Compatibility::Compatible) => "compatible".to_string(),
            Ok(Compatibility::Warning(message)) => format!("warning: {message}"),
            Err(e) => format!("incompatible: {e}"),
        };
        let capabilities: Vec<String> = descriptor
            .capabilities
            .iter()
            .map(ToString::to_string)
            .collect();
        println!(
            "{} {} [{}] {}{}",
            descriptor.name,
            descriptor.version,
            capabilities.join(", "),
            verdict,
            if descriptor.is_deprecated() { " (deprecated)" } else { "" }
        );
    }
    Ok(())
}

/// Load the config and check every instance against the registry.
pub fn validate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = registry()?;
    let framework = framework_version(Some(&config))?;

    let mut problems = 0_usize;
    for instance in &config.instances {
        let checked = registry.resolve(&instance.provider).and_then(|factory| {
            check_compatibility(factory.descriptor(), &framework)?;
            factory.prepare_config(instance)
        });
        match checked
            .inspect_error(|e| warn!(instance = %instance.name, error = %e, "Invalid instance"))
        {
            Ok(_) => println!("{}: ok ({})", instance.name, instance.provider),
            Err(e) => {
                println!("{}: {e}", instance.name);
                problems += 1;
            }
        }
    }

    if problems > 0 {
        bail!("{problems} invalid instance(s)");
    }
    println!("{} instance(s) valid", config.instances.len());
    Ok(())
}
