//! Configuration: scheduler settings plus one record per provider instance.
//!
//! Loaded from YAML; values already present in the file can be overridden
//! from the environment with the `GRAPHSYNC_` prefix, e.g.
//! `GRAPHSYNC_SCHEDULER_TICK_TIMEOUT_SECS=30`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use semver::Version;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entity::{DEFAULT_NAMESPACE, validate_namespace};
use crate::error::Error;
use crate::ids::InstanceId;
use crate::result::Result;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "GRAPHSYNC_";

/// Auth material. Never printed.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(serde_json::Value);

impl Secret {
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub const fn expose(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Scheduler-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_timeout_secs: u64,
    pub max_backoff_multiplier: u32,
    pub initial_delay_secs: u64,
    /// Extra delay per instance, in configuration order, before its first
    /// tick. Keeps instances from all ticking at once on startup.
    pub stagger_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_timeout_secs: 300,
            max_backoff_multiplier: 16,
            initial_delay_secs: 0,
            stagger_secs: 2,
        }
    }
}

impl SchedulerSettings {
    pub const fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }

    pub const fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    /// Delay before the first tick of the instance at `position`.
    pub fn first_tick_delay(&self, position: usize) -> Duration {
        let position = u64::try_from(position).unwrap_or(u64::MAX);
        self.initial_delay()
            .saturating_add(Duration::from_secs(self.stagger_secs.saturating_mul(position)))
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

const fn default_every() -> u64 {
    60
}

const fn default_config_version() -> u32 {
    1
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// One configured provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInstanceConfig {
    pub name: InstanceId,
    pub provider: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Seconds between ticks; a lower bound, never a guarantee.
    #[serde(default = "default_every")]
    pub every: u64,
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default = "empty_object")]
    pub options: serde_json::Value,
    #[serde(default)]
    pub auth: Secret,
}

impl ProviderInstanceConfig {
    /// Minimal config for `name` backed by `provider`.
    pub fn new(name: InstanceId, provider: impl Into<String>) -> Self {
        Self {
            name,
            provider: provider.into(),
            namespace: default_namespace(),
            every: default_every(),
            config_version: default_config_version(),
            options: empty_object(),
            auth: Secret::default(),
        }
    }

    #[must_use]
    pub fn with_every(mut self, every: u64) -> Self {
        self.every = every;
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn with_config_version(mut self, version: u32) -> Self {
        self.config_version = version;
        self
    }

    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.every)
    }

    /// Deserialize the provider options into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the instance if the options do not fit `T`.
    pub fn options_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.options.clone())
            .map_err(|e| Error::config(format!("instance '{}': {e}", self.name)))
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero interval, an empty provider name
    /// or a malformed namespace.
    pub fn validate(&self) -> Result<()> {
        if self.every == 0 {
            return Err(Error::config(format!(
                "instance '{}': every must be greater than zero",
                self.name
            )));
        }
        if self.provider.trim().is_empty() {
            return Err(Error::config(format!(
                "instance '{}': provider must not be empty",
                self.name
            )));
        }
        validate_namespace(&self.namespace)
            .map_err(|e| Error::config(format!("instance '{}': {e}", self.name)))
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphsyncConfig {
    #[serde(default)]
    pub framework_version: Option<Version>,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub instances: Vec<ProviderInstanceConfig>,
}

impl GraphsyncConfig {
    /// Load from a YAML file, applying `GRAPHSYNC_` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid YAML, or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let env: HashMap<String, String> = std::env::vars().collect();
        let config = Self::from_yaml_with_env(&raw, &env)?;
        tracing::debug!(
            path = %path.display(),
            instances = config.instances.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate YAML text without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid YAML or a config that fails validation.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Self::from_yaml_with_env(raw, &HashMap::new())
    }

    /// Parse YAML text, apply overrides from `env`, then validate.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid YAML or a config that fails validation.
    pub fn from_yaml_with_env(raw: &str, env: &HashMap<String, String>) -> Result<Self> {
        let mut tree: serde_yaml::Value = serde_yaml::from_str(raw)?;
        if tree.is_null() {
            tree = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        override_with_env(&mut tree, ENV_PREFIX, env);
        let config: Self = serde_yaml::from_value(tree)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] for duplicate instance names, an invalid
    /// instance, or scheduler settings that would never let a tick finish.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_timeout_secs == 0 {
            return Err(Error::config("scheduler.tick_timeout_secs must be greater than zero"));
        }
        if self.scheduler.max_backoff_multiplier == 0 {
            return Err(Error::config(
                "scheduler.max_backoff_multiplier must be greater than zero",
            ));
        }

        let mut seen = HashSet::new();
        self.instances.iter().try_for_each(|instance| {
            if !seen.insert(instance.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate instance name '{}'",
                    instance.name
                )));
            }
            instance.validate()
        })
    }
}

/// Replace scalar values already present in `tree` whose upper-cased,
/// underscore-joined path (after `prefix`) names an environment variable.
/// Values are parsed as YAML scalars so numbers and booleans keep their type.
fn override_with_env(tree: &mut serde_yaml::Value, prefix: &str, env: &HashMap<String, String>) {
    let serde_yaml::Value::Mapping(map) = tree else {
        return;
    };
    for (key, value) in map.iter_mut() {
        let Some(key) = key.as_str() else {
            continue;
        };
        let env_key = format!("{prefix}{key}").to_uppercase();
        if value.is_mapping() {
            override_with_env(value, &format!("{env_key}_"), env);
        } else if let Some(raw) = env.get(&env_key) {
            tracing::info!(variable = %env_key, "Overriding configuration from environment");
            *value = serde_yaml::from_str(raw)
                .unwrap_or_else(|_| serde_yaml::Value::String(raw.clone()));
        }
    }
}
