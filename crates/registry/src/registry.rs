//! The plugin registry: an explicit table of providers keyed by stable name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use graphsync_core::{
    Capability, Error, ProviderDescriptor, ProviderInstanceConfig, Result,
};

use crate::provider::Provider;
use crate::versioning::ConfigVersionSupport;

type BuildFn = dyn Fn(&ProviderInstanceConfig) -> Result<Box<dyn Provider>> + Send + Sync;

/// Lazily builds a provider for one instance config.
///
/// Nothing provider-specific (clients, auth) is constructed until
/// [`ProviderFactory::instantiate`] is called.
#[derive(Clone)]
pub struct ProviderFactory {
    descriptor: Arc<ProviderDescriptor>,
    versions: Option<Arc<ConfigVersionSupport>>,
    build: Arc<BuildFn>,
}

impl fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("provider", &self.descriptor.name)
            .field("versions", &self.versions)
            .finish_non_exhaustive()
    }
}

impl ProviderFactory {
    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn config_versions(&self) -> Option<&ConfigVersionSupport> {
        self.versions.as_deref()
    }

    /// Migrate the instance's options to the current schema version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compatibility`] if the options version cannot be migrated.
    pub fn prepare_config(
        &self,
        config: &ProviderInstanceConfig,
    ) -> Result<ProviderInstanceConfig> {
        let Some(versions) = &self.versions else {
            return Ok(config.clone());
        };
        let now = Utc::now();
        if let Some(warning) = versions.deprecation_warning(config.config_version, now) {
            tracing::warn!(instance = %config.name, provider = %self.descriptor.name, "{warning}");
        }
        let options = versions.migrate(
            &self.descriptor.name,
            config.options.clone(),
            config.config_version,
            now,
        )?;
        Ok(config
            .clone()
            .with_options(options)
            .with_config_version(versions.current()))
    }

    /// Build the provider for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the options cannot be migrated, the provider
    /// fails to build, or a declared capability has no matching interface.
    pub fn instantiate(&self, config: &ProviderInstanceConfig) -> Result<Box<dyn Provider>> {
        let config = self.prepare_config(config)?;
        let provider = (self.build)(&config)?;
        check_interfaces(&self.descriptor, provider.as_ref())?;
        tracing::debug!(
            instance = %config.name,
            provider = %self.descriptor.name,
            "Provider instantiated"
        );
        Ok(provider)
    }
}

/// Declared capabilities must be backed by the matching interface.
fn check_interfaces(descriptor: &ProviderDescriptor, provider: &dyn Provider) -> Result<()> {
    let missing = |capability: Capability| Error::MissingCapability {
        provider: descriptor.name.clone(),
        capability: capability.to_string(),
    };
    if descriptor.has_capability(Capability::Discovery)
        && provider.discovery().is_none()
        && provider.incremental().is_none()
    {
        return Err(missing(Capability::Discovery));
    }
    if descriptor.has_capability(Capability::Relations) && provider.relations().is_none() {
        return Err(missing(Capability::Relations));
    }
    if descriptor.has_capability(Capability::Incremental) && provider.incremental().is_none() {
        return Err(missing(Capability::Incremental));
    }
    Ok(())
}

/// A compiled-in table of providers contributed by one crate or module.
pub struct PluginSource {
    name: String,
    entries: Vec<ProviderFactory>,
}

impl PluginSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Register a provider and its build function.
    #[must_use]
    pub fn with_provider<F>(mut self, descriptor: ProviderDescriptor, build: F) -> Self
    where
        F: Fn(&ProviderInstanceConfig) -> Result<Box<dyn Provider>> + Send + Sync + 'static,
    {
        self.entries.push(ProviderFactory {
            descriptor: Arc::new(descriptor),
            versions: None,
            build: Arc::new(build),
        });
        self
    }

    /// Like [`Self::with_provider`], with config versioning support.
    #[must_use]
    pub fn with_versioned_provider<F>(
        mut self,
        descriptor: ProviderDescriptor,
        versions: ConfigVersionSupport,
        build: F,
    ) -> Self
    where
        F: Fn(&ProviderInstanceConfig) -> Result<Box<dyn Provider>> + Send + Sync + 'static,
    {
        self.entries.push(ProviderFactory {
            descriptor: Arc::new(descriptor),
            versions: Some(Arc::new(versions)),
            build: Arc::new(build),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builder that merges plugin sources into a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    sources: Vec<PluginSource>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn source(mut self, source: PluginSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Build the registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateProvider`] if two entries share a name,
    /// whether in the same source or in different ones.
    pub fn build(self) -> Result<Registry> {
        let mut entries: BTreeMap<String, (String, ProviderFactory)> = BTreeMap::new();
        for source in self.sources {
            for factory in source.entries {
                let name = factory.descriptor.name.clone();
                if let Some((first, _)) = entries.get(&name) {
                    return Err(Error::DuplicateProvider {
                        name,
                        first: first.clone(),
                        second: source.name.clone(),
                    });
                }
                entries.insert(name, (source.name.clone(), factory));
            }
        }
        tracing::debug!(providers = entries.len(), "Registry built");
        Ok(Registry {
            entries: entries
                .into_iter()
                .map(|(name, (_, factory))| (name, factory))
                .collect(),
        })
    }
}

/// Read-only table of providers by stable name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, ProviderFactory>,
}

impl Registry {
    /// All descriptors, sorted by name.
    pub fn list(&self) -> Vec<ProviderDescriptor> {
        self.entries
            .values()
            .map(|f| f.descriptor().clone())
            .collect()
    }

    /// # Errors
    ///
    /// Returns [`Error::UnknownProvider`] if no provider has this name.
    pub fn descriptor(&self, name: &str) -> Result<&ProviderDescriptor> {
        self.entries
            .get(name)
            .map(ProviderFactory::descriptor)
            .ok_or_else(|| Error::UnknownProvider { name: name.to_string() })
    }

    /// Look up the lazy factory for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProvider`] if no provider has this name.
    pub fn resolve(&self, name: &str) -> Result<ProviderFactory> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownProvider { name: name.to_string() })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
