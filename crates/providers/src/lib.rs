//! Providers compiled into graphsync.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod file;

use graphsync_core::Result;
use graphsync_registry::{PluginSource, Provider, Registry, RegistryBuilder};

pub use file::{FileProvider, FileProviderOptions};

/// Name of the plugin source holding the built-in providers.
pub const BUILTIN_SOURCE: &str = "builtin";

/// The compiled-in provider table.
///
/// # Errors
///
/// Returns an error if a provider's config version table is malformed.
pub fn builtin_source() -> Result<PluginSource> {
    Ok(PluginSource::new(BUILTIN_SOURCE).with_versioned_provider(
        file::descriptor(),
        file::config_versions()?,
        |config| Ok(Box::new(FileProvider::from_config(config)?) as Box<dyn Provider>),
    ))
}

/// A registry holding only the built-in providers.
///
/// # Errors
///
/// Returns an error if the built-in table cannot be assembled.
pub fn builtin_registry() -> Result<Registry> {
    RegistryBuilder::new().source(builtin_source()?).build()
}
