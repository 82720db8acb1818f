//! Provider contract and plugin registry for graphsync.
//!
//! Providers are registered from compiled-in [`PluginSource`] tables. The
//! registry hands out lazy [`ProviderFactory`] values; a provider is only
//! built when its instance first ticks.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod compat;
pub mod provider;
pub mod registry;
pub mod versioning;

pub use compat::{Compatibility, check_compatibility, deprecation_notice, parse_framework_version};
pub use provider::{Discovery, DiscoveryScope, Incremental, Provider, RelationProducing};
pub use registry::{PluginSource, ProviderFactory, Registry, RegistryBuilder};
pub use versioning::{ConfigVersionInfo, ConfigVersionSupport, Migration};
