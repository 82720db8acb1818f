//! Core types for graphsync.
//!
//! Everything the other crates exchange lives here:
//!
//! - **Entities and relations**: validated identities, closed property values,
//!   deferred field selectors
//! - **State**: reported state, applied snapshots, mutation sets
//! - **Descriptors**: static provider metadata
//! - **Configuration**: YAML instance records with environment overrides
//! - **Errors**: a single taxonomy the scheduler classifies per instance

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod descriptor;
pub mod entity;
pub mod error;
pub mod ids;
pub mod relation;
pub mod result;
pub mod selector;
pub mod state;

pub use config::{GraphsyncConfig, ProviderInstanceConfig, SchedulerSettings, Secret};
pub use descriptor::{
    Capability, Deprecation, EntityTypeDef, ProviderDescriptor, RelationMultiplicity,
    RelationTypeDecl,
};
pub use entity::{Entity, EntityKey, Properties, PropertyValue, sanitize_name};
pub use error::Error;
pub use ids::{InstanceId, TickId};
pub use relation::{Endpoint, Relation, RelationKey, ResolvedRelation};
pub use result::{Result, ResultExt};
pub use selector::{FieldSelector, SelectorField};
pub use state::{AppliedSnapshot, MutationSet, ReportedState};

/// Version of the running framework, checked against each provider's
/// `min_framework_version`.
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");
