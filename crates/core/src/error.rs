//! Core error types for graphsync operations.
//!
//! Every error is contained at the provider-instance level: the scheduler
//! classifies it with [`Error::is_fatal`] / [`Error::is_transient`] and never
//! lets it escape into a sibling instance.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type for graphsync operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Registry / compatibility
    #[error("provider '{provider}' is incompatible: {reason}")]
    Compatibility { provider: String, reason: String },

    #[error("provider '{name}' registered by both '{first}' and '{second}'")]
    DuplicateProvider {
        name: String,
        first: String,
        second: String,
    },

    #[error("unknown provider '{name}'")]
    UnknownProvider { name: String },

    #[error("provider '{provider}' does not implement the {capability} interface")]
    MissingCapability { provider: String, capability: String },

    // Pipeline
    #[error("provider '{provider}' failed: {reason}")]
    TransientProvider { provider: String, reason: String },

    #[error("entity type '{kind}' is not defined in the graph: {reason}")]
    StructuralApply { kind: String, reason: String },

    #[error("'{key}' claimed by '{claimant}' is already owned by '{owner}'")]
    OwnershipConflict {
        key: String,
        claimant: String,
        owner: String,
    },

    #[error("selector '{selector}' matched no entities")]
    ResolutionMiss { selector: String },

    #[error("apply gateway error: {reason}")]
    Gateway { reason: String },

    // Scheduling
    #[error("tick for '{instance}' timed out after {after_ms}ms")]
    Timeout { instance: String, after_ms: u64 },

    #[error("tick for '{instance}' was cancelled")]
    Cancelled { instance: String },

    #[error("unknown instance '{name}'")]
    UnknownInstance { name: String },

    #[error("instance '{instance}' is already running a tick")]
    AlreadyRunning { instance: String },

    #[error("instance '{instance}' is disabled")]
    InstanceDisabled { instance: String },

    // Validation
    #[error("invalid name '{value}': {reason}")]
    InvalidName { value: String, reason: String },

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    // I/O and parsing
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    #[error("YAML parse error: {reason}")]
    YamlParseFailed { reason: String },

    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },
}

impl Error {
    /// Create a compatibility error.
    pub fn compatibility(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Compatibility {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Create a transient provider error.
    pub fn transient_provider(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TransientProvider {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Create a structural apply error.
    pub fn structural_apply(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StructuralApply {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create an ownership conflict error.
    pub fn ownership_conflict(
        key: impl Into<String>,
        claimant: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self::OwnershipConflict {
            key: key.into(),
            claimant: claimant.into(),
            owner: owner.into(),
        }
    }

    /// Create a gateway error.
    pub fn gateway(reason: impl Into<String>) -> Self {
        Self::Gateway {
            reason: reason.into(),
        }
    }

    /// Create an invalid name error.
    pub fn invalid_name(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid selector error.
    pub fn invalid_selector(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }

    /// Errors that take an instance out of scheduling entirely.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Compatibility { .. } | Self::MissingCapability { .. })
    }

    /// Errors the scheduler retries at the backed-off interval.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientProvider { .. }
                | Self::Gateway { .. }
                | Self::Timeout { .. }
                | Self::StructuralApply { .. }
                | Self::FileReadFailed { .. }
                | Self::YamlParseFailed { .. }
                | Self::JsonParseFailed { .. }
        )
    }

    /// Short machine-readable label for health reports and log fields.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Compatibility { .. } => "compatibility",
            Self::DuplicateProvider { .. } => "duplicate_provider",
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::MissingCapability { .. } => "missing_capability",
            Self::TransientProvider { .. } => "transient_provider",
            Self::StructuralApply { .. } => "structural_apply",
            Self::OwnershipConflict { .. } => "ownership_conflict",
            Self::ResolutionMiss { .. } => "resolution_miss",
            Self::Gateway { .. } => "gateway",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::UnknownInstance { .. } => "unknown_instance",
            Self::AlreadyRunning { .. } => "already_running",
            Self::InstanceDisabled { .. } => "instance_disabled",
            Self::InvalidName { .. } => "invalid_name",
            Self::InvalidSelector { .. } => "invalid_selector",
            Self::Config { .. } => "config",
            Self::FileReadFailed { .. } => "file_read",
            Self::YamlParseFailed { .. } => "yaml_parse",
            Self::JsonParseFailed { .. } => "json_parse",
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::yaml_parse_failed(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::json_parse_failed(err.to_string())
    }
}
