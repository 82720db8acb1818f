//! Provider metadata, immutable once the registry is built.

use std::collections::BTreeSet;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Closed set of things a provider can declare it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Discovery,
    Relations,
    Incremental,
    Webhooks,
    Reconciliation,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovery => "discovery",
            Self::Relations => "relations",
            Self::Incremental => "incremental",
            Self::Webhooks => "webhooks",
            Self::Reconciliation => "reconciliation",
        };
        f.write_str(s)
    }
}

/// How many relations a deferred endpoint turns into when its selector
/// matches more than one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationMultiplicity {
    /// One relation per match.
    #[default]
    FanOut,
    /// Only the first match in key order.
    FirstMatch,
}

/// A relation type a provider may emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTypeDecl {
    pub relation: String,
    pub source_kind: Option<String>,
    pub target_kind: Option<String>,
    #[serde(default)]
    pub multiplicity: RelationMultiplicity,
}

impl RelationTypeDecl {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            source_kind: None,
            target_kind: None,
            multiplicity: RelationMultiplicity::FanOut,
        }
    }

    #[must_use]
    pub fn between(
        mut self,
        source_kind: impl Into<String>,
        target_kind: impl Into<String>,
    ) -> Self {
        self.source_kind = Some(source_kind.into());
        self.target_kind = Some(target_kind.into());
        self
    }

    #[must_use]
    pub const fn with_multiplicity(mut self, multiplicity: RelationMultiplicity) -> Self {
        self.multiplicity = multiplicity;
        self
    }
}

/// Schema of an entity kind, registered with the graph before writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub properties: BTreeSet<String>,
}

impl EntityTypeDef {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: String::new(),
            properties: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.properties.insert(property.into());
        self
    }
}

/// Deprecation notice attached to a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deprecation {
    pub replacement: Option<String>,
    pub message: Option<String>,
}

/// Static description of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: Version,
    pub capabilities: BTreeSet<Capability>,
    pub entity_types: Vec<String>,
    pub relation_types: Vec<RelationTypeDecl>,
    pub requires_auth: bool,
    pub auth_types: Vec<String>,
    pub min_framework_version: Version,
    pub deprecation: Option<Deprecation>,
}

impl ProviderDescriptor {
    /// A descriptor with no capabilities, requiring framework 0.1.0.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            version,
            capabilities: BTreeSet::new(),
            entity_types: Vec::new(),
            relation_types: Vec::new(),
            requires_auth: false,
            auth_types: Vec::new(),
            min_framework_version: Version::new(0, 1, 0),
            deprecation: None,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    #[must_use]
    pub fn with_entity_type(mut self, kind: impl Into<String>) -> Self {
        self.entity_types.push(kind.into());
        self
    }

    #[must_use]
    pub fn with_relation_type(mut self, decl: RelationTypeDecl) -> Self {
        self.relation_types.push(decl);
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth_types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires_auth = true;
        self.auth_types = auth_types.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_min_framework_version(mut self, version: Version) -> Self {
        self.min_framework_version = version;
        self
    }

    #[must_use]
    pub fn deprecated(mut self, replacement: Option<&str>, message: Option<&str>) -> Self {
        self.deprecation = Some(Deprecation {
            replacement: replacement.map(str::to_string),
            message: message.map(str::to_string),
        });
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub const fn is_deprecated(&self) -> bool {
        self.deprecation.is_some()
    }

    /// Declared multiplicity for a relation type; undeclared types fan out.
    pub fn multiplicity(&self, relation: &str) -> RelationMultiplicity {
        self.relation_types
            .iter()
            .find(|d| d.relation == relation)
            .map_or(RelationMultiplicity::FanOut, |d| d.multiplicity)
    }
}
