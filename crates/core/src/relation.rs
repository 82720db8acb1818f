//! Relations between entities, in reported (possibly deferred) and
//! resolved (concrete, owned) form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKey, validate_namespace};
use crate::error::Error;
use crate::ids::InstanceId;
use crate::result::Result;
use crate::selector::FieldSelector;

/// One side of a reported relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Concrete(EntityKey),
    Deferred(FieldSelector),
}

impl Endpoint {
    pub const fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }
}

impl From<EntityKey> for Endpoint {
    fn from(key: EntityKey) -> Self {
        Self::Concrete(key)
    }
}

impl From<FieldSelector> for Endpoint {
    fn from(selector: FieldSelector) -> Self {
        Self::Deferred(selector)
    }
}

/// A relation as a provider reports it. Either endpoint may still be a
/// selector; the resolver turns it into zero or more [`ResolvedRelation`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub relation: String,
    pub namespace: String,
    pub source: Endpoint,
    pub target: Endpoint,
}

impl Relation {
    /// Create a reported relation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for an empty relation type or a
    /// malformed namespace.
    pub fn new(
        relation: impl Into<String>,
        namespace: impl Into<String>,
        source: impl Into<Endpoint>,
        target: impl Into<Endpoint>,
    ) -> Result<Self> {
        let relation = relation.into();
        let namespace = namespace.into();
        if relation.trim().is_empty() {
            return Err(Error::invalid_name(relation, "relation type must not be empty"));
        }
        validate_namespace(&namespace)?;
        Ok(Self {
            relation,
            namespace,
            source: source.into(),
            target: target.into(),
        })
    }

    /// Both endpoints are already concrete.
    pub fn is_concrete(&self) -> bool {
        !self.source.is_deferred() && !self.target.is_deferred()
    }
}

/// Identity of a resolved relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationKey {
    pub relation: String,
    pub namespace: String,
    pub source: EntityKey,
    pub target: EntityKey,
}

impl fmt::Display for RelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{}/{}]-> {}",
            self.source, self.namespace, self.relation, self.target
        )
    }
}

/// A relation whose endpoints are both concrete, tagged with its owner.
/// Only this form can reach a mutation set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedRelation {
    key: RelationKey,
    owner: InstanceId,
}

impl ResolvedRelation {
    pub const fn new(key: RelationKey, owner: InstanceId) -> Self {
        Self { key, owner }
    }

    pub const fn key(&self) -> &RelationKey {
        &self.key
    }

    pub const fn owner(&self) -> &InstanceId {
        &self.owner
    }

    pub fn source(&self) -> &EntityKey {
        &self.key.source
    }

    pub fn target(&self) -> &EntityKey {
        &self.key.target
    }
}
