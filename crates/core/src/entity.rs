//! Entities: typed graph nodes with a namespace-qualified name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ids::InstanceId;
use crate::result::Result;

/// Maximum length of an entity name.
pub const MAX_NAME_LEN: usize = 253;
/// Maximum length of a namespace.
pub const MAX_NAMESPACE_LEN: usize = 63;
/// Namespace used when a provider or config does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

static LABEL_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$"));

fn check_label(value: &str, max_len: usize, what: &str) -> Result<()> {
    if value.len() > max_len {
        return Err(Error::invalid_name(
            value,
            format!("{what} must be at most {max_len} characters"),
        ));
    }
    let pattern = LABEL_PATTERN
        .as_ref()
        .map_err(|e| Error::invalid_name(value, e.to_string()))?;
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(Error::invalid_name(
            value,
            format!(
                "{what} must be lowercase alphanumerics or '-', \
                 starting and ending alphanumeric"
            ),
        ))
    }
}

/// Validate an entity name (DNS-1123 label characters, up to 253 chars).
///
/// # Errors
///
/// Returns [`Error::InvalidName`] when the name violates the constraint.
pub fn validate_name(name: &str) -> Result<()> {
    check_label(name, MAX_NAME_LEN, "name")
}

/// Validate a namespace (DNS-1123 label, up to 63 chars).
///
/// # Errors
///
/// Returns [`Error::InvalidName`] when the namespace violates the constraint.
pub fn validate_namespace(namespace: &str) -> Result<()> {
    check_label(namespace, MAX_NAMESPACE_LEN, "namespace")
}

/// Validate an entity kind: non-empty, leading uppercase, alphanumeric.
///
/// # Errors
///
/// Returns [`Error::InvalidName`] when the kind is malformed.
pub fn validate_kind(kind: &str) -> Result<()> {
    let starts_upper = kind.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    if starts_upper && kind.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(Error::invalid_name(
            kind,
            "kind must start with an uppercase letter and be alphanumeric",
        ))
    }
}

/// Turn an arbitrary external name into a valid entity name.
///
/// Lowercases, maps every character outside `[a-z0-9-]` to `-`, collapses
/// runs of `-`, trims them from both ends and truncates to `max_len`.
/// An input with nothing left becomes `"unnamed"`.
pub fn sanitize_name(raw: &str, max_len: usize) -> String {
    let mapped: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();

    let collapsed = mapped
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    let truncated: String = collapsed.chars().take(max_len).collect();
    let trimmed = truncated.trim_end_matches('-');

    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Identity of an entity: `(kind, namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl EntityKey {
    /// Create a validated entity key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if any component is malformed.
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        };
        key.validate()?;
        Ok(key)
    }

    /// Re-check every component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if any component is malformed.
    pub fn validate(&self) -> Result<()> {
        validate_kind(&self.kind)?;
        validate_namespace(&self.namespace)?;
        validate_name(&self.name)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A property value: a closed set of scalar and list kinds.
///
/// Floats compare by bit pattern, so a `NaN` equals itself and an unchanged
/// entity is never reported as updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Textual rendering of a scalar; `None` for lists.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(x) => Some(x.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::List(_) => None,
        }
    }

    /// Exact equality, with scalars also compared through their text form
    /// so that selectors parsed from `field=value` strings can match
    /// numeric and boolean properties.
    pub fn matches(&self, other: &Self) -> bool {
        if self == other {
            return true;
        }
        match (self.as_text(), other.as_text()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PropertyValue {}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Property bag with deterministic ordering.
pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Deserialize)]
struct RawEntity {
    kind: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    name: String,
    #[serde(default)]
    properties: Properties,
    #[serde(default)]
    owner: Option<InstanceId>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl TryFrom<RawEntity> for Entity {
    type Error = Error;

    fn try_from(raw: RawEntity) -> Result<Self> {
        let key = EntityKey::new(raw.kind, raw.namespace, raw.name)?;
        Ok(Self {
            key,
            properties: raw.properties,
            owner: raw.owner,
        })
    }
}

/// A typed node in the graph.
///
/// Entities are never edited in place by the core; builder methods consume
/// and return a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEntity")]
pub struct Entity {
    #[serde(flatten)]
    key: EntityKey,
    properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<InstanceId>,
}

impl Entity {
    /// Create a validated entity with no properties.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if kind, namespace or name is malformed.
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::from_key(EntityKey::new(kind, namespace, name)?))
    }

    /// Create an entity from an already validated key.
    pub fn from_key(key: EntityKey) -> Self {
        Self {
            key,
            properties: Properties::new(),
            owner: None,
        }
    }

    /// Add or replace a property.
    #[must_use]
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Replace the whole property bag.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Tag the entity with its owning instance.
    #[must_use]
    pub fn with_owner(mut self, owner: InstanceId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub const fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn kind(&self) -> &str {
        &self.key.kind
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Look up a single property.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub const fn owner(&self) -> Option<&InstanceId> {
        self.owner.as_ref()
    }

    /// Same entity content, ignoring the owner tag.
    pub fn same_content(&self, other: &Self) -> bool {
        self.key == other.key && self.properties == other.properties
    }
}
