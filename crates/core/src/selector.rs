//! Field selectors: deferred references to entities by property value.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, PropertyValue};
use crate::error::Error;
use crate::result::Result;

/// Which part of an entity a selector compares against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorField {
    Name,
    Namespace,
    Property(String),
}

impl SelectorField {
    /// Parse a field path. `name` and `namespace` (optionally under
    /// `metadata.`) address identity; anything else, optionally under
    /// `spec.`, addresses a property.
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw {
            "" => None,
            "name" | "metadata.name" => Some(Self::Name),
            "namespace" | "metadata.namespace" => Some(Self::Namespace),
            other => {
                let prop = other.strip_prefix("spec.").unwrap_or(other);
                (!prop.is_empty()).then(|| Self::Property(prop.to_string()))
            }
        }
    }
}

impl fmt::Display for SelectorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => f.write_str("name"),
            Self::Namespace => f.write_str("namespace"),
            Self::Property(p) => f.write_str(p),
        }
    }
}

/// "Entity of kind K whose field F equals V", optionally restricted to a
/// namespace. Never persisted unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSelector {
    pub field: SelectorField,
    pub value: PropertyValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl FieldSelector {
    /// Parse the textual `field=value` form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] when `=` is missing or the field is empty.
    pub fn parse(selector: &str) -> Result<Self> {
        let (field, value) = selector
            .split_once('=')
            .ok_or_else(|| Error::invalid_selector(selector, "expected 'field=value'"))?;
        let field = SelectorField::parse(field)
            .ok_or_else(|| Error::invalid_selector(selector, "field is empty"))?;
        Ok(Self {
            field,
            value: PropertyValue::from(value.trim()),
            kind: None,
            namespace: None,
        })
    }

    /// Selector on a property with an already typed value.
    pub fn property(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            field: SelectorField::Property(name.into()),
            value: value.into(),
            kind: None,
            namespace: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Whether `entity` satisfies this selector.
    pub fn matches(&self, entity: &Entity) -> bool {
        if self.kind.as_deref().is_some_and(|k| k != entity.kind()) {
            return false;
        }
        if self
            .namespace
            .as_deref()
            .is_some_and(|ns| ns != entity.namespace())
        {
            return false;
        }
        match &self.field {
            SelectorField::Name => self.value.matches(&PropertyValue::from(entity.name())),
            SelectorField::Namespace => self
                .value
                .matches(&PropertyValue::from(entity.namespace())),
            SelectorField::Property(p) => entity
                .property(p)
                .is_some_and(|actual| actual.matches(&self.value)),
        }
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kind) = &self.kind {
            write!(f, "{kind}:")?;
        }
        let value = self.value.as_text().unwrap_or_else(|| "[..]".to_string());
        write!(f, "{}={value}", self.field)
    }
}
