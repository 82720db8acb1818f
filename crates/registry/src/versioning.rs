//! Config schema versions for provider options, with stepwise migrations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use graphsync_core::{Error, Result};

/// Upgrades provider options from version `v` to `v + 1`.
pub type Migration = fn(serde_json::Value) -> Result<serde_json::Value>;

/// Metadata about one options schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigVersionInfo {
    pub version: u32,
    pub deprecated: bool,
    pub removal_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl ConfigVersionInfo {
    pub const fn new(version: u32) -> Self {
        Self {
            version,
            deprecated: false,
            removal_at: None,
            message: None,
        }
    }

    #[must_use]
    pub fn deprecated(mut self, removal_at: Option<DateTime<Utc>>, message: Option<&str>) -> Self {
        self.deprecated = true;
        self.removal_at = removal_at;
        self.message = message.map(str::to_string);
        self
    }

    /// Unsupported once the removal date has passed.
    pub fn is_supported(&self, now: DateTime<Utc>) -> bool {
        self.removal_at.is_none_or(|at| now <= at)
    }

    pub fn days_until_removal(&self, now: DateTime<Utc>) -> Option<i64> {
        self.removal_at.map(|at| (at - now).num_days().max(0))
    }
}

/// Which options versions a provider accepts and how to upgrade them.
#[derive(Debug, Clone)]
pub struct ConfigVersionSupport {
    current: u32,
    versions: BTreeMap<u32, ConfigVersionInfo>,
    migrations: BTreeMap<u32, Migration>,
}

impl ConfigVersionSupport {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `current` is not among `versions`.
    pub fn new(
        current: u32,
        versions: impl IntoIterator<Item = ConfigVersionInfo>,
        migrations: impl IntoIterator<Item = (u32, Migration)>,
    ) -> Result<Self> {
        let versions: BTreeMap<_, _> = versions.into_iter().map(|v| (v.version, v)).collect();
        if !versions.contains_key(&current) {
            return Err(Error::config(format!(
                "current config version {current} is not among the supported versions"
            )));
        }
        Ok(Self {
            current,
            versions,
            migrations: migrations.into_iter().collect(),
        })
    }

    pub const fn current(&self) -> u32 {
        self.current
    }

    pub fn info(&self, version: u32) -> Option<&ConfigVersionInfo> {
        self.versions.get(&version)
    }

    pub fn is_supported(&self, version: u32, now: DateTime<Utc>) -> bool {
        self.versions
            .get(&version)
            .is_some_and(|info| info.is_supported(now))
    }

    /// Warning text for a deprecated version, `None` otherwise.
    pub fn deprecation_warning(&self, version: u32, now: DateTime<Utc>) -> Option<String> {
        let info = self.versions.get(&version).filter(|i| i.deprecated)?;
        let mut warning = format!("config version {version} is deprecated.");
        if let Some(message) = &info.message {
            warning.push(' ');
            warning.push_str(message);
        }
        match (info.days_until_removal(now), info.removal_at) {
            (Some(0), _) => warning.push_str(" Will be removed today!"),
            (Some(days), _) if days <= 30 => {
                warning.push_str(&format!(" Will be removed in {days} days!"));
            }
            (Some(_), Some(at)) => {
                warning.push_str(&format!(" Will be removed on {}.", at.date_naive()));
            }
            _ => {}
        }
        warning.push_str(&format!(" Please migrate to version {}.", self.current));
        Some(warning)
    }

    /// Upgrade `options` from `from` to the current version, one step at a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Compatibility`] for a removed, unknown or newer
    /// version, or a missing migration step. Errors raised by a migration
    /// function are returned as is.
    pub fn migrate(
        &self,
        provider: &str,
        options: serde_json::Value,
        from: u32,
        now: DateTime<Utc>,
    ) -> Result<serde_json::Value> {
        if from == self.current {
            return Ok(options);
        }
        if from > self.current {
            return Err(Error::compatibility(
                provider,
                format!(
                    "config version {from} is newer than supported version {}",
                    self.current
                ),
            ));
        }
        if !self.is_supported(from, now) {
            return Err(Error::compatibility(
                provider,
                format!(
                    "config version {from} is no longer supported; current version is {}",
                    self.current
                ),
            ));
        }

        tracing::debug!(provider, from, to = self.current, "Migrating provider options");
        (from..self.current).try_fold(options, |acc, step| {
            let migrate = self.migrations.get(&step).ok_or_else(|| {
                Error::compatibility(
                    provider,
                    format!("no migration from config version {step} to {}", step + 1),
                )
            })?;
            migrate(acc)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn rename_org(mut options: serde_json::Value) -> Result<serde_json::Value> {
        if let Some(map) = options.as_object_mut() {
            if let Some(org) = map.remove("org") {
                map.insert("organization".into(), org);
            }
        }
        Ok(options)
    }

    fn add_default_topics(mut options: serde_json::Value) -> Result<serde_json::Value> {
        if let Some(map) = options.as_object_mut() {
            map.entry("topics").or_insert_with(|| json!([]));
        }
        Ok(options)
    }

    fn support(now: DateTime<Utc>) -> ConfigVersionSupport {
        ConfigVersionSupport::new(
            3,
            [
                ConfigVersionInfo::new(1)
                    .deprecated(Some(now - Duration::days(1)), Some("Field names changed.")),
                ConfigVersionInfo::new(2).deprecated(Some(now + Duration::days(10)), None),
                ConfigVersionInfo::new(3),
            ],
            [(1, rename_org as Migration), (2, add_default_topics as Migration)],
        )
        .unwrap()
    }

    #[test]
    fn test_current_must_be_declared() {
        let result = ConfigVersionSupport::new(2, [ConfigVersionInfo::new(1)], []);
        assert!(result.is_err());
    }

    #[test]
    fn test_migrate_stepwise_to_current() {
        let now = Utc::now();
        let migrated = support(now)
            .migrate("github", json!({"org": "acme"}), 2, now)
            .unwrap();
        assert_eq!(migrated, json!({"org": "acme", "topics": []}));
    }

    #[test]
    fn test_removed_version_is_incompatible() {
        let now = Utc::now();
        let err = support(now)
            .migrate("github", json!({"org": "acme"}), 1, now)
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_newer_version_is_incompatible() {
        let now = Utc::now();
        assert!(support(now).migrate("github", json!({}), 4, now).is_err());
    }

    #[test]
    fn test_current_version_passes_through() {
        let now = Utc::now();
        let options = json!({"organization": "acme"});
        assert_eq!(
            support(now).migrate("github", options.clone(), 3, now).unwrap(),
            options
        );
    }

    #[test]
    fn test_deprecation_warning_counts_days() {
        let now = Utc::now();
        let warning = support(now).deprecation_warning(2, now).unwrap();
        assert!(warning.contains("days"));
        assert!(warning.contains("version 3"));
        assert!(support(now).deprecation_warning(3, now).is_none());
    }
}
