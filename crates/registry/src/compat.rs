//! Framework compatibility checks.

use graphsync_core::{Error, ProviderDescriptor, Result};
use semver::Version;

/// Verdict for a provider that is allowed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    /// Loads, but the operator should know why.
    Warning(String),
}

/// Compare a provider's minimum framework version with the running one.
///
/// A MAJOR mismatch is fatal. A same-major requirement newer in MINOR or
/// PATCH only warns.
///
/// # Errors
///
/// Returns [`Error::Compatibility`] on a major version mismatch.
pub fn check_compatibility(
    descriptor: &ProviderDescriptor,
    framework: &Version,
) -> Result<Compatibility> {
    let required = &descriptor.min_framework_version;
    if required.major != framework.major {
        return Err(Error::compatibility(
            &descriptor.name,
            format!("requires framework {required}, running {framework}"),
        ));
    }
    if required > framework {
        return Ok(Compatibility::Warning(format!(
            "provider '{}' targets framework {required}, running {framework}; \
             some features may be unavailable",
            descriptor.name
        )));
    }
    Ok(Compatibility::Compatible)
}

/// Notice to log on each tick of a deprecated provider.
pub fn deprecation_notice(descriptor: &ProviderDescriptor) -> Option<String> {
    descriptor.deprecation.as_ref().map(|d| {
        let mut notice = format!("provider '{}' is deprecated", descriptor.name);
        if let Some(replacement) = &d.replacement {
            notice.push_str(&format!("; use '{replacement}' instead"));
        }
        if let Some(message) = &d.message {
            notice.push_str(&format!(": {message}"));
        }
        notice
    })
}

/// Parse the running framework version.
///
/// # Errors
///
/// Returns [`Error::Config`] if `raw` is not a semantic version.
pub fn parse_framework_version(raw: &str) -> Result<Version> {
    Version::parse(raw)
        .map_err(|e| Error::config(format!("invalid framework version '{raw}': {e}")))
}
