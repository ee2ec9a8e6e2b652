//! Compatibility gate
//!
//! Every exported extension declares the range of host API versions it was
//! written against. The gate compares that range with [`HOST_API_VERSION`]
//! before the extension is invoked. A missing or unparsable range is treated
//! as unknown and rejected.

use semver::{Version, VersionReq};

use super::error::IncompatibilityReason;

/// API version of this host build
///
/// Bumped independently of the crate version: it only changes when the
/// `PluginHandle` contract changes.
pub const HOST_API_VERSION: &str = "1.0.0";

/// Helpers for building compatibility range strings
pub struct CompatibilityRange;

impl CompatibilityRange {
    /// Range accepting `min` (inclusive) up to `max` (exclusive)
    pub fn between(min: &str, max: &str) -> String {
        format!(">={}, <{}", min, max)
    }

    /// Range accepting any host from `min` up to the next major version
    pub fn from_major(min: &Version) -> String {
        Self::between(&min.to_string(), &format!("{}.0.0", min.major + 1))
    }
}

/// Check a declared range against a host version, explaining any rejection
pub fn check_compatibility(
    host_version: &str,
    range: Option<&str>,
) -> Result<(), IncompatibilityReason> {
    let range = match range.map(str::trim) {
        Some(range) if !range.is_empty() => range,
        _ => return Err(IncompatibilityReason::MissingRange),
    };

    let requirement =
        VersionReq::parse(range).map_err(|e| IncompatibilityReason::InvalidRange {
            range: range.to_string(),
            message: e.to_string(),
        })?;

    let host = Version::parse(host_version.trim()).map_err(|e| {
        IncompatibilityReason::InvalidHostVersion {
            version: host_version.to_string(),
            message: e.to_string(),
        }
    })?;

    if requirement.matches(&host) {
        Ok(())
    } else {
        Err(IncompatibilityReason::OutOfRange {
            required: requirement.to_string(),
            host: host.to_string(),
        })
    }
}

/// Pure yes/no form of [`check_compatibility`]
pub fn is_compatible(host_version: &str, range: Option<&str>) -> bool {
    check_compatibility(host_version, range).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_accepts_host_inside_bounds() {
        assert!(is_compatible("1.0.0", Some(">=1.0.0, <2.0.0")));
        assert!(is_compatible("1.9.3", Some(">=1.0.0, <2.0.0")));
        assert!(is_compatible(HOST_API_VERSION, Some("^1")));
    }

    #[test]
    fn test_upper_bound_is_exclusive() {
        assert!(!is_compatible("2.0.0", Some(">=1.0.0, <2.0.0")));
        assert!(matches!(
            check_compatibility("2.0.0", Some(">=1.0.0, <2.0.0")),
            Err(IncompatibilityReason::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_missing_range_fails_closed() {
        assert_eq!(
            check_compatibility("1.0.0", None),
            Err(IncompatibilityReason::MissingRange)
        );
        assert_eq!(
            check_compatibility("1.0.0", Some("   ")),
            Err(IncompatibilityReason::MissingRange)
        );
    }

    #[test]
    fn test_unparsable_range_fails_closed() {
        assert!(matches!(
            check_compatibility("1.0.0", Some("one point oh")),
            Err(IncompatibilityReason::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_unparsable_host_version() {
        assert!(matches!(
            check_compatibility("v1", Some(">=1.0.0")),
            Err(IncompatibilityReason::InvalidHostVersion { .. })
        ));
    }

    #[test]
    fn test_between_builds_half_open_range() {
        let range = CompatibilityRange::between("1.2.0", "3.0.0");
        assert_eq!(range, ">=1.2.0, <3.0.0");
        assert!(is_compatible("2.5.0", Some(&range)));
        assert!(!is_compatible("1.1.9", Some(&range)));
        assert!(!is_compatible("3.0.0", Some(&range)));
    }

    #[test]
    fn test_from_major() {
        let range = CompatibilityRange::from_major(&Version::new(1, 4, 0));
        assert_eq!(range, ">=1.4.0, <2.0.0");
    }
}
