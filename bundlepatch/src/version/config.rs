//! App config document and version comparison.

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use super::error::{VersionError, VersionResult};

/// Which components of the app version must match.
///
/// With `patch` off only `major.minor` is compared, so patch-level app
/// releases keep using the same content line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticRule {
    #[serde(rename = "MAJOR", default = "enabled")]
    pub major: bool,
    #[serde(rename = "MINOR", default = "enabled")]
    pub minor: bool,
    #[serde(rename = "PATCH", default)]
    pub patch: bool,
}

fn enabled() -> bool {
    true
}

impl Default for SemanticRule {
    fn default() -> Self {
        Self {
            major: true,
            minor: true,
            patch: false,
        }
    }
}

impl SemanticRule {
    /// Rule comparing the full `major.minor.patch` triple.
    pub fn full() -> Self {
        Self {
            patch: true,
            ..Self::default()
        }
    }

    /// Rule comparing `major.minor` only.
    pub fn major_minor() -> Self {
        Self::default()
    }
}

/// A parsed application version.
///
/// Two-component versions such as `1.4` are accepted and read as `1.4.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppVersion(Version);

impl AppVersion {
    /// Parse a version string.
    pub fn parse(raw: &str) -> VersionResult<Self> {
        let trimmed = raw.trim();
        let padded = match trimmed.split('.').count() {
            1 => format!("{trimmed}.0.0"),
            2 => format!("{trimmed}.0"),
            _ => trimmed.to_string(),
        };
        Version::parse(&padded)
            .map(Self)
            .map_err(|e| VersionError::InvalidVersion {
                value: raw.to_string(),
                reason: e.to_string(),
            })
    }

    /// Whether `self` and `other` are the same release under `rule`.
    pub fn matches(&self, other: &AppVersion, rule: SemanticRule) -> bool {
        if rule.patch {
            self.0 == other.0
        } else {
            self.0.major == other.0.major && self.0.minor == other.0.minor
        }
    }

    /// Version truncated to the components `rule` compares.
    pub fn number(&self, rule: SemanticRule) -> String {
        if rule.patch {
            self.0.to_string()
        } else {
            format!("{}.{}", self.0.major, self.0.minor)
        }
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }
}

impl FromStr for AppVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contents of an `appconfig.json` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(rename = "PLATFORM", default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(
        rename = "PRODUCT_NAME",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub product_name: Option<String>,
    #[serde(rename = "APP_VERSION")]
    pub app_version: String,
    #[serde(
        rename = "SEMANTIC_RULE",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub semantic_rule: Option<SemanticRule>,
}

impl AppConfig {
    /// Config carrying only a version.
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            platform: None,
            product_name: None,
            app_version: app_version.into(),
            semantic_rule: None,
        }
    }

    /// Parse config JSON; `source_name` is used in error messages.
    pub fn from_json(text: &str, source_name: &str) -> VersionResult<Self> {
        serde_json::from_str(text).map_err(|e| VersionError::InvalidConfig {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Pretty JSON for writing to the sandbox.
    pub fn to_json(&self) -> String {
        // A struct of strings and bools always serializes.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Parsed `APP_VERSION`.
    pub fn version(&self) -> VersionResult<AppVersion> {
        AppVersion::parse(&self.app_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_pads_short_versions() {
        assert_eq!(AppVersion::parse("1.4").unwrap().to_string(), "1.4.0");
        assert_eq!(AppVersion::parse(" 2 ").unwrap().to_string(), "2.0.0");
        assert_eq!(AppVersion::parse("1.2.3").unwrap().patch(), 3);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(AppVersion::parse("one.two").is_err());
        assert!(AppVersion::parse("").is_err());
    }

    #[test]
    fn test_patch_only_delta() {
        let a = AppVersion::parse("1.2.3").unwrap();
        let b = AppVersion::parse("1.2.4").unwrap();
        assert!(!a.matches(&b, SemanticRule::full()));
        assert!(a.matches(&b, SemanticRule::major_minor()));
    }

    #[test]
    fn test_number_granularity() {
        let v = AppVersion::parse("3.7.9").unwrap();
        assert_eq!(v.number(SemanticRule::full()), "3.7.9");
        assert_eq!(v.number(SemanticRule::major_minor()), "3.7");
    }

    #[test]
    fn test_app_config_json_keys() {
        let config = AppConfig::from_json(
            r#"{"PLATFORM":"linux","APP_VERSION":"1.0.2","SEMANTIC_RULE":{"MAJOR":true,"MINOR":true,"PATCH":true}}"#,
            "test",
        )
        .unwrap();
        assert_eq!(config.platform.as_deref(), Some("linux"));
        assert_eq!(config.semantic_rule, Some(SemanticRule::full()));

        let json = AppConfig::new("2.0.0").to_json();
        assert!(json.contains("\"APP_VERSION\": \"2.0.0\""));
        assert!(!json.contains("PLATFORM"));
    }

    #[test]
    fn test_app_config_missing_version() {
        let err = AppConfig::from_json(r#"{"PLATFORM":"linux"}"#, "remote").unwrap_err();
        assert!(matches!(err, VersionError::InvalidConfig { .. }));
    }

    proptest! {
        #[test]
        fn prop_full_rule_is_equality(
            a in (0u64..5, 0u64..5, 0u64..5),
            b in (0u64..5, 0u64..5, 0u64..5),
        ) {
            let va = AppVersion::parse(&format!("{}.{}.{}", a.0, a.1, a.2)).unwrap();
            let vb = AppVersion::parse(&format!("{}.{}.{}", b.0, b.1, b.2)).unwrap();
            prop_assert_eq!(va.matches(&vb, SemanticRule::full()), a == b);
        }

        #[test]
        fn prop_major_minor_rule_ignores_patch(
            major in 0u64..5,
            minor in 0u64..5,
            p1 in 0u64..50,
            p2 in 0u64..50,
        ) {
            let va = AppVersion::parse(&format!("{major}.{minor}.{p1}")).unwrap();
            let vb = AppVersion::parse(&format!("{major}.{minor}.{p2}")).unwrap();
            prop_assert!(va.matches(&vb, SemanticRule::major_minor()));
            prop_assert_eq!(va.matches(&vb, SemanticRule::full()), p1 == p2);
        }
    }
}
