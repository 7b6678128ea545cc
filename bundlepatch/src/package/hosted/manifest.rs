//! Package manifest documents.
//!
//! ```json
//! {
//!   "package": "main",
//!   "version": "2024.06.01",
//!   "bundles": [
//!     { "name": "ui_common.bundle", "hash": "9f2c…", "size": 52311, "tags": ["ui"] }
//!   ]
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::package::error::{PackageError, PackageResult};

/// One bundle file listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// File name on the host server.
    pub name: String,
    /// Lowercase hex SHA-256 of the file; also its cache file name.
    pub hash: String,
    /// Size in bytes.
    pub size: u64,
    /// Content tags used for download groups.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BundleEntry {
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

/// Every bundle of one package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub package: String,
    pub version: String,
    #[serde(default)]
    pub bundles: Vec<BundleEntry>,
}

impl PackageManifest {
    /// Parse and validate manifest JSON for `package`.
    pub fn from_json(text: &str, package: &str) -> PackageResult<Self> {
        let manifest: Self =
            serde_json::from_str(text).map_err(|e| PackageError::InvalidManifest {
                package: package.to_string(),
                reason: e.to_string(),
            })?;

        if manifest.package != package {
            return Err(PackageError::InvalidManifest {
                package: package.to_string(),
                reason: format!("manifest is for package '{}'", manifest.package),
            });
        }

        let mut names = HashSet::new();
        for bundle in &manifest.bundles {
            if !names.insert(bundle.name.as_str()) {
                return Err(PackageError::InvalidManifest {
                    package: package.to_string(),
                    reason: format!("duplicate bundle '{}'", bundle.name),
                });
            }
            if !is_sha256_hex(&bundle.hash) {
                return Err(PackageError::InvalidManifest {
                    package: package.to_string(),
                    reason: format!("bundle '{}' has an invalid hash", bundle.name),
                });
            }
        }

        Ok(manifest)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Bundles selected by `tags`; `None` or empty selects all of them.
    pub fn select<'a>(
        &'a self,
        tags: Option<&'a [String]>,
    ) -> impl Iterator<Item = &'a BundleEntry> + 'a {
        self.bundles.iter().filter(move |b| match tags {
            Some(tags) if !tags.is_empty() => b.has_any_tag(tags),
            _ => true,
        })
    }

    pub fn contains_bundle(&self, name: &str) -> bool {
        self.bundles.iter().any(|b| b.name == name)
    }

    /// Hashes (cache file names) this manifest keeps alive.
    pub fn referenced_hashes(&self) -> HashSet<&str> {
        self.bundles.iter().map(|b| b.hash.as_str()).collect()
    }
}

/// Name of the file holding a package's latest version on the host.
pub fn version_file_name(package: &str) -> String {
    format!("{}.version", package)
}

/// Name of the manifest file for `version` on the host.
pub fn manifest_file_name(package: &str, version: &str) -> String {
    format!("{}_{}.json", package, version)
}

fn is_sha256_hex(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    fn manifest_json() -> String {
        format!(
            r#"{{"package":"main","version":"7","bundles":[
                {{"name":"ui.bundle","hash":"{}","size":10,"tags":["ui"]}},
                {{"name":"music.bundle","hash":"{}","size":20,"tags":["audio"]}},
                {{"name":"core.bundle","hash":"{}","size":30}}
            ]}}"#,
            hash('a'),
            hash('b'),
            hash('c')
        )
    }

    #[test]
    fn test_parse_and_select() {
        let manifest = PackageManifest::from_json(&manifest_json(), "main").unwrap();
        assert_eq!(manifest.bundles.len(), 3);

        let ui = vec!["ui".to_string()];
        let names: Vec<_> = manifest.select(Some(ui.as_slice())).map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["ui.bundle"]);

        assert_eq!(manifest.select(None).count(), 3);
        assert_eq!(manifest.select(Some(&[][..])).count(), 3);
        assert!(manifest.contains_bundle("core.bundle"));
        assert!(manifest.referenced_hashes().contains(hash('b').as_str()));
    }

    #[test]
    fn test_rejects_other_package() {
        let err = PackageManifest::from_json(&manifest_json(), "dlc").unwrap_err();
        assert!(matches!(err, PackageError::InvalidManifest { .. }));
    }

    #[test]
    fn test_rejects_bad_hash_and_duplicates() {
        let bad_hash = r#"{"package":"main","version":"1","bundles":[{"name":"a","hash":"xyz","size":1}]}"#;
        assert!(PackageManifest::from_json(bad_hash, "main").is_err());

        let dup = format!(
            r#"{{"package":"main","version":"1","bundles":[{{"name":"a","hash":"{0}","size":1}},{{"name":"a","hash":"{0}","size":1}}]}}"#,
            hash('d')
        );
        assert!(PackageManifest::from_json(&dup, "main").is_err());
    }

    #[test]
    fn test_file_names() {
        assert_eq!(version_file_name("main"), "main.version");
        assert_eq!(manifest_file_name("main", "2024.1"), "main_2024.1.json");
    }
}
