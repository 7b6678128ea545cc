//! Query services answering where a bundle already is.
//!
//! - [`BuiltinQuery`]: is the bundle shipped with the installation?
//! - [`DeliveryQuery`]: is the bundle available from a platform delivery
//!   location (side-loaded content, expansion files)?
//!
//! Bundles answered by either service are never downloaded.

use std::path::{Path, PathBuf};

/// Answers whether a bundle ships with the installation.
pub trait BuiltinQuery: Send + Sync {
    fn is_builtin(&self, package: &str, file_name: &str) -> bool;
}

/// Answers where a bundle can be loaded from outside the cache.
pub trait DeliveryQuery: Send + Sync {
    fn delivery_path(&self, package: &str, file_name: &str) -> Option<PathBuf>;
}

/// Looks for `<root>/<package>/<file>` in the installation directory.
#[derive(Debug, Clone)]
pub struct InstallationQuery {
    root: PathBuf,
}

impl InstallationQuery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BuiltinQuery for InstallationQuery {
    fn is_builtin(&self, package: &str, file_name: &str) -> bool {
        self.root.join(package).join(file_name).is_file()
    }
}

/// Delivery query for platforms without delivery locations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeliveryQuery;

impl DeliveryQuery for NoDeliveryQuery {
    fn delivery_path(&self, _package: &str, _file_name: &str) -> Option<PathBuf> {
        None
    }
}
