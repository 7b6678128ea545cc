//! Free disk space queries.

use std::path::Path;

/// Answers how many bytes are free on the volume holding a path.
pub trait DiskSpaceProbe: Send + Sync {
    /// Free bytes, or `None` when the platform cannot tell.
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Probe backed by `statvfs(3)`.
///
/// The path does not need to exist yet; its nearest existing ancestor is
/// queried instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl DiskSpaceProbe for StatvfsProbe {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        let existing = path.ancestors().find(|p| p.exists())?;
        statvfs_available(existing).ok()
    }
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)] // field types vary by platform
fn statvfs_available(path: &Path) -> Result<u64, std::io::Error> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: c_path is NUL-terminated and stat points to writable memory
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

    if result == 0 {
        // SAFETY: statvfs succeeded, stat is now initialized
        let stat = unsafe { stat.assume_init() };
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn statvfs_available(_path: &Path) -> Result<u64, std::io::Error> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "free space query not supported on this platform",
    ))
}

/// Probe reporting a fixed amount, for hosts that manage their own quota.
#[derive(Debug, Clone, Copy)]
pub struct FixedDiskSpace(pub Option<u64>);

impl DiskSpaceProbe for FixedDiskSpace {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}

/// Whole megabytes in `bytes`.
pub fn bytes_to_mb(bytes: u64) -> u64 {
    bytes >> 20
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_statvfs_reports_space_for_missing_child() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not").join("yet");
        let free = StatvfsProbe.available_bytes(&missing);
        assert!(free.is_some());
    }

    #[test]
    fn test_fixed_probe() {
        assert_eq!(FixedDiskSpace(Some(42)).available_bytes(Path::new("/")), Some(42));
        assert_eq!(FixedDiskSpace(None).available_bytes(Path::new("/")), None);
    }

    #[test]
    fn test_bytes_to_mb_truncates() {
        assert_eq!(bytes_to_mb(100 << 20), 100);
        assert_eq!(bytes_to_mb((1 << 20) - 1), 0);
    }
}
