//! SHA-256 verification of downloaded bundles.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::package::error::{PackageError, PackageResult};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a file.
pub fn calculate_file_checksum(path: &Path) -> PackageResult<String> {
    let mut file = File::open(path).map_err(|e| PackageError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| PackageError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a file against the manifest hash of bundle `file`.
pub fn verify_checksum(path: &Path, file: &str, expected: &str) -> PackageResult<()> {
    let actual = calculate_file_checksum(path)?;
    if actual != expected {
        return Err(PackageError::ChecksumMismatch {
            file: file.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// [`verify_checksum`] on the blocking pool.
pub async fn verify_checksum_async(
    path: std::path::PathBuf,
    file: String,
    expected: String,
) -> PackageResult<()> {
    let join_path = path.clone();
    tokio::task::spawn_blocking(move || verify_checksum(&path, &file, &expected))
        .await
        .map_err(|e| PackageError::io(join_path, std::io::Error::other(e.to_string())))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // SHA-256 of "hello world"
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_checksum_known_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        assert_eq!(calculate_file_checksum(file.path()).unwrap(), HELLO_SHA256);
        assert!(verify_checksum(file.path(), "hello.bundle", HELLO_SHA256).is_ok());
    }

    #[test]
    fn test_checksum_mismatch_names_bundle() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"tampered").unwrap();
        file.flush().unwrap();

        let err = verify_checksum(file.path(), "hello.bundle", HELLO_SHA256).unwrap_err();
        match err {
            PackageError::ChecksumMismatch { file, expected, .. } => {
                assert_eq!(file, "hello.bundle");
                assert_eq!(expected, HELLO_SHA256);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_async_verify_missing_file() {
        let err = verify_checksum_async(
            "/no/such/file".into(),
            "x".into(),
            HELLO_SHA256.into(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PackageError::Io { .. }));
    }
}
