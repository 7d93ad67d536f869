//! SHA-256 content hashing for patch verification.
//!
//! Patch entries carry the expected hash of a file before and after the
//! patch is applied. Hashes are lowercase hex SHA-256 over the raw bytes.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{SyncError, SyncResult};

/// Buffer size for reading files during hashing (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Hash the contents of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> SyncResult<String> {
    let mut file = File::open(path).map_err(|e| SyncError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| SyncError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Require that `data` hashes to `expected`.
///
/// `path` is only used to describe the mismatch.
pub fn verify_bytes(path: &Path, data: &[u8], expected: &str) -> SyncResult<()> {
    let actual = hash_bytes(data);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(SyncError::HashMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Compare two hex digests, ignoring case.
pub fn same_hash(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
