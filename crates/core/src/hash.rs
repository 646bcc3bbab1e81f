use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, MoveError, MoveStage, Result};

const CHUNK_SIZE: usize = 1024 * 128;

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Case-insensitive digest comparison.
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self
    }

    pub fn compute_hash(&self, path: &Path) -> Result<String> {
        sha256_file(path).map_err(|e| Error::from(MoveError::io(MoveStage::Hash, path, e)))
    }

    /// Recomputes the digest of `path` and checks it against `expected`.
    pub fn verify(&self, path: &Path, expected: &str) -> std::result::Result<(), MoveError> {
        let actual =
            sha256_file(path).map_err(|e| MoveError::io(MoveStage::Verify, path, e))?;
        if hashes_match(&actual, expected) {
            Ok(())
        } else {
            Err(MoveError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_ascii_lowercase(),
                actual,
            })
        }
    }
}
