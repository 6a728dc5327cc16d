//! Content integrity: SHA-256 of staged files and comparison against the
//! hash a registry (or a pinned spec) expects.
//!
//! Hashing runs after a transfer completes, never inline with it.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

/// Outcome of comparing a file against an expected digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Match,
    Mismatch { expected: String, actual: String },
}

impl Verification {
    pub fn is_match(&self) -> bool {
        matches!(self, Verification::Match)
    }
}

/// Compute SHA-256 of a file and return the digest as lowercase hex.
/// Reads in chunks to keep memory use bounded; suitable for multi-GB weights.
pub fn sha256_path(path: &Path) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash `path` and compare against `expected`, ignoring case and surrounding whitespace.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<Verification> {
    let actual = sha256_path(path)?;
    let expected = normalize(expected);
    if actual == expected {
        Ok(Verification::Match)
    } else {
        Ok(Verification::Mismatch { expected, actual })
    }
}

/// Lowercase and trim a hex digest for comparison.
pub fn normalize(digest: &str) -> String {
    digest.trim().to_ascii_lowercase()
}

/// True when `s` looks like a SHA-256 hex digest (64 hex chars, any case).
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HELLO_SHA: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn sha256_path_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let digest = sha256_path(f.path()).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn verify_is_case_insensitive() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let upper = HELLO_SHA.to_ascii_uppercase();
        assert_eq!(verify_sha256(f.path(), &upper).unwrap(), Verification::Match);
        assert!(verify_sha256(f.path(), &format!(" {} ", HELLO_SHA))
            .unwrap()
            .is_match());
    }

    #[test]
    fn verify_reports_mismatch() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"tampered\n").unwrap();
        f.flush().unwrap();
        match verify_sha256(f.path(), HELLO_SHA).unwrap() {
            Verification::Mismatch { expected, actual } => {
                assert_eq!(expected, HELLO_SHA);
                assert_ne!(actual, HELLO_SHA);
            }
            Verification::Match => panic!("expected mismatch"),
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sha256_path(&dir.path().join("nope.safetensors")).is_err());
    }

    #[test]
    fn sha256_hex_shape() {
        assert!(is_sha256_hex(HELLO_SHA));
        assert!(is_sha256_hex(&HELLO_SHA.to_ascii_uppercase()));
        assert!(!is_sha256_hex("abc"));
        assert!(!is_sha256_hex(&"z".repeat(64)));
    }
}
