//! The bundle-copy utility's contract (§6): this crate does not extract
//! manifests from a container image filesystem (that remains an external
//! collaborator), but it does define the JSON artifact that utility writes
//! and verifies a produced manifest's digest against an expected one.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The state artifact the bundle-copy utility writes to a well-known path
/// after extracting manifests from an image filesystem.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BundleCopyManifest {
    pub digest: String,
    pub manifests: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DigestMismatch {
    #[error("expected digest {expected}, manifest reports {actual}")]
    Mismatch { expected: String, actual: String },
}

/// Verifies that `manifest.digest` matches `expected`, the digest the
/// controller recorded when it resolved this bundle's image reference.
pub fn verify_digest(manifest: &BundleCopyManifest, expected: &str) -> Result<(), DigestMismatch> {
    if manifest.digest == expected {
        Ok(())
    } else {
        Err(DigestMismatch::Mismatch {
            expected: expected.to_string(),
            actual: manifest.digest.clone(),
        })
    }
}

/// Computes a `sha256:`-prefixed content digest the way the bundle-copy
/// utility is expected to, for tests that construct a manifest in-process
/// rather than reading one off disk.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_digest_verifies() {
        let digest = content_digest(b"manifests");
        let manifest = BundleCopyManifest {
            digest: digest.clone(),
            manifests: vec![PathBuf::from("manifests/csv.yaml")],
        };
        assert!(verify_digest(&manifest, &digest).is_ok());
    }

    #[test]
    fn mismatched_digest_is_rejected() {
        let manifest = BundleCopyManifest {
            digest: "sha256:aaaa".into(),
            manifests: Vec::new(),
        };
        assert!(verify_digest(&manifest, "sha256:bbbb").is_err());
    }
}
