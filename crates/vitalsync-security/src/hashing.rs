// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SHA-256 hashing — certificate fingerprints and token hashes.

use sha2::{Digest, Sha256};
use vitalsync_core::error::VitalSyncError;

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
///
/// Used for certificate fingerprints (over the DER bytes) and for the
/// non-reversible token hashes kept in paired-device records.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Verify that `certificate_der` matches the expected fingerprint.
///
/// Returns `Ok(())` when the digest matches, or
/// `Err(VitalSyncError::FingerprintMismatch)` with both values when it does
/// not. Comparison is case-insensitive on the expected side since QR
/// payloads may carry uppercase hex.
pub fn verify_fingerprint(certificate_der: &[u8], expected_hex: &str) -> Result<(), VitalSyncError> {
    let actual = hash_bytes(certificate_der);
    if actual == expected_hex.to_ascii_lowercase() {
        Ok(())
    } else {
        Err(VitalSyncError::FingerprintMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SHA-256 of the empty byte slice (well-known constant).
    const EMPTY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hash_empty_input() {
        assert_eq!(hash_bytes(b""), EMPTY_SHA256);
    }

    #[test]
    fn hash_known_value() {
        // SHA-256("hello") — verified against coreutils sha256sum.
        let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(hash_bytes(b"hello"), expected);
    }

    #[test]
    fn verify_matching_fingerprint() {
        let data = b"certificate bytes";
        let hexdigest = hash_bytes(data);
        assert!(verify_fingerprint(data, &hexdigest).is_ok());
        // Uppercase expected values are accepted too.
        assert!(verify_fingerprint(data, &hexdigest.to_ascii_uppercase()).is_ok());
    }

    #[test]
    fn verify_mismatched_fingerprint() {
        let result = verify_fingerprint(b"a", "0000");
        match result.unwrap_err() {
            VitalSyncError::FingerprintMismatch { expected, actual } => {
                assert_eq!(expected, "0000");
                assert_eq!(actual, hash_bytes(b"a"));
            }
            other => panic!("unexpected error variant: {other}"),
        }
    }
}
