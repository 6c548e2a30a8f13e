use openssl::hash::MessageDigest;

use crate::errors::{LicenseError, Result};

/// Resolve a message digest from its protocol name.
///
/// Names are matched case-insensitively. Only the digests the license wire
/// format permits are accepted; anything else fails with
/// [`LicenseError::UnsupportedAlgorithm`].
pub fn hash_by_name(algorithm: &str) -> Result<MessageDigest> {
    match algorithm.to_lowercase().as_str() {
        "sha1" => Ok(MessageDigest::sha1()),
        "sha256" => Ok(MessageDigest::sha256()),
        "sha512" => Ok(MessageDigest::sha512()),
        other => Err(LicenseError::UnsupportedAlgorithm(format!(
            "unsupported hash function '{}'",
            other
        ))),
    }
}
