//! Error types for the identity layer.

use decdid_crypto::CryptoError;
use thiserror::Error;

/// Result type alias for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors that can occur while deriving DIDs, assembling metadata, or
/// running the enrollment and verification flows.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A structural problem in the input, detected before any crypto.
    #[error("invalid input at {path}: {reason}")]
    InputValidation {
        /// Path of the offending field, e.g. `fingers[2].minutiae[17]`.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A DID string does not parse or fails validation.
    #[error("invalid DID: {0}")]
    InvalidDid(String),

    /// A metadata document carries a version this build does not read.
    #[error("unsupported metadata version: {0}")]
    UnsupportedVersion(String),

    /// Inline metadata would exceed the on-chain size ceiling.
    #[error("metadata would be {size} bytes, ceiling is {limit}")]
    MetadataOversize {
        /// Serialized size with inline helpers.
        size: usize,
        /// The configured ceiling.
        limit: usize,
    },

    /// Serialization failure while producing canonical output.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A failure bubbled up from the cryptographic core.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl IdentityError {
    /// Stable exit code used by CLI and service wrappers.
    pub fn exit_code(&self) -> u8 {
        match self {
            IdentityError::InputValidation { .. }
            | IdentityError::InvalidDid(_)
            | IdentityError::UnsupportedVersion(_) => 2,
            IdentityError::MetadataOversize { .. } => 8,
            IdentityError::Serialization(_) => 9,
            IdentityError::Crypto(inner) => inner.exit_code(),
        }
    }
}

impl From<serde_json::Error> for IdentityError {
    fn from(err: serde_json::Error) -> Self {
        IdentityError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err = IdentityError::InputValidation {
            path: "fingers[0]".into(),
            reason: "duplicate".into(),
        };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            IdentityError::MetadataOversize {
                size: 20_000,
                limit: 16_384
            }
            .exit_code(),
            8
        );
        assert_eq!(
            IdentityError::Crypto(CryptoError::IntegrityFailed).exit_code(),
            5
        );
    }
}
