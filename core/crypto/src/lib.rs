#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Biometric cryptographic core for the decdid identity system.
//!
//! This crate implements the primitives that turn noisy fingerprint
//! captures into a stable master key:
//! - Quantizer: minutiae lists into fixed 512-bit templates
//! - Fuzzy extractor: BCH(127, 64, 10) secure sketch, BLAKE2b key
//!   derivation, HMAC-SHA-256 helper integrity
//! - Aggregator: XOR combination of per-finger shares with
//!   quality-weighted fallback, rotation, and revocation
//!
//! All entry points are synchronous and own no shared mutable state;
//! secret byte arrays are zeroized on drop and compared in constant
//! time. DID derivation and metadata assembly live in
//! `decdid-identity`.

pub mod aggregate;
pub mod bch;
pub mod error;
pub mod fuzzy;
pub mod kdf;
pub mod minutiae;
pub mod quantizer;

pub use aggregate::{
    aggregate, AggregationMode, AggregationOutcome, AggregationResult, EnrollmentBundle,
    FallbackPolicy, MasterKey, RecoveredShare, MAX_FINGERS, MIN_FINGERS,
};
pub use error::{CryptoError, CryptoResult};
pub use fuzzy::{FingerKey, HelperData, ALGORITHM_TAG, HELPER_LEN};
pub use minutiae::{Capture, FingerId, Minutia};
pub use quantizer::{quantize, QuantizerConfig, Template, TEMPLATE_BITS};
