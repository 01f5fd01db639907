#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic DID derivation and identity flows for decdid.
//!
//! Builds on `decdid-crypto` to provide the outward-facing identity
//! operations:
//! - `did:cardano` derivation from an aggregated master key
//! - canonical metadata records with inline or content-addressed
//!   helper references under the on-chain size ceiling
//! - the enrollment and verification pipelines that chain
//!   quantization, fuzzy extraction, and aggregation
//!
//! The DID is a fixed hash of the master key and the network, and
//! nothing else: wallet addresses and enrollment time never feed the
//! derivation, and whoever reproduces the master key from an
//! enrollment's helper data reproduces its DID.

pub mod did;
pub mod enrollment;
pub mod error;
pub mod metadata;
pub mod verification;

pub use did::{id_hash, id_hash_hex, CardanoDid, Network, DID_METHOD};
pub use enrollment::{enroll, Enrollment, EnrollmentRequest, IdentityConfig, DEFAULT_CTX};
pub use error::{IdentityError, IdentityResult};
pub use metadata::{
    BiometricMetadata, ExternalHelperStore, HelperRef, MetadataAssembler, METADATA_MAX_BYTES,
    METADATA_VERSION,
};
pub use verification::{verify, Verification, VerificationRequest};
