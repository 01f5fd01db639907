//! Enrollment: captures in, DID plus metadata plus helper bundle out.

use crate::did::{id_hash_hex, CardanoDid, Network};
use crate::error::{IdentityError, IdentityResult};
use crate::metadata::{BiometricMetadata, MetadataAssembler};
use chrono::Utc;
use decdid_crypto::aggregate::{aggregate, AggregationMode, RecoveredShare};
use decdid_crypto::minutiae::{Capture, MAX_MINUTIAE, MIN_MINUTIAE};
use decdid_crypto::quantizer::{quantize, QuantizerConfig};
use decdid_crypto::{fuzzy, EnrollmentBundle, FallbackPolicy, MasterKey, MAX_FINGERS, MIN_FINGERS};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Default enrollment context mixed into helper personalization.
pub const DEFAULT_CTX: &[u8] = b"decdid/v1";

/// Explicit per-call configuration for the identity flows.
///
/// There is no process-wide state: every enrollment or verification
/// call receives the full configuration it runs under.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Network DIDs are derived for.
    pub network: Network,
    /// Domain context bound into helper personalization.
    pub ctx: Vec<u8>,
    /// Quantizer settings.
    pub quantizer: QuantizerConfig,
    /// Finger selection policy applied at verification.
    pub aggregation: AggregationMode,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            ctx: DEFAULT_CTX.to_vec(),
            quantizer: QuantizerConfig::default(),
            aggregation: AggregationMode::Fallback(FallbackPolicy::default()),
        }
    }
}

/// Parsed enrollment input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    /// Input schema version, `"1.0"`.
    pub version: String,
    /// Wallet that will control the DID. Never feeds key derivation.
    pub wallet_address: String,
    /// Network to anchor the DID to.
    pub network: Network,
    /// One capture per enrolled finger.
    pub fingers: Vec<Capture>,
}

/// The outcome of a successful enrollment.
#[derive(Debug)]
pub struct Enrollment {
    /// The subject's DID.
    pub did: CardanoDid,
    /// The assembled metadata record.
    pub metadata: BiometricMetadata,
    /// Per-finger shares and helpers, for rotation and recovery flows.
    pub bundle: EnrollmentBundle,
    /// The aggregated master key, for upstream key management.
    pub master_key: MasterKey,
}

/// Validate the structural shape of a capture list.
///
/// Reports the path of the first offending field so the caller can fix
/// and retry. Runs before any cryptographic work.
pub(crate) fn validate_captures(
    captures: &[Capture],
    min_fingers: usize,
) -> IdentityResult<()> {
    if captures.len() < min_fingers || captures.len() > MAX_FINGERS {
        return Err(IdentityError::InputValidation {
            path: "fingers".into(),
            reason: format!(
                "expected {min_fingers}..={MAX_FINGERS} captures, got {}",
                captures.len()
            ),
        });
    }
    let mut seen = BTreeSet::new();
    for (i, capture) in captures.iter().enumerate() {
        if !seen.insert(capture.finger_id) {
            return Err(IdentityError::InputValidation {
                path: format!("fingers[{i}].finger_id"),
                reason: format!("duplicate finger {}", capture.finger_id),
            });
        }
        if capture.quality > 100 {
            return Err(IdentityError::InputValidation {
                path: format!("fingers[{i}].quality"),
                reason: format!("quality {} out of 0..=100", capture.quality),
            });
        }
        let count = capture.minutiae.len();
        if !(MIN_MINUTIAE..=MAX_MINUTIAE).contains(&count) {
            return Err(IdentityError::InputValidation {
                path: format!("fingers[{i}].minutiae"),
                reason: format!("expected {MIN_MINUTIAE}..={MAX_MINUTIAE} minutiae, got {count}"),
            });
        }
        for (j, m) in capture.minutiae.iter().enumerate() {
            if !m.in_bounds() {
                return Err(IdentityError::InputValidation {
                    path: format!("fingers[{i}].minutiae[{j}]"),
                    reason: "coordinate or angle out of range".into(),
                });
            }
        }
    }
    Ok(())
}

/// Enroll a person from fresh captures.
///
/// Quantizes every capture, extracts a key share and helper per
/// finger, aggregates the shares under the strict policy, derives the
/// DID, and assembles metadata. The wallet address becomes the first
/// controller and nothing more: it never reaches key or DID
/// derivation.
pub fn enroll<R: CryptoRng + RngCore>(
    request: &EnrollmentRequest,
    config: &IdentityConfig,
    assembler: &MetadataAssembler,
    rng: &mut R,
) -> IdentityResult<Enrollment> {
    if request.version != "1.0" {
        return Err(IdentityError::InputValidation {
            path: "version".into(),
            reason: format!("unsupported input version {}", request.version),
        });
    }
    validate_captures(&request.fingers, MIN_FINGERS)?;

    let mut entries = Vec::with_capacity(request.fingers.len());
    let mut shares = BTreeMap::new();
    for capture in &request.fingers {
        let template = quantize(capture, &config.quantizer)?;
        let (share, helper) = fuzzy::gen(&template, capture.finger_id, &config.ctx, rng)?;
        shares.insert(
            capture.finger_id,
            RecoveredShare {
                key: share.clone(),
                quality: capture.quality,
            },
        );
        entries.push((capture.finger_id, share, helper));
        debug!(finger = %capture.finger_id, "finger enrolled");
    }

    let bundle = EnrollmentBundle::new(entries)?;
    let enrolled = bundle.finger_ids();
    // Enrollment always aggregates the full finger set; fallback
    // subsets are a verification-time policy.
    let result = aggregate(&enrolled, &shares, &AggregationMode::Strict)?;

    let did = CardanoDid::derive(&result.master_key, request.network);
    let metadata = assembler.assemble(
        did.clone(),
        id_hash_hex(&result.master_key),
        [request.wallet_address.clone()].into_iter().collect(),
        bundle.helpers(),
        Utc::now(),
    )?;

    info!(%did, fingers = enrolled.len(), "enrollment complete");
    Ok(Enrollment {
        did,
        metadata,
        bundle,
        master_key: result.master_key,
    })
}
