//! Verification: recaptures plus helper data against an expected
//! identity.

use crate::did::{id_hash, CardanoDid};
use crate::enrollment::{validate_captures, IdentityConfig};
use crate::error::{IdentityError, IdentityResult};
use decdid_crypto::aggregate::{aggregate, AggregationOutcome, RecoveredShare};
use decdid_crypto::minutiae::{Capture, FingerId};
use decdid_crypto::quantizer::quantize;
use decdid_crypto::{fuzzy, CryptoError, HelperData};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

/// Parsed verification input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Input schema version, `"1.0"`.
    pub version: String,
    /// Fresh captures of some or all enrolled fingers.
    pub fingers: Vec<Capture>,
    /// Helper data per enrolled finger, from the metadata record.
    /// Helpers for revoked fingers must not be supplied.
    pub helpers: BTreeMap<FingerId, HelperData>,
    /// Hex BLAKE2b-256 of the expected master key.
    pub expected_id_hash: String,
}

/// The outcome of a verification run.
///
/// `accepted` is a decision, not an error: a clean run that reproduces
/// a different identity yields `accepted == false`.
#[derive(Debug)]
pub struct Verification {
    /// Whether the reproduced identity matches the expected one.
    pub accepted: bool,
    /// The DID reproduced from the captures.
    pub did: CardanoDid,
    /// Fingers whose shares contributed to the reproduced key.
    pub fingers_used: BTreeSet<FingerId>,
    /// Strict or fallback aggregation outcome.
    pub outcome: AggregationOutcome,
    /// Fingers presented but unusable (quality or correction budget).
    pub rejected_fingers: BTreeSet<FingerId>,
}

/// Verify fresh captures against helper data and an expected id hash.
///
/// Per-finger failures are tiered:
/// - quantizer rejections and exhausted correction budgets mark the
///   finger missing; the aggregation policy then re-evaluates the
///   remaining subset;
/// - a helper integrity failure aborts the whole verification, since
///   tampered helper data is an attack indicator; every presented
///   finger is still processed first, so the abort cost does not
///   reveal which helper was tampered with;
/// - the final comparison of the reproduced id hash against the
///   expected one is constant time.
pub fn verify(
    request: &VerificationRequest,
    config: &IdentityConfig,
) -> IdentityResult<Verification> {
    if request.version != "1.0" {
        return Err(IdentityError::InputValidation {
            path: "version".into(),
            reason: format!("unsupported input version {}", request.version),
        });
    }
    validate_captures(&request.fingers, 1)?;
    let expected: [u8; 32] = hex::decode(&request.expected_id_hash)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or_else(|| IdentityError::InputValidation {
            path: "expected_id_hash".into(),
            reason: "expected 64 hex characters".into(),
        })?;
    for (i, capture) in request.fingers.iter().enumerate() {
        if !request.helpers.contains_key(&capture.finger_id) {
            return Err(IdentityError::InputValidation {
                path: format!("fingers[{i}]"),
                reason: format!("no helper data for finger {}", capture.finger_id),
            });
        }
    }

    // Every presented finger is processed before any failure is
    // reported, so verification cost does not depend on which finger
    // carries a tampered helper.
    let enrolled: BTreeSet<FingerId> = request.helpers.keys().copied().collect();
    let mut recovered = BTreeMap::new();
    let mut rejected = BTreeSet::new();
    let mut tampered = BTreeSet::new();
    let mut internal: Option<CryptoError> = None;
    for capture in &request.fingers {
        let helper = &request.helpers[&capture.finger_id];
        match reproduce_share(capture, helper, config) {
            Ok(share) => {
                recovered.insert(
                    capture.finger_id,
                    RecoveredShare {
                        key: share,
                        quality: capture.quality,
                    },
                );
            }
            Err(
                CryptoError::QualityTooLow { .. }
                | CryptoError::NormalizationAmbiguous
                | CryptoError::CorrectionFailed { .. },
            ) => {
                debug!(finger = %capture.finger_id, "finger unusable, treating as missing");
                rejected.insert(capture.finger_id);
            }
            Err(CryptoError::IntegrityFailed) => {
                tampered.insert(capture.finger_id);
            }
            Err(err) => internal = Some(err),
        }
    }
    if !tampered.is_empty() {
        warn!(fingers = tampered.len(), "helper integrity failure");
        return Err(CryptoError::IntegrityFailed.into());
    }
    if let Some(err) = internal {
        return Err(err.into());
    }

    let result = aggregate(&enrolled, &recovered, &config.aggregation)?;
    let candidate = id_hash(&result.master_key);
    let accepted = candidate.ct_eq(&expected).unwrap_u8() == 1;
    let did = CardanoDid::derive(&result.master_key, config.network);

    info!(
        accepted,
        fingers = result.fingers_used.len(),
        rejected = rejected.len(),
        "verification complete"
    );
    Ok(Verification {
        accepted,
        did,
        fingers_used: result.fingers_used,
        outcome: result.outcome,
        rejected_fingers: rejected,
    })
}

fn reproduce_share(
    capture: &Capture,
    helper: &HelperData,
    config: &IdentityConfig,
) -> Result<decdid_crypto::FingerKey, CryptoError> {
    let template = quantize(capture, &config.quantizer)?;
    fuzzy::rep(&template, helper, capture.finger_id, &config.ctx)
}
