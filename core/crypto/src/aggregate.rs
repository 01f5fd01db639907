//! Multi-finger key aggregation, rotation, and revocation.
//!
//! The master key is the bytewise XOR of per-finger contributions,
//! where each contribution is the finger's key share masked with a
//! slot-specific domain tag. XOR keeps the aggregation commutative and
//! associative, preserves entropy across independent shares, and makes
//! rotation a constant-time XOR-out / XOR-in.

use crate::error::{CryptoError, CryptoResult};
use crate::fuzzy::{FingerKey, HelperData, KEY_LEN};
use crate::kdf;
use crate::minutiae::FingerId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use subtle::{Choice, ConstantTimeEq};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Minimum fingers any enrollment or aggregation must retain.
pub const MIN_FINGERS: usize = 2;

/// Maximum fingers a person can enroll.
pub const MAX_FINGERS: usize = 10;

/// The 32-byte aggregated master key.
///
/// Secret material: zeroized on drop, compared in constant time,
/// redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Wrap raw master key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw master key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl ConstantTimeEq for MasterKey {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).unwrap_u8() == 1
    }
}

impl Eq for MasterKey {}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(redacted)")
    }
}

/// Fallback subset policy: how many enrolled fingers may be missing and
/// the per-finger quality each remaining finger must clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Hard lower bound on fingers used, never below [`MIN_FINGERS`].
    pub min_fingers: usize,
    /// Quality floor when one enrolled finger is missing.
    pub quality_floor: u8,
    /// Quality floor when two enrolled fingers are missing.
    pub strong_floor: u8,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            min_fingers: MIN_FINGERS,
            quality_floor: 70,
            strong_floor: 85,
        }
    }
}

/// Finger selection policy for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// Every enrolled finger is required.
    Strict,
    /// A qualifying subset of the enrolled fingers is acceptable.
    Fallback(FallbackPolicy),
}

/// How the selected subset related to the enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// All enrolled fingers contributed.
    Strict,
    /// A qualifying subset contributed.
    Fallback {
        /// Fingers used.
        used: usize,
        /// Fingers enrolled.
        enrolled: usize,
    },
}

/// A key share recovered for one finger, with the capture quality that
/// backs the fallback floors.
#[derive(Debug, Clone)]
pub struct RecoveredShare {
    /// The 32-byte per-finger share.
    pub key: FingerKey,
    /// Capture-level quality of the sample that produced the share.
    pub quality: u8,
}

/// The result of aggregating per-finger shares.
#[derive(Debug)]
pub struct AggregationResult {
    /// The aggregated master key.
    pub master_key: MasterKey,
    /// Fingers whose contributions are in the key.
    pub fingers_used: BTreeSet<FingerId>,
    /// Strict or fallback outcome.
    pub outcome: AggregationOutcome,
}

/// A share masked with its slot's domain tag.
fn contribution(finger_id: FingerId, share: &FingerKey) -> [u8; KEY_LEN] {
    let mut out = *share.as_bytes();
    let tag = kdf::finger_domain_tag(finger_id);
    for (o, t) in out.iter_mut().zip(tag.iter()) {
        *o ^= t;
    }
    out
}

/// XOR the contributions of a subset into a master key.
fn combine<'a>(selected: impl Iterator<Item = (&'a FingerId, &'a FingerKey)>) -> MasterKey {
    let mut acc = [0u8; KEY_LEN];
    for (fid, share) in selected {
        let mut c = contribution(*fid, share);
        for (a, b) in acc.iter_mut().zip(c.iter()) {
            *a ^= b;
        }
        c.zeroize();
    }
    MasterKey::from_bytes(acc)
}

/// Aggregate recovered shares into the master key.
///
/// `enrolled` is the finger set named by the helper bundle; `shares`
/// holds the fingers whose keys were actually reproduced. Shares for
/// fingers outside the enrollment are ignored. Subset selection under
/// fallback is a deterministic search: among qualifying subsets, the
/// one with the highest total quality wins, and ties resolve to the
/// lexicographically smallest finger set, so the same inputs always
/// produce the same key.
pub fn aggregate(
    enrolled: &BTreeSet<FingerId>,
    shares: &BTreeMap<FingerId, RecoveredShare>,
    mode: &AggregationMode,
) -> CryptoResult<AggregationResult> {
    let available: Vec<FingerId> = enrolled
        .iter()
        .copied()
        .filter(|fid| shares.contains_key(fid))
        .collect();

    match mode {
        AggregationMode::Strict => {
            if available.len() != enrolled.len() {
                return Err(CryptoError::InsufficientFingers {
                    available: available.len(),
                    required: enrolled.len(),
                });
            }
            let master_key = combine(available.iter().map(|fid| (fid, &shares[fid].key)));
            debug!(fingers = available.len(), "strict aggregation complete");
            Ok(AggregationResult {
                master_key,
                fingers_used: available.into_iter().collect(),
                outcome: AggregationOutcome::Strict,
            })
        }
        AggregationMode::Fallback(policy) => {
            let n = enrolled.len();
            let floor_for = |size: usize| -> Option<u8> {
                if size == n {
                    Some(0)
                } else if size + 1 == n {
                    Some(policy.quality_floor)
                } else if size + 2 == n {
                    Some(policy.strong_floor)
                } else {
                    None
                }
            };
            let min_size = policy.min_fingers.max(MIN_FINGERS);

            let mut best: Option<(u32, BTreeSet<FingerId>)> = None;
            // At most ten fingers, so the subset space is tiny.
            for mask in 1u32..(1 << available.len()) {
                let size = mask.count_ones() as usize;
                if size < min_size {
                    continue;
                }
                let Some(floor) = floor_for(size) else {
                    continue;
                };
                let subset: Vec<FingerId> = available
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| (mask >> i) & 1 == 1)
                    .map(|(_, fid)| *fid)
                    .collect();
                if subset.iter().any(|fid| shares[fid].quality < floor) {
                    continue;
                }
                let total: u32 = subset.iter().map(|fid| shares[fid].quality as u32).sum();
                let set: BTreeSet<FingerId> = subset.into_iter().collect();
                let better = match &best {
                    None => true,
                    Some((best_total, best_set)) => {
                        total > *best_total || (total == *best_total && set < *best_set)
                    }
                };
                if better {
                    best = Some((total, set));
                }
            }

            let Some((_, selected)) = best else {
                return Err(CryptoError::InsufficientFingers {
                    available: available.len(),
                    required: min_size.max(n.saturating_sub(2)),
                });
            };
            let master_key = combine(selected.iter().map(|fid| (fid, &shares[fid].key)));
            let outcome = if selected.len() == n {
                AggregationOutcome::Strict
            } else {
                AggregationOutcome::Fallback {
                    used: selected.len(),
                    enrolled: n,
                }
            };
            debug!(
                fingers = selected.len(),
                enrolled = n,
                "fallback aggregation complete"
            );
            Ok(AggregationResult {
                master_key,
                fingers_used: selected,
                outcome,
            })
        }
    }
}

/// The per-finger shares and helpers of one enrollment.
///
/// Owned by the caller for the duration of enrollment, rotation, or
/// recovery flows; the shares zeroize themselves on drop.
#[derive(Debug, Clone)]
pub struct EnrollmentBundle {
    shares: BTreeMap<FingerId, FingerKey>,
    helpers: BTreeMap<FingerId, HelperData>,
}

impl EnrollmentBundle {
    /// Assemble a bundle from per-finger material.
    ///
    /// Requires between [`MIN_FINGERS`] and [`MAX_FINGERS`] distinct
    /// fingers.
    pub fn new(
        entries: impl IntoIterator<Item = (FingerId, FingerKey, HelperData)>,
    ) -> CryptoResult<Self> {
        let mut shares = BTreeMap::new();
        let mut helpers = BTreeMap::new();
        for (fid, share, helper) in entries {
            shares.insert(fid, share);
            helpers.insert(fid, helper);
        }
        if shares.len() < MIN_FINGERS {
            return Err(CryptoError::InsufficientFingers {
                available: shares.len(),
                required: MIN_FINGERS,
            });
        }
        Ok(Self { shares, helpers })
    }

    /// The enrolled finger set.
    pub fn finger_ids(&self) -> BTreeSet<FingerId> {
        self.shares.keys().copied().collect()
    }

    /// Helper data per finger, for metadata assembly and verification.
    pub fn helpers(&self) -> &BTreeMap<FingerId, HelperData> {
        &self.helpers
    }

    /// The strict master key over every enrolled finger.
    pub fn master_key(&self) -> MasterKey {
        combine(self.shares.iter())
    }

    /// Replace one finger's share and helper.
    ///
    /// The master key changes by design: an attacker holding the
    /// replaced finger's old helper cannot derive the new key.
    pub fn rotate(
        &mut self,
        finger_id: FingerId,
        new_share: FingerKey,
        new_helper: HelperData,
    ) -> CryptoResult<()> {
        if !self.shares.contains_key(&finger_id) {
            return Err(CryptoError::UnknownFinger(finger_id));
        }
        self.shares.insert(finger_id, new_share);
        self.helpers.insert(finger_id, new_helper);
        debug!(finger = %finger_id, "finger rotated");
        Ok(())
    }

    /// Remove one finger from the enrollment.
    ///
    /// Returns the removed helper so metadata can mark it revoked.
    /// Fails with [`CryptoError::BelowMinimum`] if fewer than
    /// [`MIN_FINGERS`] fingers would remain.
    pub fn revoke(&mut self, finger_id: FingerId) -> CryptoResult<HelperData> {
        if !self.shares.contains_key(&finger_id) {
            return Err(CryptoError::UnknownFinger(finger_id));
        }
        if self.shares.len() - 1 < MIN_FINGERS {
            return Err(CryptoError::BelowMinimum {
                remaining: self.shares.len() - 1,
                min: MIN_FINGERS,
            });
        }
        self.shares.remove(&finger_id);
        let helper = self
            .helpers
            .remove(&finger_id)
            .expect("shares and helpers track the same fingers");
        debug!(finger = %finger_id, "finger revoked");
        Ok(helper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::{SKETCH_LEN, TAG_LEN};

    fn share(seed: u8) -> FingerKey {
        let mut bytes = [0u8; KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(31).wrapping_add(seed);
        }
        FingerKey::from_bytes(bytes)
    }

    fn helper(seed: u8) -> HelperData {
        HelperData {
            salt: [seed; 16],
            personalization: [seed.wrapping_add(1); 16],
            sketch: [0u8; SKETCH_LEN],
            tag: [seed.wrapping_add(2); TAG_LEN],
        }
    }

    fn shares_for(fingers: &[(FingerId, u8, u8)]) -> BTreeMap<FingerId, RecoveredShare> {
        fingers
            .iter()
            .map(|(fid, seed, quality)| {
                (
                    *fid,
                    RecoveredShare {
                        key: share(*seed),
                        quality: *quality,
                    },
                )
            })
            .collect()
    }

    const FOUR: [FingerId; 4] = [
        FingerId::LeftThumb,
        FingerId::LeftIndex,
        FingerId::RightThumb,
        FingerId::RightIndex,
    ];

    #[test]
    fn test_strict_aggregation_uses_all_fingers() {
        let enrolled: BTreeSet<_> = FOUR.into_iter().collect();
        let shares = shares_for(&[
            (FOUR[0], 1, 90),
            (FOUR[1], 2, 90),
            (FOUR[2], 3, 90),
            (FOUR[3], 4, 90),
        ]);
        let result = aggregate(&enrolled, &shares, &AggregationMode::Strict).unwrap();
        assert_eq!(result.fingers_used, enrolled);
        assert_eq!(result.outcome, AggregationOutcome::Strict);
    }

    #[test]
    fn test_strict_fails_on_missing_finger() {
        let enrolled: BTreeSet<_> = FOUR.into_iter().collect();
        let shares = shares_for(&[(FOUR[0], 1, 90), (FOUR[1], 2, 90), (FOUR[2], 3, 90)]);
        let err = aggregate(&enrolled, &shares, &AggregationMode::Strict).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InsufficientFingers {
                available: 3,
                required: 4
            }
        ));
    }

    #[test]
    fn test_aggregation_is_order_insensitive() {
        let enrolled: BTreeSet<_> = FOUR.into_iter().collect();
        let forward = shares_for(&[
            (FOUR[0], 1, 90),
            (FOUR[1], 2, 90),
            (FOUR[2], 3, 90),
            (FOUR[3], 4, 90),
        ]);
        let reversed = shares_for(&[
            (FOUR[3], 4, 90),
            (FOUR[2], 3, 90),
            (FOUR[1], 2, 90),
            (FOUR[0], 1, 90),
        ]);
        let a = aggregate(&enrolled, &forward, &AggregationMode::Strict).unwrap();
        let b = aggregate(&enrolled, &reversed, &AggregationMode::Strict).unwrap();
        assert_eq!(a.master_key, b.master_key);
    }

    #[test]
    fn test_fallback_three_of_four_needs_quality_floor() {
        let enrolled: BTreeSet<_> = FOUR.into_iter().collect();
        let mode = AggregationMode::Fallback(FallbackPolicy::default());

        let good = shares_for(&[(FOUR[0], 1, 75), (FOUR[1], 2, 80), (FOUR[2], 3, 71)]);
        let result = aggregate(&enrolled, &good, &mode).unwrap();
        assert_eq!(
            result.outcome,
            AggregationOutcome::Fallback {
                used: 3,
                enrolled: 4
            }
        );

        // One finger under the floor: no 3-subset qualifies, and the
        // 2-subsets miss the strong floor.
        let weak = shares_for(&[(FOUR[0], 1, 75), (FOUR[1], 2, 65), (FOUR[2], 3, 71)]);
        assert!(matches!(
            aggregate(&enrolled, &weak, &mode),
            Err(CryptoError::InsufficientFingers { .. })
        ));
    }

    #[test]
    fn test_fallback_two_of_four_needs_strong_floor() {
        let enrolled: BTreeSet<_> = FOUR.into_iter().collect();
        let mode = AggregationMode::Fallback(FallbackPolicy::default());

        let strong = shares_for(&[(FOUR[0], 1, 90), (FOUR[1], 2, 88)]);
        let result = aggregate(&enrolled, &strong, &mode).unwrap();
        assert_eq!(
            result.outcome,
            AggregationOutcome::Fallback {
                used: 2,
                enrolled: 4
            }
        );

        let weak = shares_for(&[(FOUR[0], 1, 90), (FOUR[1], 2, 80)]);
        assert!(matches!(
            aggregate(&enrolled, &weak, &mode),
            Err(CryptoError::InsufficientFingers { .. })
        ));
    }

    #[test]
    fn test_fallback_prefers_highest_total_quality() {
        let enrolled: BTreeSet<_> = FOUR.into_iter().collect();
        let mode = AggregationMode::Fallback(FallbackPolicy::default());
        // All four available but one below the full-set... full set has
        // no floor, so all four are used when present.
        let shares = shares_for(&[
            (FOUR[0], 1, 95),
            (FOUR[1], 2, 40),
            (FOUR[2], 3, 95),
            (FOUR[3], 4, 95),
        ]);
        let result = aggregate(&enrolled, &shares, &mode).unwrap();
        assert_eq!(result.fingers_used.len(), 4);
        assert_eq!(result.outcome, AggregationOutcome::Strict);
    }

    #[test]
    fn test_fallback_never_goes_below_two() {
        let enrolled: BTreeSet<_> = [FingerId::LeftThumb, FingerId::LeftIndex]
            .into_iter()
            .collect();
        let mode = AggregationMode::Fallback(FallbackPolicy::default());
        let shares = shares_for(&[(FingerId::LeftThumb, 1, 99)]);
        assert!(matches!(
            aggregate(&enrolled, &shares, &mode),
            Err(CryptoError::InsufficientFingers { .. })
        ));
    }

    #[test]
    fn test_subset_and_full_set_derive_different_keys() {
        let enrolled: BTreeSet<_> = FOUR.into_iter().collect();
        let full = shares_for(&[
            (FOUR[0], 1, 90),
            (FOUR[1], 2, 90),
            (FOUR[2], 3, 90),
            (FOUR[3], 4, 90),
        ]);
        let partial = shares_for(&[(FOUR[0], 1, 90), (FOUR[1], 2, 90), (FOUR[2], 3, 90)]);
        let a = aggregate(&enrolled, &full, &AggregationMode::Strict).unwrap();
        let b = aggregate(
            &enrolled,
            &partial,
            &AggregationMode::Fallback(FallbackPolicy::default()),
        )
        .unwrap();
        assert_ne!(a.master_key, b.master_key);
    }

    #[test]
    fn test_rotation_changes_master_key() {
        let mut bundle = EnrollmentBundle::new(
            FOUR.iter()
                .enumerate()
                .map(|(i, fid)| (*fid, share(i as u8 + 1), helper(i as u8 + 1))),
        )
        .unwrap();
        let old = bundle.master_key();
        bundle.rotate(FOUR[1], share(42), helper(42)).unwrap();
        let new = bundle.master_key();
        assert_ne!(old, new);
        assert_eq!(bundle.finger_ids().len(), 4);
    }

    #[test]
    fn test_rotate_unknown_finger_is_rejected() {
        let mut bundle = EnrollmentBundle::new(
            FOUR.iter()
                .enumerate()
                .map(|(i, fid)| (*fid, share(i as u8 + 1), helper(i as u8 + 1))),
        )
        .unwrap();
        let err = bundle
            .rotate(FingerId::LeftLittle, share(9), helper(9))
            .unwrap_err();
        assert!(matches!(err, CryptoError::UnknownFinger(_)));
    }

    #[test]
    fn test_revocation_enforces_minimum() {
        let mut bundle = EnrollmentBundle::new(
            FOUR.iter()
                .enumerate()
                .map(|(i, fid)| (*fid, share(i as u8 + 1), helper(i as u8 + 1))),
        )
        .unwrap();
        let old = bundle.master_key();
        bundle.revoke(FOUR[3]).unwrap();
        assert_ne!(old, bundle.master_key());
        bundle.revoke(FOUR[2]).unwrap();
        let err = bundle.revoke(FOUR[1]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::BelowMinimum {
                remaining: 1,
                min: 2
            }
        ));
    }

    #[test]
    fn test_contribution_masks_are_slot_specific() {
        let s = share(7);
        let a = contribution(FingerId::LeftThumb, &s);
        let b = contribution(FingerId::RightThumb, &s);
        assert_ne!(a, b);
    }
}
