//! End-to-end scenarios for the fuzzy extractor: clean and noisy
//! round trips, over-budget noise, tampered helpers, and enrollment
//! unlinkability.

use decdid_crypto::error::CryptoError;
use decdid_crypto::fuzzy::{self, HelperData};
use decdid_crypto::minutiae::FingerId;
use decdid_crypto::quantizer::{Template, TEMPLATE_BITS};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

const CTX: &[u8] = b"decdid/v1";

/// Deterministic template with realistic sparsity (~60 set bits).
fn seeded_template(seed: u64) -> Template {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut template = Template::zeroed();
    for _ in 0..60 {
        template.set_bit(rng.gen_range(0..TEMPLATE_BITS));
    }
    template
}

/// Bit spans of the five BCH blocks within the template.
const BLOCK_SPANS: [(usize, usize); 5] = [
    (0, 127),
    (127, 254),
    (254, 381),
    (381, 508),
    (508, 512),
];

#[test]
fn test_clean_round_trip() {
    let mut rng = ChaCha20Rng::seed_from_u64(1);
    let template = seeded_template(100);
    let (share, helper) = fuzzy::gen(&template, FingerId::LeftIndex, CTX, &mut rng).unwrap();
    let recovered = fuzzy::rep(&template, &helper, FingerId::LeftIndex, CTX).unwrap();
    assert_eq!(share, recovered);
}

#[test]
fn test_noisy_round_trip_within_budget() {
    let mut rng = ChaCha20Rng::seed_from_u64(2);
    let template = seeded_template(101);
    let (share, helper) = fuzzy::gen(&template, FingerId::RightThumb, CTX, &mut rng).unwrap();

    // Five random flips per full block, two in the short tail block:
    // all within the per-block correction capacity of ten.
    let mut noisy = template.clone();
    for (start, end) in BLOCK_SPANS {
        let budget = if end - start > 5 { 5 } else { 2 };
        let mut flipped = std::collections::BTreeSet::new();
        while flipped.len() < budget {
            let bit = rng.gen_range(start..end);
            if flipped.insert(bit) {
                noisy.flip_bit(bit);
            }
        }
    }
    assert!(template.hamming_distance(&noisy) >= 20);

    let recovered = fuzzy::rep(&noisy, &helper, FingerId::RightThumb, CTX).unwrap();
    assert_eq!(share, recovered);
}

#[test]
fn test_over_budget_noise_fails_correction() {
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let template = seeded_template(102);
    let (_, helper) = fuzzy::gen(&template, FingerId::LeftRing, CTX, &mut rng).unwrap();

    // Twelve flips inside the second block, two past the correction
    // capacity. Fixed positions keep the scenario reproducible.
    let mut noisy = template.clone();
    for k in 0..12 {
        noisy.flip_bit(130 + k * 9);
    }

    let err = fuzzy::rep(&noisy, &helper, FingerId::LeftRing, CTX).unwrap_err();
    assert!(matches!(
        err,
        CryptoError::CorrectionFailed {
            failed_blocks: 1,
            total_blocks: 5
        }
    ));
}

#[test]
fn test_tampered_sketch_is_integrity_failure() {
    let mut rng = ChaCha20Rng::seed_from_u64(4);
    let template = seeded_template(103);
    let (_, helper) = fuzzy::gen(&template, FingerId::LeftLittle, CTX, &mut rng).unwrap();

    // Every single-bit flip across the sketch must surface as a
    // tampered helper, never as a correction failure or a wrong key.
    for byte in 0..helper.sketch.len() {
        for bit in 0..8 {
            let mut tampered = helper.clone();
            tampered.sketch[byte] ^= 1 << bit;
            let err = fuzzy::rep(&template, &tampered, FingerId::LeftLittle, CTX).unwrap_err();
            assert!(
                matches!(err, CryptoError::IntegrityFailed),
                "sketch byte {byte} bit {bit}: {err:?}"
            );
        }
    }
}

#[test]
fn test_tampered_salt_is_integrity_failure() {
    let mut rng = ChaCha20Rng::seed_from_u64(5);
    let template = seeded_template(104);
    let (_, helper) = fuzzy::gen(&template, FingerId::RightMiddle, CTX, &mut rng).unwrap();

    for byte in 0..helper.salt.len() {
        let mut tampered = helper.clone();
        tampered.salt[byte] ^= 1;
        let err = fuzzy::rep(&template, &tampered, FingerId::RightMiddle, CTX).unwrap_err();
        assert!(
            matches!(err, CryptoError::IntegrityFailed),
            "salt byte {byte}: {err:?}"
        );
    }
}

#[test]
fn test_tampered_tag_is_integrity_failure() {
    let mut rng = ChaCha20Rng::seed_from_u64(6);
    let template = seeded_template(105);
    let (_, helper) = fuzzy::gen(&template, FingerId::RightLittle, CTX, &mut rng).unwrap();

    let mut tampered = helper.clone();
    tampered.tag[0] ^= 0x80;
    let err = fuzzy::rep(&template, &tampered, FingerId::RightLittle, CTX).unwrap_err();
    assert!(matches!(err, CryptoError::IntegrityFailed));
}

#[test]
fn test_cross_enrollment_keys_are_independent() {
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let template = seeded_template(106);

    let (k1, h1) = fuzzy::gen(&template, FingerId::LeftThumb, CTX, &mut rng).unwrap();
    let (k2, h2) = fuzzy::gen(&template, FingerId::LeftThumb, CTX, &mut rng).unwrap();

    assert_ne!(h1.salt, h2.salt);
    assert_ne!(k1, k2);

    // Each helper reproduces its own enrollment's key, not the other's.
    let r1 = fuzzy::rep(&template, &h1, FingerId::LeftThumb, CTX).unwrap();
    let r2 = fuzzy::rep(&template, &h2, FingerId::LeftThumb, CTX).unwrap();
    assert_eq!(r1, k1);
    assert_eq!(r2, k2);
    assert_ne!(r1, k2);
}

#[test]
fn test_share_distance_looks_uniform() {
    // Shares from independent salts should differ like random 256-bit
    // strings: a Hamming distance near 128, never in the tails.
    let mut rng = ChaCha20Rng::seed_from_u64(8);
    let template = seeded_template(107);
    for _ in 0..20 {
        let (k1, _) = fuzzy::gen(&template, FingerId::LeftIndex, CTX, &mut rng).unwrap();
        let (k2, _) = fuzzy::gen(&template, FingerId::LeftIndex, CTX, &mut rng).unwrap();
        let distance: u32 = k1
            .as_bytes()
            .iter()
            .zip(k2.as_bytes().iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert!((80..=176).contains(&distance), "distance {distance}");
    }
}

#[test]
fn test_helper_pairs_with_its_own_finger_only() {
    let mut rng = ChaCha20Rng::seed_from_u64(9);
    let template = seeded_template(108);
    let (_, helper) = fuzzy::gen(&template, FingerId::LeftThumb, CTX, &mut rng).unwrap();
    let err = fuzzy::rep(&template, &helper, FingerId::RightThumb, CTX).unwrap_err();
    assert!(matches!(err, CryptoError::IntegrityFailed));
}

#[test]
fn test_helper_wire_form_is_105_bytes() {
    let mut rng = ChaCha20Rng::seed_from_u64(10);
    let template = seeded_template(109);
    let (_, helper) = fuzzy::gen(&template, FingerId::LeftMiddle, CTX, &mut rng).unwrap();
    let bytes = helper.to_bytes();
    assert_eq!(bytes.len(), 105);
    assert_eq!(HelperData::from_bytes(&bytes).unwrap(), helper);
}
