//! Keyed BLAKE2b derivations and domain separation.
//!
//! Every derivation is personalized with a fixed domain string plus the
//! canonical finger byte, so material extracted for one finger or one
//! purpose can never stand in for another. All persona strings fit
//! BLAKE2b's 16-byte personal-parameter bound.

use crate::error::{CryptoError, CryptoResult};
use crate::fuzzy::{FingerKey, KEY_LEN, PERSONALIZATION_LEN, SALT_LEN};
use crate::minutiae::FingerId;
use crate::quantizer::Template;
use blake2::digest::consts::{U16, U32};
use blake2::digest::{Digest, Mac};
use blake2::{Blake2b, Blake2bMac512};
use zeroize::Zeroize;

type Blake2b256 = Blake2b<U32>;
type Blake2b128 = Blake2b<U16>;

/// Domain string for fuzzy-extractor key derivations.
const DOMAIN_FUZZY: &[u8; 10] = b"dec-did|F|";

/// Domain string for aggregation contribution masks.
const DOMAIN_AGGREGATE: &[u8; 10] = b"dec-did|A|";

/// Domain string for helper personalization fields.
const DOMAIN_PERSONA: &[u8; 10] = b"dec-did|P|";

/// Assemble a 14-byte BLAKE2b persona: domain, finger byte, 3-byte tag.
fn persona(domain: &[u8; 10], finger_id: FingerId, tag: &[u8; 3]) -> [u8; 14] {
    let mut p = [0u8; 14];
    p[..10].copy_from_slice(domain);
    p[10] = finger_id.as_byte();
    p[11..].copy_from_slice(tag);
    p
}

/// Derive the 32-byte key share for a finger.
///
/// BLAKE2b-512 keyed by the enrollment salt and personalized with the
/// fuzzy-extractor domain, over `template || salt || personalization`;
/// the output is truncated to 32 bytes.
pub fn derive_key_share(
    template: &Template,
    salt: &[u8; SALT_LEN],
    personalization: &[u8; PERSONALIZATION_LEN],
    finger_id: FingerId,
) -> CryptoResult<FingerKey> {
    let p = persona(DOMAIN_FUZZY, finger_id, b"key");
    let mut mac = Blake2bMac512::new_with_salt_and_personal(salt, salt, &p)
        .map_err(|e| CryptoError::InternalCrypto(format!("kdf init: {e}")))?;
    Mac::update(&mut mac, template.as_bytes());
    Mac::update(&mut mac, salt);
    Mac::update(&mut mac, personalization);
    let mut wide = mac.finalize().into_bytes();
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&wide[..KEY_LEN]);
    wide.zeroize();
    let share = FingerKey::from_bytes(key);
    key.zeroize();
    Ok(share)
}

/// Derive the HMAC key that authenticates helper data for a finger.
///
/// Separate personalization from the key-share derivation, keyed by the
/// extracted share itself.
pub fn derive_mac_key(share: &FingerKey, finger_id: FingerId) -> CryptoResult<[u8; KEY_LEN]> {
    let p = persona(DOMAIN_FUZZY, finger_id, b"mac");
    let mut mac = Blake2bMac512::new_with_salt_and_personal(share.as_bytes(), &[], &p)
        .map_err(|e| CryptoError::InternalCrypto(format!("kdf init: {e}")))?;
    Mac::update(&mut mac, b"helper-mac");
    let mut wide = mac.finalize().into_bytes();
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&wide[..KEY_LEN]);
    wide.zeroize();
    Ok(key)
}

/// Deterministic, non-secret helper personalization for a finger in an
/// enrollment context.
pub fn finger_personalization(finger_id: FingerId, ctx: &[u8]) -> [u8; PERSONALIZATION_LEN] {
    let mut hasher = Blake2b128::new();
    Digest::update(&mut hasher, DOMAIN_PERSONA);
    Digest::update(&mut hasher, [finger_id.as_byte()]);
    Digest::update(&mut hasher, ctx);
    let out = hasher.finalize();
    let mut p = [0u8; PERSONALIZATION_LEN];
    p.copy_from_slice(&out);
    p
}

/// Aggregation contribution mask for a finger slot.
///
/// Mixing each share with its slot mask prevents a share captured for
/// one finger from being replayed in another slot.
pub fn finger_domain_tag(finger_id: FingerId) -> [u8; KEY_LEN] {
    let mut hasher = Blake2b256::new();
    Digest::update(&mut hasher, DOMAIN_AGGREGATE);
    Digest::update(&mut hasher, [finger_id.as_byte()]);
    let out = hasher.finalize();
    let mut tag = [0u8; KEY_LEN];
    tag.copy_from_slice(&out);
    tag
}
