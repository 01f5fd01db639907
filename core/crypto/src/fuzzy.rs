//! BCH-based fuzzy extractor: Gen and Rep over 512-bit templates.
//!
//! `gen` turns a template into a 32-byte key share plus public helper
//! data; `rep` reproduces the share from a noisy recapture of the same
//! finger and the helper. The helper stores one 63-bit BCH syndrome per
//! template block, a fresh salt, a deterministic personalization field,
//! and an HMAC-SHA-256 tag keyed by a subkey of the extracted share.
//! Publishing the helper reveals at most
//! [`SKETCH_LEAKAGE_BITS`](crate::bch::SKETCH_LEAKAGE_BITS) bits about
//! the template.

use crate::bch::{self, BCH_N, BCH_SYNDROME_BITS, TEMPLATE_BLOCKS};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf;
use crate::minutiae::FingerId;
use crate::quantizer::{Template, TEMPLATE_BITS};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::fmt;
use subtle::{Choice, ConstantTimeEq};
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Key share length in bytes.
pub const KEY_LEN: usize = 32;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Personalization field length in bytes.
pub const PERSONALIZATION_LEN: usize = 16;

/// Packed sketch length in bytes: a block-count byte plus five 63-bit
/// syndromes packed LSB-first.
pub const SKETCH_LEN: usize = 41;

/// HMAC tag length in bytes.
pub const TAG_LEN: usize = 32;

/// Total helper wire length: `salt || personalization || sketch || tag`.
pub const HELPER_LEN: usize = SALT_LEN + PERSONALIZATION_LEN + SKETCH_LEN + TAG_LEN;

/// Algorithm identifier carried in the JSON transport form.
pub const ALGORITHM_TAG: &str = "fuzzy-extractor-bch127-blake2b";

/// A 32-byte per-finger key share.
///
/// Secret material: zeroized on drop, compared in constant time,
/// redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FingerKey([u8; KEY_LEN]);

impl FingerKey {
    /// Wrap raw share bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw share bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl ConstantTimeEq for FingerKey {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for FingerKey {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).unwrap_u8() == 1
    }
}

impl Eq for FingerKey {}

impl fmt::Debug for FingerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FingerKey(redacted)")
    }
}

/// Public helper data for one finger, fixed 105-byte layout.
#[derive(Clone, PartialEq, Eq)]
pub struct HelperData {
    /// Uniformly random per-enrollment salt.
    pub salt: [u8; SALT_LEN],
    /// Deterministic finger/context personalization.
    pub personalization: [u8; PERSONALIZATION_LEN],
    /// Packed BCH syndromes of the enrolled template.
    pub sketch: [u8; SKETCH_LEN],
    /// HMAC-SHA-256 over `salt || personalization || sketch`.
    pub tag: [u8; TAG_LEN],
}

impl fmt::Debug for HelperData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperData")
            .field("salt", &hex::encode(self.salt))
            .field("sketch_len", &SKETCH_LEN)
            .finish()
    }
}

impl HelperData {
    /// Serialize to the fixed 105-byte wire layout.
    pub fn to_bytes(&self) -> [u8; HELPER_LEN] {
        let mut out = [0u8; HELPER_LEN];
        out[..SALT_LEN].copy_from_slice(&self.salt);
        out[SALT_LEN..SALT_LEN + PERSONALIZATION_LEN].copy_from_slice(&self.personalization);
        out[SALT_LEN + PERSONALIZATION_LEN..SALT_LEN + PERSONALIZATION_LEN + SKETCH_LEN]
            .copy_from_slice(&self.sketch);
        out[HELPER_LEN - TAG_LEN..].copy_from_slice(&self.tag);
        out
    }

    /// Parse the fixed 105-byte wire layout.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != HELPER_LEN {
            return Err(CryptoError::MalformedHelper(format!(
                "expected {HELPER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut helper = HelperData {
            salt: [0u8; SALT_LEN],
            personalization: [0u8; PERSONALIZATION_LEN],
            sketch: [0u8; SKETCH_LEN],
            tag: [0u8; TAG_LEN],
        };
        helper.salt.copy_from_slice(&bytes[..SALT_LEN]);
        helper
            .personalization
            .copy_from_slice(&bytes[SALT_LEN..SALT_LEN + PERSONALIZATION_LEN]);
        helper.sketch.copy_from_slice(
            &bytes[SALT_LEN + PERSONALIZATION_LEN..SALT_LEN + PERSONALIZATION_LEN + SKETCH_LEN],
        );
        helper.tag.copy_from_slice(&bytes[HELPER_LEN - TAG_LEN..]);
        Ok(helper)
    }
}

#[derive(Serialize, Deserialize)]
struct HelperDataWire {
    algorithm: String,
    salt: String,
    personalization: String,
    sketch: String,
    tag: String,
}

impl Serialize for HelperData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        HelperDataWire {
            algorithm: ALGORITHM_TAG.to_string(),
            salt: URL_SAFE_NO_PAD.encode(self.salt),
            personalization: URL_SAFE_NO_PAD.encode(self.personalization),
            sketch: URL_SAFE_NO_PAD.encode(self.sketch),
            tag: URL_SAFE_NO_PAD.encode(self.tag),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HelperData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        fn field<const N: usize, E: Error>(name: &str, value: &str) -> Result<[u8; N], E> {
            let bytes = URL_SAFE_NO_PAD
                .decode(value)
                .map_err(|e| E::custom(format!("{name}: {e}")))?;
            bytes
                .try_into()
                .map_err(|_| E::custom(format!("{name}: wrong length")))
        }

        let wire = HelperDataWire::deserialize(deserializer)?;
        if wire.algorithm != ALGORITHM_TAG {
            return Err(D::Error::custom(format!(
                "unsupported helper algorithm: {}",
                wire.algorithm
            )));
        }
        Ok(HelperData {
            salt: field("salt", &wire.salt)?,
            personalization: field("personalization", &wire.personalization)?,
            sketch: field("sketch", &wire.sketch)?,
            tag: field("tag", &wire.tag)?,
        })
    }
}

/// Extract a fresh key share and helper data from a template.
///
/// Randomized: draws a 16-byte salt from the supplied cryptographic
/// RNG and fails with [`CryptoError::InternalCrypto`] if the RNG does.
/// Two invocations on the same template yield unlinkable shares.
pub fn gen<R: CryptoRng + RngCore>(
    template: &Template,
    finger_id: FingerId,
    ctx: &[u8],
    rng: &mut R,
) -> CryptoResult<(FingerKey, HelperData)> {
    let mut salt = [0u8; SALT_LEN];
    rng.try_fill_bytes(&mut salt)
        .map_err(|e| CryptoError::InternalCrypto(format!("rng: {e}")))?;

    let personalization = kdf::finger_personalization(finger_id, ctx);

    let mut syndromes = [0u64; TEMPLATE_BLOCKS];
    for (b, slot) in syndromes.iter_mut().enumerate() {
        *slot = bch::remainder(template_block(template, b));
    }
    let sketch = pack_sketch(&syndromes);

    let key_share = kdf::derive_key_share(template, &salt, &personalization, finger_id)?;
    let tag = helper_tag(&key_share, finger_id, &salt, &personalization, &sketch)?;

    debug!(finger = %finger_id, "helper data generated");
    Ok((
        key_share,
        HelperData {
            salt,
            personalization,
            sketch,
            tag,
        },
    ))
}

/// Reproduce the key share from a noisy recapture and its helper.
///
/// Deterministic given its inputs. Error taxonomy:
/// - personalization or tag mismatch, or a structurally inconsistent
///   sketch, is [`CryptoError::IntegrityFailed`];
/// - a block whose error pattern exceeds the code's capacity is
///   [`CryptoError::CorrectionFailed`].
///
/// All five blocks are decoded unconditionally before either error is
/// reported, so decode time does not depend on which block fails.
pub fn rep(
    template: &Template,
    helper: &HelperData,
    finger_id: FingerId,
    ctx: &[u8],
) -> CryptoResult<FingerKey> {
    let expected = kdf::finger_personalization(finger_id, ctx);
    if expected.ct_eq(&helper.personalization).unwrap_u8() != 1 {
        warn!(finger = %finger_id, "helper personalization mismatch");
        return Err(CryptoError::IntegrityFailed);
    }

    let syndromes = unpack_sketch(&helper.sketch)?;

    let mut corrected = Template::zeroed();
    let mut failed_blocks = 0usize;
    let mut pad_violation = false;
    for b in 0..TEMPLATE_BLOCKS {
        let word = template_block(template, b);
        let delta = bch::remainder(word) ^ syndromes[b];
        match bch::decode(delta) {
            Some(pattern) if block_in_range(b, pattern) => {
                write_block(&mut corrected, b, word ^ pattern);
            }
            // An error "correction" inside the fixed zero padding is
            // impossible under honest capture noise; the sketch has
            // been tampered with.
            Some(_) => pad_violation = true,
            None => failed_blocks += 1,
        }
    }
    if pad_violation {
        warn!(finger = %finger_id, "correction landed in template padding");
        return Err(CryptoError::IntegrityFailed);
    }
    if failed_blocks > 0 {
        debug!(finger = %finger_id, failed_blocks, "block decoding exhausted");
        return Err(CryptoError::CorrectionFailed {
            failed_blocks,
            total_blocks: TEMPLATE_BLOCKS,
        });
    }

    let key_share =
        kdf::derive_key_share(&corrected, &helper.salt, &helper.personalization, finger_id)?;
    let tag = helper_tag(
        &key_share,
        finger_id,
        &helper.salt,
        &helper.personalization,
        &helper.sketch,
    )?;
    if tag.ct_eq(&helper.tag).unwrap_u8() != 1 {
        warn!(finger = %finger_id, "helper tag mismatch");
        return Err(CryptoError::IntegrityFailed);
    }
    Ok(key_share)
}

/// HMAC-SHA-256 over the public helper fields, keyed by a subkey of the
/// extracted share.
fn helper_tag(
    share: &FingerKey,
    finger_id: FingerId,
    salt: &[u8; SALT_LEN],
    personalization: &[u8; PERSONALIZATION_LEN],
    sketch: &[u8; SKETCH_LEN],
) -> CryptoResult<[u8; TAG_LEN]> {
    let mut mac_key = kdf::derive_mac_key(share, finger_id)?;
    let mut mac = HmacSha256::new_from_slice(&mac_key)
        .map_err(|e| CryptoError::InternalCrypto(format!("hmac init: {e}")))?;
    mac_key.zeroize();
    mac.update(salt);
    mac.update(personalization);
    mac.update(sketch);
    let out = mac.finalize().into_bytes();
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&out);
    Ok(tag)
}

/// Extract block `b` of the template as a 127-bit polynomial. Bits past
/// the template end read as the fixed zero padding.
fn template_block(template: &Template, b: usize) -> u128 {
    let mut word = 0u128;
    let start = b * BCH_N;
    for i in 0..BCH_N {
        let bit = start + i;
        if bit < TEMPLATE_BITS && template.bit(bit) {
            word |= 1 << i;
        }
    }
    word
}

/// Write corrected block `b` back into the template, dropping padding.
fn write_block(template: &mut Template, b: usize, word: u128) {
    let start = b * BCH_N;
    for i in 0..BCH_N {
        let bit = start + i;
        if bit < TEMPLATE_BITS && (word >> i) & 1 == 1 {
            template.set_bit(bit);
        }
    }
}

/// The padding region of a block must stay zero after correction; an
/// error landing there means the decoded word is not an enrollable
/// template.
fn block_in_range(b: usize, pattern: u128) -> bool {
    let start = b * BCH_N;
    if start + BCH_N <= TEMPLATE_BITS {
        return true;
    }
    let payload_bits = TEMPLATE_BITS - start;
    pattern >> payload_bits == 0
}

/// Pack the per-block syndromes: count byte, then 63-bit values
/// LSB-first.
fn pack_sketch(syndromes: &[u64; TEMPLATE_BLOCKS]) -> [u8; SKETCH_LEN] {
    let mut out = [0u8; SKETCH_LEN];
    out[0] = TEMPLATE_BLOCKS as u8;
    let mut bitpos = 0usize;
    for s in syndromes {
        for i in 0..BCH_SYNDROME_BITS {
            if (s >> i) & 1 == 1 {
                let p = bitpos + i;
                out[1 + p / 8] |= 1 << (p % 8);
            }
        }
        bitpos += BCH_SYNDROME_BITS;
    }
    out
}

/// Unpack and structurally validate a sketch. Any inconsistency is an
/// integrity failure: the sketch bytes are covered by the helper tag,
/// so a malformed sketch is a tampered helper.
fn unpack_sketch(sketch: &[u8; SKETCH_LEN]) -> CryptoResult<[u64; TEMPLATE_BLOCKS]> {
    if sketch[0] as usize != TEMPLATE_BLOCKS {
        return Err(CryptoError::IntegrityFailed);
    }
    let total_bits = TEMPLATE_BLOCKS * BCH_SYNDROME_BITS;
    for p in total_bits..(SKETCH_LEN - 1) * 8 {
        if (sketch[1 + p / 8] >> (p % 8)) & 1 == 1 {
            return Err(CryptoError::IntegrityFailed);
        }
    }
    let mut syndromes = [0u64; TEMPLATE_BLOCKS];
    let mut bitpos = 0usize;
    for s in syndromes.iter_mut() {
        for i in 0..BCH_SYNDROME_BITS {
            let p = bitpos + i;
            if (sketch[1 + p / 8] >> (p % 8)) & 1 == 1 {
                *s |= 1 << i;
            }
        }
        bitpos += BCH_SYNDROME_BITS;
    }
    Ok(syndromes)
}
