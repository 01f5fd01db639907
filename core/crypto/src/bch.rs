//! BCH(127, 64, 10) syndrome codec over GF(2^7).
//!
//! The fuzzy extractor stores the 63-bit remainder of each template
//! block modulo the generator polynomial as its secure sketch. On
//! reproduction the remainder difference equals the remainder of the
//! error pattern, which is decoded back to the pattern itself with a
//! fixed-iteration Berlekamp-Massey pass and a full-width Chien search.
//! Every loop in the decoder runs a fixed number of rounds so decode
//! timing does not depend on the error pattern.

/// Codeword length in bits.
pub const BCH_N: usize = 127;

/// Information length in bits.
pub const BCH_K: usize = 64;

/// Correctable errors per block.
pub const BCH_T: usize = 10;

/// Syndrome width in bits.
pub const BCH_SYNDROME_BITS: usize = BCH_N - BCH_K;

/// Blocks per 512-bit template (the last block is zero-padded).
pub const TEMPLATE_BLOCKS: usize = 5;

/// Upper bound on the template information the packed sketch reveals.
pub const SKETCH_LEAKAGE_BITS: usize = TEMPLATE_BLOCKS * BCH_SYNDROME_BITS;

/// Generator polynomial of BCH(127, 64, 10), bit `k` holding the
/// coefficient of `x^k`. Degree 63; product of the minimal polynomials
/// of alpha^1 .. alpha^20 over GF(2) with alpha primitive in GF(2^7)
/// under x^7 + x^3 + 1.
const GENERATOR: u128 = 0xA1AB_815B_C7EC_8025;

// Antilog/log tables for GF(2^7) under x^7 + x^3 + 1. The antilog
// table is doubled so products of two logs index without a reduction.
const GF_EXP: [u8; 254] = [
    0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x09, 0x12, 0x24, 0x48, 0x19, 0x32, 0x64, 0x41, 0x0b,
    0x16, 0x2c, 0x58, 0x39, 0x72, 0x6d, 0x53, 0x2f, 0x5e, 0x35, 0x6a, 0x5d, 0x33, 0x66, 0x45, 0x03,
    0x06, 0x0c, 0x18, 0x30, 0x60, 0x49, 0x1b, 0x36, 0x6c, 0x51, 0x2b, 0x56, 0x25, 0x4a, 0x1d, 0x3a,
    0x74, 0x61, 0x4b, 0x1f, 0x3e, 0x7c, 0x71, 0x6b, 0x5f, 0x37, 0x6e, 0x55, 0x23, 0x46, 0x05, 0x0a,
    0x14, 0x28, 0x50, 0x29, 0x52, 0x2d, 0x5a, 0x3d, 0x7a, 0x7d, 0x73, 0x6f, 0x57, 0x27, 0x4e, 0x15,
    0x2a, 0x54, 0x21, 0x42, 0x0d, 0x1a, 0x34, 0x68, 0x59, 0x3b, 0x76, 0x65, 0x43, 0x0f, 0x1e, 0x3c,
    0x78, 0x79, 0x7b, 0x7f, 0x77, 0x67, 0x47, 0x07, 0x0e, 0x1c, 0x38, 0x70, 0x69, 0x5b, 0x3f, 0x7e,
    0x75, 0x63, 0x4f, 0x17, 0x2e, 0x5c, 0x31, 0x62, 0x4d, 0x13, 0x26, 0x4c, 0x11, 0x22, 0x44, 0x01,
    0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x09, 0x12, 0x24, 0x48, 0x19, 0x32, 0x64, 0x41, 0x0b, 0x16,
    0x2c, 0x58, 0x39, 0x72, 0x6d, 0x53, 0x2f, 0x5e, 0x35, 0x6a, 0x5d, 0x33, 0x66, 0x45, 0x03, 0x06,
    0x0c, 0x18, 0x30, 0x60, 0x49, 0x1b, 0x36, 0x6c, 0x51, 0x2b, 0x56, 0x25, 0x4a, 0x1d, 0x3a, 0x74,
    0x61, 0x4b, 0x1f, 0x3e, 0x7c, 0x71, 0x6b, 0x5f, 0x37, 0x6e, 0x55, 0x23, 0x46, 0x05, 0x0a, 0x14,
    0x28, 0x50, 0x29, 0x52, 0x2d, 0x5a, 0x3d, 0x7a, 0x7d, 0x73, 0x6f, 0x57, 0x27, 0x4e, 0x15, 0x2a,
    0x54, 0x21, 0x42, 0x0d, 0x1a, 0x34, 0x68, 0x59, 0x3b, 0x76, 0x65, 0x43, 0x0f, 0x1e, 0x3c, 0x78,
    0x79, 0x7b, 0x7f, 0x77, 0x67, 0x47, 0x07, 0x0e, 0x1c, 0x38, 0x70, 0x69, 0x5b, 0x3f, 0x7e, 0x75,
    0x63, 0x4f, 0x17, 0x2e, 0x5c, 0x31, 0x62, 0x4d, 0x13, 0x26, 0x4c, 0x11, 0x22, 0x44,
];

const GF_LOG: [u8; 128] = [
    0x00, 0x00, 0x01, 0x1f, 0x02, 0x3e, 0x20, 0x67, 0x03, 0x07, 0x3f, 0x0f, 0x21, 0x54, 0x68, 0x5d,
    0x04, 0x7c, 0x08, 0x79, 0x40, 0x4f, 0x10, 0x73, 0x22, 0x0b, 0x55, 0x26, 0x69, 0x2e, 0x5e, 0x33,
    0x05, 0x52, 0x7d, 0x3c, 0x09, 0x2c, 0x7a, 0x4d, 0x41, 0x43, 0x50, 0x2a, 0x11, 0x45, 0x74, 0x17,
    0x23, 0x76, 0x0c, 0x1c, 0x56, 0x19, 0x27, 0x39, 0x6a, 0x13, 0x2f, 0x59, 0x5f, 0x47, 0x34, 0x6e,
    0x06, 0x0e, 0x53, 0x5c, 0x7e, 0x1e, 0x3d, 0x66, 0x0a, 0x25, 0x2d, 0x32, 0x7b, 0x78, 0x4e, 0x72,
    0x42, 0x29, 0x44, 0x16, 0x51, 0x3b, 0x2b, 0x4c, 0x12, 0x58, 0x46, 0x6d, 0x75, 0x1b, 0x18, 0x38,
    0x24, 0x31, 0x77, 0x71, 0x0d, 0x5b, 0x1d, 0x65, 0x57, 0x6c, 0x1a, 0x37, 0x28, 0x15, 0x3a, 0x4b,
    0x6b, 0x36, 0x14, 0x4a, 0x30, 0x70, 0x5a, 0x64, 0x60, 0x61, 0x48, 0x62, 0x35, 0x49, 0x6f, 0x63,
];

/// Multiply two GF(2^7) elements.
#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    GF_EXP[GF_LOG[a as usize] as usize + GF_LOG[b as usize] as usize]
}

/// Multiplicative inverse of a nonzero GF(2^7) element.
#[inline]
fn gf_inv(a: u8) -> u8 {
    debug_assert!(a != 0, "zero has no inverse");
    GF_EXP[(127 - GF_LOG[a as usize] as usize) % 127]
}

/// Remainder of a 127-bit block polynomial modulo the generator.
///
/// Bit `i` of the block is the coefficient of `x^i`. The result fits
/// in 63 bits.
pub(crate) fn remainder(block: u128) -> u64 {
    debug_assert_eq!(block >> BCH_N, 0, "block exceeds 127 bits");
    let mut w = block;
    let mut i = BCH_N - 1;
    while i >= BCH_SYNDROME_BITS {
        if (w >> i) & 1 == 1 {
            w ^= GENERATOR << (i - BCH_SYNDROME_BITS);
        }
        i -= 1;
    }
    w as u64
}

/// Evaluate a 63-bit binary polynomial at a GF(2^7) element.
fn eval_at(poly: u64, elem: u8) -> u8 {
    let mut acc = 0u8;
    let mut i = BCH_SYNDROME_BITS;
    while i > 0 {
        i -= 1;
        acc = gf_mul(acc, elem);
        if (poly >> i) & 1 == 1 {
            acc ^= 1;
        }
    }
    acc
}

/// Decode an error pattern from a syndrome difference.
///
/// `delta` is `remainder(received) XOR stored_sketch`, which equals the
/// remainder of the error polynomial. Returns the error pattern when it
/// has weight at most [`BCH_T`], `None` otherwise. The Berlekamp-Massey
/// recursion always runs `2t` rounds and the Chien search always scans
/// all 127 positions; the zero syndrome flows through the same path.
pub(crate) fn decode(delta: u64) -> Option<u128> {
    // Power-sum syndromes S_j = e(alpha^j). The generator has
    // alpha^1 .. alpha^20 among its roots, so the stored remainder
    // evaluates to the same values as the error polynomial.
    let mut s = [0u8; 2 * BCH_T];
    for (j, slot) in s.iter_mut().enumerate() {
        *slot = eval_at(delta, GF_EXP[j + 1]);
    }

    // Berlekamp-Massey over GF(2^7), fixed 2t iterations.
    let mut c = [0u8; 2 * BCH_T + 1];
    let mut b = [0u8; 2 * BCH_T + 1];
    c[0] = 1;
    b[0] = 1;
    let mut l = 0usize;
    let mut m = 1usize;
    let mut bb = 1u8;
    for n in 0..2 * BCH_T {
        let mut d = s[n];
        for i in 1..=l {
            d ^= gf_mul(c[i], s[n - i]);
        }
        if d == 0 {
            m += 1;
        } else if 2 * l <= n {
            let t = c;
            let coef = gf_mul(d, gf_inv(bb));
            for i in 0..=(2 * BCH_T - m) {
                c[i + m] ^= gf_mul(coef, b[i]);
            }
            l = n + 1 - l;
            b = t;
            bb = d;
            m = 1;
        } else {
            let coef = gf_mul(d, gf_inv(bb));
            for i in 0..=(2 * BCH_T - m) {
                c[i + m] ^= gf_mul(coef, b[i]);
            }
            m += 1;
        }
    }

    // Chien search: evaluate the locator at alpha^-i for every position.
    // The scan is unconditional so decode work is fixed; validity is
    // judged only afterwards.
    let mut pattern = 0u128;
    let mut roots = 0usize;
    for i in 0..BCH_N {
        let x = GF_EXP[(BCH_N - i) % BCH_N];
        let mut acc = 0u8;
        let mut xp = 1u8;
        for &coef in c.iter() {
            if coef != 0 {
                acc ^= gf_mul(coef, xp);
            }
            xp = gf_mul(xp, x);
        }
        if acc == 0 {
            pattern |= 1 << i;
            roots += 1;
        }
    }

    if l > BCH_T || roots != l || remainder(pattern) != delta {
        return None;
    }
    Some(pattern)
}
