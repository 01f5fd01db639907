//! Minutiae quantization into fixed-length bit templates.
//!
//! A capture is normalized (centroid at the origin, dominant orientation
//! aligned to zero), binned on a configurable grid, and folded into a
//! 512-bit template through a locality-preserving lane encoding. Small
//! translation or rotation noise moves a minutia by at most one fine bin,
//! which changes at most one lane bit; the fuzzy extractor absorbs the
//! residual bit noise.

use crate::error::{CryptoError, CryptoResult};
use crate::minutiae::Capture;
use std::fmt;
use subtle::{Choice, ConstantTimeEq};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Template length in bits.
pub const TEMPLATE_BITS: usize = 512;

/// Template length in bytes.
pub const TEMPLATE_BYTES: usize = TEMPLATE_BITS / 8;

/// Minimum minutiae that must survive the quality filter.
pub const MIN_SURVIVORS: usize = 10;

/// Orientation histogram bins used for alignment (45 degrees each).
const HIST_BINS: usize = 8;

/// Coarse lane grid is 8x8; each lane owns 8 template bits.
const LANE_GRID: i64 = 8;

/// Fine bins per coarse cell along each axis.
const FINE_PER_CELL: i64 = 4;

// Q16 fixed-point cosine/sine of k*45 degrees. Fixed-point keeps the
// rotation bit-identical across platforms.
const ROT_COS_Q16: [i64; 8] = [65536, 46341, 0, -46341, -65536, -46341, 0, 46341];
const ROT_SIN_Q16: [i64; 8] = [0, 46341, 65536, 46341, 0, -46341, -65536, -46341];

/// Quantizer configuration.
///
/// The supported grid pitches are 25, 50 and 100 micrometers and the
/// supported orientation bin counts are 16, 32 and 64; enforcing that
/// set is left to the configuration loader at the outer boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizerConfig {
    /// Spatial grid pitch in micrometers.
    pub grid_um: u16,
    /// Orientation bins over the full circle.
    pub orientation_bins: u16,
    /// Minutiae below this per-point quality are dropped.
    pub min_point_quality: u8,
    /// Captures below this capture-level quality are rejected outright.
    pub min_capture_quality: u8,
    /// Maximum minutiae allowed to set bits in a single lane.
    pub lane_capacity: usize,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            grid_um: 50,
            orientation_bins: 32,
            min_point_quality: 30,
            min_capture_quality: 20,
            lane_capacity: 4,
        }
    }
}

/// A fixed-length biometric bit template.
///
/// Templates are secret material: they are zeroized on drop and compared
/// in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Template([u8; TEMPLATE_BYTES]);

impl Template {
    /// The all-zero template.
    pub fn zeroed() -> Self {
        Self([0u8; TEMPLATE_BYTES])
    }

    /// Build a template from raw bytes.
    pub fn from_bytes(bytes: [u8; TEMPLATE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Raw template bytes, bit `i` at byte `i / 8`, LSB first.
    pub fn as_bytes(&self) -> &[u8; TEMPLATE_BYTES] {
        &self.0
    }

    /// Read bit `i`.
    pub fn bit(&self, i: usize) -> bool {
        debug_assert!(i < TEMPLATE_BITS);
        (self.0[i / 8] >> (i % 8)) & 1 == 1
    }

    /// Set bit `i`.
    pub fn set_bit(&mut self, i: usize) {
        debug_assert!(i < TEMPLATE_BITS);
        self.0[i / 8] |= 1 << (i % 8);
    }

    /// Flip bit `i`. Used by noise-injection tests and callers that
    /// simulate capture noise.
    pub fn flip_bit(&mut self, i: usize) {
        debug_assert!(i < TEMPLATE_BITS);
        self.0[i / 8] ^= 1 << (i % 8);
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.0.iter().map(|b| b.count_ones()).sum()
    }

    /// Hamming distance to another template.
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

impl ConstantTimeEq for Template {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).unwrap_u8() == 1
    }
}

impl Eq for Template {}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Template({} bits, redacted)", TEMPLATE_BITS)
    }
}

/// Quantize a capture into a 512-bit template.
///
/// Returns [`CryptoError::QualityTooLow`] when the capture quality is
/// under the configured floor or fewer than [`MIN_SURVIVORS`] minutiae
/// survive the per-point filter, and
/// [`CryptoError::NormalizationAmbiguous`] when the orientation
/// histogram is flat. Both are reported to the caller for recapture,
/// never silently defaulted.
pub fn quantize(capture: &Capture, config: &QuantizerConfig) -> CryptoResult<Template> {
    if capture.quality < config.min_capture_quality {
        return Err(CryptoError::QualityTooLow {
            usable: 0,
            required: MIN_SURVIVORS,
        });
    }

    let survivors: Vec<_> = capture
        .minutiae
        .iter()
        .filter(|m| m.in_bounds() && m.quality >= config.min_point_quality)
        .collect();
    if survivors.len() < MIN_SURVIVORS {
        return Err(CryptoError::QualityTooLow {
            usable: survivors.len(),
            required: MIN_SURVIVORS,
        });
    }

    // Centroid translation. Uniform sensor offsets cancel exactly in
    // integer arithmetic because the centroid shifts with the points.
    let n = survivors.len() as i64;
    let cx = survivors.iter().map(|m| m.x as i64).sum::<i64>() / n;
    let cy = survivors.iter().map(|m| m.y as i64).sum::<i64>() / n;

    // Dominant-orientation alignment over an 8-bin histogram.
    let mut hist = [0usize; HIST_BINS];
    for m in &survivors {
        hist[(m.theta as usize / 45) % HIST_BINS] += 1;
    }
    let max = *hist.iter().max().expect("histogram is non-empty");
    let min = *hist.iter().min().expect("histogram is non-empty");
    if max == min {
        return Err(CryptoError::NormalizationAmbiguous);
    }
    // Ties break toward the smaller bin index.
    let dominant = hist
        .iter()
        .position(|&c| c == max)
        .expect("max is present");
    let rot_deg = (dominant * 45) as u16;

    let bins = config.orientation_bins as u32;
    let grid = config.grid_um as i64;
    let cos = ROT_COS_Q16[dominant];
    let sin = ROT_SIN_Q16[dominant];

    // Per-lane candidates: (bit index within lane, quality, arrival order).
    let mut lanes: Vec<Vec<(u8, u8, usize)>> = vec![Vec::new(); (LANE_GRID * LANE_GRID) as usize];
    for (idx, m) in survivors.iter().enumerate() {
        let dx = m.x as i64 - cx;
        let dy = m.y as i64 - cy;
        // Rotate by -rot_deg so the dominant direction lands on zero.
        let rx = q16_round(dx * cos + dy * sin);
        let ry = q16_round(-dx * sin + dy * cos);
        let theta = (m.theta + 360 - rot_deg) % 360;

        let xi = rx.div_euclid(grid);
        let yi = ry.div_euclid(grid);
        let ti = (theta as u32 * bins / 360) % bins;

        // Two phase-offset tilings per minutia. The offset grid places
        // its cell boundaries where the primary grid has interiors, so
        // a point sitting on one boundary is stable in the other
        // tiling, and unrelated constellations land far apart in at
        // least one of them.
        for phase in [0i64, FINE_PER_CELL / 2] {
            let (lane, bit) = lane_bit(xi, yi, ti, bins, phase);
            lanes[lane].push((bit, m.quality, idx));
        }
    }

    // Spill-over: each lane keeps its highest-quality minutiae up to the
    // capacity cap; ties resolve by arrival order so the outcome is
    // deterministic.
    let mut template = Template::zeroed();
    for (lane, mut candidates) in lanes.into_iter().enumerate() {
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        for (bit, _, _) in candidates.into_iter().take(config.lane_capacity) {
            template.set_bit(lane * 8 + bit as usize);
        }
    }

    debug!(
        finger = %capture.finger_id,
        survivors = survivors.len(),
        set_bits = template.count_ones(),
        "capture quantized"
    );
    Ok(template)
}

/// Round a Q16 fixed-point value to the nearest integer.
fn q16_round(v: i64) -> i64 {
    (v + 32768) >> 16
}

/// Map a fine-binned triple onto a lane and a bit within it, under a
/// phase-shifted tiling.
///
/// The coarse cell wraps onto the 8x8 lane grid: neighboring cells
/// stay in neighboring lanes except across the wrap seam. The bit
/// combines the fine sub-quadrant with one orientation bit; the two
/// phases consume different orientation bits so together they encode
/// the orientation quarter.
fn lane_bit(xi: i64, yi: i64, ti: u32, bins: u32, phase: i64) -> (usize, u8) {
    let px = xi + phase;
    let py = yi + phase;
    let cx = px.div_euclid(FINE_PER_CELL).rem_euclid(LANE_GRID);
    let cy = py.div_euclid(FINE_PER_CELL).rem_euclid(LANE_GRID);
    let lane = (cy * LANE_GRID + cx) as usize;

    let qx = (px.rem_euclid(FINE_PER_CELL) >> 1) as u8;
    let qy = (py.rem_euclid(FINE_PER_CELL) >> 1) as u8;
    let orient = if phase == 0 {
        (ti >= bins / 2) as u8
    } else {
        (ti % (bins / 2) >= bins / 4) as u8
    };
    (lane, (qx << 2) | (qy << 1) | orient)
}
