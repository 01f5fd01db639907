//! Minutiae capture types and the canonical finger enumeration.

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum x/y coordinate in micrometers.
pub const MAX_COORD_UM: u16 = 50_000;

/// Maximum orientation in degrees.
pub const MAX_THETA_DEG: u16 = 359;

/// Minimum minutiae per capture accepted at the input boundary.
pub const MIN_MINUTIAE: usize = 10;

/// Maximum minutiae per capture accepted at the input boundary.
pub const MAX_MINUTIAE: usize = 150;

/// A ridge ending or bifurcation extracted from a fingerprint image.
///
/// Coordinates are micrometers in sensor space, the orientation is in
/// degrees. The wire form is the bare triple `[x, y, theta]`; extractors
/// that score individual points may append a fourth element
/// `[x, y, theta, quality]`. A missing per-point quality reads as 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Minutia {
    /// X coordinate in micrometers.
    pub x: u16,
    /// Y coordinate in micrometers.
    pub y: u16,
    /// Ridge orientation in degrees, `0..=359`.
    pub theta: u16,
    /// Per-point extractor confidence, `0..=100`.
    pub quality: u8,
}

impl Minutia {
    /// Create a minutia with full per-point confidence.
    pub fn new(x: u16, y: u16, theta: u16) -> Self {
        Self {
            x,
            y,
            theta,
            quality: 100,
        }
    }

    /// Whether all fields are inside their documented ranges.
    pub fn in_bounds(&self) -> bool {
        self.x <= MAX_COORD_UM
            && self.y <= MAX_COORD_UM
            && self.theta <= MAX_THETA_DEG
            && self.quality <= 100
    }
}

impl Serialize for Minutia {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.quality == 100 { 3 } else { 4 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.x)?;
        seq.serialize_element(&self.y)?;
        seq.serialize_element(&self.theta)?;
        if self.quality != 100 {
            seq.serialize_element(&(self.quality as u16))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Minutia {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MinutiaVisitor;

        impl<'de> Visitor<'de> for MinutiaVisitor {
            type Value = Minutia;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sequence [x, y, theta] or [x, y, theta, quality]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Minutia, A::Error> {
                let x: u16 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let y: u16 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let theta: u16 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let quality: u8 = match seq.next_element::<u16>()? {
                    Some(q) if q <= u8::MAX as u16 => q as u8,
                    Some(q) => {
                        return Err(de::Error::invalid_value(
                            de::Unexpected::Unsigned(q as u64),
                            &"a quality in 0..=100",
                        ))
                    }
                    None => 100,
                };
                if seq.next_element::<u16>()?.is_some() {
                    return Err(de::Error::invalid_length(5, &self));
                }
                Ok(Minutia {
                    x,
                    y,
                    theta,
                    quality,
                })
            }
        }

        deserializer.deserialize_seq(MinutiaVisitor)
    }
}

/// The ten fingers, in canonical order.
///
/// The ordering is fixed: left hand thumb-to-little first, then the
/// right hand. The discriminant doubles as the 1-byte wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerId {
    /// Left thumb.
    LeftThumb,
    /// Left index finger.
    LeftIndex,
    /// Left middle finger.
    LeftMiddle,
    /// Left ring finger.
    LeftRing,
    /// Left little finger.
    LeftLittle,
    /// Right thumb.
    RightThumb,
    /// Right index finger.
    RightIndex,
    /// Right middle finger.
    RightMiddle,
    /// Right ring finger.
    RightRing,
    /// Right little finger.
    RightLittle,
}

impl FingerId {
    /// All fingers in canonical order.
    pub const ALL: [FingerId; 10] = [
        FingerId::LeftThumb,
        FingerId::LeftIndex,
        FingerId::LeftMiddle,
        FingerId::LeftRing,
        FingerId::LeftLittle,
        FingerId::RightThumb,
        FingerId::RightIndex,
        FingerId::RightMiddle,
        FingerId::RightRing,
        FingerId::RightLittle,
    ];

    /// Canonical 1-byte encoding, `0..=9`.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Decode from the canonical 1-byte encoding.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    /// The snake_case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            FingerId::LeftThumb => "left_thumb",
            FingerId::LeftIndex => "left_index",
            FingerId::LeftMiddle => "left_middle",
            FingerId::LeftRing => "left_ring",
            FingerId::LeftLittle => "left_little",
            FingerId::RightThumb => "right_thumb",
            FingerId::RightIndex => "right_index",
            FingerId::RightMiddle => "right_middle",
            FingerId::RightRing => "right_ring",
            FingerId::RightLittle => "right_little",
        }
    }
}

impl fmt::Display for FingerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FingerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FingerId::ALL
            .iter()
            .copied()
            .find(|fid| fid.as_str() == s)
            .ok_or_else(|| format!("unknown finger id: {s}"))
    }
}

/// One fingerprint capture: a finger, its capture-level quality, and
/// the extracted minutiae.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Which finger was captured.
    pub finger_id: FingerId,
    /// Capture-level quality score, `0..=100`.
    pub quality: u8,
    /// Extracted minutiae, `10..=150` entries at the input boundary.
    pub minutiae: Vec<Minutia>,
}

impl Capture {
    /// Create a capture.
    pub fn new(finger_id: FingerId, quality: u8, minutiae: Vec<Minutia>) -> Self {
        Self {
            finger_id,
            quality,
            minutiae,
        }
    }
}
