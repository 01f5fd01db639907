//! Deterministic `did:cardano` derivation.
//!
//! A DID is the BLAKE2b-256 digest of the master key, base58-encoded
//! under the chosen network. Nothing else feeds the derivation: not the
//! wallet address, not the enrollment time, not the helper data.
//! Whoever reproduces the master key reproduces the DID.

use crate::error::{IdentityError, IdentityResult};
use blake2::digest::consts::U32;
use blake2::digest::Digest;
use blake2::Blake2b;
use decdid_crypto::MasterKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use subtle::{Choice, ConstantTimeEq};

type Blake2b256 = Blake2b<U32>;

/// The DID method this crate produces.
pub const DID_METHOD: &str = "cardano";

/// Cardano network a DID is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Cardano mainnet.
    Mainnet,
    /// Cardano testnet.
    Testnet,
}

impl Network {
    /// The lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

/// BLAKE2b-256 digest of a master key, hex-encoded.
///
/// This is the `id_hash` carried in metadata and presented as the
/// expected value during verification. It reveals nothing about the
/// key beyond a fixed one-way digest.
pub fn id_hash_hex(master_key: &MasterKey) -> String {
    hex::encode(id_hash(master_key))
}

/// BLAKE2b-256 digest of a master key.
pub fn id_hash(master_key: &MasterKey) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    Digest::update(&mut hasher, master_key.as_bytes());
    let out = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    digest
}

/// A canonical `did:cardano` identifier.
#[derive(Clone)]
pub struct CardanoDid {
    network: Network,
    fingerprint: String,
}

impl CardanoDid {
    /// Derive the DID for a master key on a network.
    ///
    /// The derivation is a fixed hash of the master key alone. Wallet
    /// addresses and timestamps never enter it, so presenting a
    /// different wallet cannot move the identifier; an enrollment
    /// that derives a fresh master key (fresh salts) derives a fresh
    /// identifier.
    pub fn derive(master_key: &MasterKey, network: Network) -> Self {
        let digest = id_hash(master_key);
        Self {
            network,
            fingerprint: bs58::encode(digest).into_string(),
        }
    }

    /// The network component.
    pub fn network(&self) -> Network {
        self.network
    }

    /// The base58 method-specific identifier.
    pub fn method_specific_id(&self) -> &str {
        &self.fingerprint
    }
}

impl ConstantTimeEq for CardanoDid {
    fn ct_eq(&self, other: &Self) -> Choice {
        let network_eq = Choice::from((self.network == other.network) as u8);
        // Fingerprint lengths are public (43 or 44 characters), only
        // the content is compared in constant time.
        network_eq & self.fingerprint.as_bytes().ct_eq(other.fingerprint.as_bytes())
    }
}

impl PartialEq for CardanoDid {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).unwrap_u8() == 1
    }
}

impl Eq for CardanoDid {}

impl fmt::Display for CardanoDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}:{}", DID_METHOD, self.network, self.fingerprint)
    }
}

impl fmt::Debug for CardanoDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardanoDid({self})")
    }
}

impl FromStr for CardanoDid {
    type Err = IdentityError;

    fn from_str(s: &str) -> IdentityResult<Self> {
        let mut parts = s.splitn(4, ':');
        let (scheme, method, network, fingerprint) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
            _ => return Err(IdentityError::InvalidDid("expected four segments".into())),
        };
        if scheme != "did" {
            return Err(IdentityError::InvalidDid(format!(
                "scheme must be 'did', got '{scheme}'"
            )));
        }
        if method != DID_METHOD {
            return Err(IdentityError::InvalidDid(format!(
                "method must be '{DID_METHOD}', got '{method}'"
            )));
        }
        let network: Network = network
            .parse()
            .map_err(IdentityError::InvalidDid)?;
        if !(43..=44).contains(&fingerprint.len()) {
            return Err(IdentityError::InvalidDid(format!(
                "identifier must be 43 or 44 characters, got {}",
                fingerprint.len()
            )));
        }
        let decoded = bs58::decode(fingerprint)
            .into_vec()
            .map_err(|e| IdentityError::InvalidDid(format!("base58: {e}")))?;
        if decoded.len() != 32 {
            return Err(IdentityError::InvalidDid(format!(
                "identifier must decode to 32 bytes, got {}",
                decoded.len()
            )));
        }
        Ok(Self {
            network,
            fingerprint: fingerprint.to_string(),
        })
    }
}

impl Serialize for CardanoDid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CardanoDid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
