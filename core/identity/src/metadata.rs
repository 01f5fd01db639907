//! Verifiable biometric metadata records.
//!
//! Metadata carries everything a verifier needs except the biometric
//! itself: the DID, the master key digest, controller wallets, and the
//! per-finger helper data (inline or as content-addressed external
//! references). Serialization is canonical: struct field order is
//! fixed, collections are ordered, and there are no floats, so the
//! same record always produces the same bytes for content addressing.

use crate::did::CardanoDid;
use crate::error::{IdentityError, IdentityResult};
use chrono::{DateTime, Utc};
use decdid_crypto::{FingerId, HelperData};
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Metadata schema version produced and accepted by this build.
///
/// Version 1.1 implies XOR share aggregation; records written by the
/// retired hash-concatenation scheme are not cross-compatible and are
/// rejected at parse.
pub const METADATA_VERSION: &str = "1.1";

/// On-chain metadata ceiling in bytes.
pub const METADATA_MAX_BYTES: usize = 16 * 1024;

/// Reference to one finger's helper data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HelperRef {
    /// Helper bytes embedded in the record, base64url without padding.
    Inline {
        /// The 105-byte helper wire form.
        #[serde(with = "base64_field")]
        bytes: Vec<u8>,
    },
    /// Helper stored externally, pinned by a content digest.
    External {
        /// Where the helper bytes live.
        uri: String,
        /// Hex SHA-256 of the helper bytes.
        sha256: String,
    },
}

mod base64_field {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/// The verifiable metadata record for one enrollment.
///
/// Field order is the canonical serialization order; do not reorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricMetadata {
    /// Schema version, always [`METADATA_VERSION`] for new records.
    pub version: String,
    /// The subject's DID.
    pub did: CardanoDid,
    /// Hex BLAKE2b-256 of the master key.
    pub id_hash: String,
    /// Wallets authorized to act for the subject.
    pub controllers: BTreeSet<String>,
    /// Helper data per enrolled finger.
    pub helpers: BTreeMap<FingerId, HelperRef>,
    /// Enrollment time.
    pub enrolled_at: DateTime<Utc>,
    /// Fingers whose helpers verifiers must refuse.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub revoked_fingers: BTreeSet<FingerId>,
    /// Most recent revocation time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl BiometricMetadata {
    /// Canonical JSON bytes of this record.
    pub fn to_canonical_json(&self) -> IdentityResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a record, rejecting unknown schema versions.
    pub fn from_json(json: &str) -> IdentityResult<Self> {
        let record: BiometricMetadata = serde_json::from_str(json)?;
        if record.version != METADATA_VERSION {
            return Err(IdentityError::UnsupportedVersion(record.version));
        }
        Ok(record)
    }

    /// Authorize another controller wallet. The DID is unaffected.
    pub fn add_controller(&mut self, wallet_address: impl Into<String>) {
        self.controllers.insert(wallet_address.into());
    }

    /// Remove a controller wallet. Returns whether it was present.
    pub fn remove_controller(&mut self, wallet_address: &str) -> bool {
        self.controllers.remove(wallet_address)
    }

    /// Record a finger revocation.
    ///
    /// The helper entry is dropped so verifiers can no longer obtain
    /// it, and the finger is listed as revoked so stale copies are
    /// refused.
    pub fn mark_revoked(&mut self, finger_id: FingerId, at: DateTime<Utc>) {
        self.helpers.remove(&finger_id);
        self.revoked_fingers.insert(finger_id);
        self.revoked_at = Some(at);
    }
}

/// Optional external home for helper bytes when inline assembly would
/// exceed the metadata ceiling.
#[derive(Debug, Clone)]
pub struct ExternalHelperStore {
    /// Base URI; helper URIs are `{base}/{finger}.helper`.
    pub base_uri: String,
}

impl ExternalHelperStore {
    fn reference(&self, finger_id: FingerId, helper: &HelperData) -> HelperRef {
        let bytes = helper.to_bytes();
        let digest = Sha256::digest(bytes);
        HelperRef::External {
            uri: format!("{}/{}.helper", self.base_uri.trim_end_matches('/'), finger_id),
            sha256: hex::encode(digest),
        }
    }
}

/// Assembles metadata records under the size ceiling.
///
/// Helpers are embedded inline by default. If the inline record would
/// exceed the ceiling and an external store is configured, the
/// assembler switches every helper to a `{uri, sha256}` reference;
/// without a store the assembly fails with
/// [`IdentityError::MetadataOversize`].
#[derive(Debug, Clone, Default)]
pub struct MetadataAssembler {
    external: Option<ExternalHelperStore>,
    limit: Option<usize>,
}

impl MetadataAssembler {
    /// An assembler with inline helpers and the default ceiling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an external helper store when inline assembly is oversize.
    pub fn with_external_store(mut self, store: ExternalHelperStore) -> Self {
        self.external = Some(store);
        self
    }

    /// Override the size ceiling. Intended for tests.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Build the metadata record for an enrollment.
    pub fn assemble(
        &self,
        did: CardanoDid,
        id_hash: String,
        controllers: BTreeSet<String>,
        helpers: &BTreeMap<FingerId, HelperData>,
        enrolled_at: DateTime<Utc>,
    ) -> IdentityResult<BiometricMetadata> {
        let limit = self.limit.unwrap_or(METADATA_MAX_BYTES);

        let inline = helpers
            .iter()
            .map(|(fid, helper)| {
                (
                    *fid,
                    HelperRef::Inline {
                        bytes: helper.to_bytes().to_vec(),
                    },
                )
            })
            .collect();
        let mut record = BiometricMetadata {
            version: METADATA_VERSION.to_string(),
            did,
            id_hash,
            controllers,
            helpers: inline,
            enrolled_at,
            revoked_fingers: BTreeSet::new(),
            revoked_at: None,
        };

        let size = record.to_canonical_json()?.len();
        if size <= limit {
            return Ok(record);
        }

        let Some(store) = &self.external else {
            return Err(IdentityError::MetadataOversize { size, limit });
        };
        debug!(size, limit, "switching helpers to external references");
        record.helpers = helpers
            .iter()
            .map(|(fid, helper)| (*fid, store.reference(*fid, helper)))
            .collect();
        let size = record.to_canonical_json()?.len();
        if size > limit {
            return Err(IdentityError::MetadataOversize { size, limit });
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::{id_hash_hex, Network};
    use decdid_crypto::MasterKey;

    fn sample_helper(seed: u8) -> HelperData {
        let mut bytes = [0u8; decdid_crypto::HELPER_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(7).wrapping_add(seed);
        }
        HelperData::from_bytes(&bytes).unwrap()
    }

    fn sample_record(fingers: usize) -> BiometricMetadata {
        let key = MasterKey::from_bytes([0x5au8; 32]);
        let did = CardanoDid::derive(&key, Network::Mainnet);
        let helpers: BTreeMap<FingerId, HelperData> = FingerId::ALL
            .iter()
            .take(fingers)
            .map(|fid| (*fid, sample_helper(fid.as_byte())))
            .collect();
        MetadataAssembler::new()
            .assemble(
                did,
                id_hash_hex(&key),
                ["addr1qxy0example".to_string()].into_iter().collect(),
                &helpers,
                "2025-06-01T12:00:00Z".parse().unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn test_canonical_json_is_stable() {
        let record = sample_record(4);
        let a = record.to_canonical_json().unwrap();
        let b = record.clone().to_canonical_json().unwrap();
        assert_eq!(a, b);
        let reparsed = BiometricMetadata::from_json(&a).unwrap();
        assert_eq!(reparsed.to_canonical_json().unwrap(), a);
    }

    #[test]
    fn test_ten_fingers_inline_fit_the_ceiling() {
        let record = sample_record(10);
        let json = record.to_canonical_json().unwrap();
        assert!(json.len() <= METADATA_MAX_BYTES, "size {}", json.len());
        assert!(matches!(
            record.helpers.values().next().unwrap(),
            HelperRef::Inline { .. }
        ));
    }

    #[test]
    fn test_oversize_without_store_is_an_error() {
        let key = MasterKey::from_bytes([0x11u8; 32]);
        let did = CardanoDid::derive(&key, Network::Testnet);
        let helpers: BTreeMap<FingerId, HelperData> = FingerId::ALL
            .iter()
            .take(4)
            .map(|fid| (*fid, sample_helper(fid.as_byte())))
            .collect();
        let err = MetadataAssembler::new()
            .with_limit(256)
            .assemble(
                did,
                id_hash_hex(&key),
                BTreeSet::new(),
                &helpers,
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, IdentityError::MetadataOversize { .. }));
    }

    #[test]
    fn test_oversize_switches_to_external_refs() {
        let key = MasterKey::from_bytes([0x22u8; 32]);
        let did = CardanoDid::derive(&key, Network::Testnet);
        let helpers: BTreeMap<FingerId, HelperData> = FingerId::ALL
            .iter()
            .take(10)
            .map(|fid| (*fid, sample_helper(fid.as_byte())))
            .collect();
        let record = MetadataAssembler::new()
            .with_limit(2048)
            .with_external_store(ExternalHelperStore {
                base_uri: "ipfs://bafyexample/".into(),
            })
            .assemble(
                did,
                id_hash_hex(&key),
                BTreeSet::new(),
                &helpers,
                Utc::now(),
            )
            .unwrap();
        let json = record.to_canonical_json().unwrap();
        assert!(json.len() <= 2048, "size {}", json.len());
        match &record.helpers[&FingerId::LeftThumb] {
            HelperRef::External { uri, sha256 } => {
                assert_eq!(uri, "ipfs://bafyexample/left_thumb.helper");
                assert_eq!(sha256.len(), 64);
            }
            other => panic!("expected external ref, got {other:?}"),
        }
    }

    #[test]
    fn test_external_digest_pins_helper_bytes() {
        let helper = sample_helper(3);
        let store = ExternalHelperStore {
            base_uri: "https://helpers.example".into(),
        };
        let HelperRef::External { sha256, .. } = store.reference(FingerId::LeftRing, &helper)
        else {
            panic!("expected external ref");
        };
        let expected = hex::encode(Sha256::digest(helper.to_bytes()));
        assert_eq!(sha256, expected);
    }

    #[test]
    fn test_controller_changes_do_not_touch_the_did() {
        let mut record = sample_record(4);
        let did_before = record.did.clone();
        record.add_controller("addr1second");
        assert!(record.remove_controller("addr1qxy0example"));
        assert!(!record.remove_controller("addr1missing"));
        assert_eq!(record.did, did_before);
    }

    #[test]
    fn test_revocation_is_recorded() {
        let mut record = sample_record(4);
        let at: DateTime<Utc> = "2025-07-01T00:00:00Z".parse().unwrap();
        record.mark_revoked(FingerId::LeftIndex, at);
        assert!(!record.helpers.contains_key(&FingerId::LeftIndex));
        assert!(record.revoked_fingers.contains(&FingerId::LeftIndex));
        assert_eq!(record.revoked_at, Some(at));
        // The revocation survives the canonical round trip.
        let json = record.to_canonical_json().unwrap();
        let back = BiometricMetadata::from_json(&json).unwrap();
        assert_eq!(back.revoked_fingers, record.revoked_fingers);
    }

    #[test]
    fn test_legacy_versions_are_rejected() {
        let record = sample_record(2);
        let json = record
            .to_canonical_json()
            .unwrap()
            .replace("\"version\":\"1.1\"", "\"version\":\"1.0\"");
        let err = BiometricMetadata::from_json(&json).unwrap_err();
        assert!(matches!(err, IdentityError::UnsupportedVersion(v) if v == "1.0"));
    }
}
