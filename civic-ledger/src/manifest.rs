//! Manifest hashing for complaint integrity.
//!
//! A manifest is the canonical set of immutable complaint facts plus the
//! evidence inventory. Its digest is what gets anchored on the ledger and
//! re-derived later for verification, so the serialization rules below are
//! a hard contract:
//!
//! - `filed_at` is reduced to integer epoch seconds
//! - evidence hashes are sorted lexicographically (and de-duplicated)
//! - keys are sorted, no insignificant whitespace
//! - `description_hash` is SHA-256 of the description
//! - the digest is Keccak-256 over the UTF-8 bytes of the canonical string,
//!   lowercase hex, matching what the ledger contract validates

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use tracing::debug;

/// Immutable complaint facts committed to by the ledger anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplaintManifest {
    pub complaint_id: i64,
    pub description: String,
    pub severity: u8,
    pub filed_at: DateTime<Utc>,
    pub evidence_hashes: Vec<String>,
}

impl ComplaintManifest {
    pub fn new(
        complaint_id: i64,
        description: impl Into<String>,
        severity: u8,
        filed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            complaint_id,
            description: description.into(),
            severity,
            filed_at,
            evidence_hashes: Vec::new(),
        }
    }

    /// Attach the evidence inventory. Order does not matter.
    pub fn with_evidence<I, S>(mut self, hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.evidence_hashes = hashes.into_iter().map(Into::into).collect();
        self
    }

    /// Canonical, whitespace-free serialization with sorted keys.
    pub fn canonical_json(&self) -> String {
        let mut inventory: Vec<&str> = self.evidence_hashes.iter().map(String::as_str).collect();
        inventory.sort_unstable();
        inventory.dedup();

        let mut fields: BTreeMap<&'static str, Value> = BTreeMap::new();
        fields.insert("id", Value::from(self.complaint_id));
        fields.insert("description_hash", Value::from(sha256_hex(self.description.as_bytes())));
        fields.insert(
            "evidence_inventory",
            Value::Array(inventory.into_iter().map(Value::from).collect()),
        );
        fields.insert("initial_severity", Value::from(self.severity));
        fields.insert("timestamp", Value::from(self.filed_at.timestamp()));

        // BTreeMap keeps key order regardless of serde_json's preserve_order feature.
        // Serializing string keys and JSON values cannot fail.
        serde_json::to_string(&fields).unwrap_or_default()
    }

    /// Lowercase hex digest of the canonical serialization.
    pub fn digest(&self) -> String {
        let canonical = self.canonical_json();
        debug!(complaint_id = self.complaint_id, manifest = %canonical, "Hashing manifest");
        keccak256_hex(canonical.as_bytes())
    }
}

/// Keccak-256 (pre-standard SHA-3 padding) of arbitrary bytes as lowercase hex.
pub fn keccak256_hex(data: &[u8]) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 of arbitrary bytes as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Normalize a hex digest for comparison: trimmed, lowercase, no `0x` prefix.
pub fn normalize_digest(digest: &str) -> String {
    let lowered = digest.trim().to_ascii_lowercase();
    match lowered.strip_prefix("0x") {
        Some(stripped) => stripped.to_string(),
        None => lowered,
    }
}

/// Compare two hex digests ignoring case and `0x` prefix.
pub fn digests_match(a: &str, b: &str) -> bool {
    normalize_digest(a) == normalize_digest(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> ComplaintManifest {
        ComplaintManifest::new(
            42,
            "Bribe demanded at ward office",
            7,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
        .with_evidence(["bb11", "aa22"])
    }

    #[test]
    fn test_canonical_json_layout() {
        assert_eq!(
            sample().canonical_json(),
            r#"{"description_hash":"6f4f637942330a797766fc8212903d94dea27eb323465f2009e94cc1b405bb5f","evidence_inventory":["aa22","bb11"],"id":42,"initial_severity":7,"timestamp":1700000000}"#
        );
    }

    #[test]
    fn test_digest_golden_value() {
        assert_eq!(
            sample().digest(),
            "dac27a6737fe1f7f049710f1b5da75ec17678ed5e49c5efa861fb10dc9928773"
        );
    }

    #[test]
    fn test_digest_is_keccak_not_sha256() {
        let canonical = sample().canonical_json();
        assert_eq!(sample().digest(), keccak256_hex(canonical.as_bytes()));
        assert_ne!(sample().digest(), sha256_hex(canonical.as_bytes()));
        // Keccak-256 of the empty string, distinct from SHA3-256
        assert_eq!(
            keccak256_hex(b""),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_digest_independent_of_evidence_order() {
        let reversed = sample().with_evidence(["aa22", "bb11"]);
        assert_eq!(sample().digest(), reversed.digest());
        assert_eq!(sample().digest(), sample().digest());
    }

    #[test]
    fn test_subsecond_precision_is_ignored() {
        let mut manifest = sample();
        manifest.filed_at = Utc.timestamp_opt(1_700_000_000, 999_000_000).unwrap();
        assert_eq!(manifest.digest(), sample().digest());
    }

    #[test]
    fn test_description_change_alters_digest() {
        let mut tampered = sample();
        tampered.description.push_str(" (edited)");
        assert_ne!(tampered.digest(), sample().digest());
    }

    #[test]
    fn test_severity_change_alters_digest() {
        let mut rescored = sample();
        rescored.severity = 8;
        assert_ne!(rescored.digest(), sample().digest());
    }

    #[test]
    fn test_normalize_digest() {
        assert_eq!(normalize_digest("0xABCdef"), "abcdef");
        assert_eq!(normalize_digest("  abcdef "), "abcdef");
        assert!(digests_match("0XAB", "ab"));
        assert!(!digests_match("ab", "ac"));
    }
}
