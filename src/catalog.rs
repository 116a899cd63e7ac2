//! Offer catalog types and the persisted cache record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A single offer as published by the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
  /// Short display label
  pub label: String,
  /// Description lines, in display order
  pub desc: Vec<String>,
}

/// The catalog maps offer codes to offers.
///
/// A BTreeMap keeps keys ordered, so the serialized form is canonical and
/// content comparison can work on the serialized bytes.
pub type Catalog = BTreeMap<String, Offer>;

/// Persisted snapshot of the catalog plus the validators needed to
/// revalidate it without re-transferring the body.
///
/// Wire field names are the short forms (`etag`, `lastModified`, `timestamp`,
/// `data`); the long forms are accepted on read for records written by older
/// builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
  /// Opaque strong validator from the last successful fetch
  #[serde(
    rename = "etag",
    alias = "validatorTag",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub validator_tag: Option<String>,

  /// Last-modification validator from the last successful fetch
  #[serde(
    rename = "lastModified",
    alias = "validatorTimestamp",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub validator_timestamp: Option<String>,

  /// When this record was last confirmed valid against the origin
  /// (milliseconds since the epoch)
  #[serde(rename = "timestamp", alias = "fetchedAt")]
  pub fetched_at: i64,

  /// The catalog itself. Required: a record without a payload is malformed
  /// and reads back as absent.
  #[serde(rename = "data", alias = "payload")]
  pub payload: Catalog,
}

/// Current time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

/// Content fingerprint of a catalog: SHA-256 over the canonical JSON form.
/// Equal content always hashes equal because map keys serialize in order.
pub fn fingerprint(catalog: &Catalog) -> String {
  let bytes = serde_json::to_vec(catalog).unwrap_or_default();
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.insert(
      "PROMO10".to_string(),
      Offer {
        label: "Promo 10".to_string(),
        desc: vec!["5GB extra".to_string()],
      },
    );
    catalog
  }

  #[test]
  fn test_record_round_trips_through_json() {
    let record = CacheRecord {
      validator_tag: Some("\"v1\"".to_string()),
      validator_timestamp: Some("Mon, 01 Jan 2024 00:00:00 GMT".to_string()),
      fetched_at: 1_700_000_000_000,
      payload: sample_catalog(),
    };

    let json = serde_json::to_string(&record).unwrap();
    let back: CacheRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, record);
  }

  #[test]
  fn test_record_uses_short_wire_names() {
    let record = CacheRecord {
      validator_tag: Some("v1".to_string()),
      validator_timestamp: None,
      fetched_at: 42,
      payload: Catalog::new(),
    };

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["etag"], "v1");
    assert_eq!(json["timestamp"], 42);
    assert!(json["data"].is_object());
    // Absent validators are omitted, not serialized as null
    assert!(json.get("lastModified").is_none());
  }

  #[test]
  fn test_record_accepts_long_field_names() {
    let json = r#"{
      "validatorTag": "v2",
      "validatorTimestamp": "Tue",
      "fetchedAt": 7,
      "payload": {"A1": {"label": "A", "desc": []}}
    }"#;

    let record: CacheRecord = serde_json::from_str(json).unwrap();
    assert_eq!(record.validator_tag.as_deref(), Some("v2"));
    assert_eq!(record.validator_timestamp.as_deref(), Some("Tue"));
    assert_eq!(record.fetched_at, 7);
    assert_eq!(record.payload.len(), 1);
  }

  #[test]
  fn test_record_without_payload_is_malformed() {
    let json = r#"{"etag": "v1", "timestamp": 7}"#;
    assert!(serde_json::from_str::<CacheRecord>(json).is_err());
  }

  #[test]
  fn test_fingerprint_tracks_content_only() {
    let a = sample_catalog();
    let b = sample_catalog();
    assert_eq!(fingerprint(&a), fingerprint(&b));

    let mut c = sample_catalog();
    c.insert(
      "PROMO20".to_string(),
      Offer {
        label: "Promo 20".to_string(),
        desc: vec![],
      },
    );
    assert_ne!(fingerprint(&a), fingerprint(&c));
  }
}
