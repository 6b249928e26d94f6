use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const LEGACY_ENABLED: &str = "1";
const LEGACY_DISABLED: &str = "0";

/// The structured on-wire form of a flag.
///
/// Members other than `enabled` and `deleted` are kept in `extra` so that
/// rewriting a record never drops data written by someone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub enabled: bool,
    pub deleted: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FlagRecord {
    pub fn new(enabled: bool, deleted: bool) -> Self {
        Self {
            enabled,
            deleted,
            extra: Map::new(),
        }
    }

    /// Same extra members, different state.
    pub fn with_state(&self, enabled: bool, deleted: bool) -> Self {
        Self {
            enabled,
            deleted,
            extra: self.extra.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted && self.enabled
    }
}

/// A decoded store value.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredFlag {
    /// `"1"` or `"0"`, written before soft delete existed. Never deleted.
    Legacy { enabled: bool },
    Structured(FlagRecord),
}

impl StoredFlag {
    pub fn is_active(&self) -> bool {
        match self {
            StoredFlag::Legacy { enabled } => *enabled,
            StoredFlag::Structured(record) => record.is_active(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self {
            StoredFlag::Legacy { .. } => false,
            StoredFlag::Structured(record) => record.deleted,
        }
    }

    /// The record a rewrite starts from. Legacy values upgrade to the structured form.
    pub fn into_record(self) -> FlagRecord {
        match self {
            StoredFlag::Legacy { enabled } => FlagRecord::new(enabled, false),
            StoredFlag::Structured(record) => record,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stored value is not a valid flag record")]
pub struct CorruptedRecord;

pub fn decode(raw: &str) -> Result<StoredFlag, CorruptedRecord> {
    match raw {
        LEGACY_ENABLED => Ok(StoredFlag::Legacy { enabled: true }),
        LEGACY_DISABLED => Ok(StoredFlag::Legacy { enabled: false }),
        _ => serde_json::from_str::<FlagRecord>(raw)
            .map(StoredFlag::Structured)
            .map_err(|_| CorruptedRecord),
    }
}

/// Always emits the structured form.
pub fn encode(record: &FlagRecord) -> String {
    let mut object = record.extra.clone();
    object.insert("enabled".to_string(), Value::Bool(record.enabled));
    object.insert("deleted".to_string(), Value::Bool(record.deleted));
    Value::Object(object).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_legacy() {
        let on = decode("1").unwrap();
        assert_eq!(on, StoredFlag::Legacy { enabled: true });
        assert!(on.is_active());
        assert!(!on.is_deleted());

        let off = decode("0").unwrap();
        assert_eq!(off, StoredFlag::Legacy { enabled: false });
        assert!(!off.is_active());
        assert!(!off.is_deleted());
    }

    #[test]
    fn test_decode_structured() {
        let stored = decode(r#"{"enabled": true, "deleted": false}"#).unwrap();
        assert_eq!(stored, StoredFlag::Structured(FlagRecord::new(true, false)));
        assert!(stored.is_active());
    }

    #[test]
    fn test_deleted_is_never_active() {
        let stored = decode(r#"{"enabled": true, "deleted": true}"#).unwrap();
        assert!(stored.is_deleted());
        assert!(!stored.is_active());
    }

    #[test]
    fn test_decode_corrupted() {
        for raw in [
            "",
            "2",
            "true",
            " 1",
            "{not json",
            "[]",
            r#"{"enabled": true}"#,
            r#"{"deleted": false}"#,
            r#"{"enabled": "yes", "deleted": false}"#,
            r#"{"enabled": 1, "deleted": 0}"#,
        ] {
            assert_eq!(decode(raw), Err(CorruptedRecord), "raw value {raw:?}");
        }
    }

    #[test]
    fn test_encode_is_structured() {
        let raw = encode(&FlagRecord::new(false, true));
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, json!({"enabled": false, "deleted": true}));
    }

    #[test]
    fn test_legacy_upgrades_on_rewrite() {
        let record = decode("1").unwrap().into_record();
        let value: Value = serde_json::from_str(&encode(&record)).unwrap();
        assert_eq!(value, json!({"enabled": true, "deleted": false}));
    }

    #[test]
    fn test_extra_members_survive_rewrite() {
        let raw = r#"{"enabled": true, "deleted": true, "owner": "growth", "meta": {"ticket": 12}}"#;
        let record = decode(raw).unwrap().into_record().with_state(false, false);

        let value: Value = serde_json::from_str(&encode(&record)).unwrap();
        assert_eq!(
            value,
            json!({"enabled": false, "deleted": false, "owner": "growth", "meta": {"ticket": 12}})
        );
    }
}
