use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::api::errors::FlagError;
use crate::flags::flag_service::{FlagListing, ReadSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureEntry {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagListResponse {
    pub features: BTreeMap<String, FeatureEntry>,
    /// Only present when the listing was served from the local cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ReadSource>,
}

impl From<FlagListing> for FlagListResponse {
    fn from(listing: FlagListing) -> Self {
        let features = listing
            .features
            .into_iter()
            .map(|(name, enabled)| (name, FeatureEntry { enabled }))
            .collect();

        let source = match listing.source {
            ReadSource::Store => None,
            ReadSource::LocalCache => Some(ReadSource::LocalCache),
        };

        Self { features, source }
    }
}

/// Validates the `{"enabled": bool}` body of an update.
pub fn parse_update_body(body: &Bytes) -> Result<bool, FlagError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| FlagError::InvalidRequestBody("Invalid JSON body".to_string()))?;

    match value.get("enabled") {
        None => Err(FlagError::InvalidRequestBody(
            r#"Missing "enabled" field"#.to_string(),
        )),
        Some(Value::Bool(enabled)) => Ok(*enabled),
        Some(_) => Err(FlagError::InvalidRequestBody(
            r#""enabled" field must be a boolean"#.to_string(),
        )),
    }
}

/// Create accepts an empty body, or any JSON document (currently ignored).
pub fn validate_create_body(body: &Bytes) -> Result<(), FlagError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    serde_json::from_slice::<Value>(body)
        .map(|_| ())
        .map_err(|_| FlagError::InvalidRequestBody("Invalid JSON body".to_string()))
}
