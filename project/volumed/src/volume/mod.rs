pub mod metadata;
pub mod reaper;
pub mod repository;
pub mod strategy;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type Properties = HashMap<String, String>;

/// The API view of a live volume. `size_in_bytes` is only populated by the
/// stats operation; `created_at` lives in the sidecar and is not exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub handle: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<String>,
    pub properties: Properties,
    pub ttl: u64,
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
}

/// Returns whether `properties` contains every entry of `filter`.
pub fn properties_match(properties: &Properties, filter: &Properties) -> bool {
    filter
        .iter()
        .all(|(name, value)| properties.get(name) == Some(value))
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeRequest {
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub strategy: Option<StrategyRequest>,
    #[serde(default)]
    pub properties: Option<Properties>,
    #[serde(default)]
    pub ttl_in_seconds: Option<u64>,
    #[serde(default)]
    pub privileged: Option<bool>,
}

/// The wire form of a creation strategy. Field validation happens in
/// [`strategy::resolve`], not during decoding, so an unusable strategy is
/// distinguishable from an undecodable request.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub parent_handle: Option<String>,
    #[serde(default)]
    pub host_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyRequest {
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtlRequest {
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivilegedRequest {
    pub value: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_properties_match() {
        let full = props(&[("a", "1"), ("b", "2")]);
        assert!(properties_match(&full, &props(&[])));
        assert!(properties_match(&full, &props(&[("a", "1")])));
        assert!(properties_match(&full, &props(&[("a", "1"), ("b", "2")])));
        assert!(!properties_match(&full, &props(&[("a", "2")])));
        assert!(!properties_match(&full, &props(&[("c", "3")])));
    }

    #[test]
    fn test_volume_serialization_omits_absent_fields() {
        let volume = Volume {
            handle: "h".into(),
            path: PathBuf::from("/tmp/h"),
            parent_handle: None,
            properties: Properties::new(),
            ttl: 0,
            privileged: false,
            size_in_bytes: None,
        };
        let json = serde_json::to_value(&volume).unwrap();
        assert!(json.get("parent_handle").is_none());
        assert!(json.get("size_in_bytes").is_none());
    }
}
