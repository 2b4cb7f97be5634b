//! Sidecar metadata persistence.
//!
//! Each volume has a `<handle>.meta.json` next to its payload directory.
//! Writes stage to a temp file and rename into place so readers never see
//! a torn sidecar. Reads are best-effort: startup recovery discards any
//! directory whose sidecar is missing or unreadable.

use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::storage::paths::PathManager;
use crate::volume::Properties;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMetadata {
    #[serde(default)]
    pub properties: Properties,
    pub ttl: u64,
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct MetadataStore {
    paths: PathManager,
}

impl MetadataStore {
    pub fn new(paths: PathManager) -> Self {
        MetadataStore { paths }
    }

    pub async fn write(&self, handle: &str, metadata: &VolumeMetadata) -> io::Result<()> {
        let content = serde_json::to_vec_pretty(metadata).map_err(io::Error::other)?;
        let tmp = self.paths.metadata_tmp_path(handle);
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, self.paths.metadata_path(handle)).await
    }

    pub async fn read(&self, handle: &str) -> io::Result<VolumeMetadata> {
        let content = fs::read(self.paths.metadata_path(handle)).await?;
        serde_json::from_slice(&content).map_err(io::Error::other)
    }

    pub async fn remove(&self, handle: &str) -> io::Result<()> {
        fs::remove_file(self.paths.metadata_path(handle)).await
    }
}
