//! Resolves a creation request into the plan the repository executes.

use std::path::PathBuf;

use crate::error::{Result, VolumeError};
use crate::volume::VolumeRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// A fresh, empty volume.
    Empty,
    /// A copy-on-write child of an existing volume.
    CowFrom { parent_handle: String },
    /// A volume seeded with the contents of a host path.
    Import { host_path: PathBuf },
}

impl Strategy {
    pub fn parent_handle(&self) -> Option<&str> {
        match self {
            Strategy::CowFrom { parent_handle } => Some(parent_handle),
            _ => None,
        }
    }
}

pub fn resolve(request: &VolumeRequest) -> Result<Strategy> {
    let strategy = request
        .strategy
        .as_ref()
        .ok_or_else(|| VolumeError::UnprocessableStrategy("no strategy provided".into()))?;

    match strategy.kind.as_deref() {
        Some("empty") => Ok(Strategy::Empty),
        Some("cow") => match strategy.parent_handle.as_deref() {
            Some(parent) if !parent.is_empty() => Ok(Strategy::CowFrom {
                parent_handle: parent.to_string(),
            }),
            _ => Err(VolumeError::NoParentProvided),
        },
        Some("import") => match &strategy.host_path {
            Some(host_path) if !host_path.as_os_str().is_empty() => Ok(Strategy::Import {
                host_path: host_path.clone(),
            }),
            _ => Err(VolumeError::UnprocessableStrategy(
                "import strategy requires a host path".into(),
            )),
        },
        Some(other) => Err(VolumeError::UnprocessableStrategy(other.to_string())),
        None => Err(VolumeError::UnprocessableStrategy("no strategy type".into())),
    }
}
