// PathManager maps volume handles to locations under the storage root.
//
// The on-disk layout is:
//
//	<root>
//	└── live
//	    ├── <handle>/           volume payload
//	    └── <handle>.meta.json  sidecar metadata
//
// The sidecar sits next to the payload directory, not inside it, so that
// user-streamed archive contents can never collide with it.

use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct PathManager {
    root: PathBuf,
}

impl PathManager {
    pub fn new(root: &Path) -> Self {
        PathManager {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding every live volume,
    /// (e.g. `<root>/live`).
    pub fn live_path(&self) -> PathBuf {
        self.root.join("live")
    }

    /// Returns the payload directory for a handle,
    /// (e.g. `<root>/live/<handle>`).
    pub fn volume_path(&self, handle: &str) -> PathBuf {
        self.live_path().join(handle)
    }

    /// Returns the metadata sidecar for a handle,
    /// (e.g. `<root>/live/<handle>.meta.json`).
    pub fn metadata_path(&self, handle: &str) -> PathBuf {
        self.live_path().join(format!("{handle}.meta.json"))
    }

    /// Returns the temp file the sidecar is staged at before the rename
    /// that publishes it.
    pub fn metadata_tmp_path(&self, handle: &str) -> PathBuf {
        self.live_path().join(format!("{handle}.meta.json.tmp"))
    }

    /// Extracts the handle a sidecar file belongs to, if the file name is a
    /// sidecar name.
    pub fn handle_for_metadata(file_name: &str) -> Option<&str> {
        file_name.strip_suffix(".meta.json")
    }
}
