//! Snapshotting backend shelling out to the `btrfs` tool.
//!
//! Subvolume snapshots share extents with their parent, so destroying a
//! parent leaves children intact and `supports_cow` is true.

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::task;

use crate::storage::Driver;

use super::copy_tree;

#[derive(Debug)]
pub struct BtrfsDriver {
    btrfs_bin: PathBuf,
}

impl BtrfsDriver {
    pub fn new() -> Self {
        BtrfsDriver {
            btrfs_bin: PathBuf::from("btrfs"),
        }
    }

    async fn run<I, S>(&self, args: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.btrfs_bin).args(args).output().await?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "btrfs exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Default for BtrfsDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for BtrfsDriver {
    async fn create_volume(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.run([OsStr::new("subvolume"), OsStr::new("create"), path.as_os_str()])
            .await
    }

    async fn create_cow_volume(&self, parent: &Path, path: &Path) -> io::Result<()> {
        self.run([
            OsStr::new("subvolume"),
            OsStr::new("snapshot"),
            parent.as_os_str(),
            path.as_os_str(),
        ])
        .await
    }

    async fn import_volume(&self, host_path: &Path, path: &Path) -> io::Result<()> {
        self.create_volume(path).await?;
        let host_path = host_path.to_path_buf();
        let path = path.to_path_buf();
        task::spawn_blocking(move || copy_tree(&host_path, &path))
            .await
            .map_err(io::Error::other)?
    }

    async fn destroy_volume(&self, path: &Path) -> io::Result<()> {
        self.run([OsStr::new("subvolume"), OsStr::new("delete"), path.as_os_str()])
            .await
    }

    fn supports_cow(&self) -> bool {
        true
    }
}
