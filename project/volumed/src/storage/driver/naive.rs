//! Plain-directory backend for storage roots without snapshot support.
//!
//! Copy-on-write degrades to a deep copy here; the difference is only
//! observable in disk usage, never through the API.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::task;

use crate::storage::Driver;

use super::copy_tree;

#[derive(Debug, Default)]
pub struct NaiveDriver;

#[async_trait]
impl Driver for NaiveDriver {
    async fn create_volume(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_cow_volume(&self, parent: &Path, path: &Path) -> io::Result<()> {
        let parent = parent.to_path_buf();
        let path = path.to_path_buf();
        task::spawn_blocking(move || copy_tree(&parent, &path))
            .await
            .map_err(io::Error::other)?
    }

    async fn import_volume(&self, host_path: &Path, path: &Path) -> io::Result<()> {
        let host_path = host_path.to_path_buf();
        let path = path.to_path_buf();
        task::spawn_blocking(move || copy_tree(&host_path, &path))
            .await
            .map_err(io::Error::other)?
    }

    async fn destroy_volume(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }

    fn supports_cow(&self) -> bool {
        false
    }
}
