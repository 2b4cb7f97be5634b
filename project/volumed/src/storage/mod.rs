pub mod archive;
pub mod driver;
pub mod paths;

use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DriverChoice;
use driver::btrfs::BtrfsDriver;
use driver::naive::NaiveDriver;

/// The capability set the repository needs from a filesystem backend.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn create_volume(&self, path: &Path) -> io::Result<()>;
    async fn create_cow_volume(&self, parent: &Path, path: &Path) -> io::Result<()>;
    async fn import_volume(&self, host_path: &Path, path: &Path) -> io::Result<()>;
    async fn destroy_volume(&self, path: &Path) -> io::Result<()>;

    /// Whether copy-on-write snapshots are real. When false the repository
    /// refuses to destroy a volume that still has live children.
    fn supports_cow(&self) -> bool;
}

/// Picks the backend once at startup. `Auto` selects btrfs when the storage
/// root sits on a btrfs filesystem and the `btrfs` tool is runnable.
pub fn select_driver(choice: DriverChoice, storage_root: &Path) -> io::Result<Arc<dyn Driver>> {
    std::fs::create_dir_all(storage_root)?;

    let driver: Arc<dyn Driver> = match choice {
        DriverChoice::Btrfs => Arc::new(BtrfsDriver::new()),
        DriverChoice::Naive => Arc::new(NaiveDriver),
        DriverChoice::Auto => {
            if root_is_btrfs(storage_root)? && btrfs_tool_available() {
                tracing::info!("storage root is btrfs, using the snapshotting backend");
                Arc::new(BtrfsDriver::new())
            } else {
                tracing::info!("using the plain-directory backend");
                Arc::new(NaiveDriver)
            }
        }
    };
    Ok(driver)
}

#[cfg(target_os = "linux")]
fn root_is_btrfs(storage_root: &Path) -> io::Result<bool> {
    use nix::sys::statfs::{statfs, BTRFS_SUPER_MAGIC};

    let stat = statfs(storage_root).map_err(io::Error::from)?;
    Ok(stat.filesystem_type() == BTRFS_SUPER_MAGIC)
}

#[cfg(not(target_os = "linux"))]
fn root_is_btrfs(_storage_root: &Path) -> io::Result<bool> {
    Ok(false)
}

fn btrfs_tool_available() -> bool {
    Command::new("btrfs")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_forced_choices() {
        let root = tempdir().unwrap();
        let driver = select_driver(DriverChoice::Naive, root.path()).unwrap();
        assert!(!driver.supports_cow());

        let driver = select_driver(DriverChoice::Btrfs, root.path()).unwrap();
        assert!(driver.supports_cow());
    }

    #[test]
    fn test_select_creates_storage_root() {
        let root = tempdir().unwrap();
        let nested = root.path().join("a/b");
        select_driver(DriverChoice::Naive, &nested).unwrap();
        assert!(nested.is_dir());
    }
}
