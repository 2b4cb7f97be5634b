pub mod btrfs;
pub mod naive;

use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use walkdir::WalkDir;

/// Recursively copy `src` into `dest`, preserving permissions and
/// recreating symlinks. `dest` may already exist (it is created otherwise).
/// Special files are skipped with a warning.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();
        let relative = path
            .strip_prefix(src)
            .map_err(|_| io::Error::other(format!("path outside copy root: {}", path.display())))?;
        let target = dest.join(relative);

        let metadata = fs::symlink_metadata(path)?;
        if metadata.is_dir() {
            fs::create_dir_all(&target)?;
            fs::set_permissions(&target, fs::Permissions::from_mode(metadata.permissions().mode()))?;
        } else if metadata.is_file() {
            fs::copy(path, &target)?;
        } else if metadata.file_type().is_symlink() {
            let link = fs::read_link(path)?;
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            symlink(link, &target)?;
        } else {
            tracing::warn!("skipping special file: {}", path.display());
        }
    }
    Ok(())
}
