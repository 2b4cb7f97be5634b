use std::path::{Component, Path, PathBuf};

/// A handle doubles as a directory name under the storage root, so it must
/// be a single normal path segment.
pub fn is_valid_handle(handle: &str) -> bool {
    if handle.is_empty() || handle == "." || handle == ".." {
        return false;
    }
    !handle.contains('/') && !handle.contains('\0')
}

pub fn is_valid_property_name(name: &str) -> bool {
    !name.is_empty()
}

/// Resolve a caller-supplied sub path against a volume root. Returns `None`
/// when the sub path is absolute or would escape the root.
pub fn resolve_sub_path(root: &Path, sub_path: &str) -> Option<PathBuf> {
    if sub_path.is_empty() {
        return Some(root.to_path_buf());
    }

    let sub = Path::new(sub_path);
    for component in sub.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(root.join(sub))
}
