//! The volume repository: the in-memory index over the on-disk volume set,
//! and the owner of every mutation.
//!
//! Locking discipline: the index mutex guards handle lookups, insertion and
//! removal, and is only ever held for pointer-speed work. Each volume owns a
//! per-handle lock; anything that mutates a volume or touches its payload
//! holds that lock. Acquisition order is index mutex → clone the entry Arc →
//! release index mutex → per-handle lock → I/O.

use std::collections::HashMap;
use std::io::{self, Seek};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use nix::unistd::{chown, geteuid, Gid, Uid};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task;
use walkdir::WalkDir;

use crate::error::{Result, VolumeError};
use crate::storage::archive;
use crate::storage::paths::PathManager;
use crate::storage::Driver;
use crate::utils::validation;
use crate::volume::metadata::{MetadataStore, VolumeMetadata};
use crate::volume::strategy::Strategy;
use crate::volume::{properties_match, Properties, Volume};

/// Ownership applied to unprivileged volume roots: the uid container
/// runtimes remap namespace root to.
const UNPRIVILEGED_UID: u32 = u32::MAX - 1;
const UNPRIVILEGED_GID: u32 = u32::MAX - 1;

#[derive(Debug, Clone)]
struct VolumeState {
    properties: Properties,
    ttl: u64,
    privileged: bool,
    parent_handle: Option<String>,
    created_at: DateTime<Utc>,
    last_touched: DateTime<Utc>,
}

impl VolumeState {
    fn touch(&mut self) {
        self.last_touched = Utc::now();
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.ttl == 0 {
            return None;
        }
        let ttl = i64::try_from(self.ttl).unwrap_or(i64::MAX);
        TimeDelta::try_seconds(ttl).and_then(|ttl| self.last_touched.checked_add_signed(ttl))
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at(), Some(at) if at <= now)
    }

    fn metadata(&self) -> VolumeMetadata {
        VolumeMetadata {
            properties: self.properties.clone(),
            ttl: self.ttl,
            privileged: self.privileged,
            parent_handle: self.parent_handle.clone(),
            created_at: self.created_at,
        }
    }
}

/// What the per-handle lock protects. Once a slot turns `Gone`, every
/// operation arriving through a stale `Arc` reports the volume as missing.
enum Slot {
    Live(VolumeState),
    Gone,
}

struct VolumeEntry {
    lock: Mutex<Slot>,
}

enum IndexEntry {
    /// Reserves a handle while materialization runs; never observable.
    Creating { parent_handle: Option<String> },
    Live {
        entry: Arc<VolumeEntry>,
        parent_handle: Option<String>,
    },
}

impl IndexEntry {
    fn parent_handle(&self) -> Option<&str> {
        match self {
            IndexEntry::Creating { parent_handle }
            | IndexEntry::Live { parent_handle, .. } => parent_handle.as_deref(),
        }
    }
}

/// A volume the reaper has selected, with the parent reference it needs to
/// order destruction children-first.
#[derive(Debug, Clone)]
pub struct ExpiredVolume {
    pub handle: String,
    pub parent_handle: Option<String>,
}

pub struct Repository {
    driver: Arc<dyn Driver>,
    store: MetadataStore,
    paths: PathManager,
    index: Mutex<HashMap<String, IndexEntry>>,
}

impl Repository {
    /// Builds the repository by reconciling the in-memory index with the
    /// storage root: directories with a readable sidecar come back as live
    /// volumes, directories without one are removed, and sidecars without a
    /// directory are deleted.
    pub async fn recover(driver: Arc<dyn Driver>, paths: PathManager) -> io::Result<Self> {
        tokio::fs::create_dir_all(paths.live_path()).await?;

        let mut directories = Vec::new();
        let mut sidecars = Vec::new();
        let mut read_dir = tokio::fs::read_dir(paths.live_path()).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                directories.push(name);
            } else if let Some(handle) = PathManager::handle_for_metadata(&name) {
                sidecars.push(handle.to_string());
            } else {
                // leftover staging file from an interrupted sidecar write
                tracing::debug!("removing stray file under live dir: {name}");
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }

        let repository = Repository {
            driver,
            store: MetadataStore::new(paths.clone()),
            paths,
            index: Mutex::new(HashMap::new()),
        };

        for handle in directories {
            match repository.store.read(&handle).await {
                Ok(metadata) => {
                    let state = VolumeState {
                        properties: metadata.properties,
                        ttl: metadata.ttl,
                        privileged: metadata.privileged,
                        parent_handle: metadata.parent_handle,
                        created_at: metadata.created_at,
                        last_touched: Utc::now(),
                    };
                    repository.publish(&handle, state).await;
                    tracing::info!(%handle, "recovered volume");
                }
                Err(err) => {
                    tracing::warn!(%handle, "discarding volume without readable metadata: {err}");
                    let path = repository.paths.volume_path(&handle);
                    if let Err(err) = repository.driver.destroy_volume(&path).await {
                        tracing::warn!(%handle, "failed to remove orphaned volume: {err}");
                    }
                }
            }
        }

        for handle in sidecars {
            let known = repository.index.lock().await.contains_key(&handle);
            if !known {
                tracing::warn!(%handle, "removing sidecar without a volume directory");
                let _ = repository.store.remove(&handle).await;
            }
        }

        Ok(repository)
    }

    pub fn paths(&self) -> &PathManager {
        &self.paths
    }

    pub async fn create_volume(
        &self,
        handle: &str,
        strategy: Strategy,
        properties: Properties,
        ttl: u64,
        privileged: bool,
    ) -> Result<Volume> {
        if !validation::is_valid_handle(handle) {
            return Err(VolumeError::BadRequest(format!("invalid handle: {handle:?}")));
        }
        if !properties.keys().all(|name| validation::is_valid_property_name(name)) {
            return Err(VolumeError::BadRequest(
                "property names must not be empty".into(),
            ));
        }

        let parent_handle = strategy.parent_handle().map(String::from);
        {
            let mut index = self.index.lock().await;
            if index.contains_key(handle) {
                return Err(VolumeError::HandleAlreadyExists(handle.to_string()));
            }
            index.insert(
                handle.to_string(),
                IndexEntry::Creating {
                    parent_handle: parent_handle.clone(),
                },
            );
        }

        if let Err(err) = self.materialize(handle, &strategy, privileged).await {
            self.abort_create(handle).await;
            return Err(err);
        }

        let state = VolumeState {
            properties,
            ttl,
            privileged,
            parent_handle,
            created_at: Utc::now(),
            last_touched: Utc::now(),
        };
        if let Err(err) = self.store.write(handle, &state.metadata()).await {
            self.abort_create(handle).await;
            return Err(VolumeError::Internal(err));
        }

        let volume = self.volume_for(handle, &state, None);
        self.publish(handle, state).await;
        tracing::info!(handle, "created volume");
        Ok(volume)
    }

    pub async fn destroy_volume(&self, handle: &str) -> Result<()> {
        self.destroy_inner(handle, false).await.map(|_| ())
    }

    /// Destroys the volume only if it is still expired once the per-handle
    /// lock is held; a concurrent touch or TTL extension makes this a no-op.
    /// Returns whether the volume was destroyed.
    pub async fn reap_volume(&self, handle: &str) -> Result<bool> {
        match self.destroy_inner(handle, true).await {
            Err(VolumeError::NotFound(_)) => Ok(false),
            other => other,
        }
    }

    pub async fn get_volume(&self, handle: &str) -> Result<Volume> {
        let entry = self
            .live_entry(handle)
            .await
            .ok_or_else(|| VolumeError::NotFound(handle.to_string()))?;
        let mut guard = entry.lock.lock().await;
        let state = live_state(&mut guard, handle)?;
        state.touch();
        Ok(self.volume_for(handle, state, None))
    }

    pub async fn get_volume_stats(&self, handle: &str) -> Result<Volume> {
        let entry = self
            .live_entry(handle)
            .await
            .ok_or_else(|| VolumeError::NotFound(handle.to_string()))?;
        let mut guard = entry.lock.lock().await;
        let state = live_state(&mut guard, handle)?;

        let path = self.paths.volume_path(handle);
        let size = task::spawn_blocking(move || payload_size(&path))
            .await
            .map_err(io::Error::other)?;

        state.touch();
        Ok(self.volume_for(handle, state, Some(size)))
    }

    pub async fn list_volumes(&self, filter: &Properties) -> Vec<Volume> {
        let snapshot: Vec<(String, Arc<VolumeEntry>)> = {
            let index = self.index.lock().await;
            index
                .iter()
                .filter_map(|(handle, entry)| match entry {
                    IndexEntry::Live { entry, .. } => Some((handle.clone(), entry.clone())),
                    IndexEntry::Creating { .. } => None,
                })
                .collect()
        };

        let mut volumes = Vec::new();
        for (handle, entry) in snapshot {
            let guard = entry.lock.lock().await;
            if let Slot::Live(state) = &*guard {
                if properties_match(&state.properties, filter) {
                    volumes.push(self.volume_for(&handle, state, None));
                }
            }
        }
        volumes.sort_by(|a, b| a.handle.cmp(&b.handle));
        volumes
    }

    pub async fn set_property(&self, handle: &str, name: &str, value: &str) -> Result<()> {
        if !validation::is_valid_property_name(name) {
            return Err(VolumeError::BadRequest(
                "property names must not be empty".into(),
            ));
        }
        self.update(handle, |state| {
            state.properties.insert(name.to_string(), value.to_string());
        })
        .await
    }

    pub async fn set_ttl(&self, handle: &str, ttl: u64) -> Result<()> {
        self.update(handle, |state| state.ttl = ttl).await
    }

    pub async fn set_privileged(&self, handle: &str, privileged: bool) -> Result<()> {
        let entry = self
            .live_entry(handle)
            .await
            .ok_or_else(|| VolumeError::NotFound(handle.to_string()))?;
        let mut guard = entry.lock.lock().await;
        let state = live_state(&mut guard, handle)?;

        self.apply_ownership(&self.paths.volume_path(handle), privileged)?;

        let mut updated = state.clone();
        updated.privileged = privileged;
        updated.touch();
        self.store.write(handle, &updated.metadata()).await?;
        *state = updated;
        Ok(())
    }

    pub async fn stream_in(
        &self,
        handle: &str,
        sub_path: &str,
        mut input: impl AsyncRead + Unpin + Send,
    ) -> Result<()> {
        let entry = self
            .live_entry(handle)
            .await
            .ok_or_else(|| VolumeError::NotFound(handle.to_string()))?;
        let mut guard = entry.lock.lock().await;
        let state = live_state(&mut guard, handle)?;

        let root = self.paths.volume_path(handle);
        let dest = validation::resolve_sub_path(&root, sub_path).ok_or_else(|| {
            VolumeError::StreamMalformed(format!("sub path escapes the volume: {sub_path}"))
        })?;
        tokio::fs::create_dir_all(&dest).await?;

        // spool the body first so tar parsing can run on a blocking thread
        let spool = task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(io::Error::other)??;
        let mut spool = tokio::fs::File::from_std(spool);
        tokio::io::copy(&mut input, &mut spool).await?;
        spool.flush().await?;
        spool.rewind().await?;

        let privileged = state.privileged;
        let spool = spool.into_std().await;
        let unpacked = task::spawn_blocking(move || archive::unpack(spool, &dest, privileged))
            .await
            .map_err(io::Error::other)?;

        match unpacked {
            Ok(()) => {
                state.touch();
                Ok(())
            }
            Err(err) if is_malformed(&err) => Err(VolumeError::StreamMalformed(err.to_string())),
            Err(err) => Err(VolumeError::Internal(err)),
        }
    }

    /// Packs `sub_path` into a gzipped tar staged in an unlinked temp file
    /// and returns it ready for streaming to the client.
    pub async fn stream_out(&self, handle: &str, sub_path: &str) -> Result<tokio::fs::File> {
        let entry = self
            .live_entry(handle)
            .await
            .ok_or_else(|| VolumeError::NotFound(handle.to_string()))?;
        let mut guard = entry.lock.lock().await;
        let state = live_state(&mut guard, handle)?;

        let root = self.paths.volume_path(handle);
        let src = validation::resolve_sub_path(&root, sub_path)
            .ok_or_else(|| VolumeError::SubPathNotFound(format!("{handle}:{sub_path}")))?;
        match tokio::fs::symlink_metadata(&src).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VolumeError::SubPathNotFound(format!("{handle}:{sub_path}")));
            }
            Err(err) => return Err(VolumeError::Internal(err)),
        }

        let archive_file = task::spawn_blocking(move || -> io::Result<std::fs::File> {
            let mut file = tempfile::tempfile()?;
            archive::pack(&src, &mut file)?;
            file.rewind()?;
            Ok(file)
        })
        .await
        .map_err(io::Error::other)??;

        state.touch();
        Ok(tokio::fs::File::from_std(archive_file))
    }

    /// Snapshot of every volume currently past its expiry. Advisory, like
    /// any listing: the reaper re-checks under the per-handle lock.
    pub async fn expired_volumes(&self) -> Vec<ExpiredVolume> {
        let snapshot: Vec<(String, Arc<VolumeEntry>, Option<String>)> = {
            let index = self.index.lock().await;
            index
                .iter()
                .filter_map(|(handle, entry)| match entry {
                    IndexEntry::Live {
                        entry,
                        parent_handle,
                    } => Some((handle.clone(), entry.clone(), parent_handle.clone())),
                    IndexEntry::Creating { .. } => None,
                })
                .collect()
        };

        let now = Utc::now();
        let mut expired = Vec::new();
        for (handle, entry, parent_handle) in snapshot {
            let guard = entry.lock.lock().await;
            if let Slot::Live(state) = &*guard {
                if state.expired(now) {
                    expired.push(ExpiredVolume {
                        handle,
                        parent_handle,
                    });
                }
            }
        }
        expired
    }

    async fn materialize(&self, handle: &str, strategy: &Strategy, privileged: bool) -> Result<()> {
        let path = self.paths.volume_path(handle);
        match strategy {
            Strategy::Empty => self.driver.create_volume(&path).await?,
            Strategy::CowFrom { parent_handle } => {
                let parent = self
                    .live_entry(parent_handle)
                    .await
                    .ok_or_else(|| VolumeError::ParentNotFound(parent_handle.clone()))?;
                let parent_guard = parent.lock.lock().await;
                if !matches!(&*parent_guard, Slot::Live(_)) {
                    return Err(VolumeError::ParentNotFound(parent_handle.clone()));
                }
                let parent_path = self.paths.volume_path(parent_handle);
                self.driver.create_cow_volume(&parent_path, &path).await?;
            }
            Strategy::Import { host_path } => {
                self.driver.import_volume(host_path, &path).await?;
            }
        }
        self.apply_ownership(&path, privileged)?;
        Ok(())
    }

    /// Unwind of a failed creation: the half-made directory is removed
    /// best-effort and the reservation is withdrawn.
    async fn abort_create(&self, handle: &str) {
        let path = self.paths.volume_path(handle);
        if let Err(err) = self.driver.destroy_volume(&path).await {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(handle, "failed to clean up partially-created volume: {err}");
            }
        }
        if let Err(err) = self.store.remove(handle).await {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(handle, "failed to clean up volume metadata: {err}");
            }
        }
        self.index.lock().await.remove(handle);
    }

    async fn destroy_inner(&self, handle: &str, only_if_expired: bool) -> Result<bool> {
        let entry = self
            .live_entry(handle)
            .await
            .ok_or_else(|| VolumeError::NotFound(handle.to_string()))?;
        let mut guard = entry.lock.lock().await;
        let state = live_state(&mut guard, handle)?;

        if only_if_expired && !state.expired(Utc::now()) {
            return Ok(false);
        }

        // Snapshots on the plain backend are deep copies whose parent link
        // is still advertised, so the parent must outlive them.
        if !self.driver.supports_cow() {
            let index = self.index.lock().await;
            let has_children = index
                .iter()
                .any(|(other, entry)| other != handle && entry.parent_handle() == Some(handle));
            drop(index);
            if has_children {
                return Err(VolumeError::HasChildren(handle.to_string()));
            }
        }

        self.driver
            .destroy_volume(&self.paths.volume_path(handle))
            .await?;
        if let Err(err) = self.store.remove(handle).await {
            if err.kind() != io::ErrorKind::NotFound {
                // recovery removes directory-less sidecars on next start
                tracing::warn!(handle, "failed to remove metadata sidecar: {err}");
            }
        }
        *guard = Slot::Gone;
        drop(guard);

        self.index.lock().await.remove(handle);
        tracing::info!(handle, "destroyed volume");
        Ok(true)
    }

    async fn update(&self, handle: &str, apply: impl FnOnce(&mut VolumeState)) -> Result<()> {
        let entry = self
            .live_entry(handle)
            .await
            .ok_or_else(|| VolumeError::NotFound(handle.to_string()))?;
        let mut guard = entry.lock.lock().await;
        let state = live_state(&mut guard, handle)?;

        let mut updated = state.clone();
        apply(&mut updated);
        updated.touch();
        self.store.write(handle, &updated.metadata()).await?;
        *state = updated;
        Ok(())
    }

    async fn live_entry(&self, handle: &str) -> Option<Arc<VolumeEntry>> {
        let index = self.index.lock().await;
        match index.get(handle) {
            Some(IndexEntry::Live { entry, .. }) => Some(entry.clone()),
            _ => None,
        }
    }

    async fn publish(&self, handle: &str, state: VolumeState) {
        let parent_handle = state.parent_handle.clone();
        let mut index = self.index.lock().await;
        index.insert(
            handle.to_string(),
            IndexEntry::Live {
                entry: Arc::new(VolumeEntry {
                    lock: Mutex::new(Slot::Live(state)),
                }),
                parent_handle,
            },
        );
    }

    fn apply_ownership(&self, path: &Path, privileged: bool) -> io::Result<()> {
        if !geteuid().is_root() {
            tracing::debug!(
                "not running as root, leaving ownership of {} unchanged",
                path.display()
            );
            return Ok(());
        }
        let (uid, gid) = if privileged {
            (0, 0)
        } else {
            (UNPRIVILEGED_UID, UNPRIVILEGED_GID)
        };
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(io::Error::from)
    }

    fn volume_for(&self, handle: &str, state: &VolumeState, size: Option<u64>) -> Volume {
        Volume {
            handle: handle.to_string(),
            path: self.paths.volume_path(handle),
            parent_handle: state.parent_handle.clone(),
            properties: state.properties.clone(),
            ttl: state.ttl,
            privileged: state.privileged,
            size_in_bytes: size,
        }
    }
}

fn live_state<'a>(guard: &'a mut Slot, handle: &str) -> Result<&'a mut VolumeState> {
    match guard {
        Slot::Live(state) => Ok(state),
        Slot::Gone => Err(VolumeError::NotFound(handle.to_string())),
    }
}

fn is_malformed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
    )
}

/// Recursive payload usage. Entries that disappear mid-walk are skipped;
/// usage is a point-in-time estimate either way.
fn payload_size(path: &Path) -> u64 {
    let mut total = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("skipping unreadable entry during size walk: {err}");
                continue;
            }
        };
        if entry.file_type().is_file() {
            total += entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        }
    }
    total
}
