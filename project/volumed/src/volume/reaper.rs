//! Background destruction of expired volumes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::volume::repository::{ExpiredVolume, Repository};

pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Reaper {
    repository: Arc<Repository>,
    interval: Duration,
}

impl Reaper {
    pub fn new(repository: Arc<Repository>, interval: Duration) -> Self {
        Reaper {
            repository,
            interval,
        }
    }

    /// Runs until `shutdown` fires. Each tick destroys whatever is expired;
    /// failures are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.reap_once().await,
                _ = shutdown.changed() => {
                    tracing::info!("reaper shutting down");
                    return;
                }
            }
        }
    }

    pub async fn reap_once(&self) {
        let mut expired = self.repository.expired_volumes().await;
        if expired.is_empty() {
            return;
        }

        order_children_first(&mut expired);

        for volume in expired {
            match self.repository.reap_volume(&volume.handle).await {
                Ok(true) => tracing::info!(handle = %volume.handle, "reaped expired volume"),
                Ok(false) => {
                    tracing::debug!(handle = %volume.handle, "volume no longer expired, skipping")
                }
                Err(err) => {
                    tracing::warn!(handle = %volume.handle, "failed to reap volume, will retry: {err}")
                }
            }
        }
    }
}

/// Order the expired set so a volume is always destroyed before any of its
/// ancestors: sort by descending ancestor-chain depth within the set, ties
/// by handle. Required on the plain backend, where a parent cannot be
/// destroyed while children are still live.
fn order_children_first(expired: &mut [ExpiredVolume]) {
    let parents: HashMap<String, Option<String>> = expired
        .iter()
        .map(|volume| (volume.handle.clone(), volume.parent_handle.clone()))
        .collect();

    let depth_of = |handle: &str| -> usize {
        let mut depth = 0;
        let mut current = parents.get(handle).and_then(|parent| parent.as_deref());
        while let Some(parent) = current {
            if depth >= parents.len() {
                // parent cycles cannot happen through the API, but a
                // hand-edited sidecar must not hang the reaper
                break;
            }
            match parents.get(parent) {
                Some(next) => {
                    depth += 1;
                    current = next.as_deref();
                }
                None => break,
            }
        }
        depth
    };

    let depths: HashMap<String, usize> = expired
        .iter()
        .map(|volume| (volume.handle.clone(), depth_of(&volume.handle)))
        .collect();

    expired.sort_by(|a, b| {
        depths[&b.handle]
            .cmp(&depths[&a.handle])
            .then_with(|| a.handle.cmp(&b.handle))
    });
}
