// not every suite uses every helper
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use volumed::storage::driver::naive::NaiveDriver;
use volumed::storage::paths::PathManager;
use volumed::volume::repository::Repository;
use volumed::volume::strategy::Strategy;
use volumed::volume::Properties;

pub async fn repository(root: &Path) -> Arc<Repository> {
    Arc::new(
        Repository::recover(Arc::new(NaiveDriver), PathManager::new(root))
            .await
            .unwrap(),
    )
}

pub fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub async fn create_empty(repository: &Repository, handle: &str, ttl: u64) {
    repository
        .create_volume(handle, Strategy::Empty, Properties::new(), ttl, false)
        .await
        .unwrap();
}
