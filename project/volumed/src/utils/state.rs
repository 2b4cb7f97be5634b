use std::sync::Arc;

use crate::volume::repository::Repository;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<Repository>,
}

impl AppState {
    pub fn new(repository: Arc<Repository>) -> Self {
        AppState { repository }
    }
}
