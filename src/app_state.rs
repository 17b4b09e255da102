use std::sync::Arc;

use crate::services::{queue::JobQueue, storage::ResultStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub store: Arc<dyn ResultStore>,
}

impl AppState {
    pub fn new(queue: Arc<JobQueue>, store: Arc<dyn ResultStore>) -> Self {
        Self { queue, store }
    }
}
