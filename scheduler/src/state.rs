use std::sync::Arc;

use crate::manager::TaskQueueManager;

/// Estado compartido por los handlers HTTP.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TaskQueueManager>,
}

impl AppState {
    pub fn new(manager: Arc<TaskQueueManager>) -> Self {
        Self { manager }
    }
}
