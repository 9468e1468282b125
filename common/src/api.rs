use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskOptions};

/* --------- Plano de control HTTP (scheduler <-> client) --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub url: String,
    #[serde(default)]
    pub options: TaskOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueBatchRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub options: TaskOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueBatchResponse {
    pub task_ids: Vec<TaskId>,
}

/// Conteos agregados que emite el monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub active_workers: usize,
    pub pending_tasks: usize,
    pub processing_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
}
