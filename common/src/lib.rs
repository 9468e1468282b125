pub mod api;
pub mod results;
pub mod task;
pub mod worker;

pub use api::{
    EnqueueBatchRequest, EnqueueBatchResponse, EnqueueRequest, EnqueueResponse, QueueSnapshot,
};
pub use results::{
    CrawlReport, CrawlStats, FailedImage, ImageRecord, ImageResults, PolicyDecision, ResultSource,
};
pub use task::{Task, TaskId, TaskOptions, TaskStatus, TaskStatusView, DEFAULT_MAX_RETRIES};
pub use worker::{WorkerId, WorkerInfo, WorkerRecord, WorkerState, WorkerSummary};
