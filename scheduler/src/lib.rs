//! Task Queue Manager del crawler distribuido: colas sobre un almacén
//! compartido, registro de workers, reaper y plano de control HTTP.

pub mod config;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod monitor;
pub mod state;
pub mod store;

pub use config::{KeySpace, ManagerConfig, SchedulerConfig};
pub use error::{Result, SchedulerError, StoreError};
pub use manager::{FailOutcome, QueueEvent, TaskQueueManager};
pub use store::{MemoryStore, RedisStore, Store};
