use std::{env, time::Duration};

use common::DEFAULT_MAX_RETRIES;

pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Nombres de las claves en el almacén compartido.
#[derive(Debug, Clone)]
pub struct KeySpace {
    pub pending: String,
    pub processing: String,
    pub completed: String,
    pub failed: String,
    /// id de tarea -> estado (cola en la que vive)
    pub task_index: String,
    pub worker_list: String,
    pub worker_status: String,
    pub results: String,
}

impl KeySpace {
    pub fn new(prefix: &str) -> Self {
        Self {
            pending: format!("{prefix}:tasks:pending"),
            processing: format!("{prefix}:tasks:processing"),
            completed: format!("{prefix}:tasks:completed"),
            failed: format!("{prefix}:tasks:failed"),
            task_index: format!("{prefix}:tasks:index"),
            worker_list: format!("{prefix}:workers:list"),
            worker_status: format!("{prefix}:workers:status"),
            results: format!("{prefix}:results"),
        }
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("crawler")
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub keys: KeySpace,
    /// Tiempo máximo en `processing` antes de que el reaper la dé por perdida.
    pub stale_timeout: Duration,
    /// Tiempo máximo sin heartbeat para considerar vivo a un worker.
    pub liveness_window: Duration,
    pub monitor_interval: Duration,
    pub default_max_retries: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            keys: KeySpace::default(),
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ManagerConfig {
    /// Lee la configuración de variables de entorno, con defaults.
    pub fn from_env() -> Self {
        let prefix = env::var("KEY_PREFIX").unwrap_or_else(|_| "crawler".to_string());
        Self {
            keys: KeySpace::new(&prefix),
            stale_timeout: env_secs("STALE_TIMEOUT_SECS").unwrap_or(DEFAULT_STALE_TIMEOUT),
            liveness_window: env_secs("LIVENESS_WINDOW_SECS").unwrap_or(DEFAULT_LIVENESS_WINDOW),
            monitor_interval: env_secs("MONITOR_INTERVAL_SECS")
                .unwrap_or(DEFAULT_MONITOR_INTERVAL),
            default_max_retries: env::var("DEFAULT_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(DEFAULT_MAX_RETRIES),
        }
    }
}

/// Configuración del proceso `scheduler` (plano de control + monitor).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub redis_url: String,
    pub bind_addr: String,
    pub manager: ManagerConfig,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            manager: ManagerConfig::from_env(),
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}
