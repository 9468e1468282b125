use std::{env, time::Duration};

use scheduler::ManagerConfig;

pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub id: String,
    pub redis_url: String,
    /// Tareas simultáneas como máximo (siempre >= 1).
    pub concurrency: usize,
    pub heartbeat_interval: Duration,
    /// Espera cuando no hay tareas o no hay slots libres.
    pub poll_interval: Duration,
    /// Espera tras un error del almacén.
    pub error_backoff: Duration,
    pub request_timeout: Duration,
    pub proxy_list: Vec<String>,
    pub manager: ManagerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: format!("worker-{}", uuid::Uuid::new_v4()),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            proxy_list: Vec::new(),
            manager: ManagerConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            id: env::var("WORKER_ID").unwrap_or(defaults.id),
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            concurrency: env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_WORKER_CONCURRENCY)
                .max(1),
            heartbeat_interval: env_millis("HEARTBEAT_INTERVAL_MS")
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
            poll_interval: env_millis("POLL_INTERVAL_MS").unwrap_or(DEFAULT_POLL_INTERVAL),
            error_backoff: env_millis("ERROR_BACKOFF_MS").unwrap_or(DEFAULT_ERROR_BACKOFF),
            request_timeout: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            proxy_list: env::var("PROXY_LIST")
                .map(|s| parse_proxy_list(&s))
                .unwrap_or_default(),
            manager: ManagerConfig::from_env(),
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Lista separada por comas; sin esquema se asume `http://`.
pub fn parse_proxy_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            if p.contains("://") {
                p.to_string()
            } else {
                format!("http://{p}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_list_is_trimmed_and_normalized() {
        let proxies = parse_proxy_list(" 10.0.0.1:3128, socks5://10.0.0.2:1080 ,,");
        assert_eq!(
            proxies,
            vec!["http://10.0.0.1:3128", "socks5://10.0.0.2:1080"]
        );
        assert!(parse_proxy_list("").is_empty());
    }

    #[test]
    fn default_worker_ids_are_unique() {
        let a = WorkerConfig::default();
        let b = WorkerConfig::default();
        assert!(a.id.starts_with("worker-"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.concurrency, 2);
        assert_eq!(a.heartbeat_interval, Duration::from_secs(10));
    }
}
