use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type WorkerId = String;

/// Metadatos estáticos que el worker declara al registrarse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub hostname: String,
    #[serde(default)]
    pub platform: String,
    pub max_concurrent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Active,
}

/// Fila del registro de workers. Nunca se borra: la vida del worker se
/// deduce de la antigüedad de `last_heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub info: WorkerInfo,
    pub status: WorkerState,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerRecord {
    /// Vivo si el último heartbeat es estrictamente más reciente que `window`.
    pub fn is_alive_at(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) < window
    }
}

/// Vista del registro para el plano de control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    #[serde(flatten)]
    pub worker: WorkerRecord,
    pub alive: bool,
    pub last_heartbeat_secs_ago: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(last_heartbeat: DateTime<Utc>) -> WorkerRecord {
        WorkerRecord {
            id: "w-1".to_string(),
            info: WorkerInfo {
                hostname: "host".to_string(),
                platform: "linux".to_string(),
                max_concurrent: 2,
            },
            status: WorkerState::Active,
            registered_at: last_heartbeat,
            last_heartbeat,
        }
    }

    #[test]
    fn liveness_window_is_exclusive() {
        let now = Utc::now();
        let window = chrono::Duration::seconds(30);

        assert!(record(now - chrono::Duration::seconds(29)).is_alive_at(now, window));
        assert!(!record(now - chrono::Duration::seconds(30)).is_alive_at(now, window));
        assert!(!record(now - chrono::Duration::minutes(5)).is_alive_at(now, window));
    }

    #[test]
    fn worker_wire_shape() {
        let v = serde_json::to_value(record(Utc::now())).unwrap();
        assert_eq!(v["status"], "active");
        assert_eq!(v["info"]["maxConcurrent"], 2);
        assert!(v.get("registeredAt").is_some());
        assert!(v.get("lastHeartbeat").is_some());
    }
}
