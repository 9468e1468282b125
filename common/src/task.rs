use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::worker::WorkerId;

pub type TaskId = String;

/// Reintentos por defecto cuando las opciones no traen `maxRetries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        TaskStatus::ALL.into_iter().find(|st| st.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Bolsa de opciones de una tarea. Es inmutable una vez creada.
///
/// Los campos conocidos se leen tipados; el resto viaja tal cual en `extra`
/// para que el pipeline de crawl los consuma.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Procesar aunque robots.txt lo prohíba.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_robots_txt: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Un trabajo de crawl: una URL semilla + opciones, con su ciclo de vida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub options: TaskOptions,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,

    /// Sólo informativo: el dequeue es FIFO estricto. Acepta cualquier
    /// número, no sólo enteros.
    pub priority: f64,

    pub retries: u32,
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Crea una tarea nueva en estado `pending`.
    pub fn new(url: impl Into<String>, options: TaskOptions, default_max_retries: u32) -> Self {
        let priority = options.priority.unwrap_or(0.0);
        let max_retries = options.max_retries.unwrap_or(default_max_retries);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            options,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            priority,
            retries: 0,
            max_retries,
            worker_id: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}

/// Lo que devuelve una consulta de estado: nunca hay estado "desconocido"
/// para una tarea encolada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusView {
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}
