//! Task Queue Manager: cuatro colas (pending, processing, completed, failed),
//! registro de workers y tabla de resultados, todo en el `Store` compartido.
//!
//! Cada worker y cada cliente del plano de control usan esto como librería;
//! el almacén es el único punto de sincronización entre procesos.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use common::{
    QueueSnapshot, Task, TaskId, TaskOptions, TaskStatus, TaskStatusView, WorkerInfo,
    WorkerRecord, WorkerState, WorkerSummary,
};

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::store::{ClaimIndex, IndexWrite, Store};

pub const PROCESSING_TIMEOUT_ERROR: &str = "processing timeout";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notificaciones para consumidores. No se usan para control de flujo.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    TaskCompleted(Task),
    TaskFailed(Task),
    Monitoring(QueueSnapshot),
}

/// Resultado de reportar un fallo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Vuelve a `pending` con el contador ya incrementado.
    Retrying { retries: u32 },
    /// Agotó los reintentos; estado terminal.
    Failed,
    /// No estaba en `processing` (ya reapeada o reporte duplicado).
    NotFound,
}

impl FailOutcome {
    pub fn applied(&self) -> bool {
        !matches!(self, FailOutcome::NotFound)
    }
}

pub struct TaskQueueManager {
    store: Arc<dyn Store>,
    config: ManagerConfig,
    events: broadcast::Sender<QueueEvent>,
}

impl TaskQueueManager {
    pub fn new(store: Arc<dyn Store>, config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            config,
            events,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Cada instancia tiene sus propios suscriptores.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // sin suscriptores no es un error
        let _ = self.events.send(event);
    }

    fn queue_key(&self, status: TaskStatus) -> &str {
        let keys = &self.config.keys;
        match status {
            TaskStatus::Pending => &keys.pending,
            TaskStatus::Processing => &keys.processing,
            TaskStatus::Completed => &keys.completed,
            TaskStatus::Failed => &keys.failed,
        }
    }

    fn index_entry(&self, task_id: &str, status: TaskStatus) -> IndexWrite<'_> {
        IndexWrite::single(&self.config.keys.task_index, task_id, status.as_str())
    }

    /// Limpia tareas zombis que hayan quedado de una ejecución anterior.
    pub async fn initialize(&self) -> Result<usize> {
        let reaped = self.reap_stale().await?;
        info!("task queue manager inicializado ({} tareas reapeadas)", reaped);
        Ok(reaped)
    }

    /* ---------------- tareas ---------------- */

    pub async fn enqueue(&self, url: &str, options: TaskOptions) -> Result<TaskId> {
        let task = Task::new(url, options, self.config.default_max_retries);
        let raw = serde_json::to_string(&task)?;

        self.store
            .push_head(
                &self.config.keys.pending,
                &[raw],
                Some(self.index_entry(&task.id, TaskStatus::Pending)),
            )
            .await?;

        info!("nueva tarea {} - {}", task.id, url);
        Ok(task.id)
    }

    /// Encola en una sola escritura; se conserva el orden de inserción.
    pub async fn enqueue_batch(&self, urls: &[String], options: TaskOptions) -> Result<Vec<TaskId>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let tasks: Vec<Task> = urls
            .iter()
            .map(|url| Task::new(url.as_str(), options.clone(), self.config.default_max_retries))
            .collect();

        let raws = tasks
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let index = IndexWrite {
            key: &self.config.keys.task_index,
            entries: tasks
                .iter()
                .map(|t| (t.id.clone(), TaskStatus::Pending.as_str().to_string()))
                .collect(),
        };

        self.store
            .push_head(&self.config.keys.pending, &raws, Some(index))
            .await?;

        info!("lote de {} tareas encolado", tasks.len());
        Ok(tasks.into_iter().map(|t| t.id).collect())
    }

    /// Toma la tarea pendiente más antigua. No bloquea: `None` si no hay.
    ///
    /// Mover y marcar (worker, started_at, estado e índice) es un único paso
    /// del almacén: en `processing` nunca hay una tarea sin marcar.
    pub async fn dequeue(&self, worker_id: &str) -> Result<Option<Task>> {
        let keys = &self.config.keys;
        let stamp = [
            ("status", TaskStatus::Processing.as_str().to_string()),
            ("workerId", worker_id.to_string()),
            (
                "startedAt",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];
        let index = ClaimIndex {
            key: &keys.task_index,
            value: TaskStatus::Processing.as_str(),
        };

        let Some(raw) = self
            .store
            .claim_tail(&keys.pending, &keys.processing, &stamp, Some(index))
            .await?
        else {
            return Ok(None);
        };
        let task: Task = serde_json::from_str(&raw)?;

        debug!("tarea {} asignada al worker {}", task.id, worker_id);
        Ok(Some(task))
    }

    /// Devuelve `false` si la tarea ya no está en `processing`.
    pub async fn complete(&self, task_id: &str, result: Value) -> Result<bool> {
        let keys = &self.config.keys;
        let Some((raw, mut task)) = self.locate(&keys.processing, task_id).await? else {
            debug!("complete ignorado: tarea {} no está en processing", task_id);
            return Ok(false);
        };

        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.result = Some(result.clone());
        let done = serde_json::to_string(&task)?;

        let moved = self
            .store
            .move_element(
                &keys.processing,
                &keys.completed,
                &raw,
                &done,
                Some(self.index_entry(task_id, TaskStatus::Completed)),
            )
            .await?;
        if !moved {
            return Ok(false);
        }

        self.store
            .hset(&keys.results, task_id, &serde_json::to_string(&result)?)
            .await?;

        info!("tarea {} completada", task_id);
        self.emit(QueueEvent::TaskCompleted(task));
        Ok(true)
    }

    pub async fn fail(&self, task_id: &str, error: &str) -> Result<FailOutcome> {
        let keys = &self.config.keys;
        let Some((raw, mut task)) = self.locate(&keys.processing, task_id).await? else {
            debug!("fail ignorado: tarea {} no está en processing", task_id);
            return Ok(FailOutcome::NotFound);
        };

        if task.can_retry() {
            task.retries += 1;
            task.status = TaskStatus::Pending;
            task.worker_id = None;
            task.started_at = None;
            let requeued = serde_json::to_string(&task)?;

            let moved = self
                .store
                .move_element(
                    &keys.processing,
                    &keys.pending,
                    &raw,
                    &requeued,
                    Some(self.index_entry(task_id, TaskStatus::Pending)),
                )
                .await?;
            if !moved {
                return Ok(FailOutcome::NotFound);
            }

            warn!(
                "tarea {} falló ({}), reintento {}/{}",
                task_id, error, task.retries, task.max_retries
            );
            return Ok(FailOutcome::Retrying {
                retries: task.retries,
            });
        }

        task.status = TaskStatus::Failed;
        task.error = Some(error.to_string());
        task.failed_at = Some(Utc::now());
        let failed = serde_json::to_string(&task)?;

        let moved = self
            .store
            .move_element(
                &keys.processing,
                &keys.failed,
                &raw,
                &failed,
                Some(self.index_entry(task_id, TaskStatus::Failed)),
            )
            .await?;
        if !moved {
            return Ok(FailOutcome::NotFound);
        }

        warn!(
            "tarea {} marcada como FAILED tras {} reintentos: {}",
            task_id, task.retries, error
        );
        self.emit(QueueEvent::TaskFailed(task));
        Ok(FailOutcome::Failed)
    }

    /// Busca la tarea usando el índice; si el índice falta o está
    /// desfasado, recorre las cuatro colas.
    pub async fn find_task(&self, task_id: &str) -> Result<Option<Task>> {
        let indexed = self
            .store
            .hget(&self.config.keys.task_index, task_id)
            .await?
            .and_then(|s| TaskStatus::parse(&s));

        if let Some(status) = indexed {
            if let Some((_, task)) = self.locate(self.queue_key(status), task_id).await? {
                return Ok(Some(task));
            }
        }

        for status in TaskStatus::ALL {
            if Some(status) == indexed {
                continue;
            }
            if let Some((_, task)) = self.locate(self.queue_key(status), task_id).await? {
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    pub async fn status(&self, task_id: &str) -> Result<Option<TaskStatusView>> {
        let Some(task) = self.find_task(task_id).await? else {
            return Ok(None);
        };

        let result = if task.status == TaskStatus::Completed {
            match self.store.hget(&self.config.keys.results, task_id).await? {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => task.result.clone(),
            }
        } else {
            None
        };

        Ok(Some(TaskStatusView {
            status: task.status,
            result,
            error: task.error,
        }))
    }

    /// Raw + tarea decodificada dentro de una lista concreta.
    async fn locate(&self, list: &str, task_id: &str) -> Result<Option<(String, Task)>> {
        for raw in self.store.range(list).await? {
            match serde_json::from_str::<Task>(&raw) {
                Ok(task) if task.id == task_id => return Ok(Some((raw, task))),
                Ok(_) => {}
                Err(e) => warn!("entrada ilegible en {}: {}", list, e),
            }
        }
        Ok(None)
    }

    /* ---------------- reaper / monitor ---------------- */

    pub async fn reap_stale(&self) -> Result<usize> {
        self.reap_stale_at(Utc::now()).await
    }

    /// Falla (vía `fail`) toda tarea en `processing` cuyo `started_at` sea
    /// más viejo que la ventana de staleness (o `created_at` si nunca se
    /// marcó).
    pub async fn reap_stale_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let timeout = to_chrono(self.config.stale_timeout);
        let mut reaped = 0;

        for raw in self.store.range(&self.config.keys.processing).await? {
            let task: Task = match serde_json::from_str(&raw) {
                Ok(t) => t,
                Err(e) => {
                    warn!("entrada ilegible en processing: {}", e);
                    continue;
                }
            };
            // sin marca de claim se cuenta desde la creación
            let since = task.started_at.unwrap_or(task.created_at);
            if now.signed_duration_since(since) > timeout {
                info!(
                    "tarea {} lleva demasiado en processing (worker {:?}), reapeando",
                    task.id, task.worker_id
                );
                if self.fail(&task.id, PROCESSING_TIMEOUT_ERROR).await?.applied() {
                    reaped += 1;
                }
            }
        }
        Ok(reaped)
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        let keys = &self.config.keys;
        Ok(QueueSnapshot {
            active_workers: self.list_active_workers().await?.len(),
            pending_tasks: self.store.len(&keys.pending).await?,
            processing_tasks: self.store.len(&keys.processing).await?,
            completed_tasks: self.store.len(&keys.completed).await?,
            failed_tasks: self.store.len(&keys.failed).await?,
        })
    }

    /// Una pasada del monitor: reaper + snapshot + evento `Monitoring`.
    pub async fn monitor_tick(&self) -> Result<QueueSnapshot> {
        let reaped = self.reap_stale().await?;
        if reaped > 0 {
            info!("monitor: {} tareas reapeadas", reaped);
        }
        let snapshot = self.snapshot().await?;
        self.emit(QueueEvent::Monitoring(snapshot));
        Ok(snapshot)
    }

    /* ---------------- workers ---------------- */

    /// Upsert idempotente; conserva el `registered_at` original.
    pub async fn register_worker(&self, worker_id: &str, info: WorkerInfo) -> Result<WorkerRecord> {
        let now = Utc::now();
        let registered_at = match self.get_worker(worker_id).await? {
            Some(existing) => existing.registered_at,
            None => now,
        };

        let worker = WorkerRecord {
            id: worker_id.to_string(),
            info,
            status: WorkerState::Active,
            registered_at,
            last_heartbeat: now,
        };

        let keys = &self.config.keys;
        self.store
            .hset(&keys.worker_status, worker_id, &serde_json::to_string(&worker)?)
            .await?;
        self.store.sadd(&keys.worker_list, worker_id).await?;

        info!("worker registrado: {}", worker_id);
        Ok(worker)
    }

    /// `false` si el worker nunca se registró.
    pub async fn heartbeat(&self, worker_id: &str) -> Result<bool> {
        let Some(mut worker) = self.get_worker(worker_id).await? else {
            return Ok(false);
        };
        worker.last_heartbeat = Utc::now();
        self.store
            .hset(
                &self.config.keys.worker_status,
                worker_id,
                &serde_json::to_string(&worker)?,
            )
            .await?;
        Ok(true)
    }

    pub async fn get_worker(&self, worker_id: &str) -> Result<Option<WorkerRecord>> {
        match self
            .store
            .hget(&self.config.keys.worker_status, worker_id)
            .await?
        {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn all_workers(&self) -> Result<Vec<WorkerRecord>> {
        let rows = self.store.hgetall(&self.config.keys.worker_status).await?;
        let mut workers = Vec::with_capacity(rows.len());
        for (id, raw) in rows {
            match serde_json::from_str::<WorkerRecord>(&raw) {
                Ok(w) => workers.push(w),
                Err(e) => warn!("registro de worker {} ilegible: {}", id, e),
            }
        }
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }

    pub async fn list_active_workers(&self) -> Result<Vec<WorkerRecord>> {
        self.list_active_workers_at(Utc::now()).await
    }

    pub async fn list_active_workers_at(&self, now: DateTime<Utc>) -> Result<Vec<WorkerRecord>> {
        let window = to_chrono(self.config.liveness_window);
        Ok(self
            .all_workers()
            .await?
            .into_iter()
            .filter(|w| w.is_alive_at(now, window))
            .collect())
    }

    /// Todo el registro, con la vida derivada del heartbeat.
    pub async fn list_workers(&self) -> Result<Vec<WorkerSummary>> {
        let now = Utc::now();
        let window = to_chrono(self.config.liveness_window);
        Ok(self
            .all_workers()
            .await?
            .into_iter()
            .map(|worker| WorkerSummary {
                alive: worker.is_alive_at(now, window),
                last_heartbeat_secs_ago: now.signed_duration_since(worker.last_heartbeat).num_seconds(),
                worker,
            })
            .collect())
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}
