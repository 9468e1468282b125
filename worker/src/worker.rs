use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use common::{Task, TaskId, WorkerInfo};
use scheduler::{FailOutcome, TaskQueueManager};

use crate::config::WorkerConfig;
use crate::pipeline::CrawlPipeline;

/// Un proceso worker: pull loop + heartbeat + hasta `concurrency` tareas en
/// paralelo.
pub struct Worker {
    id: String,
    config: WorkerConfig,
    manager: Arc<TaskQueueManager>,
    pipeline: CrawlPipeline,
    slots: Arc<Semaphore>,
    active: Mutex<HashMap<TaskId, DateTime<Utc>>>,
    cancel: CancellationToken,
}

/// Lo que devuelve `start`; sirve para apagar el worker ordenadamente.
pub struct WorkerHandle {
    worker: Arc<Worker>,
    loops: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, manager: Arc<TaskQueueManager>, pipeline: CrawlPipeline) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            id: config.id.clone(),
            config,
            manager,
            pipeline,
            slots: Arc::new(Semaphore::new(concurrency)),
            active: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency.max(1)
    }

    /// Se registra y lanza el heartbeat y el pull loop.
    pub async fn start(self) -> Result<WorkerHandle> {
        let hostname = hostname::get()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let info = WorkerInfo {
            hostname,
            platform: std::env::consts::OS.to_string(),
            max_concurrent: self.concurrency() as u32,
        };
        self.manager.register_worker(&self.id, info).await?;

        info!(
            "worker {} iniciado con concurrency={}",
            self.id,
            self.concurrency()
        );

        let worker = Arc::new(self);
        let loops = vec![
            tokio::spawn(Arc::clone(&worker).heartbeat_loop()),
            tokio::spawn(Arc::clone(&worker).pull_loop()),
        ];
        Ok(WorkerHandle { worker, loops })
    }

    /// Duerme `d` salvo que se cancele antes. Devuelve false si se canceló.
    async fn pause(&self, d: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        while self.pause(self.config.heartbeat_interval).await {
            match self.manager.heartbeat(&self.id).await {
                Ok(true) => debug!("heartbeat de {}", self.id),
                Ok(false) => warn!("heartbeat de {} ignorado: worker no registrado", self.id),
                Err(e) => error!("fallo actualizando heartbeat: {}", e),
            }
        }
        debug!("heartbeat de {} detenido", self.id);
    }

    async fn pull_loop(self: Arc<Self>) {
        while !self.cancel.is_cancelled() {
            // --------- Control de concurrencia local ---------
            let permit = match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(p) => p,
                Err(_) => {
                    // sin slots libres; esperamos un poco
                    if !self.pause(self.config.poll_interval).await {
                        break;
                    }
                    continue;
                }
            };

            match self.manager.dequeue(&self.id).await {
                Ok(Some(task)) => self.spawn_task(task, permit).await,
                Ok(None) => {
                    drop(permit);
                    if !self.pause(self.config.poll_interval).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!("error en el loop de tareas: {}", e);
                    if !self.pause(self.config.error_backoff).await {
                        break;
                    }
                }
            }
        }
        debug!("pull loop de {} detenido", self.id);
    }

    async fn spawn_task(self: &Arc<Self>, task: Task, permit: OwnedSemaphorePermit) {
        info!("tarea {} tomada: {}", task.id, task.url);
        let task_id = task.id.clone();
        self.active.lock().await.insert(task_id.clone(), Utc::now());

        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let run = tokio::spawn({
                let worker = Arc::clone(&worker);
                async move { worker.process_task(&task).await }
            });
            if let Err(e) = run.await {
                // un panic en el pipeline cuenta como fallo de la tarea
                error!("panic o join error procesando tarea {}: {}", task_id, e);
                let message = format!("worker panic: {e}");
                if let Err(e) = worker.manager.fail(&task_id, &message).await {
                    error!("no se pudo marcar la tarea {} como fallida: {}", task_id, e);
                }
            }
            worker.active.lock().await.remove(&task_id);
            // liberar el slot al terminar
            drop(permit);
        });
    }

    /// Corre el pipeline y reporta el resultado al manager.
    pub async fn process_task(&self, task: &Task) {
        let outcome = match self.pipeline.run(task).await {
            Ok(report) => serde_json::to_value(&report).map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => match self.manager.complete(&task.id, result).await {
                Ok(true) => info!("terminé tarea {} correctamente", task.id),
                Ok(false) => warn!(
                    "tarea {} ya no estaba en processing; resultado descartado",
                    task.id
                ),
                Err(e) => error!("no se pudo completar la tarea {}: {}", task.id, e),
            },
            Err(e) => {
                let message = format!("{e:#}");
                warn!("error procesando tarea {}: {}", task.id, message);
                match self.manager.fail(&task.id, &message).await {
                    Ok(FailOutcome::NotFound) => {
                        warn!("tarea {} ya no estaba en processing", task.id)
                    }
                    Ok(_) => {}
                    Err(e) => error!("no se pudo marcar la tarea {} como fallida: {}", task.id, e),
                }
            }
        }
    }
}

impl WorkerHandle {
    pub fn id(&self) -> &str {
        self.worker.id()
    }

    pub async fn active_tasks(&self) -> usize {
        self.worker.active.lock().await.len()
    }

    /// Deja de tomar tareas, espera a las que están en curso y libera los
    /// recursos externos.
    pub async fn shutdown(self) -> Result<()> {
        let WorkerHandle { worker, loops } = self;
        info!("apagando worker {}", worker.id);
        worker.cancel.cancel();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!("panic o join error en un loop del worker: {}", e);
            }
        }

        let in_flight = worker.active.lock().await.len();
        if in_flight > 0 {
            info!("esperando {} tareas en curso...", in_flight);
        }
        let _all = worker
            .slots
            .acquire_many(worker.concurrency() as u32)
            .await?;

        worker.pipeline.captcha.cleanup().await;
        info!("worker {} detenido", worker.id);
        Ok(())
    }
}
