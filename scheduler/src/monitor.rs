use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::TaskQueueManager;

/// Loop periódico: reaper de tareas colgadas + snapshot de colas.
///
/// Un error en una pasada se loguea y el loop sigue; sólo termina cuando se
/// cancela el token.
pub async fn run_monitor(manager: Arc<TaskQueueManager>, cancel: CancellationToken) {
    let interval = manager.config().monitor_interval;
    info!("monitor iniciado (cada {:?})", interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match manager.monitor_tick().await {
            Ok(snap) => debug!(
                "monitor: workers={} pending={} processing={} completed={} failed={}",
                snap.active_workers,
                snap.pending_tasks,
                snap.processing_tasks,
                snap.completed_tasks,
                snap.failed_tasks
            ),
            Err(e) => warn!("error en pasada del monitor: {}", e),
        }
    }

    info!("monitor detenido");
}
