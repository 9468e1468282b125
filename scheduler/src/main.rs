use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scheduler::{
    handlers, monitor, state::AppState, QueueEvent, RedisStore, SchedulerConfig,
    TaskQueueManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("scheduler=debug,tower_http=info")),
        )
        .init();

    let config = SchedulerConfig::from_env();

    let store = RedisStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("no se pudo conectar a {}", config.redis_url))?;
    let manager = Arc::new(TaskQueueManager::new(Arc::new(store), config.manager.clone()));
    manager.initialize().await?;

    let cancel = CancellationToken::new();

    // monitor (reaper + snapshot) en segundo plano
    let monitor_handle = tokio::spawn(monitor::run_monitor(
        Arc::clone(&manager),
        cancel.clone(),
    ));

    // log de eventos de fin de tarea
    let mut events = manager.subscribe();
    let events_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = events_cancel.cancelled() => break,
                ev = events.recv() => match ev {
                    Ok(QueueEvent::TaskCompleted(t)) => info!("evento: tarea {} completada", t.id),
                    Ok(QueueEvent::TaskFailed(t)) => {
                        warn!("evento: tarea {} fallida: {:?}", t.id, t.error)
                    }
                    Ok(QueueEvent::Monitoring(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("log de eventos atrasado, {} eventos perdidos", n)
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    // router HTTP
    let app = handlers::build_router(AppState::new(Arc::clone(&manager)));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", config.bind_addr))?;
    info!("scheduler escuchando en {}", listener.local_addr()?);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("señal de apagado recibida");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    let _ = monitor_handle.await;
    info!("scheduler detenido");
    Ok(())
}
