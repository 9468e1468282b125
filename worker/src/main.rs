mod config;
mod pipeline;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use scheduler::{RedisStore, TaskQueueManager};

use crate::config::WorkerConfig;
use crate::pipeline::{
    CrawlPipeline, HtmlResourceAnalyzer, HttpImageDownloader, HttpPageRenderer,
    HttpPolicyChecker, NoCaptchaSolver, StaticProxyPool,
};
use crate::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,scheduler=info,reqwest=info")),
        )
        .init();

    let config = WorkerConfig::from_env();

    let store = RedisStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("no se pudo conectar a {}", config.redis_url))?;
    let manager = Arc::new(TaskQueueManager::new(
        Arc::new(store),
        config.manager.clone(),
    ));

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;

    let proxies = StaticProxyPool::new(config.proxy_list.clone());
    if proxies.is_empty() {
        info!("sin proxies configurados, conexión directa");
    } else {
        info!("{} proxies en rotación", proxies.len());
    }

    let pipeline = CrawlPipeline {
        policy: Arc::new(HttpPolicyChecker::new(client.clone())),
        analyzer: Arc::new(HtmlResourceAnalyzer::new(client.clone())?),
        downloader: Arc::new(HttpImageDownloader::new(client)),
        proxies: Arc::new(proxies),
        renderer: Arc::new(HttpPageRenderer::new(config.request_timeout)?),
        captcha: Arc::new(NoCaptchaSolver),
    };

    let handle = Worker::new(config, manager, pipeline).start().await?;
    info!("worker {} en marcha", handle.id());

    tokio::signal::ctrl_c().await?;
    info!(
        "señal de apagado recibida ({} tareas en curso)",
        handle.active_tasks().await
    );
    handle.shutdown().await
}
