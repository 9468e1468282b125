use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    CrawlReport, EnqueueBatchRequest, EnqueueBatchResponse, EnqueueRequest, EnqueueResponse,
    QueueSnapshot, TaskOptions, TaskStatusView, WorkerSummary,
};
use reqwest::{Client, StatusCode};
use std::{env, fs};

/// - En Docker: SCHEDULER_URL=http://scheduler:8080
/// - Local: default http://localhost:8080
fn scheduler_base_url() -> String {
    env::var("SCHEDULER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con el scheduler del crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct OptionArgs {
    /// Reintentos antes de marcar la tarea como fallida
    #[arg(long)]
    max_retries: Option<u32>,

    /// Prioridad (sólo informativa)
    #[arg(long)]
    priority: Option<f64>,

    /// Procesar aunque robots.txt lo prohíba
    #[arg(long)]
    ignore_robots: bool,
}

impl OptionArgs {
    fn into_options(self) -> TaskOptions {
        TaskOptions {
            priority: self.priority,
            max_retries: self.max_retries,
            ignore_robots_txt: self.ignore_robots,
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encola una URL
    Submit {
        #[arg(value_name = "URL")]
        url: String,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Encola varias URLs (argumentos o un archivo, una por línea)
    Batch {
        #[arg(value_name = "URL")]
        urls: Vec<String>,
        #[arg(long, value_name = "ARCHIVO")]
        file: Option<String>,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Consulta el estado de una tarea
    Status {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Lista los workers registrados
    Workers,
    /// Conteos de las colas
    Stats,
}

/// Líneas no vacías que no sean comentarios.
fn read_url_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn print_report(report: &CrawlReport) {
    println!("  origen: {:?}", report.source);
    println!(
        "  imágenes: ok={}, fallidas={}",
        report.images.successful.len(),
        report.images.failed.len()
    );
    for img in &report.images.successful {
        println!("    - {} ({}, {} bytes, {})", img.url, img.content_type, img.size, img.hash);
    }
    if let Some(stats) = &report.stats {
        println!(
            "  stats: directas={}, cdn={}, api={}, dinámicas={}",
            stats.direct_urls, stats.cdn_urls, stats.api_endpoints, stats.dynamic_urls
        );
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = scheduler_base_url();

    match cli.command {
        Commands::Submit { url, options } => {
            let req = EnqueueRequest {
                url,
                options: options.into_options(),
            };
            let resp = client
                .post(format!("{}/api/v1/tasks", base_url))
                .json(&req)
                .send()
                .await?
                .error_for_status()?;
            let EnqueueResponse { task_id } = resp.json().await?;
            println!("Tarea encolada: {}", task_id);
        }

        Commands::Batch { mut urls, file, options } => {
            if let Some(path) = file {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("no se pudo leer {}", path))?;
                urls.extend(read_url_lines(&content));
            }
            if urls.is_empty() {
                bail!("no hay URLs que encolar");
            }

            let req = EnqueueBatchRequest {
                urls,
                options: options.into_options(),
            };
            let resp = client
                .post(format!("{}/api/v1/tasks/batch", base_url))
                .json(&req)
                .send()
                .await?
                .error_for_status()?;
            let EnqueueBatchResponse { task_ids } = resp.json().await?;
            println!("{} tareas encoladas:", task_ids.len());
            for id in task_ids {
                println!("  - {}", id);
            }
        }

        Commands::Status { id } => {
            let resp = client
                .get(format!("{}/api/v1/tasks/{id}", base_url))
                .send()
                .await?;

            if resp.status() == StatusCode::NOT_FOUND {
                println!("No se encontró la tarea con id {id}");
                return Ok(());
            }
            let view: TaskStatusView = resp.error_for_status()?.json().await?;
            println!("Tarea {}:", id);
            println!("  estado: {}", view.status.as_str());
            if let Some(err) = &view.error {
                println!("  error: {}", err);
            }
            if let Some(result) = view.result {
                match serde_json::from_value::<CrawlReport>(result.clone()) {
                    Ok(report) => print_report(&report),
                    Err(_) => println!("  resultado: {}", result),
                }
            }
        }

        Commands::Workers => {
            let resp = client
                .get(format!("{}/api/v1/workers", base_url))
                .send()
                .await?
                .error_for_status()?;
            let workers: Vec<WorkerSummary> = resp.json().await?;
            if workers.is_empty() {
                println!("No hay workers registrados.");
            }
            for w in workers {
                println!("Worker {}", w.worker.id);
                println!("  host           : {} ({})", w.worker.info.hostname, w.worker.info.platform);
                println!("  vivo           : {}", w.alive);
                println!("  last_heartbeat : {} s ago", w.last_heartbeat_secs_ago);
                println!("  concurrency    : max={}", w.worker.info.max_concurrent);
                println!("  registrado     : {}", w.worker.registered_at);
                println!();
            }
        }

        Commands::Stats => {
            let resp = client
                .get(format!("{}/api/v1/stats", base_url))
                .send()
                .await?
                .error_for_status()?;
            let snap: QueueSnapshot = resp.json().await?;
            println!("Workers activos : {}", snap.active_workers);
            println!("Pendientes      : {}", snap.pending_tasks);
            println!("En proceso      : {}", snap.processing_tasks);
            println!("Completadas     : {}", snap.completed_tasks);
            println!("Fallidas        : {}", snap.failed_tasks);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_parses_options() {
        let cli = Cli::try_parse_from([
            "client",
            "submit",
            "https://example.com",
            "--max-retries",
            "5",
            "--ignore-robots",
        ])
        .unwrap();

        match cli.command {
            Commands::Submit { url, options } => {
                assert_eq!(url, "https://example.com");
                let opts = options.into_options();
                assert_eq!(opts.max_retries, Some(5));
                assert!(opts.ignore_robots_txt);
                assert_eq!(opts.priority, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn batch_accepts_many_urls() {
        let cli = Cli::try_parse_from(["client", "batch", "https://a", "https://b"]).unwrap();
        match cli.command {
            Commands::Batch { urls, file, .. } => {
                assert_eq!(urls, vec!["https://a", "https://b"]);
                assert!(file.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn url_file_skips_blank_lines_and_comments() {
        let urls = read_url_lines("https://a\n\n# skip\n  https://b  \n");
        assert_eq!(urls, vec!["https://a", "https://b"]);
    }
}
