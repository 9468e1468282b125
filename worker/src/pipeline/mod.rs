//! Pipeline de crawl de una tarea: política -> pasada estática -> (si hace
//! falta) pasada dinámica con proxy + probe de endpoints de API.
//!
//! Cada paso externo está detrás de un trait para poder cambiar la
//! implementación (o usar dobles en tests).

pub mod download;
pub mod extract;
pub mod proxy;
pub mod render;
pub mod robots;

#[cfg(test)]
pub mod fakes;

use std::{collections::HashSet, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use common::{
    CrawlReport, CrawlStats, FailedImage, ImageRecord, ImageResults, PolicyDecision,
    ResultSource, Task,
};

pub use self::download::HttpImageDownloader;
pub use self::extract::HtmlResourceAnalyzer;
pub use self::proxy::StaticProxyPool;
pub use self::render::{HttpPageRenderer, NoCaptchaSolver};
pub use self::robots::HttpPolicyChecker;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// URLs candidatas encontradas en el HTML estático.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceReport {
    pub direct_urls: Vec<String>,
    pub cdn_urls: Vec<String>,
    pub api_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaKind {
    Recaptcha,
    Image,
    Slider,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptchaChallenge {
    pub kind: CaptchaKind,
    pub page_url: String,
    /// `data-sitekey` si la página lo expone.
    pub site_key: Option<String>,
}

#[async_trait]
pub trait PolicyChecker: Send + Sync {
    async fn check(&self, url: &str) -> Result<PolicyDecision>;
}

#[async_trait]
pub trait ResourceAnalyzer: Send + Sync {
    async fn analyze(&self, url: &str) -> Result<ResourceReport>;

    /// Pide un endpoint JSON y devuelve las URLs de imagen que contiene.
    async fn probe_api(&self, endpoint: &str, referer: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ImageDownloader: Send + Sync {
    async fn download(&self, url: &str, referer: &str) -> Result<ImageRecord>;
}

#[async_trait]
pub trait ProxyPool: Send + Sync {
    /// `None` = conexión directa.
    async fn acquire(&self) -> Result<Option<String>>;
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// URLs de imagen que aparecen al cargar la página.
    async fn render(
        &self,
        url: &str,
        proxy: Option<&str>,
        captcha: &dyn CaptchaSolver,
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<String>;

    /// Libera recursos (sesiones OCR, etc.) al apagar el worker.
    async fn cleanup(&self);
}

#[derive(Clone)]
pub struct CrawlPipeline {
    pub policy: Arc<dyn PolicyChecker>,
    pub analyzer: Arc<dyn ResourceAnalyzer>,
    pub downloader: Arc<dyn ImageDownloader>,
    pub proxies: Arc<dyn ProxyPool>,
    pub renderer: Arc<dyn PageRenderer>,
    pub captcha: Arc<dyn CaptchaSolver>,
}

impl CrawlPipeline {
    /// Ejecuta el crawl completo de una tarea. Cualquier error corta el
    /// pipeline y la tarea se reporta como fallida.
    pub async fn run(&self, task: &Task) -> Result<CrawlReport> {
        // 1) robots.txt
        let policy = self.policy.check(&task.url).await?;
        if !policy.allowed {
            if !task.options.ignore_robots_txt {
                bail!("robots.txt no permite acceder a {}", task.url);
            }
            debug!("tarea {} ignora robots.txt", task.id);
        }

        // 2) crawl delay
        let delay = policy.effective_delay();
        if !delay.is_zero() {
            debug!("tarea {}: esperando {:?} por crawl delay", task.id, delay);
            tokio::time::sleep(delay).await;
        }

        // 3) pasada estática
        let resources = self.analyzer.analyze(&task.url).await?;
        let static_urls = dedup(
            resources
                .direct_urls
                .iter()
                .chain(resources.cdn_urls.iter())
                .cloned(),
        );

        let mut images = ImageResults::default();
        if !static_urls.is_empty() {
            self.download_all(&static_urls, &task.url, &mut images).await;
            if !images.successful.is_empty() {
                info!(
                    "tarea {}: {} imágenes en la pasada estática",
                    task.id,
                    images.successful.len()
                );
                return Ok(CrawlReport {
                    images,
                    source: ResultSource::Direct,
                    robots_info: policy,
                    stats: None,
                });
            }
        }

        // 4) pasada dinámica
        let proxy = self.proxies.acquire().await?;
        let dynamic_urls = dedup(
            self.renderer
                .render(&task.url, proxy.as_deref(), self.captcha.as_ref())
                .await?,
        );

        // los fallos de la primera pasada se reintentan aquí
        let all_urls = dedup(static_urls.iter().chain(dynamic_urls.iter()).cloned());
        images = ImageResults::default();
        self.download_all(&all_urls, &task.url, &mut images).await;

        // 5) endpoints de API
        let mut seen: HashSet<String> = all_urls.into_iter().collect();
        for endpoint in &resources.api_endpoints {
            match self.analyzer.probe_api(endpoint, &task.url).await {
                Ok(urls) => {
                    let fresh: Vec<String> = urls.into_iter().filter(|u| seen.insert(u.clone())).collect();
                    self.download_all(&fresh, &task.url, &mut images).await;
                }
                Err(e) => warn!("endpoint {} falló: {:#}", endpoint, e),
            }
        }

        let stats = CrawlStats {
            direct_urls: resources.direct_urls.len(),
            cdn_urls: resources.cdn_urls.len(),
            api_endpoints: resources.api_endpoints.len(),
            dynamic_urls: dynamic_urls.len(),
            successful: images.successful.len(),
            failed: images.failed.len(),
        };
        info!(
            "tarea {}: pasada combinada, {} ok / {} fallidas",
            task.id, stats.successful, stats.failed
        );

        Ok(CrawlReport {
            images,
            source: ResultSource::Combined,
            robots_info: policy,
            stats: Some(stats),
        })
    }

    async fn download_all(&self, urls: &[String], referer: &str, into: &mut ImageResults) {
        for url in urls {
            match self.downloader.download(url, referer).await {
                Ok(record) => into.successful.push(record),
                Err(e) => {
                    debug!("descarga fallida {}: {:#}", url, e);
                    into.failed.push(FailedImage {
                        url: url.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }
    }
}

/// Quita duplicados conservando el primer orden de aparición.
pub fn dedup(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::fakes::Fakes;
    use super::*;
    use common::TaskOptions;
    use std::sync::atomic::Ordering;

    fn task(ignore_robots: bool) -> Task {
        let options = TaskOptions {
            ignore_robots_txt: ignore_robots,
            ..Default::default()
        };
        Task::new("https://example.com/gallery", options, 3)
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let urls = vec!["b", "a", "b", "c", "a"].into_iter().map(String::from);
        assert_eq!(dedup(urls), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn static_pass_success_skips_renderer() {
        let fakes = Fakes::new()
            .with_static(&["https://example.com/a.jpg"], &["https://cdn.example.com/b.png"])
            .downloads_ok(&["https://cdn.example.com/b.png"]);

        let report = fakes.pipeline().run(&task(false)).await.unwrap();

        assert_eq!(report.source, ResultSource::Direct);
        assert!(report.stats.is_none());
        assert_eq!(report.images.successful.len(), 1);
        assert_eq!(report.images.failed.len(), 1);
        assert_eq!(fakes.renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_back_to_dynamic_pass_and_reports_each_url_once() {
        let fakes = Fakes::new()
            .with_static(&["https://example.com/a.jpg"], &[])
            .with_dynamic(&["https://example.com/a.jpg", "https://example.com/lazy.webp"])
            .downloads_ok(&["https://example.com/lazy.webp"]);

        let report = fakes.pipeline().run(&task(false)).await.unwrap();

        assert_eq!(report.source, ResultSource::Combined);
        let stats = report.stats.unwrap();
        assert_eq!(stats.direct_urls, 1);
        assert_eq!(stats.dynamic_urls, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(report.images.failed[0].url, "https://example.com/a.jpg");
        assert_eq!(fakes.renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_static_pass_goes_straight_to_renderer() {
        let fakes = Fakes::new()
            .with_dynamic(&["https://example.com/x.png"])
            .downloads_ok(&["https://example.com/x.png"]);

        let report = fakes.pipeline().run(&task(false)).await.unwrap();
        assert_eq!(report.source, ResultSource::Combined);
        assert_eq!(report.images.successful[0].url, "https://example.com/x.png");
    }

    #[tokio::test]
    async fn renderer_receives_the_acquired_proxy() {
        let fakes = Fakes::new().with_proxy("http://10.0.0.1:3128");
        fakes.pipeline().run(&task(false)).await.unwrap();
        assert_eq!(
            fakes.renderer.last_proxy.lock().unwrap().as_deref(),
            Some("http://10.0.0.1:3128")
        );
    }

    #[tokio::test]
    async fn api_endpoint_errors_are_skipped() {
        let fakes = Fakes::new()
            .with_api("https://example.com/api/images", Ok(vec!["https://example.com/api.png"]))
            .with_api("https://example.com/api/broken", Err("boom"))
            .downloads_ok(&["https://example.com/api.png"]);

        let report = fakes.pipeline().run(&task(false)).await.unwrap();
        let stats = report.stats.unwrap();
        assert_eq!(stats.api_endpoints, 2);
        assert_eq!(stats.successful, 1);
    }

    #[tokio::test]
    async fn disallowed_by_robots_fails_unless_ignored() {
        let fakes = Fakes::new()
            .with_policy(false)
            .with_static(&["https://example.com/a.jpg"], &[])
            .downloads_ok(&["https://example.com/a.jpg"]);

        let err = fakes.pipeline().run(&task(false)).await.unwrap_err();
        assert!(err.to_string().contains("robots.txt"));
        assert_eq!(fakes.downloader.calls.lock().unwrap().len(), 0);

        let report = fakes.pipeline().run(&task(true)).await.unwrap();
        assert_eq!(report.source, ResultSource::Direct);
        assert!(!report.robots_info.allowed);
    }

    #[tokio::test]
    async fn analyzer_error_fails_the_run() {
        let fakes = Fakes::new().analyzer_fails();
        assert!(fakes.pipeline().run(&task(false)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn honours_crawl_delay() {
        let fakes = Fakes::new()
            .with_delay(2.0)
            .with_static(&["https://example.com/a.jpg"], &[])
            .downloads_ok(&["https://example.com/a.jpg"]);

        let start = tokio::time::Instant::now();
        fakes.pipeline().run(&task(false)).await.unwrap();
        assert!(start.elapsed() >= std::time::Duration::from_secs(2));
    }
}
