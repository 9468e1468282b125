//! Dobles de los colaboradores del pipeline para tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use common::{ImageRecord, PolicyDecision};

use super::{
    CaptchaChallenge, CaptchaSolver, CrawlPipeline, ImageDownloader, PageRenderer,
    PolicyChecker, ProxyPool, ResourceAnalyzer, ResourceReport,
};

pub struct FakePolicy {
    pub decision: PolicyDecision,
}

#[async_trait]
impl PolicyChecker for FakePolicy {
    async fn check(&self, _url: &str) -> Result<PolicyDecision> {
        Ok(self.decision.clone())
    }
}

#[derive(Default)]
pub struct FakeAnalyzer {
    pub report: ResourceReport,
    pub api: HashMap<String, std::result::Result<Vec<String>, String>>,
    pub fail: bool,
    pub panic: bool,
}

#[async_trait]
impl ResourceAnalyzer for FakeAnalyzer {
    async fn analyze(&self, _url: &str) -> Result<ResourceReport> {
        if self.panic {
            panic!("analyzer blew up");
        }
        if self.fail {
            return Err(anyhow!("page fetch failed"));
        }
        Ok(self.report.clone())
    }

    async fn probe_api(&self, endpoint: &str, _referer: &str) -> Result<Vec<String>> {
        match self.api.get(endpoint) {
            Some(Ok(urls)) => Ok(urls.clone()),
            Some(Err(e)) => Err(anyhow!("{e}")),
            None => Ok(Vec::new()),
        }
    }
}

/// Descarga con éxito sólo las URLs de `ok`; mide la concurrencia máxima.
#[derive(Default)]
pub struct FakeDownloader {
    pub ok: HashSet<String>,
    pub latency: Duration,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageDownloader for FakeDownloader {
    async fn download(&self, url: &str, _referer: &str) -> Result<ImageRecord> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.ok.contains(url) {
            Ok(ImageRecord {
                url: url.to_string(),
                content_type: "image/png".to_string(),
                hash: "00".repeat(32),
                extension: "png".to_string(),
                size: 4,
            })
        } else {
            Err(anyhow!("HTTP 404"))
        }
    }
}

#[derive(Default)]
pub struct FakeProxies {
    pub proxy: Option<String>,
}

#[async_trait]
impl ProxyPool for FakeProxies {
    async fn acquire(&self) -> Result<Option<String>> {
        Ok(self.proxy.clone())
    }
}

#[derive(Default)]
pub struct FakeRenderer {
    pub urls: Vec<String>,
    pub calls: AtomicUsize,
    pub last_proxy: Mutex<Option<String>>,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(
        &self,
        _url: &str,
        proxy: Option<&str>,
        _captcha: &dyn CaptchaSolver,
    ) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_proxy.lock().unwrap() = proxy.map(str::to_string);
        Ok(self.urls.clone())
    }
}

#[derive(Default)]
pub struct FakeCaptcha {
    pub cleaned_up: AtomicBool,
}

#[async_trait]
impl CaptchaSolver for FakeCaptcha {
    async fn solve(&self, _challenge: &CaptchaChallenge) -> Result<String> {
        Ok("solved".to_string())
    }

    async fn cleanup(&self) {
        self.cleaned_up.store(true, Ordering::SeqCst);
    }
}

/// Juego completo de dobles; los builders se usan antes de `pipeline()`.
pub struct Fakes {
    pub policy: Arc<FakePolicy>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub downloader: Arc<FakeDownloader>,
    pub proxies: Arc<FakeProxies>,
    pub renderer: Arc<FakeRenderer>,
    pub captcha: Arc<FakeCaptcha>,
}

fn owned(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            policy: Arc::new(FakePolicy {
                decision: PolicyDecision::allow_all(),
            }),
            analyzer: Arc::new(FakeAnalyzer::default()),
            downloader: Arc::new(FakeDownloader::default()),
            proxies: Arc::new(FakeProxies::default()),
            renderer: Arc::new(FakeRenderer::default()),
            captcha: Arc::new(FakeCaptcha::default()),
        }
    }

    pub fn with_policy(mut self, allowed: bool) -> Self {
        Arc::get_mut(&mut self.policy).unwrap().decision.allowed = allowed;
        self
    }

    pub fn with_delay(mut self, crawl_delay_seconds: f64) -> Self {
        Arc::get_mut(&mut self.policy).unwrap().decision.crawl_delay_seconds = crawl_delay_seconds;
        self
    }

    pub fn with_static(mut self, direct: &[&str], cdn: &[&str]) -> Self {
        let analyzer = Arc::get_mut(&mut self.analyzer).unwrap();
        analyzer.report.direct_urls = owned(direct);
        analyzer.report.cdn_urls = owned(cdn);
        self
    }

    pub fn with_api(mut self, endpoint: &str, result: std::result::Result<Vec<&str>, &str>) -> Self {
        let analyzer = Arc::get_mut(&mut self.analyzer).unwrap();
        analyzer.report.api_endpoints.push(endpoint.to_string());
        analyzer.api.insert(
            endpoint.to_string(),
            result.map(|urls| owned(&urls)).map_err(str::to_string),
        );
        self
    }

    pub fn analyzer_fails(mut self) -> Self {
        Arc::get_mut(&mut self.analyzer).unwrap().fail = true;
        self
    }

    pub fn analyzer_panics(mut self) -> Self {
        Arc::get_mut(&mut self.analyzer).unwrap().panic = true;
        self
    }

    pub fn downloads_ok(mut self, urls: &[&str]) -> Self {
        Arc::get_mut(&mut self.downloader)
            .unwrap()
            .ok
            .extend(urls.iter().map(|u| u.to_string()));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::get_mut(&mut self.downloader).unwrap().latency = latency;
        self
    }

    pub fn with_dynamic(mut self, urls: &[&str]) -> Self {
        Arc::get_mut(&mut self.renderer).unwrap().urls = owned(urls);
        self
    }

    pub fn with_proxy(mut self, proxy: &str) -> Self {
        Arc::get_mut(&mut self.proxies).unwrap().proxy = Some(proxy.to_string());
        self
    }

    pub fn pipeline(&self) -> CrawlPipeline {
        CrawlPipeline {
            policy: self.policy.clone(),
            analyzer: self.analyzer.clone(),
            downloader: self.downloader.clone(),
            proxies: self.proxies.clone(),
            renderer: self.renderer.clone(),
            captcha: self.captcha.clone(),
        }
    }
}
