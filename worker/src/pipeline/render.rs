use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Proxy};
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::extract::Extractor;
use super::{CaptchaChallenge, CaptchaKind, CaptchaSolver, PageRenderer, USER_AGENT};

/// Detecta los captchas más comunes en el HTML de una página.
pub struct CaptchaDetector {
    recaptcha: Selector,
    image: Selector,
    slider: Selector,
}

impl CaptchaDetector {
    pub fn new() -> Result<Self> {
        let parse = |s: &str| Selector::parse(s).map_err(|e| anyhow!("selector inválido {s}: {e:?}"));
        Ok(Self {
            recaptcha: parse(".g-recaptcha")?,
            image: parse(r#"#captcha-image, .captcha-image, [name="captcha"]"#)?,
            slider: parse(".slider-captcha, .slider")?,
        })
    }

    pub fn detect(&self, html: &str, page_url: &str) -> Vec<CaptchaChallenge> {
        let document = Html::parse_document(html);
        let mut found = Vec::new();

        if let Some(el) = document.select(&self.recaptcha).next() {
            found.push(CaptchaChallenge {
                kind: CaptchaKind::Recaptcha,
                page_url: page_url.to_string(),
                site_key: el.value().attr("data-sitekey").map(str::to_string),
            });
        }
        if document.select(&self.image).next().is_some() {
            found.push(CaptchaChallenge {
                kind: CaptchaKind::Image,
                page_url: page_url.to_string(),
                site_key: None,
            });
        }
        if document.select(&self.slider).next().is_some() {
            found.push(CaptchaChallenge {
                kind: CaptchaKind::Slider,
                page_url: page_url.to_string(),
                site_key: None,
            });
        }
        found
    }
}

/// Carga la página (a través del proxy si lo hay) y extrae las imágenes
/// que aparecen en el documento final.
pub struct HttpPageRenderer {
    timeout: Duration,
    extractor: Extractor,
    captchas: CaptchaDetector,
}

impl HttpPageRenderer {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            timeout,
            extractor: Extractor::new()?,
            captchas: CaptchaDetector::new()?,
        })
    }

    fn client(&self, proxy: Option<&str>) -> Result<Client> {
        let mut builder = Client::builder().timeout(self.timeout);
        if let Some(p) = proxy {
            builder = builder.proxy(Proxy::all(p)?);
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn render(
        &self,
        url: &str,
        proxy: Option<&str>,
        captcha: &dyn CaptchaSolver,
    ) -> Result<Vec<String>> {
        let base = Url::parse(url)?;
        let client = self.client(proxy)?;
        debug!("renderizando {} (proxy: {:?})", url, proxy);

        let html = client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        // un captcha sin resolver no corta el crawl
        for challenge in self.captchas.detect(&html, url) {
            info!(
                "captcha {:?} detectado en {} (sitekey: {:?})",
                challenge.kind, url, challenge.site_key
            );
            match captcha.solve(&challenge).await {
                Ok(_) => debug!("captcha {:?} resuelto", challenge.kind),
                Err(e) => warn!("no se pudo resolver el captcha en {}: {:#}", url, e),
            }
        }

        Ok(self.extractor.page_images(&html, &base))
    }
}

/// Solver por defecto: no resuelve nada.
pub struct NoCaptchaSolver;

#[async_trait]
impl CaptchaSolver for NoCaptchaSolver {
    async fn solve(&self, challenge: &CaptchaChallenge) -> Result<String> {
        bail!(
            "sin solver de captcha configurado ({:?} en {})",
            challenge.kind,
            challenge.page_url
        )
    }

    async fn cleanup(&self) {}
}
