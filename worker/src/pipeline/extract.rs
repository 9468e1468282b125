use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{header, Client};
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{ResourceAnalyzer, ResourceReport, USER_AGENT};

const CDN_HOST_PATTERNS: &[&str] = &[
    r"cdn\.",
    r"\.cloudfront\.net",
    r"\.akamai(zed|hd)?\.",
    r"\.fastly\.net",
    r"\.cloudflare\.",
    r"\.jsdelivr\.net",
    r"\.alicdn\.com",
    r"\.qiniu(cdn)?\.com",
    r"\.aliyuncs\.com",
    r"\.oss-cn-",
];

const API_PATH_PATTERNS: &[&str] = &[
    r"/api/images?",
    r"/images?/api",
    r"/upload(ed)?/images?",
    r"/assets/images?",
    r"/static/images?",
    r"/media/images?",
    r"/(img|image|pic|photo)s?/\d+",
];

const DATA_ATTRS: &[&str] = &[
    "data-src",
    "data-original",
    "data-image",
    "data-bg",
    "data-background",
    "data-thumb",
    "data-url",
];

/// Reglas compiladas para encontrar recursos de imagen en una página.
pub struct Extractor {
    img: Selector,
    data_attrs: Selector,
    image_url: Regex,
    background: Regex,
    json_image: Regex,
    api_assignment: Regex,
    cdn_hosts: Vec<Regex>,
    api_paths: Vec<Regex>,
}

fn ci(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("(?i){pattern}")).with_context(|| format!("regex inválida: {pattern}"))
}

fn selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("selector inválido {s}: {e:?}"))
}

impl Extractor {
    pub fn new() -> Result<Self> {
        let data_selector = DATA_ATTRS
            .iter()
            .map(|a| format!("[{a}]"))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Self {
            img: selector("img")?,
            data_attrs: selector(&data_selector)?,
            image_url: ci(r"\.(jpg|jpeg|png|gif|webp|bmp)(\?.*)?$")?,
            background: ci(r#"background(?:-image)?\s*:\s*url\(\s*['"]?([^'"()]+)['"]?\s*\)"#)?,
            json_image: ci(r#""(?:url|src|image|thumbnail)"\s*:\s*"([^"]+\.(?:jpg|jpeg|png|gif|webp))""#)?,
            api_assignment: ci(
                r#"(?:api|service|endpoint)(?:Url|Path|Endpoint)?\s*[:=]\s*["']([^"']+)["']"#,
            )?,
            cdn_hosts: CDN_HOST_PATTERNS.iter().map(|p| ci(p)).collect::<Result<_>>()?,
            api_paths: API_PATH_PATTERNS.iter().map(|p| ci(p)).collect::<Result<_>>()?,
        })
    }

    pub fn is_image_url(&self, url: &str) -> bool {
        self.image_url.is_match(url)
    }

    fn is_cdn_host(&self, host: &str) -> bool {
        self.cdn_hosts.iter().any(|r| r.is_match(host))
    }

    fn is_api_path(&self, path: &str) -> bool {
        self.api_paths.iter().any(|r| r.is_match(path))
    }

    /// Busca imágenes en el HTML (y en la cabecera `Link`, si la hay).
    pub fn analyze_html(&self, html: &str, base: &Url, link_header: Option<&str>) -> ResourceReport {
        let mut found = Categorized::default();
        let document = Html::parse_document(html);

        for img in document.select(&self.img) {
            let el = img.value();
            for attr in ["src", "data-src", "data-original"] {
                if let Some(v) = el.attr(attr) {
                    self.categorize(base, v, &mut found);
                }
            }
            if let Some(srcset) = el.attr("srcset") {
                for candidate in srcset.split(',') {
                    if let Some(u) = candidate.split_whitespace().next() {
                        self.categorize(base, u, &mut found);
                    }
                }
            }
        }

        for el in document.select(&self.data_attrs) {
            for attr in DATA_ATTRS {
                if let Some(v) = el.value().attr(attr) {
                    self.categorize(base, v, &mut found);
                }
            }
        }

        for cap in self.background.captures_iter(html) {
            self.categorize(base, &cap[1], &mut found);
        }
        for cap in self.json_image.captures_iter(html) {
            self.categorize(base, &cap[1], &mut found);
        }

        for cap in self.api_assignment.captures_iter(html) {
            if let Ok(url) = base.join(&cap[1]) {
                if self.is_api_path(url.path()) {
                    found.push_api(url.to_string());
                }
            }
        }

        if let Some(links) = link_header {
            for part in links.split(',') {
                let target = part
                    .trim()
                    .strip_prefix('<')
                    .and_then(|rest| rest.split_once('>'))
                    .map(|(u, _)| u);
                if let Some(u) = target {
                    self.categorize(base, u, &mut found);
                }
            }
        }

        found.report
    }

    fn categorize(&self, base: &Url, raw: &str, found: &mut Categorized) {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") {
            return;
        }
        let Ok(url) = base.join(raw) else {
            return;
        };
        if !matches!(url.scheme(), "http" | "https") {
            return;
        }
        let href = url.to_string();
        if !self.is_image_url(&href) {
            return;
        }

        if url.host_str().is_some_and(|h| self.is_cdn_host(h)) {
            found.push(href, Bucket::Cdn);
        } else if self.is_api_path(url.path()) {
            found.push_api(href);
        } else {
            found.push(href, Bucket::Direct);
        }
    }

    /// Imágenes tal como las vería un navegador tras cargar la página:
    /// `img` (incluido lazy-load) y fondos CSS, sin filtrar por extensión.
    pub fn page_images(&self, html: &str, base: &Url) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut raw: Vec<String> = Vec::new();

        for img in document.select(&self.img) {
            for attr in ["src", "data-src", "data-original"] {
                if let Some(v) = img.value().attr(attr) {
                    raw.push(v.to_string());
                }
            }
        }
        for cap in self.background.captures_iter(html) {
            raw.push(cap[1].to_string());
        }

        let mut seen = HashSet::new();
        raw.iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty() && !r.starts_with("data:"))
            .filter_map(|r| base.join(r).ok())
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .map(|u| u.to_string())
            .filter(|u| seen.insert(u.clone()))
            .collect()
    }

    /// Recorre un JSON arbitrario y devuelve las URLs de imagen (absolutas).
    pub fn image_urls_in_json(&self, value: &Value, base: &Url) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![value];

        while let Some(current) = stack.pop() {
            match current {
                Value::String(s) if self.is_image_url(s) => {
                    if let Ok(url) = base.join(s) {
                        let href = url.to_string();
                        if seen.insert(href.clone()) {
                            out.push(href);
                        }
                    }
                }
                Value::Array(items) => stack.extend(items.iter().rev()),
                Value::Object(map) => stack.extend(map.values().rev()),
                _ => {}
            }
        }
        out
    }
}

enum Bucket {
    Direct,
    Cdn,
}

#[derive(Default)]
struct Categorized {
    report: ResourceReport,
    seen: HashSet<String>,
}

impl Categorized {
    fn push(&mut self, url: String, bucket: Bucket) {
        if !self.seen.insert(url.clone()) {
            return;
        }
        match bucket {
            Bucket::Direct => self.report.direct_urls.push(url),
            Bucket::Cdn => self.report.cdn_urls.push(url),
        }
    }

    fn push_api(&mut self, url: String) {
        if !self.report.api_endpoints.contains(&url) {
            self.report.api_endpoints.push(url);
        }
    }
}

/// Analiza la página con una petición HTTP simple (sin JavaScript).
pub struct HtmlResourceAnalyzer {
    client: Client,
    extractor: Extractor,
}

impl HtmlResourceAnalyzer {
    pub fn new(client: Client) -> Result<Self> {
        Ok(Self {
            client,
            extractor: Extractor::new()?,
        })
    }
}

#[async_trait]
impl ResourceAnalyzer for HtmlResourceAnalyzer {
    async fn analyze(&self, url: &str) -> Result<ResourceReport> {
        let base = Url::parse(url)?;
        let res = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        let link_header = res
            .headers()
            .get(header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let html = res.text().await?;

        let report = self.extractor.analyze_html(&html, &base, link_header.as_deref());
        debug!(
            "{}: {} directas, {} cdn, {} endpoints",
            url,
            report.direct_urls.len(),
            report.cdn_urls.len(),
            report.api_endpoints.len()
        );
        Ok(report)
    }

    async fn probe_api(&self, endpoint: &str, referer: &str) -> Result<Vec<String>> {
        let base = Url::parse(referer)?;
        let body: Value = self
            .client
            .get(endpoint)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::REFERER, referer)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(self.extractor.image_urls_in_json(&body, &base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = r#"
<html>
  <head>
    <style>.hero { background-image: url('/img/hero.jpg'); }</style>
    <script>
      var config = {"thumbnail": "https://example.com/thumbs/t1.png"};
      window.apiUrl = "/api/images/list";
    </script>
  </head>
  <body>
    <img src="/photos/cat.jpg">
    <img src="https://cdn.example.net/dog.png?w=200">
    <img data-src="lazy/bird.webp" src="data:image/gif;base64,R0lGOD">
    <img srcset="/small.jpg 1x, /large.jpg 2x">
    <div data-bg="/bg/texture.gif"></div>
    <a href="/page.html">not an image</a>
    <img src="/photos/cat.jpg">
    <img src="/media/images/42.png">
  </body>
</html>"#;

    fn extractor() -> Extractor {
        Extractor::new().unwrap()
    }

    #[test]
    fn finds_and_categorizes_images() {
        let base = Url::parse("https://example.com/gallery/").unwrap();
        let report = extractor().analyze_html(PAGE, &base, None);

        assert!(report.direct_urls.contains(&"https://example.com/photos/cat.jpg".to_string()));
        assert!(report
            .direct_urls
            .contains(&"https://example.com/gallery/lazy/bird.webp".to_string()));
        assert!(report.direct_urls.contains(&"https://example.com/small.jpg".to_string()));
        assert!(report.direct_urls.contains(&"https://example.com/large.jpg".to_string()));
        assert!(report.direct_urls.contains(&"https://example.com/bg/texture.gif".to_string()));
        assert!(report.direct_urls.contains(&"https://example.com/img/hero.jpg".to_string()));
        assert!(report
            .direct_urls
            .contains(&"https://example.com/thumbs/t1.png".to_string()));

        assert_eq!(report.cdn_urls, vec!["https://cdn.example.net/dog.png?w=200"]);

        // duplicados fuera, data: URIs fuera, enlaces no-imagen fuera
        let cats = report.direct_urls.iter().filter(|u| u.ends_with("cat.jpg")).count();
        assert_eq!(cats, 1);
        assert!(report.direct_urls.iter().all(|u| !u.starts_with("data:")));
        assert!(report.direct_urls.iter().all(|u| !u.ends_with("page.html")));
    }

    #[test]
    fn api_endpoints_come_from_paths_and_scripts() {
        let base = Url::parse("https://example.com/gallery/").unwrap();
        let report = extractor().analyze_html(PAGE, &base, None);

        assert!(report
            .api_endpoints
            .contains(&"https://example.com/api/images/list".to_string()));
        assert!(report
            .api_endpoints
            .contains(&"https://example.com/media/images/42.png".to_string()));
    }

    #[test]
    fn link_header_images_are_included() {
        let base = Url::parse("https://example.com/").unwrap();
        let report = extractor().analyze_html(
            "<html></html>",
            &base,
            Some("</preload/banner.png>; rel=preload; as=image, </style.css>; rel=preload"),
        );
        assert_eq!(report.direct_urls, vec!["https://example.com/preload/banner.png"]);
    }

    #[test]
    fn walks_json_for_image_urls() {
        let base = Url::parse("https://example.com/").unwrap();
        let body = json!({
            "items": [
                {"src": "/a.jpg", "title": "x"},
                {"nested": {"url": "https://img.example.com/b.PNG"}},
                {"src": "/a.jpg"}
            ],
            "next": "/page/2",
            "count": 3
        });
        let urls = extractor().image_urls_in_json(&body, &base);
        assert_eq!(
            urls,
            vec!["https://example.com/a.jpg", "https://img.example.com/b.PNG"]
        );
    }

    #[test]
    fn page_images_keep_extensionless_sources() {
        let base = Url::parse("https://example.com/").unwrap();
        let html = r#"<img src="/render?id=7"><img data-original="/x.jpg" src="/x.jpg">
            <div style="background: url(/bg.png)"></div><img src="data:image/png;base64,AA">"#;
        assert_eq!(
            extractor().page_images(html, &base),
            vec![
                "https://example.com/render?id=7",
                "https://example.com/x.jpg",
                "https://example.com/bg.png",
            ]
        );
    }

    #[test]
    fn image_url_detection() {
        let x = extractor();
        assert!(x.is_image_url("https://example.com/a.JPEG"));
        assert!(x.is_image_url("https://example.com/a.webp?size=large"));
        assert!(!x.is_image_url("https://example.com/a.jpg.html"));
        assert!(!x.is_image_url("https://example.com/"));
    }
}
