use serde::{Deserialize, Serialize};

/// Imagen descargada y verificada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub url: String,
    pub content_type: String,
    /// SHA-256 en hexadecimal del contenido.
    pub hash: String,
    pub extension: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedImage {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResults {
    pub successful: Vec<ImageRecord>,
    pub failed: Vec<FailedImage>,
}

/// Resultado de la política de crawl (robots.txt) para una URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub allowed: bool,
    /// `Crawl-delay` declarado por el sitio (0 si no hay).
    #[serde(default)]
    pub crawl_delay_seconds: f64,
    pub recommended_delay_seconds: f64,
    #[serde(default)]
    pub has_robots_txt: Option<bool>,
}

impl PolicyDecision {
    pub fn allow_all() -> Self {
        Self {
            allowed: true,
            crawl_delay_seconds: 0.0,
            recommended_delay_seconds: 0.0,
            has_robots_txt: None,
        }
    }

    /// Espera antes de seguir pidiendo: el `Crawl-delay` del sitio si lo
    /// declara, si no el recomendado.
    pub fn effective_delay(&self) -> std::time::Duration {
        let secs = if self.crawl_delay_seconds > 0.0 {
            self.crawl_delay_seconds
        } else {
            self.recommended_delay_seconds
        };
        std::time::Duration::try_from_secs_f64(secs).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// La pasada estática bastó.
    Direct,
    /// Pasada estática + dinámica.
    Combined,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlStats {
    pub direct_urls: usize,
    pub cdn_urls: usize,
    pub api_endpoints: usize,
    pub dynamic_urls: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Payload que el worker entrega en `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    pub images: ImageResults,
    pub source: ResultSource,
    pub robots_info: PolicyDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<CrawlStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn declared_crawl_delay_wins_over_recommended() {
        let mut policy = PolicyDecision {
            allowed: true,
            crawl_delay_seconds: 2.0,
            recommended_delay_seconds: 4.0,
            has_robots_txt: Some(true),
        };
        assert_eq!(policy.effective_delay(), Duration::from_secs(2));

        policy.crawl_delay_seconds = 0.0;
        assert_eq!(policy.effective_delay(), Duration::from_secs(4));

        assert_eq!(PolicyDecision::allow_all().effective_delay(), Duration::ZERO);
    }

    #[test]
    fn report_omits_stats_on_direct_pass() {
        let report = CrawlReport {
            images: ImageResults::default(),
            source: ResultSource::Direct,
            robots_info: PolicyDecision::allow_all(),
            stats: None,
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["source"], "direct");
        assert!(v.get("stats").is_none());
        assert_eq!(v["robotsInfo"]["allowed"], true);
    }
}
