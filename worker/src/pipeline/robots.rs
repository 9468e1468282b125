use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use common::PolicyDecision;

use super::PolicyChecker;

const ROBOTS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RECOMMENDED_DELAY: f64 = 10.0;
const ROBOTS_USER_AGENT: &str = "Mozilla/5.0 (compatible; ImageCrawler/1.0)";

/// Reglas de robots.txt aplicables a `User-agent: *`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    pub crawl_delay: f64,
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    pub fn parse(content: &str) -> Self {
        let mut rules = RobotsRules::default();
        // agentes del grupo actual; un grupo se cierra con la primera regla
        let mut agents: Vec<String> = Vec::new();
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            if directive == "user-agent" {
                if in_rules {
                    agents.clear();
                    in_rules = false;
                }
                agents.push(value.to_ascii_lowercase());
                continue;
            }
            if directive == "sitemap" {
                if !value.is_empty() {
                    rules.sitemaps.push(value.to_string());
                }
                continue;
            }

            in_rules = true;
            if !agents.iter().any(|a| a == "*") {
                continue;
            }
            match directive.as_str() {
                "allow" if !value.is_empty() => rules.allow.push(value.to_string()),
                "disallow" if !value.is_empty() => rules.disallow.push(value.to_string()),
                "crawl-delay" => {
                    if let Ok(delay) = value.parse::<f64>() {
                        rules.crawl_delay = rules.crawl_delay.max(delay);
                    }
                }
                _ => {}
            }
        }
        rules
    }

    /// Gana la regla más específica (patrón más largo); empate -> Allow.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| pattern_matches(p, path))
                .map(|p| p.len())
                .max()
        };
        match (longest(&self.allow), longest(&self.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }

    /// Más reglas -> más espera, con tope de 10 s.
    pub fn recommended_delay(&self) -> f64 {
        let base = if self.crawl_delay > 0.0 {
            self.crawl_delay
        } else {
            1.0
        };
        let complexity = ((self.allow.len() + self.disallow.len()) as f64 / 10.0).min(1.0);
        (base * (1.0 + complexity)).min(MAX_RECOMMENDED_DELAY)
    }

    pub fn decision(&self, path: &str) -> PolicyDecision {
        PolicyDecision {
            allowed: self.is_allowed(path),
            crawl_delay_seconds: self.crawl_delay,
            recommended_delay_seconds: self.recommended_delay(),
            has_robots_txt: Some(true),
        }
    }
}

/// Patrones de robots.txt: prefijo, `*` comodín y `$` ancla final.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.len() - 1;

    let Some(rest) = path.strip_prefix(parts[0]) else {
        return false;
    };
    if last == 0 {
        return !anchored || rest.is_empty();
    }

    let mut rest = rest;
    for (i, part) in parts.iter().enumerate().skip(1) {
        if i == last && anchored {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

fn no_robots() -> PolicyDecision {
    PolicyDecision {
        allowed: true,
        crawl_delay_seconds: 0.0,
        recommended_delay_seconds: 0.0,
        has_robots_txt: Some(false),
    }
}

fn unreachable_robots() -> PolicyDecision {
    PolicyDecision {
        allowed: false,
        crawl_delay_seconds: 0.0,
        recommended_delay_seconds: 0.0,
        has_robots_txt: None,
    }
}

/// Consulta `/robots.txt` del origen con una caché de una hora.
pub struct HttpPolicyChecker {
    client: Client,
    cache: Mutex<HashMap<String, (Instant, Arc<RobotsRules>)>>,
}

impl HttpPolicyChecker {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn cached(&self, origin: &str) -> Option<Arc<RobotsRules>> {
        let cache = self.cache.lock().await;
        cache
            .get(origin)
            .filter(|(at, _)| at.elapsed() < ROBOTS_CACHE_TTL)
            .map(|(_, rules)| Arc::clone(rules))
    }
}

#[async_trait]
impl PolicyChecker for HttpPolicyChecker {
    async fn check(&self, url: &str) -> Result<PolicyDecision> {
        let parsed = Url::parse(url)?;
        let origin = parsed.origin().ascii_serialization();
        let path = match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        };

        if let Some(rules) = self.cached(&origin).await {
            return Ok(rules.decision(&path));
        }

        let robots_url = format!("{origin}/robots.txt");
        let res = match self
            .client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, ROBOTS_USER_AGENT)
            .timeout(ROBOTS_TIMEOUT)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                warn!("no se pudo obtener {}: {}", robots_url, e);
                return Ok(unreachable_robots());
            }
        };

        if res.status() == StatusCode::NOT_FOUND {
            debug!("{} no tiene robots.txt", origin);
            return Ok(no_robots());
        }
        if !res.status().is_success() {
            warn!("{} respondió {}", robots_url, res.status());
            return Ok(unreachable_robots());
        }

        let body = match res.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("robots.txt ilegible en {}: {}", robots_url, e);
                return Ok(unreachable_robots());
            }
        };

        let rules = Arc::new(RobotsRules::parse(&body));
        debug!("{}: robots.txt con {} sitemaps", origin, rules.sitemaps.len());
        self.cache
            .lock()
            .await
            .insert(origin, (Instant::now(), Arc::clone(&rules)));
        Ok(rules.decision(&path))
    }
}
