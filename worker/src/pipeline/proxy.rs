use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use super::ProxyPool;

/// Rota en round-robin sobre una lista fija. Lista vacía = sin proxy.
pub struct StaticProxyPool {
    proxies: Vec<String>,
    cursor: AtomicUsize,
}

impl StaticProxyPool {
    pub fn new(proxies: Vec<String>) -> Self {
        Self {
            proxies,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[async_trait]
impl ProxyPool for StaticProxyPool {
    async fn acquire(&self) -> Result<Option<String>> {
        if self.proxies.is_empty() {
            return Ok(None);
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Ok(Some(self.proxies[i].clone()))
    }
}
