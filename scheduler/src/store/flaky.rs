//! Almacén de pruebas que se puede "caer": mientras está caído toda
//! operación falla sin tocar los datos.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use super::{ClaimIndex, IndexWrite, MemoryStore, Store};
use crate::error::StoreError;

#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Operaciones rechazadas hasta ahora.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Storage("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn push_head(
        &self,
        list: &str,
        values: &[String],
        index: Option<IndexWrite<'_>>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.push_head(list, values, index).await
    }

    async fn claim_tail(
        &self,
        src: &str,
        dst: &str,
        fields: &[(&str, String)],
        index: Option<ClaimIndex<'_>>,
    ) -> Result<Option<String>, StoreError> {
        self.check()?;
        self.inner.claim_tail(src, dst, fields, index).await
    }

    async fn move_element(
        &self,
        src: &str,
        dst: &str,
        old: &str,
        new: &str,
        index: Option<IndexWrite<'_>>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.move_element(src, dst, old, new, index).await
    }

    async fn range(&self, list: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.range(list).await
    }

    async fn len(&self, list: &str) -> Result<usize, StoreError> {
        self.check()?;
        self.inner.len(list).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.hset(key, field, value).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        self.inner.hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        self.inner.hgetall(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.sadd(key, member).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.smembers(key).await
    }
}
