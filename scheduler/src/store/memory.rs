use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use super::{ClaimIndex, IndexWrite, Store};
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Inner {
    fn write_index(&mut self, index: Option<IndexWrite<'_>>) {
        if let Some(index) = index {
            let hash = self.hashes.entry(index.key.to_string()).or_default();
            for (field, value) in index.entries {
                hash.insert(field, value);
            }
        }
    }
}

/// Almacén en memoria para un solo proceso. Un único lock protege todo, así
/// que cada operación es atómica respecto a las demás.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn push_head(
        &self,
        list: &str,
        values: &[String],
        index: Option<IndexWrite<'_>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let l = inner.lists.entry(list.to_string()).or_default();
        for v in values {
            l.push_front(v.clone());
        }
        inner.write_index(index);
        Ok(())
    }

    async fn claim_tail(
        &self,
        src: &str,
        dst: &str,
        fields: &[(&str, String)],
        index: Option<ClaimIndex<'_>>,
    ) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock()?;
        let Some(raw) = inner.lists.get_mut(src).and_then(|l| l.pop_back()) else {
            return Ok(None);
        };

        let (claimed, id) = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(mut obj)) => {
                for (field, value) in fields {
                    obj.insert(field.to_string(), Value::String(value.clone()));
                }
                let id = obj.get("id").and_then(Value::as_str).map(str::to_string);
                (Value::Object(obj).to_string(), id)
            }
            _ => (raw, None),
        };

        inner
            .lists
            .entry(dst.to_string())
            .or_default()
            .push_front(claimed.clone());
        if let (Some(index), Some(id)) = (index, id) {
            inner
                .hashes
                .entry(index.key.to_string())
                .or_default()
                .insert(id, index.value.to_string());
        }
        Ok(Some(claimed))
    }

    async fn move_element(
        &self,
        src: &str,
        dst: &str,
        old: &str,
        new: &str,
        index: Option<IndexWrite<'_>>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let removed = match inner.lists.get_mut(src) {
            Some(l) => match l.iter().position(|v| v == old) {
                Some(pos) => l.remove(pos).is_some(),
                None => false,
            },
            None => false,
        };
        if !removed {
            return Ok(false);
        }
        inner
            .lists
            .entry(dst.to_string())
            .or_default()
            .push_front(new.to_string());
        inner.write_index(index);
        Ok(true)
    }

    async fn range(&self, list: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .lists
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, list: &str) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        Ok(inner.lists.get(list).map(|l| l.len()).unwrap_or(0))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}
