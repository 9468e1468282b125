//! Primitivas del almacén compartido (el "Durable Store").
//!
//! Todas las operaciones son atómicas por sí solas. Ninguna operación del
//! manager hace read-modify-write entre colas: los movimientos se expresan
//! con `claim_tail` (RPOP + marca + LPUSH) o `move_element` (LREM + LPUSH
//! atómico).

#[cfg(test)]
pub(crate) mod flaky;
mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::StoreError;

/// Entradas de un hash que se escriben en el mismo paso atómico que la
/// mutación de listas (lo usamos para el índice id -> cola).
#[derive(Debug, Clone)]
pub struct IndexWrite<'a> {
    pub key: &'a str,
    pub entries: Vec<(String, String)>,
}

impl<'a> IndexWrite<'a> {
    pub fn single(key: &'a str, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key,
            entries: vec![(field.into(), value.into())],
        }
    }
}

/// Entrada del índice que escribe `claim_tail`; el campo es el `id` del
/// elemento reclamado.
#[derive(Debug, Clone, Copy)]
pub struct ClaimIndex<'a> {
    pub key: &'a str,
    pub value: &'a str,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// LPUSH de cada valor en orden (el primero queda más cerca de la cola
    /// de salida) + escritura opcional del índice.
    async fn push_head(
        &self,
        list: &str,
        values: &[String],
        index: Option<IndexWrite<'_>>,
    ) -> Result<(), StoreError>;

    /// Claim en un solo paso: saca el elemento más antiguo de `src`, escribe
    /// `fields` (valores string) en su objeto JSON, lo deja en la cabeza de
    /// `dst` y actualiza el índice. Devuelve el elemento ya marcado.
    ///
    /// Un elemento que no es un objeto JSON se mueve sin tocar.
    async fn claim_tail(
        &self,
        src: &str,
        dst: &str,
        fields: &[(&str, String)],
        index: Option<ClaimIndex<'_>>,
    ) -> Result<Option<String>, StoreError>;

    /// Quita una ocurrencia de `old` de `src` y, sólo si estaba, empuja `new`
    /// a la cabeza de `dst` y escribe el índice. Devuelve si hubo movimiento.
    async fn move_element(
        &self,
        src: &str,
        dst: &str,
        old: &str,
        new: &str,
        index: Option<IndexWrite<'_>>,
    ) -> Result<bool, StoreError>;

    /// Lista completa, de cabeza a cola.
    async fn range(&self, list: &str) -> Result<Vec<String>, StoreError>;

    async fn len(&self, list: &str) -> Result<usize, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
}
