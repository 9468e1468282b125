use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Script};
use std::collections::HashMap;
use tracing::info;

use super::{ClaimIndex, IndexWrite, Store};
use crate::error::StoreError;

// KEYS[1]=src KEYS[2]=dst KEYS[3]=índice (opcional)
// ARGV[1]=old ARGV[2]=new ARGV[3..]=pares campo/valor del índice
const MOVE_ELEMENT_LUA: &str = r#"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
    return 0
end
redis.call('LPUSH', KEYS[2], ARGV[2])
if #KEYS > 2 then
    for i = 3, #ARGV, 2 do
        redis.call('HSET', KEYS[3], ARGV[i], ARGV[i + 1])
    end
end
return 1
"#;

// KEYS[1]=src KEYS[2]=dst KEYS[3]=índice (opcional)
// ARGV[1]=valor del índice ARGV[2..]=pares campo/valor a escribir
// cjson reescribe el objeto: el orden de las claves puede cambiar.
const CLAIM_TAIL_LUA: &str = r#"
local raw = redis.call('RPOP', KEYS[1])
if not raw then
    return false
end
local ok, obj = pcall(cjson.decode, raw)
if not ok or type(obj) ~= 'table' then
    redis.call('LPUSH', KEYS[2], raw)
    return raw
end
for i = 2, #ARGV, 2 do
    obj[ARGV[i]] = ARGV[i + 1]
end
local claimed = cjson.encode(obj)
redis.call('LPUSH', KEYS[2], claimed)
if #KEYS > 2 and type(obj['id']) == 'string' then
    redis.call('HSET', KEYS[3], obj['id'], ARGV[1])
end
return claimed
"#;

/// Almacén compartido sobre Redis; es el punto de sincronización entre
/// procesos.
pub struct RedisStore {
    con: MultiplexedConnection,
    move_element_script: Script,
    claim_tail_script: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let con = client.get_multiplexed_async_connection().await?;
        info!("conectado a redis en {}", redis_url);
        Ok(Self {
            con,
            move_element_script: Script::new(MOVE_ELEMENT_LUA),
            claim_tail_script: Script::new(CLAIM_TAIL_LUA),
        })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn push_head(
        &self,
        list: &str,
        values: &[String],
        index: Option<IndexWrite<'_>>,
    ) -> Result<(), StoreError> {
        let mut con = self.con.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !values.is_empty() {
            pipe.lpush(list, values.to_vec()).ignore();
        }
        if let Some(index) = index {
            if !index.entries.is_empty() {
                pipe.hset_multiple(index.key, &index.entries).ignore();
            }
        }
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    async fn claim_tail(
        &self,
        src: &str,
        dst: &str,
        fields: &[(&str, String)],
        index: Option<ClaimIndex<'_>>,
    ) -> Result<Option<String>, StoreError> {
        let mut con = self.con.clone();
        let mut invocation = self.claim_tail_script.prepare_invoke();
        invocation.key(src).key(dst);
        match index {
            Some(index) => {
                invocation.key(index.key).arg(index.value);
            }
            None => {
                invocation.arg("");
            }
        }
        for (field, value) in fields {
            invocation.arg(*field).arg(value);
        }
        let claimed: Option<String> = invocation.invoke_async(&mut con).await?;
        Ok(claimed)
    }

    async fn move_element(
        &self,
        src: &str,
        dst: &str,
        old: &str,
        new: &str,
        index: Option<IndexWrite<'_>>,
    ) -> Result<bool, StoreError> {
        let mut con = self.con.clone();
        let mut invocation = self.move_element_script.prepare_invoke();
        invocation.key(src).key(dst).arg(old).arg(new);
        if let Some(index) = index {
            invocation.key(index.key);
            for (field, value) in &index.entries {
                invocation.arg(field).arg(value);
            }
        }
        let moved: i64 = invocation.invoke_async(&mut con).await?;
        Ok(moved == 1)
    }

    async fn range(&self, list: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.con.clone();
        let items: Vec<String> = con.lrange(list, 0, -1).await?;
        Ok(items)
    }

    async fn len(&self, list: &str) -> Result<usize, StoreError> {
        let mut con = self.con.clone();
        let n: usize = con.llen(list).await?;
        Ok(n)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut con = self.con.clone();
        let _: () = con.hset(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.con.clone();
        let value: Option<String> = con.hget(key, field).await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut con = self.con.clone();
        let all: HashMap<String, String> = con.hgetall(key).await?;
        Ok(all)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut con = self.con.clone();
        let _: () = con.sadd(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.con.clone();
        let members: Vec<String> = con.smembers(key).await?;
        Ok(members)
    }
}
