//! Valkey/Redis backend.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use solar_common::config::StoreConfig;

use super::{StateStore, StoreError};

const REFRESH_IF_HELD: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return current
"#;

const DELETE_IF_HELD: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct ValkeyStore {
    pool: Pool,
    namespace: Option<String>,
    timeout: Duration,
}

impl ValkeyStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = Config::from_url(config.url.as_str())
            .builder()
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            pool,
            namespace: config.namespace.clone(),
            timeout: Duration::from_millis(config.command_timeout_ms),
        };

        store
            .bounded(async {
                let mut conn = store.conn().await?;
                redis::cmd("PING")
                    .query_async::<String>(&mut *conn)
                    .await
                    .map_err(|e| StoreError::Connection(e.to_string()))
            })
            .await?;

        Ok(store)
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }

    async fn conn(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn bounded<T>(
        &self,
        command: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, command)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn whole_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl StateStore for ValkeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = self.prefixed_key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            redis::cmd("GET")
                .arg(&key)
                .query_async::<Option<String>>(&mut *conn)
                .await
                .map_err(backend)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let key = self.prefixed_key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(whole_seconds(ttl));
            }
            cmd.query_async::<()>(&mut *conn).await.map_err(backend)
        })
        .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let key = self.prefixed_key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            // SET key value NX EX seconds
            let result: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(whole_seconds(ttl))
                .query_async(&mut *conn)
                .await
                .map_err(backend)?;
            Ok(result.is_some())
        })
        .await
    }

    async fn refresh_if_held(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        let key = self.prefixed_key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let script = redis::Script::new(REFRESH_IF_HELD);
            script
                .key(&key)
                .arg(expected)
                .arg(whole_seconds(ttl))
                .invoke_async::<Option<String>>(&mut *conn)
                .await
                .map_err(backend)
        })
        .await
    }

    async fn delete_if_held(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let key = self.prefixed_key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let script = redis::Script::new(DELETE_IF_HELD);
            let deleted: i64 = script
                .key(&key)
                .arg(expected)
                .invoke_async(&mut *conn)
                .await
                .map_err(backend)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = self.prefixed_key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let deleted: i64 = redis::cmd("DEL")
                .arg(&key)
                .query_async(&mut *conn)
                .await
                .map_err(backend)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let key = self.prefixed_key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            let (count,): (u64,) = redis::pipe()
                .atomic()
                .cmd("INCR")
                .arg(&key)
                .cmd("EXPIRE")
                .arg(&key)
                .arg(whole_seconds(ttl))
                .ignore()
                .query_async(&mut *conn)
                .await
                .map_err(backend)?;
            Ok(count)
        })
        .await
    }

    async fn push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), StoreError> {
        let key = self.prefixed_key(key);
        let last = cap.max(1) as i64 - 1;
        self.bounded(async {
            let mut conn = self.conn().await?;
            redis::pipe()
                .atomic()
                .cmd("LPUSH")
                .arg(&key)
                .arg(value)
                .ignore()
                .cmd("LTRIM")
                .arg(&key)
                .arg(0)
                .arg(last)
                .ignore()
                .query_async::<()>(&mut *conn)
                .await
                .map_err(backend)
        })
        .await
    }

    async fn list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let key = self.prefixed_key(key);
        self.bounded(async {
            let mut conn = self.conn().await?;
            redis::cmd("LRANGE")
                .arg(&key)
                .arg(0)
                .arg(-1)
                .query_async::<Vec<String>>(&mut *conn)
                .await
                .map_err(backend)
        })
        .await
    }
}

impl std::fmt::Debug for ValkeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyStore")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
