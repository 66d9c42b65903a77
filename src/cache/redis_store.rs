use std::sync::LazyLock;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient, Script, aio::MultiplexedConnection};
use tokio::sync::OnceCell;

use super::{CounterStore, StoreError};

// INCR 与 EXPIRE 在同一个脚本中执行，避免出现没有过期时间的计数器
static HIT_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local current = redis.call('INCR', KEYS[1])
        if current == 1 or redis.call('TTL', KEYS[1]) == -1 then
            redis.call('EXPIRE', KEYS[1], ARGV[1])
        end
        return current
        "#,
    )
});

/// Redis-backed counters shared by every instance of the service.
///
/// The connection is opened on first use and then shared by all in-flight
/// requests; a failed attempt leaves it unset so the next request retries.
pub struct RedisCounterStore {
    client: RedisClient,
    conn: OnceCell<MultiplexedConnection>,
}

impl RedisCounterStore {
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            conn: OnceCell::new(),
        }
    }

    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(RedisClient::open(url)?))
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                tracing::info!("Connecting to redis");
                self.client.get_multiplexed_async_connection().await
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(&self, key: &str, window_secs: u64) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let count: u64 = HIT_SCRIPT
            .key(key)
            .arg(window_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection().await?;
        // -2: 键不存在, -1: 没有过期时间
        let ttl: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(ttl).ok())
    }

    async fn count(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection().await?;
        let count: Option<u64> = conn.get(key).await?;
        Ok(count)
    }
}
