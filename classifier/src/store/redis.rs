use std::{future::Future, sync::Arc, time::Duration};

use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tokio::sync::OnceCell;
use tracing::info;

use super::ResultCache;
use crate::error::CacheError;

/// Redis-backed cache.
///
/// The connection is opened on first use rather than at construction, so a
/// server that is down at startup only turns lookups into misses until it
/// comes back. Once established, [`ConnectionManager`] reconnects on its own.
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
}

impl RedisCache {
    /// Parses `url` (`redis://[user:pass@]host:port/db`); does not connect.
    pub fn open(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            connection: Arc::new(OnceCell::new()),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let connection = self
            .connection
            .get_or_try_init(|| async {
                let connection = self.client.get_connection_manager().await?;
                info!("connected to redis");
                Ok::<_, CacheError>(connection)
            })
            .await?;
        Ok(connection.clone())
    }

    /// Empties the current database.
    pub async fn flush(&self) -> Result<(), CacheError> {
        let mut connection = self.connection().await?;
        let () = redis::cmd("FLUSHDB").query_async(&mut connection).await?;
        Ok(())
    }

    /// Checks that the server answers.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut connection = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }
}

impl ResultCache for RedisCache {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send {
        async move {
            let mut connection = self.connection().await?;
            let value: Option<String> = connection.get(key).await?;
            Ok(value)
        }
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        async move {
            let mut connection = self.connection().await?;
            let () = connection.set_ex(key, value, ttl.as_secs().max(1)).await?;
            Ok(())
        }
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send {
        async move {
            let mut connection = self.connection().await?;
            let _: usize = connection.del(key).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        assert!(matches!(
            RedisCache::open("not a url"),
            Err(CacheError::Unavailable(_))
        ));
    }

    /// Runs against the server at `REDIS_URL`:
    /// `REDIS_URL=redis://127.0.0.1:6379/0 cargo test -- --ignored`
    #[tokio::test]
    #[ignore = "needs a redis server at REDIS_URL"]
    async fn round_trip_against_server() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let cache = RedisCache::open(&url).unwrap();
        cache.ping().await.unwrap();

        let key = format!("inference:test-{}", std::process::id());
        assert_eq!(cache.get(&key).await.unwrap(), None);

        cache
            .set(&key, "3|0.9125|0.9125,0.0875".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get(&key).await.unwrap().as_deref(),
            Some("3|0.9125|0.9125,0.0875")
        );

        cache.delete(&key).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);

        // expiry is in whole seconds
        cache
            .set(&key, "short".into(), Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("short"));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(cache.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreachable_server_never_answers() {
        // nothing listens on port 1
        let cache = RedisCache::open("redis://127.0.0.1:1/0").unwrap();
        let result = tokio::time::timeout(Duration::from_millis(300), cache.get("k")).await;
        assert!(!matches!(result, Ok(Ok(_))), "{result:?}");
    }
}
