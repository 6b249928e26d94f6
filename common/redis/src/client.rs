use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::{Client, CustomRedisError};

/// How long a failed connect attempt suppresses new ones. Commands issued in
/// that window fail immediately instead of waiting on another connect timeout.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

pub struct RedisClient {
    client: redis::Client,
    response_timeout: Option<Duration>,
    connection_timeout: Option<Duration>,
    reconnect_backoff: Duration,
    // Established on first use and dropped again once it is known to be broken,
    // so the service can start (and keep serving fallback reads) while redis is down.
    // The lock is never held across an await.
    state: Mutex<ConnectionState>,
}

#[derive(Default)]
struct ConnectionState {
    connection: Option<MultiplexedConnection>,
    retry_after: Option<Instant>,
}

impl RedisClient {
    /// Create a new RedisClient without timeouts.
    ///
    /// For timeout configuration, use `with_config()` and specify `response_timeout` and `connection_timeout`.
    pub fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None)
    }

    /// Create a new RedisClient with explicit timeouts.
    ///
    /// # Arguments
    /// * `addr` - Redis connection string
    /// * `response_timeout` - Optional timeout for Redis command responses. `None` means no timeout (blocks indefinitely).
    /// * `connection_timeout` - Optional timeout for establishing connections. `None` means no timeout (blocks indefinitely).
    ///
    /// No connection is opened here; the first command connects.
    ///
    /// # Errors
    /// Returns `CustomRedisError::InvalidConfiguration` if `Some(Duration::ZERO)` is passed - use `None` for no timeout instead.
    ///
    /// # Examples
    /// ```no_run
    /// use common_redis::RedisClient;
    /// use std::time::Duration;
    ///
    /// let client = RedisClient::with_config(
    ///     "redis://localhost:6379".to_string(),
    ///     Some(Duration::from_millis(100)),
    ///     Some(Duration::from_millis(1000)),
    /// ).unwrap();
    /// ```
    pub fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        // Validate that Duration::ZERO is not passed - use None instead
        if let Some(timeout) = response_timeout {
            if timeout.is_zero() {
                return Err(CustomRedisError::InvalidConfiguration(
                    "Redis response timeout cannot be Duration::ZERO - use None for no timeout"
                        .to_string(),
                ));
            }
        }
        if let Some(timeout) = connection_timeout {
            if timeout.is_zero() {
                return Err(CustomRedisError::InvalidConfiguration(
                    "Redis connection timeout cannot be Duration::ZERO - use None for no timeout"
                        .to_string(),
                ));
            }
        }

        Ok(RedisClient {
            client,
            response_timeout,
            connection_timeout,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            state: Mutex::new(ConnectionState::default()),
        })
    }

    /// Override how long a failed connect attempt blocks new ones.
    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CustomRedisError> {
        {
            let state = self.state.lock().await;
            if let Some(connection) = state.connection.as_ref() {
                return Ok(connection.clone());
            }
            if let Some(retry_after) = state.retry_after {
                if Instant::now() < retry_after {
                    return Err(CustomRedisError::from_redis_kind(
                        redis::ErrorKind::IoError,
                        "redis unreachable, waiting before reconnecting",
                    ));
                }
            }
        }

        // Concurrent callers may all get here; each attempt is bounded by the
        // connection timeout, and the first one to succeed is kept.
        match self.connect().await {
            Ok(connection) => {
                let mut state = self.state.lock().await;
                state.retry_after = None;
                Ok(state.connection.get_or_insert(connection).clone())
            }
            Err(e) => {
                let retry_after = Instant::now() + self.reconnect_backoff;
                self.state.lock().await.retry_after = Some(retry_after);
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<MultiplexedConnection, CustomRedisError> {
        // Use Redis native timeout configuration
        // None means no timeout (blocks indefinitely)
        let mut config = redis::AsyncConnectionConfig::new();

        if let Some(timeout) = self.response_timeout {
            config = config.set_response_timeout(timeout);
        }

        if let Some(timeout) = self.connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        Ok(self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?)
    }

    /// Runs one command on the shared connection, discarding the connection if
    /// the command failed in a way that leaves it unusable.
    async fn run<T, F, Fut>(&self, command: F) -> Result<T, CustomRedisError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: Future<Output = Result<T, redis::RedisError>> + Send,
        T: Send,
    {
        let connection = self.connection().await.inspect_err(|e| {
            warn!(error = %e, "Failed to connect to redis");
        })?;

        match command(connection).await {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = CustomRedisError::from(e);
                if err.is_connection_broken() {
                    warn!(error = %err, "Dropping broken redis connection");
                    self.state.lock().await.connection = None;
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let raw: Option<Vec<u8>> = self
            .run(|mut conn| async move { conn.get::<_, Option<Vec<u8>>>(k).await })
            .await?;

        match raw {
            None => Err(CustomRedisError::NotFound),
            Some(bytes) => Ok(String::from_utf8(bytes)?),
        }
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        self.run(|mut conn| async move { conn.set::<_, _, ()>(k, v).await })
            .await
    }

    async fn set_nx(&self, k: String, v: String) -> Result<bool, CustomRedisError> {
        self.run(|mut conn| async move { conn.set_nx::<_, _, bool>(k, v).await })
            .await
    }

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        self.run(|mut conn| async move { conn.exists::<_, bool>(k).await })
            .await
    }

    async fn ttl(&self, k: String) -> Result<i64, CustomRedisError> {
        self.run(|mut conn| async move { conn.ttl::<_, i64>(k).await })
            .await
    }

    async fn incr(&self, k: String) -> Result<i64, CustomRedisError> {
        self.run(|mut conn| async move { conn.incr::<_, _, i64>(k, 1).await })
            .await
    }

    async fn expire(&self, k: String, seconds: u64) -> Result<bool, CustomRedisError> {
        self.run(|mut conn| async move {
            let applied: bool = redis::cmd("EXPIRE")
                .arg(k)
                .arg(seconds)
                .query_async(&mut conn)
                .await?;
            Ok(applied)
        })
        .await
    }

    async fn scan(
        &self,
        pattern: String,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), CustomRedisError> {
        self.run(|mut conn| async move {
            let page: (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await?;
            Ok(page)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    #[test]
    fn test_rejects_zero_response_timeout() {
        let result = RedisClient::with_config(
            "redis://localhost:6379/".to_string(),
            Some(Duration::ZERO),
            None,
        );
        assert!(matches!(
            result,
            Err(CustomRedisError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_zero_connection_timeout() {
        let result = RedisClient::with_config(
            "redis://localhost:6379/".to_string(),
            None,
            Some(Duration::ZERO),
        );
        assert!(matches!(
            result,
            Err(CustomRedisError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        assert!(RedisClient::new("not a redis url".to_string()).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        // Nothing listens on port 1; the connect attempt fails fast.
        let client = RedisClient::with_config(
            "redis://127.0.0.1:1/".to_string(),
            Some(Duration::from_millis(100)),
            Some(Duration::from_millis(200)),
        )
        .unwrap();

        let err = client.get("feature:any".to_string()).await.unwrap_err();
        assert!(err.is_unavailable(), "unexpected error: {err:?}");
    }

    /// Accepts connections and never writes a byte back.
    async fn silent_server() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_concurrent_commands_do_not_queue_behind_connect_attempts() {
        let addr = silent_server().await;
        let timeout = Duration::from_millis(300);
        let client = Arc::new(
            RedisClient::with_config(format!("redis://{addr}/"), Some(timeout), Some(timeout))
                .unwrap(),
        );

        let mut tasks = JoinSet::new();
        for i in 0..8 {
            let client = client.clone();
            tasks.spawn(async move {
                let started = std::time::Instant::now();
                let result = client.get(format!("feature:{i}")).await;
                (result, started.elapsed())
            });
        }

        let mut worst = Duration::ZERO;
        while let Some(joined) = tasks.join_next().await {
            let (result, elapsed) = joined.unwrap();
            assert!(result.unwrap_err().is_unavailable());
            worst = worst.max(elapsed);
        }
        // One bounded attempt each, not one after another.
        assert!(worst < timeout * 3, "slowest command took {worst:?}");
    }

    #[tokio::test]
    async fn test_failed_connect_backs_off() {
        let addr = silent_server().await;
        let timeout = Duration::from_millis(300);
        let client =
            RedisClient::with_config(format!("redis://{addr}/"), Some(timeout), Some(timeout))
                .unwrap()
                .with_reconnect_backoff(Duration::from_secs(30));

        assert!(client.get("feature:a".to_string()).await.is_err());

        let started = std::time::Instant::now();
        let err = client.get("feature:a".to_string()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
