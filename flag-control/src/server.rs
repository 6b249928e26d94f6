use std::future::Future;
use std::sync::Arc;

use common_redis::RedisClient;
use tokio::net::TcpListener;

use crate::api::auth::StaticAdminDirectory;
use crate::audit::LogAuditSink;
use crate::config::Config;
use crate::router;

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    // Does not connect yet, so the service comes up (and serves fallback reads)
    // even while redis is down.
    let redis_client = match RedisClient::with_config(
        config.redis_url.clone(),
        config.redis_response_timeout(),
        config.redis_connection_timeout(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(
                "Failed to create Redis client for URL {}: {}",
                config.redis_url,
                e
            );
            return;
        }
    };

    let admin_directory = Arc::new(StaticAdminDirectory::new(config.admin_api_keys.clone()));
    if config.admin_api_keys.0.is_empty() {
        tracing::warn!("No admin API keys configured, every admin request will be rejected");
    }

    let app = router::router(redis_client, admin_directory, Arc::new(LogAuditSink), config);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {:?}", addr),
        Err(e) => tracing::warn!("listening on unknown address: {}", e),
    }

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("Server error: {}", e);
    }
}
