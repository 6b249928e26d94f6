use std::{future::ready, sync::Arc};

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use common_redis::Client as RedisClient;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    api::{
        admin_rate_limiter::{QuotaConfig, QuotaTracker},
        auth::AdminDirectory,
        endpoint,
        pipeline::RequestPipeline,
    },
    audit::AuditSink,
    config::Config,
    flags::{fallback_cache::FallbackCache, flag_service::FlagService},
    metrics::utils::{setup_metrics_recorder, track_metrics},
};

#[derive(Clone)]
pub struct State {
    pub flags: FlagService,
    pub admin_pipeline: RequestPipeline,
    pub public_reads: bool,
}

pub fn router(
    redis_client: Arc<dyn RedisClient + Send + Sync>,
    admin_directory: Arc<dyn AdminDirectory>,
    audit_sink: Arc<dyn AuditSink>,
    config: Config,
) -> Router {
    let flags = FlagService::new(
        redis_client.clone(),
        FallbackCache::new(),
        audit_sink,
        config.flag_namespace.clone(),
        config.flag_scan_batch_size,
    );

    // The quota counters live in the same store as the flags.
    let quota_tracker = QuotaTracker::new(
        redis_client,
        QuotaConfig::from_config(&config),
        config.admin_rate_limit_key_prefix.clone(),
    );
    let admin_pipeline = RequestPipeline::admin(
        admin_directory,
        quota_tracker,
        config.admin_rate_limit_subject,
    );

    let state = State {
        flags,
        admin_pipeline,
        public_reads: *config.public_reads,
    };

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
            Method::HEAD,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let status_router = Router::new().route("/", get(index));

    let flags_router = Router::new()
        .route("/feature/status/:name", get(endpoint::feature_status))
        .route("/features", get(endpoint::list_features))
        .route(
            "/feature/:name",
            post(endpoint::create_feature)
                .patch(endpoint::update_feature)
                .delete(endpoint::delete_feature),
        )
        .route("/feature/:name/restore", post(endpoint::restore_feature))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrency));

    let router = Router::new()
        .merge(status_router)
        .merge(flags_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Global metrics recorders can play poorly with e.g. tests
    if !config.enable_metrics {
        return router;
    }

    match setup_metrics_recorder() {
        Ok(recorder_handle) => router.route("/metrics", get(move || ready(recorder_handle.render()))),
        Err(e) => {
            tracing::error!("Failed to install metrics recorder: {}", e);
            router
        }
    }
}

pub async fn index() -> &'static str {
    "Feature Flag service running"
}
