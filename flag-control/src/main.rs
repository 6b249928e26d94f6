use std::time::Duration;

use anyhow::Context;
use envconfig::Envconfig;
use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use flag_control::config::Config;
use flag_control::server::serve;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    let signal = tokio::select! {
        _ = term.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    };
    tracing::info!(signal, "Shutting down gracefully...");
}

/// Human-readable spans in development, one JSON object per line otherwise.
fn stdout_layer(debug: bool) -> BoxedLayer {
    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    if debug {
        base.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_ansi(true)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        base.json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    }
}

fn otlp_tracer(config: &Config, endpoint: &str) -> anyhow::Result<Tracer> {
    let trace_config = opentelemetry_sdk::trace::Config::default()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            config.otel_sampling_rate,
        ))))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            Value::from(config.otel_service_name.clone()),
        )]));

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otel_export_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(trace_config)
        .with_batch_config(BatchConfig::default())
        .with_exporter(exporter)
        .install_batch(runtime::Tokio)
        .context("Failed to initialize OpenTelemetry tracer")
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    let mut layers = vec![stdout_layer(*config.debug)];

    if let Some(endpoint) = config.otel_url.as_deref() {
        let tracer = otlp_tracer(config, endpoint)?;
        layers.push(
            OpenTelemetryLayer::new(tracer)
                .with_filter(LevelFilter::from_level(config.otel_log_level))
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("Invalid configuration")?;
    init_tracing(&config)?;

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .with_context(|| format!("could not bind {}", config.address))?;
    tracing::info!(
        address = %config.address,
        namespace = %config.flag_namespace,
        public_reads = *config.public_reads,
        admins = config.admin_api_keys.0.len(),
        "Starting flag control service"
    );

    serve(config, listener, shutdown()).await;

    tracing::info!("Server stopped");
    Ok(())
}
