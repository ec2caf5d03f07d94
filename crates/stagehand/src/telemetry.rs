//! Logging and optional OpenTelemetry export for stagehand.
//!
//! Logs always go to stderr through `tracing_subscriber::fmt`. When an OTLP
//! endpoint is configured, spans and log records are exported there as well.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use stageconf::TelemetryConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Timeout for OTLP exports - prevents blocking on unavailable endpoints
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps the OTLP providers alive; flushes them when dropped.
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            let _ = provider.shutdown();
        }
        if let Some(provider) = self.logger_provider.take() {
            let _ = provider.shutdown();
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(otlp_endpoint) = config.otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(env_filter(&config.log_level))
            .with(fmt_layer)
            .try_init()
            .context("Failed to install tracing subscriber")?;
        return Ok(TelemetryGuard::default());
    };

    let resource = Resource::builder_empty()
        .with_service_name("stagehand")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let endpoint = if otlp_endpoint.starts_with("http") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{}", otlp_endpoint)
    };

    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP span exporter")?;

    let batch_span_processor =
        opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(batch_span_processor)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();

    let tracer = tracer_provider.tracer("stagehand");
    global::set_tracer_provider(tracer_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("Failed to create OTLP log exporter")?;

    let log_processor =
        opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build();

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(log_processor)
        .with_resource(resource)
        .build();

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let log_appender =
        opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(fmt_layer)
        .with(telemetry_layer)
        .with(log_appender)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(endpoint = %otlp_endpoint, "OpenTelemetry export enabled");

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        logger_provider: Some(logger_provider),
    })
}
