//! OpenTelemetry pipeline initialization.
//!
//! Builds the tracer provider from a [`GenAiConfig`]: trace resource,
//! probabilistic sampler, and (behind the `otlp` feature) an OTLP batch
//! exporter. Also installs a `tracing` subscriber so library logs and spans
//! flow through the same pipeline.

use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::{Config, RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::GenAiConfig;

/// Initialize the telemetry pipeline from the given configuration.
///
/// Installs the tracer provider globally (so instrumentors pick it up) and
/// registers a `tracing` subscriber with an OpenTelemetry layer and a
/// formatted log layer. Hold on to the returned provider and pass it to
/// [`shutdown_telemetry`] before process exit to flush pending spans.
///
/// # Errors
/// Returns an error when a subscriber is already installed or the OTLP
/// exporter cannot be constructed.
pub fn init_telemetry(config: &GenAiConfig) -> Result<TracerProvider, TracingError> {
    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let sampler = if config.sample_rate >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sample_rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sample_rate)
    };

    let tracer_config = Config::default()
        .with_sampler(sampler)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource);

    #[cfg_attr(not(feature = "otlp"), allow(unused_mut))]
    let mut builder = TracerProvider::builder().with_config(tracer_config);

    #[cfg(feature = "otlp")]
    {
        builder = builder.with_batch_exporter(
            build_otlp_exporter(config)?,
            opentelemetry_sdk::runtime::Tokio,
        );
    }

    let provider = builder.build();
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider.clone());

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let fmt_layer = fmt::layer().with_target(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(fmt_layer.with_filter(filter))
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        sample_rate = config.sample_rate,
        "telemetry initialized"
    );

    Ok(provider)
}

#[cfg(feature = "otlp")]
fn build_otlp_exporter(
    config: &GenAiConfig,
) -> Result<opentelemetry_otlp::SpanExporter, TracingError> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = if config.otlp_protocol.eq_ignore_ascii_case("grpc") {
        opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(config.otlp_endpoint.clone())
            .build_span_exporter()
    } else {
        opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(config.otlp_endpoint.clone())
            .build_span_exporter()
    };
    exporter.map_err(|e| TracingError::OtlpConfig(e.to_string()))
}

/// Flush pending spans and tear down the global tracer provider.
pub fn shutdown_telemetry(provider: TracerProvider) {
    for result in provider.force_flush() {
        if let Err(err) = result {
            tracing::warn!(error = %err, "span flush failed during shutdown");
        }
    }
    global::shutdown_tracer_provider();
    info!("telemetry shutdown complete");
}

/// Telemetry pipeline initialization error
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// Failed to install the subscriber
    #[error("failed to initialize telemetry: {0}")]
    Init(String),
    /// OTLP exporter configuration error
    #[error("OTLP configuration error: {0}")]
    OtlpConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_selection_bounds() {
        // The sampler mapping is pure on sample_rate; exercise all branches
        // through config values the initializer would see.
        let on = GenAiConfig::default().with_sample_rate(1.0);
        assert!(on.sample_rate >= 1.0);

        let off = GenAiConfig::default().with_sample_rate(0.0);
        assert!(off.sample_rate <= 0.0);

        let ratio = GenAiConfig::default().with_sample_rate(0.25);
        assert!(ratio.sample_rate > 0.0 && ratio.sample_rate < 1.0);
    }

    #[test]
    fn test_double_init_fails() {
        let config = GenAiConfig::default();
        let first = init_telemetry(&config);
        let second = init_telemetry(&config);
        // Whichever call came second (or a subscriber from another test)
        // must fail cleanly rather than panic.
        assert!(first.is_err() || second.is_err());
        if let Ok(provider) = first {
            shutdown_telemetry(provider);
        }
    }
}
