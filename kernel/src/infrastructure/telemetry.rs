use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{Sampler, SdkTracerProvider},
    Resource,
};
use opentelemetry_semantic_conventions::resource;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use super::config::LogFormat;

/// Keeps exporters alive; flushes pending spans when dropped.
#[must_use = "dropping the guard shuts the trace exporter down"]
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shut down trace exporter: {e}");
            }
        }
    }
}

/// Builder for setting up telemetry (Logging, Tracing, Metrics).
pub struct TelemetryBuilder {
    service_name: String,
    service_version: String,
    otlp_endpoint: Option<String>,
    metrics_address: Option<SocketAddr>,
    log_level: String,
    log_format: LogFormat,
    sampling_ratio: f64,
}

impl TelemetryBuilder {
    /// Creates a builder that logs at `info` in human readable form.
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            otlp_endpoint: None,
            metrics_address: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            sampling_ratio: 1.0,
        }
    }

    /// Exports spans to an OTLP collector.
    #[must_use]
    pub fn with_tracing(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Serves Prometheus metrics on `address`.
    #[must_use]
    pub fn with_metrics(mut self, address: SocketAddr) -> Self {
        self.metrics_address = Some(address);
        self
    }

    /// Sets the filter used when `RUST_LOG` is unset.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Selects JSON or human readable log lines.
    #[must_use]
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Sets the trace sampling ratio.
    #[must_use]
    pub fn with_sampling_ratio(mut self, ratio: f64) -> Self {
        self.sampling_ratio = ratio;
        self
    }

    /// Initializes the telemetry system with configured exporters.
    ///
    /// Must run inside a Tokio runtime when exporters are enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The OTLP span exporter cannot be built
    /// - The Prometheus listener cannot be installed
    /// - The tracing subscriber cannot be initialized
    pub fn init(self) -> Result<TelemetryGuard> {
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        let fmt_layer = match self.log_format {
            LogFormat::Json => fmt::layer().json().with_span_events(FmtSpan::CLOSE).boxed(),
            LogFormat::Pretty => fmt::layer().with_target(false).boxed(),
        };

        let registry = Registry::default().with(env_filter).with(fmt_layer);

        if let Some(address) = self.metrics_address {
            PrometheusBuilder::new()
                .with_http_listener(address)
                .install()
                .context("Failed to install Prometheus exporter")?;
        }

        let mut guard = TelemetryGuard { provider: None };

        if let Some(endpoint) = self.otlp_endpoint {
            let resource = Resource::builder()
                .with_attributes(vec![
                    opentelemetry::KeyValue::new(resource::SERVICE_NAME, self.service_name.clone()),
                    opentelemetry::KeyValue::new(
                        resource::SERVICE_VERSION,
                        self.service_version.clone(),
                    ),
                ])
                .build();

            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
                .context("Failed to build OTLP span exporter")?;

            let processor = opentelemetry_sdk::trace::BatchSpanProcessor::builder(exporter).build();

            let provider = SdkTracerProvider::builder()
                .with_span_processor(processor)
                .with_resource(resource)
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    self.sampling_ratio,
                ))))
                .build();

            opentelemetry::global::set_tracer_provider(provider.clone());
            let tracer = provider.tracer("beacon-kernel");
            guard.provider = Some(provider);

            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .context("Failed to init subscriber")?;
        } else {
            registry.try_init().context("Failed to init subscriber")?;
        }

        Ok(guard)
    }
}
