//! Telemetry configuration.
//!
//! This module defines log output, OpenTelemetry and metrics settings.

use serde::Deserialize;

/// Output format of the log subscriber.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Telemetry configuration settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    /// Service name for telemetry.
    pub service_name: String,
    /// OTLP endpoint for traces.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Sampling ratio for traces.
    #[serde(default = "default_sampling")]
    pub sampling_ratio: f64,
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Address of the Prometheus scrape listener, if any.
    #[serde(default)]
    pub metrics_address: Option<String>,
}

fn default_sampling() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".into()
}
