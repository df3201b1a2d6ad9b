/// Audit logging for node lifecycle events.
pub mod audit;
/// Layered configuration for nodes and telemetry.
pub mod config;
/// Telemetry setup for logging, tracing, and metrics.
pub mod telemetry;
