use serde::Serialize;
use tracing::{info, info_span};

/// Lifecycle event of a node, recorded on the `audit` target.
/// Structured for JSON serialization to enable machine-readable audit trails.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A node bound its transport.
    NodeStarted {
        /// Node id.
        node_id: String,
        /// Endpoint announced to peers.
        endpoint: String,
    },
    /// A node shut down.
    NodeStopped {
        /// Why the node stopped.
        reason: String,
    },
    /// A service was advertised.
    ServiceAdvertised {
        /// Service name.
        service: String,
    },
    /// A service was withdrawn.
    ServiceWithdrawn {
        /// Service name.
        service: String,
    },
}

/// Logs an audit event to the dedicated audit channel as structured JSON.
/// This uses a specific `target` which can be filtered by the subscriber to redirect to a separate sink.
pub fn log_audit(event: &AuditEvent) {
    let span = info_span!(target: "audit", "audit_event");
    let _enter = span.enter();

    let json = serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    info!(target: "audit", audit_json = %json, "Lifecycle audit event");
}
