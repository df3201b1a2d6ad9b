//! `replier`: advertises an echo service on a topic, optionally calls it
//! once, then serves requests until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use beacon_kernel::infrastructure::{config::Settings, telemetry::TelemetryBuilder};
use beacon_kernel::mesh::{Endpoint, Node, ValidationError};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

/// Advertise an echo service on a topic and serve requests for it.
#[derive(Parser, Debug)]
#[command(name = "replier", override_usage = "replier [options] <topic>")]
struct Cli {
    /// Enable verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Self-execute the advertised service call
    #[arg(short = 's', long = "self-call")]
    self_call: bool,

    /// Set the master endpoint
    #[arg(short, long, value_name = "ENDPOINT")]
    master: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Topic to advertise
    topic: String,
}

impl Cli {
    /// Master endpoint given on the command line; blank means none.
    fn master_endpoint(&self) -> Result<Option<Endpoint>, ValidationError> {
        match self.master.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(master) => Endpoint::new(master).map(Some),
        }
    }
}

/// Echoes the request payload back and prints it.
fn echo(topic: &str, data: &[u8]) -> (Vec<u8>, i32) {
    println!("\nCallback [{topic}][{}]", String::from_utf8_lossy(data));
    (data.to_vec(), 0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(-1);
        }
    };
    let master = match cli.master_endpoint() {
        Ok(master) => master,
        Err(e) => {
            eprintln!("error: invalid master endpoint: {e}");
            std::process::exit(-1);
        }
    };

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        settings.telemetry.log_level.clone()
    };
    let mut telemetry_builder = TelemetryBuilder::new(
        settings.telemetry.service_name.clone(),
        env!("CARGO_PKG_VERSION"),
    )
    .with_log_level(log_level)
    .with_log_format(settings.telemetry.log_format)
    .with_sampling_ratio(settings.telemetry.sampling_ratio);

    if let Some(ref endpoint) = settings.telemetry.otlp_endpoint {
        telemetry_builder = telemetry_builder.with_tracing(endpoint);
    }
    if let Some(ref address) = settings.telemetry.metrics_address {
        let address = address
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid metrics address '{address}'"))?;
        telemetry_builder = telemetry_builder.with_metrics(address);
    }
    let _telemetry = telemetry_builder
        .init()
        .context("Failed to initialize telemetry")?;

    let mut node_config = settings.node_config().context("Invalid node settings")?;
    if master.is_some() {
        node_config.master = master;
    }
    node_config.verbose |= cli.verbose;
    let timeout = node_config.request_timeout;

    let node = Node::bind(node_config).await.context("Failed to bind node")?;
    info!(endpoint = %node.endpoint(), role = ?node.role(), "Replier started");

    if let Err(e) = node.advertise(&cli.topic, echo) {
        println!("advertise did not work: {e}");
    }

    if cli.self_call {
        match node.request(&cli.topic, b"", timeout).await {
            Ok(reply) => println!("Response: {}", reply.payload_lossy()),
            Err(e) => println!("request did not work: {e}"),
        }
    }

    let event_loop = tokio::spawn({
        let node = node.clone();
        async move { node.spin().await }
    });

    shutdown_signal().await;

    info!("Shutdown signal received, cleaning up...");
    node.shutdown();
    event_loop.await.context("Event loop task failed")??;

    info!("Replier Shutdown Complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
