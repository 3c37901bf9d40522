//! Relay monitor - connect, send a ping, print every notification.
//!
//! Usage:
//!
//! ```text
//! cargo run --example relay_monitor -- <site-url> <plugin-id> [--debug]
//! ```
//!
//! Set `RUST_LOG` to override the log filter.

// ============================================================================
// Imports
// ============================================================================

use anyhow::{Context, bail};
use plugin_ws_relay::{ClientConfig, EventKind, Notification, RelayClient, WebSocketConnector};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

// ============================================================================
// Types
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    site_url: Url,
    plugin_id: String,
    debug: bool,
}

impl Args {
    /// Parse command-line arguments.
    fn parse() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();

        let [site_url, plugin_id] = positional.as_slice() else {
            bail!("usage: relay_monitor <site-url> <plugin-id> [--debug]");
        };

        Ok(Self {
            site_url: Url::parse(site_url).context("invalid site URL")?,
            plugin_id: (*plugin_id).clone(),
            debug: args.iter().any(|a| a == "--debug"),
        })
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Initialize tracing with the appropriate filter.
fn init_logging(debug: bool) {
    let default = if debug {
        "plugin_ws_relay=trace,relay_monitor=debug"
    } else {
        "plugin_ws_relay=info,relay_monitor=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;
    init_logging(args.debug);

    let config = ClientConfig::builder()
        .site_url(&args.site_url)
        .plugin_id(&args.plugin_id)
        .build()?;

    info!(url = %config.url, "Connecting");
    let client = RelayClient::connect(config, &WebSocketConnector::new());
    let mut notifications = client.notifications();

    let sender = client.clone();
    client.on(EventKind::Open, move |_: &Notification| {
        match sender.send("ping", Some(json!({"source": "relay_monitor"}))) {
            Ok(outcome) => info!(?outcome, "Ping queued"),
            Err(e) => warn!(error = %e, "Ping failed"),
        }
    });

    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
    let mut interrupted = false;

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(notification) = notification else { break };
                info!(?notification, "Notification");
                if let Notification::Close(code) = notification {
                    info!(?code, "Session closed");
                    break;
                }
            }

            _ = &mut shutdown, if !interrupted => {
                interrupted = true;
                info!("Interrupted, closing");
                client.close(None);
            }
        }
    }

    Ok(())
}
