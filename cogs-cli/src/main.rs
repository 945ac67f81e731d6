//! Cogs pub/sub client entry point.
//!
//! ```text
//! cogs-pubsub --subscribe news                Print messages on `news` until Ctrl-C
//! cogs-pubsub --publish news hello --ack      Publish once, wait for the ack and exit
//! cogs-pubsub --config <path>                 Use custom config TOML
//! cogs-pubsub --gen-config                    Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cogs_cli::config::{CliConfig, ConfigError, LoggingConfig};
use cogs_core::{ClientEvent, CogsError, PubSubClient, WebSocketTransport};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "cogs-pubsub", about = "Cogs pub/sub command-line client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "cogs-pubsub.toml")]
    config: PathBuf,

    /// Service URL (overrides config).
    #[arg(short, long)]
    url: Option<String>,

    /// Session id to restore.
    #[arg(short, long)]
    session: Option<String>,

    /// Channel to subscribe to. May be repeated.
    #[arg(long = "subscribe", value_name = "CHANNEL")]
    subscribe: Vec<String>,

    /// Publish one message after connecting.
    #[arg(long, num_args = 2, value_names = ["CHANNEL", "MESSAGE"])]
    publish: Option<Vec<String>>,

    /// Wait for the service to acknowledge the publish.
    #[arg(long, requires = "publish")]
    ack: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&CliConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Logging comes up first so config problems are visible.
    let loaded = CliConfig::read(&cli.config);
    let level = match &loaded {
        Ok(config) => config.logging.level.clone(),
        Err(_) => LoggingConfig::default().level,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match loaded {
        Ok(config) => config,
        Err(e @ ConfigError::Missing(_)) => {
            info!("{e}; using defaults");
            CliConfig::default()
        }
        Err(e) => {
            warn!("{e}; using defaults");
            CliConfig::default()
        }
    };
    config.apply_env();
    if let Some(url) = &cli.url {
        config.connection.url = url.clone();
    }

    info!("cogs-pubsub v{}", env!("CARGO_PKG_VERSION"));

    let (client, mut events) = PubSubClient::with_limits(
        config.command_keys(),
        config.connection_options(),
        config.request_limits(),
        WebSocketTransport::new(),
    );
    client.connect(cli.session.clone())?;
    info!(url = %config.connection.url, "connecting");

    // Initial commands run once, after the first handshake. Without
    // subscriptions there is nothing to wait for afterwards.
    let mut started = false;
    let one_shot = cli.subscribe.is_empty();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                let ready = matches!(event, ClientEvent::NewSession(_) | ClientEvent::SessionRestored);
                if !report(event) {
                    break;
                }
                if ready && !started {
                    started = true;
                    tokio::spawn(run_commands(
                        client.clone(),
                        cli.subscribe.clone(),
                        cli.publish.clone(),
                        cli.ack,
                        one_shot,
                    ));
                }
            }
        }
    }

    client.close();
    Ok(())
}

/// Print one event. Returns `false` when the connection is gone for good.
fn report(event: ClientEvent) -> bool {
    match event {
        ClientEvent::NewSession(id) => println!("session: {id} (new)"),
        ClientEvent::SessionRestored => println!("session: restored"),
        ClientEvent::Message(m) => println!("[{}] {}: {}", m.time, m.channel, m.body),
        ClientEvent::RawRecord(raw) => println!("<< {raw}"),
        ClientEvent::ServiceError(e) => {
            warn!(code = e.code, seq = ?e.seq, "service error: {}", e.message)
        }
        ClientEvent::UnmatchedReply(r) => info!(seq = ?r.seq(), kind = r.kind(), "late reply"),
        ClientEvent::TransportError(e) => error!("transport: {e}"),
        ClientEvent::ConnectionClosed(None) => {
            println!("connection closed");
            return false;
        }
        ClientEvent::ConnectionClosed(Some(e)) => warn!("connection lost: {e}"),
    }
    true
}

async fn run_commands(
    client: PubSubClient,
    channels: Vec<String>,
    publish: Option<Vec<String>>,
    ack: bool,
    close_after: bool,
) {
    for channel in channels {
        match subscribe(&client, &channel).await {
            Ok(all) => println!("subscribed: {}", all.join(", ")),
            Err(e) => error!(%channel, "subscribe failed: {e}"),
        }
    }

    if let Some([channel, message]) = publish.and_then(|p| <[String; 2]>::try_from(p).ok()) {
        publish_one(&client, &channel, &message, ack).await;
    }
    if close_after {
        client.close();
    }
}

async fn publish_one(client: &PubSubClient, channel: &str, message: &str, ack: bool) {
    let outcome = if ack {
        match client.publish_with_ack(channel, message) {
            Ok(reply) => reply.await.map(|id| println!("published: {id}")),
            Err(e) => Err(e),
        }
    } else {
        client
            .publish(channel, message)
            .map(|seq| println!("published: seq {seq}"))
    };
    if let Err(e) = outcome {
        error!(%channel, "publish failed: {e}");
    }
}

async fn subscribe(client: &PubSubClient, channel: &str) -> Result<Vec<String>, CogsError> {
    client.subscribe(channel)?.await
}
