use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sensorwatch::{RangeTable, Reading, Registry, Settings, SubscriptionEvent};

#[derive(Parser, Debug)]
#[command(name = "sensorwatch")]
#[command(about = "Watch a water-quality sensor feed and classify its readings")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database base URL (overrides the config file)
    #[arg(short, long)]
    url: Option<String>,

    /// Channel (database path) to watch (overrides the config file)
    #[arg(long)]
    channel: Option<String>,

    /// Read the channel once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref(), args.url.as_deref())
        .context("Failed to load configuration")?;
    if let Some(channel) = args.channel {
        settings.channel = channel;
    }

    let ranges = settings.range_table()?;
    let transport = settings
        .transport()
        .context("Failed to create database transport")?;
    let registry = Registry::new(Arc::new(transport));

    if args.once {
        return match registry.read_once(&settings.channel).await? {
            Some(reading) => {
                println!("{}", render_reading(&reading, &ranges));
                Ok(())
            }
            None => {
                warn!("'{}' holds no data", settings.channel);
                Ok(())
            }
        };
    }

    let (_handle, mut events) = registry.subscribe_stream(&settings.channel);
    info!("Watching '{}' (Ctrl-C to stop)", settings.channel);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(line) = render_event(event, &ranges) {
                        println!("{}", line);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    registry.cancel_all();
    Ok(())
}

/// Render a subscription event as an output line.
///
/// Errors are logged and produce no line; the watch keeps running.
fn render_event(event: SubscriptionEvent, ranges: &RangeTable) -> Option<String> {
    match event {
        SubscriptionEvent::Data(reading) => Some(render_reading(&reading, ranges).to_string()),
        SubscriptionEvent::Error(e) => {
            warn!("{}", e);
            None
        }
    }
}

/// A reading and its statuses as one JSON value
fn render_reading(reading: &Reading, ranges: &RangeTable) -> Value {
    let assessment = reading.assess(ranges);
    let timestamp = match reading.timestamp() {
        Ok(dt) => Value::String(dt.to_rfc3339()),
        Err(e) => {
            warn!("{}", e);
            Value::Null
        }
    };
    json!({
        "timestamp": timestamp,
        "overall": assessment.overall,
        "fields": assessment.statuses,
    })
}
