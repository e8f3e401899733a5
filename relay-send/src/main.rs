//! relay-send - Background daemon for scheduled publishing
//!
//! Hosts the Relaycast scheduler loop: polls the in-memory queue and
//! delivers due posts to their platforms with the engine's rate limiting
//! and failure recovery.

use clap::Parser;
use librelaycast::{EngineConfig, PublisherClient, Result, Scheduler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "relay-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled publishing")]
#[command(long_about = "\
relay-send - Background daemon for scheduled publishing

DESCRIPTION:
    relay-send runs the Relaycast scheduler loop. It polls the scheduled
    post queue at regular intervals, delivers due posts through the
    publishing engine (validation, formatting, rate limiting, retries,
    circuit breaking), and reschedules or fails posts per the retry policy.

    The queue is in-memory: pending scheduled posts are lost on restart.

USAGE:
    # Run in foreground (logs to stderr)
    relay-send

    # Run with custom poll interval
    relay-send --poll-interval 30

    # Process due posts once and exit
    relay-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes in-flight dispatches)

CONFIGURATION:
    Configuration file: ~/.config/relaycast/config.toml
    Override with RELAYCAST_CONFIG.

    Logging: RELAYCAST_LOG_FORMAT (text|json|pretty), RELAYCAST_LOG_LEVEL.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to scan for due posts (default: from config)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run once and exit (for testing)
    #[arg(long, hide = true)]
    #[arg(help = "Process due posts once and exit")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        librelaycast::logging::init(librelaycast::logging::LogFormat::Text, "debug", true);
    } else {
        librelaycast::logging::init_default();
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = EngineConfig::load()?;
    if let Some(interval) = cli.poll_interval {
        config.scheduler.poll_interval_secs = interval;
    }

    info!("relay-send daemon starting");
    info!("Poll interval: {}s", config.scheduler.poll_interval_secs);

    let mut publisher = PublisherClient::new(config);
    publisher.register_http_platforms()?;
    let publisher = Arc::new(publisher);

    for (platform, ok) in publisher.verify_platforms().await {
        if ok {
            info!(platform = platform.as_str(), "credentials verified");
        } else {
            warn!(
                platform = platform.as_str(),
                "credential check failed, deliveries will likely be rejected"
            );
        }
    }

    let scheduler = Scheduler::new(Arc::clone(&publisher));

    if cli.once {
        scheduler.run_once().await;
        info!("relay-send: processed due posts once, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    scheduler.run(shutdown).await;

    info!("relay-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        librelaycast::EngineError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}
