//! peer-room-sim: Runs a set of in-process peers in one room and logs
//! membership as they discover each other, churn and expire.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use peer_room_sim::settings::save_room_config;
use peer_room_sim::{SimSettings, Simulation};

#[derive(Parser, Debug)]
#[command(name = "peer-room-sim")]
#[command(about = "Simulate peers discovering each other in a PeerRoom")]
struct Args {
    /// Number of simulated peers
    #[arg(short, long, default_value_t = 3)]
    peers: usize,

    /// Topic shared by every peer (overrides the config file)
    #[arg(short, long)]
    topic: Option<String>,

    /// Heartbeat interval in milliseconds (overrides the config file)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Heartbeat expiration in milliseconds (overrides the config file)
    #[arg(long)]
    expiration_ms: Option<u64>,

    /// How long to run; 0 runs until Ctrl+C
    #[arg(short, long, default_value_t = 0)]
    duration_secs: u64,

    /// Make the last peer leave after this many seconds
    #[arg(long)]
    churn_after_secs: Option<u64>,

    /// JSON room configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective room configuration to this JSON file
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Encrypt all traffic with this shared password
    #[arg(long)]
    password: Option<String>,

    /// Print final membership snapshots as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    fn into_settings(self) -> Result<SimSettings> {
        let mut settings = SimSettings::load(self.config.as_deref())?;
        settings.peers = self.peers;
        if let Some(topic) = self.topic {
            settings.room.topic = topic;
        }
        if let Some(ms) = self.interval_ms {
            settings.room.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.expiration_ms {
            settings.room.heartbeat_expiration = Duration::from_millis(ms);
        }
        settings.password = self.password;
        settings.churn_after = self.churn_after_secs.map(Duration::from_secs);
        settings.duration = (self.duration_secs > 0).then(|| Duration::from_secs(self.duration_secs));
        Ok(settings)
    }
}

/// Sleep for `duration`, or forever if there is none.
async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => futures::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,peer_room=debug,peer_room_sim=debug"
    } else {
        "info,peer_room=info,peer_room_sim=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let json = args.json;
    let save_config = args.save_config.clone();
    let settings = args.into_settings()?;

    if let Some(path) = &save_config {
        settings.validate()?;
        save_room_config(path, &settings.room)?;
        info!("Saved room configuration to {:?}", path);
    }

    info!("Starting peer-room-sim");
    info!("Topic: {}", settings.room.topic);
    info!(
        "Heartbeat every {:?}, expiring after {:?}",
        settings.room.heartbeat_interval, settings.room.heartbeat_expiration
    );
    if settings.room.heartbeat_interval >= settings.room.heartbeat_expiration {
        warn!("Heartbeat interval is not shorter than expiration; peers will flap");
    }

    let sim = Simulation::start(&settings).await?;

    match settings.duration {
        Some(duration) => info!("Running for {:?}", duration),
        None => info!("Running. Press Ctrl+C to stop."),
    }

    let mut status = tokio::time::interval(settings.room.heartbeat_expiration);
    status.tick().await;

    let end = sleep_or_pending(settings.duration);
    tokio::pin!(end);
    let churn = sleep_or_pending(settings.churn_after);
    tokio::pin!(churn);
    let mut churned = false;

    // Main event loop
    loop {
        tokio::select! {
            _ = status.tick() => {
                sim.log_membership();
            }

            _ = &mut churn, if !churned => {
                churned = true;
                if sim.churn().is_none() {
                    warn!("No active peer left to churn");
                }
            }

            _ = &mut end => {
                info!("Duration elapsed");
                break;
            }

            // Handle graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    sim.log_membership();
    if json {
        println!("{}", serde_json::to_string_pretty(&sim.snapshots())?);
    }
    sim.shutdown();
    Ok(())
}
