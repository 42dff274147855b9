//! # Bridge CLI

use crate::{config::BridgeConfig, spawn::try_spawn_with_args};
use clap::Parser;
use std::{path::PathBuf, time::Duration};
use tracing::info;

/// The bridge relay observes deposits, derives cross-chain settlement
/// obligations and reconciles or dispatches their payouts.
#[derive(Debug, Parser)]
#[command(author, about = "Bridge relay", long_about = None)]
pub struct Args {
    /// The configuration file.
    ///
    /// If missing, a default one will be used and stored in the working directory under
    /// `bridge.yaml`.
    #[arg(long, value_name = "CONFIG", env = "BRIDGE_CONFIG", default_value = "bridge.yaml")]
    pub config: PathBuf,
    /// The port to serve the metrics on.
    #[arg(long = "metrics-port", value_name = "PORT")]
    pub metrics_port: Option<u16>,
    /// The database URL.
    ///
    /// Falls back to volatile in-memory storage when unset.
    #[arg(long, value_name = "URL", env = "DATABASE_URL")]
    pub database_url: Option<String>,
    /// The private key payouts are signed with.
    #[arg(long, value_name = "SECRET_KEY", env = "BRIDGE_PAYOUT_KEY")]
    pub payout_key: Option<String>,
    /// The maximum number of obligations dispatched in one batch call.
    #[arg(long, value_name = "COUNT")]
    pub batch_size: Option<usize>,
    /// The timeout for one payout confirmation attempt.
    #[arg(long, value_name = "SECONDS", value_parser = parse_duration_secs)]
    pub confirmation_timeout: Option<Duration>,
}

impl Args {
    /// Runs the bridge until interrupted.
    pub async fn run(self) -> eyre::Result<()> {
        let mut handle = try_spawn_with_args(self).await?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = handle.events.recv() => match event {
                    Some(event) => info!(?event, "settlement event"),
                    None => break,
                },
            }
        }

        info!("shutting down");
        let _ = handle.shutdown.send(true);
        Ok(())
    }

    /// Merges [`Args`] values into an existing [`BridgeConfig`] instance.
    pub fn merge_bridge_config(self, config: BridgeConfig) -> BridgeConfig {
        config
            .with_database_url(self.database_url)
            .with_metrics_port(self.metrics_port)
            .with_payout_key(self.payout_key)
            .with_batch_size(self.batch_size)
            .with_confirmation_timeout(self.confirmation_timeout)
    }
}

/// Parses a string in seconds to a [`Duration`].
fn parse_duration_secs(arg: &str) -> Result<Duration, std::num::ParseIntError> {
    let seconds = arg.parse()?;
    Ok(Duration::from_secs(seconds))
}
