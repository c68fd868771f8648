//! Command line client for Pandora Online

mod commands;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use pandora_cas::PandoraAccount;
use pandora_cas::constants::DEFAULT_EVENTS_LIMIT;
use tracing::debug;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "pandora", version, about = "Pandora Online car alarm client")]
pub struct Cli {
    /// Configuration file
    #[arg(
        short = 'c',
        long = "config",
        env = "PANDORA_CONFIG",
        default_value = "conf/pandora.yml"
    )]
    pub config: String,
    #[arg(short = 'u', long = "username")]
    pub username: Option<String>,
    #[arg(short = 'p', long = "password")]
    pub password: Option<String>,
    #[arg(long = "base-url")]
    pub base_url: Option<String>,
    #[arg(long = "language")]
    pub language: Option<String>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List devices bound to the account
    Devices,
    /// Print the current state of every device, or of one
    State { device: Option<u64> },
    /// Send a remote command by name (`lock`, `start_engine`) or numeric code
    Command {
        device: u64,
        command: String,
        /// Return once the command is sent instead of waiting for confirmation
        #[arg(long = "no-wait")]
        no_wait: bool,
    },
    /// Print recent events from the event feed
    Events {
        #[arg(long)]
        device: Option<u64>,
        /// Start of the range, unix seconds
        #[arg(long, default_value_t = 0)]
        from: i64,
        #[arg(long, default_value_t = DEFAULT_EVENTS_LIMIT)]
        limit: u32,
    },
    /// Ask a sleeping device to connect
    Wakeup { device: u64 },
    /// Print the points of a track
    Track { device: u64, track: u64 },
    /// Print push updates until interrupted
    Listen {
        /// Reconnect after errors instead of exiting
        #[arg(long = "auto-restart")]
        auto_restart: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = config::Configuration::load(&cli)?;
    logging::init_logging(&configuration.log_level())?;

    let client_config = configuration.to_client_config()?;
    debug!("Connecting to {}", client_config.base_url);

    let account = PandoraAccount::new(client_config)?;
    account.authenticate(None).await?;
    account.refresh_devices().await?;

    commands::run(&account, cli.command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_defaults() {
        let cli = Cli::parse_from(["pandora", "events"]);
        match cli.command {
            Command::Events {
                device,
                from,
                limit,
            } => {
                assert_eq!(device, None);
                assert_eq!(from, 0);
                assert_eq!(limit, DEFAULT_EVENTS_LIMIT);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
