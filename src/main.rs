//! MetaTrader Trade Copier
//!
//! Watches a master account's open positions and mirrors every change
//! onto a set of replica accounts, with per-account position sizing.

mod config;
mod copier;
mod gateway;
mod models;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::copier::{Copier, Replica};
use crate::gateway::{BridgeGateway, Gateway, GatewaySession, SimGateway};

/// Trade copier CLI.
#[derive(Parser)]
#[command(name = "trade-copier")]
#[command(about = "Mirror trades from a master account onto replica accounts", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/accounts.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the copy loop
    Run {
        /// Dry run (replica orders go to a simulator, not the venue)
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the config file, then try to reach every account once
    Check,

    /// List configured accounts
    Accounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    // Setup logging; an explicit flag beats the config file
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.settings.log_level);
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { dry_run } => {
            info!(
                config = %cli.config.display(),
                dry_run = dry_run,
                "Starting trade copier"
            );

            // One HTTP client serves the master and every live replica
            let bridge: Arc<dyn Gateway> = Arc::new(BridgeGateway::new());
            let replica_gateway: Arc<dyn Gateway> = if dry_run {
                Arc::new(SimGateway::new())
            } else {
                Arc::clone(&bridge)
            };

            let replicas: Vec<Replica> = config
                .enabled_replicas()
                .map(|profile| Replica {
                    profile: profile.clone(),
                    gateway: Arc::clone(&replica_gateway),
                })
                .collect();

            println!("\n=== MetaTrader Trade Copier ===");
            println!(
                "Master account: {} on {}",
                config.master.login, config.master.server
            );
            println!("Replica accounts: {}", replicas.len());
            println!("Poll interval: {}ms", config.settings.poll_interval_ms);
            println!(
                "Mode: {}",
                if dry_run {
                    "DRY RUN (replica orders simulated)"
                } else {
                    "LIVE COPYING"
                }
            );
            println!("\nPress Ctrl+C to stop.\n");

            let mut copier = Copier::new(
                config.master.clone(),
                bridge,
                replicas,
                config.settings.clone(),
            );

            if let Err(e) = copier.run().await {
                tracing::error!(error = %e, "Copier error");
            }

            // Show final stats
            println!("\n{}", copier.stats());
        }

        Commands::Check => {
            // Load already parsed the file, validated it, and resolved
            // every credential, so reaching this point is the verdict
            println!("Config OK: {}", cli.config.display());

            println!("\n=== Accounts ===");
            println!(
                "Master:   {} on {}",
                config.master.login, config.master.server
            );
            println!(
                "Replicas: {} configured, {} enabled",
                config.replicas.len(),
                config.enabled_replicas().count()
            );

            let s = &config.settings;
            println!("\n=== Settings ===");
            println!("Poll Interval:    {}ms", s.poll_interval_ms);
            println!("Copy Stop Loss:   {}", s.copy_stop_loss);
            println!("Copy Take Profit: {}", s.copy_take_profit);
            println!("Max Retries:      {}", s.max_retries);
            println!("Retry Delay:      {}ms", s.retry_delay_ms);
            println!("Connect Timeout:  {}ms", s.connect_timeout_ms);

            if s.copy_pending_orders {
                println!("\nNote: copy_pending_orders is set, but only open market positions are copied.");
            }

            // Probe every account once so credential and bridge problems
            // surface here instead of mid-run
            let gateway = BridgeGateway::new();
            let timeout = s.connect_timeout();
            let mut unreachable = 0;

            println!("\n=== Connectivity ===");
            for profile in std::iter::once(&config.master).chain(config.enabled_replicas()) {
                match gateway.connect(profile, timeout).await {
                    Ok(mut session) => {
                        session.disconnect().await;
                        println!("{:<14} {:>10}  OK", profile.name, profile.login);
                    }
                    Err(e) => {
                        unreachable += 1;
                        println!("{:<14} {:>10}  FAILED: {}", profile.name, profile.login, e);
                    }
                }
            }

            if unreachable > 0 {
                bail!("{} account(s) unreachable", unreachable);
            }
        }

        Commands::Accounts => {
            println!(
                "\n{:<14} {:>10} {:<22} {:<20} {:<8}",
                "NAME", "LOGIN", "SERVER", "SIZING", "ENABLED"
            );
            println!("{}", "-".repeat(78));

            println!(
                "{:<14} {:>10} {:<22} {:<20} {:<8}",
                truncate(&config.master.name, 12),
                config.master.login,
                truncate(&config.master.server, 20),
                "(master)",
                "yes"
            );

            for replica in &config.replicas {
                println!(
                    "{:<14} {:>10} {:<22} {:<20} {:<8}",
                    truncate(&replica.name, 12),
                    replica.login,
                    truncate(&replica.server, 20),
                    replica.sizing_label(),
                    if replica.enabled { "yes" } else { "no" }
                );
            }
        }
    }

    Ok(())
}

/// Truncate a string with ellipsis if too long. Counts chars, not bytes,
/// so multi-byte account and server names never split mid-character.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_strings_unchanged() {
        assert_eq!(truncate("master", 12), "master");
        assert_eq!(truncate("", 12), "");
    }

    #[test]
    fn test_truncate_long_strings_get_ellipsis() {
        assert_eq!(truncate("a-very-long-account-name", 12), "a-very-lo...");
    }

    #[test]
    fn test_truncate_multibyte_names() {
        // Accented names are longer in bytes than in chars; the cut must
        // land on a character, never inside one
        assert_eq!(truncate("ééééééé", 12), "ééééééé");
        assert_eq!(truncate("éééééééééééééé", 12), "ééééééééé...");
        assert_eq!(truncate("Bröker-Demo-Sérver-Läng", 12), "Bröker-De...");
    }
}
