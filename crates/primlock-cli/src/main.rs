//! Primlock CLI
//!
//! Drives the lock manager through contention and deadlock scenarios.
//!
//! Logging goes through `tracing`; the filter comes from `--log`, then
//! `PRIMLOCK_LOG`, then defaults to `info`.

mod commands;

use clap::{Parser, Subcommand};
use commands::{contend, deadlock};
use primlock_core::{LockManager, ManagerOptions};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "primlock")]
#[command(about = "Named shared/exclusive lock manager playground", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (overrides PRIMLOCK_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    /// Let untimed requests wait on wait-for cycles instead of refusing them
    #[arg(long, global = true)]
    no_deadlock_detection: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hammer one lock from many threads
    Contend {
        /// Worker threads
        #[arg(short, long, default_value_t = num_cpus::get())]
        threads: usize,
        /// Requests per thread
        #[arg(short, long, default_value_t = 1000)]
        iterations: usize,
        /// Fraction of requests that ask for shared access
        #[arg(long, default_value_t = 0.75, value_parser = parse_ratio)]
        shared_ratio: f64,
        /// Ranks are drawn from 0..=max_rank
        #[arg(long, default_value_t = 3)]
        max_rank: i32,
        /// Per-request timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Have readers try to upgrade before unlocking
        #[arg(long)]
        upgrade: bool,
        /// Seed for the request mix
        #[arg(long)]
        seed: Option<u64>,
        /// Print the report and final snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the two-lock cycle and report which session is refused
    Deadlock {
        /// Timeout used for the closing request when detection is off
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,
    },
}

fn parse_ratio(value: &str) -> Result<f64, String> {
    let ratio: f64 = value.parse().map_err(|err| format!("{err}"))?;
    if (0.0..=1.0).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(format!("{value} is not a ratio between 0 and 1"))
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_env("PRIMLOCK_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let options = ManagerOptions::default().with_deadlock_detection(!cli.no_deadlock_detection);
    let manager = LockManager::new(options);

    match cli.command {
        Commands::Contend {
            threads,
            iterations,
            shared_ratio,
            max_rank,
            timeout_ms,
            upgrade,
            seed,
            json,
        } => {
            let options = contend::ContendOptions {
                threads,
                iterations,
                shared_ratio,
                max_rank,
                timeout: timeout_ms.map(Duration::from_millis),
                upgrade,
                seed,
            };
            contend::execute(&manager, &options, json)?;
        }

        Commands::Deadlock { timeout_ms } => {
            deadlock::execute(&manager, Duration::from_millis(timeout_ms))?;
        }
    }

    manager.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ratio_rejects_non_finite_and_out_of_range() {
        assert_eq!(parse_ratio("0.25"), Ok(0.25));
        assert_eq!(parse_ratio("1"), Ok(1.0));
        assert!(parse_ratio("NaN").is_err());
        assert!(parse_ratio("inf").is_err());
        assert!(parse_ratio("-0.1").is_err());
        assert!(parse_ratio("1.5").is_err());
        assert!(parse_ratio("half").is_err());
    }

    #[test]
    fn test_cli_rejects_nan_shared_ratio() {
        let parsed = Cli::try_parse_from(["primlock", "contend", "--shared-ratio", "NaN"]);
        assert!(parsed.is_err());
    }
}
