//! catsync CLI
//!
//! Command-line driver for the catsync engine.
//!
//! # Commands
//!
//! - `simulate` - Run the engine against a simulated platform
//! - `config` - Print the default engine configuration
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::platform::PlatformProfile;
use commands::simulate::SimulateOptions;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// catsync command-line tools.
#[derive(Parser)]
#[command(name = "catsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against a simulated platform
    Simulate {
        /// Number of operations to enqueue
        #[arg(short = 'n', long, default_value = "500")]
        operations: usize,

        /// Products seeded on the platform
        #[arg(long, default_value = "200")]
        catalog: usize,

        /// Make every n-th operation critical (0 disables)
        #[arg(long, default_value = "25")]
        critical_every: usize,

        /// Minimum worker count
        #[arg(long, default_value = "2")]
        min_workers: usize,

        /// Maximum worker count
        #[arg(long, default_value = "8")]
        max_workers: usize,

        /// Batch size (0 disables batching)
        #[arg(short, long, default_value = "50")]
        batch_size: usize,

        /// Retries per operation
        #[arg(long, default_value = "3")]
        max_retries: u32,

        /// Chance of a transient platform failure
        #[arg(long, default_value = "0.05")]
        failure_rate: f64,

        /// Chance of a rate-limit response
        #[arg(long, default_value = "0.01")]
        rate_limit_rate: f64,

        /// Minimum call latency in milliseconds
        #[arg(long, default_value = "5")]
        latency_min: u64,

        /// Maximum call latency in milliseconds
        #[arg(long, default_value = "25")]
        latency_max: u64,

        /// Simulate a platform without bulk endpoints
        #[arg(long)]
        no_bulk: bool,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Seconds to wait for the queue to drain
        #[arg(short, long, default_value = "120")]
        timeout: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the default engine configuration
    Config {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Simulate {
            operations,
            catalog,
            critical_every,
            min_workers,
            max_workers,
            batch_size,
            max_retries,
            failure_rate,
            rate_limit_rate,
            latency_min,
            latency_max,
            no_bulk,
            seed,
            timeout,
            format,
        } => {
            for (name, rate) in [("failure-rate", failure_rate), ("rate-limit-rate", rate_limit_rate)] {
                if !(0.0..=1.0).contains(&rate) {
                    return Err(format!("--{name} must be between 0 and 1").into());
                }
            }
            if latency_min > latency_max {
                return Err("--latency-min exceeds --latency-max".into());
            }

            let options = SimulateOptions {
                operations,
                catalog_size: catalog,
                critical_every,
                min_workers,
                max_workers,
                batch_size,
                max_retries,
                profile: PlatformProfile {
                    failure_rate,
                    rate_limit_rate,
                    latency_ms: latency_min..=latency_max,
                    supports_bulk: !no_bulk,
                },
                seed,
                timeout: Duration::from_secs(timeout),
                report_every: Duration::from_secs(1),
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Config { format } => {
            commands::config::run(&format)?;
        }
        Commands::Version => {
            println!("catsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("catsync engine v{}", catsync_engine::VERSION);
        }
    }

    Ok(())
}
