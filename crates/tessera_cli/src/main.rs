//! tessera CLI
//!
//! Command-line tools for exercising the tessera transaction manager.
//!
//! # Commands
//!
//! - `stress` - Run concurrent transfers and print manager statistics
//! - `timeline` - Replay a two-reader snapshot timeline and print each version
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use tessera_core::IsolationLevel;
use tracing_subscriber::EnvFilter;

/// tessera command-line tools.
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Isolation level selectable from the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Isolation {
    /// Optimistic concurrency control
    Basic,
    /// Optimistic concurrency control with commit dependencies
    Dependency,
}

impl From<Isolation> for IsolationLevel {
    fn from(isolation: Isolation) -> Self {
        match isolation {
            Isolation::Basic => Self::BasicOptimistic,
            Isolation::Dependency => Self::OptimisticWithDependencyTracking,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent transfers and print manager statistics
    Stress {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Number of rows
        #[arg(short, long, default_value = "1000")]
        rows: u64,

        /// Number of transfers
        #[arg(short, long, default_value = "10000")]
        ops: usize,

        /// Isolation level
        #[arg(short, long, value_enum, default_value = "basic")]
        isolation: Isolation,

        /// Disable the background garbage collector
        #[arg(long)]
        no_gc: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay a two-reader snapshot timeline and print each version
    Timeline,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Stress {
            threads,
            rows,
            ops,
            isolation,
            no_gc,
            format,
        } => {
            let options = commands::stress::StressOptions {
                threads,
                rows,
                operations: ops,
                isolation: isolation.into(),
                background_gc: !no_gc,
            };
            commands::stress::run(&options, &format)?;
        }
        Commands::Timeline => {
            commands::timeline::run()?;
        }
        Commands::Version => {
            println!("tessera CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("tessera core v{}", tessera_core::VERSION);
        }
    }

    Ok(())
}
