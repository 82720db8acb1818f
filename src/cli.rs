//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// graphsync - reconcile provider-discovered entities into a central graph
#[derive(Parser, Debug)]
#[command(name = "graphsync")]
#[command(version)]
#[command(about = "Reconcile entities and relations discovered by providers into a graph")]
pub struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Schedule every configured instance until Ctrl+C
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "graphsync.yaml")]
        config: PathBuf,
    },

    /// Run a single tick for every instance and print the reports
    Once {
        /// Path to the configuration file
        #[arg(short, long, default_value = "graphsync.yaml")]
        config: PathBuf,
    },

    /// List registered providers and whether they can run on this framework
    Providers {
        /// Print descriptors as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Check a configuration file without running anything
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "graphsync.yaml")]
        config: PathBuf,
    },
}
