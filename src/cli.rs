//! CLI definitions for labfeed.

use clap::{Parser, Subcommand};

/// labfeed CLI.
#[derive(Parser)]
#[command(name = "labfeed")]
#[command(about = "Real-time clinical event feed")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (defaults to the per-user config file)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Broadcast application key, overrides the config file
    #[arg(long, env = "LABFEED_APP_KEY", global = true, hide_env_values = true)]
    pub app_key: Option<String>,

    /// Broadcast cluster, overrides the config file
    #[arg(long, env = "LABFEED_CLUSTER", global = true)]
    pub cluster: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Subscribe to channels and log every validated result
    Watch {
        /// Channel key, e.g. `visit:42` (repeatable)
        #[arg(long = "channel", required = true)]
        channels: Vec<String>,
    },

    /// Load and validate the configuration
    CheckConfig,
}
