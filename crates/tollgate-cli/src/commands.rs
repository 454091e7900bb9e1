//! CLI command definitions.

use clap::Subcommand;
use tollgate_core::events::EventKind;

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter pipeline file
    Init {
        /// Where to write the pipeline
        #[arg(default_value = "tollgate.yaml")]
        path: String,
    },

    /// Validate a pipeline file
    Validate {
        /// Path to pipeline file (searched for when omitted)
        path: Option<String>,
    },

    /// Evaluate an event against the pipeline and run it on a match
    Run {
        /// Path to pipeline file (searched for when omitted)
        path: Option<String>,

        /// Event kind: push or pull-request
        #[arg(short, long, default_value = "push")]
        event: EventKind,

        /// Branch the event refers to (target branch for pull requests)
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Leave job workspaces on disk
        #[arg(long)]
        keep_workspaces: bool,
    },

    /// Print the JSON schema of the pipeline file
    Schema,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
