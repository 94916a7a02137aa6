//! CLI command definitions and dispatch for the `chron` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod groups;
pub mod import;
pub mod segment;
pub mod status;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use chronicle_types::config::SegmentationConfig;

/// Segment archived chat history into scenes.
#[derive(Parser)]
#[command(name = "chron", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import archived messages from a JSON Lines file.
    Import {
        /// File with one JSON message per line.
        file: PathBuf,
    },

    /// Assign unassigned messages to scenes.
    Segment(SegmentArgs),

    /// List the scenes of a server.
    #[command(alias = "ls")]
    Groups {
        /// Server to list scenes for.
        #[arg(long)]
        server: u64,
    },

    /// Show archive statistics and recent runs.
    Status {
        /// Number of recent runs to show.
        #[arg(long, default_value_t = 5)]
        runs: u32,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Target selection and per-invocation threshold overrides for `chron segment`.
#[derive(Args, Debug, Clone)]
pub struct SegmentArgs {
    /// Server to segment.
    #[arg(long, conflicts_with = "all", required_unless_present = "all")]
    pub server: Option<u64>,

    /// Segment every server that has unassigned messages.
    #[arg(long)]
    pub all: bool,

    /// Minutes after the window anchor at which a split is forced.
    #[arg(long)]
    pub force_interval: Option<i64>,

    /// Minutes after the window anchor at which a split happens when messages are waiting.
    #[arg(long)]
    pub with_backlog: Option<i64>,

    /// Scene size beyond which activity elsewhere forces a split.
    #[arg(long)]
    pub max_with_other: Option<u64>,

    /// Highest group id this run may allocate.
    #[arg(long)]
    pub group_limit: Option<u64>,
}

impl SegmentArgs {
    /// Apply command-line overrides on top of the file configuration.
    pub fn apply(&self, mut config: SegmentationConfig) -> SegmentationConfig {
        if let Some(minutes) = self.force_interval {
            config.force_interval_minutes = minutes;
        }
        if let Some(minutes) = self.with_backlog {
            config.with_backlog_interval_minutes = minutes;
        }
        if let Some(size) = self.max_with_other {
            config.max_with_other = size;
        }
        if let Some(limit) = self.group_limit {
            config.group_id_limit = Some(limit);
        }
        config
    }
}
