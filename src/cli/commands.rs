//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - process / review / run-cycle: drive cycles
//! - status / list: inspect stored cycles
//! - cancel / close: operator aborts
//! - config: show the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cyclr - drive issues from code generation to merge
#[derive(Parser, Debug)]
#[command(name = "cyclr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate code for an issue and open its pull request
    Process {
        /// Issue identifier
        issue: String,

        /// Issue title
        #[arg(short, long)]
        title: String,

        /// Issue description
        #[arg(short, long, default_value = "")]
        body: String,

        /// Iteration ceiling for the cycle (1-10)
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,
    },

    /// Run CI and review on an existing cycle, without looping back
    Review {
        /// Issue identifier
        issue: String,
    },

    /// Drive one or more issues to a verdict
    RunCycle {
        /// Issue identifiers
        #[arg(required = true)]
        issues: Vec<String>,

        /// Iteration ceiling per cycle (1-10)
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,

        /// Seconds to wait before re-polling pending CI or review
        #[arg(short, long)]
        wait_ci: Option<u64>,
    },

    /// Show the state of a cycle
    Status {
        /// Issue identifier
        issue: String,

        /// Show the full history
        #[arg(short, long)]
        detailed: bool,
    },

    /// List stored cycles
    List {
        /// Filter by state (opened, ci_failed, merged, ...)
        #[arg(short, long)]
        state: Option<String>,

        /// Only cycles that are not finished
        #[arg(short, long)]
        active: bool,
    },

    /// Ask the driver of a cycle to abandon it
    Cancel {
        /// Issue identifier
        issue: String,

        /// Reason for cancelling
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Close the pull request and abandon the cycle
    Close {
        /// Issue identifier
        issue: String,

        /// Reason for closing
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Print the effective configuration
    Config,
}
