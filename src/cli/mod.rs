//! CLI module for cyclr - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for driving, inspecting and
//! aborting cycles.

pub mod commands;

pub use commands::Cli;
