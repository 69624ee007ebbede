//! CLI module for guac-tunnel - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the server
//! and inspecting its configuration.

pub mod commands;

pub use commands::Cli;
