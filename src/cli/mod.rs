//! CLI module for the converge tool.
//!
//! This module provides the command-line interface for validating,
//! planning, and applying resource manifests.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use output::OutputFormatter;
