//! Command-line interface
//!
//! Argument parsing for the `work-ledger` launcher.

pub mod commands;

pub use commands::{Command, Opt};
