//! Command-line interface for tracula-bids.
//!
//! Parses BIDS-App arguments and dispatches to the participant or group
//! levels.

mod commands;

pub use commands::{parse_cli, run_with_cli, AnalysisLevel, Cli};
