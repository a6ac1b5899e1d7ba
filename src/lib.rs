//! tracula-bids: TRACULA diffusion tractography for BIDS datasets.
//!
//! This library indexes a BIDS dataset, prepares TRACULA configuration for
//! each participant, drives the `trac-all` stages through a bounded worker
//! pool, and aggregates motion and tract statistics at the group level.

// Core modules
pub mod cli;
pub mod dataset;
pub mod discovery;
pub mod dmrirc;
pub mod error;
pub mod group;
pub mod pipeline;
pub mod runner;
pub mod scheduler;

// Re-export commonly used types
pub use error::{DataCategory, PipelineError, Result};
