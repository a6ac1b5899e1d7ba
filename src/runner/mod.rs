//! Command runner: the only I/O boundary to the external toolchain.
//!
//! Every external program (trac-all, bedpostx, run_freesurfer.py,
//! tractstats2table, bids-validator) is launched through a [`CommandRunner`].
//!
//! ```text
//! JobPlan segment → WorkerPool → CommandRunner → sh -c <command> → stdout echo
//! ```
//!
//! The production implementation is [`ShellRunner`]. Tests substitute a
//! recording runner so stage ordering can be observed without the toolchain.
//!
//! # Example
//!
//! ```ignore
//! use tracula_bids::runner::{CommandRunner, ShellCommand, ShellRunner};
//!
//! let runner = ShellRunner::new();
//! runner.run(&ShellCommand::new("trac-all -prep -c /out/sub-01/dmrirc")).await?;
//! ```

pub mod shell;

use async_trait::async_trait;

use crate::error::Result;

pub use shell::{CommandOutcome, ShellCommand, ShellRunner, SUPPRESSED_ENV_VARS};

/// Executes shell commands on behalf of the pipeline.
///
/// Implementations must fail with `PipelineError::CommandFailed` when the exit
/// code is nonzero, unless the command asks for errors to be ignored.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion.
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutcome>;
}
