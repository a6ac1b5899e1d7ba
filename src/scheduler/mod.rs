//! Stage scheduling: job plans, the bounded worker pool and the stage driver.
//!
//! # Architecture
//!
//! ```text
//!   dmrirc ──► trac-all -<stage> -jobs ──► job file(s)
//!                                              │
//!                                       ┌──────▼───────┐
//!                                       │   JobPlan    │  segments run in order
//!                                       └──────┬───────┘
//!                                              │
//!         ┌────────────────────────────────────┼───────────────────┐
//!         │                                    │                   │
//!         ▼                                    ▼                   ▼
//!    ┌─────────┐                          ┌─────────┐         ┌─────────┐
//!    │ cmd 1   │   ...  at most n_cpus    │ cmd 2   │         │ cmd N   │
//!    └─────────┘                          └─────────┘         └─────────┘
//! ```
//!
//! Segment layout per stage:
//!
//! | Stage | Segments                                          |
//! |-------|---------------------------------------------------|
//! | prep  | `main` (parallel), then `base` (last command)     |
//! | bedp  | `pre` (sequential), `main` (parallel), `post` (parallel) |
//! | path  | `main` (parallel)                                 |
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tracula_bids::scheduler::{StageDriver, StageSelection, StageStrategy};
//!
//! let driver = StageDriver::new(runner, tools, "/out", 8, StageStrategy::JobFiles);
//! driver.run_stages("01", &dmrirc, &units, &StageSelection::all()).await?;
//! ```

pub mod driver;
pub mod job;
pub mod worker_pool;

pub use driver::{prepare_bedpostx_dirs, StageDriver, StageStrategy};
pub use job::{Dispatch, JobPlan, JobSegment, Stage, StageSelection};
pub use worker_pool::{PoolStats, WorkerPool};
