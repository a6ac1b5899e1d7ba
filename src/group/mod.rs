//! Group-level aggregation of participant outputs.
//!
//! Both reducers read the participant-level output tree directly; no dataset
//! index is involved.
//!
//! - **group1** ([`motion`]): one motion file per subject/session, combined
//!   into `00_group1_motion_stats/group_motion.tsv` with TMI.
//! - **group2** ([`tracts`]): per-tract file lists and `tractstats2table`
//!   tables under `00_group2_tract_stats/`.
//!
//! Rows accumulate in explicit values returned from each reducer. A missing
//! per-unit file is skipped with a warning; more than one match for a file
//! expected to be unique aborts the reducer with `Consistency`.

pub mod motion;
pub mod outputs;
pub mod tracts;

pub use motion::{calculate_tmi, group_level_motion_stats, MotionRecord, MotionStatsReport, TmiResult};
pub use outputs::{discover_output_subjects, get_sessions};
pub use tracts::{group_level_tract_stats, tract_names, TractStatsReport};

/// Motion stats directory below the output root.
pub const MOTION_DIR: &str = "00_group1_motion_stats";
pub const MOTION_FILE: &str = "group_motion.tsv";
/// Tract stats directory below the output root.
pub const TRACT_DIR: &str = "00_group2_tract_stats";
/// File lists directory below [`TRACT_DIR`].
pub const FILE_LIST_DIR: &str = "00_file_lists";
