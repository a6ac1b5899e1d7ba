//! Run orchestration for the three analysis levels.
//!
//! # Architecture
//!
//! - **Config**: paths, labels, stage selection and external tool commands
//! - **Participant**: the per-subject loop (eligibility, FreeSurfer
//!   remediation, discovery, dmrirc, stages)
//!
//! Group levels are thin: they pick subjects here and hand them to the
//! reducers in [`crate::group`].
//!
//! # Configuration
//!
//! ```rust,ignore
//! use tracula_bids::pipeline::{PipelineConfig, ToolCommands};
//! use tracula_bids::scheduler::{Stage, StageSelection};
//!
//! let config = PipelineConfig::new("/data/bids", "/data/out", "license-key")
//!     .with_participant_labels(vec!["01".into()])
//!     .with_stages(StageSelection::only(&[Stage::Prep, Stage::Bedp]))
//!     .with_n_cpus(8)
//!     .with_tools(ToolCommands::from_env()?);
//! config.validate()?;
//! ```

pub mod config;
pub mod participant;

pub use config::{ConfigError, PipelineConfig, ToolCommands};
pub use participant::{ParticipantPipeline, RunSummary, SkippedSubject, SubjectStatus};

use std::path::Path;

use tracing::info;

use crate::dataset::DatasetIndex;
use crate::error::Result;
use crate::group::discover_output_subjects;
use crate::runner::{CommandRunner, ShellCommand};

/// Runs `bids-validator` on the dataset. A non-zero exit is fatal.
pub async fn validate_dataset(
    runner: &dyn CommandRunner,
    bids_validator: &str,
    bids_dir: &Path,
) -> Result<()> {
    let command = format!("{} {}", bids_validator, bids_dir.display());
    info!(bids_dir = %bids_dir.display(), "Validating BIDS dataset");
    runner.run(&ShellCommand::new(command)).await?;
    Ok(())
}

/// Subjects for the participant level: the requested labels, otherwise every
/// subject of the dataset.
pub fn participant_subjects(labels: &[String], index: &dyn DatasetIndex) -> Vec<String> {
    if labels.is_empty() {
        index.subjects()
    } else {
        labels.to_vec()
    }
}

/// Subjects for the group levels: the requested labels, otherwise every
/// `sub-<id>` directory in the output tree.
pub fn group_subjects(labels: &[String], output_dir: &Path) -> Result<Vec<String>> {
    if labels.is_empty() {
        discover_output_subjects(output_dir)
    } else {
        Ok(labels.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{BidsFile, BidsLayout};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_participant_subjects() {
        let layout = BidsLayout::from_files(
            "/bids",
            vec![
                BidsFile::parse(PathBuf::from("/bids/sub-02/dwi/sub-02_dwi.nii.gz"), Some("dwi")),
                BidsFile::parse(PathBuf::from("/bids/sub-01/dwi/sub-01_dwi.nii.gz"), Some("dwi")),
            ],
        );
        assert_eq!(participant_subjects(&[], &layout), vec!["01", "02"]);
        assert_eq!(participant_subjects(&["03".to_string()], &layout), vec!["03"]);
    }

    #[test]
    fn test_group_subjects() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("sub-01")).unwrap();
        fs::create_dir_all(temp.path().join("00_group1_motion_stats")).unwrap();

        assert_eq!(group_subjects(&[], temp.path()).unwrap(), vec!["01"]);
        assert_eq!(
            group_subjects(&["07".to_string()], temp.path()).unwrap(),
            vec!["07"]
        );
    }
}
