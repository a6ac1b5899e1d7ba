//! Error types for pipeline operations.
//!
//! A single error enum covers participant- and group-level processing:
//! - Missing inputs (diffusion images, gradient tables, FreeSurfer outputs)
//! - External command failures
//! - Output-tree consistency violations
//! - Malformed job, motion and table files
//!
//! Whether an error is skip-worthy or fatal is decided by the caller through
//! [`PipelineError::is_fatal`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Category of input file required for diffusion processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCategory {
    /// Diffusion-weighted images.
    Dwi,
    /// Gradient-vector (`.bvec`) files.
    Bvec,
    /// B-value (`.bval`) files.
    Bval,
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataCategory::Dwi => "DWI",
            DataCategory::Bvec => "bvec",
            DataCategory::Bval => "bval",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while orchestrating the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No {category} files for {unit}")]
    MissingData { unit: String, category: DataCategory },

    #[error("No FreeSurfer reconstruction '{0}' (scripts/recon-all.done is missing)")]
    MissingPrerequisite(String),

    #[error("Command exited with non-zero code {code}: {command}")]
    CommandFailed { command: String, code: i32 },

    #[error("Expected at most one match for '{pattern}', found {count}; the output tree is inconsistent")]
    Consistency { pattern: String, count: usize },

    #[error("Requested session(s) {} not found for subject {subject}", .sessions.join(" "))]
    RequestedSessionNotFound {
        subject: String,
        sessions: Vec<String>,
    },

    #[error("Malformed file '{}': {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl PipelineError {
    /// Returns true for errors that must terminate the whole run.
    ///
    /// Only a failed external command and an inconsistent output tree qualify.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::CommandFailed { .. } | PipelineError::Consistency { .. }
        )
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let failed = PipelineError::CommandFailed {
            command: "trac-all -prep".to_string(),
            code: 1,
        };
        assert!(failed.is_fatal());

        let consistency = PipelineError::Consistency {
            pattern: "sub-01/dmri/dwi_motion*.txt".to_string(),
            count: 2,
        };
        assert!(consistency.is_fatal());

        let missing = PipelineError::MissingData {
            unit: "sub-01".to_string(),
            category: DataCategory::Bvec,
        };
        assert!(!missing.is_fatal());
        assert!(!PipelineError::MissingPrerequisite("sub-01".to_string()).is_fatal());
    }

    #[test]
    fn test_pattern_error_is_not_io() {
        let err: PipelineError = regex::Regex::new("sub-(").unwrap_err().into();
        assert!(matches!(err, PipelineError::Pattern(_)));
        assert!(!err.is_fatal());
        assert!(err.to_string().starts_with("Invalid file name pattern"));
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::MissingData {
            unit: "sub-01_ses-a".to_string(),
            category: DataCategory::Dwi,
        };
        assert_eq!(err.to_string(), "No DWI files for sub-01_ses-a");

        let err = PipelineError::RequestedSessionNotFound {
            subject: "01".to_string(),
            sessions: vec!["x".to_string(), "y".to_string()],
        };
        assert!(err.to_string().contains("x y"));

        let err = PipelineError::CommandFailed {
            command: "false".to_string(),
            code: 3,
        };
        assert!(err.to_string().contains("code 3"));
    }
}
