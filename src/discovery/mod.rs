//! Per-subject input discovery.
//!
//! Two checks run before any configuration is written:
//!
//! 1. **Eligibility**: does the subject (and each session) have at least one
//!    diffusion image and one anatomical image?
//! 2. **Data discovery**: collect the diffusion images and gradient tables of
//!    one subject/session and verify the FreeSurfer prerequisites on disk.
//!
//! The result of both is a list of [`SubjectSessionUnit`]s, the unit of
//! TRACULA processing.

pub mod data;
pub mod eligibility;

use std::path::PathBuf;

use crate::dataset::study_mode::{session_dir, subject_dir};

pub use data::{recon_done_marker, DataDiscoverer, FallbackAudit, SubjectData};
pub use eligibility::{check_minimal_data_reqs, Eligibility};

/// One subject (cross-sectional) or one subject/session pair (longitudinal)
/// together with its discovered input files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectSessionUnit {
    pub subject: String,
    pub session: Option<String>,
    pub dwi_files: Vec<PathBuf>,
    pub bvec_files: Vec<PathBuf>,
    pub bval_files: Vec<PathBuf>,
    /// Longitudinal base (template) name; `None` for cross-sectional units.
    pub base: Option<String>,
}

impl SubjectSessionUnit {
    /// Cross-sectional unit named `sub-<id>`.
    pub fn cross_sectional(subject: impl Into<String>, data: SubjectData) -> Self {
        Self {
            subject: subject.into(),
            session: None,
            dwi_files: data.dwi_files,
            bvec_files: data.bvec_files,
            bval_files: data.bval_files,
            base: None,
        }
    }

    /// Longitudinal unit named `sub-<id>_ses-<s>` feeding template `sub-<id>`.
    pub fn longitudinal(
        subject: impl Into<String>,
        session: impl Into<String>,
        data: SubjectData,
    ) -> Self {
        let subject = subject.into();
        let base = subject_dir(&subject);
        Self {
            subject,
            session: Some(session.into()),
            dwi_files: data.dwi_files,
            bvec_files: data.bvec_files,
            bval_files: data.bval_files,
            base: Some(base),
        }
    }

    /// TRACULA subject name of this unit.
    pub fn name(&self) -> String {
        match &self.session {
            Some(session) => session_dir(&self.subject, session),
            None => subject_dir(&self.subject),
        }
    }

    pub fn image_count(&self) -> usize {
        self.dwi_files.len()
    }
}
