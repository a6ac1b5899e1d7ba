//! Dataset-wide study design and the directory naming it implies.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DatasetIndex, FileQuery};

/// Cross-sectional (one timepoint per subject) or longitudinal design.
///
/// Resolved once per run from the whole dataset and shared by every subject,
/// since directory names downstream must follow one convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyMode {
    CrossSectional,
    Longitudinal,
}

impl StudyMode {
    /// Longitudinal iff more than one distinct session label exists anywhere.
    pub fn resolve(index: &dyn DatasetIndex) -> Self {
        let sessions = index.sessions(&FileQuery::new());
        Self::from_session_count(sessions.len())
    }

    pub fn from_session_count(count: usize) -> Self {
        if count > 1 {
            StudyMode::Longitudinal
        } else {
            StudyMode::CrossSectional
        }
    }

    pub fn is_longitudinal(&self) -> bool {
        matches!(self, StudyMode::Longitudinal)
    }

    /// FreeSurfer subject directories that must be complete before TRACULA
    /// can process this subject (and session).
    pub fn freesurfer_variants(&self, subject: &str, session: Option<&str>) -> Vec<String> {
        match (self, session) {
            (StudyMode::Longitudinal, Some(session)) => vec![
                subject_dir(subject),
                session_dir(subject, session),
                long_session_dir(subject, session),
            ],
            _ => vec![subject_dir(subject)],
        }
    }
}

impl fmt::Display for StudyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudyMode::CrossSectional => f.write_str("cross-sectional"),
            StudyMode::Longitudinal => f.write_str("longitudinal"),
        }
    }
}

/// `sub-<id>`
pub fn subject_dir(subject: &str) -> String {
    format!("sub-{}", subject)
}

/// `sub-<id>_ses-<s>`
pub fn session_dir(subject: &str, session: &str) -> String {
    format!("sub-{}_ses-{}", subject, session)
}

/// `sub-<id>_ses-<s>.long.sub-<id>`
pub fn long_session_dir(subject: &str, session: &str) -> String {
    format!("sub-{sub}_ses-{ses}.long.sub-{sub}", sub = subject, ses = session)
}
