//! Minimal data requirements per subject and session.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::dataset::{DatasetIndex, FileQuery};
use crate::error::PipelineError;

/// Outcome of the minimal data check for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eligibility {
    /// The subject can be processed.
    pub eligible: bool,
    /// Sessions with both a DWI and a T1w image, restricted to the requested
    /// sessions when a filter was given. Sorted.
    pub sessions: Vec<String>,
    /// Requested sessions that are not among the valid sessions. Sorted.
    pub missing_requested: Vec<String>,
}

fn has_minimal_data(index: &dyn DatasetIndex, subject: &str, session: Option<&str>) -> bool {
    let scope = |query: FileQuery| match session {
        Some(s) => query.subject(subject).session(s),
        None => query.subject(subject),
    };
    !index.files(&scope(FileQuery::dwi_images())).is_empty()
        && !index.files(&scope(FileQuery::anat_images())).is_empty()
}

/// Checks that a subject has at least one DWI and one T1w image, and which of
/// its sessions individually do.
///
/// With a session filter, valid sessions are intersected with it; requested
/// sessions that are not valid are reported as a warning. An empty
/// intersection demotes the subject to ineligible.
pub fn check_minimal_data_reqs(
    index: &dyn DatasetIndex,
    subject: &str,
    requested_sessions: Option<&[String]>,
) -> Eligibility {
    let mut eligible = has_minimal_data(index, subject, None);

    let valid: BTreeSet<String> = index
        .sessions(&FileQuery::new().subject(subject))
        .into_iter()
        .filter(|s| has_minimal_data(index, subject, Some(s)))
        .collect();

    let (sessions, missing_requested) = match requested_sessions {
        Some(requested) if !requested.is_empty() => {
            let requested: BTreeSet<String> = requested.iter().cloned().collect();
            let missing: Vec<String> = requested.difference(&valid).cloned().collect();
            let kept: Vec<String> = valid.intersection(&requested).cloned().collect();
            if !missing.is_empty() {
                let warning = PipelineError::RequestedSessionNotFound {
                    subject: subject.to_string(),
                    sessions: missing.clone(),
                };
                warn!(subject, "{}", warning);
            }
            if kept.is_empty() {
                eligible = false;
            }
            (kept, missing)
        }
        _ => (valid.into_iter().collect(), Vec::new()),
    };

    debug!(subject, eligible, sessions = ?sessions, "Minimal data check");

    Eligibility {
        eligible,
        sessions: if eligible { sessions } else { Vec::new() },
        missing_requested,
    }
}
