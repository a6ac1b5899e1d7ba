//! Scanning of participant-level output directories.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::dataset::study_mode::{long_session_dir, subject_dir};
use crate::error::{PipelineError, Result};

/// Immediate children of `dir`, sorted by name. A missing directory has none.
fn children(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
        })?;
        let name = entry.file_name().to_string_lossy().to_string();
        out.push((name, entry.into_path()));
    }
    Ok(out)
}

/// Subject labels of the `sub-<id>` directories in `output_dir`, sorted.
pub fn discover_output_subjects(output_dir: &Path) -> Result<Vec<String>> {
    let re = Regex::new(r"^sub-([A-Za-z0-9]+)$")?;
    let subjects: Vec<String> = children(output_dir)?
        .into_iter()
        .filter(|(_, path)| path.is_dir())
        .filter_map(|(name, _)| re.captures(&name).map(|c| c[1].to_string()))
        .collect();
    debug!(output_dir = %output_dir.display(), count = subjects.len(), "Discovered output subjects");
    Ok(subjects)
}

/// Session labels of a subject's `sub-<id>_ses-<s>.long.*` output
/// directories, deduplicated and sorted. Empty for a cross-sectional layout.
pub fn get_sessions(output_dir: &Path, subject: &str) -> Result<Vec<String>> {
    let re = Regex::new(&format!(
        r"^sub-{}_ses-([A-Za-z0-9]+)\.long\.",
        regex::escape(subject)
    ))?;
    let mut sessions: Vec<String> = children(output_dir)?
        .into_iter()
        .filter_map(|(name, _)| re.captures(&name).map(|c| c[1].to_string()))
        .collect();
    sessions.sort();
    sessions.dedup();
    Ok(sessions)
}

/// Output directory name of a subject or longitudinal session.
pub fn unit_output_dir(subject: &str, session: Option<&str>) -> String {
    match session {
        Some(session) => long_session_dir(subject, session),
        None => subject_dir(subject),
    }
}

/// The output units of a subject: each longitudinal session, or the bare
/// subject when there are none.
pub fn output_units(output_dir: &Path, subject: &str) -> Result<Vec<Option<String>>> {
    let sessions = get_sessions(output_dir, subject)?;
    if sessions.is_empty() {
        Ok(vec![None])
    } else {
        Ok(sessions.into_iter().map(Some).collect())
    }
}

/// Finds the single entry of `dir` whose name matches `name`, optionally
/// descending into `file` below it.
///
/// No match is `Ok(None)`. More than one match means the output tree is
/// inconsistent and fails with `Consistency`; `pattern` names the search in
/// that error.
pub fn find_unique(
    dir: &Path,
    name: &Regex,
    file: Option<&str>,
    pattern: &str,
) -> Result<Option<PathBuf>> {
    let matches: Vec<PathBuf> = children(dir)?
        .into_iter()
        .filter(|(entry, _)| name.is_match(entry))
        .map(|(_, path)| match file {
            Some(file) => path.join(file),
            None => path,
        })
        .filter(|path| path.is_file())
        .collect();

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.into_iter().next()),
        count => Err(PipelineError::Consistency {
            pattern: pattern.to_string(),
            count,
        }),
    }
}
