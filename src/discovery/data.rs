//! Diffusion input discovery and FreeSurfer prerequisite checks.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::dataset::study_mode::{session_dir, subject_dir};
use crate::dataset::{DatasetIndex, FileQuery, GradientKind, StudyMode};
use crate::error::{DataCategory, PipelineError, Result};

/// Diffusion inputs of one subject or subject/session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectData {
    pub dwi_files: Vec<PathBuf>,
    pub bvec_files: Vec<PathBuf>,
    pub bval_files: Vec<PathBuf>,
    /// At least one gradient table came from the dataset root.
    pub gradient_fallback: bool,
}

/// `<freesurfer_dir>/<name>/scripts/recon-all.done`
pub fn recon_done_marker(freesurfer_dir: &Path, name: &str) -> PathBuf {
    freesurfer_dir
        .join(name)
        .join("scripts")
        .join("recon-all.done")
}

/// Resolves per-unit inputs against a dataset index.
pub struct DataDiscoverer<'a> {
    index: &'a dyn DatasetIndex,
    freesurfer_dir: PathBuf,
    study_mode: StudyMode,
}

impl<'a> DataDiscoverer<'a> {
    pub fn new(
        index: &'a dyn DatasetIndex,
        freesurfer_dir: impl Into<PathBuf>,
        study_mode: StudyMode,
    ) -> Self {
        Self {
            index,
            freesurfer_dir: freesurfer_dir.into(),
            study_mode,
        }
    }

    pub fn study_mode(&self) -> StudyMode {
        self.study_mode
    }

    pub fn freesurfer_dir(&self) -> &Path {
        &self.freesurfer_dir
    }

    /// Collects DWI images and gradient tables for a subject.
    ///
    /// The session only narrows the query in longitudinal mode. Gradient
    /// tables fall back to dataset-root files when none are scoped to the
    /// subject. Any category left empty is a `MissingData` error.
    pub fn get_data(&self, subject: &str, session: Option<&str>) -> Result<SubjectData> {
        let session = session.filter(|_| self.study_mode.is_longitudinal());
        let unit = match session {
            Some(s) => session_dir(subject, s),
            None => subject_dir(subject),
        };

        let mut query = FileQuery::dwi_images().subject(subject);
        if let Some(s) = session {
            query = query.session(s);
        }
        let dwi_files = self.index.files(&query);
        if dwi_files.is_empty() {
            return Err(PipelineError::MissingData {
                unit,
                category: DataCategory::Dwi,
            });
        }

        let bvecs = self.index.gradient_files(GradientKind::Bvec, subject, session);
        if bvecs.files.is_empty() {
            return Err(PipelineError::MissingData {
                unit,
                category: DataCategory::Bvec,
            });
        }
        let bvals = self.index.gradient_files(GradientKind::Bval, subject, session);
        if bvals.files.is_empty() {
            return Err(PipelineError::MissingData {
                unit,
                category: DataCategory::Bval,
            });
        }

        debug!(
            unit = %unit,
            dwi = dwi_files.len(),
            bvec = bvecs.files.len(),
            bval = bvals.files.len(),
            "Discovered diffusion inputs"
        );

        Ok(SubjectData {
            dwi_files,
            bvec_files: bvecs.files,
            bval_files: bvals.files,
            gradient_fallback: bvecs.from_root || bvals.from_root,
        })
    }

    /// FreeSurfer directories of this subject whose `recon-all.done` marker
    /// does not exist.
    pub fn missing_prerequisites(&self, subject: &str, session: Option<&str>) -> Vec<String> {
        self.study_mode
            .freesurfer_variants(subject, session)
            .into_iter()
            .filter(|name| !recon_done_marker(&self.freesurfer_dir, name).is_file())
            .collect()
    }

    /// Fails with `MissingPrerequisite` naming the first absent variant.
    pub fn verify_prerequisites(&self, subject: &str, session: Option<&str>) -> Result<()> {
        match self.missing_prerequisites(subject, session).into_iter().next() {
            Some(name) => Err(PipelineError::MissingPrerequisite(name)),
            None => Ok(()),
        }
    }
}

/// Records which dataset-root gradient files were reused and for how many
/// images, so that reuse across differently shaped acquisitions is reported.
#[derive(Debug, Clone, Default)]
pub struct FallbackAudit {
    uses: BTreeMap<PathBuf, Vec<(String, usize)>>,
}

impl FallbackAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fallback use. Returns true when the file was already used by
    /// another unit with a different image count.
    pub fn record(&mut self, unit: &str, file: &Path, image_count: usize) -> bool {
        let uses = self.uses.entry(file.to_path_buf()).or_default();
        let conflict = uses
            .iter()
            .find(|(_, count)| *count != image_count)
            .cloned();
        uses.push((unit.to_string(), image_count));

        if let Some((other, other_count)) = conflict {
            warn!(
                file = %file.display(),
                unit,
                images = image_count,
                other_unit = %other,
                other_images = other_count,
                "Root-level gradient file reused for acquisitions with different image counts"
            );
            return true;
        }
        false
    }

    /// Records every root-level file in `data` for `unit`.
    pub fn record_data(&mut self, unit: &str, data: &SubjectData, root: &Path) -> usize {
        let image_count = data.dwi_files.len();
        data.bvec_files
            .iter()
            .chain(data.bval_files.iter())
            .filter(|f| f.parent() == Some(root))
            .filter(|f| self.record(unit, f, image_count))
            .count()
    }

    /// Number of distinct fallback files seen.
    pub fn len(&self) -> usize {
        self.uses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uses.is_empty()
    }

    /// Units that used `file`, in recording order.
    pub fn units_for(&self, file: &Path) -> Vec<&str> {
        self.uses
            .get(file)
            .map(|u| u.iter().map(|(unit, _)| unit.as_str()).collect())
            .unwrap_or_default()
    }
}
