//! TRACULA configuration (`dmrirc`) generation.
//!
//! One file per subject at `<output_dir>/sub-<id>/dmrirc`. Every list line
//! carries one token per diffusion image across all of the subject's units:
//!
//! ```text
//! setenv SUBJECTS_DIR /fs
//! set dtroot = /out
//! set subjlist = (sub-01_ses-a sub-01_ses-b)
//! set dcmlist = (/bids/.../sub-01_ses-a_dwi.nii.gz /bids/.../sub-01_ses-b_dwi.nii.gz)
//! set bveclist = (...)
//! set bvallist = (...)
//! set baselist = (sub-01 sub-01)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::dataset::entities::file_stem;
use crate::dataset::study_mode::subject_dir;
use crate::discovery::SubjectSessionUnit;
use crate::error::{DataCategory, PipelineError, Result};

/// Per-image parallel lists of a subject's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmrircLists {
    pub subjects: Vec<String>,
    pub images: Vec<PathBuf>,
    pub bvecs: Vec<PathBuf>,
    pub bvals: Vec<PathBuf>,
    pub bases: Vec<String>,
}

impl DmrircLists {
    /// Flattens units into image-indexed lists.
    ///
    /// A unit with N images contributes N copies of its name (and base).
    pub fn flatten(units: &[SubjectSessionUnit]) -> Result<Self> {
        let mut lists = Self::default();
        for unit in units {
            let name = unit.name();
            for (i, image) in unit.dwi_files.iter().enumerate() {
                let bvec = pair_gradient(image, i, &unit.bvec_files).ok_or_else(|| {
                    PipelineError::MissingData {
                        unit: name.clone(),
                        category: DataCategory::Bvec,
                    }
                })?;
                let bval = pair_gradient(image, i, &unit.bval_files).ok_or_else(|| {
                    PipelineError::MissingData {
                        unit: name.clone(),
                        category: DataCategory::Bval,
                    }
                })?;

                lists.subjects.push(name.clone());
                lists.images.push(image.clone());
                lists.bvecs.push(bvec.to_path_buf());
                lists.bvals.push(bval.to_path_buf());
                if let Some(base) = unit.base.as_deref().filter(|b| !b.is_empty()) {
                    lists.bases.push(base.to_string());
                }
            }
        }
        Ok(lists)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Renders the configuration lines in their fixed order.
    pub fn render(&self, freesurfer_dir: &Path, output_dir: &Path) -> String {
        let mut lines = vec![
            format!("setenv SUBJECTS_DIR {}", freesurfer_dir.display()),
            format!("set dtroot = {}", output_dir.display()),
            format!("set subjlist = ({})", self.subjects.join(" ")),
            format!("set dcmlist = ({})", join_paths(&self.images)),
            format!("set bveclist = ({})", join_paths(&self.bvecs)),
            format!("set bvallist = ({})", join_paths(&self.bvals)),
        ];
        if !self.bases.is_empty() {
            lines.push(format!("set baselist = ({})", self.bases.join(" ")));
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Picks the gradient file for the `index`-th image of a unit: same filename
/// stem, else same position, else the first file.
fn pair_gradient<'a>(image: &Path, index: usize, candidates: &'a [PathBuf]) -> Option<&'a Path> {
    let stem = file_stem(image);
    candidates
        .iter()
        .find(|c| file_stem(c) == stem)
        .or_else(|| candidates.get(index))
        .or_else(|| candidates.first())
        .map(PathBuf::as_path)
}

/// Path of a subject's configuration file.
pub fn dmrirc_path(output_dir: &Path, subject: &str) -> PathBuf {
    output_dir.join(subject_dir(subject)).join("dmrirc")
}

/// Writes `<output_dir>/sub-<subject>/dmrirc` for the given units, creating
/// the subject output directory first.
pub fn create_dmrirc(
    freesurfer_dir: &Path,
    output_dir: &Path,
    subject: &str,
    units: &[SubjectSessionUnit],
) -> Result<PathBuf> {
    let lists = DmrircLists::flatten(units)?;
    let path = dmrirc_path(output_dir, subject);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, lists.render(freesurfer_dir, output_dir))?;
    info!(
        subject,
        path = %path.display(),
        units = units.len(),
        images = lists.len(),
        "Wrote dmrirc"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::SubjectData;
    use tempfile::TempDir;

    fn unit(session: Option<&str>, images: &[&str], bvecs: &[&str], bvals: &[&str]) -> SubjectSessionUnit {
        let data = SubjectData {
            dwi_files: images.iter().map(PathBuf::from).collect(),
            bvec_files: bvecs.iter().map(PathBuf::from).collect(),
            bval_files: bvals.iter().map(PathBuf::from).collect(),
            gradient_fallback: false,
        };
        match session {
            Some(s) => SubjectSessionUnit::longitudinal("01", s, data),
            None => SubjectSessionUnit::cross_sectional("01", data),
        }
    }

    fn tokens(line: &str) -> Vec<&str> {
        let inner = line
            .split_once('(')
            .and_then(|(_, rest)| rest.strip_suffix(')'))
            .unwrap();
        inner.split_whitespace().collect()
    }

    #[test]
    fn test_cross_sectional_has_no_baselist() {
        let temp = TempDir::new().unwrap();
        let units = vec![unit(
            None,
            &["/b/sub-01_dwi.nii.gz"],
            &["/b/sub-01_dwi.bvec"],
            &["/b/sub-01_dwi.bval"],
        )];
        let path = create_dmrirc(Path::new("/fs"), temp.path(), "01", &units).unwrap();
        assert_eq!(path, temp.path().join("sub-01").join("dmrirc"));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "setenv SUBJECTS_DIR /fs");
        assert_eq!(lines[1], format!("set dtroot = {}", temp.path().display()));
        assert_eq!(lines[2], "set subjlist = (sub-01)");
        assert_eq!(lines[5], "set bvallist = (/b/sub-01_dwi.bval)");
        assert!(!content.contains("baselist"));
    }

    #[test]
    fn test_gradient_pairing_by_stem_then_position() {
        let by_stem = unit(
            None,
            &["/b/run-2_dwi.nii.gz", "/b/run-1_dwi.nii.gz"],
            &["/b/run-1_dwi.bvec", "/b/run-2_dwi.bvec"],
            &["/b/dwi.bval"],
        );
        let lists = DmrircLists::flatten(&[by_stem]).unwrap();
        assert_eq!(
            lists.bvecs,
            vec![PathBuf::from("/b/run-2_dwi.bvec"), PathBuf::from("/b/run-1_dwi.bvec")]
        );
        assert_eq!(lists.bvals, vec![PathBuf::from("/b/dwi.bval"); 2]);
    }

    #[test]
    fn test_empty_gradient_list_is_missing_data() {
        let broken = unit(None, &["/b/sub-01_dwi.nii.gz"], &[], &["/b/dwi.bval"]);
        let err = DmrircLists::flatten(&[broken]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingData { category: DataCategory::Bvec, .. }
        ));
    }

    #[test]
    fn test_longitudinal_lists_are_parallel() {
        let units = vec![
            unit(
                Some("a"),
                &["/b/sub-01_ses-a_run-1_dwi.nii.gz", "/b/sub-01_ses-a_run-2_dwi.nii.gz"],
                &["/b/dwi.bvec"],
                &["/b/dwi.bval"],
            ),
            unit(
                Some("b"),
                &["/b/sub-01_ses-b_run-1_dwi.nii.gz", "/b/sub-01_ses-b_run-2_dwi.nii.gz"],
                &["/b/dwi.bvec"],
                &["/b/dwi.bval"],
            ),
        ];
        let rendered = DmrircLists::flatten(&units)
            .unwrap()
            .render(Path::new("/fs"), Path::new("/out"));
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), 7);
        for line in &lines[2..6] {
            assert_eq!(tokens(line).len(), 4, "{}", line);
        }
        assert_eq!(
            tokens(lines[2]),
            vec!["sub-01_ses-a", "sub-01_ses-a", "sub-01_ses-b", "sub-01_ses-b"]
        );
        assert_eq!(tokens(lines[6]), vec!["sub-01"; 4]);
    }
}
