//! BIDS filename parsing.

use std::path::{Path, PathBuf};

/// A file in a BIDS dataset with its parsed entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsFile {
    pub path: PathBuf,
    pub subject: Option<String>,
    pub session: Option<String>,
    pub datatype: Option<String>,
    pub suffix: String,
    /// Everything after the first `.` of the filename (`nii.gz`, `bvec`).
    pub extension: String,
}

impl BidsFile {
    /// Parses `sub-<id>[_ses-<s>][_key-value...]_<suffix>.<ext>`.
    ///
    /// Tokens that are not `key-value` pairs are ignored, except the last one
    /// which is always the suffix. Root-level files such as `dwi.bvec` parse
    /// with no entities.
    pub fn parse(path: PathBuf, datatype: Option<&str>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (base, extension) = split_extension(&name);

        let mut subject = None;
        let mut session = None;
        let tokens: Vec<&str> = base.split('_').collect();
        let suffix = tokens.last().copied().unwrap_or_default().to_string();

        for token in &tokens[..tokens.len().saturating_sub(1)] {
            if let Some((key, value)) = token.split_once('-') {
                match key {
                    "sub" => subject = Some(value.to_string()),
                    "ses" => session = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        Self {
            path,
            subject,
            session,
            datatype: datatype.map(str::to_string),
            suffix,
            extension: extension.to_string(),
        }
    }
}

/// Splits a filename at its first dot.
fn split_extension(name: &str) -> (&str, &str) {
    match name.split_once('.') {
        Some((base, ext)) => (base, ext),
        None => (name, ""),
    }
}

/// Returns the filename of `path` without any extension.
///
/// `sub-01_dwi.nii.gz` and `sub-01_dwi.bvec` both yield `sub-01_dwi`, which is
/// how a diffusion image is matched to its sidecar gradient tables.
pub fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    split_extension(&name).0.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_longitudinal_dwi() {
        let file = BidsFile::parse(
            PathBuf::from("/bids/sub-01/ses-pre/dwi/sub-01_ses-pre_acq-hardi_dwi.nii.gz"),
            Some("dwi"),
        );
        assert_eq!(file.subject.as_deref(), Some("01"));
        assert_eq!(file.session.as_deref(), Some("pre"));
        assert_eq!(file.datatype.as_deref(), Some("dwi"));
        assert_eq!(file.suffix, "dwi");
        assert_eq!(file.extension, "nii.gz");
    }

    #[test]
    fn test_parse_root_file() {
        let file = BidsFile::parse(PathBuf::from("/bids/dwi.bval"), None);
        assert!(file.subject.is_none());
        assert!(file.session.is_none());
        assert_eq!(file.suffix, "dwi");
        assert_eq!(file.extension, "bval");
    }

    #[test]
    fn test_parse_cross_sectional_anat() {
        let file = BidsFile::parse(
            PathBuf::from("/bids/sub-lhab01/anat/sub-lhab01_T1w.nii"),
            Some("anat"),
        );
        assert_eq!(file.subject.as_deref(), Some("lhab01"));
        assert!(file.session.is_none());
        assert_eq!(file.suffix, "T1w");
        assert_eq!(file.extension, "nii");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("/x/sub-01_dwi.nii.gz")), "sub-01_dwi");
        assert_eq!(file_stem(Path::new("/x/sub-01_dwi.bvec")), "sub-01_dwi");
        assert_eq!(file_stem(Path::new("/x/README")), "README");
    }
}
