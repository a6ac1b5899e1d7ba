//! Dataset index: subject, session and file lookup over a BIDS dataset.
//!
//! The pipeline only talks to the dataset through the [`DatasetIndex`] trait,
//! so any indexing backend can be substituted. [`BidsLayout`] is the
//! filesystem-backed implementation; tests use small in-memory indexes.
//!
//! # Example
//!
//! ```ignore
//! use tracula_bids::dataset::{BidsLayout, DatasetIndex, FileQuery};
//!
//! let layout = BidsLayout::index("/data/bids")?;
//! let dwis = layout.files(&FileQuery::dwi_images().subject("01"));
//! ```

pub mod entities;
pub mod layout;
pub mod study_mode;

use std::path::PathBuf;

pub use entities::BidsFile;
pub use layout::BidsLayout;
pub use study_mode::StudyMode;

/// NIfTI extensions accepted for image queries.
pub const IMAGE_EXTENSIONS: &[&str] = &["nii", "nii.gz"];

/// A filter over indexed files. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileQuery {
    /// Subject label without the `sub-` prefix.
    pub subject: Option<String>,
    /// Session label without the `ses-` prefix.
    pub session: Option<String>,
    /// Datatype directory (`anat`, `dwi`, ...).
    pub datatype: Option<String>,
    /// Filename suffix (`T1w`, `dwi`, ...).
    pub suffix: Option<String>,
    /// Accepted extensions without the leading dot; empty accepts all.
    pub extensions: Vec<String>,
    /// Only match files that carry no subject entity (dataset-root files).
    pub root_only: bool,
}

impl FileQuery {
    /// Creates an empty query matching every file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Diffusion-weighted NIfTI images.
    pub fn dwi_images() -> Self {
        Self::new()
            .datatype("dwi")
            .suffix("dwi")
            .extensions(IMAGE_EXTENSIONS)
    }

    /// T1-weighted anatomical NIfTI images.
    pub fn anat_images() -> Self {
        Self::new()
            .datatype("anat")
            .suffix("T1w")
            .extensions(IMAGE_EXTENSIONS)
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = Some(datatype.into());
        self
    }

    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn root_only(mut self) -> Self {
        self.root_only = true;
        self
    }

    /// Checks whether a parsed file satisfies this query.
    pub fn matches(&self, file: &BidsFile) -> bool {
        if self.root_only && file.subject.is_some() {
            return false;
        }
        if !field_matches(&self.subject, &file.subject) {
            return false;
        }
        if !field_matches(&self.session, &file.session) {
            return false;
        }
        if !field_matches(&self.datatype, &file.datatype) {
            return false;
        }
        if let Some(suffix) = &self.suffix {
            if file.suffix != *suffix {
                return false;
            }
        }
        self.extensions.is_empty() || self.extensions.iter().any(|e| *e == file.extension)
    }
}

fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match wanted {
        Some(w) => actual.as_deref() == Some(w.as_str()),
        None => true,
    }
}

/// Kind of gradient table accompanying diffusion images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientKind {
    Bvec,
    Bval,
}

impl GradientKind {
    pub fn extension(&self) -> &'static str {
        match self {
            GradientKind::Bvec => "bvec",
            GradientKind::Bval => "bval",
        }
    }
}

/// Gradient files resolved for a subject or session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradientFiles {
    pub files: Vec<PathBuf>,
    /// True when the files came from the dataset root instead of the subject.
    pub from_root: bool,
}

/// Lookup service over an indexed dataset.
pub trait DatasetIndex: Send + Sync {
    /// All subject labels, sorted.
    fn subjects(&self) -> Vec<String>;

    /// Distinct session labels among files matching the filter, sorted.
    fn sessions(&self, filter: &FileQuery) -> Vec<String>;

    /// Files matching the query, sorted by path.
    fn files(&self, query: &FileQuery) -> Vec<PathBuf>;

    /// Gradient files scoped to the subject (and session), falling back to
    /// dataset-root files when the scoped lookup is empty.
    fn gradient_files(
        &self,
        kind: GradientKind,
        subject: &str,
        session: Option<&str>,
    ) -> GradientFiles {
        let mut scoped = FileQuery::new()
            .subject(subject)
            .extensions(&[kind.extension()]);
        if let Some(session) = session {
            scoped = scoped.session(session);
        }

        let files = self.files(&scoped);
        if !files.is_empty() {
            return GradientFiles {
                files,
                from_root: false,
            };
        }

        let root = FileQuery::new()
            .root_only()
            .extensions(&[kind.extension()]);
        GradientFiles {
            files: self.files(&root),
            from_root: true,
        }
    }
}
