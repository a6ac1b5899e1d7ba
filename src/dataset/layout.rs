//! Filesystem-backed dataset index.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use super::{BidsFile, DatasetIndex, FileQuery};
use crate::error::Result;

/// Top-level directories that are not part of the raw dataset.
const IGNORED_TOP_LEVEL: &[&str] = &["derivatives", "sourcedata", "code"];

/// An in-memory index of every file in a BIDS dataset.
#[derive(Debug, Clone)]
pub struct BidsLayout {
    root: PathBuf,
    files: Vec<BidsFile>,
}

impl BidsLayout {
    /// Walks `root` and indexes every dataset file.
    pub fn index(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut files = Vec::new();

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_ignored(e));

        for entry in walker {
            let entry = entry.map_err(|e| {
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let datatype = datatype_of(&root, entry.path());
            files.push(BidsFile::parse(entry.path().to_path_buf(), datatype.as_deref()));
        }

        info!(root = %root.display(), files = files.len(), "Indexed BIDS dataset");
        Ok(Self { root, files })
    }

    /// Builds an index from already-parsed files.
    pub fn from_files(root: impl Into<PathBuf>, files: Vec<BidsFile>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl DatasetIndex for BidsLayout {
    fn subjects(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|f| f.subject.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn sessions(&self, filter: &FileQuery) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| filter.matches(f))
            .filter_map(|f| f.session.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn files(&self, query: &FileQuery) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|f| query.matches(f))
            .map(|f| f.path.clone())
            .collect();
        paths.sort();
        debug!(?query, matches = paths.len(), "Dataset query");
        paths
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.depth() > 0 && name.starts_with('.') {
        return true;
    }
    entry.depth() == 1 && entry.file_type().is_dir() && IGNORED_TOP_LEVEL.contains(&&*name)
}

/// The datatype directory of a file nested below `sub-*/[ses-*/]`.
fn datatype_of(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    if relative.components().count() < 2 {
        return None;
    }
    let parent = relative.parent()?.file_name()?.to_string_lossy().to_string();
    if parent.starts_with("sub-") || parent.starts_with("ses-") {
        None
    } else {
        Some(parent)
    }
}
