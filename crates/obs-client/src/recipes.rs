//! Rendered build recipes that get committed to a staging branch.
//!
//! The recipes are produced by the generator and treated as opaque bytes
//! here. Every top-level directory that does not start with `.` or `_` is an
//! OBS package; `.obs/`, `.github/` and `_config` are repository settings.

use crate::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A set of rendered files keyed by their `/`-separated path relative to
/// the repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeSet {
    files: BTreeMap<String, Vec<u8>>,
}

impl RecipeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Read every file below `dir`, skipping a `.git` directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut set = Self::new();
        collect_files(dir, "", &mut set)?;
        Ok(set)
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Names of the OBS packages contained in this set.
    pub fn package_names(&self) -> BTreeSet<String> {
        self.files
            .keys()
            .filter_map(|path| path.split_once('/').map(|(top, _)| top))
            .filter(|top| is_package_dir(top))
            .map(str::to_string)
            .collect()
    }
}

/// Whether a top-level entry is an OBS package directory.
pub fn is_package_dir(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.starts_with('_')
}

/// Whether `path` is regenerated on every run. Changelogs are maintained by
/// hand and repository settings are only ever overwritten.
pub fn is_generated_file(path: &str) -> bool {
    let top = path.split('/').next().unwrap_or_default();
    is_package_dir(top) && !path.ends_with(".changes")
}

fn collect_files(dir: &Path, prefix: &str, set: &mut RecipeSet) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == ".git" {
            continue;
        }
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, &rel, set)?;
        } else {
            set.insert(rel, std::fs::read(&path)?);
        }
    }
    Ok(())
}
