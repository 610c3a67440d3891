//! Remote collaborator traits for the staging bot.
//!
//! - `BuildService`: the Open Build Service (projects, packages, results)
//! - `RecipeRepository`: the git repository holding the rendered recipes
//! - `ContainerRegistry`: the registry where OBS publishes built images
//!
//! All traits are async and backend-agnostic. In-memory fakes live in the
//! `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::recipes::{is_package_dir, RecipeSet};
use crate::Result;
use std::collections::BTreeSet;

/// Lines a one-line changelog entry adds at least (separator, header, blank
/// line, entry).
pub const MIN_CHANGELOG_ADDITION: u64 = 4;

/// Outcome of a delete call. Deleting something that is already gone is not
/// an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    Deleted,
    AlreadyAbsent,
}

/// Per-file line statistics of a diff (`git diff --numstat`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub insertions: u64,
    pub deletions: u64,
}

impl FileChange {
    /// First path component, i.e. the package directory.
    pub fn top_level(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }
}

/// The Open Build Service as seen by the bot.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Whether a project with this name exists.
    async fn project_exists(&self, project: &str) -> Result<bool>;

    /// Create or replace the project `_meta`. Creates the project if needed.
    async fn write_project_meta(&self, project: &str, meta: &str) -> Result<()>;

    /// Replace the project `prjconf`. The project must exist.
    async fn write_project_config(&self, project: &str, prjconf: &str) -> Result<()>;

    /// Create or replace a package `_meta` inside `project`.
    async fn write_package_meta(&self, project: &str, package: &str, meta: &str) -> Result<()>;

    /// Set a project attribute such as `OSRT:Config`.
    async fn set_project_attribute(&self, project: &str, attribute: &str, value: &str)
        -> Result<()>;

    /// Block until the source services of a package have run.
    async fn wait_for_service(&self, project: &str, package: &str) -> Result<()>;

    /// Wipe all binaries and trigger a rebuild of every package.
    async fn rebuild(&self, project: &str) -> Result<()>;

    /// Raw `<resultlist>` XML for the given repositories of `project`.
    async fn fetch_results(&self, project: &str, repositories: &[String]) -> Result<String>;

    /// Names of all packages in `project`.
    async fn list_packages(&self, project: &str) -> Result<Vec<String>>;

    /// The published `prjconf` of `project`.
    async fn fetch_project_config(&self, project: &str) -> Result<String>;

    /// Delete `project` with all its packages.
    async fn delete_project(&self, project: &str) -> Result<Removal>;
}

/// The git repository that OBS syncs the build recipes from.
#[async_trait]
pub trait RecipeRepository: Send + Sync {
    /// Commit hash of `branch` on the remote, `None` if it does not exist.
    async fn remote_head(&self, branch: &str) -> Result<Option<String>>;

    /// Put `recipes` on top of `base` into `branch`, commit and push.
    ///
    /// Generated files of `base` that are not part of `recipes` are removed.
    /// Returns `None` without creating a commit when the result is identical
    /// to `base`.
    async fn commit_recipes(
        &self,
        branch: &str,
        base: &str,
        recipes: &RecipeSet,
        message: &str,
    ) -> Result<Option<String>>;

    /// Line statistics of all files that differ between `base` and `head`.
    async fn changed_files(&self, base: &str, head: &str) -> Result<Vec<FileChange>>;

    /// Contents of `path` at `reference`, `None` if the file does not exist.
    async fn read_file(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>>;

    /// Top-level entries of the tree at `reference`.
    async fn list_top_level(&self, reference: &str) -> Result<Vec<String>>;

    /// Add `entry` to the changelog of every package in `packages` on
    /// `branch`, commit and push. Returns the new commit hash.
    async fn add_changelog_entry(
        &self,
        branch: &str,
        packages: &[String],
        entry: &str,
    ) -> Result<String>;

    /// Delete `branch` locally and on the remote.
    async fn delete_branch(&self, branch: &str) -> Result<Removal>;

    /// Packages with at least one file that differs between `base` and
    /// `head`.
    async fn changed_packages(&self, base: &str, head: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .changed_files(base, head)
            .await?
            .iter()
            .filter(|change| change.path.contains('/'))
            .map(FileChange::top_level)
            .filter(|top| is_package_dir(top))
            .map(str::to_string)
            .collect())
    }

    /// Packages changed between `base` and `head` whose changelog did not
    /// grow by a full entry.
    async fn packages_without_changelog(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let changes = self.changed_files(base, head).await?;
        let packages: BTreeSet<&str> = changes
            .iter()
            .filter(|change| change.path.contains('/'))
            .map(FileChange::top_level)
            .filter(|top| is_package_dir(top))
            .collect();

        Ok(packages
            .into_iter()
            .filter(|package| {
                let changelog = format!("{package}/{package}.changes");
                !changes.iter().any(|change| {
                    change.path == changelog
                        && change.insertions >= change.deletions + MIN_CHANGELOG_ADDITION
                })
            })
            .map(str::to_string)
            .collect())
    }
}

/// Read access to an OCI registry.
#[async_trait]
pub trait ContainerRegistry: Send + Sync {
    /// Registry host used in pull urls, e.g. `registry.opensuse.org`.
    fn hostname(&self) -> &str;

    /// All repositories in the registry.
    async fn catalog(&self) -> Result<Vec<String>>;

    /// All tags of `repository`.
    async fn tags(&self, repository: &str) -> Result<Vec<String>>;
}
