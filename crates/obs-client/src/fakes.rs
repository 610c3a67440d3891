//! In-memory fakes for the remote traits (testing only)
//!
//! Provides `MemoryBuildService`, `MemoryRecipeRepository` and
//! `MemoryRegistry` that satisfy the trait contracts without `osc`, `git` or
//! network access. Each fake exposes a few inspection helpers so tests can
//! assert on what was created remotely.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::ObsError;
use crate::recipes::{is_generated_file, RecipeSet};
use crate::traits::*;
use crate::Result;

fn not_found(what: impl Into<String>) -> ObsError {
    ObsError::NotFound(what.into())
}

// ---------------------------------------------------------------------------
// MemoryBuildService
// ---------------------------------------------------------------------------

/// A project as stored by [`MemoryBuildService`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeProject {
    pub meta: String,
    pub prjconf: Option<String>,
    /// package name -> package meta
    pub packages: BTreeMap<String, String>,
    pub attributes: BTreeMap<String, String>,
    pub rebuilds: usize,
    pub service_waits: usize,
}

#[derive(Debug, Default)]
struct BuildState {
    projects: BTreeMap<String, FakeProject>,
    /// Scripted `<resultlist>` replies per project. The last one repeats.
    results: HashMap<String, VecDeque<String>>,
    public_configs: HashMap<String, String>,
    projects_created: usize,
    failing_fetches: usize,
}

/// In-memory build service.
#[derive(Debug, Default)]
pub struct MemoryBuildService {
    state: Mutex<BuildState>,
}

impl MemoryBuildService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `<resultlist>` reply for `project`.
    pub fn push_results(&self, project: &str, xml: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state
            .results
            .entry(project.to_string())
            .or_default()
            .push_back(xml.into());
    }

    /// Publish a prjconf for a project that is not managed through this fake,
    /// such as a devel project.
    pub fn set_public_config(&self, project: &str, prjconf: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state
            .public_configs
            .insert(project.to_string(), prjconf.into());
    }

    /// Add an existing project with the given packages.
    pub fn insert_project<I, S>(&self, project: &str, packages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().unwrap();
        let entry = state.projects.entry(project.to_string()).or_default();
        for package in packages {
            entry.packages.insert(package.into(), String::new());
        }
    }

    /// Let the next `n` result fetches fail with a connection reset.
    pub fn fail_next_fetches(&self, n: usize) {
        self.state.lock().unwrap().failing_fetches = n;
    }

    pub fn project(&self, name: &str) -> Option<FakeProject> {
        self.state.lock().unwrap().projects.get(name).cloned()
    }

    pub fn project_names(&self) -> Vec<String> {
        self.state.lock().unwrap().projects.keys().cloned().collect()
    }

    /// Number of projects that were created (not updated) through
    /// `write_project_meta`.
    pub fn projects_created(&self) -> usize {
        self.state.lock().unwrap().projects_created
    }
}

#[async_trait]
impl BuildService for MemoryBuildService {
    async fn project_exists(&self, project: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().projects.contains_key(project))
    }

    async fn write_project_meta(&self, project: &str, meta: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.projects.contains_key(project) {
            state.projects_created += 1;
        }
        state.projects.entry(project.to_string()).or_default().meta = meta.to_string();
        Ok(())
    }

    async fn write_project_config(&self, project: &str, prjconf: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .projects
            .get_mut(project)
            .ok_or_else(|| not_found(project))?;
        entry.prjconf = Some(prjconf.to_string());
        Ok(())
    }

    async fn write_package_meta(&self, project: &str, package: &str, meta: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .projects
            .get_mut(project)
            .ok_or_else(|| not_found(project))?;
        entry.packages.insert(package.to_string(), meta.to_string());
        Ok(())
    }

    async fn set_project_attribute(
        &self,
        project: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .projects
            .get_mut(project)
            .ok_or_else(|| not_found(project))?;
        entry
            .attributes
            .insert(attribute.to_string(), value.to_string());
        Ok(())
    }

    async fn wait_for_service(&self, project: &str, package: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .projects
            .get_mut(project)
            .ok_or_else(|| not_found(project))?;
        if !entry.packages.contains_key(package) {
            return Err(not_found(format!("{project}/{package}")));
        }
        entry.service_waits += 1;
        Ok(())
    }

    async fn rebuild(&self, project: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .projects
            .get_mut(project)
            .ok_or_else(|| not_found(project))?;
        entry.rebuilds += 1;
        Ok(())
    }

    async fn fetch_results(&self, project: &str, _repositories: &[String]) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(ObsError::CommandFailed {
                command: format!("osc results --xml {project}"),
                code: 1,
                stderr: "SSL Error: (104, 'Connection reset by peer')".to_string(),
            });
        }
        if !state.projects.contains_key(project) {
            return Err(not_found(project));
        }
        let queue = state.results.entry(project.to_string()).or_default();
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(reply.unwrap_or_else(|| "<resultlist state=\"0\"/>".to_string()))
    }

    async fn list_packages(&self, project: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .projects
            .get(project)
            .map(|p| p.packages.keys().cloned().collect())
            .ok_or_else(|| not_found(project))
    }

    async fn fetch_project_config(&self, project: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        state
            .public_configs
            .get(project)
            .cloned()
            .or_else(|| state.projects.get(project).and_then(|p| p.prjconf.clone()))
            .ok_or_else(|| not_found(project))
    }

    async fn delete_project(&self, project: &str) -> Result<Removal> {
        let mut state = self.state.lock().unwrap();
        Ok(match state.projects.remove(project) {
            Some(_) => Removal::Deleted,
            None => Removal::AlreadyAbsent,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryRecipeRepository
// ---------------------------------------------------------------------------

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct RepoState {
    /// branch name -> head commit
    branches: BTreeMap<String, String>,
    /// commit hash -> tree
    commits: HashMap<String, Tree>,
    counter: u64,
    rejected_pushes: usize,
}

impl RepoState {
    fn tree(&self, reference: &str) -> Option<&Tree> {
        let hash = self
            .branches
            .get(reference)
            .map(String::as_str)
            .unwrap_or(reference);
        self.commits.get(hash)
    }

    fn commit(&mut self, branch: &str, tree: Tree) -> String {
        self.counter += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.counter.to_be_bytes());
        hasher.update(branch.as_bytes());
        let mut hash = hex::encode(hasher.finalize());
        hash.truncate(40);

        self.commits.insert(hash.clone(), tree);
        self.branches.insert(branch.to_string(), hash.clone());
        hash
    }

    fn reject_push(&mut self, branch: &str) -> Result<()> {
        if self.rejected_pushes == 0 {
            return Ok(());
        }
        self.rejected_pushes -= 1;
        Err(ObsError::CommandFailed {
            command: format!("git push --force-with-lease origin HEAD:refs/heads/{branch}"),
            code: 1,
            stderr: "! [rejected] HEAD -> ".to_string() + branch + " (stale info)",
        })
    }
}

/// Line-based numstat: common leading and trailing lines are unchanged,
/// everything in between counts as removed from `old` and added to `new`.
fn numstat(old: &[u8], new: &[u8]) -> (u64, u64) {
    let old: Vec<&[u8]> = old.split(|b| *b == b'\n').collect();
    let new: Vec<&[u8]> = new.split(|b| *b == b'\n').collect();

    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    (
        (new.len() - prefix - suffix) as u64,
        (old.len() - prefix - suffix) as u64,
    )
}

/// In-memory recipe repository where every push succeeds immediately.
#[derive(Debug, Default)]
pub struct MemoryRecipeRepository {
    state: Mutex<RepoState>,
}

impl MemoryRecipeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or reset `branch` with `files` as its only commit.
    pub fn seed_branch(&self, branch: &str, files: &RecipeSet) -> String {
        let tree = files
            .files()
            .map(|(path, contents)| (path.to_string(), contents.to_vec()))
            .collect();
        self.state.lock().unwrap().commit(branch, tree)
    }

    /// Files at the head of `branch`.
    pub fn branch_files(&self, branch: &str) -> Option<RecipeSet> {
        let state = self.state.lock().unwrap();
        state.tree(branch).map(|tree| {
            tree.iter().fold(RecipeSet::new(), |set, (path, contents)| {
                set.with_file(path.clone(), contents.clone())
            })
        })
    }

    pub fn branch_names(&self) -> Vec<String> {
        self.state.lock().unwrap().branches.keys().cloned().collect()
    }

    /// Reject the next `n` pushes as if someone pushed in between.
    pub fn reject_next_pushes(&self, n: usize) {
        self.state.lock().unwrap().rejected_pushes = n;
    }
}

#[async_trait]
impl RecipeRepository for MemoryRecipeRepository {
    async fn remote_head(&self, branch: &str) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().branches.get(branch).cloned())
    }

    async fn commit_recipes(
        &self,
        branch: &str,
        base: &str,
        recipes: &RecipeSet,
        _message: &str,
    ) -> Result<Option<String>> {
        let mut state = self.state.lock().unwrap();
        let base_tree = state.tree(base).cloned().ok_or_else(|| not_found(base))?;

        let mut tree: Tree = base_tree
            .iter()
            .filter(|(path, _)| !is_generated_file(path))
            .map(|(path, contents)| (path.clone(), contents.clone()))
            .collect();
        for (path, contents) in recipes.files() {
            tree.insert(path.to_string(), contents.to_vec());
        }

        if tree == base_tree {
            return Ok(None);
        }
        state.reject_push(branch)?;
        Ok(Some(state.commit(branch, tree)))
    }

    async fn changed_files(&self, base: &str, head: &str) -> Result<Vec<FileChange>> {
        let state = self.state.lock().unwrap();
        let old = state.tree(base).ok_or_else(|| not_found(base))?;
        let new = state.tree(head).ok_or_else(|| not_found(head))?;

        let mut paths: Vec<&String> = old.keys().chain(new.keys()).collect();
        paths.sort();
        paths.dedup();

        Ok(paths
            .into_iter()
            .filter_map(|path| {
                let before = old.get(path).map(Vec::as_slice).unwrap_or_default();
                let after = new.get(path).map(Vec::as_slice).unwrap_or_default();
                if old.get(path) == new.get(path) {
                    return None;
                }
                let (insertions, deletions) = numstat(before, after);
                Some(FileChange {
                    path: path.clone(),
                    insertions,
                    deletions,
                })
            })
            .collect())
    }

    async fn read_file(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().unwrap();
        let tree = state.tree(reference).ok_or_else(|| not_found(reference))?;
        Ok(tree.get(path).cloned())
    }

    async fn list_top_level(&self, reference: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let tree = state.tree(reference).ok_or_else(|| not_found(reference))?;
        let mut entries: Vec<String> = tree
            .keys()
            .map(|path| path.split('/').next().unwrap_or_default().to_string())
            .collect();
        entries.dedup();
        Ok(entries)
    }

    async fn add_changelog_entry(
        &self,
        branch: &str,
        packages: &[String],
        entry: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let mut tree = state.tree(branch).cloned().ok_or_else(|| not_found(branch))?;

        for package in packages {
            let path = format!("{package}/{package}.changes");
            let mut contents = format!(
                "-------------------------------------------------------------------\n\
                 Thu Jan  1 00:00:00 UTC 1970 - SUSE Update Bot <bci-internal@suse.de>\n\
                 \n\
                 - {entry}\n\
                 \n"
            )
            .into_bytes();
            contents.extend(tree.remove(&path).unwrap_or_default());
            tree.insert(path, contents);
        }

        state.reject_push(branch)?;
        Ok(state.commit(branch, tree))
    }

    async fn delete_branch(&self, branch: &str) -> Result<Removal> {
        let mut state = self.state.lock().unwrap();
        Ok(match state.branches.remove(branch) {
            Some(_) => Removal::Deleted,
            None => Removal::AlreadyAbsent,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryRegistry
// ---------------------------------------------------------------------------

/// In-memory registry with a fixed catalog.
#[derive(Debug)]
pub struct MemoryRegistry {
    hostname: String,
    repositories: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MemoryRegistry {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            repositories: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_image<I, S>(self, repository: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repositories
            .lock()
            .unwrap()
            .insert(repository.to_string(), tags.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl ContainerRegistry for MemoryRegistry {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn catalog(&self) -> Result<Vec<String>> {
        Ok(self.repositories.lock().unwrap().keys().cloned().collect())
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        self.repositories
            .lock()
            .unwrap()
            .get(repository)
            .cloned()
            .ok_or_else(|| not_found(repository))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numstat_counts_prepended_lines() {
        let old = b"- old entry\n";
        let new = b"----\nheader\n\n- new entry\n\n- old entry\n";
        assert_eq!(numstat(old, new), (5, 0));
    }

    #[test]
    fn numstat_counts_replaced_lines() {
        assert_eq!(numstat(b"FROM a\n", b"FROM b\n"), (1, 1));
        assert_eq!(numstat(b"", b"x\ny\n"), (2, 0));
    }
}
