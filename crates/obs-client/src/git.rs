//! [`RecipeRepository`] backed by a local clone and the `git` executable.
//!
//! Every write happens in a throwaway worktree below a temporary directory,
//! so the checkout the bot runs in is never touched.

use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::error::ObsError;
use crate::recipes::{is_generated_file, RecipeSet};
use crate::traits::{FileChange, RecipeRepository, Removal};
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

const GIT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Helper from the `build` package that prepends a changelog entry.
pub const VC_PROGRAM: &str = "/usr/lib/build/vc";

/// Author and committer of the bot's commits.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GitIdentity {
    name: String,
    email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "SUSE Update Bot".to_string(),
            email: "bci-internal@suse.de".to_string(),
        }
    }
}

impl GitIdentity {
    fn commit_env(&self, invocation: Invocation) -> Invocation {
        invocation
            .env("GIT_AUTHOR_NAME", &self.name)
            .env("GIT_AUTHOR_EMAIL", &self.email)
            .env("GIT_COMMITTER_NAME", &self.name)
            .env("GIT_COMMITTER_EMAIL", &self.email)
    }
}

/// Recipe repository in a local clone with a configured remote.
#[derive(Debug, Clone)]
pub struct GitRecipeRepository {
    repo_dir: PathBuf,
    remote: String,
    identity: GitIdentity,
    runner: CommandRunner,
}

/// A worktree checked out in a temporary directory. Call
/// [`GitRecipeRepository::remove_worktree`] when done; the directory itself
/// is removed on drop either way.
struct Worktree {
    _dir: TempDir,
    path: PathBuf,
}

impl GitRecipeRepository {
    /// Use the clone at `repo_dir` with `origin` as remote.
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: "origin".to_string(),
            identity: GitIdentity::default(),
            runner: CommandRunner::new(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn git(&self, dir: &Path) -> Invocation {
        Invocation::new("git").cwd(dir).timeout(GIT_TIMEOUT)
    }

    async fn git_in_repo<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.runner.run(self.git(&self.repo_dir).args(args)).await
    }

    /// Commit hashes and `HEAD` are used as is, everything else is a branch
    /// on the remote.
    fn resolve(&self, reference: &str) -> String {
        if is_local_ref(reference) {
            reference.to_string()
        } else {
            format!("{}/{}", self.remote, reference)
        }
    }

    async fn fetch(&self, reference: &str) -> Result<()> {
        if is_local_ref(reference) {
            return Ok(());
        }
        self.git_in_repo(["fetch", self.remote.as_str(), reference])
            .await
            .map(|_| ())
    }

    async fn add_worktree(&self, branch: &str, base: &str) -> Result<Worktree> {
        self.fetch(base).await?;
        let dir = tempfile::Builder::new().prefix("bci-staging-").tempdir()?;
        let path = dir.path().join("worktree");
        self.git_in_repo([
            "worktree".to_string(),
            "add".to_string(),
            "-B".to_string(),
            branch.to_string(),
            path.display().to_string(),
            self.resolve(base),
        ])
        .await?;
        Ok(Worktree { _dir: dir, path })
    }

    async fn remove_worktree(&self, worktree: Worktree) {
        let result = self
            .git_in_repo([
                "worktree".to_string(),
                "remove".to_string(),
                "--force".to_string(),
                worktree.path.display().to_string(),
            ])
            .await;
        if let Err(err) = result {
            warn!("failed to remove worktree {}: {}", worktree.path.display(), err);
        }
    }

    async fn head_of(&self, dir: &Path) -> Result<String> {
        let out = self
            .runner
            .run(self.git(dir).args(["rev-parse", "HEAD"]))
            .await?;
        Ok(out.stdout.trim().to_string())
    }

    async fn push(&self, dir: &Path, branch: &str) -> Result<()> {
        self.runner
            .run(self.git(dir).args([
                "push".to_string(),
                "--force-with-lease".to_string(),
                self.remote.clone(),
                format!("HEAD:refs/heads/{branch}"),
            ]))
            .await
            .map(|_| ())
    }

    async fn write_recipes_in(
        &self,
        dir: &Path,
        recipes: &RecipeSet,
        message: &str,
    ) -> Result<Option<String>> {
        let tracked = self.runner.run(self.git(dir).arg("ls-files")).await?;
        let stale: Vec<&str> = tracked
            .stdout
            .lines()
            .filter(|path| is_generated_file(path))
            .collect();
        if !stale.is_empty() {
            self.runner
                .run(self.git(dir).args(["rm", "-q", "--"]).args(stale))
                .await?;
        }

        for (path, contents) in recipes.files() {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, contents).await?;
        }
        self.runner
            .run(self.git(dir).args(["add", "--all", "."]))
            .await?;

        let status = self
            .runner
            .run(self.git(dir).args(["status", "--porcelain"]))
            .await?;
        if status.stdout.trim().is_empty() {
            debug!("recipes are identical to the base, not committing");
            return Ok(None);
        }

        self.runner
            .run(
                self.identity
                    .commit_env(self.git(dir).args(["commit", "-q", "-m", message])),
            )
            .await?;
        Ok(Some(self.head_of(dir).await?))
    }

    async fn append_changelogs_in(
        &self,
        dir: &Path,
        packages: &[String],
        entry: &str,
    ) -> Result<String> {
        let mut files = Vec::with_capacity(packages.len());
        for package in packages {
            let changes = format!("{package}.changes");
            self.runner
                .run(
                    Invocation::new(VC_PROGRAM)
                        .args(["-m", entry, changes.as_str()])
                        .cwd(dir.join(package))
                        .env("VC_REALNAME", &self.identity.name)
                        .env("VC_MAILADDR", &self.identity.email)
                        .timeout(GIT_TIMEOUT),
                )
                .await?;
            files.push(format!("{package}/{changes}"));
        }
        self.runner
            .run(self.git(dir).arg("add").args(files))
            .await?;

        let message = match packages {
            [single] => format!("Update changelog for {single}"),
            _ => format!("Update changelogs for {}", packages.join(", ")),
        };
        self.runner
            .run(
                self.identity
                    .commit_env(self.git(dir).args(["commit", "-q", "-m", message.as_str()])),
            )
            .await?;
        self.head_of(dir).await
    }
}

fn is_local_ref(reference: &str) -> bool {
    reference == "HEAD" || looks_like_commit(reference)
}

/// 7 to 40 lowercase hex digits.
fn looks_like_commit(reference: &str) -> bool {
    (7..=40).contains(&reference.len())
        && reference
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Parse `git diff --numstat` output. Binary files report `-` for both
/// counts and are treated as zero.
fn parse_numstat(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let insertions = parts.next()?;
            let deletions = parts.next()?;
            let path = parts.next()?;
            Some(FileChange {
                path: path.to_string(),
                insertions: insertions.parse().unwrap_or(0),
                deletions: deletions.parse().unwrap_or(0),
            })
        })
        .collect()
}

fn is_missing_object(output: &CommandOutput) -> bool {
    ["does not exist", "exists on disk, but not in", "invalid object name"]
        .iter()
        .any(|m| output.stderr.contains(m))
}

#[async_trait]
impl RecipeRepository for GitRecipeRepository {
    async fn remote_head(&self, branch: &str) -> Result<Option<String>> {
        let out = self
            .git_in_repo([
                "ls-remote".to_string(),
                "--heads".to_string(),
                self.remote.clone(),
                branch.to_string(),
            ])
            .await?;
        let wanted = format!("refs/heads/{branch}");
        Ok(out.stdout.lines().find_map(|line| {
            let (hash, name) = line.split_once('\t')?;
            (name.trim() == wanted).then(|| hash.to_string())
        }))
    }

    async fn commit_recipes(
        &self,
        branch: &str,
        base: &str,
        recipes: &RecipeSet,
        message: &str,
    ) -> Result<Option<String>> {
        let worktree = self.add_worktree(branch, base).await?;

        let result = async {
            let commit = self.write_recipes_in(&worktree.path, recipes, message).await?;
            if let Some(hash) = &commit {
                self.push(&worktree.path, branch).await?;
                info!(branch, commit = %hash, "pushed build recipes");
            }
            Ok(commit)
        }
        .await;

        self.remove_worktree(worktree).await;
        result
    }

    async fn changed_files(&self, base: &str, head: &str) -> Result<Vec<FileChange>> {
        self.fetch(base).await?;
        self.fetch(head).await?;
        let out = self
            .git_in_repo([
                "diff".to_string(),
                "--numstat".to_string(),
                "--no-renames".to_string(),
                self.resolve(base),
                self.resolve(head),
            ])
            .await?;
        Ok(parse_numstat(&out.stdout))
    }

    async fn read_file(&self, reference: &str, path: &str) -> Result<Option<Vec<u8>>> {
        self.fetch(reference).await?;
        let out = self
            .runner
            .output(
                self.git(&self.repo_dir)
                    .arg("show")
                    .arg(format!("{}:{}", self.resolve(reference), path)),
            )
            .await?;
        if out.success() {
            Ok(Some(out.stdout.into_bytes()))
        } else if is_missing_object(&out) {
            Ok(None)
        } else {
            Err(ObsError::CommandFailed {
                command: out.command,
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            })
        }
    }

    async fn list_top_level(&self, reference: &str) -> Result<Vec<String>> {
        self.fetch(reference).await?;
        let out = self
            .git_in_repo([
                "ls-tree".to_string(),
                "--name-only".to_string(),
                self.resolve(reference),
            ])
            .await?;
        Ok(out.stdout.lines().map(str::to_string).collect())
    }

    async fn add_changelog_entry(
        &self,
        branch: &str,
        packages: &[String],
        entry: &str,
    ) -> Result<String> {
        if packages.is_empty() {
            return Err(ObsError::NotFound(format!(
                "no packages to add a changelog entry to on {branch}"
            )));
        }
        let worktree = self.add_worktree(branch, branch).await?;

        let result = async {
            let commit = self.append_changelogs_in(&worktree.path, packages, entry).await?;
            self.push(&worktree.path, branch).await?;
            info!(branch, commit = %commit, "pushed changelog entries");
            Ok(commit)
        }
        .await;

        self.remove_worktree(worktree).await;
        result
    }

    async fn delete_branch(&self, branch: &str) -> Result<Removal> {
        let local = self
            .runner
            .output(self.git(&self.repo_dir).args(["branch", "-D", branch]))
            .await?;
        let remote = self
            .runner
            .output(self.git(&self.repo_dir).args([
                "push",
                self.remote.as_str(),
                "--delete",
                branch,
            ]))
            .await?;

        if local.success() {
            debug!(branch, "deleted local branch");
        }
        if remote.success() {
            info!(branch, "deleted branch");
            return Ok(Removal::Deleted);
        }
        if remote.stderr.contains("remote ref does not exist") {
            debug!(branch, "branch already absent");
            return Ok(Removal::AlreadyAbsent);
        }
        Err(ObsError::CommandFailed {
            command: remote.command,
            code: remote.exit_code,
            stderr: remote.stderr.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    /// A bare remote with a `sle15-sp7` branch and a clone of it.
    fn make_remote_and_clone() -> (TempDir, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let remote = root.path().join("remote.git");
        let seed = root.path().join("seed");
        let clone = root.path().join("clone");
        std::fs::create_dir_all(&remote).unwrap();
        std::fs::create_dir_all(seed.join("python-3.11")).unwrap();

        run_git(&remote, &["init", "--bare", "-q"]);
        run_git(&seed, &["init", "-q", "-b", "sle15-sp7"]);
        run_git(&seed, &["config", "user.name", "test-user"]);
        run_git(&seed, &["config", "user.email", "test@example.com"]);
        std::fs::write(seed.join("python-3.11/Dockerfile"), "FROM old\n").unwrap();
        std::fs::write(seed.join("python-3.11/python-3.11.changes"), "---\n").unwrap();
        std::fs::write(seed.join("_config"), "Prefer: x\n").unwrap();
        run_git(&seed, &["add", "."]);
        run_git(&seed, &["commit", "-q", "-m", "initial"]);
        run_git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        run_git(&seed, &["push", "-q", "origin", "sle15-sp7"]);

        run_git(
            root.path(),
            &["clone", "-q", remote.to_str().unwrap(), "clone"],
        );
        (root, clone)
    }

    fn recipes() -> RecipeSet {
        RecipeSet::new()
            .with_file("python-3.11/Dockerfile", "FROM new\n")
            .with_file("golang-1.22/Dockerfile", "FROM new\n")
    }

    #[test]
    fn looks_like_commit_accepts_hashes_only() {
        assert!(looks_like_commit("0123abcd"));
        assert!(looks_like_commit(&"a".repeat(40)));
        assert!(!looks_like_commit("sle15-sp7"));
        assert!(!looks_like_commit("abc"));
        assert!(!looks_like_commit("deadbeefcafe-7"));
        assert!(is_local_ref("HEAD"));
        assert!(!is_local_ref("main"));
    }

    #[test]
    fn numstat_is_parsed() {
        let changes = parse_numstat("4\t0\tpython-3.11/python-3.11.changes\n-\t-\tlogo.png\n");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].insertions, 4);
        assert_eq!(changes[0].top_level(), "python-3.11");
        assert_eq!(changes[1].insertions, 0);
    }

    #[tokio::test]
    async fn commit_recipes_is_idempotent() {
        let (_root, clone) = make_remote_and_clone();
        let repo = GitRecipeRepository::new(&clone);

        let first = repo
            .commit_recipes("staging-1", "sle15-sp7", &recipes(), "Test build")
            .await
            .unwrap()
            .expect("first commit");
        assert_eq!(first.len(), 40);
        assert_eq!(
            repo.remote_head("staging-1").await.unwrap().as_deref(),
            Some(first.as_str())
        );

        let second = repo
            .commit_recipes("staging-1", "staging-1", &recipes(), "Test build")
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn commit_keeps_changelogs_and_settings() {
        let (_root, clone) = make_remote_and_clone();
        let repo = GitRecipeRepository::new(&clone);
        let commit = repo
            .commit_recipes("staging-2", "sle15-sp7", &recipes(), "Test build")
            .await
            .unwrap()
            .unwrap();

        let changelog = repo
            .read_file(&commit, "python-3.11/python-3.11.changes")
            .await
            .unwrap();
        assert_eq!(changelog.as_deref(), Some(&b"---\n"[..]));
        assert!(repo.read_file(&commit, "missing").await.unwrap().is_none());

        let top = repo.list_top_level("staging-2").await.unwrap();
        assert_eq!(top, vec!["_config", "golang-1.22", "python-3.11"]);

        let mut changed: Vec<_> = repo
            .changed_files("sle15-sp7", &commit)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.path)
            .collect();
        changed.sort();
        assert_eq!(
            changed,
            vec!["golang-1.22/Dockerfile", "python-3.11/Dockerfile"]
        );
    }

    #[tokio::test]
    async fn remote_head_of_missing_branch_is_none() {
        let (_root, clone) = make_remote_and_clone();
        let repo = GitRecipeRepository::new(&clone);
        assert!(repo.remote_head("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_branch_twice() {
        let (_root, clone) = make_remote_and_clone();
        let repo = GitRecipeRepository::new(&clone);
        repo.commit_recipes("staging-3", "sle15-sp7", &recipes(), "Test build")
            .await
            .unwrap();

        assert_eq!(repo.delete_branch("staging-3").await.unwrap(), Removal::Deleted);
        assert_eq!(
            repo.delete_branch("staging-3").await.unwrap(),
            Removal::AlreadyAbsent
        );
        assert!(repo.remote_head("staging-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_remote_deletion_is_an_error() {
        let (root, clone) = make_remote_and_clone();
        let repo = GitRecipeRepository::new(&clone);
        repo.commit_recipes("staging-9", "sle15-sp7", &recipes(), "Test build")
            .await
            .unwrap();

        let gone = root.path().join("gone.git");
        run_git(&clone, &["remote", "set-url", "origin", gone.to_str().unwrap()]);

        let err = repo.delete_branch("staging-9").await.unwrap_err();
        assert!(matches!(err, ObsError::CommandFailed { .. }));
    }
}
