//! The staging bot: drives one [`StagingAttempt`] through its lifecycle
//! against the build service, the recipe repository and the registry.

use futures::future::OptionFuture;
use obs_client::{
    is_package_dir, BuildService, ContainerRegistry, ObsError, RecipeRepository, RecipeSet,
    Removal, RetryPolicy,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::attempt::{AttemptState, Resolution, StagingAttempt};
use crate::build_result::{
    aggregate, builds_finished, has_package_results, parse_results, render_summary,
    BuildQualityVerdict, BuildResult,
};
use crate::config::{BotConfig, MAX_WAIT};
use crate::error::StagingError;
use crate::project_setup::{
    self, devel_prjconf, generate_meta, generate_project_name, write_package_metas, ProjectType,
    OSRT_CONFIG,
};
use crate::Result;

/// Commit message when none is given.
pub const DEFAULT_COMMIT_MESSAGE: &str = "Test build";

/// Remote collaborators of the bot.
#[derive(Clone)]
pub struct Remotes {
    pub obs: Arc<dyn BuildService>,
    pub git: Arc<dyn RecipeRepository>,
    pub registry: Arc<dyn ContainerRegistry>,
}

/// Result of [`StagingBot::scratch_build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScratchBuildOutcome {
    /// The recipes are identical to the base or touch no package. Nothing
    /// was created on OBS.
    NoChanges,
    Created(StagingAttempt),
}

/// Result of [`StagingBot::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Finished(Vec<BuildResult>),
    /// Results seen at the last poll.
    TimedOut(Vec<BuildResult>),
}

/// What [`StagingBot::cleanup`] removed. `None` means not requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub branch: Option<Removal>,
    pub project: Option<Removal>,
}

pub struct StagingBot {
    config: BotConfig,
    remotes: Remotes,
    attempt: StagingAttempt,
    push_retry: RetryPolicy,
}

impl std::fmt::Debug for StagingBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBot")
            .field("config", &self.config)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl StagingBot {
    /// A fresh attempt on the branch derived from `config`.
    pub fn new(config: BotConfig, remotes: Remotes) -> Result<Self> {
        config.validate()?;
        let branch = config.derive_branch_name();
        let attempt = StagingAttempt::new(config.os_version, &config.osc_user, &branch)?;
        Ok(Self::with_attempt(config, remotes, attempt))
    }

    /// An attempt whose branch and project were set up by an earlier run.
    /// The branch must be named by the configuration.
    pub fn attach(config: BotConfig, remotes: Remotes) -> Result<Self> {
        config.validate()?;
        let branch = config.configured_branch_name().ok_or_else(|| {
            StagingError::Config(
                "no staging attempt given, set a branch name or run id, or load the attempt"
                    .to_string(),
            )
        })?;
        let mut attempt = StagingAttempt::new(config.os_version, &config.osc_user, &branch)?;
        attempt.state = AttemptState::Committed;
        Ok(Self::with_attempt(config, remotes, attempt))
    }

    /// Continue a recovered attempt. It must belong to the configured OS
    /// version and user.
    pub fn resume(config: BotConfig, remotes: Remotes, attempt: StagingAttempt) -> Result<Self> {
        config.validate()?;
        if attempt.os_version != config.os_version || attempt.osc_user != config.osc_user {
            return Err(StagingError::Config(format!(
                "attempt for {} ({}) does not match the configured {} ({})",
                attempt.os_version, attempt.osc_user, config.os_version, config.osc_user
            )));
        }
        info!(
            branch = %attempt.branch_name,
            project = %attempt.project_name,
            "resuming staging attempt"
        );
        Ok(Self::with_attempt(config, remotes, attempt))
    }

    /// Recover the attempt from the bot's pull request comment.
    pub fn from_comment(config: BotConfig, remotes: Remotes, comment: &str) -> Result<Self> {
        let attempt = StagingAttempt::from_comment(comment, &config.osc_user)?;
        Self::resume(config, remotes, attempt)
    }

    fn with_attempt(config: BotConfig, remotes: Remotes, attempt: StagingAttempt) -> Self {
        Self {
            config,
            remotes,
            attempt,
            push_retry: RetryPolicy::any_error(3),
        }
    }

    /// Retry policy for pushes that may race with other jobs.
    pub fn with_push_retry(mut self, policy: RetryPolicy) -> Self {
        self.push_retry = policy;
        self
    }

    pub fn attempt(&self) -> &StagingAttempt {
        &self.attempt
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Push `recipes` to the staging branch, set up the staging project for
    /// the changed packages and trigger their builds.
    #[instrument(skip_all, fields(branch = %self.attempt.branch_name))]
    pub async fn scratch_build(
        &mut self,
        recipes: &RecipeSet,
        commit_message: &str,
    ) -> Result<ScratchBuildOutcome> {
        let Some(commit) = self.push_recipes(recipes, commit_message).await? else {
            info!("recipes are unchanged, nothing to build");
            return Ok(ScratchBuildOutcome::NoChanges);
        };

        let deployment = self.attempt.deployment_branch();
        let staged = recipes.package_names();
        let packages: Vec<String> = self
            .remotes
            .git
            .changed_packages(&deployment, &commit)
            .await?
            .into_iter()
            .filter(|package| staged.contains(package))
            .collect();
        if packages.is_empty() {
            info!(%commit, "no package differs from {}, nothing to build", deployment);
            return Ok(ScratchBuildOutcome::NoChanges);
        }
        info!(count = packages.len(), "staging packages: {}", packages.join(", "));

        self.setup_staging_project(&packages).await?;

        for package in &packages {
            self.remotes
                .obs
                .wait_for_service(&self.attempt.project_name, package)
                .await?;
        }
        self.remotes.obs.rebuild(&self.attempt.project_name).await?;
        self.attempt.advance(AttemptState::Committed)?;

        self.write_env_file().await?;
        Ok(ScratchBuildOutcome::Created(self.attempt.clone()))
    }

    /// Commit `recipes` to the staging branch without touching OBS.
    /// Returns the new commit, `None` if the recipes are unchanged.
    pub async fn commit_state(
        &mut self,
        recipes: &RecipeSet,
        commit_message: &str,
    ) -> Result<Option<String>> {
        let commit = self.push_recipes(recipes, commit_message).await?;
        if commit.is_some() {
            self.write_env_file().await?;
        }
        Ok(commit)
    }

    async fn push_recipes(
        &mut self,
        recipes: &RecipeSet,
        commit_message: &str,
    ) -> Result<Option<String>> {
        self.attempt.state.check_transition(AttemptState::Branched)?;

        let branch = self.attempt.branch_name.clone();
        let deployment = self.attempt.deployment_branch();
        if branch == deployment {
            return Err(StagingError::Config(format!(
                "refusing to stage on the deployment branch {deployment}"
            )));
        }

        let base = match self.remotes.git.remote_head(&branch).await? {
            Some(head) => {
                info!(%branch, %head, "branch exists, committing on top of it");
                branch.clone()
            }
            None => deployment,
        };

        let message = match commit_message.trim() {
            "" => DEFAULT_COMMIT_MESSAGE,
            message => message,
        };
        let commit = self
            .remotes
            .git
            .commit_recipes(&branch, &base, recipes, message)
            .await?;

        if let Some(commit) = &commit {
            self.attempt.advance(AttemptState::Branched)?;
            self.attempt.commit_hash = Some(commit.clone());
            info!(%branch, %commit, "pushed recipes");
        }
        Ok(commit)
    }

    async fn setup_staging_project(&mut self, packages: &[String]) -> Result<()> {
        let project = project_setup::create_staging_project(
            self.remotes.obs.as_ref(),
            self.remotes.git.as_ref(),
            self.attempt.os_version,
            &self.attempt.osc_user,
            &self.attempt.branch_name,
        )
        .await?;
        write_package_metas(
            self.remotes.obs.as_ref(),
            &project,
            packages,
            &self.attempt.branch_name,
        )
        .await?;

        self.attempt.advance(AttemptState::ProjectCreated)?;
        self.attempt.packages = packages.to_vec();
        Ok(())
    }

    /// Create the staging project for everything the branch changes,
    /// without committing or rebuilding.
    pub async fn create_staging_project(&mut self) -> Result<String> {
        self.attempt
            .state
            .check_transition(AttemptState::ProjectCreated)?;

        let branch = &self.attempt.branch_name;
        if self.remotes.git.remote_head(branch).await?.is_none() {
            return Err(StagingError::Config(format!(
                "branch {branch} does not exist, commit the recipes first"
            )));
        }
        let packages: Vec<String> = self
            .remotes
            .git
            .changed_packages(&self.attempt.deployment_branch(), branch)
            .await?
            .into_iter()
            .collect();

        self.setup_staging_project(&packages).await?;
        self.write_env_file().await?;
        Ok(self.attempt.project_name.clone())
    }

    /// Wipe the binaries of the staging project and build everything again.
    pub async fn rebuild(&mut self) -> Result<()> {
        self.attempt.state.check_transition(AttemptState::Committed)?;
        self.remotes.obs.rebuild(&self.attempt.project_name).await?;
        self.attempt.advance(AttemptState::Committed)?;
        info!(project = %self.attempt.project_name, "triggered rebuild");
        Ok(())
    }

    /// Poll the build results until every package has a final result or
    /// `timeout` elapsed. A zero timeout polls exactly once.
    #[instrument(skip_all, fields(project = %self.attempt.project_name))]
    pub async fn wait(&mut self, poll_interval: Duration, timeout: Duration) -> Result<WaitOutcome> {
        if poll_interval.is_zero() {
            return Err(StagingError::Config(
                "poll interval must be positive".to_string(),
            ));
        }
        self.attempt.advance(AttemptState::Polling)?;

        let timeout = timeout.min(MAX_WAIT);
        let deadline = Instant::now() + timeout;
        let mut polls = 0usize;

        loop {
            let results = self.fetch_build_results().await?;
            polls += 1;

            if builds_finished(&results) {
                let verdict = aggregate(&results);
                if let Some(resolution) = Resolution::from_verdict(verdict) {
                    self.attempt.advance(AttemptState::Resolved(resolution))?;
                    info!(polls, "builds finished: {}", verdict);
                    return Ok(WaitOutcome::Finished(results));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(polls, "builds did not finish within {:?}", timeout);
                return Ok(WaitOutcome::TimedOut(results));
            }
            debug!(polls, rows = results.len(), "builds not final yet");
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Current rows of the staging repositories.
    pub async fn fetch_build_results(&self) -> Result<Vec<BuildResult>> {
        let xml = self
            .remotes
            .obs
            .fetch_results(&self.attempt.project_name, &self.attempt.repositories)
            .await?;
        parse_results(&xml)
    }

    /// Markdown summary of the current build results.
    pub async fn query_build_result(&self) -> Result<String> {
        Ok(render_summary(&self.fetch_build_results().await?))
    }

    /// Verdict of the current build results with the rows it is based on.
    pub async fn get_build_quality(&self) -> Result<(BuildQualityVerdict, Vec<BuildResult>)> {
        let results = self.fetch_build_results().await?;
        if !has_package_results(&results) {
            return Err(StagingError::NoBuildResults(
                self.attempt.project_name.clone(),
            ));
        }
        Ok((aggregate(&results), results))
    }

    /// Delete the staging branch and/or the staging project. Things that are
    /// already gone are reported as such. Both deletions are attempted even
    /// if one fails.
    #[instrument(skip_all, fields(branch = %self.attempt.branch_name))]
    pub async fn cleanup(&mut self, branches: bool, project: bool) -> Result<CleanupReport> {
        let branch = self.attempt.branch_name.clone();
        if branches && branch == self.attempt.deployment_branch() {
            return Err(StagingError::Config(format!(
                "refusing to delete the deployment branch {branch}"
            )));
        }

        let git = Arc::clone(&self.remotes.git);
        let obs = Arc::clone(&self.remotes.obs);
        let project_name = self.attempt.project_name.clone();

        let delete_branch: OptionFuture<_> = branches
            .then(|| async move { git.delete_branch(&branch).await })
            .into();
        let delete_project: OptionFuture<_> = project
            .then(|| async move { obs.delete_project(&project_name).await })
            .into();
        let (branch_removal, project_removal) = futures::join!(delete_branch, delete_project);

        let report = CleanupReport {
            branch: branch_removal.transpose()?,
            project: project_removal.transpose()?,
        };
        self.attempt.advance(AttemptState::CleanedUp)?;
        info!(?report, "cleaned up");
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Maintenance commands
    // -----------------------------------------------------------------------

    /// Write the continuous rebuild project meta.
    pub async fn create_cr_project(&self) -> Result<String> {
        let (project, meta) = generate_meta(
            self.config.os_version,
            ProjectType::ContinuousRebuild,
            &self.config.osc_user,
            None,
        )?;
        self.remotes.obs.write_project_meta(&project, &meta).await?;
        info!(%project, "wrote continuous rebuild project meta");
        Ok(project)
    }

    /// Configure the devel project: meta, prjconf from the deployment branch
    /// and the release tooling attribute.
    pub async fn setup_obs_project(&self) -> Result<String> {
        let os_version = self.config.os_version;
        let (project, meta) =
            generate_meta(os_version, ProjectType::Devel, &self.config.osc_user, None)?;
        let prjconf = devel_prjconf(self.remotes.git.as_ref(), os_version).await?;

        let obs = &self.remotes.obs;
        obs.write_project_meta(&project, &meta).await?;
        obs.write_project_config(&project, &prjconf).await?;
        obs.set_project_attribute(&project, "OSRT:Config", OSRT_CONFIG)
            .await?;
        info!(%project, "configured devel project");
        Ok(project)
    }

    /// Create or reconfigure `packages` in the devel project, each synced
    /// from its directory on the deployment branch.
    pub async fn setup_obs_package(&self, packages: &[String]) -> Result<String> {
        if packages.is_empty() {
            return Err(StagingError::Config("no package given".to_string()));
        }
        let os_version = self.config.os_version;
        let deployment = os_version.deployment_branch_name();
        let valid: BTreeSet<String> = self
            .remotes
            .git
            .list_top_level(&deployment)
            .await?
            .into_iter()
            .filter(|entry| is_package_dir(entry))
            .collect();

        let unknown: Vec<&str> = packages
            .iter()
            .map(String::as_str)
            .filter(|package| !valid.contains(*package))
            .collect();
        if !unknown.is_empty() {
            return Err(StagingError::Config(format!(
                "{} not a package of {}, expected one of {}",
                unknown.join(", "),
                os_version,
                valid.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        let devel = generate_project_name(os_version, ProjectType::Devel, "", None)?;
        write_package_metas(self.remotes.obs.as_ref(), &devel, packages, &deployment).await?;
        info!(project = %devel, "configured packages: {}", packages.join(", "));
        Ok(devel)
    }

    /// Add `entry` to the changelogs on `for-deploy-<deployment branch>`.
    /// Without `packages` every package that differs from the deployment
    /// branch gets the entry.
    pub async fn add_changelog_entry(&self, entry: &str, packages: &[String]) -> Result<String> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(StagingError::Config("changelog entry is empty".to_string()));
        }

        let deployment = self.config.os_version.deployment_branch_name();
        let branch = format!("for-deploy-{deployment}");
        let packages: Vec<String> = if packages.is_empty() {
            self.remotes
                .git
                .changed_packages(&deployment, &branch)
                .await?
                .into_iter()
                .collect()
        } else {
            packages.to_vec()
        };
        if packages.is_empty() {
            return Err(StagingError::Config(format!(
                "no packages differ between {branch} and {deployment}"
            )));
        }

        let git = self.remotes.git.as_ref();
        let (target, names) = (branch.as_str(), packages.as_slice());
        let commit = self
            .push_retry
            .run("add changelog entry", move || {
                git.add_changelog_entry(target, names, entry)
            })
            .await?;
        info!(%branch, %commit, "added changelog entry to {}", packages.join(", "));
        Ok(commit)
    }

    /// Packages changed in `base..head` that did not get a changelog entry.
    pub async fn changelog_check(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let missing = self
            .remotes
            .git
            .packages_without_changelog(base, head)
            .await?;
        for package in &missing {
            warn!(%package, "no changelog entry");
        }
        Ok(missing)
    }

    /// Packages in the deployment branch that the devel project lacks.
    pub async fn find_missing_packages(&self) -> Result<Vec<String>> {
        let os_version = self.config.os_version;
        let devel = generate_project_name(os_version, ProjectType::Devel, "", None)?;
        let on_obs: BTreeSet<String> = self
            .remotes
            .obs
            .list_packages(&devel)
            .await?
            .into_iter()
            .collect();

        let mut missing: Vec<String> = self
            .remotes
            .git
            .list_top_level(&os_version.deployment_branch_name())
            .await?
            .into_iter()
            .filter(|entry| is_package_dir(entry) && !on_obs.contains(entry))
            .collect();
        missing.sort();
        missing.dedup();
        Ok(missing)
    }

    /// Pull urls of the images the staging project published, one per
    /// image, preferring the `latest` tag.
    pub async fn get_container_urls(&self) -> Result<Vec<String>> {
        let registry = &self.remotes.registry;
        let prefix = registry_prefix(&self.attempt.project_name);

        let mut urls = Vec::new();
        for repository in registry.catalog().await? {
            if !repository.starts_with(&prefix) {
                continue;
            }
            let tags = registry.tags(&repository).await?;
            let tag = tags
                .iter()
                .find(|tag| tag.as_str() == "latest")
                .or_else(|| tags.first());
            match tag {
                Some(tag) => urls.push(format!("{}/{repository}:{tag}", registry.hostname())),
                None => debug!(%repository, "no tags"),
            }
        }

        if urls.is_empty() {
            return Err(StagingError::RemoteService(ObsError::NotFound(format!(
                "images of {} below {}/{prefix}",
                self.attempt.project_name,
                registry.hostname()
            ))));
        }
        Ok(urls)
    }

    async fn write_env_file(&self) -> Result<()> {
        if let Some(path) = &self.config.env_file {
            self.attempt.write_env_file(path).await?;
        }
        Ok(())
    }
}

/// Registry path below which OBS publishes the images of `project`.
pub fn registry_prefix(project: &str) -> String {
    project.to_lowercase().replace(':', "/")
}

/// Collapsible markdown list of pull urls for the pull request.
pub fn container_urls_markdown(urls: &[String]) -> String {
    let mut out =
        String::from("<details><summary>The following images can be pulled from the staging project:</summary>\n\n");
    for url in urls {
        out.push_str(&format!("- `{url}`\n"));
    }
    out.push_str("</details>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_of_staging_project() {
        assert_eq!(
            registry_prefix("home:bci-bot:BCI:Staging:SLE-15-SP7:sle15-sp7-42"),
            "home/bci-bot/bci/staging/sle-15-sp7/sle15-sp7-42"
        );
    }

    #[test]
    fn urls_markdown() {
        let md = container_urls_markdown(&[
            "registry.opensuse.org/a/b:latest".to_string(),
            "registry.opensuse.org/a/c:1.0".to_string(),
        ]);
        assert!(md.starts_with("<details><summary>"));
        assert!(md.contains("- `registry.opensuse.org/a/b:latest`\n- `registry.opensuse.org/a/c:1.0`\n"));
        assert!(md.ends_with("</details>"));
    }
}
