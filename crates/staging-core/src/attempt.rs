//! A staging attempt and its lifecycle.
//!
//! ```text
//! Uninitialized -> Branched -> ProjectCreated -> Committed -> Polling -> Resolved(Pass|Fail)
//!                                                                          |
//!       (any state) ------------------------------------------------> CleanedUp
//! ```
//!
//! Attempts recovered from a pull request comment or an env file start in
//! `Committed`. Pushing a new commit to a recovered or resolved attempt moves
//! it back to `Branched`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::build_result::BuildQualityVerdict;
use crate::comment::{parse_comment, render_comment};
use crate::error::StagingError;
use crate::os_version::OsVersion;
use crate::project_setup::{generate_project_name, obs_project_url, staging_repositories, ProjectType};
use crate::Result;

/// Default name of the env file handed between CI jobs.
pub const ENV_FILE_NAME: &str = "test-build.env";

/// Final outcome of a staging build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Pass,
    Fail,
}

impl Resolution {
    /// `None` while the builds are not final.
    pub fn from_verdict(verdict: BuildQualityVerdict) -> Option<Self> {
        match verdict {
            BuildQualityVerdict::Pass => Some(Resolution::Pass),
            BuildQualityVerdict::Fail => Some(Resolution::Fail),
            BuildQualityVerdict::NotFinal => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Uninitialized,
    Branched,
    ProjectCreated,
    Committed,
    Polling,
    Resolved(Resolution),
    CleanedUp,
}

impl AttemptState {
    /// Whether `self -> next` is a step of the lifecycle.
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;

        match (self, next) {
            (_, CleanedUp) => true,
            (CleanedUp, _) => false,
            (Uninitialized, Branched) => true,
            (Uninitialized | Branched, ProjectCreated) => true,
            (ProjectCreated, Committed) => true,
            // new commit on an existing branch
            (Committed | Resolved(_), Branched) => true,
            // rebuild
            (Committed | Polling | Resolved(_), Committed) => true,
            (Committed | Polling | Resolved(_), Polling) => true,
            (Polling, Resolved(_)) => true,
            _ => false,
        }
    }

    pub fn check_transition(self, next: AttemptState) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(StagingError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Uninitialized => f.write_str("uninitialized"),
            AttemptState::Branched => f.write_str("branched"),
            AttemptState::ProjectCreated => f.write_str("project_created"),
            AttemptState::Committed => f.write_str("committed"),
            AttemptState::Polling => f.write_str("polling"),
            AttemptState::Resolved(Resolution::Pass) => f.write_str("resolved(pass)"),
            AttemptState::Resolved(Resolution::Fail) => f.write_str("resolved(fail)"),
            AttemptState::CleanedUp => f.write_str("cleaned_up"),
        }
    }
}

/// One scratch build of a pull request for one OS version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingAttempt {
    pub os_version: OsVersion,
    pub osc_user: String,
    pub branch_name: String,
    pub project_name: String,
    pub commit_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Packages placed into the staging project.
    pub packages: Vec<String>,
    /// Repositories whose results are evaluated.
    pub repositories: Vec<String>,
    pub state: AttemptState,
}

impl StagingAttempt {
    pub fn new(os_version: OsVersion, osc_user: &str, branch_name: &str) -> Result<Self> {
        let project_name =
            generate_project_name(os_version, ProjectType::Staging, osc_user, Some(branch_name))?;
        Ok(Self {
            os_version,
            osc_user: osc_user.to_string(),
            branch_name: branch_name.to_string(),
            project_name,
            commit_hash: None,
            created_at: Utc::now(),
            packages: Vec::new(),
            repositories: staging_repositories(os_version),
            state: AttemptState::Uninitialized,
        })
    }

    pub fn deployment_branch(&self) -> String {
        self.os_version.deployment_branch_name()
    }

    pub fn project_url(&self) -> String {
        obs_project_url(&self.project_name)
    }

    /// Move to `next`, or fail with `InvalidTransition`.
    pub fn advance(&mut self, next: AttemptState) -> Result<()> {
        self.state.check_transition(next)?;
        debug!(branch = %self.branch_name, "attempt {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Pull request comment announcing this attempt. Needs a commit.
    pub fn render_comment(&self) -> Result<String> {
        let commit = self.commit_hash.as_deref().ok_or_else(|| {
            StagingError::Config(format!(
                "no commit has been pushed to {} yet",
                self.branch_name
            ))
        })?;
        Ok(render_comment(
            self.os_version,
            &self.project_name,
            &self.branch_name,
            commit,
        ))
    }

    /// Recover an attempt from the bot's own comment.
    ///
    /// The project name in the comment must be the one `osc_user` would
    /// have created for the decoded branch.
    pub fn from_comment(text: &str, osc_user: &str) -> Result<Self> {
        let ids = parse_comment(text)?;
        let mut attempt = Self::new(ids.os_version, osc_user, &ids.branch_name)
            .map_err(|err| StagingError::Parse(err.to_string()))?;

        if attempt.project_name != ids.project_name {
            return Err(StagingError::Parse(format!(
                "comment names project {} but {} would be {}",
                ids.project_name, osc_user, attempt.project_name
            )));
        }

        attempt.commit_hash = ids.commit_hash;
        attempt.state = AttemptState::Committed;
        Ok(attempt)
    }

    /// `KEY=VALUE` lines that bash can source.
    pub fn to_env_file(&self) -> String {
        let packages = if self.packages.is_empty() {
            "None".to_string()
        } else {
            self.packages.join(",")
        };
        let lines = [
            ("BRANCH_NAME", self.branch_name.clone()),
            ("OS_VERSION", self.os_version.to_string()),
            ("OS_VERSION_PRETTY", self.os_version.pretty_print()),
            ("OSC_USER", self.osc_user.clone()),
            ("DEPLOYMENT_BRANCH_NAME", self.deployment_branch()),
            ("PROJECT_NAME", self.project_name.clone()),
            ("PROJECT_URL", self.project_url()),
            ("REPOSITORIES", self.repositories.join(",")),
            ("PACKAGES", packages),
            ("COMMIT_HASH", self.commit_hash.clone().unwrap_or_default()),
            ("CREATED_AT", self.created_at.to_rfc3339()),
        ];

        lines
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect()
    }

    /// Inverse of [`StagingAttempt::to_env_file`]. Unknown keys are ignored.
    pub fn from_env_file(contents: &str) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                StagingError::Parse(format!("line {} is not KEY=VALUE: {line}", lineno + 1))
            })?;
            values.insert(key.trim(), value.trim());
        }

        let required = |key: &str| {
            values
                .get(key)
                .copied()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| StagingError::Parse(format!("env file has no {key}")))
        };

        let os_version: OsVersion = required("OS_VERSION")?
            .parse()
            .map_err(|err: StagingError| StagingError::Parse(err.to_string()))?;
        let mut attempt = Self::new(os_version, required("OSC_USER")?, required("BRANCH_NAME")?)
            .map_err(|err| StagingError::Parse(err.to_string()))?;

        if let Some(project) = values.get("PROJECT_NAME").filter(|p| !p.is_empty()) {
            if *project != attempt.project_name {
                return Err(StagingError::Parse(format!(
                    "env file names project {project}, expected {}",
                    attempt.project_name
                )));
            }
        }

        attempt.packages = split_list(values.get("PACKAGES").copied());
        let repositories = split_list(values.get("REPOSITORIES").copied());
        if !repositories.is_empty() {
            attempt.repositories = repositories;
        }
        attempt.commit_hash = values
            .get("COMMIT_HASH")
            .filter(|c| !c.is_empty())
            .map(|c| c.to_string());
        if let Some(created_at) = values.get("CREATED_AT").filter(|c| !c.is_empty()) {
            attempt.created_at = DateTime::parse_from_rfc3339(created_at)
                .map_err(|err| StagingError::Parse(format!("CREATED_AT: {err}")))?
                .with_timezone(&Utc);
        }
        attempt.state = AttemptState::Committed;
        Ok(attempt)
    }

    pub async fn write_env_file(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.to_env_file()).await?;
        debug!(path = %path.display(), "wrote env file");
        Ok(())
    }

    pub async fn load_env_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_env_file(&contents)
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    match value {
        None | Some("") | Some("None") => Vec::new(),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
    }
}
