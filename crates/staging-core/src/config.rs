//! Bot configuration, built once by the binary and handed to the bot.

use obs_client::{OscCredentials, OBS_API_URL, OPENSUSE_REGISTRY};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StagingError;
use crate::os_version::OsVersion;
use crate::Result;

/// Interval between two result polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Longest a `wait` may block.
pub const MAX_WAIT: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub os_version: OsVersion,
    pub osc_user: String,
    /// Needed by every command that talks to OBS.
    pub credentials: Option<OscCredentials>,
    /// Explicit branch name, wins over `run_id`.
    pub branch_name: Option<String>,
    /// CI run identifier used for the branch name.
    pub run_id: Option<String>,
    /// Local checkout of the recipe repository.
    pub repo_dir: PathBuf,
    /// Rendered recipes to stage.
    pub recipes_dir: Option<PathBuf>,
    /// Where the attempt is written after a scratch build.
    pub env_file: Option<PathBuf>,
    pub api_url: String,
    pub registry: String,
    pub poll_interval: Duration,
}

impl BotConfig {
    pub fn new(os_version: OsVersion, osc_user: impl Into<String>) -> Self {
        Self {
            os_version,
            osc_user: osc_user.into(),
            credentials: None,
            branch_name: None,
            run_id: None,
            repo_dir: PathBuf::from("."),
            recipes_dir: None,
            env_file: None,
            api_url: OBS_API_URL.to_string(),
            registry: OPENSUSE_REGISTRY.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_credentials(mut self, password: impl Into<String>) -> Self {
        self.credentials = Some(OscCredentials {
            user: self.osc_user.clone(),
            password: password.into(),
        });
        self
    }

    pub fn with_branch_name(mut self, branch_name: impl Into<String>) -> Self {
        self.branch_name = Some(branch_name.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_repo_dir(mut self, repo_dir: impl Into<PathBuf>) -> Self {
        self.repo_dir = repo_dir.into();
        self
    }

    pub fn with_recipes_dir(mut self, recipes_dir: impl Into<PathBuf>) -> Self {
        self.recipes_dir = Some(recipes_dir.into());
        self
    }

    pub fn with_env_file(mut self, env_file: impl Into<PathBuf>) -> Self {
        self.env_file = Some(env_file.into());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.osc_user.trim().is_empty() {
            return Err(StagingError::Config("osc user must not be empty".to_string()));
        }
        if self.osc_user.contains(':') || self.osc_user.contains(char::is_whitespace) {
            return Err(StagingError::Config(format!(
                "invalid osc user '{}'",
                self.osc_user
            )));
        }
        if let Some(branch) = &self.branch_name {
            validate_branch_name(branch)?;
        }
        if self.poll_interval.is_zero() {
            return Err(StagingError::Config(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Credentials or a `Config` error naming the missing variable.
    pub fn require_credentials(&self) -> Result<&OscCredentials> {
        self.credentials
            .as_ref()
            .filter(|c| !c.password.is_empty())
            .ok_or_else(|| StagingError::Config("OSC_PASSWORD is not set".to_string()))
    }

    /// Branch named by the configuration: the explicit name, else
    /// `<deployment branch>-<run id>`.
    pub fn configured_branch_name(&self) -> Option<String> {
        if let Some(branch) = self.branch_name.as_deref().filter(|b| !b.is_empty()) {
            return Some(branch.to_string());
        }
        self.run_id
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|run_id| format!("{}-{run_id}", self.os_version.deployment_branch_name()))
    }

    /// Branch for a new attempt: the configured branch, else a random suffix.
    pub fn derive_branch_name(&self) -> String {
        self.configured_branch_name().unwrap_or_else(|| {
            let random = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-{}", self.os_version.deployment_branch_name(), &random[..8])
        })
    }
}

/// Branch names end up in OBS project names and git refs.
fn validate_branch_name(branch: &str) -> Result<()> {
    let invalid = branch.is_empty()
        || branch.starts_with('-')
        || branch.contains("..")
        || branch
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '~' | '^' | '?' | '*' | '[' | '\\'));
    if invalid {
        return Err(StagingError::Config(format!(
            "invalid branch name '{branch}'"
        )));
    }
    Ok(())
}
