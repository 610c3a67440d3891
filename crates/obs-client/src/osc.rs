//! [`BuildService`] backed by the `osc` command line client.
//!
//! When credentials are passed explicitly, a private osc configuration is
//! written to a temporary file and osc's state (cookies, session) is kept in a
//! temporary `XDG_STATE_HOME`. Both are removed when the client is dropped.

use crate::command::{CommandOutput, CommandRunner, Invocation};
use crate::error::ObsError;
use crate::retry::RetryPolicy;
use crate::traits::{BuildService, Removal};
use crate::Result;
use async_trait::async_trait;
use std::io::Write;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

/// API endpoint of the openSUSE build service
pub const OBS_API_URL: &str = "https://api.opensuse.org";

/// Upper bound for a single `osc` call. `osc service wait` is the slowest.
const OSC_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// stderr fragments osc prints when a project or package does not exist
const NOT_FOUND_MARKERS: &[&str] = &["unknown_project", "unknown_package", "HTTP Error 404"];

/// Login for the build service.
#[derive(Clone)]
pub struct OscCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for OscCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OscCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Client for the build service that shells out to `osc`.
#[derive(Debug)]
pub struct OscClient {
    api_url: String,
    runner: CommandRunner,
    http: reqwest::Client,
    config_file: Option<NamedTempFile>,
    _state_dir: Option<TempDir>,
    meta_retry: RetryPolicy,
    read_retry: RetryPolicy,
}

impl OscClient {
    /// Use the osc configuration of the current user.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            runner: CommandRunner::new(),
            http: reqwest::Client::new(),
            config_file: None,
            _state_dir: None,
            meta_retry: RetryPolicy::any_error(3),
            read_retry: RetryPolicy::default(),
        }
    }

    /// Log in with `credentials` through a private configuration file.
    pub fn with_credentials(api_url: impl Into<String>, credentials: &OscCredentials) -> Result<Self> {
        let api_url = api_url.into();

        let mut config = tempfile::Builder::new()
            .prefix("oscrc-")
            .tempfile()?;
        write!(
            config,
            "[general]\napiurl = {api}\n[{api}]\nuser = {user}\npass = {pass}\naliases = obs\n",
            api = api_url,
            user = credentials.user,
            pass = credentials.password,
        )?;
        config.flush()?;

        let state_dir = tempfile::Builder::new().prefix("osc-state-").tempdir()?;
        let runner = CommandRunner::new()
            .with_env("XDG_STATE_HOME", state_dir.path().to_string_lossy().to_string());

        debug!(user = %credentials.user, "using private osc configuration");
        Ok(Self {
            runner,
            config_file: Some(config),
            _state_dir: Some(state_dir),
            ..Self::new(api_url)
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn osc(&self) -> Invocation {
        let invocation = Invocation::new("osc").timeout(OSC_TIMEOUT);
        match &self.config_file {
            Some(file) => invocation.arg(format!("--config={}", file.path().display())),
            None => invocation,
        }
    }

    async fn run(&self, invocation: Invocation) -> Result<CommandOutput> {
        self.runner.run(invocation).await
    }

    /// `osc meta <kind> --file=<tmp> <target..>`, retried on any error since
    /// OBS fails meta writes with internal errors under load.
    async fn write_meta(&self, kind: &str, targets: &[&str], contents: &str) -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        let path = file.path().display().to_string();

        self.meta_retry
            .run(&format!("osc meta {kind}"), || {
                let invocation = self
                    .osc()
                    .args(["meta", kind])
                    .arg(format!("--file={path}"))
                    .args(targets.iter().copied());
                async move { self.run(invocation).await.map(|_| ()) }
            })
            .await
    }
}

fn is_not_found(output: &CommandOutput) -> bool {
    NOT_FOUND_MARKERS.iter().any(|m| output.stderr.contains(m))
}

#[async_trait]
impl BuildService for OscClient {
    async fn project_exists(&self, project: &str) -> Result<bool> {
        let output = self
            .read_retry
            .run("osc meta prj", || async {
                let out = self
                    .runner
                    .output(self.osc().args(["meta", "prj", project]))
                    .await?;
                if out.success() || is_not_found(&out) {
                    Ok(out)
                } else {
                    Err(ObsError::CommandFailed {
                        command: out.command,
                        code: out.exit_code,
                        stderr: out.stderr.trim().to_string(),
                    })
                }
            })
            .await?;
        Ok(output.success())
    }

    async fn write_project_meta(&self, project: &str, meta: &str) -> Result<()> {
        info!(project, "writing project meta");
        self.write_meta("prj", &[project], meta).await
    }

    async fn write_project_config(&self, project: &str, prjconf: &str) -> Result<()> {
        info!(project, "writing project config");
        self.write_meta("prjconf", &[project], prjconf).await
    }

    async fn write_package_meta(&self, project: &str, package: &str, meta: &str) -> Result<()> {
        debug!(project, package, "writing package meta");
        self.write_meta("pkg", &[project, package], meta).await
    }

    async fn set_project_attribute(
        &self,
        project: &str,
        attribute: &str,
        value: &str,
    ) -> Result<()> {
        self.run(
            self.osc()
                .args(["meta", "attribute", project, "-a", attribute, "--set", value]),
        )
        .await
        .map(|_| ())
    }

    async fn wait_for_service(&self, project: &str, package: &str) -> Result<()> {
        debug!(project, package, "waiting for service run");
        self.run(self.osc().args(["service", "wait", project, package]))
            .await
            .map(|_| ())
    }

    async fn rebuild(&self, project: &str) -> Result<()> {
        info!(project, "wiping binaries and rebuilding");
        self.run(self.osc().args(["wipebinaries", "--all", project]))
            .await?;

        // osc picks up a package checkout from the working directory
        let scratch = tempfile::tempdir()?;
        self.run(
            self.osc()
                .args(["rebuild", "--all", project])
                .cwd(scratch.path()),
        )
        .await
        .map(|_| ())
    }

    async fn fetch_results(&self, project: &str, repositories: &[String]) -> Result<String> {
        self.read_retry
            .run("osc results", || {
                let invocation = self
                    .osc()
                    .args(["results", "--xml"])
                    .args(repositories.iter().map(|r| format!("--repo={r}")))
                    .arg(project);
                async move { self.run(invocation).await.map(|out| out.stdout) }
            })
            .await
    }

    async fn list_packages(&self, project: &str) -> Result<Vec<String>> {
        let out = self
            .read_retry
            .run("osc ls", || async {
                self.run(self.osc().args(["ls", project])).await
            })
            .await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn fetch_project_config(&self, project: &str) -> Result<String> {
        let url = format!("{}/public/source/{}/_config", self.api_url, project);
        self.read_retry
            .run("fetch prjconf", || async {
                let response = self.http.get(&url).send().await?;
                let status = response.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(ObsError::NotFound(project.to_string()));
                }
                if !status.is_success() {
                    return Err(ObsError::HttpStatus {
                        url: url.clone(),
                        status: status.as_u16(),
                    });
                }
                Ok(response.text().await?)
            })
            .await
    }

    async fn delete_project(&self, project: &str) -> Result<Removal> {
        let out = self
            .runner
            .output(
                self.osc()
                    .args(["rdelete", "-m", "cleanup", "--recursive", "--force", project]),
            )
            .await?;

        if out.success() {
            info!(project, "deleted project");
            Ok(Removal::Deleted)
        } else if is_not_found(&out) {
            debug!(project, "project already absent");
            Ok(Removal::AlreadyAbsent)
        } else {
            Err(ObsError::CommandFailed {
                command: out.command,
                code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            })
        }
    }
}
