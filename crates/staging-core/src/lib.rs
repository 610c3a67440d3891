//! staging-core: scratch builds of recipe pull requests on the Open Build
//! Service
//!
//! ## Key Components
//!
//! - `StagingBot`: scratch build, wait, verdict and cleanup of one attempt
//! - `StagingAttempt`: the attempt and its lifecycle, persisted in the pull
//!   request comment or an env file
//! - `project_setup`: project names and `_meta` documents
//! - `build_result`: OBS results, the verdict and the markdown summary

pub mod attempt;
pub mod bot;
pub mod build_result;
pub mod comment;
pub mod config;
pub mod error;
pub mod os_version;
pub mod project_setup;
pub mod telemetry;

pub use attempt::{AttemptState, Resolution, StagingAttempt, ENV_FILE_NAME};
pub use bot::{
    container_urls_markdown, CleanupReport, Remotes, ScratchBuildOutcome, StagingBot, WaitOutcome,
    DEFAULT_COMMIT_MESSAGE,
};
pub use build_result::{
    aggregate, builds_finished, parse_results, render_summary, Arch, BuildQualityVerdict,
    BuildResult, BuildStatus,
};
pub use comment::{parse_comment, render_comment, CommentIdentifiers};
pub use config::{BotConfig, DEFAULT_POLL_INTERVAL, MAX_WAIT};
pub use error::StagingError;
pub use os_version::OsVersion;
pub use project_setup::{generate_meta, generate_project_name, ProjectType};
pub use telemetry::{init_tracing, level_from_verbosity};

/// Result type for staging-core operations
pub type Result<T> = std::result::Result<T, StagingError>;
