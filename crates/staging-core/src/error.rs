//! Error types for staging-core

use obs_client::ObsError;
use thiserror::Error;

use crate::attempt::AttemptState;

/// Errors of the staging bot
#[derive(Error, Debug)]
pub enum StagingError {
    /// A call to OBS, git or the registry failed
    #[error("remote service error: {0}")]
    RemoteService(#[from] ObsError),

    /// OBS reported a package status outside the known vocabulary
    #[error("unmapped build status '{status}' for {package} in {repository}/{arch}")]
    UnmappedStatus {
        status: String,
        package: String,
        repository: String,
        arch: String,
    },

    /// OBS reported an architecture we do not build for
    #[error("unknown architecture '{0}'")]
    UnknownArch(String),

    /// A bot comment or env file could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Malformed XML from OBS
    #[error("XML error: {0}")]
    Xml(String),

    /// The attempt is not in a state that allows the requested step
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: AttemptState, to: AttemptState },

    /// The project has no package with a build result
    #[error("{0} has no packages with build results")]
    NoBuildResults(String),

    /// Incomplete or invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Project meta template failed to render
    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::DeError> for StagingError {
    fn from(err: quick_xml::DeError) -> Self {
        StagingError::Xml(err.to_string())
    }
}
