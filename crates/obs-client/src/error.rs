//! Error types for obs-client

use thiserror::Error;

/// Errors that can occur while talking to OBS, git or the container registry
#[derive(Error, Debug)]
pub enum ObsError {
    /// The executable could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A command exited with a non-zero status
    #[error("command `{command}` failed with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// A command did not finish in time
    #[error("command `{command}` timed out after {seconds} seconds")]
    Timeout { command: String, seconds: u64 },

    /// Requested object does not exist on the remote
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error (registry and public OBS routes)
    #[error("HTTP error: {0}")]
    Http(String),

    /// HTTP reply with an error status
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },
}

impl From<reqwest::Error> for ObsError {
    fn from(err: reqwest::Error) -> Self {
        ObsError::Http(err.to_string())
    }
}

/// stderr fragments that osc and git print when the connection dropped
const TRANSIENT_MARKERS: &[&str] = &[
    "Connection reset by peer",
    "Network is unreachable",
    "Temporary failure in name resolution",
    "Connection timed out",
    "503 Service Unavailable",
    "502 Bad Gateway",
    "Could not resolve host",
];

impl ObsError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ObsError::Timeout { .. } | ObsError::Http(_) => true,
            ObsError::HttpStatus { status, .. } => *status >= 500,
            ObsError::CommandFailed { stderr, .. } => {
                TRANSIENT_MARKERS.iter().any(|m| stderr.contains(m))
            }
            _ => false,
        }
    }
}
