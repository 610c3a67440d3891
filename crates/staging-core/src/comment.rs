//! The bot's pull request comment, which is the only place a staging
//! attempt is persisted between CI jobs.
//!
//! ```text
//! Created a staging project on OBS for 7: [home:bot:BCI:Staging:SLE-15-SP7:sle15-sp7-42](https://build.opensuse.org/project/show/...)
//! Changes pushed to branch [`sle15-sp7-42`](https://github.com/...) in commit [0a1b2c3...](https://github.com/...)
//! ```
//!
//! Both directions live here and share [`COMMENT_PATTERN`]. Older comments
//! without the commit part are still accepted.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::StagingError;
use crate::os_version::OsVersion;
use crate::project_setup::{branch_url, commit_url, obs_project_url};
use crate::Result;

pub const CREATED_PREFIX: &str = "Created a staging project on OBS for ";
pub const PUSHED_PREFIX: &str = "Changes pushed to branch ";

/// Schema of the first two lines of a bot comment.
pub const COMMENT_PATTERN: &str = concat!(
    r"(?m)^Created a staging project on OBS for (?P<os>[^:\s]+): ",
    r"\[(?P<project>[^\]\s]+)\]\([^)\s]*\)[ \t]*\r?\n",
    r"Changes pushed to branch \[`(?P<branch>[^`\s]+)`\]\([^)\s]*\)",
    r"(?: in commit \[(?P<commit>[0-9a-f]{7,40})\]\([^)\s]*\))?[ \t]*\r?$",
);

fn comment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(COMMENT_PATTERN).expect("comment pattern is valid"))
}

/// Identifiers carried by a bot comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentIdentifiers {
    pub os_version: OsVersion,
    pub project_name: String,
    pub branch_name: String,
    pub commit_hash: Option<String>,
}

/// Render the comment for an attempt.
pub fn render_comment(
    os_version: OsVersion,
    project_name: &str,
    branch_name: &str,
    commit_hash: &str,
) -> String {
    format!(
        "{CREATED_PREFIX}{os_version}: [{project_name}]({})\n\
         {PUSHED_PREFIX}[`{branch_name}`]({}) in commit [{commit_hash}]({})",
        obs_project_url(project_name),
        branch_url(branch_name),
        commit_url(commit_hash),
    )
}

/// Decode the identifiers from a comment.
pub fn parse_comment(text: &str) -> Result<CommentIdentifiers> {
    if text.trim().is_empty() {
        return Err(StagingError::Parse("empty comment".to_string()));
    }

    let captures = comment_regex().captures(text).ok_or_else(|| {
        StagingError::Parse(format!(
            "comment does not match the staging comment format: {}",
            text.lines().next().unwrap_or_default()
        ))
    })?;

    let os_version = captures["os"]
        .parse::<OsVersion>()
        .map_err(|err| StagingError::Parse(err.to_string()))?;

    Ok(CommentIdentifiers {
        os_version,
        project_name: captures["project"].to_string(),
        branch_name: captures["branch"].to_string(),
        commit_hash: captures.name("commit").map(|m| m.as_str().to_string()),
    })
}
