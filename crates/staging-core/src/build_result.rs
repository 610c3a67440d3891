//! Build result model: OBS result lists normalised into a closed status set
//! and aggregated into a single verdict.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::StagingError;
use crate::project_setup::{obs_project_url, OBS_WEB_URL};
use crate::Result;

/// Build architectures reported by OBS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    Aarch64,
    Ppc64le,
    S390x,
    Local,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Ppc64le => "ppc64le",
            Arch::S390x => "s390x",
            Arch::Local => "local",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "x86_64" => Ok(Arch::X86_64),
            "aarch64" => Ok(Arch::Aarch64),
            "ppc64le" => Ok(Arch::Ppc64le),
            "s390x" => Ok(Arch::S390x),
            "local" => Ok(Arch::Local),
            other => Err(StagingError::UnknownArch(other.to_string())),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalised package build status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Failed,
    Unresolvable,
    Broken,
    Building,
    Blocked,
    Unknown,
    Succeeded,
    Excluded,
}

/// OBS package status codes and their normalised status. Codes missing here
/// are rejected by [`parse_results`].
const STATUS_TABLE: &[(&str, BuildStatus)] = &[
    ("succeeded", BuildStatus::Succeeded),
    ("failed", BuildStatus::Failed),
    ("unresolvable", BuildStatus::Unresolvable),
    ("broken", BuildStatus::Broken),
    ("excluded", BuildStatus::Excluded),
    ("disabled", BuildStatus::Excluded),
    ("building", BuildStatus::Building),
    ("scheduled", BuildStatus::Building),
    ("dispatching", BuildStatus::Building),
    ("signing", BuildStatus::Building),
    ("finished", BuildStatus::Building),
    ("deleting", BuildStatus::Building),
    ("blocked", BuildStatus::Blocked),
    ("locked", BuildStatus::Blocked),
    ("unknown", BuildStatus::Unknown),
];

impl BuildStatus {
    /// Look up an OBS status code.
    pub fn from_obs(code: &str) -> Option<Self> {
        STATUS_TABLE
            .iter()
            .find(|(raw, _)| *raw == code)
            .map(|(_, status)| *status)
    }

    /// All OBS codes with a mapping.
    pub fn known_obs_codes() -> impl Iterator<Item = &'static str> {
        STATUS_TABLE.iter().map(|(raw, _)| *raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Failed => "failed",
            BuildStatus::Unresolvable => "unresolvable",
            BuildStatus::Broken => "broken",
            BuildStatus::Building => "building",
            BuildStatus::Blocked => "blocked",
            BuildStatus::Unknown => "unknown",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Excluded => "excluded",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            BuildStatus::Failed => "❌",
            BuildStatus::Unresolvable => "🚫",
            BuildStatus::Broken => "💥",
            BuildStatus::Building => "🛻",
            BuildStatus::Blocked => "✋",
            BuildStatus::Unknown => "❓",
            BuildStatus::Succeeded => "✅",
            BuildStatus::Excluded => "⛔",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            BuildStatus::Failed | BuildStatus::Unresolvable | BuildStatus::Broken
        )
    }

    pub fn is_final(self) -> bool {
        !matches!(
            self,
            BuildStatus::Building | BuildStatus::Blocked | BuildStatus::Unknown
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One package in one repository and architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub project: String,
    pub package: String,
    pub repository: String,
    pub arch: Arch,
    pub status: BuildStatus,
    /// Worker, reason for unresolvable, etc.
    pub detail: Option<String>,
    /// The repository still has pending jobs or is not yet published.
    pub repository_dirty: bool,
}

impl BuildResult {
    pub fn live_log_url(&self) -> String {
        format!(
            "{}/package/live_build_log/{}/{}/{}/{}",
            OBS_WEB_URL, self.project, self.package, self.repository, self.arch
        )
    }
}

/// Overall quality of a set of build results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildQualityVerdict {
    Pass,
    Fail,
    NotFinal,
}

impl BuildQualityVerdict {
    pub fn headline(self) -> &'static str {
        match self {
            BuildQualityVerdict::Pass => "Build succeeded ✅",
            BuildQualityVerdict::Fail => "Build failed ❌",
            BuildQualityVerdict::NotFinal => "Still building 🛻",
        }
    }
}

impl fmt::Display for BuildQualityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildQualityVerdict::Pass => "PASS",
            BuildQualityVerdict::Fail => "FAIL",
            BuildQualityVerdict::NotFinal => "NOT FINAL",
        })
    }
}

// `osc results --xml` reply. Attributes carry the `@` prefix for quick-xml.

#[derive(Debug, Deserialize)]
struct RawResultList {
    #[serde(rename = "result", default)]
    results: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(rename = "@project")]
    project: String,
    #[serde(rename = "@repository")]
    repository: String,
    #[serde(rename = "@arch")]
    arch: String,
    #[serde(rename = "@dirty", default)]
    dirty: Option<String>,
    #[serde(rename = "status", default)]
    statuses: Vec<RawStatus>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(rename = "@package")]
    package: String,
    #[serde(rename = "@code")]
    code: String,
    #[serde(default)]
    details: Option<String>,
}

/// Parse a `<resultlist>` into one row per package, repository and
/// architecture.
pub fn parse_results(raw_xml: &str) -> Result<Vec<BuildResult>> {
    let list: RawResultList = quick_xml::de::from_str(raw_xml)?;

    let mut rows = Vec::new();
    for result in list.results {
        let arch = Arch::parse(&result.arch)?;
        let dirty = result.dirty.as_deref() == Some("true");

        for status in result.statuses {
            let code = BuildStatus::from_obs(&status.code).ok_or_else(|| {
                StagingError::UnmappedStatus {
                    status: status.code.clone(),
                    package: status.package.clone(),
                    repository: result.repository.clone(),
                    arch: result.arch.clone(),
                }
            })?;
            rows.push(BuildResult {
                project: result.project.clone(),
                package: status.package,
                repository: result.repository.clone(),
                arch,
                status: code,
                detail: status
                    .details
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty()),
                repository_dirty: dirty,
            });
        }
    }
    Ok(rows)
}

/// Fold all rows into one verdict. Any failure wins, then anything not yet
/// final, otherwise the build passed. Excluded rows do not count.
pub fn aggregate(results: &[BuildResult]) -> BuildQualityVerdict {
    let mut verdict = BuildQualityVerdict::Pass;
    for row in results {
        if row.status.is_failure() {
            return BuildQualityVerdict::Fail;
        }
        if !row.status.is_final() || row.repository_dirty {
            verdict = BuildQualityVerdict::NotFinal;
        }
    }
    verdict
}

/// Whether polling can stop: some package has a result, no row is still
/// building, blocked or unknown and no repository is dirty.
pub fn builds_finished(results: &[BuildResult]) -> bool {
    has_package_results(results)
        && results
            .iter()
            .all(|r| r.status.is_final() && !r.repository_dirty)
}

/// Whether at least one package has a result that is not `excluded`.
pub fn has_package_results(results: &[BuildResult]) -> bool {
    results.iter().any(|r| r.status != BuildStatus::Excluded)
}

/// Markdown summary for the pull request: the verdict, then one table per
/// status inside a collapsible block, then the verdict again.
pub fn render_summary(results: &[BuildResult]) -> String {
    let headline = if results.is_empty() {
        "No build results yet 🛻"
    } else {
        aggregate(results).headline()
    };

    let mut groups: BTreeMap<BuildStatus, Vec<&BuildResult>> = BTreeMap::new();
    for row in results {
        groups.entry(row.status).or_default().push(row);
    }

    let mut out = format!("\n{headline}\n<details>\n<summary>Build Results</summary>\n\n");

    let mut dirty: Vec<(&str, &str, Arch)> = results
        .iter()
        .filter(|r| r.repository_dirty)
        .map(|r| (r.project.as_str(), r.repository.as_str(), r.arch))
        .collect();
    dirty.dedup();
    for (project, repository, arch) in dirty {
        out.push_str(&format!(
            "Repository `{repository}` in [{project}]({}) for `{arch}` is **dirty**\n",
            obs_project_url(project)
        ));
    }

    for (status, rows) in groups {
        out.push_str(&format!(
            "\n#### {} {} ({})\n\npackage | repository | arch | detail | build log\n\
             --------|------------|------|--------|----------\n",
            status.emoji(),
            status,
            rows.len()
        ));
        for row in rows {
            out.push_str(&format!(
                "{} | {} | {} | {} | [live log]({})\n",
                row.package,
                row.repository,
                row.arch,
                row.detail.as_deref().unwrap_or_default(),
                row.live_log_url()
            ));
        }
    }

    out.push_str(&format!("\n</details>\n\n{headline}\n"));
    out
}
