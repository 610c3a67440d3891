//! Project naming and OBS project/package configuration.
//!
//! Three kinds of projects exist per OS version: the devel project that
//! receives the released recipes, a continuous rebuild project in the bot's
//! home and one staging project per branch.

use obs_client::{BuildService, RecipeRepository};
use serde::Serialize;
use tera::{Context, Tera};
use tracing::{debug, info, warn};

use crate::error::StagingError;
use crate::os_version::OsVersion;
use crate::Result;

/// Web frontend of the openSUSE build service
pub const OBS_WEB_URL: &str = "https://build.opensuse.org";

/// Repository holding the rendered build recipes
pub const RECIPE_REPOSITORY_URL: &str = "https://github.com/SUSE/bci-dockerfile-generator";

/// Maintainers of the devel projects
pub const USERS_FOR_PRODUCTION: &[&str] = &[
    "avicenzi",
    "dirkmueller",
    "favogt",
    "fcrozat",
    "pvlasin",
    "pushman",
];

/// Maintainers of staging and continuous rebuild projects, next to the bot
pub const USERS_FOR_STAGING: &[&str] = &["avicenzi"];

/// Value of the `OSRT:Config` attribute of the devel projects
pub const OSRT_CONFIG: &str = "main-repo = standard\npkglistgen-archs = ppc64le s390x aarch64 x86_64";

/// URL of a project in the OBS web frontend.
pub fn obs_project_url(project: &str) -> String {
    format!("{OBS_WEB_URL}/project/show/{project}")
}

/// URL of a branch of the recipe repository.
pub fn branch_url(branch: &str) -> String {
    format!("{RECIPE_REPOSITORY_URL}/tree/{branch}")
}

/// URL of a commit in the recipe repository.
pub fn commit_url(commit: &str) -> String {
    format!("{RECIPE_REPOSITORY_URL}/commit/{commit}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Devel,
    ContinuousRebuild,
    Staging,
}

/// Name of a project on OBS. Staging projects need the branch.
pub fn generate_project_name(
    os_version: OsVersion,
    project_type: ProjectType,
    osc_user: &str,
    branch: Option<&str>,
) -> Result<String> {
    let prefix = match project_type {
        ProjectType::Devel => "devel:BCI:".to_string(),
        ProjectType::ContinuousRebuild => format!("home:{osc_user}:BCI:CR:"),
        ProjectType::Staging => format!("home:{osc_user}:BCI:Staging:"),
    };
    let name = prefix + &os_version.project_suffix();

    match (project_type, branch) {
        (ProjectType::Staging, Some(branch)) if !branch.is_empty() => Ok(format!("{name}:{branch}")),
        (ProjectType::Staging, _) => Err(StagingError::Config(
            "staging projects need a branch name".to_string(),
        )),
        _ => Ok(name),
    }
}

/// Repositories whose results decide about a staging build.
pub fn staging_repositories(os_version: OsVersion) -> Vec<String> {
    let images = if os_version.is_sl16() {
        "containerkiwi"
    } else {
        "images"
    };
    vec![images.to_string(), "containerfile".to_string()]
}

#[derive(Debug, Clone, Serialize)]
struct RepositoryPath {
    project: String,
    repository: &'static str,
}

impl RepositoryPath {
    fn new(project: impl Into<String>, repository: &'static str) -> Self {
        Self {
            project: project.into(),
            repository,
        }
    }
}

const META_TEMPLATE: &str = r#"<project name="{{ project_name }}">
  <title>{{ project_title }}</title>
  <description>{{ project_description }}</description>
{% for user in maintainers %}  <person userid="{{ user }}" role="maintainer"/>
{% endfor %}{% if extra_header %}{{ extra_header }}
{% endif %}  <build>
    <enable/>
  </build>
  <publish>
    <enable/>
  </publish>
  <debuginfo>
    <enable/>
  </debuginfo>
  <repository name="standard">
{% for path in repository_paths %}    <path project="{{ path.project }}" repository="{{ path.repository }}"/>
{% endfor %}{% for arch in arches %}    <arch>{{ arch }}</arch>
{% endfor %}  </repository>
  <repository name="{{ images_repo }}">
{% if not with_released_containers %}    <path project="{{ project_name }}" repository="containerfile"/>
{% endif %}    <path project="{{ project_name }}" repository="standard"/>
{% for arch in arches %}    <arch>{{ arch }}</arch>
{% endfor %}  </repository>
{% if with_product_repo %}  <repository name="product">
    <path project="{{ project_name }}" repository="containerfile"/>
    <path project="{{ project_name }}" repository="{{ images_repo }}"/>
    <path project="{{ project_name }}" repository="standard"/>
{% for arch in arches %}    <arch>{{ arch }}</arch>
{% endfor %}  </repository>
{% endif %}{% if with_helmcharts_repo %}  <repository name="helmcharts">
    <path project="{{ project_name }}" repository="standard"/>
    <arch>x86_64</arch>
  </repository>
{% endif %}  <repository name="containerfile">
{% if not with_released_containers %}    <path project="{{ project_name }}" repository="{{ images_repo }}"/>
{% endif %}    <path project="{{ project_name }}" repository="standard"/>
{% for arch in arches %}    <arch>{{ arch }}</arch>
{% endfor %}  </repository>
</project>
"#;

const PACKAGE_META_TEMPLATE: &str = r#"<package name="{{ package }}" project="{{ project }}">
  <title>{{ package }}</title>
  <description/>
  <scmsync>{{ scmsync }}</scmsync>
</package>
"#;

fn repository_paths(os_version: OsVersion, project_type: ProjectType) -> Result<Vec<RepositoryPath>> {
    if os_version.is_tumbleweed() {
        return Ok(vec![
            RepositoryPath::new("openSUSE:Factory", "containerfile"),
            RepositoryPath::new("openSUSE:Factory", "images"),
            RepositoryPath::new("openSUSE:Factory:ARM", "containerfile"),
            RepositoryPath::new("openSUSE:Factory:ARM", "images"),
            RepositoryPath::new("openSUSE:Factory:ARM", "standard"),
            RepositoryPath::new("openSUSE:Factory:PowerPC", "standard"),
            RepositoryPath::new("openSUSE:Factory:zSystems", "standard"),
            RepositoryPath::new("openSUSE:Factory", "snapshot"),
        ]);
    }

    let (first, last) = match os_version.service_pack() {
        Some(sp) => ("SUSE:Registry".to_string(), format!("SUSE:SLE-15-SP{sp}:Update")),
        None => (
            "SUSE:SLFO:Products:SLES:16.0".to_string(),
            "SUSE:SLFO:1.2".to_string(),
        ),
    };

    let mut paths = vec![RepositoryPath::new(first, "standard")];
    if project_type == ProjectType::Staging {
        let devel = generate_project_name(os_version, ProjectType::Devel, "", None)?;
        let images = if os_version.is_sl16() {
            "containerkiwi"
        } else {
            "images"
        };
        paths.push(RepositoryPath::new(devel.clone(), "containerfile"));
        paths.push(RepositoryPath::new(devel.clone(), images));
        paths.push(RepositoryPath::new(devel, "standard"));
    }
    paths.push(RepositoryPath::new(last, "standard"));
    Ok(paths)
}

/// Render the project `_meta`. Returns the project name and the XML.
pub fn generate_meta(
    os_version: OsVersion,
    project_type: ProjectType,
    osc_user: &str,
    branch: Option<&str>,
) -> Result<(String, String)> {
    let project_name = generate_project_name(os_version, project_type, osc_user, branch)?;

    let maintainers: Vec<&str> = match project_type {
        ProjectType::Devel => USERS_FOR_PRODUCTION.to_vec(),
        _ => USERS_FOR_STAGING.iter().copied().chain([osc_user]).collect(),
    };

    let with_all_arches = !os_version.is_tumbleweed() || project_type != ProjectType::Staging;
    let arches: &[&str] = if with_all_arches {
        &["x86_64", "aarch64", "s390x", "ppc64le"]
    } else {
        &["x86_64", "aarch64"]
    };
    let devel_with_released = project_type == ProjectType::Devel && !os_version.is_sl16();

    let os_name = os_version.full_os_name();
    let (title, description) = match (project_type, branch) {
        (ProjectType::Staging, Some(branch)) => (
            format!("Staging project for {os_name}"),
            format!(
                "Staging project for https://github.com/SUSE/BCI-dockerfile-generator/tree/{branch} for {os_name}"
            ),
        ),
        (ProjectType::ContinuousRebuild, _) => (
            format!("Continuous Rebuild project for {os_name}"),
            format!("Continuous Rebuild project for {os_name}"),
        ),
        _ => (
            format!("BCI Development project for {os_name}"),
            format!(
                "BCI Development project for {os_name}\nThis project is automatically updated from git. \
                 Please do **not** send submit requests, create an issue in the \
                 [bci-dockerfile-generator]({RECIPE_REPOSITORY_URL}) repository instead"
            ),
        ),
    };

    let extra_header = match project_type {
        ProjectType::ContinuousRebuild => Some(format!(
            "  <scmsync>{RECIPE_REPOSITORY_URL}#{}</scmsync>",
            os_version.deployment_branch_name()
        )),
        ProjectType::Devel if os_version.is_tumbleweed() => Some(
            r#"  <group groupid="factory-maintainers" role="maintainer"/>"#.to_string(),
        ),
        _ => None,
    };

    let mut ctx = Context::new();
    ctx.insert("project_name", &project_name);
    ctx.insert("project_title", &title);
    ctx.insert("project_description", &description);
    ctx.insert("maintainers", &maintainers);
    ctx.insert("extra_header", &extra_header);
    ctx.insert("repository_paths", &repository_paths(os_version, project_type)?);
    ctx.insert("arches", arches);
    ctx.insert(
        "images_repo",
        if os_version.is_sl16() {
            "containerkiwi"
        } else {
            "images"
        },
    );
    ctx.insert("with_released_containers", &devel_with_released);
    ctx.insert("with_helmcharts_repo", &devel_with_released);
    ctx.insert("with_product_repo", &os_version.is_sl16());

    let meta = Tera::one_off(META_TEMPLATE, &ctx, false)?;
    Ok((project_name, meta))
}

/// Package `_meta` that syncs `package` from its directory on `branch`.
pub fn generate_package_meta(project: &str, package: &str, branch: &str) -> Result<String> {
    let mut ctx = Context::new();
    ctx.insert("project", project);
    ctx.insert("package", package);
    ctx.insert(
        "scmsync",
        &format!("{RECIPE_REPOSITORY_URL}?subdir={package}#{branch}"),
    );
    Ok(Tera::one_off(PACKAGE_META_TEMPLATE, &ctx, false)?)
}

/// The devel project's prjconf: `_config` from the deployment branch.
pub async fn devel_prjconf(git: &dyn RecipeRepository, os_version: OsVersion) -> Result<String> {
    let branch = os_version.deployment_branch_name();
    match git.read_file(&branch, "_config").await? {
        Some(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        None => Err(StagingError::Config(format!(
            "_config not found in branch {branch}"
        ))),
    }
}

/// Create or update the staging project for `suffix`.
///
/// The meta is written on every call so an existing project is brought up
/// to date. The prjconf is taken from `_config` of the staging branch and
/// falls back to the published prjconf of the devel project.
pub async fn create_staging_project(
    obs: &dyn BuildService,
    git: &dyn RecipeRepository,
    os_version: OsVersion,
    osc_user: &str,
    suffix: &str,
) -> Result<String> {
    let (project, meta) = generate_meta(os_version, ProjectType::Staging, osc_user, Some(suffix))?;

    let existed = obs.project_exists(&project).await?;
    obs.write_project_meta(&project, &meta).await?;

    let prjconf = match git.read_file(suffix, "_config").await {
        Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(None) => {
            debug!(branch = suffix, "no _config in branch, using the devel prjconf");
            devel_public_prjconf(obs, os_version).await?
        }
        Err(err) => {
            warn!(branch = suffix, "failed to read _config: {}", err);
            devel_public_prjconf(obs, os_version).await?
        }
    };
    obs.write_project_config(&project, &prjconf).await?;

    if existed {
        info!(%project, "updated existing staging project");
    } else {
        info!(%project, "created staging project");
    }
    Ok(project)
}

async fn devel_public_prjconf(obs: &dyn BuildService, os_version: OsVersion) -> Result<String> {
    let devel = generate_project_name(os_version, ProjectType::Devel, "", None)?;
    Ok(obs.fetch_project_config(&devel).await?)
}

/// Point each package in `project` at its directory on `branch`.
pub async fn write_package_metas(
    obs: &dyn BuildService,
    project: &str,
    packages: &[String],
    branch: &str,
) -> Result<()> {
    for package in packages {
        let meta = generate_package_meta(project, package, branch)?;
        obs.write_package_meta(project, package, &meta).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::events::Event;
    use quick_xml::Reader;

    fn assert_well_formed(xml: &str) {
        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => panic!("invalid XML: {err}\n{xml}"),
            }
        }
    }

    #[test]
    fn project_names() {
        let name = |t, b| generate_project_name(OsVersion::Sp7, t, "bci-bot", b).unwrap();
        assert_eq!(name(ProjectType::Devel, None), "devel:BCI:SLE-15-SP7");
        assert_eq!(
            name(ProjectType::ContinuousRebuild, None),
            "home:bci-bot:BCI:CR:SLE-15-SP7"
        );
        assert_eq!(
            name(ProjectType::Staging, Some("sle15-sp7-42")),
            "home:bci-bot:BCI:Staging:SLE-15-SP7:sle15-sp7-42"
        );
        assert_eq!(
            generate_project_name(OsVersion::Tumbleweed, ProjectType::Devel, "", None).unwrap(),
            "devel:BCI:Tumbleweed"
        );
    }

    #[test]
    fn staging_name_needs_branch() {
        let err =
            generate_project_name(OsVersion::Sp6, ProjectType::Staging, "bci-bot", None).unwrap_err();
        assert!(matches!(err, StagingError::Config(_)));
        assert!(
            generate_project_name(OsVersion::Sp6, ProjectType::Staging, "bci-bot", Some(""))
                .is_err()
        );
    }

    #[test]
    fn sle_staging_meta_builds_on_devel_project() {
        let (name, meta) =
            generate_meta(OsVersion::Sp7, ProjectType::Staging, "bci-bot", Some("pr-12")).unwrap();
        assert_eq!(name, "home:bci-bot:BCI:Staging:SLE-15-SP7:pr-12");
        assert_well_formed(&meta);

        assert!(meta.starts_with(r#"<project name="home:bci-bot:BCI:Staging:SLE-15-SP7:pr-12">"#));
        assert!(meta.contains(r#"<person userid="avicenzi" role="maintainer"/>"#));
        assert!(meta.contains(r#"<person userid="bci-bot" role="maintainer"/>"#));
        assert!(!meta.contains("dirkmueller"));

        let registry = meta.find(r#"<path project="SUSE:Registry" repository="standard"/>"#);
        let devel = meta.find(r#"<path project="devel:BCI:SLE-15-SP7" repository="images"/>"#);
        let update = meta.find(r#"<path project="SUSE:SLE-15-SP7:Update" repository="standard"/>"#);
        assert!(registry < devel && devel < update && registry.is_some());

        assert!(meta.contains("<arch>s390x</arch>"));
        assert!(!meta.contains("helmcharts"));
        assert!(!meta.contains("<scmsync>"));
    }

    #[test]
    fn tumbleweed_staging_builds_two_arches() {
        let (_, meta) =
            generate_meta(OsVersion::Tumbleweed, ProjectType::Staging, "bci-bot", Some("b")).unwrap();
        assert_well_formed(&meta);
        assert!(meta.contains(r#"<path project="openSUSE:Factory" repository="snapshot"/>"#));
        assert!(!meta.contains("<arch>s390x</arch>"));
        assert!(!meta.contains("ppc64le"));
    }

    #[test]
    fn devel_meta_has_production_maintainers_and_helmcharts() {
        let (name, meta) = generate_meta(OsVersion::Sp6, ProjectType::Devel, "bci-bot", None).unwrap();
        assert_eq!(name, "devel:BCI:SLE-15-SP6");
        assert_well_formed(&meta);
        for user in USERS_FOR_PRODUCTION {
            assert!(meta.contains(&format!(r#"<person userid="{user}" role="maintainer"/>"#)));
        }
        assert!(meta.contains(r#"<repository name="helmcharts">"#));
        assert!(meta.contains("<title>BCI Development project for SLE 15 SP6</title>"));
        // released containers come from SUSE:Registry, not the own containerfile repo
        assert!(!meta.contains(
            r#"<path project="devel:BCI:SLE-15-SP6" repository="containerfile"/>"#
        ));
    }

    #[test]
    fn tumbleweed_devel_meta_adds_factory_maintainers() {
        let (_, meta) = generate_meta(OsVersion::Tumbleweed, ProjectType::Devel, "bot", None).unwrap();
        assert_well_formed(&meta);
        assert!(meta.contains(r#"<group groupid="factory-maintainers" role="maintainer"/>"#));
        assert!(meta.contains("<arch>ppc64le</arch>"));
    }

    #[test]
    fn cr_meta_syncs_from_deployment_branch() {
        let (name, meta) =
            generate_meta(OsVersion::Sp5, ProjectType::ContinuousRebuild, "bci-bot", None).unwrap();
        assert_eq!(name, "home:bci-bot:BCI:CR:SLE-15-SP5");
        assert_well_formed(&meta);
        assert!(meta.contains(
            "<scmsync>https://github.com/SUSE/bci-dockerfile-generator#sle15-sp5</scmsync>"
        ));
    }

    #[test]
    fn sl16_uses_containerkiwi_and_product() {
        let (_, meta) =
            generate_meta(OsVersion::Sl16_0, ProjectType::Staging, "bci-bot", Some("b")).unwrap();
        assert_well_formed(&meta);
        assert!(meta.contains(r#"<repository name="containerkiwi">"#));
        assert!(meta.contains(r#"<repository name="product">"#));
        assert!(meta.contains(r#"<path project="SUSE:SLFO:1.2" repository="standard"/>"#));
        assert!(meta.contains(r#"<path project="devel:BCI:16.0" repository="containerkiwi"/>"#));
        assert_eq!(
            staging_repositories(OsVersion::Sl16_0),
            vec!["containerkiwi", "containerfile"]
        );
    }

    #[test]
    fn package_meta_points_at_branch_subdir() {
        let meta = generate_package_meta("home:bot:BCI:Staging:7:b", "python-3.11", "b").unwrap();
        assert_well_formed(&meta);
        assert!(meta.contains(
            "<scmsync>https://github.com/SUSE/bci-dockerfile-generator?subdir=python-3.11#b</scmsync>"
        ));
    }

    #[test]
    fn urls() {
        assert_eq!(
            obs_project_url("devel:BCI:SLE-15-SP7"),
            "https://build.opensuse.org/project/show/devel:BCI:SLE-15-SP7"
        );
        assert_eq!(
            branch_url("sle15-sp7-42"),
            "https://github.com/SUSE/bci-dockerfile-generator/tree/sle15-sp7-42"
        );
    }
}
