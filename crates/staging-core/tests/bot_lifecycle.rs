//! End-to-end tests of the staging bot against the in-memory remotes.

use std::sync::Arc;
use std::time::Duration;

use obs_client::fakes::{MemoryBuildService, MemoryRecipeRepository, MemoryRegistry};
use obs_client::{ObsError, RecipeSet, Removal, RetryPolicy};
use staging_core::{
    AttemptState, BotConfig, BuildQualityVerdict, BuildStatus, OsVersion, Remotes, Resolution,
    ScratchBuildOutcome, StagingAttempt, StagingBot, StagingError, WaitOutcome,
};
use tempfile::TempDir;

const USER: &str = "bci-bot";
const BRANCH: &str = "sle15-sp7-42";
const DEPLOYMENT: &str = "sle15-sp7";
const PROJECT: &str = "home:bci-bot:BCI:Staging:SLE-15-SP7:sle15-sp7-42";
const DEVEL: &str = "devel:BCI:SLE-15-SP7";

struct Harness {
    obs: Arc<MemoryBuildService>,
    git: Arc<MemoryRecipeRepository>,
    registry: Arc<MemoryRegistry>,
}

impl Harness {
    fn new() -> Self {
        let git = MemoryRecipeRepository::new();
        git.seed_branch(DEPLOYMENT, &deployment());
        Self {
            obs: Arc::new(MemoryBuildService::new()),
            git: Arc::new(git),
            registry: Arc::new(MemoryRegistry::new("registry.opensuse.org")),
        }
    }

    fn remotes(&self) -> Remotes {
        Remotes {
            obs: self.obs.clone(),
            git: self.git.clone(),
            registry: self.registry.clone(),
        }
    }

    fn bot(&self) -> StagingBot {
        StagingBot::new(config(), self.remotes()).unwrap()
    }
}

fn config() -> BotConfig {
    BotConfig::new(OsVersion::Sp7, USER)
        .with_credentials("secret")
        .with_branch_name(BRANCH)
}

fn deployment() -> RecipeSet {
    RecipeSet::new()
        .with_file("python-3.11/Dockerfile", "FROM bci/bci-base:15.7\n")
        .with_file("python-3.11/python-3.11.changes", "- initial\n")
        .with_file("golang-1.22/Dockerfile", "FROM bci/bci-base:15.7\n")
        .with_file("golang-1.22/golang-1.22.changes", "- initial\n")
        .with_file("_config", "Prefer: python311\n")
}

/// Generator output with a change to the python image only.
fn python_bump() -> RecipeSet {
    RecipeSet::new()
        .with_file(
            "python-3.11/Dockerfile",
            "FROM bci/bci-base:15.7\nRUN zypper -n in python311-pip\n",
        )
        .with_file("golang-1.22/Dockerfile", "FROM bci/bci-base:15.7\n")
}

fn python_and_golang_bump() -> RecipeSet {
    python_bump().with_file(
        "golang-1.22/Dockerfile",
        "FROM bci/bci-base:15.7\nRUN zypper -n in go1.22\n",
    )
}

fn resultlist(rows: &[(&str, &str)]) -> String {
    let statuses: String = rows
        .iter()
        .map(|(package, code)| format!(r#"<status package="{package}" code="{code}"/>"#))
        .collect();
    format!(
        r#"<resultlist state="8c1a"><result project="{PROJECT}" repository="images" arch="x86_64" code="published" state="published">{statuses}</result></resultlist>"#
    )
}

async fn created(bot: &mut StagingBot, recipes: &RecipeSet) -> StagingAttempt {
    match bot.scratch_build(recipes, "Test build").await.unwrap() {
        ScratchBuildOutcome::Created(attempt) => attempt,
        ScratchBuildOutcome::NoChanges => panic!("expected a staging project"),
    }
}

// ===========================================================================
// scratch_build
// ===========================================================================

#[tokio::test]
async fn scratch_build_stages_changed_packages() {
    let h = Harness::new();
    let mut bot = h.bot();

    let attempt = created(&mut bot, &python_bump()).await;

    assert_eq!(attempt.project_name, PROJECT);
    assert_eq!(attempt.packages, vec!["python-3.11"]);
    assert_eq!(attempt.state, AttemptState::Committed);
    assert!(attempt.commit_hash.is_some());

    let project = h.obs.project(PROJECT).unwrap();
    assert!(project.meta.contains(r#"<project name="home:bci-bot:BCI:Staging:SLE-15-SP7:sle15-sp7-42">"#));
    assert_eq!(project.prjconf.as_deref(), Some("Prefer: python311\n"));
    assert_eq!(project.packages.keys().collect::<Vec<_>>(), vec!["python-3.11"]);
    assert!(project.packages["python-3.11"].contains("?subdir=python-3.11#sle15-sp7-42"));
    assert_eq!(project.service_waits, 1);
    assert_eq!(project.rebuilds, 1);

    let branch = h.git.branch_files(BRANCH).unwrap();
    assert_eq!(
        branch.get("python-3.11/Dockerfile"),
        python_bump().get("python-3.11/Dockerfile")
    );
    assert!(branch.get("python-3.11/python-3.11.changes").is_some());
}

#[tokio::test]
async fn identical_second_scratch_build_is_a_no_op() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;

    let second = bot.scratch_build(&python_bump(), "Test build").await.unwrap();

    assert_eq!(second, ScratchBuildOutcome::NoChanges);
    assert_eq!(h.obs.projects_created(), 1);
    assert_eq!(h.obs.project(PROJECT).unwrap().rebuilds, 1);
    assert_eq!(bot.attempt().state, AttemptState::Committed);
}

#[tokio::test]
async fn unchanged_recipes_create_nothing() {
    let h = Harness::new();
    let mut bot = h.bot();

    let unchanged = RecipeSet::new()
        .with_file("python-3.11/Dockerfile", "FROM bci/bci-base:15.7\n")
        .with_file("golang-1.22/Dockerfile", "FROM bci/bci-base:15.7\n");
    let outcome = bot.scratch_build(&unchanged, "").await.unwrap();

    assert_eq!(outcome, ScratchBuildOutcome::NoChanges);
    assert_eq!(h.obs.projects_created(), 0);
    assert!(!h.git.branch_names().contains(&BRANCH.to_string()));
    assert_eq!(bot.attempt().state, AttemptState::Uninitialized);
}

#[tokio::test]
async fn resumed_attempt_builds_on_the_existing_branch() {
    let h = Harness::new();
    let mut first = h.bot();
    let attempt = created(&mut first, &python_bump()).await;
    let comment = attempt.render_comment().unwrap();

    let mut resumed = StagingBot::from_comment(config(), h.remotes(), &comment).unwrap();
    assert_eq!(resumed.attempt().commit_hash, attempt.commit_hash);

    let second = created(&mut resumed, &python_and_golang_bump()).await;

    assert_ne!(second.commit_hash, attempt.commit_hash);
    assert_eq!(second.packages, vec!["golang-1.22", "python-3.11"]);
    assert_eq!(h.obs.projects_created(), 1);
    assert_eq!(h.obs.project(PROJECT).unwrap().rebuilds, 2);
}

#[tokio::test]
async fn reused_project_picks_up_the_new_prjconf() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;
    assert_eq!(
        h.obs.project(PROJECT).unwrap().prjconf.as_deref(),
        Some("Prefer: python311\n")
    );

    let with_go =
        python_and_golang_bump().with_file("_config", "Prefer: python311\nPrefer: go1.22\n");
    created(&mut bot, &with_go).await;

    let project = h.obs.project(PROJECT).unwrap();
    assert_eq!(h.obs.projects_created(), 1);
    assert_eq!(
        project.prjconf.as_deref(),
        Some("Prefer: python311\nPrefer: go1.22\n")
    );
    assert!(project.meta.contains("tree/sle15-sp7-42"));
    assert_eq!(project.rebuilds, 2);
}

#[tokio::test]
async fn staging_branch_without_config_uses_the_devel_prjconf() {
    let h = Harness::new();
    let base = deployment();
    let without_config = base
        .files()
        .filter(|(path, _)| *path != "_config")
        .fold(RecipeSet::new(), |set, (path, contents)| {
            set.with_file(path, contents)
        });
    h.git.seed_branch(DEPLOYMENT, &without_config);
    h.obs.set_public_config(DEVEL, "Prefer: devel\n");

    created(&mut h.bot(), &python_bump()).await;

    assert_eq!(
        h.obs.project(PROJECT).unwrap().prjconf.as_deref(),
        Some("Prefer: devel\n")
    );
}

#[tokio::test]
async fn scratch_build_writes_the_env_file() {
    let h = Harness::new();
    let dir = TempDir::new().unwrap();
    let env_file = dir.path().join("test-build.env");
    let mut bot = StagingBot::new(config().with_env_file(&env_file), h.remotes()).unwrap();

    let attempt = created(&mut bot, &python_bump()).await;

    let loaded = StagingAttempt::load_env_file(&env_file).await.unwrap();
    assert_eq!(loaded.project_name, PROJECT);
    assert_eq!(loaded.commit_hash, attempt.commit_hash);
    assert_eq!(loaded.packages, vec!["python-3.11"]);
}

#[tokio::test]
async fn commit_state_then_create_staging_project() {
    let h = Harness::new();

    let commit = h
        .bot()
        .commit_state(&python_and_golang_bump(), "Test build")
        .await
        .unwrap();
    assert!(commit.is_some());
    assert_eq!(h.obs.projects_created(), 0);

    let mut bot = h.bot();
    let project = bot.create_staging_project().await.unwrap();

    assert_eq!(project, PROJECT);
    assert_eq!(bot.attempt().state, AttemptState::ProjectCreated);
    let packages: Vec<_> = h.obs.project(PROJECT).unwrap().packages.into_keys().collect();
    assert_eq!(packages, vec!["golang-1.22", "python-3.11"]);
    assert_eq!(h.obs.project(PROJECT).unwrap().rebuilds, 0);
}

#[tokio::test]
async fn create_staging_project_needs_the_branch() {
    let h = Harness::new();
    let err = h.bot().create_staging_project().await.unwrap_err();
    assert!(matches!(err, StagingError::Config(_)));
}

// ===========================================================================
// wait and build results
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn wait_with_zero_timeout_returns_after_one_poll() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;
    h.obs
        .push_results(PROJECT, resultlist(&[("python-3.11", "building")]));

    let outcome = bot
        .wait(Duration::from_secs(15), Duration::ZERO)
        .await
        .unwrap();

    match outcome {
        WaitOutcome::TimedOut(rows) => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].status, BuildStatus::Building);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(bot.attempt().state, AttemptState::Polling);
}

#[tokio::test(start_paused = true)]
async fn wait_polls_until_final() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;
    h.obs.push_results(PROJECT, resultlist(&[]));
    h.obs
        .push_results(PROJECT, resultlist(&[("python-3.11", "scheduled")]));
    h.obs
        .push_results(PROJECT, resultlist(&[("python-3.11", "succeeded")]));

    let outcome = bot
        .wait(Duration::from_secs(15), Duration::from_secs(3600))
        .await
        .unwrap();

    assert!(matches!(outcome, WaitOutcome::Finished(ref rows) if rows.len() == 1));
    assert_eq!(
        bot.attempt().state,
        AttemptState::Resolved(Resolution::Pass)
    );
}

#[tokio::test(start_paused = true)]
async fn wait_keeps_polling_past_an_early_failure() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_and_golang_bump()).await;
    h.obs.push_results(
        PROJECT,
        resultlist(&[("python-3.11", "failed"), ("golang-1.22", "building")]),
    );
    h.obs.push_results(
        PROJECT,
        resultlist(&[("python-3.11", "failed"), ("golang-1.22", "blocked")]),
    );
    h.obs.push_results(
        PROJECT,
        resultlist(&[("python-3.11", "failed"), ("golang-1.22", "succeeded")]),
    );

    let outcome = bot
        .wait(Duration::from_secs(15), Duration::from_secs(3600))
        .await
        .unwrap();

    match outcome {
        WaitOutcome::Finished(rows) => {
            assert!(rows.iter().all(|r| r.status.is_final()));
            assert_eq!(rows[1].status, BuildStatus::Succeeded);
        }
        other => panic!("expected finished builds, got {other:?}"),
    }
    assert_eq!(
        bot.attempt().state,
        AttemptState::Resolved(Resolution::Fail)
    );
}

#[tokio::test(start_paused = true)]
async fn wait_times_out_while_a_failed_build_has_pending_neighbours() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_and_golang_bump()).await;
    h.obs.push_results(
        PROJECT,
        resultlist(&[("python-3.11", "failed"), ("golang-1.22", "building")]),
    );

    let outcome = bot
        .wait(Duration::from_secs(15), Duration::from_secs(60))
        .await
        .unwrap();

    assert!(matches!(outcome, WaitOutcome::TimedOut(ref rows) if rows.len() == 2));
    assert_eq!(bot.attempt().state, AttemptState::Polling);
}

#[tokio::test]
async fn wait_rejects_a_zero_poll_interval() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;

    let err = bot
        .wait(Duration::ZERO, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(err, StagingError::Config(_)));
    assert_eq!(bot.attempt().state, AttemptState::Committed);
}

#[tokio::test(start_paused = true)]
async fn wait_without_results_times_out() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;

    let outcome = bot
        .wait(Duration::from_secs(15), Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(outcome, WaitOutcome::TimedOut(Vec::new()));
}

#[tokio::test]
async fn wait_needs_a_committed_attempt() {
    let h = Harness::new();
    let err = h
        .bot()
        .wait(Duration::from_secs(1), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StagingError::InvalidTransition {
            from: AttemptState::Uninitialized,
            to: AttemptState::Polling
        }
    ));
}

#[tokio::test]
async fn one_failed_package_fails_the_build() {
    let h = Harness::new();
    let bot = StagingBot::attach(config(), h.remotes()).unwrap();
    h.obs.insert_project(PROJECT, ["pkgA", "pkgB"]);
    h.obs.push_results(
        PROJECT,
        resultlist(&[("pkgA", "succeeded"), ("pkgB", "failed")]),
    );

    let (verdict, rows) = bot.get_build_quality().await.unwrap();

    assert_eq!(verdict, BuildQualityVerdict::Fail);
    assert_eq!(rows.len(), 2);
    let summary = bot.query_build_result().await.unwrap();
    assert!(summary.contains("Build failed"));
    assert!(summary.contains("pkgB | images | x86_64"));
}

#[tokio::test]
async fn only_excluded_packages_is_no_build_results() {
    let h = Harness::new();
    let bot = StagingBot::attach(config(), h.remotes()).unwrap();
    h.obs.insert_project(PROJECT, ["pkgA"]);
    h.obs
        .push_results(PROJECT, resultlist(&[("pkgA", "excluded")]));

    let err = bot.get_build_quality().await.unwrap_err();
    assert!(matches!(err, StagingError::NoBuildResults(ref p) if p == PROJECT));
}

#[tokio::test]
async fn unmapped_status_is_an_error() {
    let h = Harness::new();
    let bot = StagingBot::attach(config(), h.remotes()).unwrap();
    h.obs.insert_project(PROJECT, ["pkgA"]);
    h.obs
        .push_results(PROJECT, resultlist(&[("pkgA", "frobnicating")]));

    let err = bot.get_build_quality().await.unwrap_err();
    assert!(matches!(err, StagingError::UnmappedStatus { .. }));
}

#[tokio::test]
async fn fetch_failures_surface_as_remote_errors() {
    let h = Harness::new();
    let bot = StagingBot::attach(config(), h.remotes()).unwrap();
    h.obs.insert_project(PROJECT, ["pkgA"]);
    h.obs.fail_next_fetches(1);

    let err = bot.query_build_result().await.unwrap_err();
    assert!(matches!(err, StagingError::RemoteService(ref e) if e.is_transient()));
}

#[tokio::test]
async fn rebuild_of_attached_project() {
    let h = Harness::new();
    let mut bot = StagingBot::attach(config(), h.remotes()).unwrap();
    h.obs.insert_project(PROJECT, ["pkgA"]);

    bot.rebuild().await.unwrap();

    assert_eq!(h.obs.project(PROJECT).unwrap().rebuilds, 1);
    assert_eq!(bot.attempt().state, AttemptState::Committed);
}

// ===========================================================================
// cleanup and recovery
// ===========================================================================

#[tokio::test]
async fn cleanup_twice_succeeds() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;

    let first = bot.cleanup(true, true).await.unwrap();
    assert_eq!(first.branch, Some(Removal::Deleted));
    assert_eq!(first.project, Some(Removal::Deleted));

    let second = bot.cleanup(true, true).await.unwrap();
    assert_eq!(second.branch, Some(Removal::AlreadyAbsent));
    assert_eq!(second.project, Some(Removal::AlreadyAbsent));

    assert_eq!(bot.attempt().state, AttemptState::CleanedUp);
    assert!(h.obs.project(PROJECT).is_none());
    assert_eq!(h.git.branch_names(), vec![DEPLOYMENT]);
}

#[tokio::test]
async fn cleanup_of_a_fresh_attempt_and_partial_cleanup() {
    let h = Harness::new();
    let report = h.bot().cleanup(true, true).await.unwrap();
    assert_eq!(report.branch, Some(Removal::AlreadyAbsent));
    assert_eq!(report.project, Some(Removal::AlreadyAbsent));

    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;
    let report = bot.cleanup(false, true).await.unwrap();
    assert_eq!(report.branch, None);
    assert_eq!(report.project, Some(Removal::Deleted));
    assert!(h.git.branch_names().contains(&BRANCH.to_string()));
}

#[tokio::test]
async fn cleaned_up_attempt_accepts_no_further_steps() {
    let h = Harness::new();
    let mut bot = h.bot();
    created(&mut bot, &python_bump()).await;
    bot.cleanup(true, true).await.unwrap();

    let err = bot
        .scratch_build(&python_bump(), "Test build")
        .await
        .unwrap_err();
    assert!(matches!(err, StagingError::InvalidTransition { .. }));
}

#[tokio::test]
async fn cleanup_from_comment() {
    let h = Harness::new();
    let attempt = created(&mut h.bot(), &python_bump()).await;

    let mut bot =
        StagingBot::from_comment(config(), h.remotes(), &attempt.render_comment().unwrap())
            .unwrap();
    bot.cleanup(true, true).await.unwrap();

    assert!(h.obs.project(PROJECT).is_none());
}

#[tokio::test]
async fn malformed_or_foreign_comments_are_rejected() {
    let h = Harness::new();
    let err = StagingBot::from_comment(config(), h.remotes(), "looks good to me").unwrap_err();
    assert!(matches!(err, StagingError::Parse(_)));

    let attempt = created(&mut h.bot(), &python_bump()).await;
    let comment = attempt
        .render_comment()
        .unwrap()
        .replace("home:bci-bot:", "home:mallory:");
    let err = StagingBot::from_comment(config(), h.remotes(), &comment).unwrap_err();
    assert!(matches!(err, StagingError::Parse(_)));
}

#[tokio::test]
async fn attach_needs_a_branch_name_or_run_id() {
    let h = Harness::new();
    created(&mut h.bot(), &python_bump()).await;

    let config = BotConfig::new(OsVersion::Sp7, USER).with_credentials("secret");
    let err = StagingBot::attach(config.clone(), h.remotes()).unwrap_err();
    assert!(matches!(err, StagingError::Config(_)));
    assert!(h.obs.project(PROJECT).is_some());

    let mut bot = StagingBot::attach(config.with_run_id("42"), h.remotes()).unwrap();
    assert_eq!(bot.attempt().project_name, PROJECT);
    let report = bot.cleanup(true, true).await.unwrap();
    assert_eq!(report.project, Some(Removal::Deleted));
    assert!(h.obs.project(PROJECT).is_none());
}

// ===========================================================================
// maintenance commands
// ===========================================================================

#[tokio::test]
async fn container_urls_prefer_latest() {
    let h = Harness::new();
    let registry = MemoryRegistry::new("registry.opensuse.org")
        .with_image(
            "home/bci-bot/bci/staging/sle-15-sp7/sle15-sp7-42/bci/python",
            ["3.11", "latest"],
        )
        .with_image(
            "home/bci-bot/bci/staging/sle-15-sp7/sle15-sp7-42/bci/golang",
            ["1.22"],
        )
        .with_image("opensuse/tumbleweed", ["latest"]);
    let remotes = Remotes {
        registry: Arc::new(registry),
        ..h.remotes()
    };
    let bot = StagingBot::attach(config(), remotes).unwrap();

    let urls = bot.get_container_urls().await.unwrap();

    assert_eq!(
        urls,
        vec![
            "registry.opensuse.org/home/bci-bot/bci/staging/sle-15-sp7/sle15-sp7-42/bci/golang:1.22",
            "registry.opensuse.org/home/bci-bot/bci/staging/sle-15-sp7/sle15-sp7-42/bci/python:latest",
        ]
    );
}

#[tokio::test]
async fn no_published_images_is_an_error() {
    let h = Harness::new();
    let bot = StagingBot::attach(config(), h.remotes()).unwrap();
    let err = bot.get_container_urls().await.unwrap_err();
    assert!(matches!(
        err,
        StagingError::RemoteService(ObsError::NotFound(_))
    ));
}

fn for_deploy() -> RecipeSet {
    deployment().with_file(
        "python-3.11/Dockerfile",
        "FROM bci/bci-base:15.7\nRUN zypper -n in python311-pip\n",
    )
}

#[tokio::test(start_paused = true)]
async fn changelog_entry_survives_push_races() {
    let h = Harness::new();
    h.git.seed_branch("for-deploy-sle15-sp7", &for_deploy());
    h.git.reject_next_pushes(2);

    let bot = h.bot();
    bot.add_changelog_entry("Add python311-pip", &[]).await.unwrap();

    let files = h.git.branch_files("for-deploy-sle15-sp7").unwrap();
    let changes = String::from_utf8_lossy(files.get("python-3.11/python-3.11.changes").unwrap());
    assert!(changes.contains("- Add python311-pip"));
    assert!(changes.ends_with("- initial\n"));
    let golang = files.get("golang-1.22/golang-1.22.changes").unwrap();
    assert_eq!(golang, b"- initial\n");

    let missing = bot
        .changelog_check(DEPLOYMENT, "for-deploy-sle15-sp7")
        .await
        .unwrap();
    assert!(missing.is_empty());
}

#[tokio::test(start_paused = true)]
async fn changelog_entry_gives_up_after_three_rejected_pushes() {
    let h = Harness::new();
    h.git.seed_branch("for-deploy-sle15-sp7", &for_deploy());
    h.git.reject_next_pushes(3);

    let err = h
        .bot()
        .add_changelog_entry("Add python311-pip", &["python-3.11".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, StagingError::RemoteService(ObsError::CommandFailed { .. })));
}

#[tokio::test]
async fn changelog_entry_needs_text_and_packages() {
    let h = Harness::new();
    h.git.seed_branch("for-deploy-sle15-sp7", &deployment());
    let bot = h.bot().with_push_retry(RetryPolicy::no_retry());

    assert!(matches!(
        bot.add_changelog_entry("  ", &[]).await.unwrap_err(),
        StagingError::Config(_)
    ));
    assert!(matches!(
        bot.add_changelog_entry("Bump", &[]).await.unwrap_err(),
        StagingError::Config(_)
    ));
}

#[tokio::test]
async fn changelog_check_lists_packages_without_entry() {
    let h = Harness::new();
    let head = python_and_golang_bump()
        .with_file(
            "python-3.11/python-3.11.changes",
            "----\nheader\n\n- Add python311-pip\n\n- initial\n",
        )
        .with_file("golang-1.22/golang-1.22.changes", "- initial\n")
        .with_file("_config", "Prefer: python311\n");
    h.git.seed_branch("pr-head", &head);

    let missing = h.bot().changelog_check(DEPLOYMENT, "pr-head").await.unwrap();
    assert_eq!(missing, vec!["golang-1.22"]);
}

#[tokio::test]
async fn missing_packages_of_the_devel_project() {
    let h = Harness::new();
    h.obs.insert_project(DEVEL, ["python-3.11", "obsolete-1.0"]);

    let missing = h.bot().find_missing_packages().await.unwrap();
    assert_eq!(missing, vec!["golang-1.22"]);
}

#[tokio::test]
async fn setup_obs_project_configures_the_devel_project() {
    let h = Harness::new();
    let project = h.bot().setup_obs_project().await.unwrap();

    assert_eq!(project, DEVEL);
    let devel = h.obs.project(DEVEL).unwrap();
    assert!(devel.meta.contains("BCI Development project for SLE 15 SP7"));
    assert_eq!(devel.prjconf.as_deref(), Some("Prefer: python311\n"));
    assert!(devel.attributes["OSRT:Config"].starts_with("main-repo = standard"));
}

#[tokio::test]
async fn create_cr_project_writes_the_meta() {
    let h = Harness::new();
    let project = h.bot().create_cr_project().await.unwrap();

    assert_eq!(project, "home:bci-bot:BCI:CR:SLE-15-SP7");
    let meta = h.obs.project(&project).unwrap().meta;
    assert!(meta.contains("<scmsync>https://github.com/SUSE/bci-dockerfile-generator#sle15-sp7</scmsync>"));
}

#[tokio::test]
async fn setup_obs_package_syncs_from_the_deployment_branch() {
    let h = Harness::new();
    h.obs.insert_project(DEVEL, ["python-3.11"]);

    let project = h
        .bot()
        .setup_obs_package(&["golang-1.22".to_string()])
        .await
        .unwrap();

    assert_eq!(project, DEVEL);
    let devel = h.obs.project(DEVEL).unwrap();
    let meta = &devel.packages["golang-1.22"];
    assert!(meta.contains(r#"<package name="golang-1.22" project="devel:BCI:SLE-15-SP7">"#));
    assert!(meta.contains("?subdir=golang-1.22#sle15-sp7"));
}

#[tokio::test]
async fn setup_obs_package_rejects_unknown_packages() {
    let h = Harness::new();
    h.obs.insert_project(DEVEL, Vec::<String>::new());

    let err = h
        .bot()
        .setup_obs_package(&["golang-1.22".to_string(), "nodejs-22".to_string()])
        .await
        .unwrap_err();

    match err {
        StagingError::Config(message) => {
            assert!(message.starts_with("nodejs-22 not a package"));
            assert!(message.contains("golang-1.22, python-3.11"));
        }
        other => panic!("expected a config error, got {other:?}"),
    }
    assert!(h.obs.project(DEVEL).unwrap().packages.is_empty());
    assert!(h.bot().setup_obs_package(&[]).await.is_err());
}
