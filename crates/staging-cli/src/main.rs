//! BCI staging bot CLI
//!
//! The `scratch-build-bot` command stages pull requests against the build
//! recipe repository on the Open Build Service.
//!
//! ## Commands
//!
//! - `scratch_build`: push the recipes, create the staging project, rebuild
//! - `wait`: poll until all builds are final
//! - `query_build_result`, `get_build_quality`: summary and verdict
//! - `cleanup`: delete the staging branch and project
//!
//! An earlier attempt is picked up from the bot's comment on stdin
//! (`--from-stdin`) or from the env file (`--load`).

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use obs_client::{GitRecipeRepository, OscClient, RecipeSet, RegistryClient};
use staging_core::{
    container_urls_markdown, init_tracing, level_from_verbosity, render_summary, BotConfig,
    BuildQualityVerdict, OsVersion, Remotes, ScratchBuildOutcome, StagingAttempt, StagingBot,
    WaitOutcome, DEFAULT_COMMIT_MESSAGE, DEFAULT_POLL_INTERVAL, ENV_FILE_NAME, MAX_WAIT,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scratch-build-bot")]
#[command(author = "SUSE BCI Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Scratch builds of BCI recipe pull requests on the Open Build Service", long_about = None)]
struct Cli {
    /// OS version to stage for (3-7, 16.0, Tumbleweed)
    #[arg(long, global = true, env = "OS_VERSION")]
    os_version: Option<OsVersion>,

    /// Staging branch name
    #[arg(short = 'b', long, global = true, env = "BRANCH_NAME")]
    branch_name: Option<String>,

    /// Build service user owning the staging projects
    #[arg(long, global = true, env = "OSC_USER")]
    osc_user: Option<String>,

    /// Build service password
    #[arg(long, global = true, env = "OSC_PASSWORD", hide_env_values = true)]
    osc_password: Option<String>,

    /// CI run identifier, used for the branch name
    #[arg(long, global = true, env = "RUN_ID")]
    run_id: Option<String>,

    /// Clone of the recipe repository
    #[arg(long, global = true, default_value = ".")]
    repo_dir: PathBuf,

    /// Directory with the rendered recipes
    #[arg(long, global = true)]
    recipes_dir: Option<PathBuf>,

    /// Env file the attempt is written to and loaded from
    #[arg(long, global = true, default_value = ENV_FILE_NAME)]
    env_file: PathBuf,

    /// Read the bot's pull request comment from stdin
    #[arg(short = 'f', long, global = true, conflicts_with = "load")]
    from_stdin: bool,

    /// Load the attempt from the env file
    #[arg(short = 'l', long, global = true)]
    load: bool,

    /// More output, repeat for more
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Push the recipes, create the staging project and rebuild it
    ScratchBuild {
        #[arg(short, long, default_value = DEFAULT_COMMIT_MESSAGE)]
        commit_message: String,
    },

    /// Push the recipes to the staging branch only
    CommitState {
        #[arg(short, long, default_value = DEFAULT_COMMIT_MESSAGE)]
        commit_message: String,
    },

    /// Create the staging project for an existing staging branch
    CreateStagingProject,

    /// Wipe the binaries of the staging project and rebuild it
    Rebuild,

    /// Wait until all builds are final
    Wait {
        /// Give up after this many seconds
        #[arg(short, long, default_value_t = MAX_WAIT.as_secs())]
        timeout_sec: u64,

        /// Seconds between two polls
        #[arg(
            long,
            default_value_t = DEFAULT_POLL_INTERVAL.as_secs(),
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        poll_interval_sec: u64,
    },

    /// Print the build results as markdown
    QueryBuildResult,

    /// Exit with an error unless all builds succeeded
    GetBuildQuality,

    /// Delete the staging branch and project
    Cleanup {
        /// Keep the staging branch
        #[arg(long)]
        no_cleanup_branch: bool,

        /// Keep the staging project
        #[arg(long)]
        no_cleanup_project: bool,
    },

    /// Configure the devel project
    SetupObsProject,

    /// Create or reconfigure packages in the devel project
    SetupObsPackage {
        #[arg(long, required = true, num_args = 1..)]
        package_name: Vec<String>,
    },

    /// Write the continuous rebuild project
    CreateCrProject,

    /// Add a changelog entry on the for-deploy branch
    AddChangelogEntry {
        /// Packages to add the entry to, default: all changed packages
        #[arg(long, env = "PACKAGES", value_delimiter = ',')]
        packages: Vec<String>,

        /// The entry
        #[arg(required = true, num_args = 1..)]
        entry: Vec<String>,
    },

    /// Fail if a changed package has no changelog entry
    ChangelogCheck {
        #[arg(long)]
        base_ref: String,

        #[arg(long, default_value = "HEAD")]
        head_ref: String,
    },

    /// List packages of the deployment branch missing in the devel project
    FindMissingPackages,

    /// Print pull urls of the images built in the staging project
    GetContainerUrls,
}

impl Commands {
    /// Commands that work on the staging project of an earlier attempt.
    fn targets_attempt(&self) -> bool {
        matches!(
            self,
            Commands::Rebuild
                | Commands::Wait { .. }
                | Commands::QueryBuildResult
                | Commands::GetBuildQuality
                | Commands::Cleanup { .. }
                | Commands::GetContainerUrls
        )
    }

    fn needs_build_service(&self) -> bool {
        !matches!(
            self,
            Commands::CommitState { .. }
                | Commands::AddChangelogEntry { .. }
                | Commands::ChangelogCheck { .. }
        )
    }
}

/// How the process should exit when no error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => ExitCode::SUCCESS,
            Outcome::Failure => ExitCode::FAILURE,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(cli.json, level_from_verbosity(cli.verbose));

    let mut bot = build_bot(&cli).await?;

    let outcome = match &cli.command {
        Commands::ScratchBuild { commit_message } => {
            let recipes = load_recipes(bot.config().recipes_dir.as_deref())?;
            cmd_scratch_build(&mut bot, &recipes, commit_message).await
        }
        Commands::CommitState { commit_message } => {
            let recipes = load_recipes(bot.config().recipes_dir.as_deref())?;
            cmd_commit_state(&mut bot, &recipes, commit_message).await
        }
        Commands::CreateStagingProject => cmd_create_staging_project(&mut bot).await,
        Commands::Rebuild => cmd_rebuild(&mut bot).await,
        Commands::Wait { timeout_sec, .. } => {
            cmd_wait(&mut bot, Duration::from_secs(*timeout_sec)).await
        }
        Commands::QueryBuildResult => cmd_query_build_result(&bot).await,
        Commands::GetBuildQuality => cmd_get_build_quality(&bot).await,
        Commands::Cleanup {
            no_cleanup_branch,
            no_cleanup_project,
        } => cmd_cleanup(&mut bot, !no_cleanup_branch, !no_cleanup_project).await,
        Commands::SetupObsProject => cmd_setup_obs_project(&bot).await,
        Commands::SetupObsPackage { package_name } => {
            cmd_setup_obs_package(&bot, package_name).await
        }
        Commands::CreateCrProject => cmd_create_cr_project(&bot).await,
        Commands::AddChangelogEntry { packages, entry } => {
            cmd_add_changelog_entry(&bot, &entry.join(" "), packages).await
        }
        Commands::ChangelogCheck { base_ref, head_ref } => {
            cmd_changelog_check(&bot, base_ref, head_ref).await
        }
        Commands::FindMissingPackages => cmd_find_missing_packages(&bot).await,
        Commands::GetContainerUrls => cmd_get_container_urls(&bot).await,
    }?;

    Ok(outcome.into())
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

async fn build_bot(cli: &Cli) -> Result<StagingBot> {
    let recovered = if cli.from_stdin {
        let mut comment = String::new();
        tokio::io::stdin()
            .read_to_string(&mut comment)
            .await
            .context("Failed to read the bot comment from stdin")?;
        let user = cli.osc_user.as_deref().context("OSC_USER is not set")?;
        Some(StagingAttempt::from_comment(&comment, user).context("Invalid bot comment")?)
    } else if cli.load {
        let attempt = StagingAttempt::load_env_file(&cli.env_file)
            .await
            .with_context(|| format!("Failed to load {}", cli.env_file.display()))?;
        Some(attempt)
    } else {
        None
    };

    let os_version = cli
        .os_version
        .or(recovered.as_ref().map(|a| a.os_version))
        .context("No OS version given, set --os-version or OS_VERSION")?;
    let osc_user = cli
        .osc_user
        .clone()
        .or_else(|| recovered.as_ref().map(|a| a.osc_user.clone()))
        .context("OSC_USER is not set")?;

    let config = bot_config(cli, os_version, osc_user);
    let remotes = connect(&config, cli.command.needs_build_service())?;

    let bot = match recovered {
        Some(attempt) => StagingBot::resume(config, remotes, attempt)?,
        None if cli.command.targets_attempt() => StagingBot::attach(config, remotes)?,
        None => StagingBot::new(config, remotes)?,
    };
    info!(
        branch = %bot.attempt().branch_name,
        project = %bot.attempt().project_name,
        "staging attempt"
    );
    Ok(bot)
}

fn bot_config(cli: &Cli, os_version: OsVersion, osc_user: String) -> BotConfig {
    let mut config = BotConfig::new(os_version, osc_user)
        .with_repo_dir(&cli.repo_dir)
        .with_env_file(&cli.env_file);
    if let Some(password) = &cli.osc_password {
        config = config.with_credentials(password.clone());
    }
    if let Some(branch) = &cli.branch_name {
        config = config.with_branch_name(branch.clone());
    }
    if let Some(run_id) = &cli.run_id {
        config = config.with_run_id(run_id.clone());
    }
    if let Some(recipes_dir) = &cli.recipes_dir {
        config = config.with_recipes_dir(recipes_dir);
    }
    if let Commands::Wait {
        poll_interval_sec, ..
    } = &cli.command
    {
        config = config.with_poll_interval(Duration::from_secs(*poll_interval_sec));
    }
    config
}

fn connect(config: &BotConfig, needs_build_service: bool) -> Result<Remotes> {
    let obs = if needs_build_service {
        let credentials = config.require_credentials()?;
        OscClient::with_credentials(config.api_url.clone(), credentials)
            .context("Failed to write the osc configuration")?
    } else {
        OscClient::new(config.api_url.clone())
    };
    let git = GitRecipeRepository::new(&config.repo_dir);
    let registry =
        RegistryClient::new(config.registry.clone()).context("Failed to create registry client")?;

    Ok(Remotes {
        obs: Arc::new(obs),
        git: Arc::new(git),
        registry: Arc::new(registry),
    })
}

fn load_recipes(recipes_dir: Option<&Path>) -> Result<RecipeSet> {
    let dir = recipes_dir.context("No recipes given, set --recipes-dir")?;
    let recipes = RecipeSet::from_dir(dir)
        .with_context(|| format!("Failed to read recipes from {}", dir.display()))?;
    if recipes.is_empty() {
        bail!("{} contains no recipes", dir.display());
    }
    Ok(recipes)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_scratch_build(
    bot: &mut StagingBot,
    recipes: &RecipeSet,
    commit_message: &str,
) -> Result<Outcome> {
    match bot.scratch_build(recipes, commit_message).await? {
        ScratchBuildOutcome::Created(attempt) => {
            println!("{}", attempt.render_comment()?);
        }
        ScratchBuildOutcome::NoChanges => {
            eprintln!("No changes, no staging project was created");
        }
    }
    Ok(Outcome::Success)
}

async fn cmd_commit_state(
    bot: &mut StagingBot,
    recipes: &RecipeSet,
    commit_message: &str,
) -> Result<Outcome> {
    match bot.commit_state(recipes, commit_message).await? {
        Some(commit) => println!("{commit}"),
        None => eprintln!("No changes"),
    }
    Ok(Outcome::Success)
}

async fn cmd_create_staging_project(bot: &mut StagingBot) -> Result<Outcome> {
    let project = bot.create_staging_project().await?;
    println!("{project}");
    Ok(Outcome::Success)
}

async fn cmd_rebuild(bot: &mut StagingBot) -> Result<Outcome> {
    bot.rebuild().await?;
    Ok(Outcome::Success)
}

async fn cmd_wait(bot: &mut StagingBot, timeout: Duration) -> Result<Outcome> {
    let poll_interval = bot.config().poll_interval;
    match bot.wait(poll_interval, timeout).await? {
        WaitOutcome::Finished(results) => {
            println!("{}", render_summary(&results));
            Ok(Outcome::Success)
        }
        WaitOutcome::TimedOut(results) => {
            println!("{}", render_summary(&results));
            warn!("builds in {} did not finish", bot.attempt().project_name);
            Ok(Outcome::Failure)
        }
    }
}

async fn cmd_query_build_result(bot: &StagingBot) -> Result<Outcome> {
    println!("{}", bot.query_build_result().await?);
    Ok(Outcome::Success)
}

async fn cmd_get_build_quality(bot: &StagingBot) -> Result<Outcome> {
    let (verdict, results) = bot.get_build_quality().await?;
    match verdict {
        BuildQualityVerdict::Pass => {
            println!("{}", verdict.headline());
            Ok(Outcome::Success)
        }
        BuildQualityVerdict::Fail => {
            println!("{}", render_summary(&results));
            Ok(Outcome::Failure)
        }
        BuildQualityVerdict::NotFinal => {
            println!("{}", render_summary(&results));
            bail!("builds in {} are not final yet", bot.attempt().project_name)
        }
    }
}

async fn cmd_cleanup(bot: &mut StagingBot, branches: bool, project: bool) -> Result<Outcome> {
    let report = bot.cleanup(branches, project).await?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(Outcome::Success)
}

async fn cmd_setup_obs_project(bot: &StagingBot) -> Result<Outcome> {
    println!("{}", bot.setup_obs_project().await?);
    Ok(Outcome::Success)
}

async fn cmd_setup_obs_package(bot: &StagingBot, packages: &[String]) -> Result<Outcome> {
    println!("{}", bot.setup_obs_package(packages).await?);
    Ok(Outcome::Success)
}

async fn cmd_create_cr_project(bot: &StagingBot) -> Result<Outcome> {
    println!("{}", bot.create_cr_project().await?);
    Ok(Outcome::Success)
}

async fn cmd_add_changelog_entry(
    bot: &StagingBot,
    entry: &str,
    packages: &[String],
) -> Result<Outcome> {
    let commit = bot.add_changelog_entry(entry, packages).await?;
    println!("{commit}");
    Ok(Outcome::Success)
}

async fn cmd_changelog_check(bot: &StagingBot, base: &str, head: &str) -> Result<Outcome> {
    let missing = bot.changelog_check(base, head).await?;
    if missing.is_empty() {
        return Ok(Outcome::Success);
    }
    for package in &missing {
        println!("{package}");
    }
    eprintln!(
        "No changelog entry for: {}. Run add_changelog_entry for them.",
        missing.join(", ")
    );
    Ok(Outcome::Failure)
}

async fn cmd_find_missing_packages(bot: &StagingBot) -> Result<Outcome> {
    for package in bot.find_missing_packages().await? {
        println!("{package}");
    }
    Ok(Outcome::Success)
}

async fn cmd_get_container_urls(bot: &StagingBot) -> Result<Outcome> {
    let urls = bot.get_container_urls().await?;
    println!("{}", container_urls_markdown(&urls));
    Ok(Outcome::Success)
}
