//! Flatworm - Auto-save uncommitted work to a shadow branch
//!
//! CLI entry point: config management, one-shot cycles, and the
//! long-running watcher.

use flatworm::{
    cli::{prompt_config, Cli, Commands},
    watch::PollWatcher,
    Config, CycleOutcome, CycleReport, Git2Repo, GitOps, PendingSignal, Result, RollbackStatus,
    SyncEngine, SyncLoop, TracingObserver,
};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Set up logging; RUST_LOG overrides the default level
    let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    let config_path = cli.config_path()?;

    // Execute command
    match cli.command {
        Commands::Init {
            repo,
            branch,
            exclude,
            remote,
            interval_ms,
        } => cmd_init(&config_path, repo, branch, exclude, remote, interval_ms).await,
        Commands::Watch => cmd_watch(&config_path).await,
        Commands::Sync { json } => cmd_sync(&config_path, json).await,
        Commands::Status => cmd_status(&config_path).await,
    }
}

async fn cmd_init(
    config_path: &Path,
    repo: PathBuf,
    branch: String,
    exclude: Vec<String>,
    remote: String,
    interval_ms: u64,
) -> Result<()> {
    let repo = repo.canonicalize().unwrap_or(repo);
    let mut config = Config::new(repo, branch)
        .with_exclusions(exclude)
        .with_remote(remote);
    config.poll_interval_ms = interval_ms;

    config.validate()?;
    // Fail early on something that is not a work tree
    Git2Repo::open(&config.repository_path, config.remote.clone())?;
    config.save(config_path)?;

    println!("Wrote config to {:?}", config_path);
    println!("  Repository:  {:?}", config.repository_path);
    println!("  Auto-save:   {} -> {}", config.auto_save_branch, config.remote);
    if !config.exclusion_patterns.is_empty() {
        println!("  Excluding:   {}", config.exclusion_patterns.join(", "));
    }
    println!();
    println!("Next: run 'flatworm watch' to start auto-saving");

    Ok(())
}

async fn cmd_watch(config_path: &Path) -> Result<()> {
    let config = load_or_prompt(config_path)?;
    let engine = SyncEngine::open(config.clone(), Arc::new(TracingObserver))?;
    let root = engine
        .repo()
        .workdir()
        .unwrap_or_else(|| config.repository_path.clone());

    let signal = Arc::new(PendingSignal::new());
    // Save whatever is already dirty at startup
    signal.raise();

    let watcher = PollWatcher::new(&root, Arc::clone(&signal), config.poll_interval());
    let watcher = tokio::spawn(watcher.run());

    info!(
        "Auto-saving {:?} to {}/{}; Ctrl-C to stop",
        root, config.remote, config.auto_save_branch
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let stats = SyncLoop::new(engine, signal).run(shutdown).await?;
    watcher.abort();

    println!(
        "Stopped after {} cycle(s): {} saved, {} clean, {} aborted",
        stats.cycles, stats.successes, stats.no_ops, stats.aborted
    );
    if stats.rollback_failures > 0 {
        println!("WARNING: {} rollback failure(s); check your branch", stats.rollback_failures);
    }

    Ok(())
}

async fn cmd_sync(config_path: &Path, json: bool) -> Result<()> {
    let config = load_or_prompt(config_path)?;
    let engine = SyncEngine::open(config, Arc::new(TracingObserver))?;

    let report = tokio::task::spawn_blocking(move || engine.run_cycle()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let RollbackStatus::Failed { reason } = report.rollback {
        return Err(flatworm::Error::RollbackFailed {
            branch: report.origin_branch.unwrap_or_default(),
            reason,
        });
    }

    Ok(())
}

async fn cmd_status(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let repo = Git2Repo::open(&config.repository_path, config.remote.clone())?;

    println!("Config: {:?}", config_path);
    println!("Repository: {:?}", config.repository_path);

    match repo.current_branch()? {
        Some(branch) => {
            print!("Branch: {}", branch);
            if let Ok(head) = repo.head() {
                print!(" ({})", head.short());
            }
            println!();
        }
        None => println!("Branch: (detached HEAD)"),
    }

    println!("Dirty: {}", if repo.is_dirty()? { "yes" } else { "no" });

    let branch = &config.auto_save_branch;
    let local = if repo.branch_exists(branch)? { "yes" } else { "no" };
    println!("\nAuto-save branch: {}", branch);
    println!("  Local:  {}", local);
    match repo.remote_has_branch(branch) {
        Ok(on_remote) => {
            let on_remote = if on_remote { "yes" } else { "no" };
            println!("  Remote: {} ({})", on_remote, config.remote);
        }
        Err(e) => println!("  Remote: unreachable ({})", e),
    }

    if !config.exclusion_patterns.is_empty() {
        println!("\nExcluding: {}", config.exclusion_patterns.join(", "));
    }

    Ok(())
}

fn print_report(report: &CycleReport) {
    match &report.outcome {
        CycleOutcome::NoOp => println!("Nothing to save: working tree is clean."),
        CycleOutcome::Success {
            commit,
            excluded,
            ..
        } => {
            match commit {
                Some(commit) => println!("Auto-saved as {}", commit.short()),
                None => println!("Auto-save branch already up to date."),
            }
            if !excluded.is_empty() {
                println!("  Excluded: {}", excluded.join(", "));
            }
        }
        CycleOutcome::Aborted { stage, reason } => {
            println!("Cycle aborted during {}: {}", stage, reason);
        }
    }

    if let Some(origin) = &report.origin_branch {
        match &report.rollback {
            RollbackStatus::Restored => println!("  Restored {}.", origin),
            RollbackStatus::Failed { reason } => println!("  FAILED to restore {}: {}", origin, reason),
            RollbackStatus::NotNeeded => {}
        }
    }
}

/// Load the config, asking on the terminal when there is none yet
fn load_or_prompt(config_path: &Path) -> Result<Config> {
    if let Some(config) = Config::load_optional(config_path)? {
        return Ok(config);
    }

    if !std::io::stdin().is_terminal() {
        return Err(flatworm::Error::ConfigMissing(config_path.to_path_buf()));
    }

    println!("No config at {:?}; let's create one.", config_path);
    let config = prompt_config(&mut std::io::stdin().lock(), &mut std::io::stdout())?;
    config.save(config_path)?;
    println!("Saved config to {:?}", config_path);

    Ok(config)
}
