use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tandem_local::FsLocalStore;
use tandem_remote::GitHubRemote;
use tandem_sync::orchestrator::JOURNAL_FILE_NAME;
use tandem_sync::{CacheFile, SyncJournal, SyncOrchestrator, SyncReport};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Keep a local folder and a GitHub branch in sync", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (default: ~/.tandem/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new config file
    Init {
        /// Local folder to sync
        #[arg(short, long)]
        root: PathBuf,

        /// Repository owner
        #[arg(long)]
        owner: String,

        /// Repository name
        #[arg(long)]
        repo: String,

        /// Branch to sync with
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Directory for the cache and journal
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Run one sync cycle
    Sync,

    /// Show what the last successful sync recorded
    Status,

    /// Show recent sync attempts and their clashes
    History {
        /// Number of attempts to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

/// `RUST_LOG` directives when set and valid, otherwise the `-v` level
fn log_filter(from_env: Option<&str>, verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    from_env
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(from_env.as_deref(), cli.verbose))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::get_config_path()?,
    };

    match cli.command {
        Commands::Init {
            root,
            owner,
            repo,
            branch,
            state_dir,
            force,
        } => init(&config_path, root, owner, repo, branch, state_dir, force),
        Commands::Sync => sync(&Config::load(&config_path)?).await,
        Commands::Status => status(&Config::load(&config_path)?).await,
        Commands::History { limit } => history(&Config::load(&config_path)?, limit).await,
    }
}

fn init(
    config_path: &Path,
    root: PathBuf,
    owner: String,
    repo: String,
    branch: String,
    state_dir: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    let root = std::fs::canonicalize(&root)
        .with_context(|| format!("Local folder not found: {}", root.display()))?;
    let state_dir = match state_dir {
        Some(dir) => dir,
        None => config::default_state_dir()?,
    };

    let mut config = Config::new(root, state_dir, owner, repo);
    config.remote.branch = branch;
    config.save(config_path)?;

    println!("Config written to {}", config_path.display());
    println!(
        "Syncing {} with {}/{}@{}",
        config.local_root.display(),
        config.remote.owner,
        config.remote.repo,
        config.remote.branch
    );
    println!(
        "Set {} to a token with contents access before the first sync",
        config.remote.token_env
    );
    Ok(())
}

async fn sync(config: &Config) -> Result<()> {
    if !config.local_root.is_dir() {
        bail!("Local folder not found: {}", config.local_root.display());
    }

    let local = Arc::new(FsLocalStore::new(&config.local_root, config.rules()));
    let remote = Arc::new(GitHubRemote::new(config.github_config())?);
    let orchestrator = SyncOrchestrator::new(config.sync_config(), local, remote).await?;

    let report = orchestrator.sync().await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.is_quiet() {
        println!("Already in sync at {}", report.revision);
        return;
    }

    println!("Synced at {}", report.revision);
    for change in &report.pushed {
        println!("  pushed   {:<8} {}", change.kind.as_str(), change.path);
    }
    for change in &report.pulled {
        println!("  pulled   {:<8} {}", change.kind.as_str(), change.path);
    }
    for path in &report.withheld {
        println!("  withheld delete   {} (could not confirm it is gone)", path);
    }
    for unresolved in &report.unresolved {
        match &unresolved.quarantine_path {
            Some(copy) => println!(
                "  clash    {} -> remote version saved to {}",
                unresolved.clash.path, copy
            ),
            None => println!(
                "  clash    {} ({})",
                unresolved.clash.path,
                unresolved.action.as_str()
            ),
        }
    }
    println!(
        "{} pushed, {} pulled, {} unresolved in {} ms",
        report.pushed.len(),
        report.pulled.len(),
        report.unresolved.len(),
        report.duration().num_milliseconds()
    );
}

async fn status(config: &Config) -> Result<()> {
    let cache = CacheFile::in_dir(&config.state_dir).load().await?;

    println!("Local folder: {}", config.local_root.display());
    println!(
        "Remote:       {}/{}@{}",
        config.remote.owner, config.remote.repo, config.remote.branch
    );
    match &cache.remote_revision {
        Some(revision) => println!("Last synced:  {}", revision),
        None => println!("Last synced:  never"),
    }
    println!("Local files:  {}", cache.local_snapshot.len());
    println!("Remote files: {}", cache.remote_snapshot.len());

    if let Some(journal) = open_journal(config)? {
        if let Some(last) = journal.recent_attempts(1).await?.first() {
            let outcome = if last.success {
                "succeeded".to_string()
            } else {
                format!(
                    "failed ({})",
                    last.error_kind.as_deref().unwrap_or("unknown")
                )
            };
            println!(
                "Last attempt: {} {}",
                last.finished_at.format("%Y-%m-%d %H:%M:%S"),
                outcome
            );
        }
    }
    Ok(())
}

async fn history(config: &Config, limit: usize) -> Result<()> {
    let Some(journal) = open_journal(config)? else {
        println!("No sync attempts recorded");
        return Ok(());
    };

    let attempts = journal.recent_attempts(limit).await?;
    if attempts.is_empty() {
        println!("No sync attempts recorded");
        return Ok(());
    }

    for attempt in attempts {
        let when = attempt.started_at.format("%Y-%m-%d %H:%M:%S");
        if attempt.success {
            println!(
                "{}  ok      {}  {} pushed, {} pulled, {} unresolved",
                when,
                attempt.revision.as_deref().unwrap_or("-"),
                attempt.pushed,
                attempt.pulled,
                attempt.unresolved
            );
        } else {
            println!(
                "{}  failed  {}: {}",
                when,
                attempt.error_kind.as_deref().unwrap_or("unknown"),
                attempt.error_message.as_deref().unwrap_or("")
            );
        }

        if let Some(id) = attempt.id {
            for clash in journal.clashes_for(id).await? {
                println!(
                    "    {} (local {}, remote {}) {}{}",
                    clash.path,
                    clash.local_state,
                    clash.remote_change,
                    clash.action,
                    clash
                        .quarantine_path
                        .map(|p| format!(" -> {}", p))
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn open_journal(config: &Config) -> Result<Option<SyncJournal>> {
    let path = config.state_dir.join(JOURNAL_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let journal = SyncJournal::open(&path)
        .with_context(|| format!("Failed to open journal: {}", path.display()))?;
    Ok(Some(journal))
}
