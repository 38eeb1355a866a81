//! paperbot: watch arXiv for tracked keywords and post new papers to Slack.

mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use paperbot_core::{defaults, ChannelId, KeywordSet, SeenPaperStore};
use paperbot_db::{FileSeenStore, KeywordFile, PgSeenStore};
use paperbot_jobs::{Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerHandle};
use paperbot_sources::{ArxivSource, SlackClient};

const LONG_ABOUT: &str = "\
Polls the arXiv API on a fixed interval, matches new papers against the
tracked keywords, and posts one Slack message per new match.

A paper id is recorded as seen before its message is posted. If the process
dies between the two, that paper is never announced; it is never announced
twice either. Run a single instance per cache folder or database.

On unix, SIGHUP reloads keywords.json into a running `paperbot run`.

Environment:
  SLACK_BOT_TOKEN            bot token for chat.postMessage (required)
  PAPERBOT_POLL_INTERVAL_SECS, PAPERBOT_MAX_ATTEMPTS,
  PAPERBOT_BACKOFF_INITIAL_MS, PAPERBOT_BACKOFF_MAX_MS,
  PAPERBOT_RUN_ON_START, PAPERBOT_ENABLED, PAPERBOT_HEADER
  ARXIV_BASE_URL, ARXIV_CATEGORIES, ARXIV_PAGE_SIZE, ARXIV_MAX_RESULTS,
  ARXIV_WAIT_TIME_MS, ARXIV_LOOKBACK_HOURS, SLACK_API_BASE
  LOG_FORMAT, LOG_FILE, LOG_ANSI, RUST_LOG";

#[derive(Parser)]
#[command(name = "paperbot")]
#[command(author, version, about = "arXiv keyword watcher that posts new papers to Slack")]
#[command(long_about = LONG_ABOUT)]
#[command(propagate_version = true)]
struct Cli {
    /// Folder holding keywords.json and seen.json
    #[arg(long, env = "PAPERBOT_CACHE_FOLDER", default_value = ".", global = true)]
    cache_folder: PathBuf,

    /// Slack channel that receives notifications
    #[arg(long, env = "PAPERBOT_CHANNEL", default_value = defaults::CHANNEL, global = true)]
    channel: String,

    /// Keep the seen set in PostgreSQL instead of seen.json
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Post a "Found N papers" message before each batch
    #[arg(long, env = "PAPERBOT_HEADER", global = true)]
    header: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll on the configured interval until interrupted
    Run,

    /// Run one cycle now and exit
    Once,

    /// Manage tracked keywords
    Keywords {
        #[command(subcommand)]
        action: KeywordAction,
    },
}

#[derive(Subcommand)]
enum KeywordAction {
    /// Print tracked keywords, one per line
    List,

    /// Track one or more keywords
    Add {
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Stop tracking one or more keywords
    Remove {
        #[arg(required = true)]
        terms: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _file_guard = init_tracing();

    match cli.command {
        Commands::Run => run(&cli).await,
        Commands::Once => once(&cli).await,
        Commands::Keywords { ref action } => keywords(&cli.cache_folder, action).await,
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: info for the paperbot crates)
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "paperbot=info,paperbot_jobs=info,paperbot_sources=info,paperbot_db=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("paperbot.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // no ANSI in files unless asked
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

async fn open_store(cli: &Cli) -> anyhow::Result<Arc<dyn SeenPaperStore>> {
    match cli.database_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => {
            info!("Connecting to database...");
            let store = PgSeenStore::connect(url)
                .await
                .context("failed to open PostgreSQL seen store")?;
            info!("Database connected");
            Ok(Arc::new(store))
        }
        None => {
            let store = FileSeenStore::open_in(&cli.cache_folder)
                .await
                .with_context(|| {
                    format!("failed to open seen store in {}", cli.cache_folder.display())
                })?;
            info!(path = %store.path().display(), "Using file seen store");
            Ok(Arc::new(store))
        }
    }
}

async fn build_scheduler(cli: &Cli) -> anyhow::Result<Scheduler> {
    let keywords = KeywordFile::in_folder(&cli.cache_folder)
        .load()
        .await
        .context("failed to load keywords")?;
    if keywords.is_empty() {
        warn!("No keywords tracked; add some with `paperbot keywords add <term>`");
    } else {
        info!(keywords = ?keywords.terms(), "Tracking keywords");
    }

    let source = ArxivSource::from_env().context("failed to configure arXiv source")?;
    let slack = SlackClient::from_env().context("failed to configure Slack client")?;
    let store = open_store(cli).await?;

    Ok(
        SchedulerBuilder::new(Arc::new(source), store, Arc::new(slack))
            .with_config(SchedulerConfig::from_env())
            .with_channel(ChannelId::new(cli.channel.as_str()))
            .with_keywords(keywords)
            .with_header(cli.header)
            .build(),
    )
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let scheduler = build_scheduler(cli).await?;
    if !scheduler.config().enabled {
        warn!("Scheduled polling disabled by PAPERBOT_ENABLED, nothing to run");
        return Ok(());
    }
    tokio::spawn(telemetry::event_mirror(scheduler.events()));

    let handle = scheduler.start();
    info!(channel = %cli.channel, "paperbot running, press Ctrl-C to stop");

    wait_for_shutdown(&handle, &cli.cache_folder).await;

    info!("Shutting down...");
    handle.shutdown().await?;
    handle.join().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Block until Ctrl-C. On unix, SIGHUP reloads keywords.json in between.
#[cfg(unix)]
async fn wait_for_shutdown(handle: &SchedulerHandle, cache_folder: &Path) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable, keyword reload disabled");
            wait_for_ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = wait_for_ctrl_c() => return,
            _ = hangup.recv() => reload_keywords(handle, cache_folder).await,
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_handle: &SchedulerHandle, _cache_folder: &Path) {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
async fn reload_keywords(handle: &SchedulerHandle, cache_folder: &Path) {
    match KeywordFile::in_folder(cache_folder).load().await {
        Ok(keywords) => handle.update_keywords(keywords).await,
        // Keep the current set on a bad edit.
        Err(e) => warn!(error = %e, "Keyword reload failed"),
    }
}

async fn once(cli: &Cli) -> anyhow::Result<()> {
    let scheduler = build_scheduler(cli).await?;
    let report = scheduler.run_once().await?;

    println!(
        "Cycle {}: {} new paper(s), {} delivered, {} failed ({} fetch attempt(s))",
        report.cycle_id,
        report.notified,
        report.outcome.delivered.len(),
        report.outcome.failures.len(),
        report.attempts
    );
    for failure in &report.outcome.failures {
        println!("  not delivered: {} ({})", failure.paper_id, failure.error);
    }
    Ok(())
}

async fn keywords(cache_folder: &Path, action: &KeywordAction) -> anyhow::Result<()> {
    let file = KeywordFile::in_folder(cache_folder);
    match action {
        KeywordAction::List => {
            let keywords: KeywordSet = file.load().await?;
            if keywords.is_empty() {
                println!("(no keywords tracked)");
            }
            for term in keywords.terms() {
                println!("{}", term);
            }
        }
        KeywordAction::Add { terms } => {
            let added = file.add(terms).await?;
            if added.is_empty() {
                println!("Already tracked, nothing changed");
            }
            for term in added {
                println!("Added: {}", term);
            }
        }
        KeywordAction::Remove { terms } => {
            let removed = file.remove(terms).await?;
            if removed.is_empty() {
                println!("None of those were tracked, nothing changed");
            }
            for term in removed {
                println!("Removed: {}", term);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["paperbot", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run));
        if std::env::var_os("PAPERBOT_CHANNEL").is_none() {
            assert_eq!(cli.channel, defaults::CHANNEL);
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "paperbot",
            "once",
            "--cache-folder",
            "/tmp/pb",
            "--channel",
            "#papers",
            "--header",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Once));
        assert_eq!(cli.cache_folder, PathBuf::from("/tmp/pb"));
        assert_eq!(cli.channel, "#papers");
        assert!(cli.header);
    }

    #[test]
    fn test_parse_keywords_add_multiple() {
        let cli =
            Cli::try_parse_from(["paperbot", "keywords", "add", "diffusion", "neural field"])
                .unwrap();
        match cli.command {
            Commands::Keywords {
                action: KeywordAction::Add { terms },
            } => assert_eq!(terms, vec!["diffusion", "neural field"]),
            _ => panic!("expected keywords add"),
        }
    }

    #[test]
    fn test_keywords_add_requires_a_term() {
        assert!(Cli::try_parse_from(["paperbot", "keywords", "add"]).is_err());
        assert!(Cli::try_parse_from(["paperbot", "keywords", "remove"]).is_err());
    }

    #[tokio::test]
    async fn test_keywords_commands_edit_file() {
        let dir = tempfile::tempdir().unwrap();

        keywords(
            dir.path(),
            &KeywordAction::Add {
                terms: vec!["Diffusion".into(), "GAN".into()],
            },
        )
        .await
        .unwrap();
        keywords(
            dir.path(),
            &KeywordAction::Remove {
                terms: vec!["gan".into()],
            },
        )
        .await
        .unwrap();

        let tracked = KeywordFile::in_folder(dir.path()).load().await.unwrap();
        assert_eq!(tracked.terms(), vec!["diffusion".to_string()]);
    }
}
