//! `mailscore` - score, label and audit email with a local language model.
//!
//! Reads a JSON mailbox snapshot, asks an OpenAI-compatible local server
//! (LM Studio by default) to classify each new email, applies labels and
//! records every decision in `SQLite`.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailscore_core::{
    BatchParams, Config, Error, FeedbackAnalyzer, Ledger, MailboxFile, OpenAiClient,
    ScoreRepository, ScoringPipeline,
};

use cli::{Cli, Command};

const APP_DIR: &str = "mailscore";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailscore=info,mailscore_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    if matches!(cli.command, Command::Doctor) {
        return doctor(&config_path).await;
    }

    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match cli.command {
        Command::Run { hours, process_all } => run_once(&config, hours, process_all).await,
        Command::Watch => watch(&config).await,
        Command::Report { days } => report(&config, days).await,
        Command::Accuracy { days } => accuracy(&config, days).await,
        Command::ResetWindow { hours } => reset_window(&config, hours).await,
        Command::Doctor => Ok(()),
    }
}

/// Score new email once.
async fn run_once(config: &Config, hours: Option<i64>, process_all: bool) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    pipeline.ensure_labels().await?;

    let mut params = BatchParams::now().reprocess(process_all);
    if let Some(hours) = hours {
        let start = look_back(params.window_end, TimeDelta::try_hours(hours), "--hours")?;
        params = params.starting_at(start);
    }

    let cancel = cancel_on_ctrl_c();
    let result = pipeline.run_batch(params, &cancel).await;
    if held_lock(&result) {
        pipeline
            .store()
            .flush()
            .await
            .context("Failed to write mailbox")?;
    }

    let summary = result?;
    println!("Batch complete: {summary}");
    Ok(())
}

/// Score new email on an interval until interrupted.
async fn watch(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    pipeline.ensure_labels().await?;

    let interval = Duration::from_secs(config.processing.continuous_interval_secs);
    let retry_delay = Duration::from_secs(config.processing.retry_delay_secs);
    let cancel = cancel_on_ctrl_c();
    info!(interval_secs = interval.as_secs(), "Watching for new email");

    loop {
        // Pick up mail delivered and state changed since the last batch.
        let result = match pipeline.store().reload().await {
            Ok(()) => {
                let result = pipeline.run_batch(BatchParams::now(), &cancel).await;
                if held_lock(&result)
                    && let Err(e) = pipeline.store().flush().await
                {
                    error!(error = %e, "Failed to write mailbox");
                }
                result
            }
            Err(e) => Err(e),
        };

        let pause = match result {
            Ok(summary) => {
                info!(%summary, "Batch complete");
                interval
            }
            Err(Error::Cancelled { processed }) => {
                info!(processed, "Stopped");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, retry_secs = retry_delay.as_secs(), "Batch failed");
                retry_delay
            }
        };

        tokio::select! {
            () = cancel.cancelled() => {
                info!("Stopped");
                return Ok(());
            }
            () = tokio::time::sleep(pause) => {}
        }
    }
}

/// Print the scoring report.
async fn report(config: &Config, days: Option<i64>) -> Result<()> {
    let repo = open_repository(config).await?;
    let days = days.unwrap_or(config.report.days_back);
    let since = look_back(Utc::now(), TimeDelta::try_days(days), "--days")?;
    let stats = repo
        .stats(
            since,
            config.thresholds.high_importance,
            config.thresholds.spam,
        )
        .await?;

    print!("{stats}");
    Ok(())
}

/// Print the accuracy report.
async fn accuracy(config: &Config, days: Option<i64>) -> Result<()> {
    let repo = open_repository(config).await?;
    let mailbox = open_mailbox(config).await?;

    let until = Utc::now();
    let days = days.unwrap_or(config.report.days_back);
    let since = look_back(until, TimeDelta::try_days(days), "--days")?;
    let report = FeedbackAnalyzer::new(&mailbox, &repo, config)
        .compute_accuracy(since, until)
        .await?;

    print!("{report}");
    Ok(())
}

/// Move the processing window.
async fn reset_window(config: &Config, hours: i64) -> Result<()> {
    let repo = open_repository(config).await?;
    let ledger = Ledger::new(repo, config.processing.lock_ttl_secs);

    let to = look_back(Utc::now(), TimeDelta::try_hours(hours), "--hours")?;
    ledger.reset_window(to).await?;
    println!("Processing window reset to {}", to.format("%Y-%m-%d %H:%M UTC"));
    Ok(())
}

/// Check every dependency and report what is wrong.
async fn doctor(config_path: &Path) -> Result<()> {
    let mut healthy = true;

    println!("Config: {}", config_path.display());
    let config = match Config::load_or_default(config_path) {
        Ok(config) => {
            println!("  ok{}", if config_path.exists() { "" } else { " (defaults, no file)" });
            config
        }
        Err(e) => {
            println!("  FAILED: {e}");
            return Err(e.into());
        }
    };

    let db_path = database_path(&config);
    println!("Database: {}", db_path.display());
    match open_repository(&config).await {
        Ok(repo) => match Ledger::new(repo, config.processing.lock_ttl_secs)
            .last_processed()
            .await
        {
            Ok(Some(mark)) => {
                println!("  ok, last processed {}", mark.format("%Y-%m-%d %H:%M UTC"));
            }
            Ok(None) => println!("  ok, nothing processed yet"),
            Err(e) => {
                healthy = false;
                println!("  FAILED: {e}");
            }
        },
        Err(e) => {
            healthy = false;
            println!("  FAILED: {e:#}");
        }
    }

    let mailbox_file = mailbox_path(&config);
    println!("Mailbox: {}", mailbox_file.display());
    match MailboxFile::open(&mailbox_file).await {
        Ok(mailbox) => println!("  ok, {} messages", mailbox.len()),
        Err(e) => {
            healthy = false;
            println!("  FAILED: {e}");
        }
    }

    println!("Inference: {} (model {})", config.inference.base_url, config.inference.model);
    match OpenAiClient::new(&config.inference) {
        Ok(client) => match client.list_models().await {
            Ok(models) if models.iter().any(|m| *m == config.inference.model) => {
                println!("  ok, {} models available", models.len());
            }
            Ok(models) => {
                healthy = false;
                println!("  FAILED: model not loaded; available: {}", models.join(", "));
            }
            Err(e) => {
                healthy = false;
                println!("  FAILED: {e}");
            }
        },
        Err(e) => {
            healthy = false;
            println!("  FAILED: {e}");
        }
    }

    if healthy {
        println!("All checks passed.");
        Ok(())
    } else {
        anyhow::bail!("one or more checks failed")
    }
}

/// `now` minus a look-back, unless it falls outside the representable range.
fn look_back(now: DateTime<Utc>, back: Option<TimeDelta>, what: &str) -> Result<DateTime<Utc>> {
    back.and_then(|back| now.checked_sub_signed(back))
        .with_context(|| format!("{what} is out of range"))
}

/// Whether this process ran the batch, so the mailbox snapshot is its to write.
///
/// Another process holding the lock owns the file until it finishes.
const fn held_lock<T>(result: &mailscore_core::Result<T>) -> bool {
    !matches!(result, Err(Error::BatchInProgress { .. }))
}

/// Cancel the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current email");
            child.cancel();
        }
    });
    token
}

async fn build_pipeline(config: &Config) -> Result<ScoringPipeline<MailboxFile, OpenAiClient>> {
    let repo = open_repository(config).await?;
    let mailbox = open_mailbox(config).await?;
    let client = OpenAiClient::new(&config.inference).context("Failed to build inference client")?;

    info!(
        endpoint = %config.inference.base_url,
        model = %config.inference.model,
        messages = mailbox.len(),
        "Pipeline ready"
    );
    Ok(ScoringPipeline::new(config, mailbox, client, repo))
}

async fn open_repository(config: &Config) -> Result<ScoreRepository> {
    let path = database_path(config);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    ScoreRepository::new(&path.to_string_lossy())
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))
}

async fn open_mailbox(config: &Config) -> Result<MailboxFile> {
    let path = mailbox_path(config);
    MailboxFile::open(&path)
        .await
        .with_context(|| format!("Failed to open mailbox {}", path.display()))
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn database_path(config: &Config) -> PathBuf {
    config
        .storage
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir().join("email_scores.db"))
}

fn mailbox_path(config: &Config) -> PathBuf {
    config
        .mailbox
        .path
        .clone()
        .unwrap_or_else(|| data_dir().join("mailbox.json"))
}
