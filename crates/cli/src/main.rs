use std::{
    fs::{self, OpenOptions},
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

use cashrace_core::{
    config::{self, EngineConfig},
    Command, CommandOutcome, FileRepository, GameEngine, GameError, Ledger, Repository,
    TransactionLog,
};

/// Line printed for a command the engine rejected.
#[derive(Serialize)]
struct Rejection<'a> {
    line: usize,
    error: &'a str,
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    config::ensure_default_config()?;
    let config = EngineConfig::load()?;
    info!(data_root = %config.data_root.display(), "starting cashrace");

    let repository: Arc<dyn Repository> = Arc::new(FileRepository::new(&config.data_root));
    let (sink, log_task) =
        TransactionLog::spawn(Arc::clone(&repository), config.transaction_retry_attempts);
    let engine = Arc::new(GameEngine::new(repository, Ledger::new(sink), config));

    let mut events = engine.subscribe();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(race_id = event.race_id(), ?event, "game event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let input: Box<dyn AsyncBufRead + Unpin + Send> = match std::env::args().nth(1) {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {path}"))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(io::stdin())),
    };
    replay(Arc::clone(&engine), input).await?;

    drop(engine);
    if let Err(err) = log_task.await {
        error!("transaction log task failed: {err}");
    }
    if let Err(err) = event_task.await {
        error!("event listener failed: {err}");
    }
    Ok(())
}

/// Dispatch every JSON line of `input`, printing one JSON result per command.
async fn replay(
    engine: Arc<GameEngine>,
    input: Box<dyn AsyncBufRead + Unpin + Send>,
) -> Result<()> {
    let mut lines = input.lines();
    let mut number = 0;
    while let Some(line) = lines.next_line().await.context("failed to read command")? {
        number += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command: Command = match serde_json::from_str(line) {
            Ok(command) => command,
            Err(err) => {
                warn!(line = number, "skipping malformed command: {err}");
                print_rejection(number, "malformed_command", err.to_string())?;
                continue;
            }
        };

        let engine = Arc::clone(&engine);
        let result = tokio::task::spawn_blocking(move || engine.dispatch(command))
            .await
            .context("command task panicked")?;
        match result {
            Ok(outcome) => print_outcome(&outcome)?,
            Err(err) => {
                warn!(line = number, kind = err.kind(), "command rejected: {err}");
                print_rejection(number, err.kind(), describe(&err))?;
            }
        }
    }
    Ok(())
}

fn describe(err: &GameError) -> String {
    match err {
        GameError::Storage(inner) => format!("{inner:#}"),
        other => other.to_string(),
    }
}

fn print_outcome(outcome: &CommandOutcome) -> Result<()> {
    println!("{}", serde_json::to_string(outcome)?);
    Ok(())
}

fn print_rejection(line: usize, error: &str, message: String) -> Result<()> {
    let rejection = Rejection {
        line,
        error,
        message,
    };
    println!("{}", serde_json::to_string(&rejection)?);
    Ok(())
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("cashrace.log");

    let env_filter = EnvFilter::from_default_env();

    // Command results go to stdout, so console logging uses stderr.
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_ansi(false)
        .with_writer(move || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .expect("failed to open log file")
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
