//! omni-scheduler CLI: run shell commands or hash files with bounded parallelism.
//!
//! Logging: set `RUST_LOG=omni_scheduler=debug` to see scheduler logs on stderr.

mod cli;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use omni_scheduler::{CommandSpec, Scheduler, SchedulerConfig, SchedulerError, hash_file};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing: RUST_LOG overrides; --verbose => debug; else info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "omni_scheduler=debug"
        } else {
            "omni_scheduler=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let code = match cli.command {
        Command::Exec {
            limit,
            cancel_on_first_failure,
            keep_going,
            timeout_secs,
        } => {
            let mut config = resolve_config(limit);
            config.cancel_on_first_failure |= cancel_on_first_failure;
            config.collect_failures = keep_going;
            run_exec(config, timeout_secs.map(Duration::from_secs)).await?
        }
        Command::Hash { limit, paths } => run_hash(resolve_config(limit), paths).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// CLI flag, then `OMNI_SCHEDULER_*` environment, then defaults.
fn resolve_config(limit: Option<usize>) -> SchedulerConfig {
    let mut config = SchedulerConfig::from_env();
    if let Some(limit) = limit {
        config.limit = limit;
    }
    config
}

async fn run_exec(config: SchedulerConfig, timeout: Option<Duration>) -> Result<i32> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut commands = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            commands.push(line.to_string());
        }
    }

    let jobs = commands.into_iter().map(move |line| {
        let spec = CommandSpec::new("sh").arg("-c").arg(line);
        let spec = match timeout {
            Some(timeout) => spec.timeout(timeout),
            None => spec,
        };
        spec.into_job()
    });

    let mut outputs = Scheduler::new(config).stream(jobs)?;
    let mut stdout = tokio::io::stdout();
    let mut code = 0;
    while let Some(output) = outputs.next().await {
        match output {
            Ok(bytes) => {
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
            Err(SchedulerError::Job(error)) => code = error.report(),
            Err(other) => return Err(other.into()),
        }
    }
    Ok(code)
}

async fn run_hash(config: SchedulerConfig, paths: Vec<PathBuf>) -> Result<i32> {
    let mut digests = Scheduler::new(config).stream(paths.into_iter().map(hash_file))?;
    let mut stdout = tokio::io::stdout();
    let mut code = 0;
    while let Some(digest) = digests.next().await {
        match digest {
            Ok(digest) => {
                let line = format!("{}  {}\n", digest.sha256, digest.path.display());
                stdout.write_all(line.as_bytes()).await?;
            }
            Err(SchedulerError::Job(error)) => {
                tracing::error!("{error}");
                code = 1;
            }
            Err(other) => return Err(other.into()),
        }
    }
    stdout.flush().await?;
    Ok(code)
}
