use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "omni-scheduler")]
#[command(about = "Run batches of jobs with bounded parallelism")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run one shell command per stdin line; print each stdout as it completes.
    Exec {
        /// Maximum concurrent commands (default: `OMNI_SCHEDULER_LIMIT` or CPU-based).
        #[arg(long)]
        limit: Option<usize>,

        /// Kill remaining commands as soon as one fails.
        #[arg(long)]
        cancel_on_first_failure: bool,

        /// Keep running after a failure; exit with the last failure's code.
        #[arg(long)]
        keep_going: bool,

        /// Per-command timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Print `<sha256>  <path>` for each file as it is hashed.
    Hash {
        /// Maximum files hashed concurrently.
        #[arg(long)]
        limit: Option<usize>,

        /// Files to hash.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}
