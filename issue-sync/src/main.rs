pub mod cache;
pub mod cancel;
pub mod commands;
pub mod comment;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod error;
pub mod fs_util;
pub mod issue_file;
pub mod pull;
pub mod push;
pub mod remap;
pub mod remote;
pub mod render;
pub mod store;
pub mod sync_lock;
pub mod types;

use std::env;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the tracing filter directive.
const LOG_ENV_VAR: &str = "ISSUE_SYNC_LOG";
/// `json` switches log output to JSON lines.
const LOG_FORMAT_ENV_VAR: &str = "ISSUE_SYNC_LOG_FORMAT";

#[derive(Parser)]
#[command(
    name = "issue-sync",
    version,
    about = "Mirror GitHub issues as local Markdown files",
    long_about = "issue-sync keeps a directory of Markdown issue files in sync with a GitHub repository. \
                  Edit locally, pull remote changes with three-way conflict detection, and push edits, \
                  new issues and comments back."
)]
struct Cli {
    /// Store directory (defaults to the nearest .issues above the working directory)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the issue store and its config
    Init {
        /// Repository as owner/repo
        #[arg(long)]
        repo: String,
    },

    /// Fetch remote issues into the local store
    Pull {
        /// Issue numbers or record paths (default: every open issue)
        targets: Vec<String>,

        /// Include closed issues
        #[arg(short, long)]
        all: bool,

        /// Only issues carrying this label
        #[arg(short, long)]
        label: Option<String>,

        /// Overwrite conflicting local edits with the remote version
        #[arg(long)]
        discard_local: bool,
    },

    /// Send local edits, new issues and pending comments
    Push {
        /// Issue numbers or record paths (default: every record)
        targets: Vec<String>,

        /// Show pending changes without pushing
        #[arg(long)]
        dry_run: bool,
    },

    /// Draft a new issue locally
    New {
        /// Issue title
        title: String,

        /// Issue body
        #[arg(short, long)]
        body: Option<String>,

        /// Labels to apply (repeatable)
        #[arg(short, long = "label")]
        labels: Vec<String>,
    },

    /// List records that differ from their last synced state
    Status,

    /// Show local edits against the last synced state
    Diff {
        /// Issue numbers or record paths (default: every record)
        targets: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("issue_sync=debug,warn")
    } else {
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let registry = tracing_subscriber::registry().with(filter);

    match env::var(LOG_FORMAT_ENV_VAR).as_deref() {
        Ok("json") => registry
            .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
            .init(),
        _ => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let root = cli.root.as_deref();

    let (name, result) = match cli.command {
        Command::Init { repo } => ("Init", commands::init::run(root, &repo)),
        Command::Pull {
            targets,
            all,
            label,
            discard_local,
        } => (
            "Pull",
            commands::pull::run(root, targets, all, label, discard_local),
        ),
        Command::Push { targets, dry_run } => {
            ("Push", commands::push::run(root, targets, dry_run))
        }
        Command::New {
            title,
            body,
            labels,
        } => (
            "New",
            commands::new::run(root, &title, body.as_deref(), labels),
        ),
        Command::Status => ("Status", commands::status::run(root)),
        Command::Diff { targets } => ("Diff", commands::diff::run(root, &targets)),
    };

    if let Err(e) = result {
        if error::is_cancelled(&e) {
            eprintln!("{}", "Cancelled".yellow());
            std::process::exit(130);
        }
        eprintln!("{}", format!("{name} error: {e:#}").red());
        std::process::exit(1);
    }
}
