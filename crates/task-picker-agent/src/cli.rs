use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tpa_core::{Judgment, OutputFormat, SourceKind};

#[derive(Parser)]
#[command(name = "tpa")]
#[command(about = "Task Picker Agent: extract and reconcile tasks from notes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Extra config file merged over the user-level config
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract tasks from sources and reconcile them into the task store
    Extract(ExtractArgs),

    /// Record and inspect reviewer feedback on detections
    Feedback {
        #[command(subcommand)]
        cmd: FeedbackCommands,
    },

    /// Inspect and maintain the task store
    Tasks {
        #[command(subcommand)]
        cmd: TasksCommands,
    },

    /// Show/initialize configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct ExtractArgs {
    /// Markdown document to scan (repeatable, processed in order)
    #[arg(short, long = "file")]
    pub files: Vec<PathBuf>,

    /// Session log id (looked up under sessions_dir)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Scan lines added by `git diff HEAD~1 -- '*.md'` in the workspace
    #[arg(short, long, conflicts_with = "diff_file")]
    pub git_diff: bool,

    /// Scan lines added in a saved unified diff
    #[arg(long)]
    pub diff_file: Option<PathBuf>,

    /// Also ask the implicit detector (overrides implicit.enabled)
    #[arg(short = 'l', long)]
    pub implicit: bool,

    /// Run everything but leave the task store and review queue untouched
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Report every occurrence instead of skipping known tasks
    #[arg(long)]
    pub no_dedup: bool,
}

impl ExtractArgs {
    pub fn has_sources(&self) -> bool {
        !self.files.is_empty() || self.session.is_some() || self.git_diff || self.diff_file.is_some()
    }
}

#[derive(clap::Args, Debug)]
pub struct JudgmentArgs {
    /// Task text as surfaced (or as it should have been detected)
    pub text: String,

    /// Where the task was seen (file path, session-<id>, ...)
    #[arg(long, default_value = "manual")]
    pub source: String,

    /// Why the detection was right or wrong
    #[arg(long)]
    pub reason: Option<String>,

    /// Kind of detection being judged
    #[arg(long, value_enum, default_value = "implicit")]
    pub kind: SourceKind,

    /// Better phrasing of the task
    #[arg(long)]
    pub corrected: Option<String>,
}

#[derive(Subcommand)]
pub enum FeedbackCommands {
    /// Keep a surfaced suggestion
    Confirm(JudgmentArgs),
    /// Mark a surfaced suggestion as not a task
    Reject(JudgmentArgs),
    /// Report a task that should have been detected
    Missed(JudgmentArgs),
    /// Implicit entries surfaced by runs and not yet judged
    Pending,
    /// List recorded judgments, newest first
    List {
        #[arg(short, long, value_enum)]
        judgment: Option<Judgment>,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Totals and acceptance rate
    Stats,
    /// Few-shot examples as fed to the implicit detector
    Export,
    /// Run the implicit detector on a file and list hand-written tasks it missed
    Compare {
        /// Markdown document with explicit tasks
        file: PathBuf,

        /// Record each undetected task as a missed judgment
        #[arg(long)]
        record: bool,
    },
}

#[derive(Subcommand)]
pub enum TasksCommands {
    /// List task store entries (open and completed)
    List {
        /// Include archived entries
        #[arg(long)]
        all: bool,
    },
    /// Move completed entries under the archive section
    Archive,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration (secrets masked)
    Show,
    /// Write the default configuration to the user config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
