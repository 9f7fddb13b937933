use anyhow::Result;
use clap::Parser;
use tpa_config::TaskPickerConfig;
use tpa_core::Judgment;

mod cli;
mod config_cmds;
mod extract_cmd;
mod feedback_cmd;
mod logging;
mod tasks_cmd;

use cli::{Cli, Commands, ConfigCommands, FeedbackCommands, TasksCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output_format = cli.format.clone();

    // Writing the default file must work even when the current one is broken.
    if let Commands::Config {
        cmd: ConfigCommands::Init { force },
    } = cli.command
    {
        return config_cmds::handle_config_init(force);
    }

    let config = TaskPickerConfig::load(cli.config.as_deref())?;
    let _log_guard = logging::init(&config.logging)?;
    tracing::debug!(workspace = %config.workspace_root().display(), "configuration loaded");

    match cli.command {
        Commands::Extract(args) => {
            extract_cmd::handle_extract(args, config, output_format).await?;
        }
        Commands::Feedback { cmd } => match cmd {
            FeedbackCommands::Confirm(args) => {
                feedback_cmd::handle_judgment(Judgment::Confirmed, args, &config, output_format)?;
            }
            FeedbackCommands::Reject(args) => {
                feedback_cmd::handle_judgment(
                    Judgment::FalsePositive,
                    args,
                    &config,
                    output_format,
                )?;
            }
            FeedbackCommands::Missed(args) => {
                feedback_cmd::handle_judgment(Judgment::Missed, args, &config, output_format)?;
            }
            FeedbackCommands::Pending => {
                feedback_cmd::handle_pending(&config, output_format)?;
            }
            FeedbackCommands::List { judgment, limit } => {
                feedback_cmd::handle_list(judgment, limit, &config, output_format)?;
            }
            FeedbackCommands::Stats => {
                feedback_cmd::handle_stats(&config, output_format)?;
            }
            FeedbackCommands::Export => {
                feedback_cmd::handle_export(&config, output_format)?;
            }
            FeedbackCommands::Compare { file, record } => {
                feedback_cmd::handle_compare(file, record, &config, output_format).await?;
            }
        },
        Commands::Tasks { cmd } => match cmd {
            TasksCommands::List { all } => {
                tasks_cmd::handle_list(all, &config, output_format)?;
            }
            TasksCommands::Archive => {
                tasks_cmd::handle_archive(&config, output_format)?;
            }
        },
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Show => {
                config_cmds::handle_config_show(&config, output_format)?;
            }
            ConfigCommands::Init { .. } => unreachable!("handled above"),
        },
    }
    Ok(())
}
