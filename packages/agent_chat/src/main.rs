use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feed_sync::Status;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

mod api;
mod cli;
mod config;
mod identity;
mod render;

use crate::config::{ChatConfig, FileConfig};

#[derive(Parser)]
#[command(name = "agentchat")]
#[command(about = "Terminal client for realtime agent chat rooms")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.agentchat)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Identity file holding the saved room and agent (defaults to <data-dir>/identity.json)
    #[arg(long, global = true, env = "AGENTCHAT_CONFIG")]
    identity_file: Option<PathBuf>,

    /// Chat server base URL (overrides config.toml and AGENTCHAT_SERVER)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a room's history and live messages until the feed ends
    Watch(WatchArgs),

    /// Interactive session: watch a room and post typed lines
    Chat(ChatArgs),

    /// Post a single message
    Post(PostArgs),

    /// Check whether the server is up
    Check,

    /// Show (or save) the agent name and room
    Whoami(WhoamiArgs),
}

#[derive(Parser)]
struct WatchArgs {
    /// Room to watch (default: saved room, then config)
    #[arg(long)]
    room: Option<String>,
}

#[derive(Parser)]
struct ChatArgs {
    #[arg(long)]
    room: Option<String>,

    /// Agent name to post as (default: saved agent, then AGENTCHAT_AGENT)
    #[arg(long)]
    agent: Option<String>,

    /// Message kind, e.g. status, note, question
    #[arg(long)]
    kind: Option<String>,
}

#[derive(Parser)]
struct PostArgs {
    #[arg(long)]
    room: Option<String>,

    #[arg(long)]
    agent: Option<String>,

    #[arg(long)]
    kind: Option<String>,

    /// Message content (read from stdin when omitted)
    content: Vec<String>,
}

#[derive(Parser)]
struct WhoamiArgs {
    /// Save this agent name
    #[arg(long)]
    agent: Option<String>,

    /// Save this room
    #[arg(long)]
    room: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.debug);

    let config = ChatConfig::new(cli.data_dir.clone(), cli.identity_file.clone())?;
    let mut file: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .with_context(|| {
            format!(
                "Invalid configuration (check {} and AGENTCHAT_* variables)",
                config.config_toml_path().display()
            )
        })?;
    if let Some(server) = cli.server {
        file.server = server;
    }

    match cli.command {
        Commands::Watch(args) => {
            let status = cli::watch_command(&config, &file, args.room).await?;
            Ok(if status == Status::Errored {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Chat(args) => {
            cli::chat_command(&config, &file, args.room, args.agent, args.kind).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Post(args) => {
            cli::post_command(
                &config,
                &file,
                args.room,
                args.agent,
                args.kind,
                args.content,
            )
            .await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => Ok(if cli::check_command(&file).await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }),
        Commands::Whoami(args) => {
            cli::whoami_command(&config, &file, args.agent, args.room)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr; stdout carries the transcript.
fn init_logging(debug: bool) {
    let default_directive = if debug {
        "agentchat=debug,feed_sync=debug,info"
    } else {
        "agentchat=warn,feed_sync=warn,error"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}
