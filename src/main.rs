use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use knowledge_rag::commands::{ask, chat, ingest, show_status};
use knowledge_rag::config::{Config, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "knowledge-rag")]
#[command(about = "Question answering over a categorized markdown knowledge base")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the default vector store
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the embedding and chat providers
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Rebuild the vector store from the knowledge base
    Ingest {
        /// Knowledge base directory, overriding the configured one
        #[arg(long)]
        knowledge_base: Option<PathBuf>,
    },
    /// Answer a single question
    Ask {
        /// The question to answer
        question: String,
    },
    /// Start an interactive conversation
    Chat,
    /// Show vector store and provider status
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir()?,
    };

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&Config::load(&config_dir)?);
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Ingest { knowledge_base } => {
            let mut config = Config::load(&config_dir)?;
            if let Some(dir) = knowledge_base {
                config.paths.knowledge_base = dir;
            }
            ingest(&config).await?;
        }
        Commands::Ask { question } => {
            ask(&Config::load(&config_dir)?, &question).await?;
        }
        Commands::Chat => {
            chat(&Config::load(&config_dir)?).await?;
        }
        Commands::Status => {
            show_status(&Config::load(&config_dir)?).await?;
        }
    }

    Ok(())
}
