
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::path::{Path, PathBuf};

use super::{ChatConfig, Config, ConfigError, DistanceMetric, OllamaConfig};

#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Knowledge RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    eprintln!("{}", style("Ollama Configuration").bold().yellow());
    eprintln!("Configure the Ollama instance used for embedding generation.");
    eprintln!();

    configure_ollama(&mut config.ollama)?;

    eprintln!();
    eprintln!("{}", style("Chat Model Configuration").bold().yellow());
    eprintln!("Any OpenAI-compatible chat completion endpoint works.");
    eprintln!();

    configure_chat(&mut config.chat)?;

    eprintln!();
    eprintln!("{}", style("Retrieval Configuration").bold().yellow());
    eprintln!();

    configure_retrieval(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Testing configuration...").yellow());

    if test_ollama_connection(&config.ollama)? {
        eprintln!("{}", style("✓ Ollama connection successful!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: Could not connect to Ollama").yellow()
        );
        eprintln!("You can continue, but make sure Ollama is running before ingesting.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());
        eprintln!(
            "Configuration saved to: {}",
            style(config.config_file_path().display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Ollama Settings:").bold().yellow());
    eprintln!("  Host: {}", style(&config.ollama.host).cyan());
    eprintln!("  Port: {}", style(config.ollama.port).cyan());
    eprintln!("  Embedding Model: {}", style(&config.ollama.model).cyan());
    eprintln!("  Batch Size: {}", style(config.ollama.batch_size).cyan());
    match config.ollama_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }

    eprintln!();
    eprintln!("{}", style("Chat Settings:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.chat.base_url).cyan());
    eprintln!("  Model: {}", style(&config.chat.model).cyan());
    eprintln!("  API Key Variable: {}", style(&config.chat.api_key_env).cyan());
    eprintln!("  Temperature: {}", style(config.chat.temperature).cyan());

    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!("  Top K: {}", style(config.retrieval.k).cyan());
    eprintln!("  Distance: {}", style(config.retrieval.distance).cyan());
    eprintln!("  Chunk Size: {}", style(config.chunking.chunk_size).cyan());
    eprintln!(
        "  Chunk Overlap: {}",
        style(config.chunking.chunk_overlap).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Paths:").bold().yellow());
    eprintln!(
        "  Knowledge Base: {}",
        style(config.knowledge_base_path().display()).cyan()
    );
    eprintln!(
        "  Vector Store: {}",
        style(config.vector_database_path().display()).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    Config::load_file(config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No existing configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let protocols = &["http", "https"];
    let default_index = protocols
        .iter()
        .position(|&p| p == ollama.protocol)
        .unwrap_or(0);

    let protocol_index = Select::new()
        .with_prompt("Ollama protocol")
        .default(default_index)
        .items(protocols)
        .interact()?;

    let protocol = protocols[protocol_index].to_string();

    let host: String = Input::new()
        .with_prompt("Ollama host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..OllamaConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("Ollama port")
        .default(ollama.port)
        .validate_with(|input: &u16| -> Result<(), &str> {
            if *input == 0 {
                Err("Port must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let batch_size: u32 = Input::new()
        .with_prompt("Batch size for embedding generation")
        .default(ollama.batch_size)
        .validate_with(|input: &u32| -> Result<(), &str> {
            if *input == 0 {
                Err("Batch size must be greater than 0")
            } else if *input > 1000 {
                Err("Batch size must be 1000 or less")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_model(model)?;
    ollama.set_batch_size(batch_size)?;

    Ok(())
}

fn configure_chat(chat: &mut ChatConfig) -> Result<()> {
    let base_url: String = Input::new()
        .with_prompt("Chat completion base URL")
        .default(chat.base_url.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            let temp_config = ChatConfig {
                base_url: input.clone(),
                ..ChatConfig::default()
            };
            temp_config.validate()
        })
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("Chat model")
        .default(chat.model.clone())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model name cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(chat.api_key_env.clone())
        .interact_text()?;

    chat.set_base_url(base_url)?;
    chat.set_model(model)?;
    chat.api_key_env = api_key_env;

    Ok(())
}

fn configure_retrieval(config: &mut Config) -> Result<()> {
    let k: usize = Input::new()
        .with_prompt("Chunks retrieved per question")
        .default(config.retrieval.k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=100).contains(input) {
                Ok(())
            } else {
                Err("Must be between 1 and 100")
            }
        })
        .interact_text()?;

    let metrics = &[DistanceMetric::Cosine, DistanceMetric::L2];
    let default_index = metrics
        .iter()
        .position(|&m| m == config.retrieval.distance)
        .unwrap_or(0);
    let metric_index = Select::new()
        .with_prompt("Distance metric")
        .default(default_index)
        .items(metrics)
        .interact()?;

    let chunk_size: usize = Input::new()
        .with_prompt("Chunk size (characters)")
        .default(config.chunking.chunk_size)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input == 0 {
                Err("Chunk size must be greater than 0")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let chunk_overlap: usize = Input::new()
        .with_prompt("Chunk overlap (characters)")
        .default(config.chunking.chunk_overlap.min(chunk_size.saturating_sub(1)))
        .validate_with(|input: &usize| -> Result<(), &str> {
            if *input >= chunk_size {
                Err("Overlap must be smaller than the chunk size")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let knowledge_base: String = Input::new()
        .with_prompt("Knowledge base directory")
        .default(config.paths.knowledge_base.display().to_string())
        .interact_text()?;

    config.retrieval.k = k;
    config.retrieval.distance = metrics[metric_index];
    config.chunking.chunk_size = chunk_size;
    config.chunking.chunk_overlap = chunk_overlap;
    config.paths.knowledge_base = PathBuf::from(knowledge_base);

    Ok(())
}

fn test_ollama_connection(ollama: &OllamaConfig) -> Result<bool> {
    let url = format!(
        "{}://{}:{}/api/version",
        ollama.protocol, ollama.host, ollama.port
    );

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(std::time::Duration::from_secs(5)))
        .build()
        .into();

    match agent.get(&url).call() {
        Ok(_) => Ok(true),
        Err(ureq::Error::StatusCode(code)) if (400..500).contains(&code) => Ok(true),
        Err(_) => Ok(false),
    }
}
