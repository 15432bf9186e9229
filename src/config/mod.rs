// Configuration management module
// TOML settings file plus KNOWLEDGE_RAG_* environment overrides

pub mod interactive;
pub mod settings;


pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    ChatConfig, Config, ConfigError, DistanceMetric, OllamaConfig, PathsConfig, RetrievalConfig,
};
