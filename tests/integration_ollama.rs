#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// Integration tests that require a local Ollama instance
// Run with: cargo test --test integration_ollama -- --ignored

use knowledge_rag::config::OllamaConfig;
use knowledge_rag::embeddings::{Embedder, OllamaClient};
use std::env;
use std::time::Duration;
use tracing::{debug, info};

const TEST_MODEL: &str = "all-minilm:latest";
const DEFAULT_OLLAMA_HOST: &str = "localhost";
const DEFAULT_OLLAMA_PORT: u16 = 11434;

fn create_integration_test_client() -> OllamaClient {
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_OLLAMA_HOST.to_string());
    let port = env::var("OLLAMA_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_OLLAMA_PORT);
    let model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| TEST_MODEL.to_string());

    let config = OllamaConfig {
        protocol: "http".to_string(),
        host,
        port,
        model,
        batch_size: 5, // Smaller batch size for testing
    };

    OllamaClient::new(&config)
        .expect("Failed to create Ollama client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(3)
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok(); // Ignore error if already initialized
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_health_check() {
    init_test_tracing();

    let client = create_integration_test_client();

    info!("Testing health check against real Ollama instance");
    let result = client.health_check();

    assert!(
        result.is_ok(),
        "Health check should succeed with local Ollama: {:?}",
        result
    );
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_list_models() {
    init_test_tracing();

    let client = create_integration_test_client();
    let models = client.list_models().expect("model listing should succeed");

    assert!(
        !models.is_empty(),
        "Should have at least one model available"
    );
    for model in &models {
        debug!("Available model: {} (size: {:?})", model.name, model.size);
    }
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_embeddings_are_deterministic() {
    init_test_tracing();

    let client = create_integration_test_client();
    let text = "Insurellm offers auto insurance.";

    let first = client.embed(text).expect("embedding should succeed");
    let second = client.embed(text).expect("embedding should succeed");

    assert!(!first.is_empty());
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert!((a - b).abs() < 1e-5, "embeddings differ: {a} vs {b}");
    }
}

#[test]
#[ignore = "requires a local Ollama instance"]
fn real_ollama_batch_embeddings() {
    init_test_tracing();

    let client = create_integration_test_client();
    let texts: Vec<String> = (0..12)
        .map(|i| format!("Knowledge base chunk number {i} about Insurellm products"))
        .collect();

    let vectors = client.embed_batch(&texts).expect("batch should succeed");

    assert_eq!(vectors.len(), texts.len());
    let dimension = vectors[0].len();
    assert!(vectors.iter().all(|v| v.len() == dimension));
    info!("Batch produced {} vectors of {} dimensions", vectors.len(), dimension);
}
