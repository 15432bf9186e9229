
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::OllamaConfig;
use crate::embeddings::Embedder;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
// Provider failures surface to the caller rather than being retried
const DEFAULT_RETRY_ATTEMPTS: u32 = 1;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub families: Option<Vec<String>>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    pub text: String,
    pub embedding: Vec<f32>,
    pub token_count: usize,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.model.clone(),
            batch_size: config.batch_size,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Test connection to Ollama server and verify model availability
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        self.ping().context("Server ping failed")?;
        self.validate_model().context("Model validation failed")?;

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build ping URL")?;

        debug!("Pinging Ollama server at {}", url);

        self.make_request_with_retry(|| {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
        .context("Failed to ping Ollama server")?;

        debug!("Server ping successful");
        Ok(())
    }

    /// Validate that the configured model is available
    ///
    /// Ollama reports tagged names, so `all-minilm` matches `all-minilm:latest`.
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        debug!("Validating model: {}", self.model);

        let models = self.list_models().context("Failed to list models")?;

        let wanted = with_default_tag(&self.model);
        if models.iter().any(|m| with_default_tag(&m.name) == wanted) {
            debug!("Model {} is available", self.model);
            Ok(())
        } else {
            let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available_models
            );
            Err(anyhow::anyhow!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available_models
            ))
        }
    }

    /// List all available models
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    /// Generate embeddings for a single text input
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<EmbeddingResult> {
        debug!("Generating embedding for text (length: {})", text.len());

        let texts = [text.to_string()];
        let mut results = self
            .generate_embeddings_single_batch(&texts)
            .context("Failed to generate embedding")?;

        let result = results
            .pop()
            .context("Embedding response contained no vectors")?;

        debug!(
            "Generated embedding with {} dimensions",
            result.embedding.len()
        );

        Ok(result)
    }

    /// Generate embeddings for multiple text inputs using batch processing
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());

        // Process in batches to avoid overwhelming the server
        for chunk in texts.chunks(self.batch_size.max(1) as usize) {
            let batch_results = self
                .generate_embeddings_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;

            results.extend(batch_results);
        }

        if let Some(first) = results.first() {
            let dimension = first.embedding.len();
            if let Some(odd) = results.iter().find(|r| r.embedding.len() != dimension) {
                return Err(anyhow::anyhow!(
                    "Model {} returned vectors of differing dimensions: {} vs {}",
                    self.model,
                    dimension,
                    odd.embedding.len()
                ));
            }
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn generate_embeddings_single_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingResult>> {
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let embed_response: EmbedResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if embed_response.embeddings.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                embed_response.embeddings.len()
            ));
        }

        if embed_response.embeddings.iter().any(Vec::is_empty) {
            return Err(anyhow::anyhow!("Model {} returned an empty vector", self.model));
        }

        let results = texts
            .iter()
            .zip(embed_response.embeddings)
            .map(|(text, embedding)| EmbeddingResult {
                text: text.clone(),
                embedding,
                token_count: crate::embeddings::chunking::estimate_token_count(text),
            })
            .collect();

        Ok(results)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    // Wait before retry (exponential backoff)
                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        let delay = Duration::from_millis(delay_ms);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All request attempts failed for {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.generate_embedding(text).map(|r| r.embedding)
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self
            .generate_embeddings_batch(texts)?
            .into_iter()
            .map(|r| r.embedding)
            .collect())
    }
}

fn with_default_tag(name: &str) -> String {
    if name.contains(':') {
        name.to_string()
    } else {
        format!("{name}:latest")
    }
}
