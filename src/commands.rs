use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::answer::{Answer, AnswerComposer, ConversationTurn};
use crate::chat::{ChatModel, OpenAiChatClient};
use crate::config::Config;
use crate::database::lancedb::{CollectionManifest, VectorStore};
use crate::embeddings::{Embedder, OllamaClient, chunk_documents};
use crate::knowledge::DocumentLoader;
use crate::retrieval::{ContextRetriever, Retriever};

/// Outcome of one ingestion run
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub manifest: CollectionManifest,
}

/// Load, chunk and embed the knowledge base, replacing the stored collection.
///
/// `on_batch` receives the number of chunks embedded by each embedder call.
#[inline]
pub async fn ingest_knowledge_base(
    config: &Config,
    embedder: &dyn Embedder,
    store: &VectorStore,
    on_batch: impl FnMut(usize),
) -> Result<IngestReport> {
    let loader = DocumentLoader::from_config(config);
    let documents = loader
        .load()
        .with_context(|| format!("Failed to load knowledge base {}", loader.root().display()))?;

    if documents.is_empty() {
        warn!(
            "No documents found under {}, the vector store will be empty",
            loader.root().display()
        );
    }

    for (category, count) in documents
        .iter()
        .counts_by(|document| document.metadata.category.as_str())
        .into_iter()
        .sorted()
    {
        info!("Category {}: {} documents", category, count);
    }

    let chunks = chunk_documents(&documents, &config.chunking).context("Failed to chunk documents")?;
    info!("Split {} documents into {} chunks", documents.len(), chunks.len());

    let manifest = store
        .rebuild_with_progress(&chunks, embedder, on_batch)
        .await
        .context("Failed to rebuild vector store")?;

    Ok(IngestReport {
        documents: documents.len(),
        chunks: chunks.len(),
        manifest,
    })
}

/// Run ingestion against the configured Ollama model and print a summary
#[inline]
pub async fn ingest(config: &Config) -> Result<()> {
    let embedder = OllamaClient::new(&config.ollama)?;
    embedder
        .health_check()
        .context("Embedding provider is not ready")?;
    let store = VectorStore::new(config).await?;

    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} Embedded {pos} chunks {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };

    let report = ingest_knowledge_base(config, &embedder, &store, |n| bar.inc(n as u64))
        .await
        .inspect_err(|_| bar.abandon())?;
    bar.finish_and_clear();

    println!(
        "Loaded {} documents into {} chunks",
        report.documents, report.chunks
    );
    println!("{}", vector_summary(&report.manifest));
    println!("Ingestion complete");
    Ok(())
}

/// "There are N vectors with D dimensions in the vector store"
#[inline]
pub fn vector_summary(manifest: &CollectionManifest) -> String {
    format!(
        "There are {} vectors with {} dimensions in the vector store",
        with_thousands(manifest.entries),
        with_thousands(manifest.dimension.unwrap_or(0))
    )
}

fn with_thousands(n: usize) -> String {
    let digits: Vec<char> = n.to_string().chars().collect();
    digits
        .rchunks(3)
        .rev()
        .map(|group| group.iter().collect::<String>())
        .join(",")
}

/// Wire the production embedder, store and chat model into a composer
#[inline]
pub async fn build_composer(config: &Config) -> Result<AnswerComposer> {
    let store = Arc::new(VectorStore::new(config).await?);
    if store.manifest().is_none() {
        warn!("Vector store is empty, run `knowledge-rag ingest` first");
    }

    let embedder: Arc<dyn Embedder> = Arc::new(OllamaClient::new(&config.ollama)?);
    if let (Some(manifest), model) = (store.manifest(), embedder.model_name()) {
        if manifest.entries > 0 && manifest.embedding_model != model {
            warn!(
                "Store was built with {} but queries use {}",
                manifest.embedding_model, model
            );
        }
    }

    let retriever: Arc<dyn ContextRetriever> =
        Arc::new(Retriever::from_config(config, embedder, store));
    let chat: Arc<dyn ChatModel> = Arc::new(OpenAiChatClient::new(&config.chat)?);

    Ok(AnswerComposer::from_config(config, retriever, chat))
}

/// Answer a single question without history
#[inline]
pub async fn ask(config: &Config, question: &str) -> Result<()> {
    let composer = build_composer(config).await?;
    let answer = composer.answer(question, &[]).await?;

    println!("{}", answer.text);
    println!();
    print_sources(&answer);
    Ok(())
}

/// Interactive conversation; an empty line or `exit` ends it
#[inline]
pub async fn chat(config: &Config) -> Result<()> {
    let composer = build_composer(config).await?;
    let mut history: Vec<ConversationTurn> = Vec::new();

    println!(
        "{}",
        style("Ask about the knowledge base. Empty line or 'exit' to quit.").dim()
    );

    loop {
        let question: String = match Input::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()
        {
            Ok(question) => question,
            Err(e) => {
                info!("Input closed: {}", e);
                break;
            }
        };

        let question = question.trim();
        if question.is_empty() || question.eq_ignore_ascii_case("exit") {
            break;
        }

        match composer.answer(question, &history).await {
            Ok(answer) => {
                println!("{} {}", style("Assistant:").bold().cyan(), answer.text);
                println!();
                print_context(&answer);
                history.push(ConversationTurn::user(question));
                history.push(ConversationTurn::assistant(answer.text));
            }
            Err(e) => {
                error!("Failed to answer: {}", e);
                eprintln!("{} {}", style("Error:").red().bold(), e);
            }
        }
    }

    Ok(())
}

fn print_sources(answer: &Answer) {
    if answer.context.is_empty() {
        println!("{}", style("No context was retrieved.").dim());
        return;
    }

    println!("{}", style("Sources:").bold());
    for source in answer
        .context
        .iter()
        .map(|chunk| chunk.chunk_metadata.source.as_str())
        .unique()
    {
        println!("  {}", source);
    }
}

fn print_context(answer: &Answer) {
    println!("{}", style("Relevant Context").bold().underlined());
    if answer.context.is_empty() {
        println!("{}", style("(none)").dim());
    }
    for chunk in &answer.context {
        println!();
        println!(
            "{}",
            style(format!("Source: {}", chunk.chunk_metadata.source)).blue()
        );
        println!("{}", chunk.chunk_metadata.content);
    }
    println!();
}

/// Report store phase, contents and provider health
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("Knowledge RAG Status");
    println!("{}", "=".repeat(50));
    println!();

    println!("Paths:");
    println!("   Knowledge base: {}", config.knowledge_base_path().display());
    println!("   Vector store:   {}", config.vector_database_path().display());
    println!();

    println!("Vector Store:");
    match VectorStore::new(config).await {
        Ok(store) => {
            println!("   Phase: {}", store.phase());
            match store.count().await {
                Ok(count) => println!("   Entries: {}", with_thousands(count)),
                Err(e) => println!("   Entries: unavailable - {}", e),
            }
            match store.manifest() {
                Some(manifest) => {
                    println!(
                        "   Dimension: {}",
                        manifest
                            .dimension
                            .map_or_else(|| "-".to_string(), |d| d.to_string())
                    );
                    println!("   Embedding model: {}", manifest.embedding_model);
                    println!("   Built: {}", manifest.created_at);
                }
                None => println!("   Nothing ingested yet"),
            }
        }
        Err(e) => println!("   Failed to open - {}", e),
    }
    println!();

    println!("Embedding Provider:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => match client.health_check() {
            Ok(()) => println!(
                "   Ollama: Connected ({}:{}), model {}",
                config.ollama.host, config.ollama.port, config.ollama.model
            ),
            Err(e) => println!("   Ollama: Unhealthy - {:#}", e),
        },
        Err(e) => println!("   Ollama: Invalid configuration - {}", e),
    }
    println!();

    println!("Chat Provider:");
    println!("   Endpoint: {}", config.chat.base_url);
    println!("   Model: {}", config.chat.model);
    let key_state = if std::env::var_os(&config.chat.api_key_env).is_some() {
        "set"
    } else {
        "not set"
    };
    println!("   API key ({}): {}", config.chat.api_key_env, key_state);

    Ok(())
}
