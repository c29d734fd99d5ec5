use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, IndexBackend};
use crate::embeddings::OllamaClient;
use crate::models::{Collection, Document, Topic};
use crate::store::{KnowledgeStore, ReconciliationReport};
use crate::vector_index::{QdrantClient, SearchHit};

/// Topic given to uploads that do not name one
pub const DEFAULT_TOPIC: &str = "general";

async fn open_store(config: &Config) -> Result<KnowledgeStore> {
    KnowledgeStore::from_config(config)
        .await
        .context("Failed to open knowledge store")
}

fn spinner(message: String) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Create a new, empty collection
#[inline]
pub async fn create_collection(config: &Config, title: &str, topics: Vec<String>) -> Result<()> {
    let store = open_store(config).await?;

    let mut collection = Collection::new(store.next_collection_id().await, title);
    for topic in topics {
        collection = collection.with_topic(topic);
    }
    let collection_id = collection.collection_id;

    if store.create_collection(collection).await? {
        println!(
            "Created collection {} (ID: {})",
            style(title).bold(),
            collection_id
        );
    } else {
        println!("Collection {} already exists", style(title).bold());
    }
    Ok(())
}

/// Upload one text file into a collection
#[inline]
pub async fn upload_file(
    config: &Config,
    collection: &str,
    file: &Path,
    name: Option<String>,
    topic: Option<String>,
) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let name = name.unwrap_or_else(|| document_name(file));
    let document = Document::new(
        name.clone(),
        content,
        Topic::new(topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string())),
    );

    let store = open_store(config).await?;
    info!("Uploading {} into {}", file.display(), collection);

    let bar = spinner(format!("Embedding {}", name));
    let result = store.upload(document, collection).await;
    bar.finish_and_clear();
    let receipt = result?;

    println!(
        "Uploaded {} into {}: {} chunks (points {}..{})",
        style(&name).bold(),
        style(collection).bold(),
        receipt.chunk_count(),
        receipt.ids.start,
        receipt.ids.end
    );
    Ok(())
}

/// File stem, or the whole file name when there is no stem
fn document_name(file: &Path) -> String {
    file.file_stem()
        .or_else(|| file.file_name())
        .map_or_else(
            || file.display().to_string(),
            |s| s.to_string_lossy().into_owned(),
        )
}

/// List every collection the store exposes
#[inline]
pub async fn list_collections(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let mut collections: Vec<Collection> = store.collections().await.into_values().collect();

    if collections.is_empty() {
        println!("No collections have been created yet.");
        println!("Use 'knowledge-store create <title>' to add one.");
        return Ok(());
    }

    collections.sort_by_key(|c| c.collection_id);
    println!("Collections ({} total):", collections.len());
    println!();
    for collection in &collections {
        print!("{}", format_collection(collection));
        println!();
    }
    Ok(())
}

fn format_collection(collection: &Collection) -> String {
    let mut out = format!(
        "📚 {} (ID: {})\n   Points: {}\n   Documents: {}\n",
        collection.title,
        collection.collection_id,
        collection.size,
        collection.documents.len()
    );
    for document in &collection.documents {
        let _ = writeln!(out, "     - {} [{}]", document.name, document.topic);
    }
    if !collection.topics.is_empty() {
        let topics: Vec<&str> = collection.topics.iter().map(Topic::name).collect();
        let _ = writeln!(out, "   Topics: {}", topics.join(", "));
    }
    out
}

/// Search one collection, or let the router pick it
#[inline]
pub async fn search(
    config: &Config,
    query: &str,
    collection: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let store = open_store(config).await?;
    let limit = limit.unwrap_or(config.store.default_limit);

    let hits = match &collection {
        Some(name) => store.retrieve_from(query, name, limit).await?,
        None => store.retrieve(query, limit).await?,
    };

    match hits {
        None => println!("Query is too short to search; use at least 3 characters."),
        Some(hits) if hits.is_empty() => println!("No results above the similarity threshold."),
        Some(hits) => print!("{}", format_hits(&hits)),
    }
    Ok(())
}

fn format_hits(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for (rank, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} [{}] score {:.3}",
            rank + 1,
            hit.payload.title,
            hit.payload.topic,
            hit.score
        );
        for line in hit.payload.text.lines() {
            let _ = writeln!(out, "   {}", line);
        }
        out.push('\n');
    }
    out
}

/// Show service health and what startup reconciliation found
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 Knowledge Store Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    match OllamaClient::new(&config.ollama) {
        Ok(client) => {
            let health = tokio::task::spawn_blocking(move || client.health_check())
                .await
                .context("Health check task failed")?;
            match health {
                Ok(()) => {
                    println!(
                        "   ✅ Ollama: Connected ({}:{})",
                        config.ollama.host, config.ollama.port
                    );
                    println!("   📋 Model: {}", config.ollama.model);
                }
                Err(e) => println!("   ⚠️  Ollama: Unhealthy - {:#}", e),
            }
        }
        Err(e) => println!("   ❌ Ollama: Invalid configuration - {:#}", e),
    }

    println!("🔍 Vector Index Status:");
    if config.is_in_memory() {
        println!("   💭 In-memory mode: nothing is persisted between runs");
    } else if config.vector_index.backend == IndexBackend::Qdrant {
        match QdrantClient::new(&config.vector_index) {
            Ok(client) => {
                let url = client.base_url().clone();
                let ping = tokio::task::spawn_blocking(move || client.ping())
                    .await
                    .context("Ping task failed")?;
                match ping {
                    Ok(()) => println!("   ✅ Qdrant: Connected ({})", url),
                    Err(e) => println!("   ❌ Qdrant: Unreachable - {:#}", e),
                }
            }
            Err(e) => println!("   ❌ Qdrant: Invalid configuration - {:#}", e),
        }
    } else {
        println!("   📁 LanceDB: {}", config.lancedb_path().display());
    }

    println!();
    println!("🗂️  Collections:");
    match KnowledgeStore::from_config(config).await {
        Ok(store) => {
            println!("   🔢 Embedding size: {}", store.embedding_size());
            print!("{}", format_report(store.reconciliation_report()));
        }
        Err(e) => println!("   ❌ Store unavailable - {}", e),
    }
    Ok(())
}

fn format_report(report: &ReconciliationReport) -> String {
    let mut out = format!("   📚 Loaded: {}\n", report.loaded.len());
    for title in &report.loaded {
        let _ = writeln!(out, "     - {}", title);
    }
    if !report.pruned_local.is_empty() {
        let _ = writeln!(
            out,
            "   🧹 Pruned stale metadata: {}",
            report.pruned_local.len()
        );
    }
    if !report.unremovable_local.is_empty() {
        let _ = writeln!(
            out,
            "   ⚠️  Stale metadata that could not be deleted: {}",
            report.unremovable_local.len()
        );
    }
    if !report.orphaned_remote.is_empty() {
        let _ = writeln!(
            out,
            "   👻 Remote collections without metadata: {}",
            report.orphaned_remote.join(", ")
        );
    }
    out
}
