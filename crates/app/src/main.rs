use chrono::Utc;
use clap::{Parser, Subcommand};
use kb_ingest_core::{
    register_file, ChunkingEngine, ChunkingOptions, DocumentStore, Embedder, HashEmbedder,
    HttpEmbedder, KnowledgeBase, MemoryLedger, MemoryStore, ProcessingOrchestrator,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kb-ingest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Use the HTTP embedding provider configured through
    /// EMBEDDINGS_ENDPOINT / EMBEDDINGS_API_KEY instead of the local embedder.
    #[arg(long, default_value_t = false)]
    remote_embeddings: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Register every supported file under a folder and process it end to end.
    Process {
        /// Folder scanned recursively for supported files.
        #[arg(long)]
        folder: String,

        /// Knowledge base name for this run.
        #[arg(long, default_value = "default")]
        knowledge_base: String,

        /// Target chunk size in estimated tokens.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap between consecutive chunks in estimated tokens.
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Chunk a single file and print the pieces without embedding anything.
    Chunk {
        /// File to split.
        #[arg(long)]
        file: String,

        /// Target chunk size in estimated tokens.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap between consecutive chunks in estimated tokens.
        #[arg(long)]
        overlap: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "kb-ingest boot"
    );

    match cli.command {
        Command::Process {
            folder,
            knowledge_base,
            chunk_size,
            overlap,
        } => {
            let chunking = ChunkingOptions {
                chunk_size,
                overlap,
            };

            let store = MemoryStore::new();
            let ledger = MemoryLedger::default();

            let kb = KnowledgeBase::new(&knowledge_base);
            let kb_id = kb.id;
            store
                .insert_knowledge_base(kb)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let files = kb_ingest_core::discover_supported_files(Path::new(&folder));
            if files.is_empty() {
                println!("no supported files under {folder}");
                return Ok(());
            }
            info!(folder = %folder, file_count = files.len(), "registering files");

            let mut document_ids = Vec::with_capacity(files.len());
            for path in &files {
                match register_file(&store, kb_id, path, chunking).await {
                    Ok(document) => document_ids.push(document.id),
                    Err(error) => {
                        warn!(path = %path.display(), error = %error, "skipping file");
                    }
                }
            }

            let outcomes = if cli.remote_embeddings {
                let embedder = HttpEmbedder::from_env()
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                run_all(
                    Arc::new(ProcessingOrchestrator::new(
                        store.clone(),
                        embedder,
                        ledger.clone(),
                    )),
                    &document_ids,
                )
                .await?
            } else {
                run_all(
                    Arc::new(ProcessingOrchestrator::new(
                        store.clone(),
                        HashEmbedder::default(),
                        ledger.clone(),
                    )),
                    &document_ids,
                )
                .await?
            };

            for outcome in &outcomes {
                match &outcome.error {
                    Some(error) => println!(
                        "{} {:?}: {}",
                        outcome.document_id, outcome.status, error
                    ),
                    None => println!(
                        "{} {:?}: {} chunks persisted, {} skipped, {} tokens",
                        outcome.document_id,
                        outcome.status,
                        outcome.chunks_persisted,
                        outcome.chunks_skipped,
                        outcome.tokens_persisted
                    ),
                }
            }

            let kb = store
                .fetch_knowledge_base(kb_id)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!(
                "knowledge base \"{}\": {} documents, {} chunks, {} tokens",
                kb.name, kb.total_documents, kb.total_chunks, kb.total_tokens
            );

            let records = ledger.records();
            let failures = records.iter().filter(|record| !record.success).count();
            let cost: f64 = records.iter().map(|record| record.cost_cents).sum();
            println!(
                "embedding calls: {} ({} failed), estimated cost {:.4} cents",
                records.len(),
                failures,
                cost
            );
        }
        Command::Chunk {
            file,
            chunk_size,
            overlap,
        } => {
            let text = tokio::fs::read_to_string(&file).await?;
            let engine = ChunkingEngine::new(ChunkingOptions {
                chunk_size,
                overlap,
            })
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let strategy = engine.strategy_for(&text);
            let chunks = engine.chunk(&text);
            println!("strategy: {strategy:?}, {} chunks", chunks.len());

            for chunk in chunks {
                let section = chunk.section.as_deref().unwrap_or("-");
                println!(
                    "[{}] tokens={} section={}\n{}\n",
                    chunk.index, chunk.token_count, section, chunk.content
                );
            }
        }
    }

    Ok(())
}

async fn run_all<E: Embedder + Send + Sync + 'static>(
    orchestrator: Arc<ProcessingOrchestrator<MemoryStore, E, MemoryLedger>>,
    document_ids: &[uuid::Uuid],
) -> anyhow::Result<Vec<kb_ingest_core::ProcessingOutcome>> {
    let mut handles = Vec::with_capacity(document_ids.len());
    for id in document_ids {
        handles.push(orchestrator.process_document_async(*id));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = handle
            .await
            .map_err(|error| anyhow::anyhow!(error.to_string()))?
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
