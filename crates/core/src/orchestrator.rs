use crate::chunking::ChunkingEngine;
use crate::embeddings::{Embedder, UsageLedger, UsageRecord};
use crate::error::{ProcessError, Result};
use crate::extractor::ExtractorRegistry;
use crate::models::{ChunkingOptions, Document, DocumentChunk, DocumentStatus};
use crate::store::DocumentStore;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-run summary. The document-level verdict lives in `status`; `Err` from
/// the orchestrator is reserved for conditions outside the document's own
/// pipeline (unknown id, concurrent run).
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    pub document_id: Uuid,
    pub status: DocumentStatus,
    pub chunks_produced: usize,
    pub chunks_persisted: u64,
    pub chunks_skipped: u64,
    pub tokens_persisted: u64,
    pub error: Option<String>,
}

impl ProcessingOutcome {
    fn failed(document_id: Uuid, error: String) -> Self {
        Self {
            document_id,
            status: DocumentStatus::Failed,
            chunks_produced: 0,
            chunks_persisted: 0,
            chunks_skipped: 0,
            tokens_persisted: 0,
            error: Some(error),
        }
    }
}

pub struct ProcessingOrchestrator<S, E, L>
where
    S: DocumentStore,
    E: Embedder,
    L: UsageLedger,
{
    store: S,
    embedder: E,
    ledger: L,
    extractors: ExtractorRegistry,
    in_flight: Mutex<HashSet<Uuid>>,
}

struct InFlightClaim<'a> {
    set: &'a Mutex<HashSet<Uuid>>,
    document_id: Uuid,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut claimed) = self.set.lock() {
            claimed.remove(&self.document_id);
        }
    }
}

impl<S, E, L> ProcessingOrchestrator<S, E, L>
where
    S: DocumentStore,
    E: Embedder,
    L: UsageLedger,
{
    pub fn new(store: S, embedder: E, ledger: L) -> Self {
        Self {
            store,
            embedder,
            ledger,
            extractors: ExtractorRegistry::with_defaults(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    fn claim(&self, document_id: Uuid) -> Result<InFlightClaim<'_>> {
        let mut claimed = self
            .in_flight
            .lock()
            .map_err(|_| ProcessError::Storage("in-flight lock poisoned".to_string()))?;
        if !claimed.insert(document_id) {
            return Err(ProcessError::AlreadyProcessing(document_id.to_string()));
        }
        Ok(InFlightClaim {
            set: &self.in_flight,
            document_id,
        })
    }

    pub async fn process_document(&self, document_id: Uuid) -> Result<ProcessingOutcome> {
        let _claim = self.claim(document_id)?;
        self.run_claimed(document_id).await
    }

    /// Wipe the document's chunks, back out their aggregate contribution,
    /// reset the document, and run the pipeline again, optionally with new
    /// chunking parameters.
    pub async fn reprocess_document(
        &self,
        document_id: Uuid,
        chunking: Option<ChunkingOptions>,
    ) -> Result<ProcessingOutcome> {
        let _claim = self.claim(document_id)?;
        let document = self.store.fetch_document(document_id).await?;

        let (prior_chunks, prior_tokens) = self.store.chunk_stats(document_id).await?;
        let deleted = self.store.delete_chunks(document_id).await?;
        if prior_chunks > 0 {
            self.store
                .adjust_counters(
                    document.knowledge_base_id,
                    0,
                    -(prior_chunks as i64),
                    -(prior_tokens as i64),
                )
                .await?;
        }
        info!(
            document_id = %document_id,
            deleted_chunks = deleted,
            "reprocessing document"
        );

        if let Some(chunking) = chunking {
            self.store.update_chunking(document_id, chunking).await?;
        }
        self.store.reset_for_reprocess(document_id).await?;

        self.run_claimed(document_id).await
    }

    async fn run_claimed(&self, document_id: Uuid) -> Result<ProcessingOutcome> {
        let document = self.store.fetch_document(document_id).await?;

        // Processing is persisted before any extraction work so a crash
        // mid-run is observable as stuck-in-Processing.
        self.store
            .update_status(document_id, DocumentStatus::Processing, None)
            .await?;

        match self.run_pipeline(&document).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                warn!(document_id = %document_id, error = %error, "document processing failed");
                self.store
                    .update_status(document_id, DocumentStatus::Failed, Some(error.to_string()))
                    .await?;
                Ok(ProcessingOutcome::failed(document_id, error.to_string()))
            }
        }
    }

    async fn run_pipeline(&self, document: &Document) -> Result<ProcessingOutcome> {
        self.embedder.preflight()?;
        let extractor = self.extractors.resolve(document.file_type)?;

        let bytes = tokio::fs::read(&document.source_path).await?;
        let extracted = extractor.extract(&bytes).await?;
        if extracted.text.trim().is_empty() {
            return Err(ProcessError::EmptyDocument(document.file_name.clone()));
        }
        self.store.record_extraction(document.id, &extracted).await?;

        let engine = ChunkingEngine::new(document.chunking)?;
        let chunks = engine.chunk(&extracted.text);
        if chunks.is_empty() {
            return Err(ProcessError::EmptyDocument(format!(
                "no chunks produced for {}",
                document.file_name
            )));
        }

        let chunks_produced = chunks.len();
        let mut chunks_persisted = 0u64;
        let mut chunks_skipped = 0u64;
        let mut tokens_persisted = 0u64;

        for chunk in chunks {
            let started = Instant::now();
            let embedding = self.embedder.embed(&chunk.content).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let record = UsageRecord::attempt(
                document.knowledge_base_id,
                document.id,
                self.embedder.provider(),
                self.embedder.model(),
                chunk.token_count,
                latency_ms,
            );

            match embedding {
                Ok(embedding) => {
                    if let Err(error) = self.ledger.append(record.completed(embedding.len())).await
                    {
                        warn!(document_id = %document.id, error = %error, "usage ledger write failed");
                    }
                    self.store
                        .insert_chunk(DocumentChunk {
                            id: Uuid::new_v4(),
                            document_id: document.id,
                            content: chunk.content,
                            chunk_index: chunk.index,
                            token_count: chunk.token_count,
                            page_number: chunk.page_number,
                            section: chunk.section,
                            embedding,
                            embedding_model: self.embedder.model().to_string(),
                            created_at: Utc::now(),
                        })
                        .await?;
                    chunks_persisted += 1;
                    tokens_persisted += chunk.token_count as u64;
                }
                Err(error) => {
                    // chunk-level failure is logged and skipped, never fatal
                    warn!(
                        document_id = %document.id,
                        chunk_index = chunk.index,
                        error = %error,
                        "chunk embedding failed, skipping"
                    );
                    if let Err(ledger_error) =
                        self.ledger.append(record.failed(error.to_string())).await
                    {
                        warn!(document_id = %document.id, error = %ledger_error, "usage ledger write failed");
                    }
                    chunks_skipped += 1;
                }
            }
        }

        let first_completion = self.store.mark_completed(document.id).await?;

        // the aggregate write is isolated: a stats failure must not flip an
        // otherwise-completed document to Failed
        if let Err(error) = self
            .store
            .adjust_counters(
                document.knowledge_base_id,
                i64::from(first_completion),
                chunks_persisted as i64,
                tokens_persisted as i64,
            )
            .await
        {
            warn!(
                knowledge_base_id = %document.knowledge_base_id,
                error = %error,
                "aggregate counter update failed"
            );
        }

        info!(
            document_id = %document.id,
            chunks_produced = chunks_produced,
            chunks_persisted = chunks_persisted,
            chunks_skipped = chunks_skipped,
            tokens_persisted = tokens_persisted,
            "document processed"
        );

        Ok(ProcessingOutcome {
            document_id: document.id,
            status: DocumentStatus::Completed,
            chunks_produced,
            chunks_persisted,
            chunks_skipped,
            tokens_persisted,
            error: None,
        })
    }
}

impl<S, E, L> ProcessingOrchestrator<S, E, L>
where
    S: DocumentStore + 'static,
    E: Embedder + 'static,
    L: UsageLedger + 'static,
{
    /// Fire-and-observe variant: the run happens on a spawned task whose
    /// JoinHandle carries the same outcome `process_document` would return.
    pub fn process_document_async(
        self: &Arc<Self>,
        document_id: Uuid,
    ) -> JoinHandle<Result<ProcessingOutcome>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.process_document(document_id).await })
    }
}
