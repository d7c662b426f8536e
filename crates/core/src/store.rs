use crate::error::{ProcessError, Result};
use crate::extractor::ExtractedText;
use crate::models::{
    ChunkingOptions, Document, DocumentChunk, DocumentStatus, KnowledgeBase,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_knowledge_base(&self, knowledge_base: KnowledgeBase) -> Result<()>;

    async fn fetch_knowledge_base(&self, id: Uuid) -> Result<KnowledgeBase>;

    async fn insert_document(&self, document: Document) -> Result<()>;

    async fn fetch_document(&self, id: Uuid) -> Result<Document>;

    /// A transition to `Failed` also clears extraction output, so extracted
    /// text only ever exists on `Processing` or `Completed` documents.
    async fn update_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        processing_error: Option<String>,
    ) -> Result<()>;

    async fn update_chunking(&self, id: Uuid, chunking: ChunkingOptions) -> Result<()>;

    /// Rejected unless the document is currently `Processing`.
    async fn record_extraction(&self, id: Uuid, extracted: &ExtractedText) -> Result<()>;

    async fn reset_for_reprocess(&self, id: Uuid) -> Result<()>;

    /// Transition to `Completed`; returns whether this was the document's
    /// first completion ever.
    async fn mark_completed(&self, id: Uuid) -> Result<bool>;

    async fn insert_chunk(&self, chunk: DocumentChunk) -> Result<()>;

    async fn delete_chunks(&self, document_id: Uuid) -> Result<u64>;

    async fn list_chunks(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>>;

    async fn chunk_stats(&self, document_id: Uuid) -> Result<(u64, u64)>;

    /// Atomically apply signed deltas to a knowledge base's counters and
    /// refresh `last_synced_at`. Underflow clamps to zero.
    async fn adjust_counters(
        &self,
        knowledge_base_id: Uuid,
        delta_documents: i64,
        delta_chunks: i64,
        delta_tokens: i64,
    ) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    knowledge_bases: HashMap<Uuid, KnowledgeBase>,
    documents: HashMap<Uuid, Document>,
    chunks: HashMap<Uuid, Vec<DocumentChunk>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_delta(value: u64, delta: i64) -> u64 {
    if delta.is_negative() {
        value.saturating_sub(delta.unsigned_abs())
    } else {
        value.saturating_add(delta as u64)
    }
}

fn clear_extraction(document: &mut Document) {
    document.extracted_text = None;
    document.word_count = None;
    document.page_count = None;
    document.language = None;
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_knowledge_base(&self, knowledge_base: KnowledgeBase) -> Result<()> {
        self.inner
            .write()
            .await
            .knowledge_bases
            .insert(knowledge_base.id, knowledge_base);
        Ok(())
    }

    async fn fetch_knowledge_base(&self, id: Uuid) -> Result<KnowledgeBase> {
        self.inner
            .read()
            .await
            .knowledge_bases
            .get(&id)
            .cloned()
            .ok_or_else(|| ProcessError::NotFound(format!("knowledge base {id}")))
    }

    async fn insert_document(&self, document: Document) -> Result<()> {
        self.inner
            .write()
            .await
            .documents
            .insert(document.id, document);
        Ok(())
    }

    async fn fetch_document(&self, id: Uuid) -> Result<Document> {
        self.inner
            .read()
            .await
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| ProcessError::NotFound(format!("document {id}")))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DocumentStatus,
        processing_error: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let document = inner
            .documents
            .get_mut(&id)
            .ok_or_else(|| ProcessError::NotFound(format!("document {id}")))?;

        document.status = status;
        document.processing_error = processing_error;
        if status == DocumentStatus::Failed {
            clear_extraction(document);
        }
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn update_chunking(&self, id: Uuid, chunking: ChunkingOptions) -> Result<()> {
        let mut inner = self.inner.write().await;
        let document = inner
            .documents
            .get_mut(&id)
            .ok_or_else(|| ProcessError::NotFound(format!("document {id}")))?;

        document.chunking = chunking;
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn record_extraction(&self, id: Uuid, extracted: &ExtractedText) -> Result<()> {
        let mut inner = self.inner.write().await;
        let document = inner
            .documents
            .get_mut(&id)
            .ok_or_else(|| ProcessError::NotFound(format!("document {id}")))?;

        if document.status != DocumentStatus::Processing {
            return Err(ProcessError::Storage(format!(
                "cannot record extraction for document {id} in status {:?}",
                document.status
            )));
        }

        document.extracted_text = Some(extracted.text.clone());
        document.word_count = Some(extracted.word_count);
        document.page_count = extracted.page_count;
        document.language = extracted.language.clone();
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_for_reprocess(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let document = inner
            .documents
            .get_mut(&id)
            .ok_or_else(|| ProcessError::NotFound(format!("document {id}")))?;

        document.status = DocumentStatus::Pending;
        document.processing_error = None;
        clear_extraction(document);
        document.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let document = inner
            .documents
            .get_mut(&id)
            .ok_or_else(|| ProcessError::NotFound(format!("document {id}")))?;

        document.status = DocumentStatus::Completed;
        document.processing_error = None;
        document.updated_at = Utc::now();

        let first_completion = document.first_completed_at.is_none();
        if first_completion {
            document.first_completed_at = Some(Utc::now());
        }
        Ok(first_completion)
    }

    async fn insert_chunk(&self, chunk: DocumentChunk) -> Result<()> {
        self.inner
            .write()
            .await
            .chunks
            .entry(chunk.document_id)
            .or_default()
            .push(chunk);
        Ok(())
    }

    async fn delete_chunks(&self, document_id: Uuid) -> Result<u64> {
        let removed = self
            .inner
            .write()
            .await
            .chunks
            .remove(&document_id)
            .map(|chunks| chunks.len() as u64)
            .unwrap_or(0);
        Ok(removed)
    }

    async fn list_chunks(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>> {
        Ok(self
            .inner
            .read()
            .await
            .chunks
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn chunk_stats(&self, document_id: Uuid) -> Result<(u64, u64)> {
        let inner = self.inner.read().await;
        let chunks = inner.chunks.get(&document_id);
        let count = chunks.map(|c| c.len() as u64).unwrap_or(0);
        let tokens = chunks
            .map(|c| c.iter().map(|chunk| chunk.token_count as u64).sum())
            .unwrap_or(0);
        Ok((count, tokens))
    }

    async fn adjust_counters(
        &self,
        knowledge_base_id: Uuid,
        delta_documents: i64,
        delta_chunks: i64,
        delta_tokens: i64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let knowledge_base = inner
            .knowledge_bases
            .get_mut(&knowledge_base_id)
            .ok_or_else(|| ProcessError::NotFound(format!("knowledge base {knowledge_base_id}")))?;

        knowledge_base.total_documents = apply_delta(knowledge_base.total_documents, delta_documents);
        knowledge_base.total_chunks = apply_delta(knowledge_base.total_chunks, delta_chunks);
        knowledge_base.total_tokens = apply_delta(knowledge_base.total_tokens, delta_tokens);
        knowledge_base.last_synced_at = Some(Utc::now());
        Ok(())
    }
}
