use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `Pending -> Processing -> Completed | Failed`; only an explicit reprocess
/// moves a document back to `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    PlainText,
    Markdown,
    Json,
    Csv,
    Pdf,
    Docx,
}

impl FileType {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `None` means "use the pipeline default"; clamping happens in
/// [`crate::chunking::ChunkerConfig::resolve`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChunkingOptions {
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub knowledge_base_id: Uuid,
    pub file_name: String,
    pub file_type: FileType,
    pub source_path: String,
    pub checksum: String,
    pub chunking: ChunkingOptions,
    pub status: DocumentStatus,
    pub extracted_text: Option<String>,
    pub word_count: Option<usize>,
    pub page_count: Option<u32>,
    pub language: Option<String>,
    pub processing_error: Option<String>,
    /// First transition into `Completed`, used to count a document into its
    /// knowledge base exactly once across reprocesses.
    pub first_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        knowledge_base_id: Uuid,
        file_name: impl Into<String>,
        file_type: FileType,
        source_path: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            knowledge_base_id,
            file_name: file_name.into(),
            file_type,
            source_path: source_path.into(),
            checksum: checksum.into(),
            chunking: ChunkingOptions::default(),
            status: DocumentStatus::Pending,
            extracted_text: None,
            word_count: None,
            page_count: None,
            language: None,
            processing_error: None,
            first_completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingOptions) -> Self {
        self.chunking = chunking;
        self
    }
}

/// `chunk_index` values are unique and increasing per document, but the
/// persisted set may have gaps: a chunk whose embedding attempt failed is
/// skipped rather than stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub chunk_index: usize,
    pub token_count: usize,
    pub page_number: Option<u32>,
    pub section: Option<String>,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
}

/// Totals are additive: bumped on successful per-chunk writes and adjusted
/// on reprocess, never recomputed from the child rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: Uuid,
    pub name: String,
    pub total_documents: u64,
    pub total_chunks: u64,
    pub total_tokens: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            total_documents: 0,
            total_chunks: 0,
            total_tokens: 0,
            last_synced_at: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_from_extension_is_case_insensitive() {
        assert_eq!(FileType::from_extension("PDF"), Some(FileType::Pdf));
        assert_eq!(FileType::from_extension("md"), Some(FileType::Markdown));
        assert_eq!(FileType::from_extension("exe"), None);
    }

    #[test]
    fn new_document_starts_pending_with_no_text() {
        let document = Document::new(
            Uuid::new_v4(),
            "notes.txt",
            FileType::PlainText,
            "/tmp/notes.txt",
            "checksum",
        );

        assert_eq!(document.status, DocumentStatus::Pending);
        assert!(document.extracted_text.is_none());
        assert!(document.processing_error.is_none());
        assert!(document.chunking.chunk_size.is_none());
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(DocumentStatus::Completed.is_terminal());
        assert!(DocumentStatus::Failed.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
        assert!(!DocumentStatus::Pending.is_terminal());
    }
}
