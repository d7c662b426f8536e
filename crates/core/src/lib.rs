pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod store;

pub use chunking::{
    estimate_tokens, ChunkStrategy, ChunkerConfig, ChunkingEngine, TextChunk,
    DEFAULT_CHUNK_TOKENS, DEFAULT_OVERLAP_TOKENS, MAX_CHUNK_TOKENS, MIN_CHUNK_TOKENS,
};
pub use embeddings::{
    Embedder, HashEmbedder, HttpEmbedder, MemoryLedger, UsageLedger, UsageRecord,
    DEFAULT_EMBEDDING_DIMENSIONS, EMBEDDING_COST_PER_TOKEN_CENTS,
};
pub use error::{ProcessError, Result};
pub use extractor::{
    CsvExtractor, ExtractedText, ExtractorRegistry, JsonExtractor, PdfTextExtractor,
    PlainTextExtractor, TextExtractor,
};
pub use ingest::{digest_file, discover_supported_files, file_type_for, register_file};
pub use models::{
    ChunkingOptions, Document, DocumentChunk, DocumentStatus, FileType, KnowledgeBase,
};
pub use orchestrator::{ProcessingOrchestrator, ProcessingOutcome};
pub use store::{DocumentStore, MemoryStore};
