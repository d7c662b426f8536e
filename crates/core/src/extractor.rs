use crate::error::{ProcessError, Result};
use crate::models::FileType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub word_count: usize,
    pub page_count: Option<u32>,
    pub language: Option<String>,
}

impl ExtractedText {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let word_count = count_words(&text);
        let language = detect_language(&text);
        Self {
            text,
            word_count,
            page_count: None,
            language,
        }
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

// overwhelmingly ASCII-alphabetic text is tagged "en", anything else is left
// untagged
fn detect_language(text: &str) -> Option<String> {
    let alphabetic: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if alphabetic.is_empty() {
        return None;
    }
    let ascii = alphabetic.iter().filter(|c| c.is_ascii()).count();
    if ascii * 100 / alphabetic.len() >= 90 {
        Some("en".to_string())
    } else {
        None
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> Result<ExtractedText>;

    fn name(&self) -> &'static str;
}

#[derive(Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<ExtractedText> {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => String::from_utf8_lossy(bytes).into_owned(),
        };
        Ok(ExtractedText::new(text))
    }

    fn name(&self) -> &'static str {
        "plain_text"
    }
}

/// Pretty-prints JSON so nested values become line-oriented text.
#[derive(Default)]
pub struct JsonExtractor;

#[async_trait]
impl TextExtractor for JsonExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<ExtractedText> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|error| ProcessError::Extraction(format!("invalid json: {error}")))?;
        let text = serde_json::to_string_pretty(&value)?;
        Ok(ExtractedText::new(text))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Flattens CSV rows into `field | field | field` lines; malformed input
/// degrades to naive line joining.
#[derive(Default)]
pub struct CsvExtractor;

impl CsvExtractor {
    fn flatten(bytes: &[u8]) -> Result<String, csv::Error> {
        let mut reader = csv::Reader::from_reader(bytes);
        let mut lines = Vec::new();

        let headers = reader.headers()?;
        if !headers.is_empty() {
            lines.push(headers.iter().collect::<Vec<_>>().join(" | "));
        }
        for record in reader.records() {
            let record = record?;
            lines.push(record.iter().collect::<Vec<_>>().join(" | "));
        }

        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl TextExtractor for CsvExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<ExtractedText> {
        let text = match Self::flatten(bytes) {
            Ok(text) => text,
            Err(error) => {
                debug!(error = %error, "csv parse failed, joining raw lines");
                String::from_utf8_lossy(bytes)
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        Ok(ExtractedText::new(text))
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

#[derive(Default)]
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, bytes: &[u8]) -> Result<ExtractedText> {
        let document = lopdf::Document::load_mem(bytes)
            .map_err(|error| ProcessError::Extraction(format!("pdf parse error: {error}")))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| ProcessError::Extraction(format!("pdf parse error: {error}")))?;
            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        if pages.is_empty() {
            return Err(ProcessError::Extraction(
                "pdf had no readable page text".to_string(),
            ));
        }

        let page_count = pages.len() as u32;
        Ok(ExtractedText::new(pages.join("\n\n")).with_page_count(page_count))
    }

    fn name(&self) -> &'static str {
        "pdf"
    }
}

/// Formats without a default (DOCX) stay unregistered until a caller
/// supplies an implementation.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<FileType, Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(FileType::PlainText, Arc::new(PlainTextExtractor));
        registry.register(FileType::Markdown, Arc::new(PlainTextExtractor));
        registry.register(FileType::Json, Arc::new(JsonExtractor));
        registry.register(FileType::Csv, Arc::new(CsvExtractor));
        registry.register(FileType::Pdf, Arc::new(PdfTextExtractor));
        registry
    }

    pub fn register(&mut self, file_type: FileType, extractor: Arc<dyn TextExtractor>) {
        self.extractors.insert(file_type, extractor);
    }

    pub fn resolve(&self, file_type: FileType) -> Result<Arc<dyn TextExtractor>> {
        self.extractors
            .get(&file_type)
            .cloned()
            .ok_or_else(|| ProcessError::UnsupportedFileType(file_type.to_string()))
    }
}
