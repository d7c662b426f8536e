use crate::error::Result;
use crate::models::ChunkingOptions;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CHUNK_TOKENS: usize = 1_000;
pub const MIN_CHUNK_TOKENS: usize = 100;
pub const MAX_CHUNK_TOKENS: usize = 2_000;
pub const DEFAULT_OVERLAP_TOKENS: usize = 200;

const CHARS_PER_TOKEN: usize = 4;
const WORDS_PER_TOKEN: f64 = 0.75;
const SEPARATORS: [&str; 8] = ["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkerConfig {
    pub fn resolve(options: ChunkingOptions) -> Self {
        let chunk_size = options
            .chunk_size
            .unwrap_or(DEFAULT_CHUNK_TOKENS)
            .clamp(MIN_CHUNK_TOKENS, MAX_CHUNK_TOKENS);
        let overlap = options
            .overlap
            .unwrap_or(DEFAULT_OVERLAP_TOKENS)
            .min(chunk_size / 4);
        Self {
            chunk_size,
            overlap,
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::resolve(ChunkingOptions::default())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Sections,
    Paragraphs,
    Recursive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub index: usize,
    pub token_count: usize,
    pub page_number: Option<u32>,
    pub section: Option<String>,
}

pub struct ChunkingEngine {
    config: ChunkerConfig,
    header_re: Regex,
}

impl ChunkingEngine {
    pub fn new(options: ChunkingOptions) -> Result<Self> {
        Ok(Self {
            config: ChunkerConfig::resolve(options),
            header_re: Regex::new(r"(?m)^#{1,6}\s+\S")?,
        })
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    pub fn strategy_for(&self, text: &str) -> ChunkStrategy {
        if self.header_re.is_match(text) {
            ChunkStrategy::Sections
        } else if text.contains("\n\n") {
            ChunkStrategy::Paragraphs
        } else {
            ChunkStrategy::Recursive
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let strategy = self.strategy_for(text);
        let pieces: Vec<(String, Option<String>)> = match strategy {
            ChunkStrategy::Sections => self.split_sections(text),
            ChunkStrategy::Paragraphs | ChunkStrategy::Recursive => {
                split_recursive(text, &self.config, 0)
                    .into_iter()
                    .map(|content| (content, None))
                    .collect()
            }
        };

        let chunks: Vec<TextChunk> = pieces
            .into_iter()
            .filter(|(content, _)| !content.trim().is_empty())
            .enumerate()
            .map(|(index, (content, section))| {
                let content = content.trim().to_string();
                let token_count = estimate_tokens(&content);
                TextChunk {
                    content,
                    index,
                    token_count,
                    page_number: None,
                    section,
                }
            })
            .collect();

        debug!(
            strategy = ?strategy,
            chunk_count = chunks.len(),
            chunk_size = self.config.chunk_size,
            overlap = self.config.overlap,
            "text chunked"
        );

        chunks
    }

    fn split_sections(&self, text: &str) -> Vec<(String, Option<String>)> {
        let mut sections: Vec<(Option<String>, String)> = Vec::new();
        let mut title: Option<String> = None;
        let mut body = String::new();

        for line in text.lines() {
            if self.header_re.is_match(line) {
                if !body.trim().is_empty() {
                    sections.push((title.clone(), std::mem::take(&mut body)));
                } else {
                    body.clear();
                }
                title = Some(line.trim_start_matches('#').trim().to_string());
            }
            body.push_str(line);
            body.push('\n');
        }
        if !body.trim().is_empty() {
            sections.push((title, body));
        }

        let mut pieces = Vec::new();
        for (section_title, section_text) in sections {
            if estimate_tokens(section_text.trim()) <= self.config.chunk_size {
                pieces.push((section_text, section_title));
            } else {
                for sub in split_recursive(&section_text, &self.config, 0) {
                    pieces.push((sub, section_title.clone()));
                }
            }
        }
        pieces
    }
}

fn split_keep<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while let Some(offset) = text[start..].find(sep) {
        let end = start + offset + sep.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn split_recursive(text: &str, config: &ChunkerConfig, level: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if estimate_tokens(trimmed) <= config.chunk_size {
        return vec![trimmed.to_string()];
    }
    let Some(sep) = SEPARATORS.get(level) else {
        return window_split(trimmed, config);
    };

    let pieces = split_keep(text, sep);
    if pieces.len() <= 1 {
        return split_recursive(text, config, level + 1);
    }

    let mut chunks: Vec<String> = Vec::new();
    // `current` may start with seeded overlap; `fresh` marks whether any new
    // piece landed after the seed.
    let mut current = String::new();
    let mut current_chars = 0usize;
    let mut fresh = false;

    for piece in pieces {
        let piece_chars = piece.chars().count();

        if piece_chars.div_ceil(CHARS_PER_TOKEN) > config.chunk_size {
            if fresh && !current.trim().is_empty() {
                chunks.push(current.trim().to_string());
            }
            chunks.extend(split_recursive(piece, config, level + 1));
            current = chunks
                .last()
                .map(|chunk| overlap_tail(chunk, config))
                .unwrap_or_default();
            current_chars = current.chars().count();
            fresh = false;
            continue;
        }

        let over_budget =
            (current_chars + piece_chars).div_ceil(CHARS_PER_TOKEN) > config.chunk_size;
        if over_budget {
            if fresh {
                let flushed = current.trim().to_string();
                current = overlap_tail(&flushed, config);
                current_chars = current.chars().count();
                chunks.push(flushed);
            }
            // a seed that cannot fit alongside the piece is dropped so the
            // loop always advances
            if current_chars + piece_chars > config.chunk_size * CHARS_PER_TOKEN {
                current.clear();
                current_chars = 0;
            }
        }

        current.push_str(piece);
        current_chars += piece_chars;
        fresh = true;
    }

    if fresh && !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

fn overlap_tail(chunk: &str, config: &ChunkerConfig) -> String {
    let overlap_words = (config.overlap as f64 * WORDS_PER_TOKEN).floor() as usize;
    if overlap_words == 0 {
        return String::new();
    }
    let words: Vec<&str> = chunk.split_whitespace().collect();
    if words.is_empty() {
        return String::new();
    }
    let start = words.len().saturating_sub(overlap_words);
    let mut seed = words[start..].join(" ");
    seed.push(' ');
    seed
}

fn window_split(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let window = config.chunk_size * CHARS_PER_TOKEN;
    let overlap = config.overlap * CHARS_PER_TOKEN;
    let step = window.saturating_sub(overlap).max(1);
    let chars: Vec<char> = text.chars().collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(chunk_size: Option<usize>, overlap: Option<usize>) -> ChunkingEngine {
        ChunkingEngine::new(ChunkingOptions {
            chunk_size,
            overlap,
        })
        .expect("header regex is valid")
    }

    #[test]
    fn defaults_are_applied_and_clamped() {
        let config = ChunkerConfig::resolve(ChunkingOptions::default());
        assert_eq!(config.chunk_size, 1_000);
        assert_eq!(config.overlap, 200);

        let config = ChunkerConfig::resolve(ChunkingOptions {
            chunk_size: Some(5_000),
            overlap: None,
        });
        assert_eq!(config.chunk_size, 2_000);

        let config = ChunkerConfig::resolve(ChunkingOptions {
            chunk_size: Some(10),
            overlap: None,
        });
        assert_eq!(config.chunk_size, 100);
    }

    #[test]
    fn overlap_larger_than_chunk_size_is_clamped_to_a_quarter() {
        let config = ChunkerConfig::resolve(ChunkingOptions {
            chunk_size: Some(400),
            overlap: Some(400),
        });
        assert_eq!(config.overlap, 100);
    }

    #[test]
    fn empty_and_whitespace_input_yield_no_chunks() {
        let engine = engine(None, None);
        assert!(engine.chunk("").is_empty());
        assert!(engine.chunk("   \n\t \n\n ").is_empty());
    }

    #[test]
    fn chunking_is_deterministic() {
        let engine = engine(Some(120), Some(20));
        let text = "One sentence here. Another sentence follows! A third one? \
                    And the paragraph keeps going with more clauses, like this, \
                    until it finally ends."
            .repeat(20);

        let first = engine.chunk(&text);
        let second = engine.chunk(&text);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn markdown_headers_route_to_section_chunking() {
        let engine = engine(None, None);
        let chunks = engine.chunk("## Features\n\nA\n\n## Pricing\n\nB");

        assert_eq!(engine.strategy_for("## Features\n\nA"), ChunkStrategy::Sections);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section.as_deref(), Some("Features"));
        assert_eq!(chunks[1].section.as_deref(), Some("Pricing"));
        assert!(chunks[0].content.contains('A'));
        assert!(chunks[1].content.contains('B'));
    }

    #[test]
    fn preamble_before_first_header_has_no_section_tag() {
        let engine = engine(None, None);
        let chunks = engine.chunk("intro text\n\n# Setup\n\nrun the installer");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section, None);
        assert_eq!(chunks[1].section.as_deref(), Some("Setup"));
    }

    #[test]
    fn oversized_section_is_resplit_and_keeps_its_tag() {
        let engine = engine(Some(100), Some(10));
        let body = "A sentence of filler that pads the section out. ".repeat(40);
        let text = format!("# Big\n\n{body}");

        let chunks = engine.chunk(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.section.as_deref(), Some("Big"));
            assert!(chunk.token_count <= 100);
        }
    }

    #[test]
    fn paragraphs_aggregate_greedily_under_budget() {
        let engine = engine(None, None);
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";

        assert_eq!(engine.strategy_for(text), ChunkStrategy::Paragraphs);
        let chunks = engine.chunk(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("Third paragraph"));
    }

    #[test]
    fn paragraph_overflow_flushes_into_separate_chunks() {
        // each paragraph is ~98 tokens; two together blow a 100-token budget
        let paragraph = "lorem ".repeat(65);
        let text = vec![paragraph.trim(); 5].join("\n\n");
        let engine = engine(Some(100), Some(0));

        let chunks = engine.chunk(&text);
        assert_eq!(chunks.len(), 5);
        for chunk in &chunks {
            assert!(chunk.token_count <= 100);
        }
    }

    #[test]
    fn unstructured_text_routes_to_recursive_splitting() {
        let text = "word ".repeat(10_000);
        let engine = engine(Some(1_000), Some(200));

        assert_eq!(engine.strategy_for(&text), ChunkStrategy::Recursive);
        let chunks = engine.chunk(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 1_000, "chunk {} over budget", chunk.index);
        }
    }

    #[test]
    fn unbroken_run_falls_back_to_character_windows() {
        let text = "x".repeat(10_000);
        let engine = engine(Some(100), Some(10));

        let chunks = engine.chunk(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 100);
        }
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.content.chars().count(), 400);
        }
    }

    #[test]
    fn huge_overlap_still_terminates_with_bounded_chunks() {
        let engine = engine(Some(100), Some(100_000));
        let text = "many words in a row ".repeat(500);

        let chunks = engine.chunk(&text);
        assert!(!chunks.is_empty());
        assert!(chunks.len() < 200);
        for chunk in &chunks {
            assert!(chunk.token_count <= 100);
        }
    }

    #[test]
    fn indices_are_contiguous_and_zero_based() {
        let engine = engine(Some(100), Some(10));
        let text = "A clause, then another, then more. ".repeat(100);

        for (expected, chunk) in engine.chunk(&text).iter().enumerate() {
            assert_eq!(chunk.index, expected);
        }
    }

    fn non_whitespace(text: &str) -> Vec<char> {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn is_subsequence(needle: &[char], haystack: &[char]) -> bool {
        let mut position = 0;
        for c in haystack {
            if position < needle.len() && needle[position] == *c {
                position += 1;
            }
        }
        position == needle.len()
    }

    #[test]
    fn no_non_whitespace_character_is_dropped() {
        let engine = engine(Some(100), Some(20));
        let text = "Numbers 12345 and symbols #$% survive. New sentences too! \
                    Plus clauses, with commas, and line\nbreaks.\n\nAnd paragraphs."
            .repeat(10);

        let chunks = engine.chunk(&text);
        let reassembled: String = chunks
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        // overlap duplicates regions, so the source must be a subsequence of
        // the reassembly rather than equal to it
        assert!(is_subsequence(
            &non_whitespace(&text),
            &non_whitespace(&reassembled)
        ));
    }
}
