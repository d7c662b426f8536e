use crate::error::{ProcessError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use url::Url;
use uuid::Uuid;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const EMBEDDING_COST_PER_TOKEN_CENTS: f64 = 0.0001;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;

    fn provider(&self) -> &str;

    fn model(&self) -> &str;

    /// Configuration check run before any document work starts.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl HashEmbedder {
    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        "hash-trigram-v1"
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    endpoint: Url,
    api_key: String,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            api_key: api_key.into(),
            model: model.into(),
            dimensions,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let endpoint = read_env("EMBEDDINGS_ENDPOINT")
            .ok_or_else(|| ProcessError::Configuration("EMBEDDINGS_ENDPOINT is not set".into()))?;
        let api_key = read_env("EMBEDDINGS_API_KEY")
            .ok_or_else(|| ProcessError::Configuration("EMBEDDINGS_API_KEY is not set".into()))?;
        let model =
            read_env("EMBEDDINGS_MODEL").unwrap_or_else(|| "text-embedding-3-small".to_string());
        let dimensions = read_env("EMBEDDINGS_DIMENSIONS")
            .and_then(|value| value.parse().ok())
            .unwrap_or(1536);

        Self::new(&endpoint, api_key, model, dimensions)
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let value = value.trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProcessError::Embedding(format!(
                "embedding request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: EmbeddingResponse = response.json().await?;
        payload
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| ProcessError::Embedding("embedding response had no data".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider(&self) -> &str {
        "openai-compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn preflight(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ProcessError::Configuration(
                "embedding api key is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One row per embedding attempt, success or failure. Failed attempts keep
/// their input token count and carry zero output tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub knowledge_base_id: Uuid,
    pub document_id: Uuid,
    pub provider: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cost_cents: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn attempt(
        knowledge_base_id: Uuid,
        document_id: Uuid,
        provider: impl Into<String>,
        model: impl Into<String>,
        input_tokens: usize,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            knowledge_base_id,
            document_id,
            provider: provider.into(),
            model: model.into(),
            input_tokens,
            output_tokens: 0,
            cost_cents: input_tokens as f64 * EMBEDDING_COST_PER_TOKEN_CENTS,
            latency_ms,
            success: true,
            error: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn completed(mut self, output_tokens: usize) -> Self {
        self.output_tokens = output_tokens;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.output_tokens = 0;
        self.error = Some(error.into());
        self
    }
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn append(&self, record: UsageRecord) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl MemoryLedger {
    pub fn records(&self) -> Vec<UsageRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    async fn append(&self, record: UsageRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| ProcessError::Storage("ledger lock poisoned".to_string()))?
            .push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::default();
        let first = embedder.embed("support ticket escalation").await.unwrap();
        let second = embedder.embed("support ticket escalation").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn hash_embedder_outputs_expected_length() {
        let embedder = HashEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").await.unwrap();
        assert_eq!(vector.len(), 32);
        assert_eq!(embedder.dimensions(), 32);
    }

    #[test]
    fn usage_record_cost_scales_with_tokens() {
        let record = UsageRecord::attempt(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "local",
            "hash-trigram-v1",
            1_000,
            12,
        )
        .completed(128);

        assert!(record.success);
        assert_eq!(record.output_tokens, 128);
        assert!((record.cost_cents - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn failed_record_keeps_the_error_and_zeroes_output_tokens() {
        let record = UsageRecord::attempt(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "remote",
            "text-embedding-3-small",
            50,
            420,
        )
        .failed("rate limited");

        assert!(!record.success);
        assert_eq!(record.input_tokens, 50);
        assert_eq!(record.output_tokens, 0);
        assert_eq!(record.error.as_deref(), Some("rate limited"));
    }

    #[tokio::test]
    async fn memory_ledger_appends_in_order() {
        let ledger = MemoryLedger::default();
        for tokens in [10, 20, 30] {
            ledger
                .append(UsageRecord::attempt(
                    Uuid::new_v4(),
                    Uuid::new_v4(),
                    "local",
                    "hash-trigram-v1",
                    tokens,
                    1,
                ))
                .await
                .unwrap();
        }

        let records = ledger.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].input_tokens, 10);
        assert_eq!(records[2].input_tokens, 30);
    }

    #[test]
    fn http_embedder_preflight_rejects_empty_key() {
        let embedder = HttpEmbedder::new("http://localhost:9999/embeddings", "  ", "m", 8)
            .expect("url parses");
        assert!(matches!(
            embedder.preflight(),
            Err(ProcessError::Configuration(_))
        ));
    }
}
