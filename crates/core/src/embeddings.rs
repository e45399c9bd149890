use crate::error::EmbeddingError;
use crate::models::Embedding;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
pub const DEFAULT_OPENAI_API_VERSION: &str = "2023-05-15";
pub const DEFAULT_OPENAI_DEPLOYMENT: &str = "text-embedding-ada-002";

#[async_trait]
pub trait EmbeddingProvider {
    fn name(&self) -> &str;

    /// Output size when known up front.
    fn dimensions(&self) -> Option<usize>;

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self { dimensions: 128 }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Embedding {
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
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "local-ngram"
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions.max(1))
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

/// How often a failed embedding request is re-sent before the chunk is given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .checked_mul(1u32 << attempt.min(5))
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct AzureOpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub dimensions: Option<usize>,
}

/// Azure OpenAI embeddings deployment, one request per text.
#[derive(Clone)]
pub struct AzureOpenAiEmbedder {
    client: Client,
    url: String,
    api_key: String,
    dimensions: Option<usize>,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl AzureOpenAiEmbedder {
    pub fn new(client: Client, config: AzureOpenAiConfig, retry: RetryPolicy) -> Self {
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            config.endpoint.trim_end_matches('/'),
            config.deployment,
            config.api_version
        );
        Self {
            client,
            url,
            api_key: config.api_key,
            dimensions: config.dimensions,
            retry,
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|error| EmbeddingError::MalformedPayload(error.to_string()))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| EmbeddingError::MalformedPayload("response has no data".to_string()))?;

        if embedding.is_empty() {
            return Err(EmbeddingError::MalformedPayload(
                "embedding vector is empty".to_string(),
            ));
        }
        if let Some(expected) = self.dimensions {
            if embedding.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embedding)
    }
}

fn is_retryable(error: &EmbeddingError) -> bool {
    match error {
        EmbeddingError::Status { status, .. } => *status == 429 || *status >= 500,
        EmbeddingError::Http(error) => error.is_timeout() || error.is_connect(),
        _ => false,
    }
}

#[async_trait]
impl EmbeddingProvider for AzureOpenAiEmbedder {
    fn name(&self) -> &str {
        "azure-openai"
    }

    fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let mut attempt = 0;
        loop {
            match self.embed_once(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(error) if attempt < self.retry.max_retries && is_retryable(&error) => {
                    let delay = self.retry.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %error,
                        "retrying embedding request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{build_client, DEFAULT_REQUEST_TIMEOUT};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer, retry: RetryPolicy) -> AzureOpenAiEmbedder {
        AzureOpenAiEmbedder::new(
            build_client(DEFAULT_REQUEST_TIMEOUT).unwrap(),
            AzureOpenAiConfig {
                endpoint: format!("{}/", server.uri()),
                api_key: "secret".to_string(),
                deployment: "ada".to_string(),
                api_version: DEFAULT_OPENAI_API_VERSION.to_string(),
                dimensions: None,
            },
            retry,
        )
    }

    fn fast_retries(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn ngram_embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_sync("Hydraulic pressure and flow");
        let second = embedder.embed_sync("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn ngram_embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed_sync("abc").len(), 32);
        assert_eq!(EmbeddingProvider::dimensions(&embedder), Some(32));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = fast_retries(3);
        assert_eq!(policy.backoff(0), Duration::from_millis(1));
        assert_eq!(policy.backoff(2), Duration::from_millis(4));
        assert_eq!(policy.backoff(9), Duration::from_millis(32));
    }

    #[test]
    fn huge_backoff_saturates() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_backoff: Duration::from_millis(u64::MAX),
        };
        assert_eq!(policy.backoff(3), Duration::MAX);
    }

    #[tokio::test]
    async fn posts_input_and_reads_first_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/ada/embeddings"))
            .and(query_param("api-version", DEFAULT_OPENAI_API_VERSION))
            .and(header("api-key", "secret"))
            .and(body_json(json!({ "input": "pump curve" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [ { "embedding": [0.25, -0.5, 1.0], "index": 0 } ]
            })))
            .mount(&server)
            .await;

        let vector = embedder(&server, RetryPolicy::default())
            .embed("pump curve")
            .await
            .unwrap();
        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn non_200_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .expect(1)
            .mount(&server)
            .await;

        let error = embedder(&server, fast_retries(3))
            .embed("text")
            .await
            .unwrap_err();
        match error {
            EmbeddingError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
            .mount(&server)
            .await;

        let result = embedder(&server, RetryPolicy::default()).embed("text").await;
        assert!(matches!(result, Err(EmbeddingError::MalformedPayload(_))));
    }

    #[tokio::test]
    async fn throttled_requests_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [ { "embedding": [1.0, 2.0] } ]
            })))
            .mount(&server)
            .await;

        let vector = embedder(&server, fast_retries(2)).embed("text").await.unwrap();
        assert_eq!(vector, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn no_retry_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let result = embedder(&server, RetryPolicy::default()).embed("text").await;
        assert!(matches!(result, Err(EmbeddingError::Status { status: 503, .. })));
    }
}
