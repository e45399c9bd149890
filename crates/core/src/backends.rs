//! Runtime selection of the embedding and index backends named in the config.

use crate::config::{AppConfig, EmbedderKind, IndexBackend};
use crate::credentials::CredentialProvider;
use crate::embeddings::{
    AzureOpenAiConfig, AzureOpenAiEmbedder, CharacterNgramEmbedder, EmbeddingProvider, RetryPolicy,
};
use crate::error::{ConfigError, EmbeddingError, PipelineError};
use crate::models::{Embedding, IndexRecord, IndexSchema, IndexStatus, UploadResult};
use crate::stores::{AzureSearchStore, OpenSearchStore, SearchAuth};
use crate::traits::IndexStore;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

macro_rules! delegate {
    ($self:expr, $($variant:path)|+, |$inner:ident| $expr:expr) => {
        match $self {
            $($variant($inner) => $expr,)+
        }
    };
}

pub enum AnyEmbedder {
    Azure(AzureOpenAiEmbedder),
    Local(CharacterNgramEmbedder),
}

impl AnyEmbedder {
    pub fn from_config(config: &AppConfig, client: Client) -> Result<Self, ConfigError> {
        Ok(match config.openai.embedder {
            EmbedderKind::AzureOpenai => Self::Azure(AzureOpenAiEmbedder::new(
                client,
                AzureOpenAiConfig {
                    endpoint: config.openai_endpoint()?,
                    api_key: config.openai_api_key()?.to_string(),
                    deployment: config.openai.deployment.clone(),
                    api_version: config.openai.api_version.clone(),
                    dimensions: config.openai.embedding_dimensions,
                },
                RetryPolicy {
                    max_retries: config.openai.max_retries,
                    base_backoff: Duration::from_millis(config.openai.retry_backoff_ms),
                },
            )),
            EmbedderKind::Local => Self::Local(match config.openai.embedding_dimensions {
                Some(dimensions) => CharacterNgramEmbedder { dimensions },
                None => CharacterNgramEmbedder::default(),
            }),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for AnyEmbedder {
    fn name(&self) -> &str {
        delegate!(self, AnyEmbedder::Azure | AnyEmbedder::Local, |inner| inner.name())
    }

    fn dimensions(&self) -> Option<usize> {
        delegate!(self, AnyEmbedder::Azure | AnyEmbedder::Local, |inner| inner.dimensions())
    }

    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        delegate!(self, AnyEmbedder::Azure | AnyEmbedder::Local, |inner| {
            inner.embed(text).await
        })
    }
}

pub enum AnyIndexStore {
    Azure(AzureSearchStore),
    OpenSearch(OpenSearchStore),
}

impl AnyIndexStore {
    /// Azure Search uses the configured admin key when present, otherwise a bearer token.
    pub fn from_config(
        config: &AppConfig,
        client: Client,
        credential: Arc<dyn CredentialProvider + Send + Sync>,
    ) -> Result<Self, PipelineError> {
        let endpoint = config.search_endpoint()?;
        let api_key = config.search_api_key().map(str::to_string);

        Ok(match config.search.backend {
            IndexBackend::Azure => {
                let auth = match api_key {
                    Some(key) => SearchAuth::ApiKey(key),
                    None => SearchAuth::Credential(credential),
                };
                Self::Azure(AzureSearchStore::new(client, &endpoint, auth)?)
            }
            IndexBackend::Opensearch => {
                Self::OpenSearch(OpenSearchStore::new(client, endpoint, api_key))
            }
        })
    }
}

#[async_trait]
impl IndexStore for AnyIndexStore {
    fn backend(&self) -> &str {
        delegate!(self, AnyIndexStore::Azure | AnyIndexStore::OpenSearch, |inner| {
            inner.backend()
        })
    }

    async fn ensure_index(&self, schema: &IndexSchema) -> Result<IndexStatus, StoreError> {
        delegate!(self, AnyIndexStore::Azure | AnyIndexStore::OpenSearch, |inner| {
            inner.ensure_index(schema).await
        })
    }

    async fn upsert(
        &self,
        index_name: &str,
        records: &[IndexRecord],
    ) -> Result<UploadResult, StoreError> {
        delegate!(self, AnyIndexStore::Azure | AnyIndexStore::OpenSearch, |inner| {
            inner.upsert(index_name, records).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticTokenCredential;
    use crate::http::{build_client, DEFAULT_REQUEST_TIMEOUT};

    fn config(raw: &str) -> AppConfig {
        AppConfig::from_toml(raw).unwrap()
    }

    #[tokio::test]
    async fn local_embedder_honours_configured_dimensions() {
        let config = config(
            r#"
            [openai]
            embedder = "local"
            embedding_dimensions = 32
            "#,
        );
        let embedder =
            AnyEmbedder::from_config(&config, build_client(DEFAULT_REQUEST_TIMEOUT).unwrap())
                .unwrap();

        assert_eq!(embedder.name(), "local-ngram");
        assert_eq!(embedder.embed("hello world").await.unwrap().len(), 32);
    }

    #[test]
    fn azure_embedder_requires_credentials() {
        let result = AnyEmbedder::from_config(
            &AppConfig::default(),
            build_client(DEFAULT_REQUEST_TIMEOUT).unwrap(),
        );
        assert!(matches!(result, Err(ConfigError::Missing("openai_endpoint"))));
    }

    #[test]
    fn index_backend_follows_config() {
        let credential: Arc<dyn CredentialProvider + Send + Sync> =
            Arc::new(StaticTokenCredential::new("token"));
        let client = build_client(DEFAULT_REQUEST_TIMEOUT).unwrap();

        let azure = AnyIndexStore::from_config(
            &config("[search]\nendpoint = \"mysearch.search.windows.net\""),
            client.clone(),
            credential.clone(),
        )
        .unwrap();
        assert_eq!(azure.backend(), "azure-search");

        let opensearch = AnyIndexStore::from_config(
            &config("[search]\nendpoint = \"http://localhost:9200\"\nbackend = \"opensearch\""),
            client,
            credential,
        )
        .unwrap();
        assert_eq!(opensearch.backend(), "opensearch");
    }
}
