//! Run configuration loaded once at startup from a sectioned TOML file and
//! handed to the pipeline by reference.
//!
//! ```toml
//! [storage]
//! account_url = "https://myaccount.blob.core.windows.net"
//! bucket_name = "pdfs"
//!
//! [search]
//! endpoint = "https://mysearch.search.windows.net"
//! index_name = "documents"
//!
//! [openai]
//! openai_endpoint = "https://myopenai.openai.azure.com"
//! openai_api_key = "..."
//!
//! [pipeline]
//! local_path = "./downloads"
//! chunk_size = 1000
//! chunk_overlap = 100
//! ```

use crate::chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embeddings::{DEFAULT_OPENAI_API_VERSION, DEFAULT_OPENAI_DEPLOYMENT};
use crate::error::ConfigError;
use crate::models::IdStrategy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 1000;
/// Azure AI Search refuses index requests over 16 MB.
pub const DEFAULT_UPLOAD_BATCH_BYTES: usize = 15 * 1024 * 1024;

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    DEFAULT_UPLOAD_BATCH_SIZE
}

fn default_batch_bytes() -> usize {
    DEFAULT_UPLOAD_BATCH_BYTES
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_deployment() -> String {
    DEFAULT_OPENAI_DEPLOYMENT.to_string()
}

fn default_api_version() -> String {
    DEFAULT_OPENAI_API_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexBackend {
    #[default]
    Azure,
    Opensearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedderKind {
    #[default]
    AzureOpenai,
    Local,
}

impl FromStr for IndexBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "azure" => Ok(Self::Azure),
            "opensearch" => Ok(Self::Opensearch),
            other => Err(format!("unknown index backend `{other}` (azure, opensearch)")),
        }
    }
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "azure-openai" => Ok(Self::AzureOpenai),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown embedder `{other}` (azure-openai, local)")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub search: SearchConfig,
    pub openai: OpenAiConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    pub account_url: Option<String>,
    pub bucket_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub endpoint: Option<String>,
    pub index_name: Option<String>,
    pub api_key: Option<String>,
    #[serde(default)]
    pub backend: IndexBackend,
    #[serde(default = "default_batch_size")]
    pub upload_batch_size: usize,
    #[serde(default = "default_batch_bytes")]
    pub upload_batch_bytes: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            index_name: None,
            api_key: None,
            backend: IndexBackend::default(),
            upload_batch_size: default_batch_size(),
            upload_batch_bytes: default_batch_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    pub openai_endpoint: Option<String>,
    pub openai_api_key: Option<String>,
    #[serde(default = "default_deployment")]
    pub deployment: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub embedding_dimensions: Option<usize>,
    #[serde(default)]
    pub embedder: EmbedderKind,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            openai_endpoint: None,
            openai_api_key: None,
            deployment: default_deployment(),
            api_version: default_api_version(),
            embedding_dimensions: None,
            embedder: EmbedderKind::default(),
            max_retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub local_path: Option<PathBuf>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub skip_download: bool,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    pub skipped_report: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            local_path: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            recursive: true,
            skip_download: false,
            request_timeout_secs: default_timeout_secs(),
            id_strategy: IdStrategy::default(),
            skipped_report: None,
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(field))
}

/// Accepts a bare host (`mysearch.search.windows.net`) or a full URL.
pub fn normalize_endpoint(value: &str, field: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    Url::parse(&candidate).map_err(|error| ConfigError::Invalid {
        field,
        details: error.to_string(),
    })?;
    Ok(candidate)
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.request_timeout_secs)
    }

    pub fn chunking(&self) -> Result<ChunkingConfig, ConfigError> {
        ChunkingConfig::new(self.pipeline.chunk_size, self.pipeline.chunk_overlap).map_err(
            |error| ConfigError::Invalid {
                field: "chunk_overlap",
                details: error.to_string(),
            },
        )
    }

    pub fn local_path(&self) -> Result<&Path, ConfigError> {
        self.pipeline
            .local_path
            .as_deref()
            .ok_or(ConfigError::Missing("local_path"))
    }

    pub fn account_url(&self) -> Result<String, ConfigError> {
        normalize_endpoint(
            required(&self.storage.account_url, "account_url")?,
            "account_url",
        )
    }

    pub fn bucket_name(&self) -> Result<&str, ConfigError> {
        required(&self.storage.bucket_name, "bucket_name")
    }

    pub fn search_endpoint(&self) -> Result<String, ConfigError> {
        normalize_endpoint(required(&self.search.endpoint, "endpoint")?, "endpoint")
    }

    pub fn index_name(&self) -> Result<&str, ConfigError> {
        required(&self.search.index_name, "index_name")
    }

    pub fn search_api_key(&self) -> Option<&str> {
        required(&self.search.api_key, "api_key").ok()
    }

    pub fn openai_endpoint(&self) -> Result<String, ConfigError> {
        normalize_endpoint(
            required(&self.openai.openai_endpoint, "openai_endpoint")?,
            "openai_endpoint",
        )
    }

    pub fn openai_api_key(&self) -> Result<&str, ConfigError> {
        required(&self.openai.openai_api_key, "openai_api_key")
    }

    fn validate_common(&self) -> Result<(), ConfigError> {
        if self.pipeline.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                details: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_for_index(&self) -> Result<(), ConfigError> {
        self.validate_common()?;
        self.search_endpoint()?;
        self.index_name()?;
        if self.search.upload_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "upload_batch_size",
                details: "must be greater than zero".to_string(),
            });
        }
        if self.search.upload_batch_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "upload_batch_bytes",
                details: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_for_upload(&self) -> Result<(), ConfigError> {
        self.validate_common()?;
        self.account_url()?;
        self.local_path()?;
        Ok(())
    }

    /// Checks everything a full ingest run needs before any remote call.
    pub fn validate_for_ingest(&self) -> Result<(), ConfigError> {
        self.validate_for_index()?;
        self.local_path()?;
        self.chunking()?;
        if !self.pipeline.skip_download {
            self.account_url()?;
            self.bucket_name()?;
        }
        if self.openai.embedder == EmbedderKind::AzureOpenai {
            self.openai_endpoint()?;
            self.openai_api_key()?;
        }
        if self.openai.embedding_dimensions == Some(0) {
            return Err(ConfigError::Invalid {
                field: "embedding_dimensions",
                details: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [storage]
        account_url = "https://acct.blob.core.windows.net"
        bucket_name = "f9a1317d-792f-4aa1-a8ca-750851bba299"

        [search]
        endpoint = "azuregroup8.search.windows.net"
        index_name = "documents"
        api_key = "admin"

        [openai]
        openai_endpoint = "https://oai.openai.azure.com/"
        openai_api_key = "key"
        max_retries = 2

        [pipeline]
        local_path = "./downloads"
        chunk_size = 500
        chunk_overlap = 50
        id_strategy = "content-hash"
    "#;

    #[test]
    fn full_config_is_parsed_and_valid() {
        let config = AppConfig::from_toml(FULL).unwrap();
        config.validate_for_ingest().unwrap();

        assert_eq!(config.index_name().unwrap(), "documents");
        assert_eq!(
            config.search_endpoint().unwrap(),
            "https://azuregroup8.search.windows.net"
        );
        assert_eq!(config.openai_endpoint().unwrap(), "https://oai.openai.azure.com");
        assert_eq!(config.openai.max_retries, 2);
        assert_eq!(config.openai.deployment, DEFAULT_OPENAI_DEPLOYMENT);
        assert_eq!(config.pipeline.id_strategy, IdStrategy::ContentHash);
        assert_eq!(config.chunking().unwrap(), ChunkingConfig::new(500, 50).unwrap());
        assert_eq!(config.search.upload_batch_size, DEFAULT_UPLOAD_BATCH_SIZE);
        assert_eq!(config.search.upload_batch_bytes, DEFAULT_UPLOAD_BATCH_BYTES);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.pipeline.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.pipeline.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
        assert!(config.pipeline.recursive);
        assert_eq!(config.search.backend, IndexBackend::Azure);
        assert_eq!(config.openai.embedder, EmbedderKind::AzureOpenai);
    }

    #[test]
    fn missing_values_are_named() {
        let config = AppConfig::from_toml("").unwrap();
        assert!(matches!(
            config.validate_for_ingest(),
            Err(ConfigError::Missing("endpoint"))
        ));

        let mut config = AppConfig::from_toml(FULL).unwrap();
        config.openai.openai_api_key = Some("  ".to_string());
        assert!(matches!(
            config.validate_for_ingest(),
            Err(ConfigError::Missing("openai_api_key"))
        ));
    }

    #[test]
    fn skip_download_and_local_embedder_relax_requirements() {
        let raw = r#"
            [search]
            endpoint = "http://localhost:9200"
            index_name = "docs"
            backend = "opensearch"

            [openai]
            embedder = "local"

            [pipeline]
            local_path = "/tmp/pdfs"
            skip_download = true
        "#;
        let config = AppConfig::from_toml(raw).unwrap();
        config.validate_for_ingest().unwrap();
        assert_eq!(config.search.backend, IndexBackend::Opensearch);
    }

    #[test]
    fn overlap_not_smaller_than_chunk_size_is_invalid() {
        let mut config = AppConfig::from_toml(FULL).unwrap();
        config.pipeline.chunk_overlap = config.pipeline.chunk_size;
        assert!(matches!(
            config.validate_for_ingest(),
            Err(ConfigError::Invalid { field: "chunk_overlap", .. })
        ));
    }

    #[test]
    fn zero_batch_byte_budget_is_invalid() {
        let mut config = AppConfig::from_toml(FULL).unwrap();
        config.search.upload_batch_bytes = 0;
        assert!(matches!(
            config.validate_for_ingest(),
            Err(ConfigError::Invalid { field: "upload_batch_bytes", .. })
        ));
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let result = AppConfig::from_file(Path::new("/no/such/config.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn flag_values_parse_like_the_file_format() {
        assert_eq!("opensearch".parse::<IndexBackend>(), Ok(IndexBackend::Opensearch));
        assert_eq!("local".parse::<EmbedderKind>(), Ok(EmbedderKind::Local));
        assert_eq!("content-hash".parse::<IdStrategy>(), Ok(IdStrategy::ContentHash));
        assert!("qdrant".parse::<IndexBackend>().is_err());
    }
}
