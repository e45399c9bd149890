use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),

    #[error("invalid configuration value for {field}: {details}")]
    Invalid { field: &'static str, details: String },

    #[error("unable to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("document directory does not exist: {0}")]
    MissingDirectory(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential command failed: {0}")]
    Command(String),

    #[error("io error while acquiring credential: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to parse credential output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no credential provider succeeded: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed embedding payload: {0}")]
    MalformedPayload(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("{backend} resource not found: {name}")]
    NotFound { backend: String, name: String },

    #[error("index {index} exists with an incompatible schema: {details}")]
    Schema { index: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("xml decode error: {0}")]
    Xml(#[from] quick_xml::de::DeError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("store request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("connectivity error: {0}")]
    Connectivity(StoreError),

    #[error("schema error: {0}")]
    Schema(StoreError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("run cancelled during {0}")]
    Cancelled(&'static str),
}

impl From<StoreError> for PipelineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Schema { .. } => PipelineError::Schema(value),
            other => PipelineError::Connectivity(other),
        }
    }
}
