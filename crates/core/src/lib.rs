pub mod backends;
pub mod chunking;
pub mod config;
pub mod credentials;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod http;
pub mod loader;
pub mod models;
pub mod object_store;
pub mod pipeline;
pub mod stores;
pub mod traits;
pub mod upload;

pub use backends::{AnyEmbedder, AnyIndexStore};
pub use chunking::{normalize_whitespace, split, split_with, window_text, ChunkingConfig};
pub use config::{AppConfig, EmbedderKind, IndexBackend};
pub use credentials::{
    AccessToken, AzureCliCredential, ChainedCredential, CredentialProvider, StaticTokenCredential,
};
pub use embeddings::{
    AzureOpenAiConfig, AzureOpenAiEmbedder, CharacterNgramEmbedder, EmbeddingProvider,
    RetryPolicy, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ConfigError, CredentialError, EmbeddingError, IngestError, PipelineError, StoreError,
};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use http::build_client;
pub use loader::{discover_pdf_files, PdfDirectoryLoader, SkippedPdf};
pub use models::{
    Chunk, Document, DocumentMetadata, Embedding, FailedRecord, IdStrategy, IndexRecord,
    IndexSchema, IndexStatus, RunSummary, SkippedChunk, UploadResult,
};
pub use object_store::{AzureBlobStore, ObjectStore};
pub use pipeline::{IngestPipeline, PipelineOptions};
pub use stores::{AzureSearchStore, OpenSearchStore, SearchAuth};
pub use traits::IndexStore;
pub use upload::{generate_container_name, upload_pdfs, UploadSummary};
