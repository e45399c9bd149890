use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pdf_ingest_core::{
    build_client, generate_container_name, upload_pdfs, AnyEmbedder, AnyIndexStore, AppConfig,
    AzureBlobStore, ChainedCredential, CredentialProvider, EmbedderKind, EmbeddingProvider,
    IdStrategy, IndexBackend, IndexSchema, IndexStore, IngestPipeline, PipelineOptions,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-ingest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML config file with [storage], [search], [openai] and [pipeline] sections.
    #[arg(long, global = true, env = "PDF_INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,
}

/// Values that take precedence over the config file.
#[derive(Args)]
struct Overrides {
    /// Blob storage account URL
    #[arg(long, alias = "account_url", global = true, env = "AZURE_STORAGE_ACCOUNT_URL")]
    account_url: Option<String>,

    /// Blob container holding the PDFs
    #[arg(long, alias = "bucket_name", global = true, env = "BUCKET_NAME")]
    bucket_name: Option<String>,

    /// Search service endpoint
    #[arg(long, global = true, env = "SEARCH_ENDPOINT")]
    endpoint: Option<String>,

    /// Search index name
    #[arg(long, alias = "index_name", global = true, env = "INDEX_NAME")]
    index_name: Option<String>,

    /// Search admin key; a bearer token is used when absent
    #[arg(
        long,
        alias = "api_key",
        global = true,
        env = "SEARCH_API_KEY",
        hide_env_values = true
    )]
    api_key: Option<String>,

    /// Azure OpenAI endpoint
    #[arg(long, alias = "openai_endpoint", global = true, env = "OPENAI_ENDPOINT")]
    openai_endpoint: Option<String>,

    /// Azure OpenAI key
    #[arg(
        long,
        alias = "openai_api_key",
        global = true,
        env = "OPENAI_API_KEY",
        hide_env_values = true
    )]
    openai_api_key: Option<String>,

    /// Local staging directory
    #[arg(long, alias = "local_path", global = true, env = "LOCAL_PATH")]
    local_path: Option<PathBuf>,

    /// Index backend: azure or opensearch
    #[arg(long, alias = "index_backend", global = true)]
    index_backend: Option<IndexBackend>,

    /// Embedder: azure-openai or local
    #[arg(long, global = true)]
    embedder: Option<EmbedderKind>,

    /// Vector length of the index schema
    #[arg(long, alias = "embedding_dimensions", global = true)]
    embedding_dimensions: Option<usize>,
}

impl Overrides {
    fn apply(self, config: &mut AppConfig) {
        if let Some(value) = self.account_url {
            config.storage.account_url = Some(value);
        }
        if let Some(value) = self.bucket_name {
            config.storage.bucket_name = Some(value);
        }
        if let Some(value) = self.endpoint {
            config.search.endpoint = Some(value);
        }
        if let Some(value) = self.index_name {
            config.search.index_name = Some(value);
        }
        if let Some(value) = self.api_key {
            config.search.api_key = Some(value);
        }
        if let Some(value) = self.openai_endpoint {
            config.openai.openai_endpoint = Some(value);
        }
        if let Some(value) = self.openai_api_key {
            config.openai.openai_api_key = Some(value);
        }
        if let Some(value) = self.local_path {
            config.pipeline.local_path = Some(value);
        }
        if let Some(value) = self.index_backend {
            config.search.backend = value;
        }
        if let Some(value) = self.embedder {
            config.openai.embedder = value;
        }
        if self.embedding_dimensions.is_some() {
            config.openai.embedding_dimensions = self.embedding_dimensions;
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Download PDFs, chunk, embed and upsert them into the search index.
    Ingest {
        /// Use the PDFs already in the local directory.
        #[arg(long, alias = "skip_download", default_value_t = false)]
        skip_download: bool,
        /// Only read PDFs at the top level of the local directory.
        #[arg(long, alias = "no_recursive", default_value_t = false)]
        no_recursive: bool,
        #[arg(long, alias = "chunk_size")]
        chunk_size: Option<usize>,
        #[arg(long, alias = "chunk_overlap")]
        chunk_overlap: Option<usize>,
        /// ordinal or content-hash
        #[arg(long, alias = "id_strategy")]
        id_strategy: Option<IdStrategy>,
        /// Write skipped chunks as JSON to this file.
        #[arg(long, alias = "skipped_report")]
        skipped_report: Option<PathBuf>,
    },
    /// Upload local PDFs to a blob container, creating it when needed.
    Upload {
        /// Only upload PDFs at the top level of the local directory.
        #[arg(long, alias = "no_recursive", default_value_t = false)]
        no_recursive: bool,
    },
    /// Create the search index if it does not exist yet.
    CreateIndex,
}

fn load_config(cli_config: Option<&PathBuf>, overrides: Overrides) -> anyhow::Result<AppConfig> {
    let mut config = match cli_config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next checkpoint");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_ref(), cli.overrides)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-ingest boot"
    );

    let cancel = cancel_on_ctrl_c();
    let credential: Arc<dyn CredentialProvider + Send + Sync> =
        Arc::new(ChainedCredential::default_chain());

    match cli.command {
        Command::Ingest {
            skip_download,
            no_recursive,
            chunk_size,
            chunk_overlap,
            id_strategy,
            skipped_report,
        } => {
            config.pipeline.skip_download |= skip_download;
            config.pipeline.recursive &= !no_recursive;
            if let Some(value) = chunk_size {
                config.pipeline.chunk_size = value;
            }
            if let Some(value) = chunk_overlap {
                config.pipeline.chunk_overlap = value;
            }
            if let Some(value) = id_strategy {
                config.pipeline.id_strategy = value;
            }
            if skipped_report.is_some() {
                config.pipeline.skipped_report = skipped_report;
            }
            config.validate_for_ingest()?;

            let client = build_client(config.request_timeout())?;
            let embedder = AnyEmbedder::from_config(&config, client.clone())?;
            let index = AnyIndexStore::from_config(&config, client.clone(), credential.clone())?;
            let options = PipelineOptions::from_config(&config)?;
            let pipeline = IngestPipeline::new(embedder, index, options);

            let summary = if config.pipeline.skip_download {
                pipeline.run(&cancel).await?
            } else {
                let objects = AzureBlobStore::new(
                    client,
                    &config.account_url()?,
                    config.bucket_name()?,
                    credential,
                )?;
                pipeline.with_object_store(objects).run(&cancel).await?
            };

            for skipped in &summary.skipped_files {
                warn!(path = %skipped, "pdf was not readable");
            }
            for record in &summary.rejected {
                warn!(id = %record.id, reason = %record.message, "record rejected by index");
            }
            println!("{summary}");
        }
        Command::Upload { no_recursive } => {
            config.validate_for_upload()?;
            let container = match config.storage.bucket_name.clone() {
                Some(name) if !name.trim().is_empty() => name,
                _ => {
                    let name = generate_container_name();
                    println!("container name: {name}");
                    name
                }
            };

            let client = build_client(config.request_timeout())?;
            let objects =
                AzureBlobStore::new(client, &config.account_url()?, container, credential)?;
            let local_path = config.local_path()?;
            let summary = upload_pdfs(
                &objects,
                local_path,
                config.pipeline.recursive && !no_recursive,
                &cancel,
            )
            .await
            .with_context(|| format!("uploading {}", local_path.display()))?;

            println!(
                "{} file(s) uploaded to {}{}",
                summary.uploaded.len(),
                summary.container,
                if summary.created { " (new container)" } else { "" }
            );
        }
        Command::CreateIndex => {
            config.validate_for_index()?;
            let client = build_client(config.request_timeout())?;
            let index = AnyIndexStore::from_config(&config, client.clone(), credential)?;

            let dimensions = match config.openai.embedding_dimensions {
                Some(dimensions) => dimensions,
                None if config.openai.embedder == EmbedderKind::Local => {
                    AnyEmbedder::from_config(&config, client)?
                        .dimensions()
                        .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS)
                }
                None => DEFAULT_EMBEDDING_DIMENSIONS,
            };
            let schema = IndexSchema::for_records(config.index_name()?, dimensions);
            let status = index.ensure_index(&schema).await?;
            println!("index {}: {status}", schema.name);
        }
    }

    Ok(())
}
