use crate::chunking::{split_with, ChunkingConfig};
use crate::config::AppConfig;
use crate::embeddings::{EmbeddingProvider, DEFAULT_EMBEDDING_DIMENSIONS};
use crate::error::{ConfigError, PipelineError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::loader::{PdfDirectoryLoader, SkippedPdf};
use crate::models::{
    Chunk, Document, Embedding, IdStrategy, IndexRecord, IndexSchema, IndexStatus, RunSummary,
    SkippedChunk, UploadResult,
};
use crate::object_store::{AzureBlobStore, ObjectStore};
use crate::traits::IndexStore;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub staging_dir: PathBuf,
    pub download: bool,
    pub recursive: bool,
    pub chunking: ChunkingConfig,
    pub index_name: String,
    pub embedding_dimensions: Option<usize>,
    pub id_strategy: IdStrategy,
    pub upload_batch_size: usize,
    pub upload_batch_bytes: usize,
    pub skipped_report: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn new(staging_dir: impl Into<PathBuf>, index_name: impl Into<String>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            download: true,
            recursive: true,
            chunking: ChunkingConfig::default(),
            index_name: index_name.into(),
            embedding_dimensions: None,
            id_strategy: IdStrategy::default(),
            upload_batch_size: crate::config::DEFAULT_UPLOAD_BATCH_SIZE,
            upload_batch_bytes: crate::config::DEFAULT_UPLOAD_BATCH_BYTES,
            skipped_report: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            staging_dir: config.local_path()?.to_path_buf(),
            download: !config.pipeline.skip_download,
            recursive: config.pipeline.recursive,
            chunking: config.chunking()?,
            index_name: config.index_name()?.to_string(),
            embedding_dimensions: config.openai.embedding_dimensions,
            id_strategy: config.pipeline.id_strategy,
            upload_batch_size: config.search.upload_batch_size,
            upload_batch_bytes: config.search.upload_batch_bytes,
            skipped_report: config.pipeline.skipped_report.clone(),
        })
    }
}

/// Chunk that made it through embedding, with its position in the run.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub ordinal: usize,
    pub embedding: Embedding,
}

/// Download → load → chunk → embed → ensure index → upsert, strictly in sequence.
pub struct IngestPipeline<E, S, O = AzureBlobStore, X = LopdfExtractor> {
    embedder: E,
    index: S,
    objects: Option<O>,
    extractor: X,
    options: PipelineOptions,
}

impl<E, S> IngestPipeline<E, S> {
    pub fn new(embedder: E, index: S, options: PipelineOptions) -> Self {
        Self {
            embedder,
            index,
            objects: None,
            extractor: LopdfExtractor,
            options,
        }
    }
}

impl<E, S, O, X> IngestPipeline<E, S, O, X> {
    pub fn with_object_store<O2>(self, objects: O2) -> IngestPipeline<E, S, O2, X> {
        IngestPipeline {
            embedder: self.embedder,
            index: self.index,
            objects: Some(objects),
            extractor: self.extractor,
            options: self.options,
        }
    }

    pub fn with_extractor<X2>(self, extractor: X2) -> IngestPipeline<E, S, O, X2> {
        IngestPipeline {
            embedder: self.embedder,
            index: self.index,
            objects: self.objects,
            extractor,
            options: self.options,
        }
    }
}

impl<E, S, O, X> IngestPipeline<E, S, O, X>
where
    E: EmbeddingProvider + Send + Sync,
    S: IndexStore + Send + Sync,
    O: ObjectStore + Send + Sync,
    X: PdfExtractor + Clone,
{
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, PipelineError> {
        self.options
            .chunking
            .validate()
            .map_err(|error| ConfigError::Invalid {
                field: "chunk_overlap",
                details: error.to_string(),
            })?;

        let mut summary = RunSummary::default();

        if self.options.download {
            summary.downloaded = self.download(cancel).await?;
        }
        check(cancel, "load")?;

        let (documents, skipped_files) = self.load()?;
        summary.documents = documents.len();
        summary.skipped_files = skipped_files
            .iter()
            .map(|skipped| skipped.path.display().to_string())
            .collect();
        info!(
            documents = documents.len(),
            skipped_files = skipped_files.len(),
            "loaded documents"
        );
        check(cancel, "chunking")?;

        let chunks = split_with(&documents, self.options.chunking);
        summary.chunks = chunks.len();
        info!(
            chunks = chunks.len(),
            chunk_size = self.options.chunking.chunk_size,
            overlap = self.options.chunking.overlap,
            "chunked documents"
        );

        let (embedded, skipped_chunks) = self.embed_chunks(&chunks, cancel).await?;
        summary.embedded = embedded.len();
        summary.skipped_chunks = skipped_chunks;
        self.write_skipped_report(&summary.skipped_chunks).await?;
        check(cancel, "indexing")?;

        let dimensions = embedded
            .first()
            .map(|chunk| chunk.embedding.len())
            .or(self.options.embedding_dimensions)
            .or_else(|| self.embedder.dimensions())
            .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS);
        let records = build_records(&chunks, embedded, self.options.id_strategy);

        let (status, upload) = self.index_records(&records, dimensions, cancel).await?;
        summary.index_status = Some(status);
        summary.indexed = upload.succeeded;
        summary.rejected = upload.failed;

        info!(
            indexed = summary.indexed,
            skipped = summary.skipped_chunks.len(),
            rejected = summary.rejected.len(),
            "ingestion finished"
        );
        Ok(summary)
    }

    /// Copies every `.pdf` object into the staging directory.
    pub async fn download(&self, cancel: &CancellationToken) -> Result<usize, PipelineError> {
        let objects = self
            .objects
            .as_ref()
            .ok_or(ConfigError::Missing("bucket_name"))?;

        tokio::fs::create_dir_all(&self.options.staging_dir)
            .await
            .map_err(|source| PipelineError::Io {
                path: self.options.staging_dir.display().to_string(),
                source,
            })?;

        let listed = objects.list_objects(Some(".pdf")).await?;
        info!(container = objects.container(), objects = listed.len(), "downloading documents");

        let mut downloaded = 0;
        for object in listed {
            check(cancel, "download")?;

            let Some(target) = staging_path(&self.options.staging_dir, &object.name) else {
                warn!(object = %object.name, "skipping object with unsafe name");
                continue;
            };

            let bytes = objects.fetch(&object.name).await?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| PipelineError::Io {
                        path: parent.display().to_string(),
                        source,
                    })?;
            }
            tokio::fs::write(&target, &bytes)
                .await
                .map_err(|source| PipelineError::Io {
                    path: target.display().to_string(),
                    source,
                })?;

            debug!(object = %object.name, bytes = bytes.len(), "downloaded");
            downloaded += 1;
        }

        Ok(downloaded)
    }

    pub fn load(&self) -> Result<(Vec<Document>, Vec<SkippedPdf>), PipelineError> {
        let loader =
            PdfDirectoryLoader::with_extractor(&self.options.staging_dir, self.extractor.clone())
                .recursive(self.options.recursive);
        Ok(loader.load()?)
    }

    /// Embeds chunks one at a time. A failed chunk is recorded and skipped; the
    /// first successful embedding fixes the vector length for the run.
    pub async fn embed_chunks(
        &self,
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> Result<(Vec<EmbeddedChunk>, Vec<SkippedChunk>), PipelineError> {
        let mut expected = self
            .options
            .embedding_dimensions
            .or_else(|| self.embedder.dimensions());
        let mut embedded = Vec::with_capacity(chunks.len());
        let mut skipped = Vec::new();

        for (ordinal, chunk) in chunks.iter().enumerate() {
            check(cancel, "embedding")?;

            let outcome = match self.embedder.embed(&chunk.content).await {
                Ok(embedding) => match expected {
                    Some(dimensions) if dimensions != embedding.len() => Err(format!(
                        "embedding has {} dimensions, expected {dimensions}",
                        embedding.len()
                    )),
                    _ => {
                        expected = Some(embedding.len());
                        Ok(embedding)
                    }
                },
                Err(error) => Err(error.to_string()),
            };

            match outcome {
                Ok(embedding) => embedded.push(EmbeddedChunk { ordinal, embedding }),
                Err(reason) => {
                    warn!(
                        chunk = ordinal,
                        source = %chunk.metadata.source,
                        page = chunk.metadata.page,
                        reason = %reason,
                        "skipping chunk"
                    );
                    skipped.push(SkippedChunk {
                        ordinal,
                        source: chunk.metadata.source.clone(),
                        page: chunk.metadata.page,
                        reason,
                    });
                }
            }

            if (ordinal + 1) % 100 == 0 {
                info!(done = ordinal + 1, total = chunks.len(), "embedding progress");
            }
        }

        Ok((embedded, skipped))
    }

    pub async fn index_records(
        &self,
        records: &[IndexRecord],
        dimensions: usize,
        cancel: &CancellationToken,
    ) -> Result<(IndexStatus, UploadResult), PipelineError> {
        let schema = IndexSchema::for_records(&self.options.index_name, dimensions);
        let status = self.index.ensure_index(&schema).await?;
        info!(index = %schema.name, backend = self.index.backend(), %status, "index ready");

        let batches = upload_batches(
            records,
            self.options.upload_batch_size,
            self.options.upload_batch_bytes,
        );
        let mut total = UploadResult::default();
        for batch in &batches {
            check(cancel, "upload")?;
            let result = self.index.upsert(&schema.name, batch).await?;
            for failed in &result.failed {
                warn!(id = %failed.id, status = ?failed.status_code, reason = %failed.message, "record rejected");
            }
            total.merge(result);
        }

        if total.is_partial() {
            warn!(
                batches = batches.len(),
                indexed = total.succeeded,
                rejected = total.failed.len(),
                "upload finished with rejected records"
            );
        }
        Ok((status, total))
    }

    async fn write_skipped_report(&self, skipped: &[SkippedChunk]) -> Result<(), PipelineError> {
        let Some(path) = &self.options.skipped_report else {
            return Ok(());
        };

        let report = serde_json::to_vec_pretty(skipped).map_err(|error| PipelineError::Io {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, error),
        })?;
        tokio::fs::write(path, report)
            .await
            .map_err(|source| PipelineError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

fn check(cancel: &CancellationToken, stage: &'static str) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled(stage));
    }
    Ok(())
}

/// Local path for an object name; `None` when the name would escape `root`.
// Document wrapper and action field added by the backends.
const RECORD_ENVELOPE_BYTES: usize = 64;

/// Cuts records into consecutive batches holding at most `max_records` records
/// and roughly `max_bytes` of serialized JSON. A record over the byte budget
/// still goes out alone so the index can report it.
pub fn upload_batches(
    records: &[IndexRecord],
    max_records: usize,
    max_bytes: usize,
) -> Vec<&[IndexRecord]> {
    let max_records = max_records.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut bytes = 0;

    for (position, record) in records.iter().enumerate() {
        let size = serde_json::to_vec(record)
            .map(|encoded| encoded.len())
            .unwrap_or(0)
            + RECORD_ENVELOPE_BYTES;
        let count = position - start;
        if count > 0 && (count == max_records || bytes + size > max_bytes) {
            batches.push(&records[start..position]);
            start = position;
            bytes = 0;
        }
        bytes += size;
    }

    if start < records.len() {
        batches.push(&records[start..]);
    }
    batches
}

pub fn staging_path(root: &Path, name: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut pushed = false;
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    pushed.then_some(path)
}

pub fn record_id(strategy: IdStrategy, ordinal: usize, chunk: &Chunk) -> String {
    match strategy {
        IdStrategy::Ordinal => ordinal.to_string(),
        IdStrategy::ContentHash => {
            let mut hasher = Sha256::new();
            hasher.update(chunk.metadata.source.as_bytes());
            hasher.update(chunk.metadata.page.to_le_bytes());
            hasher.update((chunk.offset as u64).to_le_bytes());
            hasher.update(chunk.content.as_bytes());
            format!("{:x}", hasher.finalize())
        }
    }
}

pub fn build_records(
    chunks: &[Chunk],
    embedded: Vec<EmbeddedChunk>,
    strategy: IdStrategy,
) -> Vec<IndexRecord> {
    embedded
        .into_iter()
        .filter_map(|item| {
            let chunk = chunks.get(item.ordinal)?;
            Some(IndexRecord {
                id: record_id(strategy, item.ordinal, chunk),
                name: chunk.metadata.source.clone(),
                description: chunk.content.clone(),
                embedding: item.embedding,
            })
        })
        .collect()
}
