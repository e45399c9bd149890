use serde::{Deserialize, Serialize};
use std::fmt;

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source: String,
    pub page: u32,
}

/// One page of extracted PDF text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>, page: u32) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata {
                source: source.into(),
                page,
            },
        }
    }
}

/// A window of a [`Document`]'s content. `offset` is the window start in chars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: DocumentMetadata,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Key,
    Searchable,
    Vector { dimensions: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,
    pub kind: FieldKind,
}

impl IndexField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub fields: Vec<IndexField>,
}

impl IndexSchema {
    /// Schema holding [`IndexRecord`]s: `id` key, searchable `name` and
    /// `description`, and an `embedding` vector of the given size.
    pub fn for_records(name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            fields: vec![
                IndexField::new("id", FieldKind::Key),
                IndexField::new("name", FieldKind::Searchable),
                IndexField::new("description", FieldKind::Searchable),
                IndexField::new("embedding", FieldKind::Vector { dimensions }),
            ],
        }
    }

    pub fn vector_dimensions(&self) -> Option<usize> {
        self.fields.iter().find_map(|field| match field.kind {
            FieldKind::Vector { dimensions } => Some(dimensions),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStatus {
    Created,
    AlreadyPresent,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::Created => f.write_str("created"),
            IndexStatus::AlreadyPresent => f.write_str("already present"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub id: String,
    pub status_code: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub succeeded: usize,
    pub failed: Vec<FailedRecord>,
}

impl UploadResult {
    pub fn merge(&mut self, other: UploadResult) {
        self.succeeded += other.succeeded;
        self.failed.extend(other.failed);
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Every record of a batch the index refused as a whole.
    pub fn rejected_batch(records: &[IndexRecord], status_code: u16, message: &str) -> Self {
        Self {
            succeeded: 0,
            failed: records
                .iter()
                .map(|record| FailedRecord {
                    id: record.id.clone(),
                    status_code: Some(status_code),
                    message: message.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdStrategy {
    #[default]
    Ordinal,
    ContentHash,
}

impl std::str::FromStr for IdStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ordinal" => Ok(Self::Ordinal),
            "content-hash" => Ok(Self::ContentHash),
            other => Err(format!("unknown id strategy `{other}` (ordinal, content-hash)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedChunk {
    pub ordinal: usize,
    pub source: String,
    pub page: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub downloaded: usize,
    pub documents: usize,
    pub skipped_files: Vec<String>,
    pub chunks: usize,
    pub embedded: usize,
    pub skipped_chunks: Vec<SkippedChunk>,
    pub indexed: usize,
    pub rejected: Vec<FailedRecord>,
    pub index_status: Option<IndexStatus>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let skipped = self.skipped_chunks.len();
        let rejected = self.rejected.len();
        write!(
            f,
            "indexed {} of {} chunks; {} {} skipped; {} {} rejected",
            self.indexed,
            self.chunks,
            skipped,
            if skipped == 1 { "chunk" } else { "chunks" },
            rejected,
            if rejected == 1 { "record" } else { "records" },
        )
    }
}
