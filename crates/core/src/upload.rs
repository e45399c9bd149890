use crate::error::{IngestError, PipelineError};
use crate::loader::discover_pdf_files;
use crate::object_store::ObjectStore;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Random container name, valid under Azure's lowercase/hyphen naming rules.
pub fn generate_container_name() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub container: String,
    pub created: bool,
    pub uploaded: Vec<String>,
}

/// Blob name for a local file: its path under `root`, `/`-separated.
pub fn blob_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Ensures the container exists and copies every local PDF into it.
pub async fn upload_pdfs<O>(
    store: &O,
    root: &Path,
    recursive: bool,
    cancel: &CancellationToken,
) -> Result<UploadSummary, PipelineError>
where
    O: ObjectStore + Send + Sync,
{
    if !root.is_dir() {
        return Err(IngestError::MissingDirectory(root.display().to_string()).into());
    }

    let created = store.ensure_container().await?;
    info!(container = store.container(), created, "container ready");

    let mut uploaded = Vec::new();
    for path in discover_pdf_files(root, recursive) {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled("upload"));
        }

        let name = blob_name(root, &path);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| PipelineError::Io {
                path: path.display().to_string(),
                source,
            })?;
        debug!(blob = %name, bytes = bytes.len(), "uploading");
        store.put(&name, bytes).await?;
        uploaded.push(name);
    }

    info!(container = store.container(), files = uploaded.len(), "upload finished");
    Ok(UploadSummary {
        container: store.container().to_string(),
        created,
        uploaded,
    })
}
