use crate::chunking::normalize_whitespace;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::Document;
use crate::IngestError;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(folder);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort_unstable();
    files
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

/// Loads page-level documents from every PDF under a directory.
pub struct PdfDirectoryLoader<X = LopdfExtractor> {
    root: PathBuf,
    recursive: bool,
    extractor: X,
}

impl PdfDirectoryLoader<LopdfExtractor> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_extractor(root, LopdfExtractor)
    }
}

impl<X: PdfExtractor> PdfDirectoryLoader<X> {
    pub fn with_extractor(root: impl Into<PathBuf>, extractor: X) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            extractor,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Lazily yields documents file by file, pages in order. Only fails up front
    /// when the root directory is missing.
    pub fn documents(&self) -> Result<DocumentIter<'_, X>, IngestError> {
        if !self.root.is_dir() {
            return Err(IngestError::MissingDirectory(
                self.root.display().to_string(),
            ));
        }

        Ok(DocumentIter {
            loader: self,
            files: discover_pdf_files(&self.root, self.recursive).into(),
            pending: VecDeque::new(),
            skipped: Vec::new(),
        })
    }

    /// Eagerly collects every document, returning unreadable files separately.
    pub fn load(&self) -> Result<(Vec<Document>, Vec<SkippedPdf>), IngestError> {
        let mut iter = self.documents()?;
        let documents = iter.by_ref().collect();
        Ok((documents, iter.into_skipped()))
    }

    fn extract(&self, path: &Path) -> Result<Vec<Document>, IngestError> {
        let source = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let pages = self.extractor.extract_pages(path)?;

        Ok(pages
            .into_iter()
            .map(|page| {
                Document::new(normalize_whitespace(&page.text), source.clone(), page.number)
            })
            .collect())
    }
}

pub struct DocumentIter<'a, X> {
    loader: &'a PdfDirectoryLoader<X>,
    files: VecDeque<PathBuf>,
    pending: VecDeque<Document>,
    skipped: Vec<SkippedPdf>,
}

impl<X> DocumentIter<'_, X> {
    pub fn into_skipped(self) -> Vec<SkippedPdf> {
        self.skipped
    }
}

impl<X: PdfExtractor> Iterator for DocumentIter<'_, X> {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(document) = self.pending.pop_front() {
                return Some(document);
            }

            let path = self.files.pop_front()?;
            match self.loader.extract(&path) {
                Ok(documents) => self.pending.extend(documents),
                Err(error) => {
                    tracing::warn!(path = %path.display(), reason = %error, "skipping unreadable pdf");
                    self.skipped.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }
    }
}
