use crate::error::IngestError;
use crate::models::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, IngestError> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Sliding character windows over `text` as `(offset, window)` pairs.
///
/// Every window except the last is exactly `chunk_size` chars long; the last
/// one ends at the end of `text` and is always longer than `overlap`.
pub fn window_text(text: &str, config: ChunkingConfig) -> Vec<(usize, String)> {
    let chars: Vec<char> = text.chars().collect();
    let mut windows = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        windows.push((start, chars[start..end].iter().collect()));
        if end == chars.len() {
            break;
        }
        start += config.stride();
    }

    windows
}

/// Splits every document into overlapping windows, keeping document order and
/// left-to-right window order. Fails before producing anything when the
/// configuration is invalid.
pub fn split(
    documents: &[Document],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, IngestError> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(split_with(documents, config))
}

pub fn split_with(documents: &[Document], config: ChunkingConfig) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|document| {
            window_text(&document.content, config)
                .into_iter()
                .map(|(offset, content)| Chunk {
                    content,
                    metadata: document.metadata.clone(),
                    offset,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
        let mut text = String::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if index == 0 {
                text.push_str(&chunk.content);
            } else {
                text.extend(chunk.content.chars().skip(overlap));
            }
        }
        text
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn quick_brown_fox_windows() {
        let documents = vec![Document::new("The quick brown fox jumps.", "fox.pdf", 0)];
        let chunks = split(&documents, 10, 3).unwrap();

        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.content.as_str()).collect();
        assert_eq!(texts, vec!["The quick ", "ck brown f", "n fox jump", "umps."]);
        assert_eq!(
            chunks.iter().map(|chunk| chunk.offset).collect::<Vec<_>>(),
            vec![0, 7, 14, 21]
        );
        assert_eq!(reassemble(&chunks, 3), "The quick brown fox jumps.");
    }

    #[test]
    fn overlap_is_stripped_to_reconstruct_each_document() {
        let text = "Hydraulic pumps transfer mechanical energy into fluid pressure. \
                    Relief valves cap the maximum pressure of the circuit.";
        let document = Document::new(text, "manual.pdf", 3);

        for (size, overlap) in [(1, 0), (7, 0), (10, 9), (16, 5), (200, 20)] {
            let chunks = split(std::slice::from_ref(&document), size, overlap).unwrap();
            assert_eq!(reassemble(&chunks, overlap), text, "size={size} overlap={overlap}");
            assert!(chunks
                .iter()
                .all(|chunk| chunk.content.chars().count() <= size));
        }
    }

    #[test]
    fn multibyte_text_is_windowed_by_chars() {
        let document = Document::new("ÄÖÜ straße über", "umlaut.pdf", 0);
        let chunks = split(std::slice::from_ref(&document), 4, 1).unwrap();
        assert_eq!(chunks[0].content, "ÄÖÜ ");
        assert_eq!(reassemble(&chunks, 1), "ÄÖÜ straße über");
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let documents = vec![Document::new("some text", "a.pdf", 0)];
        assert!(matches!(
            split(&documents, 10, 10),
            Err(IngestError::InvalidChunkConfig(_))
        ));
        assert!(matches!(
            split(&documents, 10, 11),
            Err(IngestError::InvalidChunkConfig(_))
        ));
        assert!(matches!(
            split(&documents, 0, 0),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn chunks_keep_document_order_and_metadata() {
        let documents = vec![
            Document::new("first page text", "a.pdf", 0),
            Document::new("second page", "a.pdf", 1),
            Document::new("other file", "b.pdf", 0),
        ];
        let chunks = split(&documents, 6, 2).unwrap();

        let pages: Vec<(&str, u32)> = chunks
            .iter()
            .map(|chunk| (chunk.metadata.source.as_str(), chunk.metadata.page))
            .collect();
        let mut sorted = pages.clone();
        sorted.sort();
        assert_eq!(pages, sorted);
        assert_eq!(chunks.last().map(|chunk| chunk.metadata.source.as_str()), Some("b.pdf"));
    }

    #[test]
    fn splitting_is_deterministic() {
        let documents = vec![
            Document::new("Clause 4.2 covers pressure tests.", "a.pdf", 0),
            Document::new("", "a.pdf", 1),
        ];
        let first = split(&documents, 8, 3).unwrap();
        let second = split(&documents, 8, 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let documents = vec![Document::new("", "empty.pdf", 0)];
        assert!(split(&documents, 10, 2).unwrap().is_empty());
    }
}
