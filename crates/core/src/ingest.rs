use crate::chunking::Chunker;
use crate::extractor::{non_whitespace_chars, TextExtractor};
use crate::identifiers::assign_chunk_ids;
use crate::normalizer::normalize;
use crate::{Chunk, IngestError, ProcessedDocument};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub fn discover_files(folder: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    discover_files(folder, "pdf")
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Turns PDFs into `<name>.txt` files under `output_dir`.
pub struct DocumentProcessor {
    extractor: TextExtractor,
    output_dir: PathBuf,
}

impl DocumentProcessor {
    pub fn new(extractor: TextExtractor, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            output_dir: output_dir.into(),
        }
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Normalizes, extracts and saves one PDF. The cleaned copy and any OCR
    /// output live in a temp dir removed when this returns.
    pub fn process_pdf(&self, input: &Path) -> Result<ProcessedDocument, IngestError> {
        let name = input
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(input.display().to_string()))?
            .to_string();
        let checksum = digest_file(input)?;

        let workdir = tempfile::tempdir()?;
        let cleaned = normalize(input, workdir.path());
        let extraction = self.extractor.extract(&cleaned, workdir.path());

        if non_whitespace_chars(&extraction.text) == 0 {
            return Err(IngestError::NoText(name));
        }

        fs::create_dir_all(&self.output_dir)?;
        let text_path = self.output_dir.join(format!("{name}.txt"));
        fs::write(&text_path, &extraction.text)?;
        info!(path = %text_path.display(), "cleaned text saved");

        Ok(ProcessedDocument {
            source_name: name,
            text_path,
            checksum,
            char_count: extraction.text.chars().count(),
            ocr_applied: extraction.ocr_applied,
            processed_at: Utc::now(),
        })
    }

    pub fn process_folder(&self, folder: &Path) -> Result<ProcessingReport, IngestError> {
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut report = ProcessingReport::default();
        for path in files {
            match self.process_pdf(&path) {
                Ok(document) => report.processed.push(document),
                Err(error) => report.skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                }),
            }
        }

        Ok(report)
    }
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Default)]
pub struct ProcessingReport {
    pub processed: Vec<ProcessedDocument>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Reads one processed text file and returns its chunks with ids.
///
/// The path as given becomes the chunk source, so the same file reached
/// through the same path always produces the same ids.
pub fn chunk_text_file(path: &Path, chunker: &Chunker) -> Result<Vec<Chunk>, IngestError> {
    let text = fs::read_to_string(path)?;
    let source = path.to_string_lossy();
    Ok(assign_chunk_ids(chunker.split(&text, &source, 0)))
}

/// Chunks every `.txt` file in `data_dir` in path order.
pub fn chunk_text_corpus(data_dir: &Path, chunker: &Chunker) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();
    for path in discover_files(data_dir, "txt") {
        info!(file = %path.display(), "loading text");
        chunks.extend(chunk_text_file(&path, chunker)?);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::tests::{CountingOcr, FakeExtractor};
    use crate::extractor::{LayoutExtractor, LopdfExtractor, OcrMyPdf};
    use crate::indexer::tests::RecordingIndex;
    use crate::indexer::IncrementalIndexer;
    use crate::CharacterNgramEmbedder;
    use std::fs::File;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    fn fake_processor(text: &str, output_dir: &Path) -> DocumentProcessor {
        let extractor = TextExtractor::new(
            Box::new(FakeExtractor {
                text: text.to_string(),
                ocr_text: String::new(),
                seen: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(FakeExtractor {
                text: String::new(),
                ocr_text: String::new(),
                seen: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(Arc::new(CountingOcr::default())),
            1_000,
        );
        DocumentProcessor::new(extractor, output_dir)
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn processed_text_is_saved_by_pdf_name() -> Result<(), Box<dyn std::error::Error>> {
        let input_dir = tempdir()?;
        let output_dir = tempdir()?;
        let input = input_dir.path().join("chemistry.pdf");
        fs::write(&input, b"%PDF-1.4\n%opaque")?;

        let processed = fake_processor(&"z".repeat(1_200), output_dir.path()).process_pdf(&input)?;

        assert_eq!(processed.source_name, "chemistry.pdf");
        assert_eq!(processed.text_path, output_dir.path().join("chemistry.pdf.txt"));
        assert!(!processed.ocr_applied);
        let saved = fs::read_to_string(&processed.text_path)?;
        assert!(saved.starts_with(&"z".repeat(1_200)));
        Ok(())
    }

    #[test]
    fn document_without_any_text_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let input_dir = tempdir()?;
        let output_dir = tempdir()?;
        let input = input_dir.path().join("blank.pdf");
        fs::write(&input, b"%PDF-1.4\n%opaque")?;

        let result = fake_processor("   ", output_dir.path()).process_pdf(&input);

        assert!(matches!(result, Err(IngestError::NoText(name)) if name == "blank.pdf"));
        assert!(!output_dir.path().join("blank.pdf.txt").exists());
        Ok(())
    }

    #[test]
    fn folder_processing_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let processor = fake_processor("text", dir.path());
        assert!(processor.process_folder(dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn unreadable_pdf_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let output = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        let extractor = TextExtractor::new(
            Box::new(LopdfExtractor),
            Box::new(LayoutExtractor),
            Box::new(OcrMyPdf {
                program: "missing-ocr-binary".to_string(),
            }),
            1_000,
        );

        let report = DocumentProcessor::new(extractor, output.path()).process_folder(dir.path())?;

        assert_eq!(report.processed.len(), 0);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        Ok(())
    }

    #[tokio::test]
    async fn reingesting_unchanged_corpus_adds_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let data = tempdir()?;
        let paragraph = "Energy is conserved in closed systems. ".repeat(60);
        fs::write(data.path().join("physics.pdf.txt"), &paragraph)?;
        fs::write(data.path().join("biology.pdf.txt"), "Cells are the unit of life.")?;

        let index = Arc::new(RecordingIndex::default());
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let indexer = IncrementalIndexer::new(index.clone(), embedder, 100);
        let chunker = Chunker::default();

        let first = indexer.upsert(&chunk_text_corpus(data.path(), &chunker)?).await?;
        let second = indexer.upsert(&chunk_text_corpus(data.path(), &chunker)?).await?;

        assert!(first.added > 2);
        assert_eq!(second.added, 0);
        assert_eq!(second.existing, first.added);
        Ok(())
    }
}
