use crate::error::IngestError;
use crate::models::IngestionOptions;
use lopdf::Document;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract_text(&self, path: &Path) -> Result<String, IngestError>;
}

/// Turns an image-only PDF into one with a text layer.
pub trait OcrEngine: Send + Sync {
    fn ocr(&self, input: &Path, output: &Path, force: bool) -> Result<(), IngestError>;
}

/// Structural extractor reading each page's content stream through lopdf.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            match document.extract_text(&[page_no]) {
                Ok(text) if !text.trim().is_empty() => pages.push(PageText {
                    number: page_no,
                    text,
                }),
                Ok(_) => debug!(path = %path.display(), page = page_no, "no text on page"),
                Err(error) => {
                    debug!(path = %path.display(), page = page_no, %error, "page text unreadable")
                }
            }
        }

        Ok(pages)
    }
}

impl PdfExtractor for LopdfExtractor {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let pages = self.extract_pages(path)?;
        Ok(pages
            .into_iter()
            .map(|page| page.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Layout-based extractor backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LayoutExtractor;

impl PdfExtractor for LayoutExtractor {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        // pdf-extract panics on some malformed fonts instead of returning an error.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(path)));
        match outcome {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(error)) => Err(IngestError::PdfParse(error.to_string())),
            Err(_) => Err(IngestError::PdfParse(format!(
                "pdf-extract panicked on {}",
                path.display()
            ))),
        }
    }
}

/// Runs the `ocrmypdf` command line tool.
#[derive(Debug, Clone)]
pub struct OcrMyPdf {
    pub program: String,
}

impl Default for OcrMyPdf {
    fn default() -> Self {
        Self {
            program: "ocrmypdf".to_string(),
        }
    }
}

impl OcrEngine for OcrMyPdf {
    fn ocr(&self, input: &Path, output: &Path, force: bool) -> Result<(), IngestError> {
        let mut command = Command::new(&self.program);
        command.arg(input).arg(output);
        if force {
            command.arg("--force-ocr");
        }
        command.args(["--output-type", "pdf"]);

        let result = command
            .output()
            .map_err(|error| {
                IngestError::OcrFailed(format!("{} not runnable: {error}", self.program))
            })?;

        if !result.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        info!(input = %input.display(), "ocr applied");
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub ocr_applied: bool,
}

/// Combines the structural extractor, the OCR fallback and the layout
/// extractor. Individual strategy failures only ever shrink the output.
pub struct TextExtractor {
    primary: Box<dyn PdfExtractor>,
    secondary: Box<dyn PdfExtractor>,
    ocr: Box<dyn OcrEngine>,
    ocr_threshold: usize,
}

impl TextExtractor {
    pub fn new(
        primary: Box<dyn PdfExtractor>,
        secondary: Box<dyn PdfExtractor>,
        ocr: Box<dyn OcrEngine>,
        ocr_threshold: usize,
    ) -> Self {
        Self {
            primary,
            secondary,
            ocr,
            ocr_threshold,
        }
    }

    pub fn with_options(options: &IngestionOptions) -> Self {
        Self::new(
            Box::new(LopdfExtractor),
            Box::new(LayoutExtractor),
            Box::new(OcrMyPdf::default()),
            options.ocr_threshold,
        )
    }

    pub fn ocr_engine(&self) -> &dyn OcrEngine {
        self.ocr.as_ref()
    }

    /// Extracts everything recoverable from `cleaned`; `workdir` receives the
    /// OCR output when the fallback runs.
    pub fn extract(&self, cleaned: &Path, workdir: &Path) -> Extraction {
        let mut text = run_strategy(self.primary.as_ref(), cleaned);
        let mut ocr_applied = false;

        let content_chars = non_whitespace_chars(&text);
        if content_chars < self.ocr_threshold {
            info!(
                path = %cleaned.display(),
                content_chars,
                threshold = self.ocr_threshold,
                "low text content, applying ocr"
            );
            let name = cleaned
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("document.pdf");
            let ocr_output = workdir.join(format!("ocr_{name}"));
            match self.ocr.ocr(cleaned, &ocr_output, true) {
                Ok(()) => {
                    ocr_applied = true;
                    text = run_strategy(self.primary.as_ref(), &ocr_output);
                }
                Err(error) => {
                    warn!(path = %cleaned.display(), %error, "ocr failed");
                    text = String::new();
                }
            }
        }

        let secondary = run_strategy(self.secondary.as_ref(), cleaned);
        text.push('\n');
        text.push_str(&secondary);

        Extraction { text, ocr_applied }
    }
}

fn run_strategy(extractor: &dyn PdfExtractor, path: &Path) -> String {
    match extractor.extract_text(path) {
        Ok(text) => {
            info!(
                extractor = extractor.name(),
                path = %path.display(),
                chars = text.len(),
                "text extracted"
            );
            text
        }
        Err(error) => {
            warn!(
                extractor = extractor.name(),
                path = %path.display(),
                %error,
                "extraction failed"
            );
            String::new()
        }
    }
}

pub fn non_whitespace_chars(text: &str) -> usize {
    text.chars().filter(|ch| !ch.is_whitespace()).count()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::normalizer::tests::write_text_pdf;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Returns `ocr_text` for paths starting with `ocr_`, `text` otherwise.
    pub(crate) struct FakeExtractor {
        pub text: String,
        pub ocr_text: String,
        pub seen: Arc<Mutex<Vec<String>>>,
    }

    impl PdfExtractor for FakeExtractor {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            self.seen.lock().unwrap().push(name.clone());
            if name.starts_with("ocr_") {
                Ok(self.ocr_text.clone())
            } else {
                Ok(self.text.clone())
            }
        }
    }

    struct FailingExtractor;

    impl PdfExtractor for FailingExtractor {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn extract_text(&self, _path: &Path) -> Result<String, IngestError> {
            Err(IngestError::PdfParse("unreadable".to_string()))
        }
    }

    #[derive(Default)]
    pub(crate) struct CountingOcr {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl OcrEngine for Arc<CountingOcr> {
        fn ocr(&self, _input: &Path, _output: &Path, force: bool) -> Result<(), IngestError> {
            assert!(force);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(IngestError::OcrFailed("tesseract missing".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn fake(text: &str, ocr_text: &str) -> (FakeExtractor, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            FakeExtractor {
                text: text.to_string(),
                ocr_text: ocr_text.to_string(),
                seen: seen.clone(),
            },
            seen,
        )
    }

    fn secondary(text: &str) -> FakeExtractor {
        fake(text, text).0
    }

    #[test]
    fn short_text_triggers_ocr_and_replaces_primary_output() {
        let workdir = tempdir().unwrap();
        let (primary, seen) = fake("x ".repeat(999).as_str(), "recovered");
        let ocr = Arc::new(CountingOcr::default());
        let extractor = TextExtractor::new(
            Box::new(primary),
            Box::new(secondary("layout")),
            Box::new(ocr.clone()),
            1_000,
        );

        let result = extractor.extract(Path::new("cleaned_book.pdf"), workdir.path());

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert!(result.ocr_applied);
        assert_eq!(result.text, "recovered\nlayout");
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["cleaned_book.pdf".to_string(), "ocr_cleaned_book.pdf".to_string()]
        );
    }

    #[test]
    fn sufficient_text_skips_ocr() {
        let workdir = tempdir().unwrap();
        let body = "y".repeat(1_000);
        let (primary, _) = fake(&body, "unused");
        let ocr = Arc::new(CountingOcr::default());
        let extractor = TextExtractor::new(
            Box::new(primary),
            Box::new(secondary("layout")),
            Box::new(ocr.clone()),
            1_000,
        );

        let result = extractor.extract(Path::new("cleaned_book.pdf"), workdir.path());

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
        assert!(!result.ocr_applied);
        assert_eq!(result.text, format!("{body}\nlayout"));
    }

    #[test]
    fn whitespace_does_not_count_towards_threshold() {
        assert_eq!(non_whitespace_chars(" a\tb\nc  "), 3);
    }

    #[test]
    fn failing_strategies_degrade_to_empty_text() {
        let workdir = tempdir().unwrap();
        let ocr = Arc::new(CountingOcr {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let extractor = TextExtractor::new(
            Box::new(FailingExtractor),
            Box::new(secondary("layout only")),
            Box::new(ocr.clone()),
            1_000,
        );

        let result = extractor.extract(Path::new("cleaned_scan.pdf"), workdir.path());

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert!(!result.ocr_applied);
        assert_eq!(result.text, "\nlayout only");
    }

    #[test]
    fn lopdf_extractor_reads_every_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("two.pdf");
        write_text_pdf(&path, &["Hello World", "Second page"]);

        let pages = LopdfExtractor.extract_pages(&path).unwrap();

        assert_eq!(pages.len(), 2);
        assert!(pages[0].text.contains("Hello World"));
        assert!(pages[1].text.contains("Second page"));
    }

    #[test]
    fn lopdf_extractor_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.pdf");
        fs::write(&path, b"not a pdf").unwrap();

        assert!(matches!(
            LopdfExtractor.extract_text(&path),
            Err(IngestError::PdfParse(_))
        ));
    }

    #[test]
    fn missing_ocr_binary_is_reported() {
        let engine = OcrMyPdf {
            program: "definitely-not-an-ocr-binary".to_string(),
        };
        let result = engine.ocr(Path::new("a.pdf"), Path::new("b.pdf"), true);
        assert!(matches!(result, Err(IngestError::OcrFailed(_))));
    }
}
