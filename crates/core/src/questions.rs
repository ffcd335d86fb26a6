use crate::error::IngestError;
use crate::extractor::{LopdfExtractor, OcrEngine};
use regex::Regex;
use std::path::Path;
use tracing::{info, warn};

/// Finds the questions to answer inside a document's text.
pub trait QuestionExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<String>;
}

/// Every shortest run of text that starts right after a newline and ends
/// with `?`. Runs may span lines, so a question mark in a later paragraph
/// can swallow the text before it.
#[derive(Debug, Clone)]
pub struct TrailingQuestionMark {
    pattern: Regex,
}

impl TrailingQuestionMark {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            pattern: Regex::new(r"(?s)\n(.*?\?)")?,
        })
    }
}

impl QuestionExtractor for TrailingQuestionMark {
    fn extract(&self, text: &str) -> Vec<String> {
        self.pattern
            .captures_iter(text)
            .filter_map(|capture| capture.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }
}

/// OCRs `pdf` into `workdir`, reads its page text and extracts questions.
///
/// When OCR is unavailable the original file is read directly.
pub fn extract_questions_from_pdf(
    pdf: &Path,
    workdir: &Path,
    ocr: &dyn OcrEngine,
    questions: &dyn QuestionExtractor,
) -> Result<Vec<String>, IngestError> {
    let ocr_output = workdir.join("ocr_questions.pdf");
    let readable = match ocr.ocr(pdf, &ocr_output, true) {
        Ok(()) => ocr_output,
        Err(error) => {
            warn!(pdf = %pdf.display(), %error, "ocr failed, reading original text layer");
            pdf.to_path_buf()
        }
    };

    let pages = LopdfExtractor.extract_pages(&readable)?;
    if pages.is_empty() {
        warn!(pdf = %pdf.display(), "no text extracted from any page");
        return Ok(Vec::new());
    }
    info!(pages = pages.len(), "question pages processed");

    let text = pages
        .into_iter()
        .map(|page| page.text)
        .collect::<Vec<_>>()
        .join("\n");
    let found = questions.extract(&text);
    info!(questions = found.len(), "questions extracted");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::tests::write_text_pdf;
    use tempfile::tempdir;

    struct NoOcr;

    impl OcrEngine for NoOcr {
        fn ocr(&self, _input: &Path, _output: &Path, _force: bool) -> Result<(), IngestError> {
            Err(IngestError::OcrFailed("ocrmypdf not installed".to_string()))
        }
    }

    fn extract(text: &str) -> Vec<String> {
        TrailingQuestionMark::new().unwrap().extract(text)
    }

    #[test]
    fn question_after_newline_is_found() {
        assert_eq!(
            extract("...context\nIs this a question?\nMore text"),
            vec!["Is this a question?"]
        );
    }

    #[test]
    fn text_before_first_newline_is_ignored() {
        assert!(extract("Is the first line skipped?").is_empty());
    }

    #[test]
    fn runs_span_lines_until_the_question_mark() {
        assert_eq!(
            extract("Intro\n1. Define entropy.\nWhy does it increase?\n2. What is heat?"),
            vec!["1. Define entropy.\nWhy does it increase?", "2. What is heat?"]
        );
    }

    #[test]
    fn text_without_question_marks_yields_nothing() {
        assert!(extract("Header\nA statement.\nAnother one.").is_empty());
    }

    #[test]
    fn pdf_questions_fall_back_to_original_text_layer() {
        let dir = tempdir().unwrap();
        let pdf = dir.path().join("exam.pdf");
        write_text_pdf(&pdf, &["Unit 1 questions", "What is osmosis?"]);

        let questions = extract_questions_from_pdf(
            &pdf,
            dir.path(),
            &NoOcr,
            &TrailingQuestionMark::new().unwrap(),
        )
        .unwrap();

        assert_eq!(questions.len(), 1);
        assert!(questions[0].contains("What is osmosis?"));
    }
}
