//! Text extraction from uploaded documents.

use pdfium_render::prelude::*;
use tracing::{debug, warn};

use crate::error::ProcessingError;

/// Extract plain text from raw document bytes.
///
/// Implementations are synchronous; the pipeline runs them on a blocking
/// thread when needed.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], extension: &str) -> Result<String, ProcessingError>;
}

/// Default extractor: PDFs via PDFium, plain text and markdown as UTF-8
pub struct DocumentExtractor;

impl DocumentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract text from PDF bytes using PDFium
    fn extract_pdf(&self, bytes: &[u8]) -> Result<String, ProcessingError> {
        let pdfium = create_pdfium()?;

        let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
            ProcessingError::TextExtraction {
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Failed to load PDF: {:?}", e),
                )),
            }
        })?;

        let page_count = document.pages().len();
        let mut pages = Vec::new();

        for (page_index, page) in document.pages().iter().enumerate() {
            let page_num = page_index + 1;

            let text = page.text().map_err(|e| {
                warn!(page = page_num, error = ?e, "Failed to get text object for page");
                ProcessingError::TextExtraction {
                    source: Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Failed to extract text from page {}: {:?}", page_num, e),
                    )),
                }
            })?;

            let page_text = text.all();
            let page_text = page_text.trim();

            if !page_text.is_empty() {
                pages.push(page_text.to_string());
            }
        }

        debug!(pages = page_count, non_empty = pages.len(), "PDF text extracted");

        Ok(pages.join("\n\n"))
    }

    /// Decode plain text or markdown bytes as UTF-8
    fn extract_utf8(&self, bytes: &[u8]) -> Result<String, ProcessingError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| ProcessingError::TextExtraction {
            source: Box::new(e),
        })
    }
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for DocumentExtractor {
    fn extract(&self, bytes: &[u8], extension: &str) -> Result<String, ProcessingError> {
        let raw = match extension.to_lowercase().as_str() {
            "pdf" => self.extract_pdf(bytes)?,
            "txt" | "text" | "md" | "markdown" => self.extract_utf8(bytes)?,
            other => {
                return Err(ProcessingError::UnsupportedFormat {
                    format: other.to_string(),
                });
            }
        };

        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(ProcessingError::EmptyDocument);
        }

        Ok(text)
    }
}

/// Create a new Pdfium instance (dynamically linked)
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    // Try local paths first, then system
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::TextExtraction {
            source: Box::new(std::io::Error::other(format!(
                "Failed to load PDFium library. Install libpdfium or place it in vendor/pdfium/lib/: {:?}",
                e
            ))),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Normalize extracted text into a stable form for chunking.
///
/// Line endings become LF, trailing whitespace is stripped per line, and
/// runs of blank lines collapse to a single paragraph break. The same input
/// always yields the same output, so re-extraction is deterministic.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::new();
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            if blank_run > 0 {
                out.push_str("\n\n");
            } else {
                out.push('\n');
            }
        }
        out.push_str(line);
        blank_run = 0;
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_crlf() {
        assert_eq!(normalize_text("one\r\ntwo\r\n"), "one\ntwo");
    }

    #[test]
    fn test_normalize_collapses_blank_runs() {
        assert_eq!(
            normalize_text("para one\n\n\n\npara two"),
            "para one\n\npara two"
        );
    }

    #[test]
    fn test_normalize_strips_trailing_whitespace() {
        assert_eq!(normalize_text("line   \nnext\t\n"), "line\nnext");
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let input = "a  \r\n\r\n\r\nb\rc";
        assert_eq!(normalize_text(input), normalize_text(input));
        assert_eq!(normalize_text(input), "a\n\nb\nc");
    }

    #[test]
    fn test_extract_utf8_text() {
        let extractor = DocumentExtractor::new();
        let text = extractor.extract(b"hello world\n", "txt").unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn test_extract_markdown() {
        let extractor = DocumentExtractor::new();
        let text = extractor.extract(b"# Title\n\nBody text.", "md").unwrap();
        assert_eq!(text, "# Title\n\nBody text.");
    }

    #[test]
    fn test_extract_unsupported_format() {
        let extractor = DocumentExtractor::new();
        let result = extractor.extract(b"binary", "docx");
        assert!(matches!(
            result,
            Err(ProcessingError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_extract_empty_document() {
        let extractor = DocumentExtractor::new();
        let result = extractor.extract(b"   \n\n   ", "txt");
        assert!(matches!(result, Err(ProcessingError::EmptyDocument)));
    }

    #[test]
    fn test_extract_invalid_utf8() {
        let extractor = DocumentExtractor::new();
        let result = extractor.extract(&[0xff, 0xfe, 0x00], "txt");
        assert!(matches!(
            result,
            Err(ProcessingError::TextExtraction { .. })
        ));
    }
}
