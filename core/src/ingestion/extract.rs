//! Local content extraction per format (§4.3 "Extraction"): text/markdown
//! read as-is, CSV rendered as a markdown table, images and scanned PDFs
//! routed to a vision endpoint, regular PDFs extracted page-by-page.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;

use crate::error::IngestError;

const SCANNED_PDF_TEXT_THRESHOLD: usize = 500;
const SCANNED_PDF_MAX_PAGES: usize = 5;

/// Describes an image (or a scanned PDF page rendered as one) for the
/// knowledge base. Out of scope per spec.md §1 ("the embedding-model
/// provider itself" / vision is likewise an external model); this trait is
/// the contract the pipeline calls through.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn describe_image(&self, data_url: &str, prompt: &str) -> Result<String, String>;
}

/// Always-fails default, used when no vision backend is configured: image
/// and scanned-PDF extraction then correctly falls through to `review/`
/// (§4.3 "On extraction failure: move file to review/ and continue")
/// instead of silently fabricating a description.
pub struct UnavailableVision;

#[async_trait]
impl VisionClient for UnavailableVision {
    async fn describe_image(&self, _data_url: &str, _prompt: &str) -> Result<String, String> {
        Err("no vision backend configured".to_string())
    }
}

const VISION_PROMPT: &str = "Describe this image for a knowledge base entry.";

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn data_url(bytes: &[u8], mime: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

/// Extracts text/markdown with lossy UTF-8 decoding (§4.3 ".txt, .md: UTF-8
/// read, replacement on decode error").
pub fn extract_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parses CSV and renders as a markdown table (§4.3 ".csv").
pub fn extract_csv(bytes: &[u8]) -> Result<String, IngestError> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| IngestError::Extraction(e.to_string()))?
        .clone();

    let mut out = String::new();
    out.push('|');
    for h in headers.iter() {
        out.push_str(h);
        out.push('|');
    }
    out.push('\n');
    out.push('|');
    for _ in headers.iter() {
        out.push_str("---|");
    }
    out.push('\n');

    for record in reader.records() {
        let record = record.map_err(|e| IngestError::Extraction(e.to_string()))?;
        out.push('|');
        for field in record.iter() {
            out.push_str(field);
            out.push('|');
        }
        out.push('\n');
    }
    Ok(out)
}

/// Describes an image via the vision client (§4.3 ".png|.jpg|.jpeg").
pub async fn extract_image(
    path: &Path,
    bytes: &[u8],
    vision: &dyn VisionClient,
) -> Result<String, IngestError> {
    let url = data_url(bytes, mime_for(path));
    vision
        .describe_image(&url, VISION_PROMPT)
        .await
        .map_err(IngestError::Extraction)
}

/// PDF extraction (§4.3 ".pdf"): text per page via `pdf-extract`; if the
/// combined text is under 500 chars but the document plausibly has pages
/// (scanned), fall back to vision-OCR on up to 5 rendered page images.
///
/// `render_pages` is the scanned-page-image-rendering hook (PDF page
/// rasterization is itself out of the core's contract — a real deployment
/// wires a PDF renderer here); when absent, a scanned PDF that
/// `pdf-extract` can't read text from goes to `review/` rather than being
/// silently treated as empty.
pub async fn extract_pdf(
    bytes: &[u8],
    vision: &dyn VisionClient,
    render_pages: Option<&dyn Fn(&[u8], usize) -> Vec<Vec<u8>>>,
) -> Result<String, IngestError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| IngestError::Extraction(e.to_string()))?;

    if text.trim().len() >= SCANNED_PDF_TEXT_THRESHOLD {
        return Ok(text);
    }

    let Some(render_pages) = render_pages else {
        return Err(IngestError::Extraction(
            "scanned pdf with no page renderer configured".to_string(),
        ));
    };

    let page_images = render_pages(bytes, SCANNED_PDF_MAX_PAGES);
    if page_images.is_empty() {
        return Err(IngestError::Extraction(
            "pdf text below threshold and no page images available".to_string(),
        ));
    }

    let mut combined = String::new();
    for (i, page_bytes) in page_images.iter().take(SCANNED_PDF_MAX_PAGES).enumerate() {
        let url = data_url(page_bytes, "image/png");
        match vision.describe_image(&url, VISION_PROMPT).await {
            Ok(description) => {
                combined.push_str(&format!("## Page {}\n\n{}\n\n", i + 1, description));
            }
            Err(e) => {
                tracing::warn!(page = i, error = %e, "vision-ocr failed for scanned pdf page");
            }
        }
    }

    if combined.trim().is_empty() {
        Err(IngestError::Extraction(
            "vision-ocr produced no text for scanned pdf".to_string(),
        ))
    } else {
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_extraction_replaces_invalid_utf8() {
        let bytes = vec![b'h', b'i', 0xff, 0xfe];
        let s = extract_text(&bytes);
        assert!(s.starts_with("hi"));
        assert!(s.contains('\u{FFFD}'));
    }

    #[test]
    fn csv_renders_as_markdown_table() {
        let csv = b"name,age\nalice,30\nbob,40\n";
        let table = extract_csv(csv).unwrap();
        assert!(table.starts_with("|name|age|\n"));
        assert!(table.contains("|alice|30|\n"));
    }

    #[tokio::test]
    async fn image_extraction_uses_vision_client() {
        struct FixedVision;
        #[async_trait::async_trait]
        impl VisionClient for FixedVision {
            async fn describe_image(&self, _url: &str, _prompt: &str) -> Result<String, String> {
                Ok("a photo of a cat".to_string())
            }
        }
        let desc = extract_image(Path::new("cat.png"), b"\x89PNG...", &FixedVision)
            .await
            .unwrap();
        assert_eq!(desc, "a photo of a cat");
    }

    #[tokio::test]
    async fn unavailable_vision_fails_extraction() {
        let result = extract_image(Path::new("cat.png"), b"bytes", &UnavailableVision).await;
        assert!(result.is_err());
    }
}
