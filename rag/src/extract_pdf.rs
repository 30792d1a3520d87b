use tracing::info;

use crate::error::{RagError, Result};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Rejects uploads that cannot be a PDF before any work is done on them.
pub fn validate_upload(bytes: &[u8], filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(RagError::invalid("missing file name"));
    }
    if bytes.is_empty() {
        return Err(RagError::invalid(format!("{filename} is empty")));
    }
    if !looks_like_pdf(bytes) {
        return Err(RagError::invalid(format!("{filename} is not a PDF")));
    }
    Ok(())
}

/// Some producers put junk before the header; readers accept it within the first KiB.
fn looks_like_pdf(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

/// Extracts the text layer on a blocking thread; parsing is CPU bound.
pub async fn extract_text(bytes: Vec<u8>, filename: &str) -> Result<String> {
    info!("Parsing PDF: {filename}");
    let name = filename.to_string();
    let text = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| RagError::invalid(format!("PDF parser for {name} crashed: {e}")))?
    .map_err(|e| RagError::invalid(format!("failed to extract text from {name}: {e}")))?;
    info!("PDF parsed, total characters: {}", text.chars().count());
    Ok(text)
}
