//! Document loading: turns the configured source file into plain text.
//!
//! PDFs go through `pdf-extract`; `.md` and `.txt` files are read as UTF-8
//! unchanged. The loader runs once at startup and any failure is fatal to
//! the server, so every error carries the offending path.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentLoadError {
    #[error("document not found: {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to read document {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed for {}: {message}", .path.display())]
    Extraction { path: PathBuf, message: String },
    #[error("document {} contains no extractable text", .0.display())]
    Empty(PathBuf),
}

/// Source formats the loader understands, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    PlainText,
}

impl SourceFormat {
    /// Anything that is not `.md`, `.markdown` or `.txt` is treated as PDF.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("md") | Some("markdown") | Some("txt") => SourceFormat::PlainText,
            _ => SourceFormat::Pdf,
        }
    }
}

/// Load the document at `path` and return its text content.
///
/// The returned text is never blank: whitespace-only output is reported as
/// [`DocumentLoadError::Empty`].
pub fn load_document(path: &Path) -> Result<String, DocumentLoadError> {
    if !path.exists() {
        return Err(DocumentLoadError::Missing(path.to_path_buf()));
    }

    let bytes = std::fs::read(path).map_err(|source| DocumentLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let text = match SourceFormat::from_path(path) {
        SourceFormat::Pdf => extract_pdf(path, &bytes)?,
        SourceFormat::PlainText => String::from_utf8_lossy(&bytes).into_owned(),
    };

    let text = normalize(&text);
    if text.is_empty() {
        return Err(DocumentLoadError::Empty(path.to_path_buf()));
    }

    tracing::info!(
        path = %path.display(),
        chars = text.len(),
        "document loaded"
    );
    Ok(text)
}

fn extract_pdf(path: &Path, bytes: &[u8]) -> Result<String, DocumentLoadError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| DocumentLoadError::Extraction {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Trim trailing whitespace per line and collapse runs of 3+ newlines so the
/// chunker sees clean paragraph boundaries.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
