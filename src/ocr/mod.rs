//! Text recognition: certificate file → raw text.
//!
//! Two recognizers ship with the crate:
//!
//! * [`TesseractRecognizer`] runs the `tesseract` CLI (`chi_sim+eng` by
//!   default) on images, and on PDF pages rasterised with pdfium.
//! * [`VisionRecognizer`] sends the same rasterised pages to a vision LLM
//!   through `edgequake-llm`, for machines without Tesseract.
//!
//! Both only ever look at the first [`crate::PipelineConfig::max_pages`]
//! pages of a PDF; certificate data sits on page one.

mod raster;
mod tesseract;
mod vision;

pub use raster::PdfRasterizer;
pub use tesseract::TesseractRecognizer;
pub use vision::VisionRecognizer;

use crate::config::PipelineConfig;
use crate::error::PatentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// File extensions accepted as certificate sources (lower-case).
pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    ["pdf", "png", "jpg", "jpeg", "bmp", "tiff", "tif", "webp"];

/// Turns one source file into text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize `path`. An `Ok` result may still be empty; callers decide
    /// whether empty text is usable.
    async fn recognize(&self, path: &Path) -> Result<String, OcrError>;
}

#[derive(Debug, Error)]
pub enum OcrError {
    /// The external OCR tool is not installed or not on `PATH`.
    #[error("'{tool}' not found; install it and make sure it is on PATH")]
    ToolMissing { tool: String },

    #[error("'{tool}' exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("unsupported file type: '{path}'")]
    Unsupported { path: PathBuf },

    /// pdfium could not be loaded, or could not open or render the document.
    #[error("PDF rasterisation failed: {0}")]
    Raster(String),

    #[error("image processing failed: {0}")]
    Image(String),

    /// The vision model call failed.
    #[error("vision OCR failed: {0}")]
    Vision(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for OcrError {
    fn from(e: image::ImageError) -> Self {
        OcrError::Image(e.to_string())
    }
}

/// Which recognizer the pipeline builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognizerKind {
    #[default]
    Tesseract,
    Vision,
}

impl FromStr for RecognizerKind {
    type Err = PatentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tesseract" => Ok(RecognizerKind::Tesseract),
            "vision" | "llm" => Ok(RecognizerKind::Vision),
            other => Err(PatentError::InvalidConfig(format!(
                "Unknown recognizer '{other}' (expected tesseract or vision)"
            ))),
        }
    }
}

/// Build the recognizer selected by `kind`.
///
/// The vision recognizer resolves its provider here, so a missing
/// credential surfaces before any file is processed.
pub async fn build_recognizer(
    kind: RecognizerKind,
    config: &PipelineConfig,
) -> Result<Arc<dyn TextRecognizer>, PatentError> {
    let rasterizer = Arc::new(PdfRasterizer::from_config(config));
    Ok(match kind {
        RecognizerKind::Tesseract => {
            let recognizer = TesseractRecognizer::new(&config.ocr_language, rasterizer);
            recognizer.check_version().await;
            Arc::new(recognizer)
        }
        RecognizerKind::Vision => Arc::new(VisionRecognizer::from_config(config, rasterizer)?),
    })
}

/// Recognized text for one source file (the OCR-only action's output unit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognizedText {
    pub path: PathBuf,
    pub text: String,
    /// Set when recognition failed; `text` is then empty.
    pub error: Option<String>,
}

impl RecognizedText {
    pub fn file_name(&self) -> String {
        file_label(&self.path)
    }

    /// Nothing usable was recognized.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Lower-case extension of `path`, if any.
fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_pdf(path: &Path) -> bool {
    extension(path).as_deref() == Some("pdf")
}

/// File name for logs and progress events; falls back to the full path.
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Join per-page text with `--- Page N ---` headers. Pages with no text
/// are left out.
pub fn join_pages(pages: &[(usize, String)]) -> String {
    pages
        .iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(page_num, text)| format!("--- Page {} ---\n{}", page_num, text.trim_end()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
