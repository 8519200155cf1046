//! Tesseract CLI recognizer.

use super::{is_pdf, is_supported, join_pages, OcrError, PdfRasterizer, TextRecognizer};
use async_trait::async_trait;
use image::DynamicImage;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

const MAX_STDERR_CHARS: usize = 300;

/// Runs `tesseract <image> stdout -l <lang>` per image or rasterised page.
pub struct TesseractRecognizer {
    binary: PathBuf,
    language: String,
    rasterizer: Arc<PdfRasterizer>,
}

impl TesseractRecognizer {
    pub fn new(language: &str, rasterizer: Arc<PdfRasterizer>) -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: language.to_string(),
            rasterizer,
        }
    }

    /// Use a specific executable instead of `tesseract` on `PATH`.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Check the binary runs. A missing tool only warns here; each file
    /// then fails individually.
    pub async fn check_version(&self) -> Option<String> {
        match Command::new(&self.binary).arg("--version").output().await {
            Ok(out) => {
                // Older releases print the version banner on stderr.
                let banner = if out.stdout.is_empty() {
                    out.stderr
                } else {
                    out.stdout
                };
                let version = String::from_utf8_lossy(&banner)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                info!("OCR: {} ({})", version, self.language);
                Some(version)
            }
            Err(e) => {
                warn!(
                    "Tesseract not available ({}): every file will fail OCR. \
                     Install it from https://github.com/tesseract-ocr/tesseract",
                    e
                );
                None
            }
        }
    }

    async fn run(&self, image_path: &Path) -> Result<String, OcrError> {
        let tool = self.binary.display().to_string();
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => OcrError::ToolMissing { tool: tool.clone() },
                _ => OcrError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::ToolFailed {
                tool,
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(MAX_STDERR_CHARS).collect(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn recognize_pdf(&self, path: &Path) -> Result<String, OcrError> {
        let pages = self.rasterizer.render(path).await?;
        let scratch = tempfile::tempdir()?;
        let mut texts = Vec::with_capacity(pages.len());
        for (page_num, image) in pages {
            let png = scratch.path().join(format!("page-{page_num}.png"));
            save_png(image, png.clone()).await?;
            let text = self.run(&png).await?;
            debug!("{}: page {} → {} chars", path.display(), page_num, text.len());
            texts.push((page_num, text));
        }
        Ok(join_pages(&texts))
    }
}

async fn save_png(image: DynamicImage, dest: PathBuf) -> Result<(), OcrError> {
    tokio::task::spawn_blocking(move || image.save_with_format(&dest, image::ImageFormat::Png))
        .await
        .map_err(|e| OcrError::Image(format!("encode task panicked: {e}")))??;
    Ok(())
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, path: &Path) -> Result<String, OcrError> {
        if !is_supported(path) {
            return Err(OcrError::Unsupported {
                path: path.to_path_buf(),
            });
        }
        if is_pdf(path) {
            self.recognize_pdf(path).await
        } else {
            self.run(path).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer() -> TesseractRecognizer {
        TesseractRecognizer::new("chi_sim+eng", Arc::new(PdfRasterizer::new(None, 1000, 1)))
    }

    #[tokio::test]
    async fn missing_binary_is_tool_missing() {
        let r = recognizer().with_binary("/nonexistent/tesseract-binary");
        let err = r.recognize(Path::new("scan.png")).await.unwrap_err();
        assert!(matches!(err, OcrError::ToolMissing { .. }), "got {err:?}");
        assert!(r.check_version().await.is_none());
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected_before_running() {
        let err = recognizer()
            .recognize(Path::new("notes.docx"))
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Unsupported { .. }));
    }

    #[test]
    fn language_default() {
        assert_eq!(recognizer().language(), "chi_sim+eng");
    }
}
