//! Vision-LLM recognizer: page image → base64 PNG → transcription.
//!
//! PNG keeps rendered glyphs crisp; JPEG artefacts on small CJK characters
//! hurt transcription far more than the extra bytes cost. Transient API
//! errors (429/503) are retried with exponential backoff.

use super::{is_pdf, is_supported, join_pages, OcrError, PdfRasterizer, TextRecognizer};
use crate::config::PipelineConfig;
use crate::error::PatentError;
use crate::prompts::VISION_OCR_PROMPT;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";
const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF_MS: u64 = 500;
/// Transcriptions are longer than extraction replies.
const VISION_MAX_TOKENS: usize = 4096;

pub struct VisionRecognizer {
    provider: Arc<dyn LLMProvider>,
    rasterizer: Arc<PdfRasterizer>,
    temperature: f32,
}

impl VisionRecognizer {
    pub fn new(provider: Arc<dyn LLMProvider>, rasterizer: Arc<PdfRasterizer>) -> Self {
        Self {
            provider,
            rasterizer,
            temperature: 0.1,
        }
    }

    /// Resolve the provider from configuration, else edgequake-llm
    /// auto-detection over the usual API-key variables.
    ///
    /// `EDGEQUAKE_LLM_PROVIDER` / `EDGEQUAKE_MODEL` reach this point through
    /// [`PipelineConfigBuilder::vision_defaults`](crate::config::PipelineConfigBuilder::vision_defaults).
    pub fn from_config(
        config: &PipelineConfig,
        rasterizer: Arc<PdfRasterizer>,
    ) -> Result<Self, PatentError> {
        let provider = resolve_provider(config)?;
        Ok(Self {
            provider,
            rasterizer,
            temperature: config.temperature,
        })
    }

    async fn transcribe(&self, label: &str, image: DynamicImage) -> Result<String, OcrError> {
        let max_pixels = self.rasterizer.max_pixels();
        let data = tokio::task::spawn_blocking(move || encode_page(&image, max_pixels))
            .await
            .map_err(|e| OcrError::Image(format!("encode task panicked: {e}")))??;

        let messages = vec![
            ChatMessage::system(VISION_OCR_PROMPT),
            ChatMessage::user_with_images("", vec![data]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(VISION_MAX_TOKENS),
            ..Default::default()
        };

        let mut last_err = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = RETRY_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!("{}: retry {}/{} after {}ms", label, attempt, MAX_RETRIES, backoff);
                sleep(Duration::from_millis(backoff)).await;
            }
            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens",
                        label, response.prompt_tokens, response.completion_tokens
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    last_err = e.to_string();
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, last_err);
                }
            }
        }
        Err(OcrError::Vision(last_err))
    }
}

#[async_trait]
impl TextRecognizer for VisionRecognizer {
    fn name(&self) -> &str {
        "vision"
    }

    async fn recognize(&self, path: &Path) -> Result<String, OcrError> {
        if !is_supported(path) {
            return Err(OcrError::Unsupported {
                path: path.to_path_buf(),
            });
        }

        let pages = if is_pdf(path) {
            self.rasterizer.render(path).await?
        } else {
            let owned = path.to_path_buf();
            let image = tokio::task::spawn_blocking(move || image::open(owned))
                .await
                .map_err(|e| OcrError::Image(format!("decode task panicked: {e}")))??;
            vec![(1, image)]
        };

        let mut texts = Vec::with_capacity(pages.len());
        for (page_num, image) in pages {
            let label = format!("{} p{}", path.display(), page_num);
            texts.push((page_num, self.transcribe(&label, image).await?));
        }
        Ok(join_pages(&texts))
    }
}

fn create_vision_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, PatentError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        PatentError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, PatentError> {
    if let Some(ref name) = config.vision_provider {
        let model = config.vision_model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);
        return create_vision_provider(name, model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PatentError::ProviderNotConfigured {
            provider: "vision".to_string(),
            hint: format!(
                "No vision provider could be auto-detected from environment.\n\
                 Set OPENAI_API_KEY or GEMINI_API_KEY, or pass --vision-provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok(llm_provider)
}

/// Downscale to `max_pixels` on the longest edge and encode as a base64 PNG.
fn encode_page(image: &DynamicImage, max_pixels: u32) -> Result<ImageData, image::ImageError> {
    let scaled;
    let image = if image.width().max(image.height()) > max_pixels {
        scaled = image.resize(max_pixels, max_pixels, image::imageops::FilterType::Lanczos3);
        &scaled
    } else {
        image
    };

    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        image.width(),
        image.height(),
        b64.len()
    );
    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255])))
    }

    #[test]
    fn encodes_png_base64() {
        let data = encode_page(&blank(10, 10), 2000).unwrap();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).unwrap();
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn large_images_are_downscaled() {
        let data = encode_page(&blank(400, 100), 200).unwrap();
        let decoded = STANDARD.decode(&data.data).unwrap();
        let img = image::load_from_memory(&decoded).unwrap();
        assert_eq!(img.width(), 200);
        assert_eq!(img.height(), 50);
    }
}
