//! PDF rasterisation: render the leading pages of a certificate via pdfium.
//!
//! pdfium is a C++ library with thread-local state, so all work runs inside
//! `spawn_blocking`. Output size is capped on the longest edge rather than
//! by DPI; scanned certificates come in wildly different page sizes.

use super::OcrError;
use crate::config::PipelineConfig;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Renders PDF pages to images.
#[derive(Debug, Clone)]
pub struct PdfRasterizer {
    lib_path: Option<PathBuf>,
    max_pixels: u32,
    max_pages: usize,
}

impl PdfRasterizer {
    pub fn new(lib_path: Option<PathBuf>, max_pixels: u32, max_pages: usize) -> Self {
        Self {
            lib_path,
            max_pixels,
            max_pages: max_pages.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.pdfium_lib_path.clone(),
            config.max_rendered_pixels,
            config.max_pages,
        )
    }

    pub fn max_pixels(&self) -> u32 {
        self.max_pixels
    }

    /// Render up to `max_pages` leading pages.
    ///
    /// Returns `(page_number_1based, image)` pairs in page order.
    pub async fn render(&self, pdf_path: &Path) -> Result<Vec<(usize, DynamicImage)>, OcrError> {
        let this = self.clone();
        let path = pdf_path.to_path_buf();
        tokio::task::spawn_blocking(move || this.render_blocking(&path))
            .await
            .map_err(|e| OcrError::Raster(format!("render task panicked: {e}")))?
    }

    fn render_blocking(&self, pdf_path: &Path) -> Result<Vec<(usize, DynamicImage)>, OcrError> {
        let pdfium = bind_pdfium(self.lib_path.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| OcrError::Raster(format!("{}: {:?}", pdf_path.display(), e)))?;

        let pages = document.pages();
        let total = pages.len() as usize;
        let wanted = total.min(self.max_pages);
        debug!(
            "{}: {} pages, rendering {}",
            pdf_path.display(),
            total,
            wanted
        );

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut images = Vec::with_capacity(wanted);
        for idx in 0..wanted {
            let page = pages
                .get(idx as u16)
                .map_err(|e| OcrError::Raster(format!("page {}: {:?}", idx + 1, e)))?;
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| OcrError::Raster(format!("page {}: {:?}", idx + 1, e)))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push((idx + 1, image));
        }
        Ok(images)
    }
}

/// Bind pdfium from an explicit path, the working directory, or the
/// system library search path, in that order.
fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, OcrError> {
    let bindings = match lib_path {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| {
        OcrError::Raster(format!(
            "could not load the pdfium library ({e:?}); set PDFIUM_LIB_PATH or install pdfium"
        ))
    })?;
    Ok(Pdfium::new(bindings))
}
