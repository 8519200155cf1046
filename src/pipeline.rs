//! Pipeline entry points: the three actions the CLI exposes.
//!
//! * [`run_full`]: discover → OCR + extract per file → dedup/validate →
//!   sort/group → write the table.
//! * [`run_ocr_only`]: discover → OCR per file, no filtering or extraction.
//! * [`render_records`]: records already in hand → dedup/validate →
//!   sort/group → write the table.
//!
//! Fatal errors (`Err(PatentError)`) are limited to configuration, missing
//! sources and output failures. Per-file problems are reported inside
//! [`PipelineSummary::report`].

use crate::batch::{discover_sources, BatchOrchestrator, BatchReport};
use crate::config::PipelineConfig;
use crate::error::PatentError;
use crate::extract::Extractor;
use crate::ocr::{RecognizedText, TextRecognizer};
use crate::output::{output_path, OutputFormat};
use crate::ranking::OrderedGroupedResultSet;
use crate::record::{dedup_and_validate, parse_records_json, PatentRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Marker printed when a file yielded no text in OCR-only output.
pub const OCR_EMPTY_MARKER: &str = "(OCR Failed or Empty)";

/// Where and how the table is written.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Directory for the table. `None` uses [`default_output_dir`].
    pub output_dir: Option<PathBuf>,
    pub format: OutputFormat,
}

impl OutputOptions {
    fn resolve_dir(&self, source: Option<&Path>) -> PathBuf {
        match (&self.output_dir, source) {
            (Some(dir), _) => dir.clone(),
            (None, Some(src)) => default_output_dir(src),
            (None, None) => PathBuf::from("."),
        }
    }
}

/// A written table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderOutcome {
    pub path: PathBuf,
    pub record_count: usize,
    pub group_count: usize,
}

/// Result of [`run_full`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub report: BatchReport,
    /// `None` when no file produced a record.
    pub rendered: Option<RenderOutcome>,
    pub duration_ms: u64,
}

/// The source directory itself, or the parent of a single source file.
pub fn default_output_dir(source: &Path) -> PathBuf {
    if source.is_dir() {
        return source.to_path_buf();
    }
    match source.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Run OCR and extraction over every certificate under `source` and write
/// the sorted, grouped table.
pub async fn run_full(
    source: &Path,
    recognizer: Arc<dyn TextRecognizer>,
    extractor: &Extractor,
    config: &PipelineConfig,
    output: &OutputOptions,
) -> Result<PipelineSummary, PatentError> {
    let start = Instant::now();
    info!("Starting extraction: {}", source.display());

    // ── Step 1: Discover ────────────────────────────────────────────────
    let sources = discover_sources(source)?;

    // ── Step 2: OCR + extraction per file ───────────────────────────────
    let orchestrator = BatchOrchestrator::new(recognizer, config.clone());
    let report = orchestrator.process_all(extractor, &sources).await;

    // ── Step 3: Validate, sort, write ───────────────────────────────────
    let records = dedup_and_validate(report.records().cloned().collect());
    let rendered = if records.is_empty() {
        warn!("No records extracted; no table written");
        None
    } else {
        let dir = output.resolve_dir(Some(source));
        Some(finalize(records, &dir, output.format).await?)
    };

    Ok(PipelineSummary {
        report,
        rendered,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Recognize every supported file under `source` without extracting.
pub async fn run_ocr_only(
    source: &Path,
    recognizer: Arc<dyn TextRecognizer>,
    config: &PipelineConfig,
) -> Result<Vec<RecognizedText>, PatentError> {
    let sources = discover_sources(source)?;
    info!("Found {} files to recognize", sources.len());
    let orchestrator = BatchOrchestrator::new(recognizer, config.clone());
    Ok(orchestrator.recognize_all(&sources).await)
}

/// Format OCR-only results as `---START_OCR: <name>---` blocks.
pub fn format_ocr_dump(results: &[RecognizedText]) -> String {
    let mut out = String::new();
    for r in results {
        out.push_str(&format!("---START_OCR: {}---\n", r.file_name()));
        if r.is_empty() {
            out.push_str(OCR_EMPTY_MARKER);
        } else {
            out.push_str(r.text.trim_end());
        }
        out.push_str("\n---END_OCR---\n");
    }
    out
}

/// Write records supplied by the caller (render-only action).
///
/// `source` only steers the default output directory.
pub async fn render_records(
    records: Vec<PatentRecord>,
    source: Option<&Path>,
    output: &OutputOptions,
) -> Result<RenderOutcome, PatentError> {
    let records = dedup_and_validate(records);
    if records.is_empty() {
        return Err(PatentError::InvalidRecords(
            "no non-empty records to render".into(),
        ));
    }
    let dir = output.resolve_dir(source);
    finalize(records, &dir, output.format).await
}

/// Parse a JSON object or array and render it.
pub async fn render_json(
    json: &str,
    source: Option<&Path>,
    output: &OutputOptions,
) -> Result<RenderOutcome, PatentError> {
    render_records(parse_records_json(json)?, source, output).await
}

async fn finalize(
    records: Vec<PatentRecord>,
    dir: &Path,
    format: OutputFormat,
) -> Result<RenderOutcome, PatentError> {
    let path = output_path(dir, &records, format);
    let set = OrderedGroupedResultSet::from_records(records);
    format.sink().write(&set, &path).await?;
    Ok(RenderOutcome {
        path,
        record_count: set.len(),
        group_count: set.group_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_dir_for_file_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.pdf");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(default_output_dir(dir.path()), dir.path());
        assert_eq!(default_output_dir(&file), dir.path());
        assert_eq!(default_output_dir(Path::new("a.pdf")), PathBuf::from("."));
    }

    #[test]
    fn ocr_dump_markers() {
        let dump = format_ocr_dump(&[
            RecognizedText {
                path: PathBuf::from("/d/a.png"),
                text: "专利号 ZL1\n\n".into(),
                error: None,
            },
            RecognizedText {
                path: PathBuf::from("/d/b.pdf"),
                text: String::new(),
                error: Some("tesseract missing".into()),
            },
        ]);
        assert_eq!(
            dump,
            "---START_OCR: a.png---\n专利号 ZL1\n---END_OCR---\n\
             ---START_OCR: b.pdf---\n(OCR Failed or Empty)\n---END_OCR---\n"
        );
    }

    #[tokio::test]
    async fn render_json_names_table_after_first_input_holder() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputOptions {
            output_dir: Some(dir.path().to_path_buf()),
            format: OutputFormat::Csv,
        };
        let outcome = render_json(
            r#"[{"专利权人": "B Co", "专利类型": "发明"},
                {"专利权人": "A Co", "专利类型": "外观设计", "申请日": "2020-01-01"}]"#,
            None,
            &output,
        )
        .await
        .unwrap();
        assert_eq!(outcome.record_count, 2);
        assert_eq!(outcome.group_count, 2);
        assert_eq!(outcome.path, dir.path().join("B Co-专利信息.csv"));
        assert!(outcome.path.exists());
    }

    #[tokio::test]
    async fn render_rejects_empty_input() {
        let err = render_json("[]", None, &OutputOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PatentError::InvalidRecords(_)));
        let err = render_json(r#"{"专利号": null}"#, None, &OutputOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PatentError::InvalidRecords(_)));
    }
}
