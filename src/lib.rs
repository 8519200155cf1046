//! # patent-table
//!
//! Turn scanned patent certificates into a sorted, grouped table.
//!
//! Each certificate (PDF or image) is recognized with OCR, the text is sent
//! to an LLM that answers with a small JSON object, and the resulting
//! records are normalized, deduplicated and ordered by holder, patent type
//! and application date.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file / directory
//!  │
//!  ├─ 1. Discover  supported files, lexical order; receipts/notices skipped
//!  ├─ 2. OCR       tesseract (chi_sim+eng) or a vision LLM; pdfium for PDFs
//!  ├─ 3. Extract   Gemini / Claude / OpenAI, one fixed prompt, JSON reply
//!  ├─ 4. Repair    strip fenced-code wrapping, parse, map onto PatentRecord
//!  ├─ 5. Validate  drop blank and duplicate records
//!  ├─ 6. Rank      holder → type priority → newest application date
//!  └─ 7. Render    XLSX (border per holder group), CSV or JSON (group flags)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use patent_table::{
//!     build_recognizer, run_full, Credentials, Extractor, OutputOptions, PipelineConfig,
//!     ProviderOverrides, ProviderSelection, ProviderSettings, RecognizerKind,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     // First of GEMINI_API_KEY / ANTHROPIC_API_KEY / OPENAI_API_KEY that is set.
//!     let settings = ProviderSettings::resolve(
//!         ProviderSelection::Auto,
//!         &Credentials::from_env(),
//!         &ProviderOverrides::default(),
//!     )?;
//!     let extractor = Extractor::from_settings(&settings, &config)?;
//!     let recognizer = build_recognizer(RecognizerKind::Tesseract, &config).await?;
//!
//!     let summary = run_full(
//!         Path::new("certificates/"),
//!         recognizer,
//!         &extractor,
//!         &config,
//!         &OutputOptions::default(),
//!     )
//!     .await?;
//!     if let Some(table) = summary.rendered {
//!         println!("{} records → {}", table.record_count, table.path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `patent2table` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod ocr;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod ranking;
pub mod record;
pub mod repair;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{discover_sources, BatchOrchestrator, BatchReport, FileOutcome, FileStatus};
pub use config::{
    Credentials, PipelineConfig, PipelineConfigBuilder, ProcessingMode, ProviderKind,
    ProviderOverrides, ProviderSelection, ProviderSettings,
};
pub use error::{FileError, PatentError};
pub use extract::{BackendError, CompletionBackend, ExtractionFailure, Extractor};
pub use normalize::{normalize_type, parse_date, priority_of, ParsedDate};
pub use ocr::{build_recognizer, OcrError, RecognizedText, RecognizerKind, TextRecognizer};
pub use output::{CsvSink, JsonSink, OutputFormat, RecordSink};
pub use pipeline::{
    format_ocr_dump, render_json, render_records, run_full, run_ocr_only, OutputOptions,
    PipelineSummary, RenderOutcome,
};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use ranking::{compare, sort_records, OrderedGroupedResultSet};
pub use record::PatentRecord;
pub use repair::{repair_and_parse, RepairError};
