//! Batch orchestration: discover certificate files, run OCR and extraction
//! per file, and collect per-file outcomes.
//!
//! Each file is an independent unit. Whatever goes wrong inside a unit
//! (OCR error, empty text, provider failure, malformed reply) ends up as
//! [`FileStatus::Failed`] in the report; it never aborts the batch.
//!
//! In concurrent mode units run through `buffer_unordered`, so completion
//! order is arbitrary. The report is always re-sorted by file name before it
//! is returned, which makes sequential and concurrent runs produce the same
//! sequence.

use crate::config::{PipelineConfig, ProcessingMode};
use crate::error::{FileError, PatentError};
use crate::extract::Extractor;
use crate::ocr::{file_label, is_supported, RecognizedText, TextRecognizer};
use crate::progress::{BatchProgressCallback, NoopProgressCallback};
use crate::record::PatentRecord;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

static NOOP_PROGRESS: NoopProgressCallback = NoopProgressCallback;

/// Collect supported files under `root`, sorted by path string.
///
/// A file path is returned as-is when its extension is supported. A
/// directory is walked recursively.
pub fn discover_sources(root: &Path) -> Result<Vec<PathBuf>, PatentError> {
    if !root.exists() {
        return Err(PatentError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    let mut files: Vec<PathBuf> = if root.is_file() {
        vec![root.to_path_buf()]
    } else {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    };
    files.retain(|p| is_supported(p));
    files.sort_by_cached_key(|p| p.to_string_lossy().into_owned());

    if files.is_empty() {
        return Err(PatentError::NoSources {
            path: root.to_path_buf(),
        });
    }
    debug!("Discovered {} source files under {}", files.len(), root.display());
    Ok(files)
}

/// True when the file name contains one of `keywords` (receipts, notices,
/// contracts and the like).
pub fn is_non_certificate(path: &Path, keywords: &[String]) -> bool {
    let name = file_label(path);
    keywords.iter().any(|k| !k.is_empty() && name.contains(k.as_str()))
}

/// `<dir>/<stem>_extracted.txt` next to `source`.
pub fn side_file_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{stem}_extracted.txt"))
}

/// What happened to one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    Extracted(PatentRecord),
    /// Excluded by name before OCR.
    Skipped,
    Failed(FileError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
}

impl FileOutcome {
    pub fn file_name(&self) -> String {
        file_label(&self.path)
    }
}

/// All outcomes of one batch, sorted by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn records(&self) -> impl Iterator<Item = &PatentRecord> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            FileStatus::Extracted(r) => Some(r),
            _ => None,
        })
    }

    pub fn into_records(self) -> Vec<PatentRecord> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o.status {
                FileStatus::Extracted(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = &FileError> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            FileStatus::Failed(e) => Some(e),
            _ => None,
        })
    }

    /// Files that produced a record.
    pub fn processed(&self) -> usize {
        self.records().count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == FileStatus::Skipped)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.errors().count()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Sort by file name, then full path for identical names in different
/// directories.
fn sort_by_file_name<T>(items: &mut [T], path_of: impl Fn(&T) -> &Path) {
    items.sort_by(|a, b| {
        let (pa, pb) = (path_of(a), path_of(b));
        pa.file_name().cmp(&pb.file_name()).then_with(|| pa.cmp(pb))
    });
}

/// Drives OCR and extraction over a list of files.
pub struct BatchOrchestrator {
    recognizer: Arc<dyn TextRecognizer>,
    config: PipelineConfig,
}

impl BatchOrchestrator {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, config: PipelineConfig) -> Self {
        Self { recognizer, config }
    }

    fn progress(&self) -> &dyn BatchProgressCallback {
        match self.config.progress_callback.as_deref() {
            Some(cb) => cb,
            None => &NOOP_PROGRESS,
        }
    }

    /// Run the full per-file pipeline over `sources`.
    pub async fn process_all(&self, extractor: &Extractor, sources: &[PathBuf]) -> BatchReport {
        let start = Instant::now();
        let total = sources.len();
        let workers = self.config.mode.worker_count(total);
        info!(
            "Processing {} files ({}, {} worker{}), provider {} ({})",
            total,
            mode_label(&self.config.mode),
            workers,
            if workers == 1 { "" } else { "s" },
            extractor.provider_name(),
            extractor.model()
        );
        self.progress().on_batch_start(total);

        let mut outcomes: Vec<FileOutcome> = match self.config.mode {
            ProcessingMode::Sequential => {
                let mut out = Vec::with_capacity(total);
                for (i, path) in sources.iter().enumerate() {
                    out.push(self.process_one(extractor, path, i + 1, total).await);
                }
                out
            }
            ProcessingMode::Concurrent { .. } => {
                stream::iter(
                    sources
                        .iter()
                        .enumerate()
                        .map(|(i, path)| self.process_one(extractor, path, i + 1, total)),
                )
                .buffer_unordered(workers)
                .collect()
                .await
            }
        };
        sort_by_file_name(&mut outcomes, |o| o.path.as_path());

        let report = BatchReport {
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Batch done: {} processed, {} skipped, {} failed in {}ms",
            report.processed(),
            report.skipped(),
            report.failed(),
            report.duration_ms
        );
        self.progress()
            .on_batch_complete(report.processed(), report.skipped(), report.failed());
        report
    }

    async fn process_one(
        &self,
        extractor: &Extractor,
        path: &Path,
        index: usize,
        total: usize,
    ) -> FileOutcome {
        let label = file_label(path);
        let progress = self.progress();

        if is_non_certificate(path, &self.config.skip_keywords) {
            info!("[{}/{}] Skipping non-certificate file: {}", index, total, label);
            progress.on_file_skipped(&label, index, total);
            return FileOutcome {
                path: path.to_path_buf(),
                status: FileStatus::Skipped,
            };
        }

        progress.on_file_start(&label, index, total);
        let status = match self.recognize_and_extract(extractor, path, &label).await {
            Ok(record) => {
                info!("[{}/{}] Extracted: {}", index, total, label);
                progress.on_file_complete(&label, index, total);
                FileStatus::Extracted(record)
            }
            Err(e) => {
                warn!("[{}/{}] No record for {}: {}", index, total, label, e.detail());
                progress.on_file_error(&label, index, total, e.detail());
                FileStatus::Failed(e)
            }
        };
        FileOutcome {
            path: path.to_path_buf(),
            status,
        }
    }

    async fn recognize_and_extract(
        &self,
        extractor: &Extractor,
        path: &Path,
        label: &str,
    ) -> Result<PatentRecord, FileError> {
        let text = self.recognize_text(path, label).await?;
        extractor
            .extract(&text, path)
            .await
            .map_err(|f| f.into_file_error(label))
    }

    /// OCR one file; empty output counts as a failure.
    async fn recognize_text(&self, path: &Path, label: &str) -> Result<String, FileError> {
        let text = self
            .recognizer
            .recognize(path)
            .await
            .map_err(|e| FileError::CollaboratorUnavailable {
                file: label.to_string(),
                detail: format!("{} OCR: {}", self.recognizer.name(), e),
            })?;
        if text.trim().is_empty() {
            return Err(FileError::CollaboratorUnavailable {
                file: label.to_string(),
                detail: format!("{} OCR produced no text", self.recognizer.name()),
            });
        }
        if self.config.write_side_files {
            write_side_file(path, &text).await;
        }
        Ok(text)
    }

    /// OCR only: no name filter, no extraction.
    pub async fn recognize_all(&self, sources: &[PathBuf]) -> Vec<RecognizedText> {
        let total = sources.len();
        let workers = self.config.mode.worker_count(total);
        self.progress().on_batch_start(total);

        let unit = |index: usize, path: &PathBuf| {
            let path = path.clone();
            async move {
                let label = file_label(&path);
                self.progress().on_file_start(&label, index, total);
                let (text, error) = match self.recognize_text(&path, &label).await {
                    Ok(text) => {
                        self.progress().on_file_complete(&label, index, total);
                        (text, None)
                    }
                    Err(e) => {
                        warn!("[{}/{}] {}", index, total, e);
                        self.progress().on_file_error(&label, index, total, e.detail());
                        (String::new(), Some(e.detail().to_string()))
                    }
                };
                RecognizedText { path, text, error }
            }
        };

        let mut results: Vec<RecognizedText> = match self.config.mode {
            ProcessingMode::Sequential => {
                let mut out = Vec::with_capacity(total);
                for (i, path) in sources.iter().enumerate() {
                    out.push(unit(i + 1, path).await);
                }
                out
            }
            ProcessingMode::Concurrent { .. } => {
                stream::iter(sources.iter().enumerate().map(|(i, p)| unit(i + 1, p)))
                    .buffer_unordered(workers)
                    .collect()
                    .await
            }
        };
        sort_by_file_name(&mut results, |r| r.path.as_path());

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        self.progress()
            .on_batch_complete(results.len() - failed, 0, failed);
        results
    }
}

fn mode_label(mode: &ProcessingMode) -> &'static str {
    match mode {
        ProcessingMode::Sequential => "sequential",
        ProcessingMode::Concurrent { .. } => "concurrent",
    }
}

async fn write_side_file(source: &Path, text: &str) {
    let dest = side_file_path(source);
    match tokio::fs::write(&dest, text).await {
        Ok(()) => debug!("Saved OCR text to {}", dest.display()),
        Err(e) => warn!("Could not write {}: {}", dest.display(), e),
    }
}
