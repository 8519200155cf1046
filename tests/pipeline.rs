//! Offline integration tests for the batch pipeline.
//!
//! OCR and the extraction backend are replaced with in-process fakes: the
//! fake recognizer returns each file's bytes as its "OCR text", and the fake
//! backend answers with that text verbatim. A file's content is therefore
//! the reply the model would give for it.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use patent_table::{
    discover_sources, format_ocr_dump, render_json, run_full, run_ocr_only, BackendError,
    BatchOrchestrator, BatchProgressCallback, CompletionBackend, Extractor, FileError,
    FileStatus, OcrError, OutputFormat, OutputOptions, PatentError, PipelineConfig,
    ProcessingMode, TextRecognizer,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FileContentRecognizer {
    calls: AtomicUsize,
}

#[async_trait]
impl TextRecognizer for FileContentRecognizer {
    fn name(&self) -> &str {
        "fake-ocr"
    }

    async fn recognize(&self, path: &Path) -> Result<String, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(tokio::fs::read_to_string(path).await?)
    }
}

/// Replies with the OCR text embedded in the prompt. `FAIL` simulates an
/// unreachable provider.
#[derive(Default)]
struct EchoBackend {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-1"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = prompt
            .split_once("OCR Text:\n")
            .map(|(_, t)| t)
            .unwrap_or_default();
        if text.trim() == "FAIL" {
            return Err(BackendError::Status {
                status: 503,
                body: "overloaded".into(),
            });
        }
        Ok(text.to_string())
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<String>>,
}

impl BatchProgressCallback for RecordingProgress {
    fn on_batch_start(&self, total_files: usize) {
        self.events.lock().unwrap().push(format!("start {total_files}"));
    }
    fn on_file_skipped(&self, file: &str, _index: usize, _total: usize) {
        self.events.lock().unwrap().push(format!("skip {file}"));
    }
    fn on_file_complete(&self, file: &str, _index: usize, _total: usize) {
        self.events.lock().unwrap().push(format!("ok {file}"));
    }
    fn on_file_error(&self, file: &str, _index: usize, _total: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("err {file}"));
    }
    fn on_batch_complete(&self, processed: usize, skipped: usize, failed: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("done {processed}/{skipped}/{failed}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn reply(number: &str, holder: &str, ty: &str, date: &str) -> String {
    serde_json::json!({
        "专利号": number,
        "专利名称": format!("{number} 的装置"),
        "专利权人": holder,
        "专利类型": ty,
        "发明人": ["张三", "李四"],
        "申请日": date,
    })
    .to_string()
}

/// A directory with a mix of good, skipped and failing certificates.
fn certificate_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, body: &str| fs::write(dir.path().join(name), body).unwrap();

    write("a.png", &reply("ZL2019001", "B Co", "实用新型", "2019-06-01"));
    write(
        "b.pdf",
        &format!(
            "```json\n{}\n```",
            reply("ZL2021002", "A Co", "外观设计", "2021年3月4日")
        ),
    );
    write("c.jpg", &reply("ZL2020003", "A Co", "发明专利", "2020/01/05"));
    write("d.png", "FAIL");
    write("e.png", "the model rambled instead of answering");
    write("f.png", "   \n");
    write("专利-收据.pdf", &reply("ZL9", "Receipt Co", "发明", "2020-01-01"));
    write("notes.txt", "not a certificate");
    dir
}

fn config(mode: ProcessingMode) -> PipelineConfig {
    PipelineConfig::builder().mode(mode).build().unwrap()
}

fn extractor(backend: Arc<EchoBackend>) -> Extractor {
    Extractor::new(backend, 8000)
}

fn names(paths: impl Iterator<Item = PathBuf>) -> Vec<String> {
    paths
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

// ── Full run ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_writes_sorted_grouped_table() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("patent_table=debug")
        .with_test_writer()
        .try_init();

    let dir = certificate_dir();
    let recognizer = Arc::new(FileContentRecognizer::default());
    let backend = Arc::new(EchoBackend::default());
    let output = OutputOptions {
        output_dir: None,
        format: OutputFormat::Csv,
    };

    let summary = run_full(
        dir.path(),
        recognizer.clone(),
        &extractor(backend.clone()),
        &config(ProcessingMode::Sequential),
        &output,
    )
    .await
    .expect("run_full should succeed");

    let report = &summary.report;
    assert_eq!(report.total(), 7, "notes.txt is not discovered");
    assert_eq!(
        (report.processed(), report.skipped(), report.failed()),
        (3, 1, 3)
    );

    // The receipt never reaches OCR or the provider; blank OCR never reaches the provider.
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 6);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 5);

    let table = summary.rendered.expect("a table is written");
    // Named after the first holder in file order (a.png), not the first row.
    assert_eq!(table.path, dir.path().join("B Co-专利信息.csv"));
    assert_eq!(table.record_count, 3);
    assert_eq!(table.group_count, 2);

    let bytes = fs::read(&table.path).unwrap();
    let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4, "header, 2 × A Co, B Co:\n{text}");
    assert!(lines[1].starts_with("ZL2020003,"), "invention first: {}", lines[1]);
    assert!(lines[1].contains(",发明专利,张三;李四,2020-01-05,"));
    assert!(lines[2].starts_with("ZL2021002,"));
    assert!(lines[2].contains(",外观设计专利,"));
    assert!(lines[2].contains(",2021-03-04,"));
    assert!(lines[3].starts_with("ZL2019001,"));
    assert!(lines[3].contains(",实用新型专利,"));
}

#[tokio::test]
async fn default_output_is_a_workbook() {
    let dir = certificate_dir();
    let summary = run_full(
        dir.path(),
        Arc::new(FileContentRecognizer::default()),
        &extractor(Arc::new(EchoBackend::default())),
        &config(ProcessingMode::Sequential),
        &OutputOptions::default(),
    )
    .await
    .unwrap();

    let table = summary.rendered.unwrap();
    assert_eq!(table.path, dir.path().join("B Co-专利信息.xlsx"));
    assert_eq!((table.record_count, table.group_count), (3, 2));
    assert!(fs::read(&table.path).unwrap().starts_with(b"PK"));
}

#[tokio::test]
async fn failures_are_categorized_per_file() {
    let dir = certificate_dir();
    let orchestrator = BatchOrchestrator::new(
        Arc::new(FileContentRecognizer::default()),
        config(ProcessingMode::Sequential),
    );
    let sources = discover_sources(dir.path()).unwrap();
    let report = orchestrator
        .process_all(&extractor(Arc::new(EchoBackend::default())), &sources)
        .await;

    let status_of = |name: &str| {
        report
            .outcomes
            .iter()
            .find(|o| o.file_name() == name)
            .map(|o| o.status.clone())
            .unwrap()
    };

    assert_eq!(status_of("专利-收据.pdf"), FileStatus::Skipped);
    assert!(matches!(
        status_of("d.png"),
        FileStatus::Failed(FileError::CollaboratorUnavailable { .. })
    ));
    assert!(matches!(
        status_of("e.png"),
        FileStatus::Failed(FileError::MalformedReply { .. })
    ));
    match status_of("f.png") {
        FileStatus::Failed(e @ FileError::CollaboratorUnavailable { .. }) => {
            assert!(e.detail().contains("no text"), "{e}");
        }
        other => panic!("expected empty-OCR failure, got {other:?}"),
    }
    match status_of("c.jpg") {
        FileStatus::Extracted(r) => {
            assert_eq!(r.source_path, dir.path().join("c.jpg").to_string_lossy());
            assert_eq!(r.inventors.as_deref(), Some("张三;李四"));
            assert_eq!(r.application_date.as_deref(), Some("2020/01/05"));
        }
        other => panic!("expected a record, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_and_sequential_runs_agree() {
    let dir = certificate_dir();
    let sources = discover_sources(dir.path()).unwrap();

    let run = |mode: ProcessingMode| {
        let sources = sources.clone();
        async move {
            let orchestrator =
                BatchOrchestrator::new(Arc::new(FileContentRecognizer::default()), config(mode));
            orchestrator
                .process_all(&extractor(Arc::new(EchoBackend::default())), &sources)
                .await
                .outcomes
        }
    };

    let sequential = run(ProcessingMode::Sequential).await;
    let concurrent = run(ProcessingMode::Concurrent { workers: Some(4) }).await;
    assert_eq!(sequential, concurrent);
    assert_eq!(
        names(sequential.iter().map(|o| o.path.clone())),
        vec!["a.png", "b.pdf", "c.jpg", "d.png", "e.png", "f.png", "专利-收据.pdf"]
    );
}

#[tokio::test]
async fn side_files_follow_configuration() {
    let dir = certificate_dir();
    let sources = discover_sources(dir.path()).unwrap();
    let backend = Arc::new(EchoBackend::default());

    BatchOrchestrator::new(
        Arc::new(FileContentRecognizer::default()),
        config(ProcessingMode::Sequential),
    )
    .process_all(&extractor(backend.clone()), &sources)
    .await;
    let side = fs::read_to_string(dir.path().join("d_extracted.txt")).unwrap();
    assert_eq!(side, "FAIL");
    assert!(!dir.path().join("f_extracted.txt").exists(), "blank OCR is not saved");
    assert!(!dir.path().join("专利-收据_extracted.txt").exists());

    let quiet = tempfile::tempdir().unwrap();
    let only = quiet.path().join("x.png");
    fs::write(&only, reply("ZL1", "X", "发明", "2020-01-01")).unwrap();
    let cfg = PipelineConfig::builder()
        .write_side_files(false)
        .build()
        .unwrap();
    BatchOrchestrator::new(Arc::new(FileContentRecognizer::default()), cfg)
        .process_all(&extractor(backend), &[only])
        .await;
    assert!(!quiet.path().join("x_extracted.txt").exists());
}

#[tokio::test]
async fn progress_events_cover_every_file() {
    let dir = certificate_dir();
    let progress = Arc::new(RecordingProgress::default());
    let cfg = PipelineConfig::builder()
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let sources = discover_sources(dir.path()).unwrap();
    BatchOrchestrator::new(Arc::new(FileContentRecognizer::default()), cfg)
        .process_all(&extractor(Arc::new(EchoBackend::default())), &sources)
        .await;

    let events = progress.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("start 7"));
    assert_eq!(events.last().map(String::as_str), Some("done 3/1/3"));
    assert!(events.contains(&"skip 专利-收据.pdf".to_string()));
    assert!(events.contains(&"ok b.pdf".to_string()));
    assert!(events.contains(&"err e.png".to_string()));
    assert_eq!(events.len(), 9);
}

#[tokio::test]
async fn run_without_records_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("only.png"), "FAIL").unwrap();
    let out = tempfile::tempdir().unwrap();

    let summary = run_full(
        dir.path(),
        Arc::new(FileContentRecognizer::default()),
        &extractor(Arc::new(EchoBackend::default())),
        &config(ProcessingMode::Sequential),
        &OutputOptions {
            output_dir: Some(out.path().to_path_buf()),
            format: OutputFormat::Csv,
        },
    )
    .await
    .unwrap();

    assert!(summary.rendered.is_none());
    assert_eq!(summary.report.failed(), 1);
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn missing_source_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_full(
        &dir.path().join("nope"),
        Arc::new(FileContentRecognizer::default()),
        &extractor(Arc::new(EchoBackend::default())),
        &config(ProcessingMode::Sequential),
        &OutputOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PatentError::SourceNotFound { .. }));
}

// ── OCR-only and render-only ────────────────────────────────────────────────

#[tokio::test]
async fn ocr_only_includes_every_supported_file() {
    let dir = certificate_dir();
    let recognizer = Arc::new(FileContentRecognizer::default());
    let results = run_ocr_only(
        dir.path(),
        recognizer.clone(),
        &config(ProcessingMode::Concurrent { workers: None }),
    )
    .await
    .unwrap();

    // No name filter in OCR-only mode.
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 7);
    let dump = format_ocr_dump(&results);
    assert!(dump.starts_with("---START_OCR: a.png---\n"));
    assert!(dump.contains("---START_OCR: 专利-收据.pdf---\n"));
    assert!(dump.contains("---START_OCR: f.png---\n(OCR Failed or Empty)\n---END_OCR---\n"));
    assert!(dump.contains("---START_OCR: d.png---\nFAIL\n---END_OCR---\n"));
}

#[tokio::test]
async fn render_only_dedups_and_writes_json() {
    let out = tempfile::tempdir().unwrap();
    let data = r#"[
        {"专利号": "ZL1", "专利权人": "Z Co", "专利类型": "design", "文件路径": "/c/1.pdf"},
        {"专利号": "ZL2", "专利权人": "Z Co", "专利类型": "invention", "文件路径": "/c/2.pdf"},
        {"专利号": "ZL1-again", "专利权人": "Z Co", "专利类型": "design", "文件路径": "/c/1.pdf"},
        {}
    ]"#;
    let outcome = render_json(
        data,
        None,
        &OutputOptions {
            output_dir: Some(out.path().to_path_buf()),
            format: OutputFormat::Json,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.path, out.path().join("Z Co-专利信息.json"));
    assert_eq!(outcome.record_count, 2);
    let doc: serde_json::Value =
        serde_json::from_slice(&fs::read(&outcome.path).unwrap()).unwrap();
    let rows = doc["rows"].as_array().unwrap();
    assert_eq!(rows[0]["专利号"], "ZL2");
    assert_eq!(rows[0]["normalized_type"], "发明专利");
    assert_eq!(rows[1]["normalized_type"], "外观设计专利");
    assert_eq!(rows[1]["专利号"], "ZL1", "first record for a path wins");
    assert_eq!(rows[1]["type_changed"], true);
}

#[tokio::test]
async fn render_only_rejects_garbage() {
    let err = render_json("not json", None, &OutputOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PatentError::InvalidRecords(_)));
}
