//! CLI binary for patent-table.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / `ProviderSettings` and prints results.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use patent_table::{
    build_recognizer, format_ocr_dump, render_json, run_full, run_ocr_only,
    BatchProgressCallback, Credentials, Extractor, OutputFormat, OutputOptions, PipelineConfig,
    ProcessingMode, ProgressCallback, ProviderKind, ProviderOverrides, ProviderSelection,
    ProviderSettings, RecognizerKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar with one log line per file. Files may finish out of
/// order in concurrent mode.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER_TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning for certificates…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed(&self, file: &str) -> String {
        let ms = self
            .start_times
            .lock()
            .map(|mut m| m.remove(file))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.activate_bar(total_files);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_files} files…"))
        ));
    }

    fn on_file_start(&self, file: &str, _index: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(file.to_string(), Instant::now());
        }
        self.bar.set_message(file.to_string());
    }

    fn on_file_skipped(&self, file: &str, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            yellow("↷"),
            index,
            total,
            file,
            dim("skipped (not a certificate)")
        ));
        self.bar.inc(1);
    }

    fn on_file_complete(&self, file: &str, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index,
            total,
            file,
            self.elapsed(file)
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, file: &str, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            index,
            total,
            file,
            red(&msg),
            self.elapsed(file)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, processed: usize, skipped: usize, failed: usize) {
        self.bar.finish_and_clear();
        let mark = if failed == 0 {
            green("✔")
        } else if processed == 0 {
            red("✘")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{} {} processed, {} skipped, {} failed",
            mark,
            bold(&processed.to_string()),
            skipped,
            if failed == 0 {
                failed.to_string()
            } else {
                red(&failed.to_string())
            }
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every certificate under a directory (provider auto-detected)
  patent2table ./certificates

  # Use Claude, four workers, JSON output
  patent2table ./certificates --provider claude --concurrent --workers 4 --format json

  # OpenAI-compatible local server
  patent2table ./certificates --provider openai --base-url http://localhost:8000/v1 --model qwen2.5

  # Print raw OCR text only
  patent2table ./certificates --action ocr-only

  # Render records you already have
  patent2table --action render-only --data '[{"专利号":"ZL1","专利权人":"A Co"}]' --output-dir out/

PROVIDERS (auto mode tries them in this order):
  Provider   Key variable         Default model
  ────────   ──────────────────   ──────────────────────────
  gemini     GEMINI_API_KEY       gemini-1.5-flash
  claude     ANTHROPIC_API_KEY    claude-3-5-sonnet-20241022
  openai     OPENAI_API_KEY       gpt-3.5-turbo

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  ANTHROPIC_API_KEY       Anthropic API key
  OPENAI_API_KEY          OpenAI API key
  OPENAI_BASE_URL         OpenAI-compatible endpoint
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise ./ then system paths)
  EDGEQUAKE_LLM_PROVIDER  Vision recognizer provider (with EDGEQUAKE_MODEL)
  RUST_LOG                Log filter, overrides -v / -q

OUTPUT:
  <holder>-专利信息.xlsx (or .csv / .json) in --output-dir, defaulting to the
  source directory. <holder> is the first holder in file order. In the
  workbook a medium border opens each holder group. Rows are sorted by
  holder, then invention → utility model → design, then newest application
  date. Files whose names contain 通知书, 收据, 合同, 检测报告, 受理, 清单 or
  说明书 are skipped.
"#;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ActionArg {
    Full,
    OcrOnly,
    RenderOnly,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProviderArg {
    Auto,
    Gemini,
    Claude,
    Openai,
}

impl From<ProviderArg> for ProviderSelection {
    fn from(v: ProviderArg) -> Self {
        match v {
            ProviderArg::Auto => ProviderSelection::Auto,
            ProviderArg::Gemini => ProviderSelection::Explicit(ProviderKind::Gemini),
            ProviderArg::Claude => ProviderSelection::Explicit(ProviderKind::Claude),
            ProviderArg::Openai => ProviderSelection::Explicit(ProviderKind::OpenAi),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Xlsx,
    Csv,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Xlsx => OutputFormat::Xlsx,
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RecognizerArg {
    Tesseract,
    Vision,
}

impl From<RecognizerArg> for RecognizerKind {
    fn from(v: RecognizerArg) -> Self {
        match v {
            RecognizerArg::Tesseract => RecognizerKind::Tesseract,
            RecognizerArg::Vision => RecognizerKind::Vision,
        }
    }
}

/// Extract patent certificate data into a sorted, grouped table.
#[derive(Parser, Debug)]
#[command(
    name = "patent2table",
    version,
    about = "Extract patent certificate data into a sorted, grouped table",
    long_about = "Recognize scanned patent certificates (PDF or image) with OCR, extract the \
patent number, title, holder, type, inventors and application date with an LLM (Gemini, \
Claude or any OpenAI-compatible endpoint), and write one table sorted by holder, patent type \
and application date.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Certificate file or directory (searched recursively).
    path: Option<PathBuf>,

    /// What to do.
    #[arg(long, value_enum, env = "PATENT_TABLE_ACTION", default_value = "full")]
    action: ActionArg,

    /// Extraction provider.
    #[arg(long, value_enum, env = "PATENT_TABLE_PROVIDER", default_value = "auto")]
    provider: ProviderArg,

    /// API key for the selected provider (overrides the environment).
    #[arg(long, hide_env_values = true, env = "PATENT_TABLE_API_KEY")]
    api_key: Option<String>,

    /// Model ID (defaults to the provider's default).
    #[arg(long, env = "PATENT_TABLE_MODEL")]
    model: Option<String>,

    /// Endpoint override (OpenAI-compatible servers).
    #[arg(long, env = "PATENT_TABLE_BASE_URL")]
    base_url: Option<String>,

    /// Render-only: records as a JSON object or array.
    #[arg(long, conflicts_with = "data_file")]
    data: Option<String>,

    /// Render-only: read records from this JSON file.
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Directory for the output table.
    #[arg(short, long, env = "PATENT_TABLE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Table format.
    #[arg(long, value_enum, env = "PATENT_TABLE_FORMAT", default_value = "xlsx")]
    format: FormatArg,

    /// Process files concurrently.
    #[arg(long, env = "PATENT_TABLE_CONCURRENT")]
    concurrent: bool,

    /// Worker count in concurrent mode (default: CPU count, capped by file count).
    #[arg(long, env = "PATENT_TABLE_WORKERS")]
    workers: Option<usize>,

    /// OCR engine.
    #[arg(long, value_enum, env = "PATENT_TABLE_RECOGNIZER", default_value = "tesseract")]
    recognizer: RecognizerArg,

    /// Vision recognizer provider (edgequake-llm name, e.g. openai, gemini).
    #[arg(long, env = "PATENT_TABLE_VISION_PROVIDER")]
    vision_provider: Option<String>,

    /// Vision recognizer model.
    #[arg(long, env = "PATENT_TABLE_VISION_MODEL")]
    vision_model: Option<String>,

    /// Tesseract language string.
    #[arg(long, env = "PATENT_TABLE_OCR_LANG", default_value = "chi_sim+eng")]
    ocr_lang: String,

    /// PDF pages recognized per file.
    #[arg(long, env = "PATENT_TABLE_MAX_PAGES", default_value_t = 3)]
    max_pages: usize,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Do not write <stem>_extracted.txt next to each source.
    #[arg(long, env = "PATENT_TABLE_NO_SIDE_FILES")]
    no_side_files: bool,

    /// Characters of OCR text sent to the model.
    #[arg(long, env = "PATENT_TABLE_MAX_INPUT_CHARS", default_value_t = 8000)]
    max_input_chars: usize,

    /// Per-request provider timeout in seconds.
    #[arg(long, env = "PATENT_TABLE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PATENT_TABLE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PATENT_TABLE_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "PATENT_TABLE_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is visible.
    let show_progress = !cli.quiet && !cli.no_progress && cli.action != ActionArg::RenderOnly;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let output = OutputOptions {
        output_dir: cli.output_dir.clone(),
        format: cli.format.into(),
    };

    match cli.action {
        ActionArg::RenderOnly => render_only(&cli, &output).await,
        ActionArg::OcrOnly => {
            let progress = show_progress.then(|| CliProgressCallback::new() as ProgressCallback);
            let config = build_config(&cli, progress, &Credentials::from_env())?;
            let source = require_path(&cli)?;
            let recognizer = build_recognizer(cli.recognizer.into(), &config)
                .await
                .context("Failed to set up OCR")?;
            let results = run_ocr_only(&source, recognizer, &config)
                .await
                .context("OCR failed")?;
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(format_ocr_dump(&results).as_bytes())
                .context("Failed to write to stdout")?;
            Ok(())
        }
        ActionArg::Full => {
            let source = require_path(&cli)?;

            // Credentials are validated before any file is touched.
            let credentials = Credentials::from_env();
            let overrides = ProviderOverrides {
                api_key: cli.api_key.clone(),
                model: cli.model.clone(),
                base_url: cli.base_url.clone(),
            };
            let settings =
                ProviderSettings::resolve(cli.provider.into(), &credentials, &overrides)
                    .context("Provider configuration")?;

            let progress = show_progress.then(|| CliProgressCallback::new() as ProgressCallback);
            let config = build_config(&cli, progress, &credentials)?;
            let extractor =
                Extractor::from_settings(&settings, &config).context("Provider setup")?;
            let recognizer = build_recognizer(cli.recognizer.into(), &config)
                .await
                .context("Failed to set up OCR")?;

            if !cli.quiet {
                eprintln!(
                    "{} {} ({})",
                    dim("Extraction:"),
                    bold(settings.kind.name()),
                    settings.model
                );
            }

            let summary = run_full(&source, recognizer, &extractor, &config, &output)
                .await
                .context("Extraction failed")?;

            if !cli.quiet {
                let report = &summary.report;
                if !show_progress {
                    eprintln!(
                        "Processed {}, skipped {}, failed {} ({} files, {}ms)",
                        report.processed(),
                        report.skipped(),
                        report.failed(),
                        report.total(),
                        summary.duration_ms
                    );
                }
                match &summary.rendered {
                    Some(table) => eprintln!(
                        "{}  {} records in {} holder groups  →  {}",
                        green("✔"),
                        table.record_count,
                        table.group_count,
                        bold(&table.path.display().to_string())
                    ),
                    None => eprintln!("{}  No records extracted; nothing written", yellow("⚠")),
                }
            }
            Ok(())
        }
    }
}

async fn render_only(cli: &Cli, output: &OutputOptions) -> Result<()> {
    let json = match (&cli.data, &cli.data_file) {
        (Some(data), _) => data.clone(),
        (None, Some(file)) => tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read records from {:?}", file))?,
        (None, None) => anyhow::bail!("--data or --data-file is required for --action render-only"),
    };
    let outcome = render_json(&json, cli.path.as_deref(), output)
        .await
        .context("Failed to render records")?;
    if !cli.quiet {
        eprintln!(
            "{}  {} records in {} holder groups  →  {}",
            green("✔"),
            outcome.record_count,
            outcome.group_count,
            bold(&outcome.path.display().to_string())
        );
    }
    Ok(())
}

fn require_path(cli: &Cli) -> Result<PathBuf> {
    cli.path
        .clone()
        .context("A certificate file or directory is required for this action")
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    credentials: &Credentials,
) -> Result<PipelineConfig> {
    let mode = if cli.concurrent || cli.workers.is_some() {
        ProcessingMode::Concurrent {
            workers: cli.workers,
        }
    } else {
        ProcessingMode::Sequential
    };

    let mut builder = PipelineConfig::builder()
        .mode(mode)
        .max_input_chars(cli.max_input_chars)
        .max_pages(cli.max_pages)
        .ocr_language(&cli.ocr_lang)
        .write_side_files(!cli.no_side_files)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_lib_path(path);
    }
    if let Some(ref name) = cli.vision_provider {
        builder = builder.vision_provider(name);
    }
    if let Some(ref model) = cli.vision_model {
        builder = builder.vision_model(model);
    }
    builder = builder.vision_defaults(credentials);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
