//! Configuration types for the certificate pipeline.
//!
//! Run behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Provider credentials are kept apart from it:
//! [`Credentials::from_env`] reads the environment exactly once at startup,
//! and [`ProviderSettings::resolve`] turns the user's provider choice into a
//! validated, immutable value that is injected into the extraction backend.
//! Nothing else in the crate reads API keys from the environment.

use crate::error::PatentError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default prefix of recognized text sent to the extraction model, in characters.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 8000;

/// File-name fragments that mark receipts, contracts, notices and other
/// non-certificate paperwork.
pub const NON_CERTIFICATE_KEYWORDS: [&str; 7] = [
    "通知书",
    "收据",
    "合同",
    "检测报告",
    "受理",
    "清单",
    "说明书",
];

/// Configuration for one pipeline run.
///
/// # Example
/// ```rust
/// use patent_table::{PipelineConfig, ProcessingMode};
///
/// let config = PipelineConfig::builder()
///     .mode(ProcessingMode::Concurrent { workers: Some(4) })
///     .max_pages(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 2);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Sequential or concurrent batch processing. Default: sequential.
    pub mode: ProcessingMode,

    /// Characters of recognized text sent to the extraction model. Default: 8000.
    ///
    /// Certificate data sits on the first page; the cap keeps requests well
    /// inside every backend's context window and bounds per-file cost.
    pub max_input_chars: usize,

    /// PDF pages recognized per file. Default: 3.
    pub max_pages: usize,

    /// Longest edge of a rasterised PDF page, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Tesseract language string. Default: `chi_sim+eng`.
    pub ocr_language: String,

    /// Path to a pdfium shared library. Falls back to the working directory,
    /// then the system library search path.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Write `<stem>_extracted.txt` next to each recognized file. Default: true.
    pub write_side_files: bool,

    /// File-name fragments that cause a file to be skipped before OCR.
    pub skip_keywords: Vec<String>,

    /// Sampling temperature for extraction calls. Default: 0.1.
    pub temperature: f32,

    /// Output token cap for backends that require one. Default: 1024.
    pub max_tokens: usize,

    /// Per-request timeout for provider calls, in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// edgequake-llm provider name for the vision recognizer
    /// (e.g. `"openai"`, `"gemini"`). `None` auto-detects from the environment.
    pub vision_provider: Option<String>,

    /// Vision model; used together with `vision_provider`.
    pub vision_model: Option<String>,

    /// Optional per-file progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Sequential,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
            max_pages: 3,
            max_rendered_pixels: 2000,
            ocr_language: "chi_sim+eng".to_string(),
            pdfium_lib_path: None,
            write_side_files: true,
            skip_keywords: NON_CERTIFICATE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            temperature: 0.1,
            max_tokens: 1024,
            api_timeout_secs: 60,
            vision_provider: None,
            vision_model: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("mode", &self.mode)
            .field("max_input_chars", &self.max_input_chars)
            .field("max_pages", &self.max_pages)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("ocr_language", &self.ocr_language)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("write_side_files", &self.write_side_files)
            .field("skip_keywords", &self.skip_keywords)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("vision_provider", &self.vision_provider)
            .field("vision_model", &self.vision_model)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn mode(mut self, mode: ProcessingMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_input_chars(mut self, n: usize) -> Self {
        self.config.max_input_chars = n;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn write_side_files(mut self, v: bool) -> Self {
        self.config.write_side_files = v;
        self
    }

    pub fn skip_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.skip_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn vision_provider(mut self, name: impl Into<String>) -> Self {
        self.config.vision_provider = Some(name.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    /// Fill the vision provider and model from `EDGEQUAKE_LLM_PROVIDER` /
    /// `EDGEQUAKE_MODEL` when neither was set explicitly.
    pub fn vision_defaults(mut self, credentials: &Credentials) -> Self {
        if self.config.vision_provider.is_none() {
            if let Some((provider, model)) = credentials.vision_provider() {
                self.config.vision_provider = Some(provider.to_string());
                self.config.vision_model.get_or_insert_with(|| model.to_string());
            }
        }
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PatentError> {
        let c = &self.config;
        if c.max_input_chars == 0 {
            return Err(PatentError::InvalidConfig(
                "max_input_chars must be ≥ 1".into(),
            ));
        }
        if let ProcessingMode::Concurrent { workers: Some(0) } = c.mode {
            return Err(PatentError::InvalidConfig("Worker count must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(PatentError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the batch orchestrator schedules files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// One file at a time, in lexical path order. (default)
    #[default]
    Sequential,
    /// Bounded pool of independent units. `None` means available
    /// parallelism, capped by the file count.
    Concurrent { workers: Option<usize> },
}

impl ProcessingMode {
    /// Effective pool size for `file_count` files.
    pub fn worker_count(&self, file_count: usize) -> usize {
        match self {
            ProcessingMode::Sequential => 1,
            ProcessingMode::Concurrent { workers } => {
                let n = workers.unwrap_or_else(|| {
                    std::thread::available_parallelism()
                        .map(|n| n.get())
                        .unwrap_or(1)
                });
                n.min(file_count).max(1)
            }
        }
    }
}

/// The three extraction backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Claude,
    OpenAi,
}

impl ProviderKind {
    /// Probe order for automatic selection.
    pub const AUTO_ORDER: [ProviderKind; 3] =
        [ProviderKind::Gemini, ProviderKind::Claude, ProviderKind::OpenAi];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Claude => "claude",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn env_key(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini-1.5-flash",
            ProviderKind::Claude => "claude-3-5-sonnet-20241022",
            ProviderKind::OpenAi => "gpt-3.5-turbo",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = PatentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(PatentError::InvalidConfig(format!(
                "Unknown provider '{other}' (expected gemini, claude or openai)"
            ))),
        }
    }
}

/// The user's provider choice before credentials are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderSelection {
    /// First provider in [`ProviderKind::AUTO_ORDER`] with a key. (default)
    #[default]
    Auto,
    Explicit(ProviderKind),
}

impl FromStr for ProviderSelection {
    type Err = PatentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(ProviderSelection::Auto)
        } else {
            s.parse().map(ProviderSelection::Explicit)
        }
    }
}

/// API keys and endpoint overrides read from the environment.
#[derive(Clone, Default)]
pub struct Credentials {
    gemini: Option<String>,
    anthropic: Option<String>,
    openai: Option<String>,
    openai_base_url: Option<String>,
    vision_provider: Option<String>,
    vision_model: Option<String>,
}

impl Credentials {
    /// Read every provider variable once.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            gemini: get(ProviderKind::Gemini.env_key()),
            anthropic: get(ProviderKind::Claude.env_key()),
            openai: get(ProviderKind::OpenAi.env_key()),
            openai_base_url: get("OPENAI_BASE_URL"),
            vision_provider: get("EDGEQUAKE_LLM_PROVIDER"),
            vision_model: get("EDGEQUAKE_MODEL"),
        }
    }

    pub fn key_for(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Gemini => self.gemini.as_deref(),
            ProviderKind::Claude => self.anthropic.as_deref(),
            ProviderKind::OpenAi => self.openai.as_deref(),
        }
    }

    pub fn openai_base_url(&self) -> Option<&str> {
        self.openai_base_url.as_deref()
    }

    /// Vision provider and model, only when both are set.
    pub fn vision_provider(&self) -> Option<(&str, &str)> {
        self.vision_provider
            .as_deref()
            .zip(self.vision_model.as_deref())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("gemini", &mark(&self.gemini))
            .field("anthropic", &mark(&self.anthropic))
            .field("openai", &mark(&self.openai))
            .field("openai_base_url", &self.openai_base_url)
            .field("vision_provider", &self.vision_provider)
            .field("vision_model", &self.vision_model)
            .finish()
    }
}

/// Command-line overrides applied on top of [`Credentials`].
#[derive(Debug, Clone, Default)]
pub struct ProviderOverrides {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// A fully resolved, validated provider choice.
#[derive(Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    api_key: String,
    /// Endpoint override (OpenAI-compatible servers).
    pub base_url: Option<String>,
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            api_key: api_key.into(),
            base_url: None,
        }
    }

    /// Pick the provider and check its credential.
    ///
    /// `Auto` takes the first provider in [`ProviderKind::AUTO_ORDER`] whose
    /// key is present and falls back to Gemini when none is. An explicit
    /// `--api-key` always wins over the environment. A missing key for the
    /// chosen provider is a configuration error raised before any file is
    /// processed.
    pub fn resolve(
        selection: ProviderSelection,
        credentials: &Credentials,
        overrides: &ProviderOverrides,
    ) -> Result<Self, PatentError> {
        let kind = match selection {
            ProviderSelection::Explicit(kind) => kind,
            ProviderSelection::Auto => ProviderKind::AUTO_ORDER
                .into_iter()
                .find(|k| credentials.key_for(*k).is_some())
                .unwrap_or(ProviderKind::Gemini),
        };

        let api_key = overrides
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| credentials.key_for(kind).map(String::from))
            .ok_or_else(|| PatentError::ProviderNotConfigured {
                provider: kind.name().to_string(),
                hint: format!(
                    "Set {} or pass --api-key. Auto-detection checks GEMINI_API_KEY, \
                     ANTHROPIC_API_KEY and OPENAI_API_KEY in that order.",
                    kind.env_key()
                ),
            })?;

        let model = overrides
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| kind.default_model().to_string());

        let base_url = match kind {
            ProviderKind::OpenAi => overrides
                .base_url
                .clone()
                .or_else(|| credentials.openai_base_url().map(String::from)),
            _ => overrides.base_url.clone(),
        };

        Ok(Self {
            kind,
            model,
            api_key,
            base_url,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
