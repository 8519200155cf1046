//! Error types for the patent-table library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PatentError`] — **Fatal**: the run cannot proceed at all (missing
//!   credential for the requested provider, source path not found, output
//!   could not be written). Returned as `Err(PatentError)` from the
//!   [`crate::pipeline`] entry points, and raised before any file is touched
//!   whenever it concerns configuration.
//!
//! * [`FileError`] — **Non-fatal**: a single certificate could not be turned
//!   into a record (OCR produced nothing, the provider failed, the reply was
//!   not valid JSON). Stored inside [`crate::batch::FileOutcome`] so the batch
//!   keeps going and the file simply contributes no record.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the patent-table library.
///
/// Per-file failures use [`FileError`] and are stored in
/// [`crate::batch::FileOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PatentError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Source file or directory does not exist.
    #[error("Source not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// Source exists but contains no supported certificate files.
    #[error("No supported certificate files found under '{path}'")]
    NoSources { path: PathBuf },

    /// Records handed to render-only mode could not be parsed or were empty.
    #[error("Invalid record data: {0}")]
    InvalidRecords(String),

    // ── Configuration errors ──────────────────────────────────────────────
    /// The requested provider has no usable credential.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation or flag parsing failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// The rendering sink could not serialise the result set.
    #[error("Failed to render records: {0}")]
    RenderFailed(String),

    /// Could not create or write the output table.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PatentError {
    /// True for errors that are raised while validating configuration,
    /// i.e. before any file has been processed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PatentError::ProviderNotConfigured { .. } | PatentError::InvalidConfig(_)
        )
    }
}

/// A non-fatal error for a single source file.
///
/// The file is excluded from the record set; the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// OCR or the extraction backend produced no usable output
    /// (missing tool, empty text, network or auth failure).
    #[error("{file}: collaborator unavailable: {detail}")]
    CollaboratorUnavailable { file: String, detail: String },

    /// The backend replied but the reply failed structural parsing even
    /// after repair.
    #[error("{file}: malformed reply: {detail}")]
    MalformedReply { file: String, detail: String },
}

impl FileError {
    /// Human-readable cause without the file prefix.
    pub fn detail(&self) -> &str {
        match self {
            FileError::CollaboratorUnavailable { detail, .. }
            | FileError::MalformedReply { detail, .. } => detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_not_configured_display() {
        let e = PatentError::ProviderNotConfigured {
            provider: "gemini".into(),
            hint: "Set GEMINI_API_KEY".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("gemini"), "got: {msg}");
        assert!(msg.contains("GEMINI_API_KEY"), "got: {msg}");
        assert!(e.is_configuration());
    }

    #[test]
    fn source_not_found_is_not_configuration() {
        let e = PatentError::SourceNotFound {
            path: PathBuf::from("/nope"),
        };
        assert!(!e.is_configuration());
        assert!(e.to_string().contains("/nope"));
    }

    #[test]
    fn file_error_display_and_detail() {
        let e = FileError::MalformedReply {
            file: "cert.pdf".into(),
            detail: "expected value at line 1".into(),
        };
        assert!(e.to_string().starts_with("cert.pdf: malformed reply"));
        assert_eq!(e.detail(), "expected value at line 1");
    }
}
