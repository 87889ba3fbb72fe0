use std::io;

use thiserror::Error;

/// Document-level failures. Anything that goes wrong on a single page or row
/// is reported through [`crate::Diagnostics`] instead.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to load PDF: {0}")]
    PdfLoad(#[from] lopdf::Error),

    #[error("PDF is encrypted and could not be opened without a password")]
    Encrypted,

    #[error("PDF has no pages")]
    EmptyDocument,

    #[error("invalid page selection: {0}")]
    InvalidPageSelection(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("no pages available after applying selection")]
    NoPagesSelected,
}

/// Failures of the rasterize/recognize services. These never leave the OCR
/// tier; each one becomes a per-page diagnostics event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OcrError {
    #[error("{0} is not installed or not on PATH")]
    Unavailable(&'static str),

    #[error("failed to run {tool}: {message}")]
    Spawn { tool: &'static str, message: String },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unreadable OCR output: {0}")]
    Unreadable(String),

    #[error("OCR worker stopped without a result")]
    WorkerLost,
}
