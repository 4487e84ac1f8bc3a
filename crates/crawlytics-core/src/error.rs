//! Error types for line parsing, summarizing and aggregation.

use std::path::PathBuf;

use thiserror::Error;

use crate::parse::LineKind;

/// A line that was classified as `kind` but broke that kind's format contract.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("line is not in the {kind} format")]
    Format { kind: LineKind },

    #[error("{kind} line has {found} fields, expected {expected}")]
    FieldCount {
        kind: LineKind,
        expected: usize,
        found: usize,
    },

    #[error("{kind} line is missing field {index}")]
    MissingField { kind: LineKind, index: usize },

    #[error("{kind} field '{field}' is not a valid number: {value:?}")]
    InvalidNumber {
        kind: LineKind,
        field: &'static str,
        value: String,
    },

    #[error("{kind} timestamp is not in %Y-%m-%d %H:%M:%S format: {value:?}")]
    InvalidTimestamp { kind: LineKind, value: String },
}

/// Failures while turning a line source into typed summaries.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("log file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("log path is a directory: {}", .0.display())]
    IsDirectory(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line_number}: {source}")]
    Parse {
        line_number: usize,
        #[source]
        source: ParseError,
    },
}

/// Statistics failures while folding rollups.
#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    /// Mean over an empty sequence is undefined.
    #[error("cannot compute mean of {field}: no data points")]
    EmptyMean { field: &'static str },
}

/// Invalid caller-supplied inputs (dates, paths).
#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("invalid date {value:?}, expected format {format}")]
    InvalidDate { value: String, format: &'static str },
}
