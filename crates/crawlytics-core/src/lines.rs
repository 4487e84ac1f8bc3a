//! Line sources for the summarizers and dated local log files.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::{InputError, SummaryError};

/// Date format used in log file names and CLI arguments.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Where a summarizer reads its lines from.
///
/// A `File` source is opened on every call to [`LineSource::lines`], so the
/// same source can feed several summaries.
#[derive(Debug, Clone, PartialEq)]
pub enum LineSource {
    File(PathBuf),
    Lines(Vec<String>),
}

impl LineSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        LineSource::File(path.into())
    }

    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LineSource::Lines(lines.into_iter().map(Into::into).collect())
    }

    /// Iterate the source lazily, one line at a time.
    pub fn iter(&self) -> Result<LineIter<'_>, SummaryError> {
        match self {
            LineSource::File(path) => Ok(LineIter::File {
                path,
                lines: read_lines(path)?,
            }),
            LineSource::Lines(lines) => Ok(LineIter::Memory(lines.iter())),
        }
    }
}

impl From<Vec<String>> for LineSource {
    fn from(lines: Vec<String>) -> Self {
        LineSource::Lines(lines)
    }
}

impl From<PathBuf> for LineSource {
    fn from(path: PathBuf) -> Self {
        LineSource::File(path)
    }
}

pub enum LineIter<'a> {
    File {
        path: &'a Path,
        lines: Lines<BufReader<File>>,
    },
    Memory(std::slice::Iter<'a, String>),
}

impl Iterator for LineIter<'_> {
    type Item = Result<String, SummaryError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            LineIter::File { path, lines } => lines.next().map(|line| {
                line.map(|line| strip_line_terminator(&line).to_string())
                    .map_err(|source| SummaryError::Io {
                        path: path.to_path_buf(),
                        source,
                    })
            }),
            LineIter::Memory(iter) => iter
                .next()
                .map(|line| Ok(strip_line_terminator(line).to_string())),
        }
    }
}

/// Drop one trailing `\n` or `\r\n`, as fetched messages often keep theirs.
fn strip_line_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Open a log file for line-by-line reading.
pub fn read_lines(path: &Path) -> Result<Lines<BufReader<File>>, SummaryError> {
    if !path.exists() {
        return Err(SummaryError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Err(SummaryError::IsDirectory(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| SummaryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file).lines())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    fn file_prefix(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, InputError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| InputError::InvalidDate {
        value: value.to_string(),
        format: DATE_FORMAT,
    })
}

/// Error raised by [`log_file_path`].
#[derive(Debug, thiserror::Error)]
pub enum LogPathError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
}

/// Path of the dated log file for `level`: `<logs_dir>/info.log.<date>` or
/// `<logs_dir>/error.log.<date>`. The file must exist.
pub fn log_file_path(
    date: &str,
    logs_dir: &Path,
    level: LogLevel,
) -> Result<PathBuf, LogPathError> {
    let date = parse_date(date)?;
    let path = logs_dir.join(format!(
        "{}.log.{}",
        level.file_prefix(),
        date.format(DATE_FORMAT)
    ));
    if !path.is_file() {
        return Err(SummaryError::NotFound(path).into());
    }
    Ok(path)
}
