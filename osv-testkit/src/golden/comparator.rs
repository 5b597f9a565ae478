//! Comparison of actual values against recorded golden records.
//!
//! Each record lives at `<dir>/<test_id>_<case>.txt`. In regenerate mode the
//! actual value is written first and then read back, so a regenerated run
//! still exercises the reader.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use similar::TextDiff;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::reader::{self, ParseError};
use super::render::render;
use super::value::GoldenValue;
use crate::config::HarnessSettings;

/// How an actual value is checked against its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareKind {
    /// Deep equality of two mappings; a mismatch lists the differing keys.
    StructuralEqual,
    /// Equality of two line lists; a mismatch is a unified diff.
    LineDiffEqual,
    /// Plain equality; a mismatch shows both values.
    PlainEqual,
}

impl fmt::Display for CompareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StructuralEqual => write!(f, "structural-equal"),
            Self::LineDiffEqual => write!(f, "line-diff-equal"),
            Self::PlainEqual => write!(f, "plain-equal"),
        }
    }
}

#[derive(Debug, Error)]
pub enum GoldenError {
    /// The actual value differs from the record.
    #[error("{kind} mismatch against {}:\n{report}", .path.display())]
    Mismatch {
        kind: CompareKind,
        path: PathBuf,
        report: String,
    },

    /// The record is corrupt or contains something other than data.
    #[error("Golden record {} could not be loaded: {source}", .path.display())]
    Rejected {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("Golden record {} does not exist; rerun with TESTS_GENERATE=1 to create it", .path.display())]
    Missing { path: PathBuf },

    /// The actual value has no record text that reads back to it.
    #[error("Value for {} cannot be recorded: {reason}", .path.display())]
    Unrepresentable { path: PathBuf, reason: String },

    #[error("Invalid golden key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// The record or the actual value has the wrong shape for the comparison.
    #[error("{kind} needs {expected} values, got {found} ({side}) for {}", .path.display())]
    WrongShape {
        kind: CompareKind,
        path: PathBuf,
        side: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Golden record I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GoldenError {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { source, .. } if source.is_rejection())
    }
}

type Result<T> = std::result::Result<T, GoldenError>;

/// Loads golden records from one directory and compares values against them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldenComparator {
    dir: PathBuf,
    regenerate: bool,
}

impl GoldenComparator {
    pub fn new(dir: impl Into<PathBuf>, regenerate: bool) -> Self {
        Self {
            dir: dir.into(),
            regenerate,
        }
    }

    /// Regenerate mode follows `TESTS_GENERATE`.
    pub fn from_settings(dir: impl Into<PathBuf>, settings: &HarnessSettings) -> Self {
        Self::new(dir, settings.regenerate_golden.value)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn regenerate(&self) -> bool {
        self.regenerate
    }

    /// Location of the record for `(test_id, case)`.
    pub fn record_path(&self, test_id: &str, case: &str) -> Result<PathBuf> {
        validate_key(test_id)?;
        validate_key(case)?;
        Ok(self.dir.join(format!("{test_id}_{case}.txt")))
    }

    /// Compare `actual` with the record for `(test_id, case)`.
    ///
    /// Mismatch reports are also printed to stderr before the error returns.
    pub fn compare(
        &self,
        kind: CompareKind,
        test_id: &str,
        case: &str,
        actual: &GoldenValue,
    ) -> Result<()> {
        let path = self.record_path(test_id, case)?;
        if let Some(reason) = actual.unrepresentable() {
            return Err(GoldenError::Unrepresentable { path, reason });
        }
        let expected = self.load_expected(&path, actual)?;

        let report = match kind {
            CompareKind::StructuralEqual => structural_report(kind, &path, &expected, actual)?,
            CompareKind::LineDiffEqual => line_report(kind, &path, &expected, actual)?,
            CompareKind::PlainEqual => plain_report(&expected, actual),
        };

        match report {
            None => {
                debug!(%kind, path = %path.display(), "Golden record matched");
                Ok(())
            }
            Some(report) => {
                warn!(%kind, path = %path.display(), "Golden record mismatch");
                eprintln!("{report}");
                Err(GoldenError::Mismatch { kind, path, report })
            }
        }
    }

    pub fn expect_map_equal(&self, test_id: &str, case: &str, actual: &GoldenValue) -> Result<()> {
        self.compare(CompareKind::StructuralEqual, test_id, case, actual)
    }

    pub fn expect_lines_equal<S: AsRef<str>>(
        &self,
        test_id: &str,
        case: &str,
        actual_lines: &[S],
    ) -> Result<()> {
        let actual = GoldenValue::lines(actual_lines.iter().map(|l| l.as_ref().to_string()));
        self.compare(CompareKind::LineDiffEqual, test_id, case, &actual)
    }

    pub fn expect_equal(&self, test_id: &str, case: &str, actual: &GoldenValue) -> Result<()> {
        self.compare(CompareKind::PlainEqual, test_id, case, actual)
    }

    fn load_expected(&self, path: &Path, actual: &GoldenValue) -> Result<GoldenValue> {
        let io_err = |source| GoldenError::Io {
            path: path.to_path_buf(),
            source,
        };
        if self.regenerate {
            fs::create_dir_all(&self.dir).map_err(io_err)?;
            let mut text = render(actual);
            text.push('\n');
            fs::write(path, text).map_err(io_err)?;
            info!(path = %path.display(), "Regenerated golden record");
        }

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(GoldenError::Missing {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => return Err(io_err(err)),
        };
        reader::parse(&text).map_err(|source| GoldenError::Rejected {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Keys become file names: ASCII letters, digits, `_`, `-` and `.`, not
/// starting with a dot.
fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason| {
        Err(GoldenError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };
    if key.is_empty() {
        return invalid("empty");
    }
    if key.starts_with('.') {
        return invalid("must not start with '.'");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return invalid("only ASCII letters, digits, '_', '-' and '.' are allowed");
    }
    Ok(())
}

fn unified_diff(expected: &str, actual: &str) -> String {
    TextDiff::from_lines(expected, actual)
        .unified_diff()
        .context_radius(3)
        .header("expected", "actual")
        .to_string()
}

fn joined_lines(lines: &[&str]) -> String {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text
}

fn structural_report(
    kind: CompareKind,
    path: &Path,
    expected: &GoldenValue,
    actual: &GoldenValue,
) -> Result<Option<String>> {
    let shape = |side, value: &GoldenValue| GoldenError::WrongShape {
        kind,
        path: path.to_path_buf(),
        side,
        expected: "dict",
        found: value.kind(),
    };
    let expected_map = expected.as_dict().ok_or_else(|| shape("expected", expected))?;
    let actual_map = actual.as_dict().ok_or_else(|| shape("actual", actual))?;
    if expected_map == actual_map {
        return Ok(None);
    }

    let mut report = String::new();
    for (key, value) in expected_map {
        match actual_map.get(key) {
            None => report.push_str(&format!("- {}: only in expected\n", render(key))),
            Some(other) if other != value => {
                report.push_str(&format!("~ {}: values differ\n", render(key)))
            }
            Some(_) => {}
        }
    }
    for key in actual_map.keys().filter(|k| !expected_map.contains_key(*k)) {
        report.push_str(&format!("+ {}: only in actual\n", render(key)));
    }
    report.push_str(&unified_diff(&render(expected), &render(actual)));
    Ok(Some(report))
}

fn line_report(
    kind: CompareKind,
    path: &Path,
    expected: &GoldenValue,
    actual: &GoldenValue,
) -> Result<Option<String>> {
    let shape = |side, value: &GoldenValue| GoldenError::WrongShape {
        kind,
        path: path.to_path_buf(),
        side,
        expected: "list of str",
        found: value.kind(),
    };
    let expected_lines = expected.as_lines().ok_or_else(|| shape("expected", expected))?;
    let actual_lines = actual.as_lines().ok_or_else(|| shape("actual", actual))?;
    if expected_lines == actual_lines {
        return Ok(None);
    }
    Ok(Some(unified_diff(
        &joined_lines(&expected_lines),
        &joined_lines(&actual_lines),
    )))
}

fn plain_report(expected: &GoldenValue, actual: &GoldenValue) -> Option<String> {
    if expected == actual {
        return None;
    }
    let expected_text = render(expected);
    let actual_text = render(actual);
    Some(format!(
        "expected: {expected_text}\nactual:   {actual_text}\n{}",
        unified_diff(&expected_text, &actual_text)
    ))
}
