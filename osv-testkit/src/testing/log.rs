//! Test logging: a process-wide tracing subscriber plus per-test JSONL logs.
//!
//! ```ignore
//! use osv_testkit::testing::init_test_logging;
//!
//! #[test]
//! fn test_with_logs() {
//!     init_test_logging();
//!     tracing::info!(port = 8002, "Starting");
//! }
//! ```
//!
//! `OSV_TEST_LOG_LEVEL` picks the level for this crate's targets (default
//! `info`; `trace` includes every emulator output line). Events also go to
//! `target/test-logs/osv_tests.jsonl`, or to `OSV_TEST_LOG_FILE` when set.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, Once};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing_subscriber::prelude::*;

use crate::config::EnvParser;
use crate::config::settings::LOG_LEVEL_VAR;

pub const LOG_FILE_VAR: &str = "OSV_TEST_LOG_FILE";
pub const PER_TEST_LOGS_VAR: &str = "OSV_TEST_LOGGING";

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls do nothing.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let level = EnvParser::new().get_log_level(LOG_LEVEL_VAR, "info").value;

        let file_layer = open_shared_log().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        });
        let test_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "osv_testkit={level},osv_emulator={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(test_layer);
        // Another subscriber may already be installed by the test binary.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn open_shared_log() -> Option<File> {
    let path = match EnvParser::new().get_optional_path(LOG_FILE_VAR).value {
        Some(path) => path,
        None => test_log_dir().join("osv_tests.jsonl"),
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    File::create(path).ok()
}

/// `target/test-logs`, found via `CARGO_TARGET_DIR` or by walking up from
/// the working directory.
pub fn test_log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(dir).join("test-logs");
    }
    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target.join("test-logs");
        }
        if !cwd.pop() {
            return PathBuf::from("target").join("test-logs");
        }
    }
}

/// Stage of a test a log entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    Setup,
    Execute,
    Verify,
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execute => write!(f, "execute"),
            Self::Verify => write!(f, "verify"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// One line of a per-test JSONL log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    pub timestamp: String,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub elapsed_ms: u64,
}

/// Records the phases of one test to `target/test-logs/<test>.jsonl` and to
/// tracing.
pub struct TestLogger {
    test_name: String,
    started: Instant,
    entries: Mutex<Vec<TestLogEntry>>,
    file: Option<Mutex<File>>,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        let safe_name = test_name.replace("::", "_").replace(['/', '\\'], "_");
        let dir = test_log_dir();
        let file = std::fs::create_dir_all(&dir)
            .and_then(|()| File::create(dir.join(format!("{safe_name}.jsonl"))))
            .ok();

        let logger = Self {
            test_name: test_name.to_string(),
            started: Instant::now(),
            entries: Mutex::new(Vec::new()),
            file: file.map(Mutex::new),
        };
        logger.log(TestPhase::Setup, "TEST START");
        logger
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        self.record(phase, message.into(), None);
    }

    pub fn log_with_data(&self, phase: TestPhase, message: impl Into<String>, data: serde_json::Value) {
        self.record(phase, message.into(), Some(data));
    }

    fn guard(&self) -> MutexGuard<'_, Vec<TestLogEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, phase: TestPhase, message: String, data: Option<serde_json::Value>) {
        let entry = TestLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_name: self.test_name.clone(),
            phase,
            message,
            data,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };

        if let Some(file) = &self.file
            && let Ok(mut file) = file.lock()
            && let Ok(json) = serde_json::to_string(&entry)
        {
            let _ = writeln!(file, "{json}");
        }
        tracing::info!(
            test = %self.test_name,
            phase = %entry.phase,
            elapsed_ms = entry.elapsed_ms,
            "{}",
            entry.message
        );
        self.guard().push(entry);
    }

    pub fn entries(&self) -> Vec<TestLogEntry> {
        self.guard().clone()
    }

    pub fn pass(self) {
        self.log(TestPhase::Verify, "TEST PASS");
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.log_with_data(
            TestPhase::Verify,
            "TEST FAIL",
            serde_json::json!({ "reason": reason.into() }),
        );
    }
}

/// Logs TEST PASS on drop, or TEST FAIL when dropped while panicking.
///
/// Inert unless `OSV_TEST_LOGGING` is truthy, or `CI` is set and
/// `OSV_TEST_LOGGING` is not falsy.
pub struct TestGuard {
    inner: Option<TestLogger>,
}

impl TestGuard {
    pub fn new(test_name: &str) -> Self {
        let inner = Self::enabled().then(|| {
            init_test_logging();
            TestLogger::for_test(test_name)
        });
        Self { inner }
    }

    fn enabled() -> bool {
        let mut parser = EnvParser::new();
        let explicit = parser.get_bool(PER_TEST_LOGS_VAR, false);
        if parser.has_errors() {
            return false;
        }
        match explicit.source {
            crate::config::ConfigSource::Environment => explicit.value,
            _ => std::env::var_os("CI").is_some(),
        }
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        if let Some(logger) = &self.inner {
            logger.log(phase, message);
        }
    }

    pub fn log_with_data(&self, phase: TestPhase, message: impl Into<String>, data: serde_json::Value) {
        if let Some(logger) = &self.inner {
            logger.log_with_data(phase, message, data);
        }
    }
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        if let Some(logger) = self.inner.take() {
            if std::thread::panicking() {
                logger.fail("test panicked");
            } else {
                logger.pass();
            }
        }
    }
}

/// A [`TestGuard`] named after the enclosing function.
#[macro_export]
macro_rules! test_guard {
    () => {{
        fn __here() {}
        fn __name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __name_of(__here);
        let name = name.strip_suffix("::__here").unwrap_or(name);
        let name = name.rsplit("::").next().unwrap_or(name);
        $crate::testing::TestGuard::new(name)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_phase_in_snake_case() {
        let entry = TestLogEntry {
            timestamp: "2021-01-01T00:00:00+00:00".to_string(),
            test_name: "emulator_start".to_string(),
            phase: TestPhase::Teardown,
            message: "stopping".to_string(),
            data: None,
            elapsed_ms: 12,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"phase\":\"teardown\""));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_logger_records_start_and_messages() {
        let logger = TestLogger::for_test("osv_testkit::testing::logger_records");
        logger.log(TestPhase::Execute, "running");
        logger.log_with_data(TestPhase::Verify, "checked", serde_json::json!({"ok": true}));

        let entries = logger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "TEST START");
        assert_eq!(entries[2].data, Some(serde_json::json!({"ok": true})));
        logger.pass();
    }

    #[test]
    fn test_guard_without_logger_is_inert() {
        let guard = TestGuard { inner: None };
        guard.log(TestPhase::Execute, "ignored");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        tracing::debug!("logging initialized twice");
    }
}
