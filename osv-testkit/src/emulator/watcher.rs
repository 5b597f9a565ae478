//! Readiness detection on a child process's output stream.
//!
//! A dedicated reader thread drains the stream for the whole life of the
//! process (a child blocked on a full pipe never becomes ready), appends every
//! line to a shared [`OutputLog`], and fires a one-shot signal on the first
//! line containing the readiness marker.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Append-only record of every line read from a stream.
///
/// Cloning shares the underlying buffer; the reader thread keeps appending
/// after the waiting side has moved on.
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        // Lines are only ever pushed, so a poisoned buffer is still consistent.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, line: String) {
        self.guard().push(line);
    }

    /// Copy of the lines captured so far.
    pub fn lines(&self) -> Vec<String> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Captured output as text, one line per entry.
    pub fn text(&self) -> String {
        let lines = self.guard();
        let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// How a wait for readiness ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The marker was seen.
    Ready,
    /// The deadline passed with the stream still open.
    TimedOut,
    /// The stream hit end-of-file before the marker appeared.
    StreamClosed,
}

/// Result of waiting on a [`ReadinessWatcher`].
#[derive(Debug, Clone)]
pub struct WatchReport {
    pub outcome: WatchOutcome,
    /// Output captured at the moment the wait ended.
    pub output: String,
    pub waited: Duration,
    /// Live log; keeps growing while the reader runs.
    pub log: OutputLog,
}

impl WatchReport {
    pub fn is_ready(&self) -> bool {
        self.outcome == WatchOutcome::Ready
    }
}

enum ReaderEvent {
    Ready,
    Closed,
}

/// One-shot readiness signal. Consumed on first fire.
struct ReadinessSignal {
    sender: Option<SyncSender<ReaderEvent>>,
}

impl ReadinessSignal {
    fn fire(&mut self, event: ReaderEvent) {
        if let Some(sender) = self.sender.take() {
            // Capacity 1 and a single send: never blocks. A dropped receiver
            // just means nobody is waiting anymore.
            let _ = sender.try_send(event);
        }
    }

    fn fired(&self) -> bool {
        self.sender.is_none()
    }
}

/// Background line reader plus the waiting side of its readiness signal.
pub struct ReadinessWatcher {
    indicator: String,
    log: OutputLog,
    events: Receiver<ReaderEvent>,
    resolved: Option<WatchOutcome>,
    reader: Option<JoinHandle<()>>,
}

impl ReadinessWatcher {
    /// Start draining `stream` on a background thread.
    pub fn spawn<R>(stream: R, indicator: impl Into<String>) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let indicator = indicator.into();
        let log = OutputLog::new();
        let (sender, events) = mpsc::sync_channel(1);

        let reader_log = log.clone();
        let reader_indicator = indicator.clone();
        let reader = thread::Builder::new()
            .name("emulator-output".to_string())
            .spawn(move || {
                let signal = ReadinessSignal {
                    sender: Some(sender),
                };
                read_lines(stream, &reader_indicator, &reader_log, signal);
            })?;

        Ok(Self {
            indicator,
            log,
            events,
            resolved: None,
            reader: Some(reader),
        })
    }

    pub fn indicator(&self) -> &str {
        &self.indicator
    }

    pub fn log(&self) -> &OutputLog {
        &self.log
    }

    /// Block until the marker is seen, the stream closes, or `timeout` passes.
    ///
    /// Once `Ready` or `StreamClosed` has been observed, later calls return it
    /// immediately.
    pub fn wait(&mut self, timeout: Duration) -> WatchReport {
        let started = Instant::now();
        let outcome = match self.resolved {
            Some(outcome) => outcome,
            None => {
                let outcome = match self.events.recv_timeout(timeout) {
                    Ok(ReaderEvent::Ready) => WatchOutcome::Ready,
                    Ok(ReaderEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                        WatchOutcome::StreamClosed
                    }
                    Err(RecvTimeoutError::Timeout) => WatchOutcome::TimedOut,
                };
                if outcome != WatchOutcome::TimedOut {
                    self.resolved = Some(outcome);
                }
                outcome
            }
        };
        let waited = started.elapsed();
        debug!(
            indicator = %self.indicator,
            ?outcome,
            waited_ms = waited.as_millis() as u64,
            lines = self.log.len(),
            "Readiness wait finished"
        );
        WatchReport {
            outcome,
            output: self.log.text(),
            waited,
            log: self.log.clone(),
        }
    }

    /// True once the reader thread has hit end-of-file.
    pub fn reader_finished(&self) -> bool {
        self.reader.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the reader thread to exit. Only returns once the stream's
    /// writers have all closed, i.e. after the child process is gone.
    pub fn join(&mut self) {
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            warn!(indicator = %self.indicator, "Output reader thread panicked");
        }
    }

    /// Let the reader run on its own; it exits at end-of-file.
    pub fn detach(mut self) -> OutputLog {
        self.reader.take();
        self.log.clone()
    }
}

fn read_lines<R: Read>(stream: R, indicator: &str, log: &OutputLog, mut signal: ReadinessSignal) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                trace!(target: "osv_testkit::emulator::output", "{line}");
                let matched = !signal.fired() && line.contains(indicator);
                log.push(line);
                if matched {
                    signal.fire(ReaderEvent::Ready);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(error = %err, "Output stream read failed; treating as end of stream");
                break;
            }
        }
    }
    signal.fire(ReaderEvent::Closed);
}

/// Watch `stream` for `indicator` for at most `timeout`.
///
/// The reader keeps draining after this returns; `report.log` follows it.
pub fn watch<R>(stream: R, indicator: &str, timeout: Duration) -> io::Result<WatchReport>
where
    R: Read + Send + 'static,
{
    let mut watcher = ReadinessWatcher::spawn(stream, indicator)?;
    let report = watcher.wait(timeout);
    watcher.detach();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_ready_on_marker_line() {
        let input = "booting\nloading index\nDev App Server is now running.\nextra\n";
        let report = watch(Cursor::new(input), "is now running", Duration::from_secs(5)).unwrap();
        assert!(report.is_ready());
        assert!(report.output.contains("booting\n"));
        assert!(report.output.contains("Dev App Server is now running."));
    }

    #[test]
    fn test_stream_closed_before_marker_does_not_hang() {
        let started = Instant::now();
        let report = watch(Cursor::new("one\ntwo\n"), "never", Duration::from_secs(30)).unwrap();
        assert_eq!(report.outcome, WatchOutcome::StreamClosed);
        assert!(!report.is_ready());
        assert_eq!(report.output, "one\ntwo\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_with_open_stream_keeps_partial_output() {
        let (reader, mut writer) = io::pipe().unwrap();
        writeln!(writer, "starting up").unwrap();

        let mut watcher = ReadinessWatcher::spawn(reader, "is now running").unwrap();
        let timeout = Duration::from_millis(300);
        let report = watcher.wait(timeout);

        assert_eq!(report.outcome, WatchOutcome::TimedOut);
        assert!(report.waited >= Duration::from_millis(250));
        assert_eq!(report.log.lines(), vec!["starting up".to_string()]);

        drop(writer);
        watcher.join();
        assert!(watcher.reader_finished());
    }

    #[test]
    fn test_fires_once_and_keeps_draining() {
        let (reader, mut writer) = io::pipe().unwrap();
        let mut watcher = ReadinessWatcher::spawn(reader, "READY").unwrap();
        writeln!(writer, "READY 1").unwrap();

        let first = watcher.wait(Duration::from_secs(5));
        assert!(first.is_ready());

        writeln!(writer, "READY 2").unwrap();
        writeln!(writer, "after").unwrap();
        drop(writer);
        watcher.join();

        let second = watcher.wait(Duration::from_millis(10));
        assert!(second.is_ready());
        assert_eq!(
            watcher.log().lines(),
            vec!["READY 1".to_string(), "READY 2".to_string(), "after".to_string()]
        );
    }

    #[test]
    fn test_crlf_and_unterminated_last_line() {
        let report = watch(
            Cursor::new(b"alpha\r\nbeta is now running".to_vec()),
            "is now running",
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(report.is_ready());
        assert_eq!(
            report.log.lines(),
            vec!["alpha".to_string(), "beta is now running".to_string()]
        );
    }

    mod proptest_watch {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn marker_at_line_k_captures_prefix(
                before in prop::collection::vec("[a-z ]{0,16}", 0..8),
                after in prop::collection::vec("[a-z ]{0,16}", 0..8),
            ) {
                let marker = "IS-NOW-RUNNING";
                let mut lines = before.clone();
                lines.push(format!("server {marker}"));
                lines.extend(after);
                let input = lines.join("\n") + "\n";

                let report = watch(Cursor::new(input), marker, Duration::from_secs(5)).unwrap();
                prop_assert!(report.is_ready());
                let captured = report.log.lines();
                prop_assert!(captured.len() > before.len());
                prop_assert_eq!(&captured[..before.len()], &before[..]);
            }
        }
    }
}
