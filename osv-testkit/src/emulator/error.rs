use std::fmt;
use std::time::Duration;

use super::supervisor::EmulatorLeftover;

/// Control-plane operations exposed by the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOp {
    Reset,
    Shutdown,
}

impl ControlOp {
    pub fn path(self) -> &'static str {
        match self {
            Self::Reset => "/reset",
            Self::Shutdown => "/shutdown",
        }
    }
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => write!(f, "reset"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Failures of the emulator supervisor. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("Failed to launch emulator '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The readiness marker never showed up. The process and its data
    /// directory are kept alive in `leftover` for inspection and are cleaned
    /// up when the error is dropped.
    #[error(
        "Datastore emulator did not get ready in {timeout:?}{closed}\n--- captured output ---\n{output}",
        closed = closed_note(.stream_closed)
    )]
    StartupTimeout {
        timeout: Duration,
        stream_closed: bool,
        output: String,
        leftover: Box<EmulatorLeftover>,
    },

    #[error("Emulator {op} request to {url} failed: {source}")]
    Control {
        op: ControlOp,
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("An emulator is already active on {host_port} in this process")]
    AlreadyRunning { host_port: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn closed_note(stream_closed: &bool) -> &'static str {
    if *stream_closed {
        " (output closed early; process likely exited)"
    } else {
        ""
    }
}

impl EmulatorError {
    /// HTTP status for control failures that got a response.
    pub fn control_status(&self) -> Option<u16> {
        match self {
            Self::Control { source, .. } => match source.as_ref() {
                ureq::Error::StatusCode(code) => Some(*code),
                _ => None,
            },
            _ => None,
        }
    }

    /// Output captured before a startup timeout.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::StartupTimeout { output, .. } => Some(output),
            _ => None,
        }
    }
}
