//! Datastore emulator supervision.
//!
//! - [`watcher`]: readiness detection on the process output
//! - [`supervisor`]: launch, reset and shutdown of one emulator process
//! - [`control`]: HTTP client for the emulator's control endpoints

pub mod control;
pub mod error;
pub mod supervisor;
pub mod watcher;

pub use control::ControlClient;
pub use error::{ControlOp, EmulatorError};
pub use supervisor::{
    EmulatorConfig, EmulatorEnvironment, EmulatorHandle, EmulatorLeftover, READY_INDICATOR,
    TEST_PROJECT_ID,
};
pub use watcher::{OutputLog, ReadinessWatcher, WatchOutcome, WatchReport, watch};
