//! Test harness for the OSV service.
//!
//! - [`emulator`]: supervised datastore emulator with readiness detection
//! - [`fixtures`]: deterministic git repositories and a cloning seam
//! - [`golden`]: golden-output records and comparison
//! - [`clock`]: fixed clock for code that reads the current time
//! - [`config`]: harness settings read from the environment
//! - [`testing`]: test logging and small helpers

pub mod clock;
pub mod config;
pub mod emulator;
pub mod errors;
pub mod fixtures;
pub mod golden;
pub mod testing;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::HarnessSettings;
pub use emulator::{EmulatorConfig, EmulatorEnvironment, EmulatorError, EmulatorHandle};
pub use errors::{Error, Result};
pub use fixtures::{FixtureError, FixtureRepository};
pub use golden::{CompareKind, GoldenComparator, GoldenError, GoldenValue};
