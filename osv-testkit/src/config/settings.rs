//! Harness-wide settings resolved from the environment.

use super::env::{EnvError, EnvParser};
use super::source::Sourced;
use std::time::Duration;

pub const PORT_VAR: &str = "DATASTORE_EMULATOR_PORT";
pub const BINARY_VAR: &str = "OSV_EMULATOR_BINARY";
pub const LAUNCHER_ARGS_VAR: &str = "OSV_EMULATOR_LAUNCHER_ARGS";
pub const STARTUP_TIMEOUT_VAR: &str = "OSV_EMULATOR_STARTUP_TIMEOUT_SECS";
pub const CONTROL_TIMEOUT_VAR: &str = "OSV_EMULATOR_CONTROL_TIMEOUT_SECS";
pub const REGENERATE_VAR: &str = "TESTS_GENERATE";
pub const LOG_LEVEL_VAR: &str = "OSV_TEST_LOG_LEVEL";

pub const DEFAULT_PORT: u16 = 8002;
pub const DEFAULT_BINARY: &str = "gcloud";
pub const DEFAULT_LAUNCHER_ARGS: [&str; 4] = ["beta", "emulators", "datastore", "start"];
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Every knob the harness reads from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSettings {
    pub emulator_port: Sourced<u16>,
    pub emulator_binary: Sourced<String>,
    /// Arguments placed before the emulator flags; empty when the binary is
    /// the emulator itself rather than gcloud.
    pub launcher_args: Sourced<Vec<String>>,
    pub startup_timeout: Sourced<Duration>,
    pub control_timeout: Sourced<Duration>,
    /// Rewrite golden records from actual values instead of reading them.
    pub regenerate_golden: Sourced<bool>,
    pub log_level: Sourced<String>,
}

impl HarnessSettings {
    /// Read all settings, reporting every invalid variable at once.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::new();
        let control = ControlSettings::parse(&mut parser);
        let settings = Self {
            emulator_port: control.emulator_port,
            emulator_binary: parser.get_string(BINARY_VAR, DEFAULT_BINARY),
            launcher_args: parser.get_args(LAUNCHER_ARGS_VAR, &DEFAULT_LAUNCHER_ARGS),
            startup_timeout: seconds(parser.get_u64_range(
                STARTUP_TIMEOUT_VAR,
                DEFAULT_STARTUP_TIMEOUT.as_secs(),
                1,
                600,
            )),
            control_timeout: control.control_timeout,
            regenerate_golden: parser.get_bool(REGENERATE_VAR, false),
            log_level: parser.get_log_level(LOG_LEVEL_VAR, "info"),
        };
        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(settings)
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            emulator_port: Sourced::default_value(DEFAULT_PORT),
            emulator_binary: Sourced::default_value(DEFAULT_BINARY.to_string()),
            launcher_args: Sourced::default_value(
                DEFAULT_LAUNCHER_ARGS.iter().map(|s| s.to_string()).collect(),
            ),
            startup_timeout: Sourced::default_value(DEFAULT_STARTUP_TIMEOUT),
            control_timeout: Sourced::default_value(DEFAULT_CONTROL_TIMEOUT),
            regenerate_golden: Sourced::default_value(false),
            log_level: Sourced::default_value("info".to_string()),
        }
    }
}

/// What a client needs to reach an emulator that is already running.
///
/// Parsed on its own so control commands are not blocked by unrelated
/// settings such as `TESTS_GENERATE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSettings {
    pub emulator_port: Sourced<u16>,
    pub control_timeout: Sourced<Duration>,
}

impl ControlSettings {
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::new();
        let settings = Self::parse(&mut parser);
        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(settings)
    }

    fn parse(parser: &mut EnvParser) -> Self {
        Self {
            emulator_port: parser.get_port(PORT_VAR, DEFAULT_PORT),
            control_timeout: seconds(parser.get_u64_range(
                CONTROL_TIMEOUT_VAR,
                DEFAULT_CONTROL_TIMEOUT.as_secs(),
                1,
                120,
            )),
        }
    }
}

fn seconds(raw: Sourced<u64>) -> Sourced<Duration> {
    Sourced {
        value: Duration::from_secs(raw.value),
        source: raw.source,
        var: raw.var,
    }
}
