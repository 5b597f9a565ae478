//! Crate-wide error type for callers that mix components.

use thiserror::Error;

use crate::config::EnvError;
use crate::emulator::EmulatorError;
use crate::fixtures::FixtureError;
use crate::golden::GoldenError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error(transparent)]
    Golden(#[from] GoldenError),

    #[error("Invalid harness configuration:\n{}", format_env_errors(.0))]
    Config(Vec<EnvError>),
}

impl From<Vec<EnvError>> for Error {
    fn from(errors: Vec<EnvError>) -> Self {
        Self::Config(errors)
    }
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_listed() {
        let err = Error::from(vec![
            EnvError::InvalidLogLevel {
                var: "OSV_TEST_LOG_LEVEL".to_string(),
                value: "loud".to_string(),
            },
            EnvError::OutOfRange {
                var: "DATASTORE_EMULATOR_PORT".to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: "65535".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("OSV_TEST_LOG_LEVEL"));
        assert!(text.contains("DATASTORE_EMULATOR_PORT"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_module_errors_convert() {
        let err: Error = FixtureError::PathNotStaged("a.txt".to_string()).into();
        assert_eq!(err.to_string(), "Path is not staged: a.txt");
    }
}
