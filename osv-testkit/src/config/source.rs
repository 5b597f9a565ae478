//! Source tracking for configuration values.

use std::fmt;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// Process environment.
    Environment,
    /// Set explicitly through a builder.
    Explicit,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Environment => write!(f, "environment"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

/// A value paired with the source it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Environment variable name when `source` is `Environment`.
    pub var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            var: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            var: Some(var.into()),
        }
    }

    pub fn explicit(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Explicit,
            var: None,
        }
    }

    /// Human-readable origin, e.g. `environment (DATASTORE_EMULATOR_PORT)`.
    pub fn describe_source(&self) -> String {
        match &self.var {
            Some(var) => format!("{} ({var})", self.source),
            None => self.source.to_string(),
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
