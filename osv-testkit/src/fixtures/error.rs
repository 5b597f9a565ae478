use thiserror::Error;

/// Errors from building or inspecting a fixture repository.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Path is not staged: {0}")]
    PathNotStaged(String),

    #[error("Invalid repository path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("git {} failed ({status}): {stderr}", .args.join(" "))]
    Git {
        args: Vec<String>,
        status: String,
        stderr: String,
    },

    #[error("Unexpected git output for '{command}': {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("Failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FixtureError>;
