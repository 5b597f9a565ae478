//! Fixture builders for repository-based tests.

pub mod cloner;
pub mod error;
mod git;
pub mod repo;

pub use cloner::{LocalCloner, RepoCloner, StubCloner};
pub use error::FixtureError;
pub use git::git_available;
pub use repo::{CommitSummary, FixtureRepository};
