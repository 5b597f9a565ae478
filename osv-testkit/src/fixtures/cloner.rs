//! Repository cloning seam.
//!
//! Code that clones upstream repositories takes a `&dyn RepoCloner`; tests
//! hand it a [`LocalCloner`] pointed at a fixture repository, or a
//! [`StubCloner`] that never touches git.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::error::Result;
use super::git::GitCommand;

pub trait RepoCloner: Send + Sync {
    /// Clone `url` into `dest` and return the checkout path.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<PathBuf>;
}

/// Clones with the git CLI. Works for local paths and `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCloner;

impl RepoCloner for LocalCloner {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        let parent = dest.parent().unwrap_or(Path::new("."));
        let dest_arg = dest.to_string_lossy().into_owned();
        GitCommand::new(parent, ["clone", "-q", "--", url, dest_arg.as_str()]).output()?;
        debug!(url, dest = %dest.display(), "Cloned fixture repository");
        Ok(dest.to_path_buf())
    }
}

type CloneFn = dyn Fn(&str, &Path) -> Result<PathBuf> + Send + Sync;

enum StubBehavior {
    Returns(PathBuf),
    Calls(Box<CloneFn>),
}

/// A cloner that records calls and answers with a preset path or a closure.
pub struct StubCloner {
    behavior: StubBehavior,
    calls: Mutex<Vec<(String, PathBuf)>>,
}

impl StubCloner {
    /// Always return `path`, whatever was asked for.
    pub fn returning(path: impl Into<PathBuf>) -> Self {
        Self::with_behavior(StubBehavior::Returns(path.into()))
    }

    /// Delegate every call to `func`.
    pub fn with<F>(func: F) -> Self
    where
        F: Fn(&str, &Path) -> Result<PathBuf> + Send + Sync + 'static,
    {
        Self::with_behavior(StubBehavior::Calls(Box::new(func)))
    }

    fn with_behavior(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Vec<(String, PathBuf)>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `(url, dest)` of every call so far.
    pub fn calls(&self) -> Vec<(String, PathBuf)> {
        self.guard().clone()
    }
}

impl RepoCloner for StubCloner {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        self.guard().push((url.to_string(), dest.to_path_buf()));
        match &self.behavior {
            StubBehavior::Returns(path) => Ok(path.clone()),
            StubBehavior::Calls(func) => func(url, dest),
        }
    }
}

impl std::fmt::Debug for StubCloner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let behavior = match &self.behavior {
            StubBehavior::Returns(path) => format!("Returns({})", path.display()),
            StubBehavior::Calls(_) => "Calls(..)".to_string(),
        };
        f.debug_struct("StubCloner")
            .field("behavior", &behavior)
            .field("calls", &self.guard().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixtureError, FixtureRepository, git_available};

    #[test]
    fn test_stub_returns_preset_path_and_records_calls() {
        let cloner = StubCloner::returning("/srv/checkout");
        let got = cloner
            .clone_repo("https://example.com/repo.git", Path::new("/tmp/dest"))
            .unwrap();
        assert_eq!(got, PathBuf::from("/srv/checkout"));
        assert_eq!(
            cloner.calls(),
            vec![("https://example.com/repo.git".to_string(), PathBuf::from("/tmp/dest"))]
        );
    }

    #[test]
    fn test_stub_delegates_to_closure() {
        let cloner = StubCloner::with(|url, _dest| Err(FixtureError::PathNotStaged(url.to_string())));
        let dyn_cloner: &dyn RepoCloner = &cloner;
        let err = dyn_cloner.clone_repo("nope", Path::new("/tmp/x")).unwrap_err();
        assert!(matches!(err, FixtureError::PathNotStaged(ref u) if u == "nope"));
    }

    #[test]
    fn test_local_cloner_checks_out_fixture_head() {
        if !git_available() {
            eprintln!("git not available; skipping");
            return;
        }
        let mut repo = FixtureRepository::temporary().unwrap();
        repo.add("README", "fixture").unwrap();
        repo.commit("Tester", "tester@example.com").unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let dest = scratch.path().join("checkout");
        let url = repo.path().to_string_lossy().into_owned();
        let checkout = LocalCloner.clone_repo(&url, &dest).unwrap();

        assert_eq!(std::fs::read_to_string(checkout.join("README")).unwrap(), "fixture");
    }
}
