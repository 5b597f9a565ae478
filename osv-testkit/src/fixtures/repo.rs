//! Deterministic git repositories for repository-diffing tests.
//!
//! Content is written straight into the object database and the index; the
//! working tree is never touched. Author and committer dates start at
//! 2021-01-01T00:00:00Z and advance one second per commit, so the same script
//! of `add`/`remove`/`commit` calls always yields the same commit ids.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tracing::{debug, info};

use super::error::{FixtureError, Result};
use super::git::GitCommand;
use crate::clock::FIXTURE_EPOCH_SECS;

pub const FIXTURE_AUTHOR_NAME: &str = "OSV";
pub const FIXTURE_AUTHOR_EMAIL: &str = "infra@osv.dev";
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Changes";

const BLOB_MODE: &str = "100644";

/// One entry of [`FixtureRepository::log`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: String,
    pub parents: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A git repository built up one staged change at a time.
#[derive(Debug)]
pub struct FixtureRepository {
    path: PathBuf,
    head: String,
    /// Staged path -> blob id. Mirrors the index.
    staged: BTreeMap<String, String>,
    commit_count: i64,
    _tempdir: Option<TempDir>,
}

impl FixtureRepository {
    /// Initialize a repository at `path` with an empty root commit authored
    /// by `OSV <infra@osv.dev>`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(path.as_ref().to_path_buf(), None)
    }

    /// Like [`create`](Self::create), in a temporary directory that is removed
    /// when the repository is dropped.
    pub fn temporary() -> Result<Self> {
        let tempdir = tempfile::Builder::new().prefix("osv-fixture-repo-").tempdir()?;
        Self::init(tempdir.path().to_path_buf(), Some(tempdir))
    }

    fn init(path: PathBuf, tempdir: Option<TempDir>) -> Result<Self> {
        fs::create_dir_all(&path)?;
        GitCommand::new(&path, ["init", "-q"]).output()?;
        GitCommand::new(&path, ["symbolic-ref", "HEAD", "refs/heads/main"]).output()?;

        let mut repo = Self {
            path,
            head: String::new(),
            staged: BTreeMap::new(),
            commit_count: 0,
            _tempdir: tempdir,
        };
        let root = repo.write_commit(
            FIXTURE_AUTHOR_NAME,
            FIXTURE_AUTHOR_EMAIL,
            INITIAL_COMMIT_MESSAGE,
            None,
        )?;
        info!(path = %repo.path.display(), commit = %root, "Created fixture repository");
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id of the current HEAD commit.
    pub fn head(&self) -> &str {
        &self.head
    }

    /// Paths currently staged, sorted.
    pub fn staged_paths(&self) -> impl Iterator<Item = &str> {
        self.staged.keys().map(String::as_str)
    }

    /// Stage `contents` at `path`, replacing anything staged there before.
    pub fn add(&mut self, path: &str, contents: impl AsRef<[u8]>) -> Result<()> {
        let path = validate_path(path)?;
        let oid = GitCommand::new(&self.path, ["hash-object", "-w", "--stdin"])
            .stdin(contents.as_ref())
            .text()?;
        GitCommand::new(
            &self.path,
            [
                "update-index",
                "--add",
                "--cacheinfo",
                BLOB_MODE,
                oid.as_str(),
                path.as_str(),
            ],
        )
        .output()?;
        debug!(path = %path, blob = %oid, "Staged fixture file");
        self.staged.insert(path, oid);
        Ok(())
    }

    /// Unstage `path`.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        if !self.staged.contains_key(path) {
            return Err(FixtureError::PathNotStaged(path.to_string()));
        }
        GitCommand::new(&self.path, ["update-index", "--force-remove", path]).output()?;
        self.staged.remove(path);
        debug!(path, "Unstaged fixture file");
        Ok(())
    }

    /// Commit the staged tree on top of HEAD with the message `Changes`.
    pub fn commit(&mut self, author_name: &str, author_email: &str) -> Result<String> {
        self.commit_with_message(author_name, author_email, DEFAULT_COMMIT_MESSAGE)
    }

    /// Commit the staged tree on top of HEAD and move HEAD to it.
    pub fn commit_with_message(
        &mut self,
        author_name: &str,
        author_email: &str,
        message: &str,
    ) -> Result<String> {
        let parent = self.head.clone();
        let commit = self.write_commit(author_name, author_email, message, Some(&parent))?;
        info!(commit = %commit, parent = %parent, files = self.staged.len(), "Committed fixture changes");
        Ok(commit)
    }

    fn write_commit(
        &mut self,
        author_name: &str,
        author_email: &str,
        message: &str,
        parent: Option<&str>,
    ) -> Result<String> {
        let tree = GitCommand::new(&self.path, ["write-tree"]).text()?;

        let mut args = vec!["commit-tree".to_string(), tree];
        if let Some(parent) = parent {
            args.push("-p".to_string());
            args.push(parent.to_string());
        }
        args.push("-m".to_string());
        args.push(message.to_string());

        let date = format!("{} +0000", FIXTURE_EPOCH_SECS + self.commit_count);
        let commit = GitCommand::new(&self.path, args)
            .env("GIT_AUTHOR_NAME", author_name)
            .env("GIT_AUTHOR_EMAIL", author_email)
            .env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_NAME", author_name)
            .env("GIT_COMMITTER_EMAIL", author_email)
            .env("GIT_COMMITTER_DATE", &date)
            .text()?;

        GitCommand::new(&self.path, ["update-ref", "HEAD", commit.as_str()]).output()?;
        self.commit_count += 1;
        self.head = commit.clone();
        Ok(commit)
    }

    /// Parent ids of `commit`; empty for the root.
    pub fn parents(&self, commit: &str) -> Result<Vec<String>> {
        let out = GitCommand::new(&self.path, ["log", "-1", "--format=%P", commit]).text()?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    /// Every file in `commit`'s tree with its content.
    pub fn tree(&self, commit: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let listing = GitCommand::new(&self.path, ["ls-tree", "-r", "-z", commit]).output()?;
        let mut files = BTreeMap::new();
        for entry in listing.split(|b| *b == 0).filter(|e| !e.is_empty()) {
            let entry = String::from_utf8_lossy(entry);
            let (meta, path) = entry.split_once('\t').ok_or_else(|| unexpected("ls-tree", &entry))?;
            let oid = meta
                .split_whitespace()
                .nth(2)
                .ok_or_else(|| unexpected("ls-tree", &entry))?;
            let contents = GitCommand::new(&self.path, ["cat-file", "blob", oid]).output()?;
            files.insert(path.to_string(), contents);
        }
        Ok(files)
    }

    /// History from HEAD, newest first.
    pub fn log(&self) -> Result<Vec<CommitSummary>> {
        let out = GitCommand::new(
            &self.path,
            ["log", "-z", "--format=%H%x1f%P%x1f%an%x1f%ae%x1f%at%x1f%B", "HEAD"],
        )
        .output()?;

        let mut commits = Vec::new();
        for record in out.split(|b| *b == 0).filter(|r| !r.is_empty()) {
            let record = String::from_utf8_lossy(record);
            let fields: Vec<&str> = record.splitn(6, '\x1f').collect();
            let [id, parents, name, email, at, message] = fields[..] else {
                return Err(unexpected("log", &record));
            };
            let timestamp = at
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| unexpected("log", &record))?;
            commits.push(CommitSummary {
                id: id.trim().to_string(),
                parents: parents.split_whitespace().map(str::to_string).collect(),
                author_name: name.to_string(),
                author_email: email.to_string(),
                timestamp,
                message: message.trim_end().to_string(),
            });
        }
        Ok(commits)
    }
}

fn unexpected(command: &str, output: &str) -> FixtureError {
    FixtureError::UnexpectedOutput {
        command: command.to_string(),
        output: output.to_string(),
    }
}

fn validate_path(path: &str) -> Result<String> {
    let invalid = |reason| FixtureError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if path.is_empty() {
        return Err(invalid("empty"));
    }
    if path.starts_with('/') {
        return Err(invalid("must be relative to the repository root"));
    }
    if path.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if path.contains(['\0', '\n']) {
        return Err(invalid("contains a control character"));
    }
    for component in path.split('/') {
        match component {
            "" | "." | ".." => return Err(invalid("empty or relative component")),
            ".git" => return Err(invalid("'.git' is reserved")),
            _ => {}
        }
    }
    Ok(path.to_string())
}
