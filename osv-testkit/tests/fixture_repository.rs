//! Fixture repositories built through git plumbing.

use std::collections::BTreeMap;

use osv_testkit::clock::fixture_epoch;
use osv_testkit::fixtures::{
    FixtureError, FixtureRepository, LocalCloner, RepoCloner, StubCloner, git_available,
};
use osv_testkit::testing::init_test_logging;
use tempfile::TempDir;

fn skip_without_git() -> bool {
    init_test_logging();
    if git_available() {
        return false;
    }
    eprintln!("git not available; skipping");
    true
}

fn files(entries: &[(&str, &str)]) -> BTreeMap<String, Vec<u8>> {
    entries
        .iter()
        .map(|(path, contents)| (path.to_string(), contents.as_bytes().to_vec()))
        .collect()
}

#[test]
fn test_commit_on_top_of_root() {
    if skip_without_git() {
        return;
    }
    let scratch = TempDir::new().unwrap();
    let mut repo = FixtureRepository::create(scratch.path().join("repo")).unwrap();
    let root = repo.head().to_string();
    assert!(repo.parents(&root).unwrap().is_empty());

    repo.add("a/b.txt", "hello").unwrap();
    repo.add("c.txt", "world").unwrap();
    let commit = repo.commit("User", "user@example.com").unwrap();

    assert_eq!(repo.head(), commit);
    assert_eq!(repo.parents(&commit).unwrap(), vec![root.clone()]);
    assert_eq!(
        repo.tree(&commit).unwrap(),
        files(&[("a/b.txt", "hello"), ("c.txt", "world")])
    );
    assert!(repo.tree(&root).unwrap().is_empty());

    let log = repo.log().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].id, commit);
    assert_eq!(log[0].author_name, "User");
    assert_eq!(log[0].author_email, "user@example.com");
    assert_eq!(log[0].message, "Changes");
    assert_eq!(log[1].id, root);
    assert_eq!(log[1].author_name, "OSV");
    assert_eq!(log[1].author_email, "infra@osv.dev");
}

#[test]
fn test_staged_files_carry_into_later_commits() {
    if skip_without_git() {
        return;
    }
    let mut repo = FixtureRepository::temporary().unwrap();
    repo.add("keep.txt", "1").unwrap();
    repo.add("drop.txt", "2").unwrap();
    let first = repo.commit("A", "a@example.com").unwrap();

    repo.remove("drop.txt").unwrap();
    repo.add("keep.txt", "1 changed").unwrap();
    let second = repo
        .commit_with_message("B", "b@example.com", "Drop a file")
        .unwrap();

    assert_eq!(repo.parents(&second).unwrap(), vec![first.clone()]);
    assert_eq!(repo.tree(&second).unwrap(), files(&[("keep.txt", "1 changed")]));
    assert_eq!(
        repo.tree(&first).unwrap(),
        files(&[("drop.txt", "2"), ("keep.txt", "1")])
    );
    assert_eq!(repo.staged_paths().collect::<Vec<_>>(), vec!["keep.txt"]);
    assert_eq!(repo.log().unwrap()[0].message, "Drop a file");
}

#[test]
fn test_commit_without_staged_changes_keeps_tree() {
    if skip_without_git() {
        return;
    }
    let mut repo = FixtureRepository::temporary().unwrap();
    repo.add("x", "x").unwrap();
    let first = repo.commit("A", "a@example.com").unwrap();
    let second = repo.commit("A", "a@example.com").unwrap();

    assert_ne!(first, second);
    assert_eq!(repo.tree(&first).unwrap(), repo.tree(&second).unwrap());
}

#[test]
fn test_remove_unstaged_path_fails() {
    if skip_without_git() {
        return;
    }
    let mut repo = FixtureRepository::temporary().unwrap();
    let head = repo.head().to_string();

    let err = repo.remove("never-added.txt").unwrap_err();
    assert!(matches!(err, FixtureError::PathNotStaged(ref path) if path == "never-added.txt"));
    assert_eq!(repo.head(), head);
}

#[test]
fn test_invalid_paths_are_rejected() {
    if skip_without_git() {
        return;
    }
    let mut repo = FixtureRepository::temporary().unwrap();
    for path in ["", "/etc/passwd", "../escape", "a/../../b", ".git/config", "-rf"] {
        let err = repo.add(path, "x").unwrap_err();
        assert!(
            matches!(err, FixtureError::InvalidPath { .. }),
            "{path:?} gave {err}"
        );
    }
    assert_eq!(repo.staged_paths().count(), 0);
}

#[test]
fn test_identical_scripts_give_identical_ids() {
    if skip_without_git() {
        return;
    }
    let build = || {
        let mut repo = FixtureRepository::temporary().unwrap();
        repo.add("osv/PYSEC-1.yaml", "id: PYSEC-1\n").unwrap();
        repo.commit("User", "user@example.com").unwrap();
        repo.add("osv/PYSEC-2.yaml", "id: PYSEC-2\n").unwrap();
        repo.commit("User", "user@example.com").unwrap();
        repo.log().unwrap()
    };

    let first = build();
    let second = build();
    let ids = |log: &[osv_testkit::fixtures::CommitSummary]| {
        log.iter().map(|c| c.id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));

    let root = first.last().unwrap();
    assert_eq!(root.timestamp, fixture_epoch());
    assert_eq!(first[0].timestamp.timestamp(), fixture_epoch().timestamp() + 2);
}

#[test]
fn test_local_cloner_checks_out_head() {
    if skip_without_git() {
        return;
    }
    let mut repo = FixtureRepository::temporary().unwrap();
    repo.add("README.md", "fixture\n").unwrap();
    repo.commit("User", "user@example.com").unwrap();

    let scratch = TempDir::new().unwrap();
    let dest = scratch.path().join("checkout");
    let url = repo.path().display().to_string();
    let cloned = LocalCloner.clone_repo(&url, &dest).unwrap();

    assert_eq!(cloned, dest);
    assert_eq!(
        std::fs::read_to_string(dest.join("README.md")).unwrap(),
        "fixture\n"
    );
}

#[test]
fn test_stub_cloner_stands_in_for_network_clone() {
    if skip_without_git() {
        return;
    }
    let repo = FixtureRepository::temporary().unwrap();
    let cloner = StubCloner::returning(repo.path());
    let cloner: &dyn RepoCloner = &cloner;

    let scratch = TempDir::new().unwrap();
    let path = cloner
        .clone_repo("https://github.com/example/advisories.git", scratch.path())
        .unwrap();
    assert_eq!(path, repo.path());
}
