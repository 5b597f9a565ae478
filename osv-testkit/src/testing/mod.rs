//! Helpers for tests that use this crate.

pub mod log;

pub use log::{TestGuard, TestLogEntry, TestLogger, TestPhase, init_test_logging, test_log_dir};

use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Returns true when `program --version` runs successfully.
pub fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// True when a POSIX shell can run stand-in scripts.
pub fn sh_available() -> bool {
    Command::new("sh")
        .args(["-c", "exit 0"])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// A localhost port that was free a moment ago.
pub fn unused_port() -> io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Write an executable shell script `name` into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}"))?;
    let mut perms = std::fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unused_port_is_bindable() {
        let port = unused_port().unwrap();
        assert_ne!(port, 0);
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn test_missing_tool() {
        assert!(!tool_available("osv-testkit-definitely-missing"));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_script_runs() {
        if !sh_available() {
            eprintln!("sh not available; skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "hello.sh", "echo hi\n").unwrap();
        let out = Command::new(&script).output().unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hi\n");
    }
}
