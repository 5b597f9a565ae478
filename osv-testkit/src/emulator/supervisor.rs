//! Datastore emulator process lifecycle.
//!
//! One [`EmulatorHandle`] owns the emulator child process, its ephemeral data
//! directory and the readiness watcher draining its output. Collaborators
//! discover the emulator through the [`EmulatorEnvironment`] value the handle
//! hands out; the harness never writes to its own process environment.
//!
//! Only one emulator may be active per (host, port) in a test process. This is
//! enforced at `start` with [`EmulatorError::AlreadyRunning`] and lifted by
//! `stop`.
//!
//! On Unix the emulator leads its own process group. A terminal Ctrl-C aimed
//! at the harness does not reach it, so `stop` can still ask it to shut down,
//! and the kill fallback takes the launcher's children (gcloud's java
//! process) down with it.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use super::control::ControlClient;
use super::error::EmulatorError;
use super::watcher::{OutputLog, ReadinessWatcher, WatchOutcome};
use crate::config::HarnessSettings;
use crate::config::settings::{
    DEFAULT_BINARY, DEFAULT_CONTROL_TIMEOUT, DEFAULT_LAUNCHER_ARGS, DEFAULT_PORT,
    DEFAULT_STARTUP_TIMEOUT,
};

pub const READY_INDICATOR: &str = "is now running";
pub const TEST_PROJECT_ID: &str = "test-osv";

/// How long a shut-down emulator gets to exit on its own before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Launch parameters for the datastore emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub program: String,
    /// Arguments placed before the fixed emulator flags.
    pub launcher_args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub project_id: String,
    pub ready_indicator: String,
    pub startup_timeout: Duration,
    pub control_timeout: Duration,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_BINARY.to_string(),
            launcher_args: DEFAULT_LAUNCHER_ARGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            project_id: TEST_PROJECT_ID.to_string(),
            ready_indicator: READY_INDICATOR.to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }
}

impl EmulatorConfig {
    /// `OSV_EMULATOR_BINARY` replaces the program and
    /// `OSV_EMULATOR_LAUNCHER_ARGS` the `beta emulators datastore start`
    /// prefix; set the latter empty when the binary is the emulator itself.
    pub fn from_settings(settings: &HarnessSettings) -> Self {
        Self {
            program: settings.emulator_binary.value.clone(),
            launcher_args: settings.launcher_args.value.clone(),
            port: settings.emulator_port.value,
            startup_timeout: settings.startup_timeout.value,
            control_timeout: settings.control_timeout.value,
            ..Self::default()
        }
    }

    /// Replace the launcher, e.g. with a stand-in script in tests.
    pub fn with_program<I, S>(mut self, program: impl Into<String>, launcher_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = program.into();
        self.launcher_args = launcher_args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn with_ready_indicator(mut self, indicator: impl Into<String>) -> Self {
        self.ready_indicator = indicator.into();
        self
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full argument list: launcher arguments followed by the fixed flags.
    pub fn emulator_args(&self, data_dir: &Path) -> Vec<String> {
        let mut args = self.launcher_args.clone();
        args.extend([
            "--consistency=1.0".to_string(),
            format!("--host-port={}", self.host_port()),
            format!("--project={}", self.project_id),
            "--no-store-on-disk".to_string(),
            format!("--data-dir={}", data_dir.display()),
        ]);
        args
    }
}

/// Discovery values for code talking to the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorEnvironment {
    pub emulator_host: String,
    pub project_id: String,
}

impl EmulatorEnvironment {
    pub const HOST_VAR: &'static str = "DATASTORE_EMULATOR_HOST";
    pub const PROJECT_VAR: &'static str = "DATASTORE_PROJECT_ID";
    pub const CLOUD_PROJECT_VAR: &'static str = "GOOGLE_CLOUD_PROJECT";

    pub fn for_config(config: &EmulatorConfig) -> Self {
        Self {
            emulator_host: config.host_port(),
            project_id: config.project_id.clone(),
        }
    }

    pub fn vars(&self) -> [(&'static str, &str); 3] {
        [
            (Self::HOST_VAR, self.emulator_host.as_str()),
            (Self::PROJECT_VAR, self.project_id.as_str()),
            (Self::CLOUD_PROJECT_VAR, self.project_id.as_str()),
        ]
    }

    /// Point a child process at the emulator.
    pub fn apply_to<'a>(&self, command: &'a mut Command) -> &'a mut Command {
        for (key, value) in self.vars() {
            command.env(key, value);
        }
        command
    }

    /// `export KEY=VALUE` lines for a shell.
    pub fn export_lines(&self) -> String {
        self.vars()
            .iter()
            .map(|(key, value)| format!("export {key}={value}\n"))
            .collect()
    }
}

fn active_host_ports() -> &'static Mutex<HashSet<String>> {
    static ACTIVE: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Reservation of a (host, port) for one emulator; released on drop.
#[derive(Debug)]
struct HostPortClaim {
    host_port: String,
}

impl HostPortClaim {
    fn acquire(host_port: String) -> Result<Self, EmulatorError> {
        let mut active = active_host_ports()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(host_port.clone()) {
            return Err(EmulatorError::AlreadyRunning { host_port });
        }
        Ok(Self { host_port })
    }
}

impl Drop for HostPortClaim {
    fn drop(&mut self) {
        active_host_ports()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.host_port);
    }
}

/// Kill a child and everything in its process group, then reap it.
fn terminate_child(child: &mut Child) {
    let pid = child.id();
    #[cfg(unix)]
    kill_process_group(pid);
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(pid, ?status, "Emulator already exited");
            return;
        }
        Ok(None) => {}
        Err(err) => warn!(pid, error = %err, "Failed to poll emulator status"),
    }
    if let Err(err) = child.kill() {
        warn!(pid, error = %err, "Failed to kill emulator");
    }
    match child.wait() {
        Ok(status) => debug!(pid, ?status, "Emulator terminated"),
        Err(err) => warn!(pid, error = %err, "Failed to wait for emulator"),
    }
}

/// SIGKILL the group the emulator leads. The leader's pid is the group id.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    if pgid == 0 {
        return;
    }
    match Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => debug!(pgid, "Killed emulator process group"),
        Ok(status) => debug!(pgid, ?status, "Emulator process group already gone"),
        Err(err) => warn!(pgid, error = %err, "Failed to signal emulator process group"),
    }
}

/// Wait up to `grace` for the child to exit, then kill it.
fn reap_child(child: &mut Child, grace: Duration) {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), ?status, "Emulator exited after shutdown");
                // Launcher children that outlived it.
                #[cfg(unix)]
                kill_process_group(child.id());
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(50)),
            Ok(None) => {
                warn!(pid = child.id(), "Emulator still running after shutdown; killing");
                terminate_child(child);
                return;
            }
            Err(err) => {
                warn!(pid = child.id(), error = %err, "Failed to poll emulator; killing");
                terminate_child(child);
                return;
            }
        }
    }
}

/// The process and data directory of an emulator that failed to start.
///
/// Kept alive so the failure can be inspected; dropping it kills the process
/// and removes the directory.
#[derive(Debug)]
pub struct EmulatorLeftover {
    pid: u32,
    child: Option<Child>,
    data_dir: Option<TempDir>,
    log: OutputLog,
    _claim: HostPortClaim,
}

impl EmulatorLeftover {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_ref().map(TempDir::path)
    }

    /// Output the process has produced, including lines after the timeout.
    pub fn output_log(&self) -> &OutputLog {
        &self.log
    }

    pub fn is_running(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    /// Kill the process and delete the data directory. Idempotent.
    pub fn cleanup(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate_child(&mut child);
        }
        if let Some(dir) = self.data_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(path = %path.display(), error = %err, "Failed to remove emulator data dir");
            }
        }
    }
}

impl Drop for EmulatorLeftover {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// A running, ready datastore emulator.
pub struct EmulatorHandle {
    pid: u32,
    child: Option<Child>,
    data_dir: Option<TempDir>,
    config: EmulatorConfig,
    environment: EmulatorEnvironment,
    control: ControlClient,
    watcher: ReadinessWatcher,
    claim: Option<HostPortClaim>,
}

impl EmulatorHandle {
    /// Launch the emulator and block until it reports readiness.
    ///
    /// On timeout the returned [`EmulatorError::StartupTimeout`] carries the
    /// captured output and keeps the process around until it is dropped.
    pub fn start(config: EmulatorConfig) -> Result<Self, EmulatorError> {
        let claim = HostPortClaim::acquire(config.host_port())?;
        let environment = EmulatorEnvironment::for_config(&config);
        let data_dir = tempfile::Builder::new()
            .prefix("osv-datastore-")
            .tempdir()?;
        let args = config.emulator_args(data_dir.path());

        info!(
            program = %config.program,
            host_port = %config.host_port(),
            data_dir = %data_dir.path().display(),
            "Starting datastore emulator"
        );

        // stdout and stderr share one pipe so the watcher sees a single
        // interleaved stream.
        let (reader, writer) = io::pipe()?;
        let stderr_writer = writer.try_clone()?;
        let mut command = Command::new(&config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer);
        environment.apply_to(&mut command);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| EmulatorError::SpawnFailed {
            program: config.program.clone(),
            source,
        })?;
        // Release our copies of the write end so EOF follows the child.
        drop(command);
        let pid = child.id();
        debug!(pid, "Emulator process spawned");

        let mut watcher = match ReadinessWatcher::spawn(reader, config.ready_indicator.clone()) {
            Ok(watcher) => watcher,
            Err(err) => {
                terminate_child(&mut child);
                return Err(err.into());
            }
        };

        let report = watcher.wait(config.startup_timeout);
        if report.outcome != WatchOutcome::Ready {
            let stream_closed = report.outcome == WatchOutcome::StreamClosed;
            error!(
                pid,
                timeout_ms = config.startup_timeout.as_millis() as u64,
                stream_closed,
                "Datastore emulator did not get ready in time"
            );
            eprintln!("{}", report.output);
            return Err(EmulatorError::StartupTimeout {
                timeout: config.startup_timeout,
                stream_closed,
                output: report.output,
                leftover: Box::new(EmulatorLeftover {
                    pid,
                    child: Some(child),
                    data_dir: Some(data_dir),
                    log: watcher.detach(),
                    _claim: claim,
                }),
            });
        }

        info!(
            pid,
            waited_ms = report.waited.as_millis() as u64,
            "Datastore emulator is ready"
        );
        let control = ControlClient::new(&config.host, config.port, config.control_timeout);
        Ok(Self {
            pid,
            child: Some(child),
            data_dir: Some(data_dir),
            config,
            environment,
            control,
            watcher,
            claim: Some(claim),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn environment(&self) -> &EmulatorEnvironment {
        &self.environment
    }

    pub fn control(&self) -> &ControlClient {
        &self.control
    }

    /// False once `stop` has run.
    pub fn is_ready(&self) -> bool {
        self.child.is_some()
    }

    /// Ephemeral data directory; `None` after it has been released.
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.path().to_path_buf())
    }

    pub fn output_log(&self) -> &OutputLog {
        self.watcher.log()
    }

    /// Everything the emulator has printed so far.
    pub fn captured_output(&self) -> String {
        self.watcher.log().text()
    }

    /// Clear all emulator data between test cases.
    pub fn reset(&self) -> Result<(), EmulatorError> {
        self.control.reset()
    }

    /// Shut the emulator down and delete its data directory.
    ///
    /// A second call is a no-op. If the shutdown request fails the process
    /// group is killed, the directory is released, and the original error is
    /// returned. The (host, port) is free for a new `start` either way.
    pub fn stop(&mut self) -> Result<(), EmulatorError> {
        let Some(mut child) = self.child.take() else {
            debug!(pid = self.pid, "Emulator already stopped");
            return Ok(());
        };

        info!(pid = self.pid, port = self.config.port, "Stopping datastore emulator");
        let result = self.shut_down(&mut child);
        self.claim = None;
        result
    }

    fn shut_down(&mut self, child: &mut Child) -> Result<(), EmulatorError> {
        match self.control.shutdown() {
            Ok(()) => {
                reap_child(child, SHUTDOWN_GRACE);
                self.release_data_dir()?;
                Ok(())
            }
            Err(err) => {
                error!(pid = self.pid, error = %err, "Emulator shutdown failed; terminating process");
                terminate_child(child);
                if let Err(cleanup_err) = self.release_data_dir() {
                    warn!(error = %cleanup_err, "Data dir cleanup after failed shutdown also failed");
                }
                Err(err)
            }
        }
    }

    fn release_data_dir(&mut self) -> Result<(), EmulatorError> {
        if let Some(dir) = self.data_dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()?;
            debug!(path = %path.display(), "Removed emulator data dir");
        }
        Ok(())
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!(pid = self.pid, "Emulator handle dropped without stop(); killing process");
            terminate_child(&mut child);
        }
        // Any remaining TempDir removes itself here.
    }
}
