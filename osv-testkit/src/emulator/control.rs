//! HTTP client for the emulator's reset/shutdown endpoints.

use std::time::Duration;

use tracing::{debug, warn};
use ureq::Agent;

use super::error::{ControlOp, EmulatorError};

/// Blocking client for `POST /reset` and `POST /shutdown`.
#[derive(Debug, Clone)]
pub struct ControlClient {
    base_url: String,
    agent: Agent,
}

impl ControlClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            // The control plane is always local; never route it through a proxy.
            .proxy(None)
            .build();
        Self {
            base_url: format!("http://{host}:{port}"),
            agent: Agent::new_with_config(config),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Wipe all emulator data. A failure here breaks isolation between test
    /// cases, so it is always surfaced.
    pub fn reset(&self) -> Result<(), EmulatorError> {
        self.post(ControlOp::Reset)
    }

    pub fn shutdown(&self) -> Result<(), EmulatorError> {
        self.post(ControlOp::Shutdown)
    }

    fn post(&self, op: ControlOp) -> Result<(), EmulatorError> {
        let url = format!("{}{}", self.base_url, op.path());
        debug!(%url, %op, "Sending emulator control request");
        match self.agent.post(&url).send_empty() {
            Ok(response) => {
                debug!(%url, status = response.status().as_u16(), "Control request succeeded");
                Ok(())
            }
            Err(source) => {
                warn!(%url, %op, error = %source, "Control request failed");
                Err(EmulatorError::Control {
                    op,
                    url,
                    source: Box::new(source),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_base_url() {
        let client = ControlClient::new("localhost", 8002, Duration::from_secs(1));
        assert_eq!(client.base_url(), "http://localhost:8002");
    }

    #[test]
    fn test_connection_refused_is_control_error() {
        let port = unused_port();
        let client = ControlClient::new("127.0.0.1", port, Duration::from_secs(2));
        let err = client.reset().unwrap_err();
        match &err {
            EmulatorError::Control { op, url, .. } => {
                assert_eq!(*op, ControlOp::Reset);
                assert_eq!(url, &format!("http://127.0.0.1:{port}/reset"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.control_status(), None);
    }
}
