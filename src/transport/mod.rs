// Command transport - session abstraction over SSH and vendor CLIs

use std::io::Write;
use std::path::Path;

use async_trait::async_trait;

use crate::inventory::Device;
use crate::output::errors::PatrolError;

pub mod cli;
pub mod ssh;

pub use cli::{dialect_for, CliTransport, Dialect};
pub use ssh::SshTransport;

/// One live session to one device
///
/// A session is exclusively owned by its device task and spans every
/// command for that device. Most device CLIs are stateful (prompt, config
/// mode), so commands on one session must never run concurrently.
#[async_trait]
pub trait DeviceSession: Send {
    /// Execute a single read command and return its output
    async fn execute(&mut self, command: &str) -> Result<String, PatrolError>;

    /// Apply a group of commands as one config-mode transaction
    async fn execute_config_set(&mut self, commands: &[String]) -> Result<String, PatrolError>;

    /// Persist the device's running configuration
    async fn save_config(&mut self) -> Result<(), PatrolError>;

    /// Tear down the session; must be called even after failures
    async fn close(&mut self);
}

/// Opens sessions to devices
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        device: &Device,
        session_log: &Path,
    ) -> Result<Box<dyn DeviceSession>, PatrolError>;
}

/// Routes devices to the right transport dialect
///
/// Network devices (switch, router, firewall) get the prompt-driven CLI
/// transport; everything else gets plain SSH exec.
pub struct TransportRouter {
    ssh: SshTransport,
    cli: CliTransport,
}

impl TransportRouter {
    pub fn new(ssh: SshTransport, cli: CliTransport) -> Self {
        TransportRouter { ssh, cli }
    }
}

#[async_trait]
impl Transport for TransportRouter {
    async fn connect(
        &self,
        device: &Device,
        session_log: &Path,
    ) -> Result<Box<dyn DeviceSession>, PatrolError> {
        if device.device_type.is_network() {
            self.cli.connect(device, session_log).await
        } else {
            self.ssh.connect(device, session_log).await
        }
    }
}

/// Append-only per-device session transcript
///
/// Logging failures are swallowed: the transcript is a diagnostic aid and
/// must never fail a command.
pub struct SessionLog {
    file: Option<std::fs::File>,
}

impl SessionLog {
    pub fn create(path: &Path) -> Self {
        let file = match std::fs::File::create(path) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot open session log");
                None
            }
        };
        SessionLog { file }
    }

    pub fn record(&mut self, command: &str, output: &str) {
        if let Some(ref mut file) = self.file {
            let _ = writeln!(file, "Command: {}\n{}", command, output);
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_log_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("web-01__10.0.0.5.log");

        let mut log = SessionLog::create(&path);
        log.record("uptime", "up 3 days");
        log.record("df -h", "/dev/sda1 40%");

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Command: uptime"));
        assert!(content.contains("/dev/sda1 40%"));
    }

    #[test]
    fn test_session_log_tolerates_bad_path() {
        let mut log = SessionLog::create(Path::new("/nonexistent-dir/x.log"));
        // Must not panic
        log.record("uptime", "output");
    }
}
