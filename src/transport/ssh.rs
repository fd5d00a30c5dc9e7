// Generic SSH transport for server-class devices

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;

use super::{DeviceSession, SessionLog, Transport};
use crate::inventory::Device;
use crate::output::errors::{connect_suggestion, PatrolError};

/// Open and authenticate an SSH session using the device's credentials
///
/// Shared by the plain-exec transport and the prompt-driven CLI transport.
/// The libssh2 timeout stays set afterwards so blocking I/O on the session
/// is bounded by `command_timeout`.
pub(crate) fn open_session(
    device: &Device,
    connect_timeout: Duration,
    command_timeout: Duration,
) -> Result<Session, PatrolError> {
    let address = format!("{}:{}", device.ip, device.port);

    let addr = address.parse().map_err(|e| PatrolError::Connect {
        device: device.name.clone(),
        message: format!("Invalid address {}: {}", address, e),
        suggestion: Some("Check the device's ip and port in the inventory".to_string()),
    })?;

    let tcp =
        TcpStream::connect_timeout(&addr, connect_timeout).map_err(|e| PatrolError::Connect {
            device: device.name.clone(),
            message: format!("Connection failed: {}", e),
            suggestion: connect_suggestion(&e),
        })?;

    let mut session = Session::new().map_err(|e| PatrolError::Connect {
        device: device.name.clone(),
        message: format!("Failed to create SSH session: {}", e),
        suggestion: None,
    })?;

    session.set_tcp_stream(tcp);
    session.set_timeout(connect_timeout.as_millis() as u32);

    session.handshake().map_err(|e| PatrolError::Connect {
        device: device.name.clone(),
        message: format!("SSH handshake failed: {}", e),
        suggestion: Some("Check SSH service is running on the device".to_string()),
    })?;

    // Key auth first when the inventory carries one, then password
    if let Some(ref key) = device.ssh_key {
        session
            .userauth_pubkey_memory(&device.username, None, key, None)
            .ok();
    }

    if !session.authenticated() && !device.password.is_empty() {
        session
            .userauth_password(&device.username, &device.password)
            .ok();
    }

    if !session.authenticated() {
        return Err(PatrolError::Connect {
            device: device.name.clone(),
            message: "Authentication failed".to_string(),
            suggestion: Some(
                "Check the username, password or ssh_key recorded for this device".to_string(),
            ),
        });
    }

    session.set_timeout(command_timeout.as_millis() as u32);
    Ok(session)
}

/// Plain SSH exec transport (one channel per command, one session per device)
pub struct SshTransport {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshTransport {
    pub fn new() -> Self {
        SshTransport {
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(
        &self,
        device: &Device,
        session_log: &Path,
    ) -> Result<Box<dyn DeviceSession>, PatrolError> {
        let session = open_session(device, self.connect_timeout, self.command_timeout)?;
        tracing::info!(device = %device.name, ip = %device.ip, "ssh session established");

        Ok(Box::new(SshDeviceSession {
            session,
            device_name: device.name.clone(),
            log: SessionLog::create(session_log),
        }))
    }
}

/// One authenticated SSH session, reused for every command on the device
pub struct SshDeviceSession {
    session: Session,
    device_name: String,
    log: SessionLog,
}

impl SshDeviceSession {
    fn exec_blocking(&mut self, command: &str) -> Result<String, PatrolError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| PatrolError::Exec {
                device: self.device_name.clone(),
                command: command.to_string(),
                message: format!("Failed to open channel: {}", e),
            })?;

        channel.exec(command).map_err(|e| PatrolError::Exec {
            device: self.device_name.clone(),
            command: command.to_string(),
            message: format!("Failed to execute: {}", e),
        })?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        channel.read_to_string(&mut stdout).ok();
        channel.stderr().read_to_string(&mut stderr).ok();
        channel.wait_close().ok();

        // Fall back to stderr when a command writes nothing to stdout
        let output = if stdout.trim().is_empty() && !stderr.trim().is_empty() {
            stderr
        } else {
            stdout
        };

        self.log.record(command, &output);
        Ok(output)
    }
}

#[async_trait]
impl DeviceSession for SshDeviceSession {
    async fn execute(&mut self, command: &str) -> Result<String, PatrolError> {
        self.exec_blocking(command)
    }

    async fn execute_config_set(&mut self, commands: &[String]) -> Result<String, PatrolError> {
        // Servers have no config mode; a set runs as a serial batch
        let mut combined = String::new();
        for command in commands {
            let output = self.exec_blocking(command)?;
            combined.push_str(&output);
            if !combined.ends_with('\n') {
                combined.push('\n');
            }
        }
        Ok(combined)
    }

    async fn save_config(&mut self) -> Result<(), PatrolError> {
        // Nothing to persist for plain SSH hosts
        Ok(())
    }

    async fn close(&mut self) {
        self.session
            .disconnect(None, "batch execution finished", None)
            .ok();
    }
}
