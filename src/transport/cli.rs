// Prompt-driven CLI transport for network devices

use std::io::{Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use ssh2::{Channel, Session};

use super::ssh::open_session;
use super::{DeviceSession, SessionLog, Transport};
use crate::inventory::Device;
use crate::output::errors::PatrolError;

/// A CLI prompt: last line ending in `>`, `]`, `#` or `$`
static PROMPT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[>\]#\$]\s*$").unwrap());

/// Per-vendor CLI behavior
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    pub name: &'static str,
    pub disable_paging: Option<&'static str>,
    pub config_enter: &'static str,
    pub config_exit: &'static str,
    pub save_command: &'static str,
    pub save_confirm: Option<&'static str>,
}

static CISCO_IOS: Dialect = Dialect {
    name: "cisco_ios",
    disable_paging: Some("terminal length 0"),
    config_enter: "configure terminal",
    config_exit: "end",
    save_command: "write memory",
    save_confirm: None,
};

static HP_COMWARE: Dialect = Dialect {
    name: "hp_comware",
    disable_paging: Some("screen-length disable"),
    config_enter: "system-view",
    config_exit: "return",
    save_command: "save force",
    save_confirm: None,
};

static HUAWEI: Dialect = Dialect {
    name: "huawei",
    disable_paging: Some("screen-length 0 temporary"),
    config_enter: "system-view",
    config_exit: "return",
    save_command: "save",
    save_confirm: Some("y"),
};

/// Map an inventory os_type to a dialect
///
/// Every `huawei*` os_type collapses onto the huawei dialect; unknown
/// network os_types fall back to IOS-style handling.
pub fn dialect_for(os_type: &str) -> &'static Dialect {
    if os_type.starts_with("huawei") {
        &HUAWEI
    } else if os_type == "hp_comware" {
        &HP_COMWARE
    } else {
        &CISCO_IOS
    }
}

/// Strip the echoed command and the trailing prompt from raw channel output
fn clean_output(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().collect();

    if let Some(first) = lines.first() {
        if first.trim() == command.trim() {
            lines.remove(0);
        }
    }

    if let Some(last) = lines.last() {
        if PROMPT_RE.is_match(last) {
            lines.pop();
        }
    }

    lines.join("\n")
}

/// Vendor CLI transport over an interactive shell channel
pub struct CliTransport {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl CliTransport {
    pub fn new() -> Self {
        CliTransport {
            connect_timeout: Duration::from_secs(20),
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

impl Default for CliTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for CliTransport {
    async fn connect(
        &self,
        device: &Device,
        session_log: &Path,
    ) -> Result<Box<dyn DeviceSession>, PatrolError> {
        let session = open_session(device, self.connect_timeout, self.command_timeout)?;

        let mut channel = session.channel_session().map_err(|e| PatrolError::Connect {
            device: device.name.clone(),
            message: format!("Failed to open shell channel: {}", e),
            suggestion: None,
        })?;

        channel
            .request_pty("vt100", None, Some((200, 80, 0, 0)))
            .map_err(|e| PatrolError::Connect {
                device: device.name.clone(),
                message: format!("PTY request failed: {}", e),
                suggestion: None,
            })?;

        channel.shell().map_err(|e| PatrolError::Connect {
            device: device.name.clone(),
            message: format!("Failed to start shell: {}", e),
            suggestion: None,
        })?;

        let dialect = dialect_for(&device.os_type);
        tracing::info!(
            device = %device.name,
            ip = %device.ip,
            dialect = dialect.name,
            "cli session established"
        );

        let mut cli = CliSession {
            session,
            channel,
            device_name: device.name.clone(),
            dialect,
            command_timeout: self.command_timeout,
            log: SessionLog::create(session_log),
        };

        // Drain the login banner up to the first prompt, then kill paging
        cli.read_until_prompt("login banner")?;
        if let Some(paging) = dialect.disable_paging {
            cli.run(paging)?;
        }

        Ok(Box::new(cli))
    }
}

/// One interactive shell session to a network device
pub struct CliSession {
    session: Session,
    channel: Channel,
    device_name: String,
    dialect: &'static Dialect,
    command_timeout: Duration,
    log: SessionLog,
}

impl CliSession {
    fn send_line(&mut self, line: &str) -> Result<(), PatrolError> {
        self.session.set_blocking(true);
        self.channel
            .write_all(format!("{}\n", line).as_bytes())
            .and_then(|_| self.channel.flush())
            .map_err(|e| PatrolError::Exec {
                device: self.device_name.clone(),
                command: line.to_string(),
                message: format!("Failed to send command: {}", e),
            })
    }

    /// Accumulate channel output until the prompt reappears
    fn read_until_prompt(&mut self, operation: &str) -> Result<String, PatrolError> {
        let deadline = Instant::now() + self.command_timeout;
        let mut output = String::new();
        let mut buf = [0u8; 4096];

        self.session.set_blocking(false);
        let result = loop {
            match self.channel.read(&mut buf) {
                // EOF without a prompt: return what we have
                Ok(0) => {
                    if self.channel.eof() {
                        break Ok(output);
                    }
                }
                Ok(n) => {
                    output.push_str(&String::from_utf8_lossy(&buf[..n]));
                    if let Some(last) = output.lines().last() {
                        if PROMPT_RE.is_match(last) {
                            break Ok(output);
                        }
                    }
                    continue;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    break Err(PatrolError::Exec {
                        device: self.device_name.clone(),
                        command: operation.to_string(),
                        message: format!("Channel read failed: {}", e),
                    })
                }
            }

            if Instant::now() >= deadline {
                break Err(PatrolError::Timeout {
                    operation: format!("{} on {}", operation, self.device_name),
                    duration_secs: self.command_timeout.as_secs(),
                });
            }

            std::thread::sleep(Duration::from_millis(20));
        };
        self.session.set_blocking(true);
        result
    }

    fn run(&mut self, command: &str) -> Result<String, PatrolError> {
        self.send_line(command)?;
        let raw = self.read_until_prompt(command)?;
        let output = clean_output(&raw, command);
        self.log.record(command, &output);
        Ok(output)
    }
}

#[async_trait]
impl DeviceSession for CliSession {
    async fn execute(&mut self, command: &str) -> Result<String, PatrolError> {
        self.run(command)
    }

    async fn execute_config_set(&mut self, commands: &[String]) -> Result<String, PatrolError> {
        let mut combined = String::new();

        combined.push_str(&self.run(self.dialect.config_enter)?);
        for command in commands {
            combined.push('\n');
            combined.push_str(&self.run(command)?);
        }
        combined.push('\n');
        combined.push_str(&self.run(self.dialect.config_exit)?);

        Ok(combined)
    }

    async fn save_config(&mut self) -> Result<(), PatrolError> {
        self.send_line(self.dialect.save_command)?;
        if let Some(confirm) = self.dialect.save_confirm {
            // Give the device a moment to raise its confirmation prompt
            std::thread::sleep(Duration::from_millis(500));
            self.send_line(confirm)?;
        }
        let raw = self.read_until_prompt(self.dialect.save_command)?;
        self.log.record(self.dialect.save_command, &raw);
        Ok(())
    }

    async fn close(&mut self) {
        self.channel.send_eof().ok();
        self.channel.close().ok();
        self.session
            .disconnect(None, "batch execution finished", None)
            .ok();
    }
}
