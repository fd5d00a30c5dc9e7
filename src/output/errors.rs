// Human-readable error messages for Patrol

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // Check NO_COLOR environment variable first (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Check if stderr is a TTY (errors are typically written to stderr)
    std::io::stderr().is_terminal()
}

/// All error types in Patrol
#[derive(Debug)]
pub enum PatrolError {
    /// I/O errors
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// Device or command lookup failures
    Inventory {
        message: String,
        suggestion: Option<String>,
    },

    /// Session connect errors (TCP, handshake, authentication)
    Connect {
        device: String,
        message: String,
        suggestion: Option<String>,
    },

    /// Per-command execution errors
    Exec {
        device: String,
        command: String,
        message: String,
    },

    /// Job-level errors (malformed request, unreadable replay record)
    Job {
        message: String,
        suggestion: Option<String>,
    },

    /// Timeout errors
    Timeout {
        operation: String,
        duration_secs: u64,
    },
}

impl PatrolError {
    /// Single-line summary without formatting, for records and events
    pub fn brief(&self) -> String {
        match self {
            PatrolError::Io { message, path } => match path {
                Some(path) => format!("{} ({})", message, path.display()),
                None => message.clone(),
            },
            PatrolError::Inventory { message, .. } => message.clone(),
            PatrolError::Connect {
                device, message, ..
            } => format!("{}: {}", device, message),
            PatrolError::Exec {
                command, message, ..
            } => format!("{}: {}", command, message),
            PatrolError::Job { message, .. } => message.clone(),
            PatrolError::Timeout {
                operation,
                duration_secs,
            } => format!("{} timed out after {}s", operation, duration_secs),
        }
    }
}

impl std::error::Error for PatrolError {}

impl fmt::Display for PatrolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Set color mode based on TTY detection and NO_COLOR
        let use_colors = should_use_colors();
        if !use_colors {
            colored::control::set_override(false);
        }

        match self {
            PatrolError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }

            PatrolError::Inventory {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "INVENTORY ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            PatrolError::Connect {
                device,
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "CONNECT ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Device:".dimmed(), device)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            PatrolError::Exec {
                device,
                command,
                message,
            } => {
                writeln!(f, "{}: {}", "EXEC ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Device:".dimmed(), device)?;
                writeln!(f, "  {} {}", "Command:".dimmed(), command)?;
                Ok(())
            }

            PatrolError::Job {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "JOB ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            PatrolError::Timeout {
                operation,
                duration_secs,
            } => {
                writeln!(
                    f,
                    "{}: {} timed out after {}s",
                    "TIMEOUT".red().bold(),
                    operation,
                    duration_secs
                )?;
                Ok(())
            }
        }
    }
}

/// Suggest common fixes for connect failures
pub fn connect_suggestion(e: &std::io::Error) -> Option<String> {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Some("Ensure the SSH service is running on the device".to_string())
        }
        std::io::ErrorKind::TimedOut => {
            Some("Check network connectivity and firewall rules".to_string())
        }
        std::io::ErrorKind::PermissionDenied => {
            Some("Check credentials and key permissions".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        let err = PatrolError::Connect {
            device: "core-sw-01".to_string(),
            message: "Authentication failed".to_string(),
            suggestion: Some("Check credentials".to_string()),
        };

        let output = format!("{}", err);
        // Strip ANSI codes for comparison
        let clean_output = console::strip_ansi_codes(&output);

        assert!(clean_output.contains("CONNECT ERROR"));
        assert!(clean_output.contains("core-sw-01"));
        assert!(clean_output.contains("Check credentials"));
    }

    #[test]
    fn test_timeout_display() {
        let err = PatrolError::Timeout {
            operation: "command 'display version'".to_string(),
            duration_secs: 30,
        };

        let clean = console::strip_ansi_codes(&format!("{}", err)).to_string();
        assert!(clean.contains("timed out after 30s"));
    }
}
