// Live notification channel for job progress

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Wall-clock timestamp in the wire format clients expect
fn send_time() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Events pushed to the client while a job runs
///
/// Serializes to the JSON wire shapes consumed by report viewers:
/// `progress.update`, `command.result`, `execute.complete` and `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum JobEvent {
    /// Counter snapshot after every command attempt and device completion
    #[serde(rename = "progress.update")]
    ProgressUpdate {
        total: usize,
        completed: usize,
        total_commands: usize,
        completed_commands: usize,
        send_time: String,
    },

    /// One command finished on one device
    #[serde(rename = "command.result")]
    CommandResult {
        device_name: String,
        device_ip: String,
        device_type: String,
        os_type: String,
        command: String,
        result: String,
        send_time: String,
    },

    /// All device tasks joined, report persisted
    #[serde(rename = "execute.complete")]
    ExecuteComplete { report_id: String },

    /// Non-fatal error surfaced to the client
    #[serde(rename = "error")]
    Error { message: String },
}

/// Fire-and-forget sender for job events
///
/// Device tasks never block on delivery; a closed receiver drops events.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<JobEvent>) -> Self {
        EventEmitter { tx }
    }

    /// Emit a progress counter snapshot
    pub fn progress_update(
        &self,
        total: usize,
        completed: usize,
        total_commands: usize,
        completed_commands: usize,
    ) {
        let _ = self.tx.send(JobEvent::ProgressUpdate {
            total,
            completed,
            total_commands,
            completed_commands,
            send_time: send_time(),
        });
    }

    /// Emit a single command result
    #[allow(clippy::too_many_arguments)]
    pub fn command_result(
        &self,
        device_name: String,
        device_ip: String,
        device_type: String,
        os_type: String,
        command: String,
        result: String,
    ) {
        let _ = self.tx.send(JobEvent::CommandResult {
            device_name,
            device_ip,
            device_type,
            os_type,
            command,
            result,
            send_time: send_time(),
        });
    }

    /// Emit the completion notice for a finished job
    pub fn execute_complete(&self, report_id: String) {
        let _ = self.tx.send(JobEvent::ExecuteComplete { report_id });
    }

    /// Emit a non-fatal error
    pub fn error(&self, message: String) {
        let _ = self.tx.send(JobEvent::Error { message });
    }
}

/// Create a new event channel
pub fn create_event_channel() -> (EventEmitter, mpsc::UnboundedReceiver<JobEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventEmitter::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_progress_update_wire_shape() {
        let event = JobEvent::ProgressUpdate {
            total: 4,
            completed: 1,
            total_commands: 12,
            completed_commands: 3,
            send_time: "2026-08-26 10:00:00".to_string(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress.update");
        assert_eq!(json["total"], 4);
        assert_eq!(json["completed_commands"], 3);
    }

    #[test]
    fn test_command_result_wire_shape() {
        let event = JobEvent::CommandResult {
            device_name: "web-01".to_string(),
            device_ip: "10.0.0.5".to_string(),
            device_type: "server".to_string(),
            os_type: "linux".to_string(),
            command: "uptime".to_string(),
            result: " 10:00:00 up 3 days".to_string(),
            send_time: "2026-08-26 10:00:00".to_string(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "command.result");
        assert_eq!(json["device_ip"], "10.0.0.5");
    }

    #[tokio::test]
    async fn test_emitter_does_not_block_on_closed_receiver() {
        let (emitter, rx) = create_event_channel();
        drop(rx);
        // Must not panic or block
        emitter.error("client went away".to_string());
        emitter.execute_complete("abc".to_string());
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (emitter, mut rx) = create_event_channel();
        emitter.progress_update(2, 0, 4, 1);
        emitter.execute_complete("r1".to_string());

        match rx.recv().await.unwrap() {
            JobEvent::ProgressUpdate {
                completed_commands, ..
            } => assert_eq!(completed_commands, 1),
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            JobEvent::ExecuteComplete { report_id } => assert_eq!(report_id, "r1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
