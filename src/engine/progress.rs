// Shared progress counters for one job

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Consistent snapshot of the counters, taken under the lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_devices: usize,
    pub completed_devices: usize,
    pub total_commands: usize,
    pub completed_commands: usize,
    pub failed_commands: usize,
    pub failed_devices: usize,
}

/// Monotonic counters shared by every device task of a job
///
/// All mutations happen under one mutex; readers get a copy, never a
/// reference into guarded state. `total_commands` is the upfront estimate
/// (devices x deduplicated request commands) - connect failures can leave
/// `completed_commands` below it, since commands of an unreachable device
/// are never attempted.
pub struct ProgressTracker {
    state: Mutex<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(total_devices: usize, total_commands: usize) -> Self {
        ProgressTracker {
            state: Mutex::new(ProgressSnapshot {
                total_devices,
                total_commands,
                ..Default::default()
            }),
        }
    }

    /// One command attempt finished, success or failure
    pub fn command_finished(&self, failed: bool) -> ProgressSnapshot {
        let mut state = self.state.lock();
        state.completed_commands += 1;
        if failed {
            state.failed_commands += 1;
        }
        *state
    }

    /// One device task finished; called exactly once per device
    pub fn device_finished(&self, failed: bool) -> ProgressSnapshot {
        let mut state = self.state.lock();
        state.completed_devices += 1;
        if failed {
            state.failed_devices += 1;
        }
        *state
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.state.lock()
    }
}
