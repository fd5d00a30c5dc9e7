// Execution engine - batch command execution across a device fleet

use serde::{Deserialize, Serialize};

pub mod job;
pub mod progress;
pub mod report;
pub mod scheduler;

pub use job::{
    filter_empty_strings, generate_job_id, BatchRequest, CancelToken, CommandRecord, Job,
    JobRegistry, JobStatus, OsTypeUsage, RecordStatus,
};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use report::{JobRecord, NullRenderer, ReplayRecord, ReportRenderer};
pub use scheduler::{JobScheduler, SchedulerConfig};

/// Which workflow a job belongs to
///
/// The engine is the same either way; the mode picks the command
/// resolution strategy and whether config is persisted after each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Read-only polling: catalog commands filtered by os_type, flat list
    Inspect,
    /// Config-mode changes: named command groups applied as transactions
    #[serde(rename = "config")]
    Configure,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Inspect => "inspect",
            ExecutionMode::Configure => "config",
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inspect" => Ok(ExecutionMode::Inspect),
            "config" | "configure" => Ok(ExecutionMode::Configure),
            other => Err(format!("unknown mode '{}', expected inspect|config", other)),
        }
    }
}

/// Commands resolved for one device, shaped by the execution mode
#[derive(Debug, Clone, PartialEq)]
pub enum CommandSet {
    /// Deduplicated union of catalog and override commands (inspection)
    Flat(Vec<String>),
    /// Named groups applied as config transactions, in order (configuration)
    Grouped(Vec<(String, Vec<String>)>),
}

impl CommandSet {
    /// Number of execution units: commands for Flat, groups for Grouped
    pub fn len(&self) -> usize {
        match self {
            CommandSet::Flat(commands) => commands.len(),
            CommandSet::Grouped(groups) => groups.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names recorded in the per-os-type usage statistics
    pub fn usage_names(&self) -> Vec<String> {
        match self {
            CommandSet::Flat(commands) => commands.clone(),
            CommandSet::Grouped(groups) => groups.iter().map(|(key, _)| key.clone()).collect(),
        }
    }
}
