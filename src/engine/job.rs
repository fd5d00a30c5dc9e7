// Job model: batch requests, runtime state, registry

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::progress::ProgressTracker;
use super::ExecutionMode;

/// Drop empty-string artifacts left by client-side join/split encoding
pub fn filter_empty_strings(list: Vec<String>) -> Vec<String> {
    list.into_iter().filter(|item| !item.is_empty()).collect()
}

/// Generate a process-unique, collision-resistant job id
pub fn generate_job_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    // Timestamp + random suffix for uniqueness
    let random: u32 = rand::random();
    format!("{:x}_{:x}", now, random)
}

/// One user-initiated batch execution request
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchRequest {
    pub device_ids: Vec<String>,
    pub command_ids: Vec<String>,
    /// Free-text override commands for server-class devices
    pub server_commands: Vec<String>,
    /// Free-text override commands for network-class devices
    pub network_commands: Vec<String>,
}

impl BatchRequest {
    /// Strip empty-string artifacts from every list
    pub fn normalized(self) -> Self {
        BatchRequest {
            device_ids: filter_empty_strings(self.device_ids),
            command_ids: filter_empty_strings(self.command_ids),
            server_commands: filter_empty_strings(self.server_commands),
            network_commands: filter_empty_strings(self.network_commands),
        }
    }

    /// Per-device command estimate: deduplicated union of catalog ids and
    /// both override lists. Computed once at job start.
    pub fn estimated_commands_per_device(&self) -> usize {
        let mut seen: Vec<&str> = Vec::new();
        for item in self
            .command_ids
            .iter()
            .chain(self.server_commands.iter())
            .chain(self.network_commands.iter())
        {
            if !seen.contains(&item.as_str()) {
                seen.push(item);
            }
        }
        seen.len()
    }
}

/// Outcome of one command on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Failure,
}

/// One (device, command) result, written exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub device: String,
    pub device_ip: String,
    pub os_type: String,
    pub command: String,
    pub result: String,
    pub start_time: String,
    pub end_time: String,
    pub timestamp: String,
    pub status: RecordStatus,
    /// Whether a parsing template exists for (os_type, command)
    #[serde(default)]
    pub template_available: bool,
}

/// Commands and devices seen per os_type, for report statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsTypeUsage {
    pub commands: Vec<String>,
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
}

/// Cooperative cancellation flag threaded through a job's device tasks
///
/// Checked between commands; a cancelled task closes its session and
/// still performs its completion accounting.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct JobState {
    end_time: Option<String>,
    status: JobStatus,
}

/// Runtime state of one batch job
///
/// Shared between the coordinator and its device tasks via `Arc`; the
/// results list and the usage map are the only mutable shared pieces and
/// each sits behind its own mutex.
pub struct Job {
    pub id: String,
    pub mode: ExecutionMode,
    pub request: BatchRequest,
    pub job_dir: PathBuf,
    pub start_time: String,
    pub progress: ProgressTracker,
    pub cancel: CancelToken,
    state: Mutex<JobState>,
    results: Mutex<Vec<CommandRecord>>,
    items: Mutex<HashMap<String, OsTypeUsage>>,
}

impl Job {
    /// Create a job for an already-normalized request
    pub fn new(
        id: String,
        mode: ExecutionMode,
        request: BatchRequest,
        job_dir: PathBuf,
    ) -> Self {
        let total_devices = request.device_ids.len();
        let total_commands = total_devices * request.estimated_commands_per_device();

        Job {
            id,
            mode,
            job_dir,
            start_time: Local::now().to_rfc3339(),
            progress: ProgressTracker::new(total_devices, total_commands),
            cancel: CancelToken::new(),
            state: Mutex::new(JobState {
                end_time: None,
                status: JobStatus::Running,
            }),
            results: Mutex::new(Vec::new()),
            items: Mutex::new(HashMap::new()),
            request,
        }
    }

    /// Append one result; called concurrently by device tasks
    pub fn append_result(&self, record: CommandRecord) {
        self.results.lock().push(record);
    }

    /// Record which commands ran on a device, grouped by os_type
    pub fn record_usage(&self, os_type: &str, commands: Vec<String>, device_name: &str) {
        let mut items = self.items.lock();
        let usage = items.entry(os_type.to_string()).or_default();
        if usage.commands.is_empty() {
            usage.commands = commands;
        }
        usage.devices.push(device_name.to_string());
    }

    /// Stamp end time and final status; idempotent
    pub fn complete(&self) {
        let mut state = self.state.lock();
        if state.status != JobStatus::Completed {
            state.status = JobStatus::Completed;
            state.end_time = Some(Local::now().to_rfc3339());
        }
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn end_time(&self) -> Option<String> {
        self.state.lock().end_time.clone()
    }

    /// Copy of the results in completion order
    pub fn results(&self) -> Vec<CommandRecord> {
        self.results.lock().clone()
    }

    pub fn items(&self) -> HashMap<String, OsTypeUsage> {
        self.items.lock().clone()
    }
}

/// Registry of in-flight jobs, owned by the scheduler
///
/// Replaces per-connection implicit job state: any holder of the registry
/// can look up a running job by id (for cancellation or progress reads).
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry {
            jobs: DashMap::new(),
        }
    }

    pub fn insert(&self, job: Arc<Job>) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.get(id).map(|j| j.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.remove(id).map(|(_, j)| j)
    }

    pub fn active_count(&self) -> usize {
        self.jobs.len()
    }

    /// Ids of every job currently in flight
    pub fn ids(&self) -> Vec<String> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> BatchRequest {
        BatchRequest {
            device_ids: vec!["5".to_string(), String::new(), "7".to_string()],
            command_ids: vec!["1".to_string(), "2".to_string(), String::new()],
            server_commands: vec![String::new()],
            network_commands: vec!["display clock".to_string()],
        }
    }

    #[test]
    fn test_normalized_strips_empty_strings() {
        let req = request().normalized();
        assert_eq!(req.device_ids, vec!["5".to_string(), "7".to_string()]);
        assert_eq!(req.command_ids.len(), 2);
        assert!(req.server_commands.is_empty());
    }

    #[test]
    fn test_estimated_commands_deduplicates() {
        let req = BatchRequest {
            device_ids: vec!["1".to_string(), "2".to_string()],
            command_ids: vec!["1".to_string(), "2".to_string()],
            server_commands: vec!["uptime".to_string()],
            // Duplicate of an existing entry must not count twice
            network_commands: vec!["uptime".to_string(), "display clock".to_string()],
        }
        .normalized();

        assert_eq!(req.estimated_commands_per_device(), 4);

        let job = Job::new(
            generate_job_id(),
            ExecutionMode::Inspect,
            req,
            PathBuf::from("/tmp/patrol-test"),
        );
        assert_eq!(job.progress.snapshot().total_commands, 8);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = generate_job_id();
        let b = generate_job_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_usage_records_first_command_list_and_all_devices() {
        let job = Job::new(
            generate_job_id(),
            ExecutionMode::Inspect,
            request().normalized(),
            PathBuf::from("/tmp/patrol-test"),
        );

        job.record_usage("linux", vec!["uptime".to_string()], "web-01");
        job.record_usage("linux", vec!["uptime".to_string()], "web-02");

        let items = job.items();
        let usage = &items["linux"];
        assert_eq!(usage.commands, vec!["uptime".to_string()]);
        assert_eq!(usage.devices, vec!["web-01".to_string(), "web-02".to_string()]);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let job = Job::new(
            generate_job_id(),
            ExecutionMode::Configure,
            request().normalized(),
            PathBuf::from("/tmp/patrol-test"),
        );

        assert_eq!(job.status(), JobStatus::Running);
        job.complete();
        let first_end = job.end_time();
        job.complete();
        assert_eq!(job.end_time(), first_end);
        assert_eq!(job.status(), JobStatus::Completed);
    }

    #[test]
    fn test_registry_lifecycle() {
        let registry = JobRegistry::new();
        let job = Arc::new(Job::new(
            "abc".to_string(),
            ExecutionMode::Inspect,
            BatchRequest::default(),
            PathBuf::from("/tmp/patrol-test"),
        ));

        registry.insert(job.clone());
        assert_eq!(registry.active_count(), 1);
        assert!(registry.get("abc").is_some());

        registry.get("abc").unwrap().cancel.cancel();
        assert!(job.cancel.is_cancelled());

        registry.remove("abc");
        assert_eq!(registry.active_count(), 0);
    }
}
