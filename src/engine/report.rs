// Report finalization and replay records

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::job::{BatchRequest, CommandRecord, Job, JobStatus, OsTypeUsage};
use super::progress::ProgressSnapshot;
use super::ExecutionMode;
use crate::cache::{Cache, KEY_COMMANDS, KEY_CONFIG_HISTORY, KEY_INSPECT_HISTORY};
use crate::output::errors::PatrolError;
use crate::settings::Settings;

/// Durable capture of a job's literal inputs, for later re-execution
///
/// Written to `<jobDir>/index.json`. The id lists are `;`-joined literal
/// strings; reading the file and re-submitting its fields is the supported
/// replay path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayRecord {
    pub device_ids: String,
    pub command_ids: String,
    pub server_commands: String,
    pub network_commands: String,
    pub start_time: String,
    pub end_time: String,
    pub status: JobStatus,
}

impl ReplayRecord {
    pub fn from_job(job: &Job) -> Self {
        ReplayRecord {
            device_ids: job.request.device_ids.join(";"),
            command_ids: job.request.command_ids.join(";"),
            server_commands: job.request.server_commands.join(";"),
            network_commands: job.request.network_commands.join(";"),
            start_time: job.start_time.clone(),
            end_time: job.end_time().unwrap_or_default(),
            status: job.status(),
        }
    }

    /// Rebuild the original request; empty artifacts from the `;` split
    /// are stripped again on normalization
    pub fn to_request(&self) -> BatchRequest {
        fn split(s: &str) -> Vec<String> {
            s.split(';').map(|part| part.to_string()).collect()
        }

        BatchRequest {
            device_ids: split(&self.device_ids),
            command_ids: split(&self.command_ids),
            server_commands: split(&self.server_commands),
            network_commands: split(&self.network_commands),
        }
        .normalized()
    }
}

/// The complete, immutable record of a finished job
///
/// This is what report renderers consume and what `report.json` holds.
/// Results are sorted by (device, start time) so consumers get per-device
/// grouping regardless of the concurrent completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub mode: ExecutionMode,
    pub start_time: String,
    pub end_time: String,
    pub status: JobStatus,
    pub devices: Vec<String>,
    pub commands: Vec<String>,
    pub server_commands: Vec<String>,
    pub network_commands: Vec<String>,
    pub results: Vec<CommandRecord>,
    pub items: HashMap<String, OsTypeUsage>,
    pub progress: ProgressSnapshot,
}

impl JobRecord {
    pub fn from_job(job: &Job) -> Self {
        let mut results = job.results();
        results.sort_by(|a, b| {
            a.device
                .cmp(&b.device)
                .then_with(|| a.start_time.cmp(&b.start_time))
        });

        JobRecord {
            id: job.id.clone(),
            mode: job.mode,
            start_time: job.start_time.clone(),
            end_time: job.end_time().unwrap_or_default(),
            status: job.status(),
            devices: job.request.device_ids.clone(),
            commands: job.request.command_ids.clone(),
            server_commands: job.request.server_commands.clone(),
            network_commands: job.request.network_commands.clone(),
            results,
            items: job.items(),
            progress: job.progress.snapshot(),
        }
    }
}

/// Turns a job record into a human-readable report artifact
///
/// Rendering (and structured-data extraction from raw output) is slow and
/// externalized; the finalizer triggers it asynchronously after the
/// completion notice.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, record: &JobRecord, job_dir: &Path) -> Result<(), PatrolError>;
}

/// Renderer that only logs; used when no artifact pipeline is wired in
#[derive(Default)]
pub struct NullRenderer;

impl ReportRenderer for NullRenderer {
    fn render(&self, record: &JobRecord, _job_dir: &Path) -> Result<(), PatrolError> {
        tracing::debug!(job_id = %record.id, "no report renderer configured");
        Ok(())
    }
}

/// Persist a completed job and invalidate derived caches
///
/// Synchronous parts: stamping completion, `report.json`, `index.json`,
/// cache invalidation. Only artifact rendering runs detached.
pub fn finalize(
    job: &Job,
    cache: &Cache,
    renderer: Arc<dyn ReportRenderer>,
) -> Result<JobRecord, PatrolError> {
    job.complete();

    let record = JobRecord::from_job(job);
    let record_path = job.job_dir.join("report.json");
    write_json(&record_path, &record)?;

    let replay = ReplayRecord::from_job(job);
    let replay_path = job.job_dir.join("index.json");
    write_json(&replay_path, &replay)?;

    // Historical job lists are derived from the report files just written;
    // for inspections the catalog's parsing-availability flags are derived
    // data too
    match job.mode {
        ExecutionMode::Inspect => {
            cache.delete(KEY_INSPECT_HISTORY);
            cache.delete(KEY_COMMANDS);
        }
        ExecutionMode::Configure => {
            cache.delete(KEY_CONFIG_HISTORY);
        }
    }

    let render_record = record.clone();
    let job_dir = job.job_dir.clone();
    tokio::spawn(async move {
        if let Err(e) = renderer.render(&render_record, &job_dir) {
            tracing::error!(job_id = %render_record.id, error = %e, "report rendering failed");
        }
    });

    tracing::info!(
        job_id = %record.id,
        results = record.results.len(),
        failed_devices = record.progress.failed_devices,
        "job finalized"
    );
    Ok(record)
}

/// Load the replay record of a historical job
pub fn load_replay(
    settings: &Settings,
    mode: ExecutionMode,
    job_id: &str,
) -> Result<ReplayRecord, PatrolError> {
    let path = settings.job_dir(mode, job_id).join("index.json");
    let content = std::fs::read_to_string(&path).map_err(|e| PatrolError::Job {
        message: format!("Cannot read replay record for job {}: {}", job_id, e),
        suggestion: Some("Check the job id against the report directory".to_string()),
    })?;

    serde_json::from_str(&content).map_err(|e| PatrolError::Job {
        message: format!("Malformed replay record for job {}: {}", job_id, e),
        suggestion: None,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PatrolError> {
    let content = serde_json::to_string_pretty(value).map_err(|e| PatrolError::Job {
        message: format!("Failed to serialize report data: {}", e),
        suggestion: None,
    })?;

    std::fs::write(path, content).map_err(|e| PatrolError::Io {
        message: format!("Failed to write report file: {}", e),
        path: Some(path.to_path_buf()),
    })
}
