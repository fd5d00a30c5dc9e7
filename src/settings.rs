// Data directory layout

use std::path::{Path, PathBuf};

use crate::engine::ExecutionMode;
use crate::output::errors::PatrolError;

/// On-disk layout for reports, config groups and parsing templates
///
/// Everything lives under a single data root:
///
/// ```text
/// <data>/reports/inspect/<job-id>/   session logs, report.json, index.json
/// <data>/reports/config/<job-id>/
/// <data>/conf/netconf/<group>.conf   config-mode command groups
/// <data>/templates/                  per-(os_type, command) parsing templates
/// ```
#[derive(Debug, Clone)]
pub struct Settings {
    data_dir: PathBuf,
}

impl Settings {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Settings {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Root of all reports for one workflow
    pub fn report_dir(&self, mode: ExecutionMode) -> PathBuf {
        self.data_dir.join("reports").join(mode.as_str())
    }

    /// Directory for one job's artifacts (created on demand)
    pub fn job_dir(&self, mode: ExecutionMode, job_id: &str) -> PathBuf {
        self.report_dir(mode).join(job_id)
    }

    /// Create a job directory, including parents
    pub fn ensure_job_dir(
        &self,
        mode: ExecutionMode,
        job_id: &str,
    ) -> Result<PathBuf, PatrolError> {
        let dir = self.job_dir(mode, job_id);
        std::fs::create_dir_all(&dir).map_err(|e| PatrolError::Io {
            message: format!("Failed to create job directory: {}", e),
            path: Some(dir.clone()),
        })?;
        Ok(dir)
    }

    /// Directory holding config-mode command group files
    pub fn netconf_dir(&self) -> PathBuf {
        self.data_dir.join("conf").join("netconf")
    }

    /// Directory holding output parsing templates
    pub fn template_dir(&self) -> PathBuf {
        self.data_dir.join("templates")
    }

    /// Whether a parsing template exists for (os_type, command)
    ///
    /// Template file names follow `<os_type>_<command with spaces as _>.textfsm`.
    pub fn template_exists(&self, os_type: &str, command_text: &str) -> bool {
        let name = format!("{}_{}.textfsm", os_type, command_text.replace(' ', "_"));
        self.template_dir().join(name).exists()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::new("data")
    }
}
