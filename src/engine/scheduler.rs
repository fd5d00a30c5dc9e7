// Batch execution scheduler: one bounded task per device, commands serial within

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::future::join_all;
use tokio::sync::Semaphore;

use super::job::{generate_job_id, BatchRequest, CommandRecord, Job, RecordStatus};
use super::report::{self, JobRecord, NullRenderer, ReportRenderer};
use super::{CommandSet, ExecutionMode};
use crate::cache::Cache;
use crate::engine::job::JobRegistry;
use crate::inventory::{
    filter_for_os, filter_groups_for_os, load_config_groups, CommandStore, Device, DeviceStore,
};
use crate::output::errors::PatrolError;
use crate::output::events::EventEmitter;
use crate::settings::Settings;
use crate::transport::{DeviceSession, Transport};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrent device tasks; excess devices queue
    pub max_parallel_devices: usize,
    /// Connect timeout for plain SSH sessions
    pub ssh_connect_timeout: Duration,
    /// Connect timeout for vendor CLI sessions
    pub cli_connect_timeout: Duration,
    /// Hard per-command timeout, enforced at the transport layer
    pub command_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_parallel_devices: 20,
            ssh_connect_timeout: Duration::from_secs(15),
            cli_connect_timeout: Duration::from_secs(20),
            command_timeout: Duration::from_secs(300),
        }
    }
}

fn wall_clock() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// The batch execution engine
///
/// Runs inspection and configuration jobs through the same machinery;
/// only command resolution and the config-save step differ by mode.
pub struct JobScheduler {
    config: SchedulerConfig,
    devices: Arc<dyn DeviceStore>,
    commands: Arc<dyn CommandStore>,
    transport: Arc<dyn Transport>,
    settings: Settings,
    cache: Arc<Cache>,
    registry: Arc<JobRegistry>,
    renderer: Arc<dyn ReportRenderer>,
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        devices: Arc<dyn DeviceStore>,
        commands: Arc<dyn CommandStore>,
        transport: Arc<dyn Transport>,
        settings: Settings,
        cache: Arc<Cache>,
    ) -> Self {
        JobScheduler {
            config,
            devices,
            commands,
            transport,
            settings,
            cache,
            registry: Arc::new(JobRegistry::new()),
            renderer: Arc::new(NullRenderer),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// In-flight jobs, for progress reads and cancellation
    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    /// Execute one batch request end to end
    ///
    /// Returns once every device task has finished and the report is
    /// persisted. Per-device and per-command failures never abort the
    /// batch; only pre-start request problems surface as errors here.
    pub async fn run(
        &self,
        mode: ExecutionMode,
        request: BatchRequest,
        emitter: &EventEmitter,
    ) -> Result<JobRecord, PatrolError> {
        let request = request.normalized();

        if request.device_ids.is_empty() {
            let err = PatrolError::Job {
                message: "Batch request contains no devices".to_string(),
                suggestion: Some("Select at least one device".to_string()),
            };
            emitter.error(err.brief());
            return Err(err);
        }

        let job_id = generate_job_id();
        let job_dir = self.settings.ensure_job_dir(mode, &job_id)?;
        let job = Arc::new(Job::new(job_id, mode, request, job_dir));
        self.registry.insert(job.clone());

        tracing::info!(
            job_id = %job.id,
            mode = mode.as_str(),
            devices = job.request.device_ids.len(),
            commands = job.request.command_ids.len(),
            "job started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_devices));
        let this = self;

        let futures: Vec<_> = job
            .request
            .device_ids
            .iter()
            .map(|device_id| {
                let sem = semaphore.clone();
                let job = job.clone();
                let emitter = emitter.clone();
                let device_id = device_id.clone();

                async move {
                    let _permit = match sem.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    this.process_device(&job, &emitter, &device_id).await;
                }
            })
            .collect();

        join_all(futures).await;

        let record = report::finalize(&job, &self.cache, self.renderer.clone());
        self.registry.remove(&job.id);

        match record {
            Ok(record) => {
                emitter.execute_complete(job.id.clone());
                Ok(record)
            }
            Err(e) => {
                emitter.error(e.brief());
                Err(e)
            }
        }
    }

    /// Re-run a historical job from its persisted replay record
    pub async fn replay(
        &self,
        mode: ExecutionMode,
        job_id: &str,
        emitter: &EventEmitter,
    ) -> Result<JobRecord, PatrolError> {
        let replay = match report::load_replay(&self.settings, mode, job_id) {
            Ok(replay) => replay,
            Err(e) => {
                emitter.error(e.brief());
                return Err(e);
            }
        };
        tracing::info!(source_job = job_id, "replaying job");
        self.run(mode, replay.to_request(), emitter).await
    }

    /// Run everything for one device; all failures are absorbed here
    async fn process_device(&self, job: &Job, emitter: &EventEmitter, device_id: &str) {
        let device = match self.devices.resolve(device_id) {
            Ok(device) if device.supports_batch_exec() => device,
            Ok(device) => {
                self.fail_device(
                    job,
                    emitter,
                    format!(
                        "Device {} uses protocol {:?}; batch execution requires ssh",
                        device.name, device.protocol
                    ),
                );
                return;
            }
            Err(e) => {
                self.fail_device(job, emitter, e.brief());
                return;
            }
        };

        let set = match self.resolve_commands(job.mode, &device, &job.request) {
            Ok(set) => set,
            Err(e) => {
                self.fail_device(job, emitter, e.brief());
                return;
            }
        };

        let log_path = job.job_dir.join(device.session_log_name());
        let mut session = match self.transport.connect(&device, &log_path).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(device = %device.name, error = %e.brief(), "connect failed");
                self.fail_device(job, emitter, e.brief());
                return;
            }
        };

        tracing::info!(
            device = %device.name,
            ip = %device.ip,
            units = set.len(),
            "session open, executing commands"
        );

        match &set {
            CommandSet::Flat(commands) => {
                self.run_flat(job, emitter, &device, session.as_mut(), commands)
                    .await;
            }
            CommandSet::Grouped(groups) => {
                if device.device_type.is_network() {
                    self.run_groups(job, emitter, &device, session.as_mut(), groups)
                        .await;
                } else {
                    // Servers have no config mode: groups flatten to a serial list
                    let flat: Vec<String> =
                        groups.iter().flat_map(|(_, cmds)| cmds.clone()).collect();
                    self.run_flat(job, emitter, &device, session.as_mut(), &flat)
                        .await;
                }
            }
        }

        session.close().await;
        job.record_usage(&device.os_type, set.usage_names(), &device.name);

        let snap = job.progress.device_finished(false);
        emitter.progress_update(
            snap.total_devices,
            snap.completed_devices,
            snap.total_commands,
            snap.completed_commands,
        );
    }

    /// Serial read-command loop; a failed command never stops the loop
    async fn run_flat(
        &self,
        job: &Job,
        emitter: &EventEmitter,
        device: &Device,
        session: &mut dyn DeviceSession,
        commands: &[String],
    ) {
        for command in commands {
            if job.cancel.is_cancelled() {
                tracing::info!(device = %device.name, "job cancelled, skipping remaining commands");
                break;
            }

            let start_time = wall_clock();
            let result = session.execute(command).await;
            let end_time = wall_clock();

            self.account(
                job, emitter, device, command, result, start_time, end_time,
            );
        }
    }

    /// Config-mode loop: each group is one transaction, config is saved
    /// after every group since changes take effect immediately
    async fn run_groups(
        &self,
        job: &Job,
        emitter: &EventEmitter,
        device: &Device,
        session: &mut dyn DeviceSession,
        groups: &[(String, Vec<String>)],
    ) {
        for (group_key, commands) in groups {
            if job.cancel.is_cancelled() {
                tracing::info!(device = %device.name, "job cancelled, skipping remaining groups");
                break;
            }

            let start_time = wall_clock();
            let result = session.execute_config_set(commands).await;
            let end_time = wall_clock();

            self.account(
                job, emitter, device, group_key, result, start_time, end_time,
            );

            if let Err(e) = session.save_config().await {
                tracing::error!(device = %device.name, error = %e.brief(), "save config failed");
                emitter.error(format!("{}: save config failed: {}", device.name, e.brief()));
            }
        }
    }

    /// Record one command attempt: result append, live push, counter tick
    #[allow(clippy::too_many_arguments)]
    fn account(
        &self,
        job: &Job,
        emitter: &EventEmitter,
        device: &Device,
        command: &str,
        result: Result<String, PatrolError>,
        start_time: String,
        end_time: String,
    ) {
        let failed = result.is_err();
        let (output, status) = match result {
            Ok(output) => (output, RecordStatus::Success),
            Err(e) => {
                tracing::error!(device = %device.name, command, error = %e.brief(), "command failed");
                emitter.error(format!("{}: {}", device.name, e.brief()));
                (e.brief(), RecordStatus::Failure)
            }
        };

        job.append_result(CommandRecord {
            device: device.name.clone(),
            device_ip: device.ip.clone(),
            os_type: device.os_type.clone(),
            command: command.to_string(),
            result: output.clone(),
            start_time,
            end_time,
            timestamp: Local::now().to_rfc3339(),
            status,
            template_available: self.settings.template_exists(&device.os_type, command),
        });

        if status == RecordStatus::Success {
            emitter.command_result(
                device.name.clone(),
                device.ip.clone(),
                device.device_type.as_str().to_string(),
                device.os_type.clone(),
                command.to_string(),
                output,
            );
        }

        let snap = job.progress.command_finished(failed);
        emitter.progress_update(
            snap.total_devices,
            snap.completed_devices,
            snap.total_commands,
            snap.completed_commands,
        );
    }

    /// A device-level failure: one failed-device increment, one
    /// completed-device increment, no commands attempted
    fn fail_device(&self, job: &Job, emitter: &EventEmitter, message: String) {
        emitter.error(message);
        let snap = job.progress.device_finished(true);
        emitter.progress_update(
            snap.total_devices,
            snap.completed_devices,
            snap.total_commands,
            snap.completed_commands,
        );
    }

    /// Resolve the command set for one device according to the mode
    fn resolve_commands(
        &self,
        mode: ExecutionMode,
        device: &Device,
        request: &BatchRequest,
    ) -> Result<CommandSet, PatrolError> {
        let overrides = if device.device_type.is_network() {
            &request.network_commands
        } else {
            &request.server_commands
        };

        match mode {
            ExecutionMode::Inspect => {
                let mut commands = if request.command_ids.is_empty() {
                    Vec::new()
                } else {
                    let entries = self.commands.lookup(&request.command_ids)?;
                    filter_for_os(&entries, &device.os_type)
                };
                commands.extend(overrides.iter().cloned());

                // Deduplicate the union, keeping first occurrence
                let mut deduped: Vec<String> = Vec::with_capacity(commands.len());
                for command in commands {
                    if !deduped.contains(&command) {
                        deduped.push(command);
                    }
                }
                Ok(CommandSet::Flat(deduped))
            }
            ExecutionMode::Configure => {
                let groups = load_config_groups(&self.settings.netconf_dir(), &request.command_ids);
                let mut groups = filter_groups_for_os(groups, &device.os_type);

                // Overrides apply as their own transaction, never interleaved
                if !overrides.is_empty() {
                    let key = if device.device_type.is_network() {
                        "temp_network_commands"
                    } else {
                        "temp_server_commands"
                    };
                    groups.push((key.to_string(), overrides.clone()));
                }
                Ok(CommandSet::Grouped(groups))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::JobStatus;
    use crate::inventory::{
        CatalogEntry, DeviceType, FileCommandStore, FileDeviceStore, Protocol,
    };
    use crate::output::events::{create_event_channel, JobEvent};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Behavior {
        Ok,
        ConnectFail,
        FailCommands,
    }

    /// Scriptable transport: per-device behavior plus a concurrency gauge
    struct MockTransport {
        behaviors: HashMap<String, Behavior>,
        delay: Duration,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        saves: Arc<AtomicUsize>,
        trace: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockTransport {
        fn new() -> Self {
            MockTransport {
                behaviors: HashMap::new(),
                delay: Duration::from_millis(0),
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::new(AtomicUsize::new(0)),
                saves: Arc::new(AtomicUsize::new(0)),
                trace: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn with_behavior(mut self, device: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(device.to_string(), behavior);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(
            &self,
            device: &Device,
            _session_log: &Path,
        ) -> Result<Box<dyn DeviceSession>, PatrolError> {
            let behavior = self
                .behaviors
                .get(&device.name)
                .copied()
                .unwrap_or(Behavior::Ok);

            if behavior == Behavior::ConnectFail {
                return Err(PatrolError::Connect {
                    device: device.name.clone(),
                    message: "Connection refused".to_string(),
                    suggestion: None,
                });
            }

            let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(current, Ordering::SeqCst);

            Ok(Box::new(MockSession {
                device: device.name.clone(),
                behavior,
                delay: self.delay,
                active: self.active.clone(),
                saves: self.saves.clone(),
                trace: self.trace.clone(),
            }))
        }
    }

    struct MockSession {
        device: String,
        behavior: Behavior,
        delay: Duration,
        active: Arc<AtomicUsize>,
        saves: Arc<AtomicUsize>,
        trace: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl DeviceSession for MockSession {
        async fn execute(&mut self, command: &str) -> Result<String, PatrolError> {
            tokio::time::sleep(self.delay).await;
            self.trace
                .lock()
                .push((self.device.clone(), command.to_string()));

            if self.behavior == Behavior::FailCommands {
                return Err(PatrolError::Exec {
                    device: self.device.clone(),
                    command: command.to_string(),
                    message: "simulated failure".to_string(),
                });
            }
            Ok(format!("output of {}", command))
        }

        async fn execute_config_set(&mut self, commands: &[String]) -> Result<String, PatrolError> {
            tokio::time::sleep(self.delay).await;
            self.trace
                .lock()
                .push((self.device.clone(), format!("config-set:{}", commands.len())));
            Ok(format!("applied {} commands", commands.len()))
        }

        async fn save_config(&mut self) -> Result<(), PatrolError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn server(id: &str, name: &str) -> Device {
        Device::new(id, name)
            .with_ip("10.0.0.1")
            .with_credentials("ops", "secret")
            .with_os_type("linux")
    }

    fn switch(id: &str, name: &str) -> Device {
        Device::new(id, name)
            .with_ip("10.0.1.1")
            .with_credentials("admin", "secret")
            .with_device_type(DeviceType::Switch)
            .with_os_type("hp_comware")
    }

    fn catalog() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry {
                id: "1".to_string(),
                command_text: "uptime".to_string(),
                os_type: "linux".to_string(),
                comment: None,
            },
            CatalogEntry {
                id: "2".to_string(),
                command_text: "df -h".to_string(),
                os_type: "linux".to_string(),
                comment: None,
            },
            CatalogEntry {
                id: "3".to_string(),
                command_text: "free -m".to_string(),
                os_type: "linux".to_string(),
                comment: None,
            },
        ]
    }

    struct Fixture {
        scheduler: JobScheduler,
        _tmp: tempfile::TempDir,
    }

    fn fixture(devices: Vec<Device>, transport: MockTransport) -> Fixture {
        fixture_with_config(devices, transport, SchedulerConfig::default())
    }

    fn fixture_with_config(
        devices: Vec<Device>,
        transport: MockTransport,
        config: SchedulerConfig,
    ) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::new(tmp.path());

        let scheduler = JobScheduler::new(
            config,
            Arc::new(FileDeviceStore::from_devices(devices)),
            Arc::new(FileCommandStore::from_entries(catalog())),
            Arc::new(transport),
            settings,
            Arc::new(Cache::new()),
        );

        Fixture {
            scheduler,
            _tmp: tmp,
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_all_devices_succeed() {
        let fx = fixture(
            vec![server("1", "web-01"), server("2", "web-02")],
            MockTransport::new(),
        );
        let (emitter, _rx) = create_event_channel();

        let record = fx
            .scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: ids(&["1", "2"]),
                    command_ids: ids(&["1", "2", "3"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.results.len(), 6);
        assert_eq!(record.progress.total_commands, 6);
        assert_eq!(record.progress.completed_commands, 6);
        assert_eq!(record.progress.failed_commands, 0);
        assert_eq!(record.progress.completed_devices, 2);
        assert_eq!(record.progress.failed_devices, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_isolated() {
        let fx = fixture(
            vec![server("1", "web-01"), server("2", "web-02")],
            MockTransport::new().with_behavior("web-02", Behavior::ConnectFail),
        );
        let (emitter, mut rx) = create_event_channel();

        let record = fx
            .scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: ids(&["1", "2"]),
                    command_ids: ids(&["1"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        // The healthy device still ran its command
        assert_eq!(record.results.len(), 1);
        assert_eq!(record.results[0].device, "web-01");
        assert_eq!(record.results[0].status, RecordStatus::Success);

        // Unreachable device: failed + completed exactly once, no attempts
        assert_eq!(record.progress.failed_devices, 1);
        assert_eq!(record.progress.completed_devices, 2);
        assert_eq!(record.progress.completed_commands, 1);

        // The connect failure surfaced as an error event
        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, JobEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_command_failure_continues_device() {
        let fx = fixture(
            vec![server("1", "web-01")],
            MockTransport::new().with_behavior("web-01", Behavior::FailCommands),
        );
        let (emitter, _rx) = create_event_channel();

        let record = fx
            .scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: ids(&["1"]),
                    command_ids: ids(&["1", "2"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        // Every command was attempted and recorded despite failing
        assert_eq!(record.progress.completed_commands, 2);
        assert_eq!(record.progress.failed_commands, 2);
        assert_eq!(record.results.len(), 2);
        assert!(record
            .results
            .iter()
            .all(|r| r.status == RecordStatus::Failure));
        assert_eq!(record.progress.failed_devices, 0);
        assert_eq!(record.progress.completed_devices, 1);
    }

    #[tokio::test]
    async fn test_unknown_device_counts_as_failed() {
        let fx = fixture(vec![server("1", "web-01")], MockTransport::new());
        let (emitter, _rx) = create_event_channel();

        let record = fx
            .scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: ids(&["1", "99"]),
                    command_ids: ids(&["1"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        assert_eq!(record.progress.completed_devices, 2);
        assert_eq!(record.progress.failed_devices, 1);
        assert_eq!(record.results.len(), 1);
    }

    #[tokio::test]
    async fn test_non_ssh_device_counts_as_failed() {
        let serial = server("1", "console-01").with_protocol(Protocol::Serial);
        let fx = fixture(vec![serial, server("2", "web-02")], MockTransport::new());
        let (emitter, _rx) = create_event_channel();

        let record = fx
            .scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: ids(&["1", "2"]),
                    command_ids: ids(&["1"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        // Serial devices are rejected before any connect attempt
        assert_eq!(record.progress.failed_devices, 1);
        assert_eq!(record.progress.completed_devices, 2);
        assert_eq!(record.results.len(), 1);
        assert_eq!(record.results[0].device, "web-02");
    }

    #[tokio::test]
    async fn test_empty_string_ids_are_dropped() {
        let fx = fixture(
            vec![server("5", "web-05"), server("7", "web-07")],
            MockTransport::new(),
        );
        let (emitter, _rx) = create_event_channel();

        let record = fx
            .scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: vec!["5".to_string(), String::new(), "7".to_string()],
                    command_ids: ids(&["1"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        assert_eq!(record.progress.total_devices, 2);
        assert_eq!(record.progress.completed_devices, 2);
        assert_eq!(record.progress.failed_devices, 0);
    }

    #[tokio::test]
    async fn test_commands_run_serially_per_device() {
        let transport = MockTransport::new();
        let trace = transport.trace.clone();
        let fx = fixture(vec![server("1", "web-01")], transport);
        let (emitter, _rx) = create_event_channel();

        fx.scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: ids(&["1"]),
                    command_ids: ids(&["1", "2", "3"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        let executed: Vec<String> = trace.lock().iter().map(|(_, c)| c.clone()).collect();
        assert_eq!(
            executed,
            vec![
                "uptime".to_string(),
                "df -h".to_string(),
                "free -m".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrency_stays_within_bound() {
        let devices: Vec<Device> = (0..6)
            .map(|i| server(&i.to_string(), &format!("web-{:02}", i)))
            .collect();
        let transport = MockTransport::new().with_delay(Duration::from_millis(30));
        let max_active = transport.max_active.clone();

        let fx = fixture_with_config(
            devices,
            transport,
            SchedulerConfig {
                max_parallel_devices: 2,
                ..Default::default()
            },
        );
        let (emitter, _rx) = create_event_channel();

        fx.scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: (0..6).map(|i| i.to_string()).collect(),
                    command_ids: ids(&["1"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        assert!(max_active.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_inspection_merges_and_dedupes_overrides() {
        let transport = MockTransport::new();
        let trace = transport.trace.clone();
        let fx = fixture(vec![server("1", "web-01")], transport);
        let (emitter, _rx) = create_event_channel();

        let record = fx
            .scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: ids(&["1"]),
                    command_ids: ids(&["1"]),
                    // "uptime" duplicates catalog command 1
                    server_commands: ids(&["uptime", "who"]),
                    // Network overrides must not reach a server device
                    network_commands: ids(&["display clock"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        let executed: Vec<String> = trace.lock().iter().map(|(_, c)| c.clone()).collect();
        assert_eq!(executed, vec!["uptime".to_string(), "who".to_string()]);
        assert_eq!(record.items["linux"].devices, vec!["web-01".to_string()]);
    }

    #[tokio::test]
    async fn test_configuration_groups_and_saves() {
        let transport = MockTransport::new();
        let saves = transport.saves.clone();
        let fx = fixture(vec![switch("1", "core-sw-01")], transport);

        // Two config groups on disk, one matching the switch os_type
        let netconf = fx.scheduler.settings.netconf_dir();
        std::fs::create_dir_all(&netconf).unwrap();
        std::fs::write(
            netconf.join("hp_comware__ntp.conf"),
            "ntp-service enable\nntp-service unicast-server 10.0.0.1\n",
        )
        .unwrap();
        std::fs::write(netconf.join("cisco_ios__clock.conf"), "clock timezone UTC\n").unwrap();

        let (emitter, _rx) = create_event_channel();
        let record = fx
            .scheduler
            .run(
                ExecutionMode::Configure,
                BatchRequest {
                    device_ids: ids(&["1"]),
                    command_ids: ids(&["hp_comware__ntp", "cisco_ios__clock"]),
                    network_commands: ids(&["info-center enable"]),
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap();

        // One matching catalog group + the override group, each saved once
        let commands: Vec<&str> = record.results.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, vec!["hp_comware__ntp", "temp_network_commands"]);
        assert_eq!(saves.load(Ordering::SeqCst), 2);
        assert_eq!(
            record.items["hp_comware"].commands,
            vec![
                "hp_comware__ntp".to_string(),
                "temp_network_commands".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_job_skips_commands_but_completes() {
        let fx = fixture(
            vec![server("1", "web-01"), server("2", "web-02")],
            MockTransport::new().with_delay(Duration::from_millis(20)),
        );
        let (emitter, _rx) = create_event_channel();

        // Cancel the job as soon as it appears in the registry
        let registry = fx.scheduler.registry();
        let request = BatchRequest {
            device_ids: ids(&["1", "2"]),
            command_ids: ids(&["1", "2", "3"]),
            ..Default::default()
        };

        let run = fx.scheduler.run(ExecutionMode::Inspect, request, &emitter);
        tokio::pin!(run);

        let record = loop {
            tokio::select! {
                record = &mut run => break record.unwrap(),
                _ = tokio::time::sleep(Duration::from_micros(50)) => {
                    for id in registry.ids() {
                        if let Some(job) = registry.get(&id) {
                            job.cancel.cancel();
                        }
                    }
                }
            }
        };

        // Cancelled devices still complete exactly once and the job finalizes
        assert_eq!(record.progress.completed_devices, 2);
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.progress.completed_commands < record.progress.total_commands);
    }

    #[tokio::test]
    async fn test_replay_reproduces_totals() {
        let fx = fixture(
            vec![server("1", "web-01"), server("2", "web-02")],
            MockTransport::new(),
        );
        let (emitter, _rx) = create_event_channel();

        let request = BatchRequest {
            device_ids: ids(&["1", "2"]),
            command_ids: ids(&["1", "2"]),
            ..Default::default()
        };

        let first = fx
            .scheduler
            .run(ExecutionMode::Inspect, request, &emitter)
            .await
            .unwrap();

        let second = fx
            .scheduler
            .replay(ExecutionMode::Inspect, &first.id, &emitter)
            .await
            .unwrap();

        assert_eq!(
            second.progress.total_commands,
            first.progress.total_commands
        );
        assert_eq!(second.results.len(), first.results.len());
    }

    #[tokio::test]
    async fn test_empty_device_list_is_a_job_error() {
        let fx = fixture(vec![], MockTransport::new());
        let (emitter, mut rx) = create_event_channel();

        let err = fx
            .scheduler
            .run(
                ExecutionMode::Inspect,
                BatchRequest {
                    device_ids: vec![String::new()],
                    ..Default::default()
                },
                &emitter,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PatrolError::Job { .. }));
        assert!(matches!(rx.try_recv(), Ok(JobEvent::Error { .. })));
    }
}
