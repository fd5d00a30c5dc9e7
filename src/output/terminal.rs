// Terminal consumer of the job event channel

use std::collections::BTreeMap;
use std::io::IsTerminal;

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::engine::{JobRecord, RecordStatus};
use crate::output::events::JobEvent;

/// Terminal output manager
///
/// Drains the event channel one job at a time: a progress bar over the
/// command estimate, command results when verbose, errors always.
pub struct TerminalOutput {
    verbose: bool,
    quiet: bool,
    is_tty: bool,
    bar: Option<ProgressBar>,
}

impl TerminalOutput {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let is_tty = std::io::stdout().is_terminal();

        // Respect NO_COLOR environment variable (https://no-color.org/)
        // Also disable colors if not a TTY
        if std::env::var("NO_COLOR").is_ok() || !is_tty {
            colored::control::set_override(false);
        }

        TerminalOutput {
            verbose,
            quiet,
            is_tty,
            bar: None,
        }
    }

    /// Print a header before a batch starts
    pub fn print_job_header(&self, mode: &str, device_count: usize) {
        if self.quiet {
            return;
        }

        println!();
        println!(
            "{} {} ({} devices)",
            "BATCH".green().bold(),
            mode.cyan(),
            device_count
        );
        println!("{}", "─".repeat(60).dimmed());
    }

    /// Consume events until every sender is gone
    pub async fn run(&mut self, mut rx: mpsc::UnboundedReceiver<JobEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(&event);
        }
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn handle_event(&mut self, event: &JobEvent) {
        match event {
            JobEvent::ProgressUpdate {
                total_commands,
                completed_commands,
                ..
            } => {
                if self.quiet {
                    return;
                }
                let is_tty = self.is_tty;
                let bar = self
                    .bar
                    .get_or_insert_with(|| make_progress_bar(*total_commands as u64, is_tty));
                bar.set_position(*completed_commands as u64);
            }

            JobEvent::CommandResult {
                device_name,
                command,
                result,
                ..
            } => {
                if self.quiet {
                    return;
                }
                let shown = console::truncate_str(command, 48, "…");
                self.println(format!(
                    "  {} {} {} {}",
                    "OK".green(),
                    device_name.white().bold(),
                    "=>".dimmed(),
                    shown
                ));
                if self.verbose {
                    for line in result.lines() {
                        self.println(format!("      {}", line.dimmed()));
                    }
                }
            }

            JobEvent::ExecuteComplete { report_id } => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
                if !self.quiet {
                    println!();
                    println!("{} report {}", "DONE".green().bold(), report_id.cyan());
                }
            }

            // Errors are shown even in quiet mode
            JobEvent::Error { message } => {
                self.println(format!("  {} {}", "ERROR".red().bold(), message));
            }
        }
    }

    /// Print above the live bar when one is active
    fn println(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{}", line),
        }
    }

    /// Print the batch recap after the report is finalized
    pub fn print_recap(&self, record: &JobRecord) {
        if self.quiet {
            return;
        }

        println!();
        println!("{}", "BATCH RECAP".green().bold());
        println!("{}", "─".repeat(60).dimmed());

        for (device, stats) in device_stats(record) {
            let ok = format!("ok={}", stats.ok).green();
            let failed = if stats.failed > 0 {
                format!("failed={}", stats.failed).red().bold()
            } else {
                format!("failed={}", stats.failed).normal()
            };

            println!("{:<30} : {}    {}", device.white().bold(), ok, failed);
        }

        let progress = &record.progress;
        println!();
        println!(
            "{} devices ({} unreachable), {}/{} commands, {} failed",
            progress.completed_devices,
            progress.failed_devices,
            progress.completed_commands,
            progress.total_commands,
            progress.failed_commands
        );
    }
}

/// Per-device success/failure counts, in device order
fn device_stats(record: &JobRecord) -> BTreeMap<String, DeviceStats> {
    let mut stats: BTreeMap<String, DeviceStats> = BTreeMap::new();
    for result in &record.results {
        let entry = stats.entry(result.device.clone()).or_default();
        match result.status {
            RecordStatus::Success => entry.ok += 1,
            RecordStatus::Failure => entry.failed += 1,
        }
    }
    stats
}

#[derive(Debug, Default, Clone, Copy)]
struct DeviceStats {
    ok: usize,
    failed: usize,
}

fn make_progress_bar(len: u64, is_tty: bool) -> ProgressBar {
    let bar = if is_tty {
        ProgressBar::new(len)
    } else {
        ProgressBar::hidden()
    };

    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} commands")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(std::time::Duration::from_millis(100));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::job::{BatchRequest, CommandRecord, Job};
    use crate::engine::{generate_job_id, ExecutionMode};

    fn record_with_results(entries: &[(&str, RecordStatus)]) -> JobRecord {
        let job = Job::new(
            generate_job_id(),
            ExecutionMode::Inspect,
            BatchRequest::default(),
            std::env::temp_dir(),
        );

        for (device, status) in entries {
            job.append_result(CommandRecord {
                device: device.to_string(),
                device_ip: String::new(),
                os_type: "linux".to_string(),
                command: "uptime".to_string(),
                result: String::new(),
                start_time: String::new(),
                end_time: String::new(),
                timestamp: String::new(),
                status: *status,
                template_available: false,
            });
        }
        job.complete();
        JobRecord::from_job(&job)
    }

    #[test]
    fn test_device_stats_aggregates_per_device() {
        let record = record_with_results(&[
            ("web-01", RecordStatus::Success),
            ("web-01", RecordStatus::Failure),
            ("web-02", RecordStatus::Success),
        ]);

        let stats = device_stats(&record);
        assert_eq!(stats["web-01"].ok, 1);
        assert_eq!(stats["web-01"].failed, 1);
        assert_eq!(stats["web-02"].ok, 1);
        assert_eq!(stats["web-02"].failed, 0);
    }
}
