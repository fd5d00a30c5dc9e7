// Patrol CLI - batch device inspection and configuration

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::*;

use patrol::cache::Cache;
use patrol::engine::{BatchRequest, ExecutionMode, JobRecord, JobScheduler, SchedulerConfig};
use patrol::inventory::{
    CachedCommandStore, CachedDeviceStore, CommandStore, DeviceStore, FileCommandStore,
    FileDeviceStore,
};
use patrol::output::{create_event_channel, PatrolError, TerminalOutput};
use patrol::settings::Settings;
use patrol::transport::{CliTransport, SshTransport, Transport, TransportRouter};

#[derive(Parser)]
#[command(
    name = "patrol",
    about = "Batch device inspection and configuration over SSH",
    version,
    disable_colored_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Args)]
struct ExecArgs {
    /// Path to the device inventory file
    #[arg(short, long, default_value = "inventory.yml")]
    inventory: PathBuf,

    /// Path to the command catalog file
    #[arg(short, long, default_value = "commands.yml")]
    catalog: PathBuf,

    /// Data directory (reports, config groups, templates)
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Maximum parallel devices
    #[arg(long, default_value = "20")]
    forks: usize,

    /// Connect timeout in seconds
    #[arg(long, default_value = "15")]
    connect_timeout: u64,

    /// Per-command timeout in seconds
    #[arg(long, default_value = "300")]
    timeout: u64,

    /// Prompt for an SSH password to use where the inventory has none
    #[arg(short = 'k', long)]
    ask_pass: bool,
}

#[derive(Subcommand)]
#[command(disable_colored_help = true)]
enum Commands {
    /// Run a batch of commands against devices
    Run {
        /// Workflow: inspect or config
        mode: ExecutionMode,

        /// Comma-separated device ids
        #[arg(short, long)]
        devices: String,

        /// Comma-separated command ids (catalog ids, or config group names)
        #[arg(short = 'C', long)]
        commands: Option<String>,

        /// Extra ad-hoc command for server-class devices (repeatable)
        #[arg(long = "server-command")]
        server_commands: Vec<String>,

        /// Extra ad-hoc command for network-class devices (repeatable)
        #[arg(long = "network-command")]
        network_commands: Vec<String>,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Re-run a historical job from its replay record
    Replay {
        /// Job id of the report to replay
        job_id: String,

        /// Workflow the job belongs to: inspect or config
        #[arg(short, long, default_value = "inspect")]
        mode: ExecutionMode,

        #[command(flatten)]
        exec: ExecArgs,
    },

    /// List devices in the inventory
    Inventory {
        /// Path to the device inventory file
        #[arg(short, long, default_value = "inventory.yml")]
        inventory: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            mode,
            devices,
            commands,
            server_commands,
            network_commands,
            exec,
        } => {
            let request = BatchRequest {
                device_ids: split_ids(&devices),
                command_ids: commands.as_deref().map(split_ids).unwrap_or_default(),
                server_commands,
                network_commands,
            };
            run_batch(mode, Some(request), None, exec, cli.verbose, cli.quiet).await
        }

        Commands::Replay { job_id, mode, exec } => {
            run_batch(mode, None, Some(job_id), exec, cli.verbose, cli.quiet).await
        }

        Commands::Inventory { inventory } => list_inventory(&inventory),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "patrol=debug" } else { "patrol=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn split_ids(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).collect()
}

/// Run one batch (fresh request or replay) end to end
async fn run_batch(
    mode: ExecutionMode,
    request: Option<BatchRequest>,
    replay_job_id: Option<String>,
    exec: ExecArgs,
    verbose: bool,
    quiet: bool,
) -> Result<(), PatrolError> {
    let password_override = if exec.ask_pass {
        Some(prompt_password("SSH Password: ")?)
    } else {
        None
    };

    let settings = Settings::new(&exec.data_dir);
    let cache = Arc::new(Cache::new());

    let device_store = build_device_store(&exec.inventory, password_override, cache.clone())?;
    let command_store = build_command_store(&exec.catalog, cache.clone())?;

    let transport: Arc<dyn Transport> = Arc::new(TransportRouter::new(
        SshTransport::new()
            .with_connect_timeout(Duration::from_secs(exec.connect_timeout))
            .with_command_timeout(Duration::from_secs(exec.timeout)),
        CliTransport::new()
            .with_connect_timeout(Duration::from_secs(exec.connect_timeout + 5))
            .with_command_timeout(Duration::from_secs(exec.timeout)),
    ));

    let scheduler = JobScheduler::new(
        SchedulerConfig {
            max_parallel_devices: exec.forks,
            ssh_connect_timeout: Duration::from_secs(exec.connect_timeout),
            cli_connect_timeout: Duration::from_secs(exec.connect_timeout + 5),
            command_timeout: Duration::from_secs(exec.timeout),
        },
        device_store,
        command_store,
        transport,
        settings,
        cache,
    );

    let (emitter, rx) = create_event_channel();
    let mut terminal = TerminalOutput::new(verbose, quiet);

    let device_count = request.as_ref().map(|r| r.device_ids.len()).unwrap_or(0);
    if replay_job_id.is_none() {
        terminal.print_job_header(mode.as_str(), device_count);
    }

    // Events go to the terminal while the scheduler runs
    let consumer = tokio::spawn(async move {
        terminal.run(rx).await;
        terminal
    });

    let outcome = match replay_job_id {
        Some(job_id) => scheduler.replay(mode, &job_id, &emitter).await,
        None => match request {
            Some(request) => scheduler.run(mode, request, &emitter).await,
            None => Err(PatrolError::Job {
                message: "No batch request given".to_string(),
                suggestion: None,
            }),
        },
    };

    // Closing the channel lets the consumer drain and exit
    drop(emitter);
    let terminal = match consumer.await {
        Ok(terminal) => terminal,
        Err(_) => TerminalOutput::new(verbose, quiet),
    };

    let record = outcome?;
    terminal.print_recap(&record);

    if has_failures(&record) {
        std::process::exit(2);
    }
    Ok(())
}

fn has_failures(record: &JobRecord) -> bool {
    record.progress.failed_devices > 0 || record.progress.failed_commands > 0
}

fn build_device_store(
    inventory: &Path,
    password_override: Option<String>,
    cache: Arc<Cache>,
) -> Result<Arc<dyn DeviceStore>, PatrolError> {
    let mut devices = FileDeviceStore::from_file(inventory)?.list()?;

    // --ask-pass fills only the devices the inventory leaves blank
    if let Some(password) = password_override {
        for device in &mut devices {
            if device.password.is_empty() {
                device.password = password.clone();
            }
        }
    }

    Ok(Arc::new(CachedDeviceStore::new(
        FileDeviceStore::from_devices(devices),
        cache,
    )))
}

fn build_command_store(
    catalog: &Path,
    cache: Arc<Cache>,
) -> Result<Arc<dyn CommandStore>, PatrolError> {
    // Config mode reads groups from the data directory, not the catalog,
    // so a missing catalog file degrades to an empty one
    let store = if catalog.exists() {
        FileCommandStore::from_file(catalog)?
    } else {
        tracing::warn!(path = %catalog.display(), "command catalog not found, using empty catalog");
        FileCommandStore::from_entries(Vec::new())
    };

    Ok(Arc::new(CachedCommandStore::new(store, cache)))
}

fn list_inventory(path: &Path) -> Result<(), PatrolError> {
    let devices = FileDeviceStore::from_file(path)?.list()?;

    println!(
        "{:<6} {:<20} {:<16} {:<10} {:<12} {}",
        "ID".bold(),
        "NAME".bold(),
        "IP".bold(),
        "TYPE".bold(),
        "OS".bold(),
        "PROTOCOL".bold()
    );

    for device in devices {
        let protocol = format!("{:?}", device.protocol).to_lowercase();
        let protocol = if device.supports_batch_exec() {
            protocol.normal()
        } else {
            protocol.yellow()
        };

        println!(
            "{:<6} {:<20} {:<16} {:<10} {:<12} {}",
            device.id,
            device.name.white().bold(),
            device.ip,
            device.device_type.as_str(),
            device.os_type,
            protocol
        );
    }

    Ok(())
}

fn prompt_password(prompt: &str) -> Result<String, PatrolError> {
    print!("{}", prompt);
    io::stdout().flush().map_err(|e| PatrolError::Io {
        message: format!("Failed to flush stdout: {}", e),
        path: None,
    })?;

    rpassword::read_password().map_err(|e| PatrolError::Io {
        message: format!("Failed to read password: {}", e),
        path: None,
    })
}
