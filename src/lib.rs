// Patrol - batch device inspection and configuration
//
// Runs command batches over SSH against a mixed fleet of servers and
// network devices: one bounded task per device, live progress events,
// replayable reports.

pub mod cache;
pub mod engine;
pub mod inventory;
pub mod output;
pub mod settings;
pub mod transport;

pub use engine::{
    BatchRequest, ExecutionMode, JobRecord, JobRegistry, JobScheduler, SchedulerConfig,
};
pub use inventory::{Device, DeviceStore, DeviceType, FileDeviceStore};
pub use output::{create_event_channel, EventEmitter, JobEvent, PatrolError, TerminalOutput};
pub use settings::Settings;
pub use transport::{CliTransport, SshTransport, Transport, TransportRouter};

/// Version of the Patrol tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::Cache;
    pub use crate::engine::{BatchRequest, ExecutionMode, JobRecord, JobScheduler, SchedulerConfig};
    pub use crate::inventory::{Device, DeviceStore, FileCommandStore, FileDeviceStore};
    pub use crate::output::{create_event_channel, EventEmitter, JobEvent, PatrolError};
    pub use crate::settings::Settings;
    pub use crate::transport::{Transport, TransportRouter};
}
