// Inventory module for device management

pub mod catalog;

pub use catalog::{
    filter_for_os, filter_groups_for_os, load_config_groups, CachedCommandStore, CatalogEntry,
    CommandStore, FileCommandStore,
};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{Cache, KEY_DEVICES};
use crate::output::errors::PatrolError;

/// Class of device, decides the transport dialect and override list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Server,
    Switch,
    Router,
    Firewall,
}

impl DeviceType {
    /// Network devices get the vendor CLI transport and the network override list
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            DeviceType::Switch | DeviceType::Router | DeviceType::Firewall
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Server => "server",
            DeviceType::Switch => "switch",
            DeviceType::Router => "router",
            DeviceType::Firewall => "firewall",
        }
    }
}

/// Connection protocol recorded in the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ssh,
    Telnet,
    Serial,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::Ssh
    }
}

fn default_port() -> u16 {
    22
}

/// Resolved connection parameters for one device
///
/// A read-only snapshot: resolved once at device-task start and never
/// refreshed mid-job, so out-of-band credential changes cannot surface
/// while commands are running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssh_key: Option<String>,
    pub device_type: DeviceType,
    pub os_type: String,
    #[serde(default)]
    pub protocol: Protocol,
}

impl Device {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Device {
            id: id.into(),
            name: name.into(),
            ip: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            ssh_key: None,
            device_type: DeviceType::Server,
            os_type: "linux".to_string(),
            protocol: Protocol::Ssh,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_os_type(mut self, os_type: impl Into<String>) -> Self {
        self.os_type = os_type.into();
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Batch execution only drives SSH-reachable devices; telnet and serial
    /// sessions go through the interactive console instead
    pub fn supports_batch_exec(&self) -> bool {
        self.protocol == Protocol::Ssh
    }

    /// Session log file name inside a job directory
    pub fn session_log_name(&self) -> String {
        format!("{}__{}.log", self.name, self.ip)
    }
}

/// Maps a device id to its connection snapshot
pub trait DeviceStore: Send + Sync {
    fn resolve(&self, id: &str) -> Result<Device, PatrolError>;

    fn list(&self) -> Result<Vec<Device>, PatrolError>;
}

/// YAML-backed device store
///
/// Stands in for the external inventory database; the file is a flat list
/// of device records.
pub struct FileDeviceStore {
    devices: HashMap<String, Device>,
}

impl FileDeviceStore {
    pub fn from_file(path: &Path) -> Result<Self, PatrolError> {
        let content = std::fs::read_to_string(path).map_err(|e| PatrolError::Io {
            message: format!("Failed to read inventory: {}", e),
            path: Some(path.to_path_buf()),
        })?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Self, PatrolError> {
        let devices: Vec<Device> =
            serde_yaml::from_str(content).map_err(|e| PatrolError::Inventory {
                message: format!("Invalid inventory file: {}", e),
                suggestion: Some("Expected a YAML list of device records".to_string()),
            })?;

        Ok(FileDeviceStore {
            devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
        })
    }

    pub fn from_devices(devices: Vec<Device>) -> Self {
        FileDeviceStore {
            devices: devices.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }
}

impl DeviceStore for FileDeviceStore {
    fn resolve(&self, id: &str) -> Result<Device, PatrolError> {
        self.devices
            .get(id)
            .cloned()
            .ok_or_else(|| PatrolError::Inventory {
                message: format!("Device id {} not found", id),
                suggestion: Some("Check the inventory file for this id".to_string()),
            })
    }

    fn list(&self) -> Result<Vec<Device>, PatrolError> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }
}

/// Cache-backed view over a device store
///
/// The full device list is cached under `devices_list`; a lookup that hits
/// the cache never touches the inner store.
pub struct CachedDeviceStore<S> {
    inner: S,
    cache: Arc<Cache>,
}

impl<S: DeviceStore> CachedDeviceStore<S> {
    pub fn new(inner: S, cache: Arc<Cache>) -> Self {
        CachedDeviceStore { inner, cache }
    }

    fn cached_list(&self) -> Option<Vec<Device>> {
        let value = self.cache.get(KEY_DEVICES)?;
        serde_json::from_value(value).ok()
    }

    fn fill_cache(&self) -> Result<Vec<Device>, PatrolError> {
        let devices = self.inner.list()?;
        if let Ok(value) = serde_json::to_value(&devices) {
            self.cache.put(KEY_DEVICES, value);
        }
        Ok(devices)
    }
}

impl<S: DeviceStore> DeviceStore for CachedDeviceStore<S> {
    fn resolve(&self, id: &str) -> Result<Device, PatrolError> {
        if let Some(devices) = self.cached_list() {
            tracing::debug!(device_id = id, "device cache hit");
            return devices
                .into_iter()
                .find(|d| d.id == id)
                .ok_or_else(|| PatrolError::Inventory {
                    message: format!("Device id {} not found", id),
                    suggestion: Some("Check the inventory file for this id".to_string()),
                });
        }

        tracing::debug!(device_id = id, "device cache miss, loading store");
        let devices = self.fill_cache()?;
        devices
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| PatrolError::Inventory {
                message: format!("Device id {} not found", id),
                suggestion: Some("Check the inventory file for this id".to_string()),
            })
    }

    fn list(&self) -> Result<Vec<Device>, PatrolError> {
        if let Some(devices) = self.cached_list() {
            return Ok(devices);
        }
        self.fill_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
- id: "5"
  name: web-01
  ip: 10.0.0.5
  username: ops
  password: secret
  device_type: server
  os_type: linux
- id: "7"
  name: core-sw-01
  ip: 10.0.1.1
  port: 2222
  username: admin
  password: secret
  device_type: switch
  os_type: hp_comware
"#;

    #[test]
    fn test_parse_inventory() {
        let store = FileDeviceStore::parse_str(INVENTORY).unwrap();
        let device = store.resolve("7").unwrap();
        assert_eq!(device.name, "core-sw-01");
        assert_eq!(device.port, 2222);
        assert!(device.device_type.is_network());
        assert_eq!(device.protocol, Protocol::Ssh);
    }

    #[test]
    fn test_default_port_and_protocol() {
        let store = FileDeviceStore::parse_str(INVENTORY).unwrap();
        let device = store.resolve("5").unwrap();
        assert_eq!(device.port, 22);
        assert!(device.supports_batch_exec());
    }

    #[test]
    fn test_resolve_unknown_id() {
        let store = FileDeviceStore::parse_str(INVENTORY).unwrap();
        let err = store.resolve("99").unwrap_err();
        assert!(matches!(err, PatrolError::Inventory { .. }));
    }

    #[test]
    fn test_session_log_name() {
        let device = Device::new("1", "fw-edge").with_ip("192.168.1.1");
        assert_eq!(device.session_log_name(), "fw-edge__192.168.1.1.log");
    }

    #[test]
    fn test_cached_store_hits_cache_after_first_lookup() {
        let cache = Arc::new(Cache::new());
        let store = CachedDeviceStore::new(
            FileDeviceStore::parse_str(INVENTORY).unwrap(),
            cache.clone(),
        );

        assert!(!cache.contains(KEY_DEVICES));
        store.resolve("5").unwrap();
        assert!(cache.contains(KEY_DEVICES));

        // Still resolvable once the cache is primed
        let device = store.resolve("7").unwrap();
        assert_eq!(device.os_type, "hp_comware");
    }
}
