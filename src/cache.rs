// Process-wide key-value cache with explicit invalidation

use dashmap::DashMap;
use serde_json::Value;

/// Cache key for the resolved device list
pub const KEY_DEVICES: &str = "devices_list";
/// Cache key for the command catalog
pub const KEY_COMMANDS: &str = "commands";
/// Cache key for the historical inspection job list
pub const KEY_INSPECT_HISTORY: &str = "devices_inspections";
/// Cache key for the historical configuration job list
pub const KEY_CONFIG_HISTORY: &str = "devices_configs";

/// Keyed cache shared by the stores and the report finalizer
///
/// Values are JSON documents so heterogeneous lists (devices, catalog
/// entries, job indexes) share one structure. Staleness is handled by
/// explicit deletes at job completion, never by TTL.
#[derive(Default)]
pub struct Cache {
    entries: DashMap<String, Value>,
}

impl Cache {
    pub fn new() -> Self {
        Cache {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
