// Command catalog: catalog entries, os_type filtering, config groups

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{Cache, KEY_COMMANDS};
use crate::output::errors::PatrolError;

/// One catalog command, bound to the os_type it applies to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub command_text: String,
    pub os_type: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Resolves command ids into catalog entries
pub trait CommandStore: Send + Sync {
    /// Look up entries for the given ids
    ///
    /// Unknown ids are skipped, not errors: a device task only cares about
    /// the entries that match its os_type anyway.
    fn lookup(&self, ids: &[String]) -> Result<Vec<CatalogEntry>, PatrolError>;

    /// The full catalog, in id order
    fn list(&self) -> Result<Vec<CatalogEntry>, PatrolError>;
}

/// Command texts applicable to one device, in catalog order
pub fn filter_for_os(entries: &[CatalogEntry], os_type: &str) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.os_type == os_type)
        .map(|e| e.command_text.clone())
        .collect()
}

/// YAML-backed command catalog
pub struct FileCommandStore {
    entries: HashMap<String, CatalogEntry>,
}

impl FileCommandStore {
    pub fn from_file(path: &Path) -> Result<Self, PatrolError> {
        let content = std::fs::read_to_string(path).map_err(|e| PatrolError::Io {
            message: format!("Failed to read command catalog: {}", e),
            path: Some(path.to_path_buf()),
        })?;
        Self::parse_str(&content)
    }

    pub fn parse_str(content: &str) -> Result<Self, PatrolError> {
        let entries: Vec<CatalogEntry> =
            serde_yaml::from_str(content).map_err(|e| PatrolError::Inventory {
                message: format!("Invalid command catalog: {}", e),
                suggestion: Some("Expected a YAML list of command records".to_string()),
            })?;

        Ok(FileCommandStore {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        })
    }

    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        FileCommandStore {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }
}

impl CommandStore for FileCommandStore {
    fn lookup(&self, ids: &[String]) -> Result<Vec<CatalogEntry>, PatrolError> {
        let mut found = Vec::new();
        for id in ids {
            match self.entries.get(id) {
                Some(entry) => found.push(entry.clone()),
                None => tracing::warn!(command_id = %id, "command id not in catalog, skipping"),
            }
        }
        Ok(found)
    }

    fn list(&self) -> Result<Vec<CatalogEntry>, PatrolError> {
        let mut entries: Vec<CatalogEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }
}

/// Cache-backed view over a command store, keyed `commands`
pub struct CachedCommandStore<S> {
    inner: S,
    cache: Arc<Cache>,
}

impl<S: CommandStore> CachedCommandStore<S> {
    pub fn new(inner: S, cache: Arc<Cache>) -> Self {
        CachedCommandStore { inner, cache }
    }
}

impl<S: CommandStore> CachedCommandStore<S> {
    fn cached_catalog(&self) -> Option<Vec<CatalogEntry>> {
        let value = self.cache.get(KEY_COMMANDS)?;
        serde_json::from_value(value).ok()
    }

    fn fill_cache(&self) -> Result<Vec<CatalogEntry>, PatrolError> {
        let entries = self.inner.list()?;
        if let Ok(value) = serde_json::to_value(&entries) {
            self.cache.put(KEY_COMMANDS, value);
        }
        Ok(entries)
    }
}

impl<S: CommandStore> CommandStore for CachedCommandStore<S> {
    fn lookup(&self, ids: &[String]) -> Result<Vec<CatalogEntry>, PatrolError> {
        let catalog = match self.cached_catalog() {
            Some(cached) => {
                tracing::debug!("command cache hit");
                cached
            }
            None => {
                tracing::debug!("command cache miss, loading store");
                self.fill_cache()?
            }
        };

        let by_id: HashMap<&str, &CatalogEntry> =
            catalog.iter().map(|e| (e.id.as_str(), e)).collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|e| (*e).clone()))
            .collect())
    }

    fn list(&self) -> Result<Vec<CatalogEntry>, PatrolError> {
        match self.cached_catalog() {
            Some(cached) => Ok(cached),
            None => self.fill_cache(),
        }
    }
}

/// Load config-mode command groups from `<netconf_dir>/<group>.conf`
///
/// Group ids follow the `<os_type>__<name>` convention, one command per
/// line in the file. A missing file yields an empty group so a typo in the
/// request degrades to a no-op instead of failing the device.
pub fn load_config_groups(
    netconf_dir: &Path,
    group_ids: &[String],
) -> Vec<(String, Vec<String>)> {
    let mut groups = Vec::new();
    for id in group_ids {
        let path = netconf_dir.join(format!("{}.conf", id));
        let commands = match std::fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
            Err(_) => {
                tracing::warn!(group = %id, path = %path.display(), "config group file missing");
                Vec::new()
            }
        };
        groups.push((id.clone(), commands));
    }
    groups
}

/// Keep only the groups whose key names this os_type
pub fn filter_groups_for_os(
    groups: Vec<(String, Vec<String>)>,
    os_type: &str,
) -> Vec<(String, Vec<String>)> {
    groups
        .into_iter()
        .filter(|(key, _)| key.contains(os_type))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CATALOG: &str = r#"
- id: "1"
  command_text: uptime
  os_type: linux
- id: "2"
  command_text: display version
  os_type: hp_comware
- id: "3"
  command_text: df -h
  os_type: linux
"#;

    #[test]
    fn test_lookup_skips_unknown_ids() {
        let store = FileCommandStore::parse_str(CATALOG).unwrap();
        let ids = vec!["1".to_string(), "42".to_string(), "3".to_string()];
        let entries = store.lookup(&ids).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_filter_for_os() {
        let store = FileCommandStore::parse_str(CATALOG).unwrap();
        let ids: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
        let entries = store.lookup(&ids).unwrap();

        let linux = filter_for_os(&entries, "linux");
        assert_eq!(linux, vec!["uptime".to_string(), "df -h".to_string()]);

        let comware = filter_for_os(&entries, "hp_comware");
        assert_eq!(comware, vec!["display version".to_string()]);
    }

    #[test]
    fn test_load_config_groups() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("hp_comware__ntp.conf"),
            "ntp-service enable\nntp-service unicast-server 10.0.0.1\n\n",
        )
        .unwrap();

        let ids = vec![
            "hp_comware__ntp".to_string(),
            "hp_comware__missing".to_string(),
        ];
        let groups = load_config_groups(tmp.path(), &ids);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 2);
        assert!(groups[1].1.is_empty());
    }

    #[test]
    fn test_filter_groups_for_os() {
        let groups = vec![
            ("hp_comware__ntp".to_string(), vec!["a".to_string()]),
            ("cisco_ios__clock".to_string(), vec!["b".to_string()]),
        ];
        let kept = filter_groups_for_os(groups, "hp_comware");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].0, "hp_comware__ntp");
    }

    #[test]
    fn test_cached_store_serves_from_cache() {
        let cache = Arc::new(Cache::new());
        let store = CachedCommandStore::new(
            FileCommandStore::parse_str(CATALOG).unwrap(),
            cache.clone(),
        );

        let ids = vec!["2".to_string()];
        let first = store.lookup(&ids).unwrap();
        assert_eq!(first.len(), 1);
        assert!(cache.contains(KEY_COMMANDS));
    }
}
