//! Device inventory document and filtering.
//!
//! The inventory is a JSON document of folder groups, each holding device
//! sessions. Unknown fields are ignored; `credential_id` joins a session to
//! the environment credential source.

use std::path::Path;

use log::info;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::fingerprint::site_code_of;

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Cannot read inventory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed inventory {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level inventory document.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventoryDoc {
    #[serde(default)]
    pub groups: Vec<InventoryGroup>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InventoryGroup {
    #[serde(default)]
    pub folder_name: String,

    #[serde(default)]
    pub sessions: Vec<DeviceEntry>,
}

/// One device session from the inventory.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub display_name: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub vendor: Option<String>,

    #[serde(default)]
    pub device_type: Option<String>,

    #[serde(default)]
    pub credential_id: String,

    /// Folder the entry came from; attached during flattening.
    #[serde(skip)]
    pub folder_name: String,
}

fn default_port() -> u16 {
    22
}

impl DeviceEntry {
    /// Site code derived from the display name prefix.
    pub fn site_code(&self) -> String {
        site_code_of(&self.display_name)
    }
}

impl InventoryDoc {
    /// Read and decode an inventory document.
    pub fn load(path: &Path) -> Result<Self, InventoryError> {
        let text = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let doc: InventoryDoc =
            serde_json::from_str(&text).map_err(|source| InventoryError::Malformed {
                path: path.display().to_string(),
                source,
            })?;
        info!(
            "loaded inventory {}: {} groups, {} devices",
            path.display(),
            doc.groups.len(),
            doc.groups.iter().map(|g| g.sessions.len()).sum::<usize>()
        );
        Ok(doc)
    }

    /// Flatten groups into device entries with folder context attached.
    pub fn devices(&self) -> Vec<DeviceEntry> {
        let mut out = Vec::new();
        for group in &self.groups {
            for session in &group.sessions {
                let mut entry = session.clone();
                entry.folder_name = group.folder_name.clone();
                out.push(entry);
            }
        }
        out
    }
}

/// Inventory filter criteria from the CLI.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub site: Option<String>,
    pub vendor: Option<String>,
    pub name: Option<String>,
}

impl DeviceFilter {
    pub fn matches(&self, entry: &DeviceEntry) -> bool {
        if let Some(pattern) = &self.site {
            if !match_pattern(&entry.site_code(), pattern) {
                return false;
            }
        }
        if let Some(pattern) = &self.vendor {
            let vendor = entry.vendor.as_deref().unwrap_or("");
            if !match_pattern(vendor, pattern) {
                return false;
            }
        }
        if let Some(pattern) = &self.name {
            if !match_pattern(&entry.display_name, pattern) {
                return false;
            }
        }
        true
    }

    /// Apply to a device list.
    pub fn apply(&self, devices: Vec<DeviceEntry>) -> Vec<DeviceEntry> {
        devices.into_iter().filter(|d| self.matches(d)).collect()
    }
}

/// Case-insensitive pattern match: `*` wildcards become regex, anything
/// else is a substring test.
pub fn match_pattern(text: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();

    if pattern.contains('*') {
        let escaped = regex::escape(&pattern).replace(r"\*", ".*");
        return Regex::new(&format!("^{}$", escaped))
            .map(|re| re.is_match(&text))
            .unwrap_or(false);
    }
    text.contains(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> InventoryDoc {
        serde_json::from_str(
            r#"{
                "groups": [
                    {
                        "folder_name": "Campus",
                        "sessions": [
                            {"display_name": "ABC-SW-01", "host": "10.0.0.1", "vendor": "cisco_ios", "credential_id": "1"},
                            {"display_name": "ABC-RT-01", "host": "10.0.0.2", "port": 2222, "vendor": "juniper", "credential_id": "2"}
                        ]
                    },
                    {
                        "folder_name": "DC",
                        "sessions": [
                            {"display_name": "NYC-CORE-01", "host": "10.1.0.1", "vendor": "arista", "credential_id": "1",
                             "unknown_field": "ignored"}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_flatten_attaches_folder() {
        let devices = doc().devices();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].folder_name, "Campus");
        assert_eq!(devices[2].folder_name, "DC");
        assert_eq!(devices[0].port, 22);
        assert_eq!(devices[1].port, 2222);
    }

    #[test]
    fn test_filter_by_site_and_vendor() {
        let devices = doc().devices();
        let filter = DeviceFilter {
            site: Some("ABC".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.apply(devices.clone()).len(), 2);

        let filter = DeviceFilter {
            vendor: Some("cisco*".to_string()),
            ..Default::default()
        };
        let matched = filter.apply(devices);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].display_name, "ABC-SW-01");
    }

    #[test]
    fn test_filter_by_name_wildcard() {
        let devices = doc().devices();
        let filter = DeviceFilter {
            name: Some("*core*".to_string()),
            ..Default::default()
        };
        let matched = filter.apply(devices);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].display_name, "NYC-CORE-01");
    }

    #[test]
    fn test_match_pattern_substring_and_wildcard() {
        assert!(match_pattern("ABC-SW-01", "sw"));
        assert!(match_pattern("ABC-SW-01", "abc-*"));
        assert!(!match_pattern("ABC-SW-01", "xyz"));
        assert!(match_pattern("anything", ""));
    }
}
