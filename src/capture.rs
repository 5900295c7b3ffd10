//! The closed set of capture types and their canonical commands.
//!
//! The enumeration is fixed when the catalog is built; ingest of a capture
//! type outside the set is an error, never a silent discard.

/// Catalog of capture types known to this deployment.
#[derive(Debug, Clone)]
pub struct CaptureCatalog {
    entries: Vec<(String, String)>,
}

impl CaptureCatalog {
    /// The built-in 31-type enumeration with canonical commands.
    pub fn builtin() -> Self {
        let entries = [
            ("arp", "show arp"),
            ("authentication", "show authentication"),
            ("authorization", "show authorization"),
            ("bgp-neighbor", "show bgp neighbors"),
            ("bgp-summary", "show bgp summary"),
            ("bgp-table", "show bgp"),
            ("bgp-table-detail", "show bgp detail"),
            ("cdp", "show cdp neighbors"),
            ("cdp-detail", "show cdp neighbors detail"),
            ("configs", "show running-config"),
            ("console", "show line console"),
            ("eigrp-neighbor", "show eigrp neighbors"),
            ("int-status", "show interface status"),
            ("interface-status", "show interface status"),
            ("inventory", "show inventory"),
            ("ip_ssh", "show ip ssh"),
            ("lldp", "show lldp neighbors"),
            ("lldp-detail", "show lldp neighbors detail"),
            ("mac", "show mac address-table"),
            ("ntp_status", "show ntp status"),
            ("ospf-neighbor", "show ospf neighbor"),
            ("port-channel", "show port-channel summary"),
            ("port-security", "show port-security"),
            ("power-inline", "show power inline"),
            ("routes", "show ip route"),
            ("snmp_server", "show snmp"),
            ("spanning-tree", "show spanning-tree"),
            ("syslog", "show logging"),
            ("tacacs", "show tacacs"),
            ("version", "show version"),
            ("vlan", "show vlan"),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(t, c)| (t.to_string(), c.to_string()))
                .collect(),
        }
    }

    pub fn contains(&self, capture_type: &str) -> bool {
        self.entries.iter().any(|(t, _)| t == capture_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }

    /// Canonical command for a capture type.
    pub fn command_for(&self, capture_type: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == capture_type)
            .map(|(_, c)| c.as_str())
    }

    /// Reverse mapping: the capture type a command's output belongs under.
    /// Commands outside the table derive a name from the command text.
    pub fn type_for_command(&self, command: &str) -> String {
        let needle = command.trim().to_lowercase();
        if let Some((t, _)) = self.entries.iter().find(|(_, c)| *c == needle) {
            return t.clone();
        }
        needle
            .strip_prefix("show ")
            .unwrap_or(&needle)
            .replace([' ', '/'], "-")
    }

    /// Whether the fingerprint engine consumes this capture type.
    pub fn is_fingerprint_source(capture_type: &str) -> bool {
        matches!(capture_type, "version" | "inventory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_31_types() {
        let catalog = CaptureCatalog::builtin();
        assert_eq!(catalog.types().count(), 31);
        assert!(catalog.contains("version"));
        assert!(catalog.contains("configs"));
        assert!(!catalog.contains("not-a-type"));
    }

    #[test]
    fn test_command_round_trip() {
        let catalog = CaptureCatalog::builtin();
        assert_eq!(catalog.command_for("version"), Some("show version"));
        assert_eq!(catalog.type_for_command("show version"), "version");
        assert_eq!(catalog.type_for_command("show running-config"), "configs");
    }

    #[test]
    fn test_unknown_command_derives_name() {
        let catalog = CaptureCatalog::builtin();
        assert_eq!(catalog.type_for_command("show ip dhcp binding"), "ip-dhcp-binding");
    }

    #[test]
    fn test_fingerprint_sources() {
        assert!(CaptureCatalog::is_fingerprint_source("version"));
        assert!(CaptureCatalog::is_fingerprint_source("inventory"));
        assert!(!CaptureCatalog::is_fingerprint_source("configs"));
    }
}
