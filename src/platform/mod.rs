//! Vendor profiles: prologue commands, failure markers, output fingerprints.
//!
//! A profile tells the session how to quiet a device before capture (paging
//! disable, width), how to recognize a rejected command, and what substrings
//! in `show version`-style output identify the vendor when the inventory
//! carries no hint.

use indexmap::IndexMap;

/// Per-vendor behavior bundle.
#[derive(Debug, Clone)]
pub struct VendorProfile {
    /// Platform tag, e.g. "cisco_ios", "juniper_junos". Matches the vendor
    /// tag carried on templates.
    pub tag: String,

    /// Canonical vendor name for inventory rows.
    pub vendor_name: String,

    /// Short vendor tag used in filenames and filters.
    pub short_name: String,

    /// Commands issued before the real command set.
    pub prologue: Vec<String>,

    /// Privilege-elevation command ("enable"), for vendors that gate
    /// operational commands behind a privileged mode.
    pub elevate_command: Option<String>,

    /// Lowercase tail marker of the elevation password prompt.
    pub elevate_prompt: Option<String>,

    /// Substrings that indicate a rejected command.
    pub failure_markers: Vec<String>,

    /// Lowercase substrings of command output that identify this vendor.
    pub output_hints: Vec<String>,

    /// Driver string consumed by external tooling.
    pub driver: String,
}

impl VendorProfile {
    fn new(tag: &str, vendor_name: &str, short_name: &str, driver: &str) -> Self {
        Self {
            tag: tag.to_string(),
            vendor_name: vendor_name.to_string(),
            short_name: short_name.to_string(),
            prologue: Vec::new(),
            elevate_command: None,
            elevate_prompt: None,
            failure_markers: Vec::new(),
            output_hints: Vec::new(),
            driver: driver.to_string(),
        }
    }

    fn with_prologue(mut self, commands: &[&str]) -> Self {
        self.prologue = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    fn with_elevation(mut self, command: &str, prompt_marker: &str) -> Self {
        self.elevate_command = Some(command.to_string());
        self.elevate_prompt = Some(prompt_marker.to_string());
        self
    }

    fn with_failure_markers(mut self, markers: &[&str]) -> Self {
        self.failure_markers = markers.iter().map(|m| m.to_string()).collect();
        self
    }

    fn with_output_hints(mut self, hints: &[&str]) -> Self {
        self.output_hints = hints.iter().map(|h| h.to_string()).collect();
        self
    }

    /// Check output text for a rejected-command marker.
    pub fn detect_failure(&self, output: &str) -> Option<&str> {
        self.failure_markers
            .iter()
            .map(String::as_str)
            .find(|marker| output.contains(marker))
    }
}

/// Immutable catalog of vendor profiles, keyed by tag.
///
/// Built once at startup and shared read-only, like the template catalog.
#[derive(Debug)]
pub struct VendorRegistry {
    profiles: IndexMap<String, VendorProfile>,
}

impl VendorRegistry {
    /// The built-in fleet: Cisco IOS/NX-OS/ASA, Arista, Juniper, HP
    /// ProCurve, Palo Alto, Fortinet.
    pub fn builtin() -> Self {
        let mut profiles = IndexMap::new();

        let cisco_failures: &[&str] = &[
            "% Invalid input",
            "% Incomplete command",
            "% Ambiguous command",
            "% Error",
        ];

        for profile in [
            VendorProfile::new("cisco_ios", "Cisco Systems", "cisco", "cisco_ios")
                .with_prologue(&["terminal length 0", "terminal width 0"])
                .with_elevation("enable", "assword:")
                .with_failure_markers(cisco_failures)
                .with_output_hints(&[
                    "cisco ios",
                    "cisco internetwork operating system",
                    "ios software",
                    "catalyst",
                    "c9300",
                    "c9200",
                    "c3850",
                    "c2960",
                    "ws-c",
                ]),
            VendorProfile::new("cisco_nxos", "Cisco Systems", "cisco", "cisco_nxos")
                .with_prologue(&["terminal length 0", "terminal width 511"])
                .with_failure_markers(cisco_failures)
                .with_output_hints(&["nx-os", "nexus", "cisco nexus", "nxos"]),
            VendorProfile::new("cisco_asa", "Cisco Systems", "cisco", "cisco_asa")
                .with_prologue(&["terminal pager 0"])
                .with_elevation("enable", "assword:")
                .with_failure_markers(cisco_failures)
                .with_output_hints(&["adaptive security appliance", "cisco asa", "asa version"]),
            VendorProfile::new("arista_eos", "Arista Networks", "arista", "arista_eos")
                .with_prologue(&["terminal length 0", "terminal width 32767"])
                .with_elevation("enable", "assword:")
                .with_failure_markers(&[
                    "% Invalid input",
                    "% Incomplete command",
                    "% Ambiguous command",
                    "% Unavailable command",
                ])
                .with_output_hints(&["arista", "eos version", "dcs-"]),
            VendorProfile::new("juniper_junos", "Juniper Networks", "juniper", "juniper_junos")
                .with_prologue(&["set cli screen-length 0", "set cli screen-width 0"])
                .with_failure_markers(&["syntax error", "unknown command", "error:"])
                .with_output_hints(&["juniper", "junos", "ex4200", "srx", "qfx"]),
            VendorProfile::new("hp_procurve", "Hewlett Packard Enterprise", "hp", "hp_procurve")
                .with_prologue(&["no page"])
                .with_elevation("enable", "assword:")
                .with_failure_markers(&["Invalid input:", "Ambiguous input:"])
                .with_output_hints(&[
                    "procurve",
                    "hewlett-packard",
                    "aruba",
                    "hpe",
                    "status and counters - general system information",
                ]),
            VendorProfile::new("paloalto_panos", "Palo Alto Networks", "paloalto", "paloalto_panos")
                .with_prologue(&["set cli pager off"])
                .with_failure_markers(&["Invalid syntax", "Unknown command"])
                .with_output_hints(&["palo alto", "pan-os", "pa-"]),
            VendorProfile::new("fortinet", "Fortinet", "fortinet", "fortinet")
                .with_prologue(&[])
                .with_failure_markers(&["Unknown action", "Command fail"])
                .with_output_hints(&["fortinet", "fortigate", "fortios"]),
        ] {
            profiles.insert(profile.tag.clone(), profile);
        }

        Self { profiles }
    }

    /// Look up a profile by inventory hint.
    ///
    /// Accepts exact tags ("cisco_ios"), short names ("cisco"), and loose
    /// vendor strings ("Cisco Systems"); short forms resolve to the first
    /// registered profile for that vendor.
    pub fn resolve(&self, hint: &str) -> Option<&VendorProfile> {
        let needle = hint.trim().to_lowercase().replace(['-', ' '], "_");
        if needle.is_empty() {
            return None;
        }
        if let Some(profile) = self.profiles.get(needle.as_str()) {
            return Some(profile);
        }
        self.profiles.values().find(|p| {
            p.short_name == needle
                || p.tag.starts_with(&needle)
                || p.vendor_name.to_lowercase().replace(' ', "_").starts_with(&needle)
        })
    }

    /// Identify a vendor by scanning command output for its hints.
    pub fn detect_from_output(&self, output: &str) -> Option<&VendorProfile> {
        let haystack = output.to_lowercase();
        self.profiles
            .values()
            .find(|p| p.output_hints.iter().any(|hint| haystack.contains(hint)))
    }

    pub fn get(&self, tag: &str) -> Option<&VendorProfile> {
        self.profiles.get(tag)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &VendorProfile> {
        self.profiles.values()
    }

    /// The prologue for a device with no usable vendor hint: the union of
    /// every vendor's paging-disable commands, in registration order.
    /// Unknown commands are rejected harmlessly by the wrong vendors.
    pub fn generic_prologue(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for profile in self.profiles.values() {
            for cmd in &profile.prologue {
                if !seen.contains(cmd) {
                    seen.push(cmd.clone());
                }
            }
        }
        seen
    }
}
