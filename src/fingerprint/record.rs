//! Fingerprint artifact and derived device records.
//!
//! `FingerprintRecord` is the on-disk JSON artifact with fixed,
//! case-sensitive field names; unknown input fields are ignored on read.
//! `DeviceRecord` is the normalized shape the loader writes to the store.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// On-disk fingerprint artifact, one per device.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FingerprintRecord {
    #[serde(default)]
    pub hostname: String,

    /// Management host (name or IP) the session connected to.
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: String,

    #[serde(default)]
    pub model: String,

    /// Comma-joined when the device is a stack.
    #[serde(default)]
    pub serial_number: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub uptime: String,

    #[serde(default = "default_true")]
    pub success: bool,

    #[serde(default)]
    pub fingerprint_time: String,

    #[serde(default)]
    pub detected_prompt: String,

    /// Raw output and parse results, keyed by the triggering command.
    /// Parse results use the `<command>_textfsm` key convention.
    #[serde(default)]
    pub command_outputs: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub additional_info: AdditionalInfo,
}

fn default_true() -> bool {
    true
}

/// Vendor and driver hints carried on the artifact.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdditionalInfo {
    #[serde(default)]
    pub vendor: String,

    #[serde(default)]
    pub driver: String,

    #[serde(default)]
    pub display_name: String,
}

/// Parse-result payload stored under a `<command>_textfsm` key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TextFsmOutput {
    #[serde(default)]
    pub template_used: String,

    #[serde(default)]
    pub template_score: i64,

    #[serde(default)]
    pub records: Vec<BTreeMap<String, String>>,
}

/// Normalized device shape for store ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub hostname: String,
    pub normalized_name: String,
    pub site_code: String,
    pub vendor_name: String,
    pub device_type: String,
    pub role: String,
    pub model: String,
    pub os_version: String,
    pub uptime: Option<String>,
    pub uptime_minutes: Option<i64>,
    pub management_ip: String,
    pub serials: Vec<String>,
    pub stack_members: Vec<StackMemberRecord>,
    pub components: Vec<ComponentRecord>,
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMemberRecord {
    /// 1-based stack position.
    pub position: i64,
    pub model: String,
    pub serial: String,
    pub is_master: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentRecord {
    pub kind: ComponentKind,
    pub name: String,
    pub description: String,
    pub serial: Option<String>,
    pub position: String,
    /// Template id (or other extractor) this component came from.
    pub extraction_source: String,
    /// Extractor confidence in [0, 1].
    pub extraction_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Chassis,
    Module,
    Supervisor,
    Psu,
    Fan,
    Transceiver,
    Unknown,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Chassis => "chassis",
            ComponentKind::Module => "module",
            ComponentKind::Supervisor => "supervisor",
            ComponentKind::Psu => "psu",
            ComponentKind::Fan => "fan",
            ComponentKind::Transceiver => "transceiver",
            ComponentKind::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "chassis" => ComponentKind::Chassis,
            "module" => ComponentKind::Module,
            "supervisor" => ComponentKind::Supervisor,
            "psu" => ComponentKind::Psu,
            "fan" => ComponentKind::Fan,
            "transceiver" => ComponentKind::Transceiver,
            _ => ComponentKind::Unknown,
        }
    }

    /// Classify a component by its inventory description and name.
    pub fn classify(name: &str, description: &str) -> Self {
        let text = format!("{} {}", name, description).to_lowercase();
        if text.contains("chassis") {
            ComponentKind::Chassis
        } else if text.contains("supervisor") {
            ComponentKind::Supervisor
        } else if text.contains("power supply") || text.contains("psu") {
            ComponentKind::Psu
        } else if text.contains("fan") {
            ComponentKind::Fan
        } else if text.contains("transceiver")
            || text.contains("sfp")
            || text.contains("gbic")
            || text.contains("qsfp")
        {
            ComponentKind::Transceiver
        } else if text.contains("module") || text.contains("card") || text.contains("linecard") {
            ComponentKind::Module
        } else {
            ComponentKind::Unknown
        }
    }
}

/// Lowercase a hostname and collapse punctuation to single dashes.
pub fn normalize_name(hostname: &str) -> String {
    let mut out = String::with_capacity(hostname.len());
    let mut last_dash = false;
    for ch in hostname.trim().to_lowercase().chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' | '.' | '_' => {
                last_dash = false;
                Some(ch)
            }
            _ => {
                if last_dash {
                    None
                } else {
                    last_dash = true;
                    Some('-')
                }
            }
        };
        if let Some(c) = mapped {
            out.push(c);
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "unknown-device".to_string()
    } else {
        trimmed
    }
}

static SITE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z]+)-").unwrap());
static SITE_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z]{2,4})\d").unwrap());

/// Derive a site code from a hostname (`PREFIX-...` convention).
/// Hosts outside the convention bucket into `UNKNOWN`.
pub fn site_code_of(hostname: &str) -> String {
    for pattern in [&*SITE_PREFIX, &*SITE_ALNUM] {
        if let Some(caps) = pattern.captures(hostname) {
            return caps[1].to_uppercase();
        }
    }
    "UNKNOWN".to_string()
}

/// Role name derived from the `site-role-NN` hostname convention.
///
/// Keyed on hostname tokens; hosts outside the convention bucket into
/// `unknown`, to be reassigned by operators later.
pub fn role_of(hostname: &str) -> String {
    let normalized = normalize_name(hostname);
    for token in normalized.split(['-', '.']) {
        let role = match token {
            "core" | "cr" => "core",
            "dist" | "ds" | "dsw" => "distribution",
            "sw" | "as" | "asw" | "acc" => "access",
            "rt" | "rtr" | "gw" | "edge" => "router",
            "fw" | "asa" => "firewall",
            "wlc" | "ap" => "wireless",
            _ => continue,
        };
        return role.to_string();
    }
    "unknown".to_string()
}

/// Split a comma-joined field into trimmed, non-empty parts.
pub fn split_joined(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strip trailing prompt characters from a detected prompt to recover the
/// hostname embedded in it.
pub fn hostname_from_prompt(prompt: &str) -> String {
    prompt
        .trim()
        .trim_end_matches(['#', '>', '$', '%', ':', ' '])
        .to_string()
}

static UPTIME_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+(year|week|day|hour|minute)s?").unwrap());

/// Total minutes represented by an uptime phrase like
/// "1 year, 2 weeks, 3 days, 4 hours, 5 minutes".
pub fn uptime_minutes(uptime: &str) -> Option<i64> {
    let mut total: i64 = 0;
    let mut matched = false;
    for caps in UPTIME_PART.captures_iter(uptime) {
        let count: i64 = caps[1].parse().ok()?;
        let unit = match &caps[2] {
            "year" => 525_600,
            "week" => 10_080,
            "day" => 1_440,
            "hour" => 60,
            "minute" => 1,
            _ => 0,
        };
        total += count * unit;
        matched = true;
    }
    matched.then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("ABC-SW-01"), "abc-sw-01");
        assert_eq!(normalize_name("Core Switch #1"), "core-switch-1");
        assert_eq!(normalize_name("  edge.rt.02  "), "edge.rt.02");
        assert_eq!(normalize_name(""), "unknown-device");
    }

    #[test]
    fn test_site_code() {
        assert_eq!(site_code_of("ABC-SW-01"), "ABC");
        assert_eq!(site_code_of("nyc-core-1"), "NYC");
        assert_eq!(site_code_of("den3-leaf"), "DEN");
        assert_eq!(site_code_of("standalone"), "UNKNOWN");
    }

    #[test]
    fn test_role_of() {
        assert_eq!(role_of("ABC-SW-01"), "access");
        assert_eq!(role_of("NYC-CORE-01"), "core");
        assert_eq!(role_of("abc-rt-02"), "router");
        assert_eq!(role_of("edge-fw-03"), "router"); // first token wins
        assert_eq!(role_of("dc1-fw-01"), "firewall");
        assert_eq!(role_of("site-wlc-1"), "wireless");
        assert_eq!(role_of("mystery-box"), "unknown");
    }

    #[test]
    fn test_split_joined() {
        assert_eq!(
            split_joined("FCW2425G0BB, FJC2422E0NW, FJC2422E0NB"),
            vec!["FCW2425G0BB", "FJC2422E0NW", "FJC2422E0NB"]
        );
        assert_eq!(split_joined("single"), vec!["single"]);
        assert!(split_joined("").is_empty());
    }

    #[test]
    fn test_hostname_from_prompt() {
        assert_eq!(hostname_from_prompt("core-sw-01#"), "core-sw-01");
        assert_eq!(hostname_from_prompt("user@edge> "), "user@edge");
    }

    #[test]
    fn test_uptime_minutes() {
        assert_eq!(
            uptime_minutes("1 week, 2 days, 3 hours, 4 minutes"),
            Some(10_080 + 2 * 1_440 + 3 * 60 + 4)
        );
        assert_eq!(uptime_minutes("55 minutes"), Some(55));
        assert_eq!(uptime_minutes("not an uptime"), None);
    }

    #[test]
    fn test_component_classify() {
        assert_eq!(ComponentKind::classify("Switch 1", "C9300-48UXM chassis"), ComponentKind::Chassis);
        assert_eq!(ComponentKind::classify("PS-1", "110W AC Power Supply"), ComponentKind::Psu);
        assert_eq!(ComponentKind::classify("Te1/1/1", "10G SFP+ transceiver"), ComponentKind::Transceiver);
        assert_eq!(ComponentKind::classify("Slot 2", "48-port linecard"), ComponentKind::Module);
        assert_eq!(ComponentKind::classify("X", "Y"), ComponentKind::Unknown);
    }

    #[test]
    fn test_record_roundtrip_ignores_unknown_fields() {
        let json = r#"{
            "hostname": "abc-sw-01",
            "host": "10.0.0.1",
            "serial_number": "FOC1234ABCD",
            "version": "15.2(7)E",
            "additional_info": {"vendor": "cisco", "driver": "cisco_ios", "future_field": 1},
            "unexpected_top_level": {"ignored": true}
        }"#;
        let rec: FingerprintRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.hostname, "abc-sw-01");
        assert_eq!(rec.additional_info.vendor, "cisco");
        assert!(rec.success);
    }
}
