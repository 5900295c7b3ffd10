//! Fingerprint engine: template scoring, record assembly, device derivation.
//!
//! `parse` runs every candidate template against a command's output and
//! scores each: the number of non-empty fields extracted, plus a bonus per
//! record, a bonus when a required field (hostname or version) is present,
//! and a bonus when the template's vendor tag agrees with the caller's hint
//! or with the vendor detected from the output itself. Ties break on
//! template id so selection is deterministic.

mod record;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use textfsm_rust::Template;

pub use record::{
    hostname_from_prompt, normalize_name, role_of, site_code_of, split_joined, uptime_minutes,
    AdditionalInfo, ComponentKind, ComponentRecord, DeviceRecord, FingerprintRecord,
    StackMemberRecord, TextFsmOutput,
};

use crate::error::FingerprintError;
use crate::platform::VendorRegistry;
use crate::template::{TemplateDef, TemplateStore};

/// Scoring weights. Defaults match the documented behavior; tests pin them.
#[derive(Debug, Clone)]
pub struct Scoring {
    /// Bonus per record produced.
    pub per_record: i64,
    /// Bonus when a required field (hostname/version) is present.
    pub required_field: i64,
    /// Bonus when the template vendor tag agrees with the hint.
    pub vendor_agreement: i64,
    /// Winner must score at least this much.
    pub minimum: i64,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            per_record: 5,
            required_field: 10,
            vendor_agreement: 3,
            minimum: 1,
        }
    }
}

/// Outcome of template selection for one command output.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub template_id: String,
    pub vendor_tag: String,
    pub records: Vec<HashMap<String, String>>,
    pub score: i64,
    /// Non-empty fields across all records.
    pub fields_extracted: usize,
    /// All fields across all records.
    pub total_fields: usize,
}

/// Audit metadata for one engine invocation.
#[derive(Debug, Clone)]
pub struct ExtractionSummary {
    pub template_id: String,
    pub score: i64,
    pub success: bool,
    pub fields_extracted: i64,
    pub total_fields: i64,
    pub command_count: i64,
}

/// Template scoring and device-record assembly.
pub struct FingerprintEngine {
    templates: Arc<TemplateStore>,
    registry: Arc<VendorRegistry>,
    scoring: Scoring,
}

impl FingerprintEngine {
    pub fn new(templates: Arc<TemplateStore>, registry: Arc<VendorRegistry>) -> Self {
        Self {
            templates,
            registry,
            scoring: Scoring::default(),
        }
    }

    pub fn with_scoring(mut self, scoring: Scoring) -> Self {
        self.scoring = scoring;
        self
    }

    /// Select and run the best template for `command` against `output`.
    ///
    /// `vendor_hint` is the inventory's vendor string, if any; when absent
    /// the vendor is detected from the output.
    pub fn parse(
        &self,
        command: &str,
        output: &str,
        vendor_hint: Option<&str>,
    ) -> Result<ParseResult, FingerprintError> {
        let hint_tag = self.effective_vendor_tag(output, vendor_hint);
        let candidates = self.templates.candidates(command);
        debug!(
            "scoring {} candidate templates for '{}' (vendor hint: {:?})",
            candidates.len(),
            command,
            hint_tag
        );

        let mut best: Option<ParseResult> = None;
        for template in candidates {
            let result = self.try_template(template, output, hint_tag.as_deref());
            let Some(result) = result else { continue };
            let better = match &best {
                None => true,
                Some(current) => {
                    result.score > current.score
                        || (result.score == current.score && result.template_id < current.template_id)
                }
            };
            if better {
                best = Some(result);
            }
        }

        match best {
            Some(result) if result.score >= self.scoring.minimum => {
                debug!(
                    "selected template {} (score {})",
                    result.template_id, result.score
                );
                Ok(result)
            }
            _ => Err(FingerprintError::NoMatch {
                command: command.to_string(),
            }),
        }
    }

    fn try_template(
        &self,
        template: &TemplateDef,
        output: &str,
        hint_tag: Option<&str>,
    ) -> Option<ParseResult> {
        let compiled = match Template::parse_str(template.body) {
            Ok(t) => t,
            Err(e) => {
                warn!("template {} failed to compile: {}", template.id, e);
                return None;
            }
        };

        let mut parser = compiled.parser();
        let records = match parser.parse_text_to_dicts(output) {
            Ok(r) => r,
            // Structural failure scores zero, which can never win.
            Err(_) => return None,
        };

        let mut fields_extracted = 0usize;
        let mut total_fields = 0usize;
        for rec in &records {
            for value in rec.values() {
                total_fields += 1;
                if !value.trim().is_empty() {
                    fields_extracted += 1;
                }
            }
        }

        let mut score = fields_extracted as i64;
        score += self.scoring.per_record * records.len() as i64;
        if records
            .iter()
            .any(|r| REQUIRED_FIELDS.iter().any(|f| non_empty(r, f)))
        {
            score += self.scoring.required_field;
        }
        if hint_tag == Some(template.vendor_tag.as_str()) {
            score += self.scoring.vendor_agreement;
        }

        Some(ParseResult {
            template_id: template.id.clone(),
            vendor_tag: template.vendor_tag.clone(),
            records,
            score,
            fields_extracted,
            total_fields,
        })
    }

    fn effective_vendor_tag(&self, output: &str, vendor_hint: Option<&str>) -> Option<String> {
        if let Some(hint) = vendor_hint {
            if let Some(profile) = self.registry.resolve(hint) {
                return Some(profile.tag.clone());
            }
        }
        self.registry
            .detect_from_output(output)
            .map(|p| p.tag.clone())
    }

    /// Assemble the on-disk fingerprint artifact from executed commands and
    /// their parses.
    #[allow(clippy::too_many_arguments)]
    pub fn build_record(
        &self,
        host: &str,
        port: u16,
        detected_prompt: &str,
        vendor_hint: Option<&str>,
        parses: &[(String, String, Option<ParseResult>)],
        fingerprint_time: &str,
    ) -> FingerprintRecord {
        let mut rec = FingerprintRecord {
            host: host.to_string(),
            port: port.to_string(),
            detected_prompt: detected_prompt.to_string(),
            fingerprint_time: fingerprint_time.to_string(),
            ..Default::default()
        };

        let mut vendor_tag: Option<String> = None;

        for (command, output, parse) in parses {
            rec.command_outputs
                .insert(command.clone(), json!(output));
            let Some(parse) = parse else { continue };

            let payload = TextFsmOutput {
                template_used: parse.template_id.clone(),
                template_score: parse.score,
                records: parse
                    .records
                    .iter()
                    .map(|r| r.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .collect(),
            };
            rec.command_outputs.insert(
                format!("{}_textfsm", command),
                serde_json::to_value(&payload).unwrap_or_default(),
            );

            vendor_tag.get_or_insert_with(|| parse.vendor_tag.clone());

            if rec.hostname.is_empty() {
                rec.hostname = first_field(&parse.records, &["HOSTNAME"]);
            }
            if rec.version.is_empty() {
                rec.version = best_version(&parse.records);
            }
            if rec.serial_number.is_empty() {
                rec.serial_number = joined_field(&parse.records, &["SERIAL", "SN"]);
            }
            if rec.model.is_empty() {
                rec.model = joined_field(&parse.records, &["HARDWARE", "MODEL", "PID"]);
            }
            if rec.uptime.is_empty() {
                rec.uptime = first_field(&parse.records, &["UPTIME"]);
            }
        }

        if rec.hostname.is_empty() {
            rec.hostname = hostname_from_prompt(detected_prompt);
        }
        if rec.hostname.is_empty() {
            rec.hostname = host.to_string();
        }

        let profile = vendor_tag
            .as_deref()
            .and_then(|tag| self.registry.get(tag))
            .or_else(|| vendor_hint.and_then(|h| self.registry.resolve(h)));
        if let Some(profile) = profile {
            rec.additional_info.vendor = profile.short_name.clone();
            rec.additional_info.driver = profile.driver.clone();
        } else if let Some(hint) = vendor_hint {
            rec.additional_info.vendor = hint.to_string();
        }
        rec.additional_info.display_name = rec.hostname.clone();

        rec.success = !rec.hostname.is_empty() || !rec.serial_number.is_empty();
        rec
    }

    /// Audit metadata for the winning parse of one engine call.
    pub fn summarize(
        parse: Option<&ParseResult>,
        command_count: usize,
    ) -> ExtractionSummary {
        match parse {
            Some(p) => ExtractionSummary {
                template_id: p.template_id.clone(),
                score: p.score,
                success: true,
                fields_extracted: p.fields_extracted as i64,
                total_fields: p.total_fields as i64,
                command_count: command_count as i64,
            },
            None => ExtractionSummary {
                template_id: String::new(),
                score: 0,
                success: false,
                fields_extracted: 0,
                total_fields: 0,
                command_count: command_count as i64,
            },
        }
    }
}

/// Fields that earn the required-field bonus: a version parse without at
/// least a hostname or a software version did not really parse the output.
const REQUIRED_FIELDS: [&str; 2] = ["HOSTNAME", "VERSION"];

static VERSION_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+").unwrap());

fn non_empty(record: &HashMap<String, String>, field: &str) -> bool {
    record.get(field).is_some_and(|v| !v.trim().is_empty())
}

fn first_field(records: &[HashMap<String, String>], fields: &[&str]) -> String {
    for rec in records {
        for field in fields {
            if let Some(v) = rec.get(*field) {
                let v = v.trim();
                if !v.is_empty() {
                    return v.to_string();
                }
            }
        }
    }
    String::new()
}

/// First non-empty version, preferring values that look like dotted
/// release numbers over free text.
fn best_version(records: &[HashMap<String, String>]) -> String {
    let mut fallback = String::new();
    for rec in records {
        if let Some(v) = rec.get("VERSION") {
            let v = v.trim();
            if v.is_empty() {
                continue;
            }
            if VERSION_SHAPE.is_match(v) {
                return v.to_string();
            }
            if fallback.is_empty() {
                fallback = v.to_string();
            }
        }
    }
    fallback
}

/// Join a (possibly multi-record, possibly already comma-joined) field into
/// one comma-joined string with duplicates preserved in order.
fn joined_field(records: &[HashMap<String, String>], fields: &[&str]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for rec in records {
        for field in fields {
            if let Some(v) = rec.get(*field) {
                for part in split_joined(v) {
                    parts.push(part);
                }
            }
        }
        if !parts.is_empty() {
            break;
        }
    }
    parts.join(", ")
}

/// Convert an on-disk fingerprint record into the normalized device shape.
///
/// Hostname fallback chain: explicit field, then the detected prompt with
/// trailing prompt characters stripped, then the management host string.
pub fn derive_device(rec: &FingerprintRecord, registry: &VendorRegistry) -> DeviceRecord {
    let mut hostname = rec.hostname.trim().to_string();
    if hostname.is_empty() {
        hostname = hostname_from_prompt(&rec.detected_prompt);
    }
    if hostname.is_empty() {
        hostname = rec.host.clone();
    }

    let profile = registry.resolve(&rec.additional_info.vendor);
    let vendor_name = profile
        .map(|p| p.vendor_name.clone())
        .unwrap_or_else(|| {
            if rec.additional_info.vendor.is_empty() {
                "Unknown".to_string()
            } else {
                rec.additional_info.vendor.clone()
            }
        });
    let driver = if !rec.additional_info.driver.is_empty() {
        rec.additional_info.driver.clone()
    } else {
        profile.map(|p| p.driver.clone()).unwrap_or_default()
    };
    let device_type = if driver.is_empty() {
        "generic_ssh".to_string()
    } else {
        format!("{}_ssh", driver)
    };

    let serials = split_joined(&rec.serial_number);
    let models = split_joined(&rec.model);

    let stack_members = structured_stack_members(rec)
        .unwrap_or_else(|| synthesized_stack_members(&serials, &models));

    let uptime = (!rec.uptime.is_empty()).then(|| rec.uptime.clone());
    let uptime_min = uptime.as_deref().and_then(uptime_minutes);

    DeviceRecord {
        normalized_name: normalize_name(&hostname),
        site_code: site_code_of(&hostname),
        role: role_of(&hostname),
        hostname,
        vendor_name,
        device_type,
        model: rec.model.clone(),
        os_version: rec.version.clone(),
        uptime,
        uptime_minutes: uptime_min,
        management_ip: rec.host.clone(),
        serials,
        stack_members,
        components: derive_components(rec),
        source_file: None,
    }
}

/// Structured stack data carried on a parse payload, when present.
fn structured_stack_members(rec: &FingerprintRecord) -> Option<Vec<StackMemberRecord>> {
    for (key, value) in &rec.command_outputs {
        if !key.ends_with("_textfsm") {
            continue;
        }
        let members = value.get("stack_members").or_else(|| {
            value
                .get("records")
                .and_then(|r| r.get(0))
                .and_then(|r| r.get("STACK_MEMBERS"))
        })?;
        let list = members.as_array()?;
        let mut out = Vec::with_capacity(list.len());
        for (i, member) in list.iter().enumerate() {
            let serial = member.get("serial").and_then(|v| v.as_str()).unwrap_or("");
            if serial.is_empty() {
                continue;
            }
            let position = member
                .get("index")
                .and_then(|v| v.as_i64())
                .unwrap_or(i as i64 + 1);
            out.push(StackMemberRecord {
                position,
                model: member
                    .get("model")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                serial: serial.to_string(),
                is_master: position == 1,
            });
        }
        if !out.is_empty() {
            return Some(out);
        }
    }
    None
}

/// Position-ordered members synthesized from joined serial and model lists.
/// A single serial means a standalone device: no members at all.
fn synthesized_stack_members(serials: &[String], models: &[String]) -> Vec<StackMemberRecord> {
    if serials.len() < 2 {
        return Vec::new();
    }
    serials
        .iter()
        .enumerate()
        .map(|(i, serial)| StackMemberRecord {
            position: i as i64 + 1,
            model: models
                .get(i)
                .or_else(|| models.first())
                .cloned()
                .unwrap_or_default(),
            serial: serial.clone(),
            is_master: i == 0,
        })
        .collect()
}

/// Hardware components from inventory parses.
fn derive_components(rec: &FingerprintRecord) -> Vec<ComponentRecord> {
    let mut out = Vec::new();
    for (key, value) in &rec.command_outputs {
        if !key.ends_with("_textfsm") || !key.contains("inventory") {
            continue;
        }
        let payload: TextFsmOutput = match serde_json::from_value(value.clone()) {
            Ok(p) => p,
            Err(_) => continue,
        };
        for record in &payload.records {
            let name = record.get("NAME").cloned().unwrap_or_default();
            let descr = record.get("DESCR").cloned().unwrap_or_default();
            if name.is_empty() && descr.is_empty() {
                continue;
            }
            let serial = record
                .get("SN")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            let confidence = if serial.is_some() { 0.9 } else { 0.5 };
            out.push(ComponentRecord {
                kind: ComponentKind::classify(&name, &descr),
                position: name.clone(),
                name,
                description: descr,
                serial,
                extraction_source: payload.template_used.clone(),
                extraction_confidence: confidence,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const IOS_VERSION_OUTPUT: &str = "\
Cisco IOS Software, C2960X Software (C2960X-UNIVERSALK9-M), Version 15.2(7)E, RELEASE SOFTWARE (fc3)
Copyright (c) 1986-2019 by Cisco Systems, Inc.
ROM: Bootstrap program is C2960X boot loader

abc-sw-01 uptime is 1 week, 2 days, 3 hours
System returned to ROM by power-on

cisco WS-C2960X-48TS-L (APM86XXX) processor with 524288K bytes of memory.
Processor board ID FOC1234ABCD
Configuration register is 0xF
";

    fn engine() -> FingerprintEngine {
        FingerprintEngine::new(
            Arc::new(TemplateStore::builtin()),
            Arc::new(VendorRegistry::builtin()),
        )
    }

    #[test]
    fn test_parse_selects_cisco_version_template() {
        let result = engine()
            .parse("show version", IOS_VERSION_OUTPUT, Some("cisco_ios"))
            .unwrap();
        assert_eq!(result.template_id, "cisco_ios_show_version");
        assert!(result.score >= 1);
        let rec = &result.records[0];
        assert_eq!(rec.get("HOSTNAME").map(String::as_str), Some("abc-sw-01"));
        assert_eq!(rec.get("VERSION").map(String::as_str), Some("15.2(7)E"));
        assert!(rec.get("SERIAL").unwrap().contains("FOC1234ABCD"));
    }

    #[test]
    fn test_parse_no_match_on_garbage() {
        let err = engine()
            .parse("show version", "complete nonsense with no banner\n", None)
            .unwrap_err();
        assert!(matches!(err, FingerprintError::NoMatch { .. }));
    }

    #[test]
    fn test_vendor_detected_from_output_without_hint() {
        let result = engine()
            .parse("show version", IOS_VERSION_OUTPUT, None)
            .unwrap();
        assert_eq!(result.vendor_tag, "cisco_ios");
    }

    #[test]
    fn test_build_record_from_version_parse() {
        let eng = engine();
        let parse = eng
            .parse("show version", IOS_VERSION_OUTPUT, Some("cisco_ios"))
            .unwrap();
        let rec = eng.build_record(
            "10.10.1.5",
            22,
            "abc-sw-01#",
            Some("cisco_ios"),
            &[(
                "show version".to_string(),
                IOS_VERSION_OUTPUT.to_string(),
                Some(parse),
            )],
            "2026-08-02T00:00:00Z",
        );
        assert_eq!(rec.hostname, "abc-sw-01");
        assert_eq!(rec.version, "15.2(7)E");
        assert!(rec.serial_number.contains("FOC1234ABCD"));
        assert_eq!(rec.additional_info.vendor, "cisco");
        assert_eq!(rec.additional_info.driver, "cisco_ios");
        assert!(rec.success);
        assert!(rec.command_outputs.contains_key("show version"));
        assert!(rec.command_outputs.contains_key("show version_textfsm"));
    }

    #[test]
    fn test_hostname_falls_back_to_prompt() {
        let eng = engine();
        let rec = eng.build_record(
            "10.0.0.9",
            22,
            "edge-fw-03> ",
            None,
            &[("show version".to_string(), "nothing useful".to_string(), None)],
            "2026-08-02T00:00:00Z",
        );
        assert_eq!(rec.hostname, "edge-fw-03");
    }

    #[test]
    fn test_derive_device_stack_from_joined_fields() {
        let rec = FingerprintRecord {
            hostname: "ABC-CORE-01".to_string(),
            host: "10.1.1.1".to_string(),
            serial_number: "FCW2425G0BB, FJC2422E0NW, FJC2422E0NB".to_string(),
            model: "C9300-48UXM, C9300-48UXM, C9300-48UXM".to_string(),
            version: "17.3.4".to_string(),
            additional_info: AdditionalInfo {
                vendor: "cisco".to_string(),
                driver: "cisco_ios".to_string(),
                display_name: String::new(),
            },
            ..Default::default()
        };
        let device = derive_device(&rec, &VendorRegistry::builtin());
        assert_eq!(device.normalized_name, "abc-core-01");
        assert_eq!(device.site_code, "ABC");
        assert_eq!(device.role, "core");
        assert_eq!(device.vendor_name, "Cisco Systems");
        assert_eq!(device.device_type, "cisco_ios_ssh");
        assert_eq!(device.serials.len(), 3);
        assert_eq!(device.stack_members.len(), 3);
        assert_eq!(device.stack_members[0].position, 1);
        assert!(device.stack_members[0].is_master);
        assert!(!device.stack_members[2].is_master);
        assert_eq!(device.stack_members[2].serial, "FJC2422E0NB");
        assert_eq!(device.stack_members[2].model, "C9300-48UXM");
    }

    #[test]
    fn test_derive_device_standalone_no_members() {
        let rec = FingerprintRecord {
            hostname: "abc-sw-01".to_string(),
            serial_number: "FOC1234ABCD".to_string(),
            model: "WS-C2960X-48TS-L".to_string(),
            ..Default::default()
        };
        let device = derive_device(&rec, &VendorRegistry::builtin());
        assert_eq!(device.serials.len(), 1);
        assert!(device.stack_members.is_empty());
    }

    #[test]
    fn test_derive_components_from_inventory() {
        let payload = TextFsmOutput {
            template_used: "cisco_ios_show_inventory".to_string(),
            template_score: 40,
            records: vec![
                [
                    ("NAME".to_string(), "Switch 1".to_string()),
                    ("DESCR".to_string(), "WS-C2960X-48TS-L chassis".to_string()),
                    ("PID".to_string(), "WS-C2960X-48TS-L".to_string()),
                    ("SN".to_string(), "FOC1234ABCD".to_string()),
                ]
                .into_iter()
                .collect(),
                [
                    ("NAME".to_string(), "Te1/0/1".to_string()),
                    ("DESCR".to_string(), "SFP-10GBase-SR transceiver".to_string()),
                    ("PID".to_string(), "SFP-10G-SR".to_string()),
                    ("SN".to_string(), String::new()),
                ]
                .into_iter()
                .collect(),
            ],
        };
        let mut rec = FingerprintRecord::default();
        rec.command_outputs.insert(
            "show inventory_textfsm".to_string(),
            serde_json::to_value(&payload).unwrap(),
        );
        let device = derive_device(&rec, &VendorRegistry::builtin());
        assert_eq!(device.components.len(), 2);
        assert_eq!(device.components[0].kind, ComponentKind::Chassis);
        assert_eq!(device.components[0].serial.as_deref(), Some("FOC1234ABCD"));
        assert_eq!(device.components[1].kind, ComponentKind::Transceiver);
        assert!(device.components[1].serial.is_none());
        assert!(device.components[1].extraction_confidence < device.components[0].extraction_confidence);
    }

    #[test]
    fn test_scoring_tie_breaks_lexicographic() {
        // Two identical templates under different ids: same score, the
        // lexicographically smaller id must win.
        let body = "Value VERSION (\\S+)\n\nStart\n  ^Version:\\s+${VERSION}\n";
        let store = TemplateStore::from_defs(vec![
            TemplateDef {
                id: "zzz_show_version".to_string(),
                vendor_tag: "zzz".to_string(),
                command: "show version".to_string(),
                body: Box::leak(body.to_string().into_boxed_str()),
            },
            TemplateDef {
                id: "aaa_show_version".to_string(),
                vendor_tag: "aaa".to_string(),
                command: "show version".to_string(),
                body: Box::leak(body.to_string().into_boxed_str()),
            },
        ]);
        let engine = FingerprintEngine::new(Arc::new(store), Arc::new(VendorRegistry::builtin()));
        let result = engine.parse("show version", "Version: 1.2.3\n", None).unwrap();
        assert_eq!(result.template_id, "aaa_show_version");
    }
}
