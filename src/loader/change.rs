//! Change detection and severity classification.
//!
//! The detector works on line multisets: a line counts as added when it
//! occurs more often in the new text than the old, removed in the opposite
//! case. Noise lines (login banners, config-change stamps) are dropped
//! before diffing. Severity is a ladder over two configured pattern sets:
//! sensitive lines force critical, counter-like lines are allowed to churn
//! without raising more than minor.

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;

/// Change severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Moderate,
    Minor,
    Informational,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Moderate => "moderate",
            Severity::Minor => "minor",
            Severity::Informational => "informational",
        }
    }
}

/// Pattern sets driving classification.
#[derive(Debug)]
pub struct SeverityConfig {
    /// Lines whose change is always critical.
    pub sensitive: Vec<Regex>,

    /// Lines that are expected to churn (uptimes, counters, timestamps).
    pub counter_like: Vec<Regex>,

    /// Lines dropped entirely before diffing.
    pub noise: Vec<Regex>,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("builtin severity pattern"))
                .collect()
        };
        Self {
            sensitive: compile(&[
                r"^\s*username\s",
                r"^\s*enable\s+secret",
                r"^\s*crypto\s+key",
                r"^\s*(ip\s+)?access-list",
                r"^\s*access-class",
                r"^\s*router\s+(bgp|ospf|eigrp|rip|isis)",
                r"^\s*snmp-server\s+community",
                r"^\s*aaa\s",
                r"^\s*tacacs",
                r"^\s*radius",
            ]),
            counter_like: compile(&[
                r"uptime",
                r"\d+\s+(year|week|day|hour|minute|second)s?\b",
                r"\d+\s+(packets|bytes)\s+(input|output)",
                r"Last\s+(input|output|clearing)",
                r"\b\d{2}:\d{2}:\d{2}\b",
            ]),
            noise: compile(&[
                r"^Last login:",
                r"^! Last configuration change at",
                r"^Building configuration",
                r"^Current configuration : \d+ bytes$",
                r"^! NVRAM config last updated",
                r"ntp clock-period",
            ]),
        }
    }
}

/// Outcome of one diff computation.
#[derive(Debug, Clone)]
pub struct ChangeSummary {
    pub lines_added: i64,
    pub lines_removed: i64,
    pub severity: Severity,
    /// Unified-style diff body; empty when the diff overflowed.
    pub diff_text: String,
    /// The inputs were too large to diff.
    pub overflow: bool,
}

impl ChangeSummary {
    /// Whether the contents are effectively identical.
    pub fn is_identical(&self) -> bool {
        self.lines_added == 0 && self.lines_removed == 0 && !self.overflow
    }
}

/// Line-level differ with severity classification.
#[derive(Debug)]
pub struct ChangeDetector {
    config: SeverityConfig,
    /// Combined input ceiling; beyond it the diff is not computed.
    max_input_bytes: usize,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(SeverityConfig::default())
    }
}

impl ChangeDetector {
    pub fn new(config: SeverityConfig) -> Self {
        Self {
            config,
            max_input_bytes: 8 * 1024 * 1024,
        }
    }

    pub fn with_max_input(mut self, bytes: usize) -> Self {
        self.max_input_bytes = bytes;
        self
    }

    /// Diff prior against new text and classify the change.
    pub fn diff(&self, prior: &str, new: &str) -> ChangeSummary {
        if prior.len() + new.len() > self.max_input_bytes {
            return ChangeSummary {
                lines_added: 0,
                lines_removed: 0,
                severity: Severity::Moderate,
                diff_text: String::new(),
                overflow: true,
            };
        }

        let old_lines = self.normalized_lines(prior);
        let new_lines = self.normalized_lines(new);

        let mut counts: HashMap<&str, i64> = HashMap::new();
        for line in &old_lines {
            *counts.entry(line.as_str()).or_default() -= 1;
        }
        for line in &new_lines {
            *counts.entry(line.as_str()).or_default() += 1;
        }

        let mut added: Vec<&str> = Vec::new();
        let mut removed: Vec<&str> = Vec::new();
        // Preserve input order in the rendered diff.
        for line in &old_lines {
            let entry = counts.get_mut(line.as_str()).unwrap();
            if *entry < 0 {
                removed.push(line);
                *entry += 1;
            }
        }
        for line in &new_lines {
            let entry = counts.get_mut(line.as_str()).unwrap();
            if *entry > 0 {
                added.push(line);
                *entry -= 1;
            }
        }

        let severity = self.classify(&added, &removed);
        let diff_text = render_diff(&removed, &added);

        ChangeSummary {
            lines_added: added.len() as i64,
            lines_removed: removed.len() as i64,
            severity,
            diff_text,
            overflow: false,
        }
    }

    fn classify(&self, added: &[&str], removed: &[&str]) -> Severity {
        let changed: Vec<&str> = removed.iter().chain(added.iter()).copied().collect();
        if changed.is_empty() {
            return Severity::Informational;
        }
        if changed
            .iter()
            .any(|line| self.config.sensitive.iter().any(|re| re.is_match(line)))
        {
            return Severity::Critical;
        }
        let outside_counters = changed
            .iter()
            .any(|line| !self.config.counter_like.iter().any(|re| re.is_match(line)));
        if changed.len() >= 10 || outside_counters {
            return Severity::Moderate;
        }
        Severity::Minor
    }

    /// Trailing whitespace trimmed, noise lines dropped.
    fn normalized_lines(&self, text: &str) -> Vec<String> {
        text.lines()
            .map(|l| l.trim_end().to_string())
            .filter(|l| !self.config.noise.iter().any(|re| re.is_match(l)))
            .collect()
    }
}

fn render_diff(removed: &[&str], added: &[&str]) -> String {
    let mut out = String::from("--- previous\n+++ current\n");
    for line in removed {
        out.push('-');
        out.push_str(line);
        out.push('\n');
    }
    for line in added {
        out.push('+');
        out.push_str(line);
        out.push('\n');
    }
    out
}
