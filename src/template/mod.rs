//! Indexed catalog of structured-text templates.
//!
//! Templates are TextFSM bodies embedded at build time, keyed by an id of
//! the form `<vendor_tag>_<command_with_underscores>`. Candidate selection
//! filters on the command's significant terms; the fingerprint engine does
//! the actual scoring. The catalog is immutable for the process lifetime.

/// One parse template.
#[derive(Debug, Clone)]
pub struct TemplateDef {
    /// Unique id, e.g. `cisco_ios_show_version`. Also the tie-break key.
    pub id: String,

    /// Vendor/platform tag, e.g. `cisco_ios`.
    pub vendor_tag: String,

    /// The command this template parses, e.g. `show version`.
    pub command: String,

    /// TextFSM template body.
    pub body: &'static str,
}

/// Immutable template catalog.
#[derive(Debug)]
pub struct TemplateStore {
    templates: Vec<TemplateDef>,
}

impl TemplateStore {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        let defs = [
            (
                "cisco_ios_show_version",
                "cisco_ios",
                "show version",
                include_str!("templates/cisco_ios_show_version.textfsm"),
            ),
            (
                "cisco_nxos_show_version",
                "cisco_nxos",
                "show version",
                include_str!("templates/cisco_nxos_show_version.textfsm"),
            ),
            (
                "arista_eos_show_version",
                "arista_eos",
                "show version",
                include_str!("templates/arista_eos_show_version.textfsm"),
            ),
            (
                "juniper_junos_show_version",
                "juniper_junos",
                "show version",
                include_str!("templates/juniper_junos_show_version.textfsm"),
            ),
            (
                "hp_procurve_show_version",
                "hp_procurve",
                "show version",
                include_str!("templates/hp_procurve_show_system.textfsm"),
            ),
            (
                "cisco_ios_show_inventory",
                "cisco_ios",
                "show inventory",
                include_str!("templates/cisco_show_inventory.textfsm"),
            ),
            (
                "cisco_nxos_show_inventory",
                "cisco_nxos",
                "show inventory",
                include_str!("templates/cisco_show_inventory.textfsm"),
            ),
        ];

        let templates = defs
            .into_iter()
            .map(|(id, vendor_tag, command, body)| TemplateDef {
                id: id.to_string(),
                vendor_tag: vendor_tag.to_string(),
                command: command.to_string(),
                body,
            })
            .collect();

        Self { templates }
    }

    /// Construct from explicit definitions (tests, alternate catalogs).
    pub fn from_defs(templates: Vec<TemplateDef>) -> Self {
        Self { templates }
    }

    /// Candidate templates for a command.
    ///
    /// Every significant term of the command (longer than two characters,
    /// lowercased, separators folded to underscores) must appear in the
    /// template id. Order is catalog order; it carries no meaning — the
    /// engine scores all candidates.
    pub fn candidates(&self, command: &str) -> Vec<&TemplateDef> {
        let terms = filter_terms(command);
        if terms.is_empty() {
            return self.templates.iter().collect();
        }
        self.templates
            .iter()
            .filter(|t| terms.iter().all(|term| t.id.contains(term.as_str())))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&TemplateDef> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateDef> {
        self.templates.iter()
    }
}

/// Significant filter terms of a command string.
fn filter_terms(command: &str) -> Vec<String> {
    command
        .to_lowercase()
        .replace('-', "_")
        .split([' ', '_'])
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_filter_by_command() {
        let store = TemplateStore::builtin();
        let version = store.candidates("show version");
        assert!(!version.is_empty());
        assert!(version.iter().all(|t| t.id.contains("version")));
        assert!(version.iter().any(|t| t.id == "cisco_ios_show_version"));
        assert!(!version.iter().any(|t| t.id.contains("inventory")));

        let inventory = store.candidates("show inventory");
        assert!(inventory.iter().all(|t| t.id.contains("inventory")));
    }

    #[test]
    fn test_candidates_empty_command_returns_all() {
        let store = TemplateStore::builtin();
        assert_eq!(store.candidates("").len(), store.len());
    }

    #[test]
    fn test_unique_ids() {
        let store = TemplateStore::builtin();
        let mut ids: Vec<_> = store.iter().map(|t| t.id.as_str()).collect();
        ids.sort_unstable();
        let before = ids.len();
        ids.dedup();
        assert_eq!(before, ids.len());
    }

    #[test]
    fn test_filter_terms_fold_separators() {
        assert_eq!(filter_terms("show ip route"), vec!["show", "route"]);
        assert_eq!(filter_terms("bgp-summary"), vec!["bgp", "summary"]);
    }
}
