//! Slot substitution for tactic templates.

use super::{DEFAULT_METHOD_ID, Provenance, Tactic, Taxonomy};
use chrono::{Datelike, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static SLOT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([a-zA-Z0-9_]+)\}").unwrap());

/// Slot name to candidate values.
pub type SlotValues = HashMap<String, Vec<String>>;

/// One concrete query produced from a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedTactic {
    pub id: String,
    pub template: String,
    pub query: String,
    pub slots: BTreeMap<String, String>,
    pub unresolved_slots: Vec<String>,
    pub vertical_id: String,
    pub subtopic_id: String,
    pub method_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<Provenance>,
}

/// Distinct slot names in order of first appearance.
pub fn extract_slots(template: &str) -> Vec<String> {
    let mut slots: Vec<String> = Vec::new();
    for caps in SLOT.captures_iter(template) {
        let name = caps[1].to_string();
        if !slots.contains(&name) {
            slots.push(name);
        }
    }
    slots
}

fn slot_values(slots: &SlotValues, slot: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for value in slots.get(slot).into_iter().flatten() {
        let value = value.trim();
        if !value.is_empty() && !values.iter().any(|v| v == value) {
            values.push(value.to_string());
        }
    }
    if values.is_empty() && slot == "year" {
        values.push(Utc::now().year().to_string());
    }
    values
}

fn combinations(slot_values: &[(String, Vec<String>)]) -> Vec<BTreeMap<String, String>> {
    let mut combos = vec![BTreeMap::new()];
    for (slot, values) in slot_values {
        combos = combos
            .into_iter()
            .flat_map(|combo| {
                values.iter().map(move |value| {
                    let mut next = combo.clone();
                    next.insert(slot.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    combos
}

/// Expand templates over the cartesian product of their slot values.
///
/// A template with a slot that has no value (after the `year` default) is
/// dropped, unless `allow_unresolved` is set, in which case the slot stays in
/// the query as literal `{slot}` text and is reported in `unresolved_slots`.
pub fn expand_templates(
    templates: &[Tactic],
    slots: &SlotValues,
    allow_unresolved: bool,
) -> Vec<ExpandedTactic> {
    let mut expanded = Vec::new();

    for tactic in templates {
        let names = extract_slots(&tactic.template);
        let mut resolved: Vec<(String, Vec<String>)> = Vec::with_capacity(names.len());
        let mut missing = false;
        for name in names {
            let mut values = slot_values(slots, &name);
            if values.is_empty() {
                missing = true;
                if allow_unresolved {
                    values.push(format!("{{{name}}}"));
                }
            }
            resolved.push((name, values));
        }
        if missing && !allow_unresolved {
            continue;
        }

        for combo in combinations(&resolved) {
            let query = SLOT
                .replace_all(&tactic.template, |caps: &Captures| {
                    combo
                        .get(&caps[1])
                        .cloned()
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned();
            let unresolved_slots = extract_slots(&query);
            expanded.push(ExpandedTactic {
                id: tactic.id.clone(),
                template: tactic.template.clone(),
                query,
                slots: combo,
                unresolved_slots,
                vertical_id: "unknown".to_string(),
                subtopic_id: "unknown".to_string(),
                method_id: DEFAULT_METHOD_ID.to_string(),
                provenance: tactic.provenance.clone(),
            });
        }
    }

    expanded
}

/// Expand every tactic of a vertical, tagging results with their location.
pub fn expand_vertical(
    taxonomy: &Taxonomy,
    vertical_id: &str,
    slots: &SlotValues,
    allow_unresolved: bool,
) -> Vec<ExpandedTactic> {
    let Some(vertical) = taxonomy.vertical(vertical_id) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for subtopic in &vertical.subtopics {
        for method in &subtopic.methods {
            for mut item in expand_templates(&method.tactics, slots, allow_unresolved) {
                item.vertical_id = vertical.id.clone();
                item.subtopic_id = subtopic.id.clone();
                item.method_id = method.id.clone();
                out.push(item);
            }
        }
    }
    out
}
