//! Vetting of proposed taxonomy growth.
//!
//! Proposals arrive from the oracle and are untrusted. Each candidate
//! template is validated and checked for duplicates against the full corpus;
//! accepted entries are appended to both the live taxonomy and the growth
//! store. Bad proposals become rejection entries and never an error.

use super::{
    DEFAULT_METHOD_ID, DEFAULT_METHOD_LABEL, GrowthStore, Method, Provenance, Subtopic, Tactic,
    Taxonomy, Vertical, template_key,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static SLOT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[a-zA-Z0-9_]+\}").unwrap());

const DEFAULT_BLUEPRINT: &[&str] = &["summary", "keyEntities", "sources"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposedTemplate {
    pub template: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposedMethod {
    pub id: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub tactics: Vec<ProposedTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TacticProposal {
    #[serde(alias = "verticalId")]
    pub vertical_id: String,
    #[serde(alias = "subtopicId")]
    pub subtopic_id: String,
    #[serde(alias = "methodId")]
    pub method_id: Option<String>,
    pub template: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtopicProposal {
    #[serde(alias = "verticalId")]
    pub vertical_id: String,
    pub id: Option<String>,
    pub label: String,
    pub description: Option<String>,
    pub tactics: Vec<ProposedTemplate>,
    pub methods: Vec<ProposedMethod>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerticalProposal {
    pub id: Option<String>,
    pub label: String,
    pub description: Option<String>,
    #[serde(alias = "blueprintFields")]
    pub blueprint_fields: Vec<String>,
    pub subtopics: Vec<SubtopicProposal>,
}

/// Growth proposed by the oracle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyProposalBundle {
    pub tactics: Vec<TacticProposal>,
    pub subtopics: Vec<SubtopicProposal>,
    pub verticals: Vec<VerticalProposal>,
}

impl TaxonomyProposalBundle {
    pub fn is_empty(&self) -> bool {
        self.tactics.is_empty() && self.subtopics.is_empty() && self.verticals.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VettingResult {
    pub accepted: usize,
    pub rejected: usize,
    pub accepted_items: Vec<String>,
    pub rejected_items: Vec<Rejection>,
}

impl VettingResult {
    fn accept(&mut self, item: impl Into<String>) {
        self.accepted += 1;
        self.accepted_items.push(item.into());
    }

    fn reject(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        self.rejected += 1;
        self.rejected_items.push(Rejection {
            item: item.into(),
            reason: reason.into(),
        });
    }
}

/// Lower-case, non-alphanumeric runs to `_`, trimmed, at most 64 chars.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_sep = false;
    for ch in value.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch);
        } else {
            pending_sep = true;
        }
    }
    slug.truncate(64);
    slug
}

/// Length 4..=200, single line, no script/data URIs, and at least three
/// alphanumerics once slots are removed.
pub fn is_template_valid(template: &str) -> bool {
    let length = template.chars().count();
    if !(4..=200).contains(&length) {
        return false;
    }
    if template.contains('\n') || template.contains('\r') {
        return false;
    }
    let lower = template.to_lowercase();
    if lower.contains("javascript:") || lower.contains("data:") {
        return false;
    }
    SLOT.replace_all(template, "")
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .count()
        >= 3
}

struct Vetter<'a> {
    taxonomy: &'a mut Taxonomy,
    store: &'a mut GrowthStore,
    provenance: Provenance,
    templates: HashSet<String>,
    tactic_ids: HashSet<String>,
    result: VettingResult,
}

impl Vetter<'_> {
    /// Builds a tactic and reserves its id. Templates that slug to a taken
    /// id get the next free numeric suffix.
    fn tactic(&mut self, vertical_id: &str, subtopic_id: &str, template: &str, notes: Option<String>) -> Tactic {
        let base = format!("{vertical_id}-{subtopic_id}-{}", slugify(template));
        let mut id = base.clone();
        let mut suffix = 2;
        while self.tactic_ids.contains(&id) {
            id = format!("{base}-{suffix}");
            suffix += 1;
        }
        self.tactic_ids.insert(id.clone());
        Tactic {
            id,
            template: template.to_string(),
            notes,
            provenance: vec![self.provenance.clone()],
        }
    }

    /// Validate and reserve a template; records a rejection on failure.
    fn admit(&mut self, template: &str) -> bool {
        if !is_template_valid(template) {
            self.result.reject(template, "Invalid template.");
            return false;
        }
        if !self.templates.insert(template_key(template)) {
            self.result.reject(template, "Duplicate template.");
            return false;
        }
        true
    }

    fn build_methods(
        &mut self,
        vertical_id: &str,
        subtopic_id: &str,
        tactics: &[ProposedTemplate],
        methods: &[ProposedMethod],
    ) -> Vec<Method> {
        let mut built = Vec::new();
        for proposed in methods {
            let label = proposed.label.clone().unwrap_or_else(|| DEFAULT_METHOD_LABEL.into());
            let id = slugify(proposed.id.as_deref().unwrap_or(&label));
            let id = if id.is_empty() { DEFAULT_METHOD_ID.to_string() } else { id };
            let mut method = Method::new(id, label, Vec::new());
            method.description = proposed.description.clone();
            for item in &proposed.tactics {
                if self.admit(&item.template) {
                    let tactic = self.tactic(vertical_id, subtopic_id, &item.template, item.notes.clone());
                    method.tactics.push(tactic);
                }
            }
            built.push(method);
        }
        if built.is_empty() {
            let mut method = Method::new(DEFAULT_METHOD_ID, DEFAULT_METHOD_LABEL, Vec::new());
            for item in tactics {
                if self.admit(&item.template) {
                    let tactic = self.tactic(vertical_id, subtopic_id, &item.template, item.notes.clone());
                    method.tactics.push(tactic);
                }
            }
            built.push(method);
        }
        built
    }

    fn build_subtopic(&mut self, vertical_id: &str, proposed: &SubtopicProposal, id: String) -> Subtopic {
        let methods = self.build_methods(vertical_id, &id, &proposed.tactics, &proposed.methods);
        Subtopic {
            id,
            label: proposed.label.clone(),
            description: proposed.description.clone(),
            methods,
            provenance: vec![self.provenance.clone()],
        }
    }

    fn add_vertical(&mut self, proposed: &VerticalProposal) {
        if proposed.label.trim().is_empty() {
            return;
        }
        let id = slugify(proposed.id.as_deref().unwrap_or(&proposed.label));
        if id.is_empty() {
            self.result.reject(&proposed.label, "Invalid vertical id.");
            return;
        }
        if self.taxonomy.vertical(&id).is_some() {
            self.result
                .reject(&proposed.label, format!("Vertical {id} already exists."));
            return;
        }

        let blueprint_fields = if proposed.blueprint_fields.is_empty() {
            DEFAULT_BLUEPRINT.iter().map(|f| f.to_string()).collect()
        } else {
            proposed.blueprint_fields.clone()
        };
        let mut vertical = Vertical {
            id: id.clone(),
            label: proposed.label.clone(),
            description: proposed.description.clone(),
            blueprint_fields,
            subtopics: Vec::new(),
            provenance: vec![self.provenance.clone()],
        };
        for sub in &proposed.subtopics {
            if sub.label.trim().is_empty() {
                continue;
            }
            let sub_id = slugify(sub.id.as_deref().unwrap_or(&sub.label));
            if sub_id.is_empty() || vertical.subtopic(&sub_id).is_some() {
                continue;
            }
            let subtopic = self.build_subtopic(&id, sub, sub_id);
            vertical.subtopics.push(subtopic);
        }

        self.result.accept(format!("vertical:{}", vertical.label));
        if !self.store.added_verticals.iter().any(|v| v.id == vertical.id) {
            self.store.added_verticals.push(vertical.clone());
        }
        self.taxonomy.verticals.push(vertical);
    }

    fn add_subtopic(&mut self, proposed: &SubtopicProposal) {
        if proposed.label.trim().is_empty() || proposed.vertical_id.is_empty() {
            return;
        }
        let vertical_id = proposed.vertical_id.clone();
        let Some(vertical) = self.taxonomy.vertical(&vertical_id) else {
            self.result
                .reject(&proposed.label, format!("Unknown vertical {vertical_id}."));
            return;
        };
        let sub_id = slugify(proposed.id.as_deref().unwrap_or(&proposed.label));
        if sub_id.is_empty() {
            self.result.reject(&proposed.label, "Invalid subtopic id.");
            return;
        }
        if vertical.subtopic(&sub_id).is_some() {
            self.result
                .reject(&proposed.label, format!("Subtopic {sub_id} already exists."));
            return;
        }

        let subtopic = self.build_subtopic(&vertical_id, proposed, sub_id);
        self.result.accept(format!("subtopic:{}", proposed.label));
        let stored = self.store.added_subtopics.entry(vertical_id.clone()).or_default();
        if !stored.iter().any(|s| s.id == subtopic.id) {
            stored.push(subtopic.clone());
        }
        if let Some(vertical) = self.taxonomy.vertical_mut(&vertical_id) {
            vertical.subtopics.push(subtopic);
        }
    }

    fn add_tactic(&mut self, proposed: &TacticProposal) {
        if proposed.template.is_empty() || proposed.vertical_id.is_empty() || proposed.subtopic_id.is_empty() {
            return;
        }
        let template = proposed.template.as_str();
        if !is_template_valid(template) {
            self.result.reject(template, "Invalid template.");
            return;
        }
        let key = template_key(template);
        if self.templates.contains(&key) {
            self.result.reject(template, "Duplicate template.");
            return;
        }
        let Some(vertical) = self.taxonomy.vertical(&proposed.vertical_id) else {
            self.result
                .reject(template, format!("Unknown vertical {}.", proposed.vertical_id));
            return;
        };
        if vertical.subtopic(&proposed.subtopic_id).is_none() {
            self.result
                .reject(template, format!("Unknown subtopic {}.", proposed.subtopic_id));
            return;
        }

        let tactic = self.tactic(
            &proposed.vertical_id,
            &proposed.subtopic_id,
            template,
            proposed.notes.clone(),
        );
        let method_id = proposed
            .method_id
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_METHOD_ID);
        if let Some(subtopic) = self
            .taxonomy
            .vertical_mut(&proposed.vertical_id)
            .and_then(|v| v.subtopic_mut(&proposed.subtopic_id))
        {
            subtopic.ensure_method(method_id).tactics.push(tactic.clone());
        }
        self.store
            .added_tactics
            .entry(proposed.vertical_id.clone())
            .or_default()
            .entry(proposed.subtopic_id.clone())
            .or_default()
            .push(tactic);
        self.templates.insert(key);
        self.result.accept(template);
    }
}

/// Vet a proposal bundle against `taxonomy`, recording accepted growth in
/// both `taxonomy` and `store`.
///
/// Verticals are processed first, then subtopics, then tactics, so later
/// proposals can target entries accepted earlier in the same bundle.
pub fn vet_proposals(
    taxonomy: &mut Taxonomy,
    store: &mut GrowthStore,
    proposals: &TaxonomyProposalBundle,
    provenance: Provenance,
) -> VettingResult {
    let templates = taxonomy.template_set();
    let tactic_ids = taxonomy
        .verticals
        .iter()
        .flat_map(Vertical::tactics)
        .map(|t| t.id.clone())
        .collect();
    let mut vetter = Vetter {
        taxonomy,
        store,
        provenance,
        templates,
        tactic_ids,
        result: VettingResult::default(),
    };
    for vertical in &proposals.verticals {
        vetter.add_vertical(vertical);
    }
    for subtopic in &proposals.subtopics {
        vetter.add_subtopic(subtopic);
    }
    for tactic in &proposals.tactics {
        vetter.add_tactic(tactic);
    }
    vetter.result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::{ProvenanceSource, seed_taxonomy};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn provenance() -> Provenance {
        Provenance::new(ProvenanceSource::AgentProposal, Utc::now())
    }

    fn tactic(vertical: &str, subtopic: &str, template: &str) -> TacticProposal {
        TacticProposal {
            vertical_id: vertical.into(),
            subtopic_id: subtopic.into(),
            template: template.into(),
            ..TacticProposal::default()
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  \"{name}\" Conference Speaker! "), "name_conference_speaker");
        assert_eq!(slugify("---"), "");
        assert_eq!(slugify(&"a".repeat(100)).len(), 64);
    }

    #[test]
    fn test_template_validity() {
        assert!(is_template_valid("\"{name}\" keynote"));
        assert!(!is_template_valid("abc"));
        assert!(!is_template_valid(&"x".repeat(201)));
        assert!(!is_template_valid("line one\nline two"));
        assert!(!is_template_valid("javascript:alert({name})"));
        assert!(!is_template_valid("DATA:text/html {x}"));
        assert!(!is_template_valid("{name} {company} ab"));
    }

    #[test]
    fn test_case_duplicate_yields_one_accept_one_reject() {
        let mut taxonomy = seed_taxonomy().unwrap();
        let mut store = GrowthStore::default();
        let bundle = TaxonomyProposalBundle {
            tactics: vec![
                tactic("individual", "professional", "\"{name}\" keynote speaker"),
                tactic("individual", "professional", "\"{NAME}\" KEYNOTE speaker"),
            ],
            ..TaxonomyProposalBundle::default()
        };
        let result = vet_proposals(&mut taxonomy, &mut store, &bundle, provenance());
        assert_eq!(result.accepted, 1);
        assert_eq!(result.rejected, 1);
        assert_eq!(result.rejected_items[0].reason, "Duplicate template.");
        assert_eq!(
            store.added_tactics["individual"]["professional"][0].id,
            "individual-professional-name_keynote_speaker"
        );
    }

    #[test]
    fn test_punctuation_variants_get_distinct_ids() {
        let mut taxonomy = seed_taxonomy().unwrap();
        let mut store = GrowthStore::default();
        let bundle = TaxonomyProposalBundle {
            tactics: vec![
                tactic("individual", "professional", "{name} keynote speaker"),
                tactic("individual", "professional", "\"{name}\" keynote-speaker"),
                tactic("individual", "professional", "{name}: keynote speaker"),
            ],
            ..TaxonomyProposalBundle::default()
        };
        let result = vet_proposals(&mut taxonomy, &mut store, &bundle, provenance());
        assert_eq!(result.accepted, 3);
        let ids: Vec<&str> = store.added_tactics["individual"]["professional"]
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "individual-professional-name_keynote_speaker",
                "individual-professional-name_keynote_speaker-2",
                "individual-professional-name_keynote_speaker-3",
            ]
        );
        let live: HashSet<&str> = taxonomy
            .tactics_for_vertical("individual")
            .into_iter()
            .map(|t| t.id.as_str())
            .collect();
        assert!(ids.iter().all(|id| live.contains(id)));
    }

    #[test]
    fn test_duplicate_of_seed_rejected() {
        let mut taxonomy = seed_taxonomy().unwrap();
        let mut store = GrowthStore::default();
        let bundle = TaxonomyProposalBundle {
            tactics: vec![tactic("individual", "professional", "SITE:LINKEDIN.COM {name}")],
            ..TaxonomyProposalBundle::default()
        };
        let result = vet_proposals(&mut taxonomy, &mut store, &bundle, provenance());
        assert_eq!(result.accepted, 0);
        assert_eq!(result.rejected_items[0].reason, "Duplicate template.");
        assert!(store.added_tactics.is_empty());
    }

    #[test]
    fn test_unknown_targets_rejected() {
        let mut taxonomy = seed_taxonomy().unwrap();
        let mut store = GrowthStore::default();
        let bundle = TaxonomyProposalBundle {
            tactics: vec![
                tactic("nope", "professional", "valid template one"),
                tactic("individual", "nope", "valid template two"),
                tactic("individual", "professional", "ab"),
            ],
            ..TaxonomyProposalBundle::default()
        };
        let result = vet_proposals(&mut taxonomy, &mut store, &bundle, provenance());
        let reasons: Vec<&str> = result.rejected_items.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(
            reasons,
            vec!["Unknown vertical nope.", "Unknown subtopic nope.", "Invalid template."]
        );
    }

    #[test]
    fn test_new_vertical_then_tactic_in_same_bundle() {
        let mut taxonomy = seed_taxonomy().unwrap();
        let mut store = GrowthStore::default();
        let bundle = TaxonomyProposalBundle {
            verticals: vec![VerticalProposal {
                label: "Maritime Vessel".into(),
                subtopics: vec![SubtopicProposal {
                    label: "Registry".into(),
                    tactics: vec![ProposedTemplate {
                        template: "\"{topic}\" IMO number".into(),
                        notes: None,
                    }],
                    ..SubtopicProposal::default()
                }],
                ..VerticalProposal::default()
            }],
            tactics: vec![tactic("maritime_vessel", "registry", "\"{topic}\" flag state")],
            ..TaxonomyProposalBundle::default()
        };
        let result = vet_proposals(&mut taxonomy, &mut store, &bundle, provenance());
        assert_eq!(result.accepted, 2);
        let vertical = taxonomy.vertical("maritime_vessel").unwrap();
        assert_eq!(vertical.blueprint_fields, vec!["summary", "keyEntities", "sources"]);
        assert_eq!(vertical.tactics().count(), 2);
        assert_eq!(store.added_verticals.len(), 1);
    }

    #[test]
    fn test_existing_subtopic_rejected() {
        let mut taxonomy = seed_taxonomy().unwrap();
        let mut store = GrowthStore::default();
        let bundle = TaxonomyProposalBundle {
            subtopics: vec![SubtopicProposal {
                vertical_id: "individual".into(),
                label: "Professional".into(),
                ..SubtopicProposal::default()
            }],
            ..TaxonomyProposalBundle::default()
        };
        let result = vet_proposals(&mut taxonomy, &mut store, &bundle, provenance());
        assert_eq!(result.rejected_items[0].reason, "Subtopic professional already exists.");
    }
}
