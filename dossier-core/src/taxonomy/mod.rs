//! Tactic taxonomy: vertical → subtopic → method → tactic.
//!
//! The seed taxonomy is compiled into the crate and never mutated. Growth
//! accepted at runtime lives in a separate [`GrowthStore`] that is merged over
//! the seed on every read, so the seed always wins on id collisions.

pub mod expand;
pub mod seed;
pub mod store;
pub mod vet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub use expand::{ExpandedTactic, SlotValues, expand_templates, expand_vertical, extract_slots};
pub use seed::seed_taxonomy;
pub use store::{GrowthStore, TaxonomyStore};
pub use vet::{TaxonomyProposalBundle, VettingResult, vet_proposals};

pub const TAXONOMY_VERSION: u32 = 1;
pub const DEFAULT_METHOD_ID: &str = "search";
pub const DEFAULT_METHOD_LABEL: &str = "Search Queries";
pub const GENERAL_VERTICAL_ID: &str = "general_discovery";

/// Where a taxonomy entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceSource {
    Seed,
    AgentProposal,
    OverseerVet,
    Manual,
}

/// Provenance record attached to verticals, subtopics and tactics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: ProvenanceSource,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Provenance {
    pub fn seed() -> Self {
        Self::new(ProvenanceSource::Seed, DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn new(source: ProvenanceSource, timestamp: DateTime<Utc>) -> Self {
        Self {
            source,
            timestamp,
            topic: None,
            agent_id: None,
            agent_name: None,
            run_id: None,
            note: None,
        }
    }
}

/// A parametrized query template with `{slot}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tactic {
    pub id: String,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<Provenance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tactics: Vec<Tactic>,
}

impl Method {
    pub fn new(id: impl Into<String>, label: impl Into<String>, tactics: Vec<Tactic>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            tactics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtopic {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<Provenance>,
}

impl Subtopic {
    /// The method with `method_id`, created empty if missing.
    pub fn ensure_method(&mut self, method_id: &str) -> &mut Method {
        let index = match self.methods.iter().position(|m| m.id == method_id) {
            Some(index) => index,
            None => {
                self.methods
                    .push(Method::new(method_id, DEFAULT_METHOD_LABEL, Vec::new()));
                self.methods.len() - 1
            }
        };
        &mut self.methods[index]
    }

    pub fn tactics(&self) -> impl Iterator<Item = &Tactic> {
        self.methods.iter().flat_map(|m| m.tactics.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertical {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub blueprint_fields: Vec<String>,
    #[serde(default)]
    pub subtopics: Vec<Subtopic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<Provenance>,
}

impl Vertical {
    pub fn subtopic(&self, id: &str) -> Option<&Subtopic> {
        self.subtopics.iter().find(|s| s.id == id)
    }

    pub fn subtopic_mut(&mut self, id: &str) -> Option<&mut Subtopic> {
        self.subtopics.iter_mut().find(|s| s.id == id)
    }

    pub fn tactics(&self) -> impl Iterator<Item = &Tactic> {
        self.subtopics.iter().flat_map(Subtopic::tactics)
    }
}

/// The full tactic taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub verticals: Vec<Vertical>,
}

/// Compact view of the taxonomy handed to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomySummary {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub subtopics: Vec<SubtopicSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtopicSummary {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Taxonomy {
    pub fn vertical(&self, id: &str) -> Option<&Vertical> {
        self.verticals.iter().find(|v| v.id == id)
    }

    pub fn vertical_mut(&mut self, id: &str) -> Option<&mut Vertical> {
        self.verticals.iter_mut().find(|v| v.id == id)
    }

    pub fn vertical_ids(&self) -> Vec<&str> {
        self.verticals.iter().map(|v| v.id.as_str()).collect()
    }

    /// Every tactic of a vertical, across subtopics and methods.
    pub fn tactics_for_vertical(&self, vertical_id: &str) -> Vec<&Tactic> {
        self.vertical(vertical_id)
            .map(|v| v.tactics().collect())
            .unwrap_or_default()
    }

    pub fn tactic_count(&self) -> usize {
        self.verticals.iter().map(|v| v.tactics().count()).sum()
    }

    /// Trimmed, lower-cased templates across the whole taxonomy.
    pub fn template_set(&self) -> HashSet<String> {
        self.verticals
            .iter()
            .flat_map(Vertical::tactics)
            .map(|t| template_key(&t.template))
            .collect()
    }

    pub fn summary(&self) -> Vec<TaxonomySummary> {
        self.verticals
            .iter()
            .map(|v| TaxonomySummary {
                id: v.id.clone(),
                label: v.label.clone(),
                description: v.description.clone(),
                subtopics: v
                    .subtopics
                    .iter()
                    .map(|s| SubtopicSummary {
                        id: s.id.clone(),
                        label: s.label.clone(),
                        description: s.description.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Layer a growth store over this taxonomy.
    ///
    /// Additive and idempotent: entries whose id (or, for tactics, whose
    /// normalized template) already exists are skipped, so existing entries
    /// always win.
    pub fn merge_growth(&self, store: &GrowthStore) -> Taxonomy {
        let mut merged = self.clone();

        for added in &store.added_verticals {
            if added.id.is_empty() || merged.vertical(&added.id).is_some() {
                continue;
            }
            merged.verticals.push(added.clone());
        }

        for (vertical_id, subtopics) in &store.added_subtopics {
            let Some(vertical) = merged.vertical_mut(vertical_id) else {
                continue;
            };
            for sub in subtopics {
                if sub.id.is_empty() || vertical.subtopic(&sub.id).is_some() {
                    continue;
                }
                vertical.subtopics.push(sub.clone());
            }
        }

        for (vertical_id, by_subtopic) in &store.added_tactics {
            let Some(vertical) = merged.vertical_mut(vertical_id) else {
                continue;
            };
            for (subtopic_id, tactics) in by_subtopic {
                let Some(subtopic) = vertical.subtopic_mut(subtopic_id) else {
                    continue;
                };
                let mut templates: HashSet<String> =
                    subtopic.tactics().map(|t| template_key(&t.template)).collect();
                let method = subtopic.ensure_method(DEFAULT_METHOD_ID);
                for tactic in tactics {
                    if tactic.template.trim().is_empty() {
                        continue;
                    }
                    if templates.insert(template_key(&tactic.template)) {
                        method.tactics.push(tactic.clone());
                    }
                }
            }
        }

        merged.updated_at = match (self.updated_at, store.updated_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        merged
    }
}

/// Normalized template used for duplicate detection.
pub fn template_key(template: &str) -> String {
    template.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tactic(id: &str, template: &str) -> Tactic {
        Tactic {
            id: id.into(),
            template: template.into(),
            notes: None,
            provenance: Vec::new(),
        }
    }

    #[test]
    fn test_seed_summary_lists_all_verticals() {
        let seed = seed_taxonomy().unwrap();
        let summary = seed.summary();
        assert_eq!(summary.len(), seed.verticals.len());
        assert!(summary.iter().any(|v| v.id == "individual"));
        assert!(summary.iter().any(|v| v.id == GENERAL_VERTICAL_ID));
    }

    #[test]
    fn test_merge_adds_tactic_and_is_idempotent() {
        let seed = seed_taxonomy().unwrap();
        let mut store = GrowthStore::default();
        store
            .added_tactics
            .entry("individual".into())
            .or_default()
            .entry("professional".into())
            .or_default()
            .push(tactic("individual-professional-x", "\"{name}\" conference speaker"));

        let once = seed.merge_growth(&store);
        let twice = once.merge_growth(&store);
        assert_eq!(once, twice);
        assert_eq!(once.tactic_count(), seed.tactic_count() + 1);
    }

    #[test]
    fn test_merge_seed_wins_on_collision() {
        let seed = seed_taxonomy().unwrap();
        let original_label = seed.vertical("individual").unwrap().label.clone();
        let mut store = GrowthStore::default();
        store.added_verticals.push(Vertical {
            id: "individual".into(),
            label: "Imposter".into(),
            description: None,
            blueprint_fields: Vec::new(),
            subtopics: Vec::new(),
            provenance: Vec::new(),
        });
        let merged = seed.merge_growth(&store);
        assert_eq!(merged.vertical("individual").unwrap().label, original_label);
        assert_eq!(merged.verticals.len(), seed.verticals.len());
    }

    #[test]
    fn test_merge_skips_duplicate_template_case_insensitive() {
        let seed = seed_taxonomy().unwrap();
        let existing = seed
            .vertical("individual")
            .and_then(|v| v.subtopic("professional"))
            .and_then(|s| s.tactics().next())
            .unwrap()
            .template
            .to_uppercase();
        let mut store = GrowthStore::default();
        store
            .added_tactics
            .entry("individual".into())
            .or_default()
            .entry("professional".into())
            .or_default()
            .push(tactic("dup", &existing));
        assert_eq!(seed.merge_growth(&store).tactic_count(), seed.tactic_count());
    }

    #[test]
    fn test_ensure_method_creates_once() {
        let mut sub = Subtopic {
            id: "s".into(),
            label: "S".into(),
            description: None,
            methods: Vec::new(),
            provenance: Vec::new(),
        };
        sub.ensure_method(DEFAULT_METHOD_ID);
        sub.ensure_method(DEFAULT_METHOD_ID);
        assert_eq!(sub.methods.len(), 1);
        assert_eq!(sub.methods[0].label, DEFAULT_METHOD_LABEL);
    }
}
