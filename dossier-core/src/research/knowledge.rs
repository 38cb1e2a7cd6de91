//! Knowledge base of domains and method queries from validated reports.

use crate::persistence::SnapshotPort;
use crate::sources::domain_of;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Each list keeps at most this many of the most recent unique entries.
pub const KNOWLEDGE_CAP: usize = 300;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBase {
    pub domains: Vec<String>,
    /// Method queries; may contain a `{topic}` placeholder.
    pub methods: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn merge_recent(existing: &[String], added: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged: Vec<String> = existing
        .iter()
        .cloned()
        .chain(added)
        .filter(|item| !item.trim().is_empty())
        .filter(|item| seen.insert(item.clone()))
        .collect();
    if merged.len() > KNOWLEDGE_CAP {
        merged.drain(..merged.len() - KNOWLEDGE_CAP);
    }
    merged
}

impl KnowledgeBase {
    /// Queries this knowledge contributes for a topic: `site:` queries over
    /// known domains, then stored methods with `{topic}` substituted.
    pub fn queries_for(&self, topic: &str) -> Vec<String> {
        self.domains
            .iter()
            .map(|d| format!("site:{d} {topic}"))
            .chain(self.methods.iter().map(|m| m.replace("{topic}", topic)))
            .collect()
    }

    /// Merge a validated report: domains of its cited sources, and the
    /// method queries whose sources the report cites.
    pub fn absorb(
        &self,
        report_sources: &[String],
        method_sources: &[(String, Vec<String>)],
        now: DateTime<Utc>,
    ) -> Self {
        let cited: HashSet<&str> = report_sources.iter().map(String::as_str).collect();
        let domains = report_sources
            .iter()
            .map(|uri| domain_of(uri))
            .filter(|d| !d.is_empty());
        let methods = method_sources
            .iter()
            .filter(|(_, sources)| sources.iter().any(|s| cited.contains(s.as_str())))
            .map(|(query, _)| query.clone());
        Self {
            domains: merge_recent(&self.domains, domains),
            methods: merge_recent(&self.methods, methods),
            updated_at: Some(now),
        }
    }
}

/// Process-wide knowledge base behind a snapshot port.
pub struct KnowledgeStore {
    port: Arc<dyn SnapshotPort<KnowledgeBase>>,
}

impl KnowledgeStore {
    pub fn new(port: Arc<dyn SnapshotPort<KnowledgeBase>>) -> Self {
        Self { port }
    }

    /// Current snapshot; unreadable state starts empty.
    pub fn load(&self) -> KnowledgeBase {
        match self.port.load() {
            Ok(Some(kb)) => kb,
            Ok(None) => KnowledgeBase::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load knowledge base; starting empty");
                KnowledgeBase::default()
            }
        }
    }

    /// Merge a validated report into the stored knowledge and persist it.
    pub fn record_validated(
        &self,
        report_sources: &[String],
        method_sources: &[(String, Vec<String>)],
    ) -> KnowledgeBase {
        let updated = self.load().absorb(report_sources, method_sources, Utc::now());
        match self.port.save(&updated) {
            Ok(()) => info!(
                domains = updated.domains.len(),
                methods = updated.methods.len(),
                "Knowledge base updated"
            ),
            Err(e) => warn!(error = %e, "Failed to persist knowledge base"),
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{JsonFilePort, MemoryPort};
    use tempfile::TempDir;

    #[test]
    fn test_queries_for_topic() {
        let kb = KnowledgeBase {
            domains: vec!["dallascad.org".into()],
            methods: vec!["{topic} deed search".into(), "fixed query".into()],
            updated_at: None,
        };
        assert_eq!(
            kb.queries_for("1 Elm St"),
            vec![
                "site:dallascad.org 1 Elm St",
                "1 Elm St deed search",
                "fixed query"
            ]
        );
    }

    #[test]
    fn test_absorb_keeps_cited_methods_only() {
        let kb = KnowledgeBase::default();
        let report = vec!["https://www.example.gov/a".to_string()];
        let methods = vec![
            ("q1".to_string(), vec!["https://www.example.gov/a".to_string()]),
            ("q2".to_string(), vec!["https://other.com/".to_string()]),
        ];
        let updated = kb.absorb(&report, &methods, Utc::now());
        assert_eq!(updated.domains, vec!["example.gov"]);
        assert_eq!(updated.methods, vec!["q1"]);
        assert!(updated.updated_at.is_some());
    }

    #[test]
    fn test_cap_keeps_most_recent() {
        let existing: Vec<String> = (0..KNOWLEDGE_CAP).map(|i| format!("d{i}.com")).collect();
        let merged = merge_recent(&existing, vec!["new.com".to_string(), "d1.com".to_string()]);
        assert_eq!(merged.len(), KNOWLEDGE_CAP);
        assert_eq!(merged.last().map(String::as_str), Some("new.com"));
        assert_eq!(merged[0], "d1.com");
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let port = JsonFilePort::<KnowledgeBase>::new(dir.path().join("kb.json"));
        let store = KnowledgeStore::new(Arc::new(port));
        assert!(store.load().domains.is_empty());
        store.record_validated(&["https://a.gov/x".to_string()], &[]);
        assert_eq!(store.load().domains, vec!["a.gov"]);
    }

    #[test]
    fn test_memory_store() {
        let store = KnowledgeStore::new(Arc::new(MemoryPort::<KnowledgeBase>::new()));
        let kb = store.record_validated(&[], &[]);
        assert!(kb.domains.is_empty());
        assert_eq!(store.load(), kb);
    }
}
