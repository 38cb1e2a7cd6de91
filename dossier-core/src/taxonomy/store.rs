//! Persisted, additive taxonomy growth.

use super::vet::{TaxonomyProposalBundle, VettingResult, vet_proposals};
use super::{Provenance, Subtopic, TAXONOMY_VERSION, Tactic, Taxonomy, Vertical, seed_taxonomy};
use crate::error::TaxonomyError;
use crate::persistence::SnapshotPort;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Growth accepted on top of the seed taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthStore {
    pub version: u32,
    pub updated_at: Option<DateTime<Utc>>,
    pub added_verticals: Vec<Vertical>,
    /// Subtopics keyed by vertical id.
    pub added_subtopics: BTreeMap<String, Vec<Subtopic>>,
    /// Tactics keyed by vertical id, then subtopic id.
    pub added_tactics: BTreeMap<String, BTreeMap<String, Vec<Tactic>>>,
}

impl Default for GrowthStore {
    fn default() -> Self {
        Self {
            version: TAXONOMY_VERSION,
            updated_at: None,
            added_verticals: Vec::new(),
            added_subtopics: BTreeMap::new(),
            added_tactics: BTreeMap::new(),
        }
    }
}

impl GrowthStore {
    pub fn is_empty(&self) -> bool {
        self.added_verticals.is_empty()
            && self.added_subtopics.is_empty()
            && self.added_tactics.is_empty()
    }
}

/// Process-wide taxonomy: immutable seed plus a persisted growth store.
///
/// Reads merge the latest snapshot over the seed. Writes go through a single
/// async writer lock, so one vet-and-persist cycle completes before the next
/// begins and no two writers can mint the same tactic id.
pub struct TaxonomyStore {
    seed: Taxonomy,
    port: Arc<dyn SnapshotPort<GrowthStore>>,
    writer: tokio::sync::Mutex<()>,
}

impl TaxonomyStore {
    pub fn new(port: Arc<dyn SnapshotPort<GrowthStore>>) -> Result<Self, TaxonomyError> {
        Ok(Self {
            seed: seed_taxonomy()?,
            port,
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn seed(&self) -> &Taxonomy {
        &self.seed
    }

    fn load_growth(&self) -> GrowthStore {
        match self.port.load() {
            Ok(Some(store)) => store,
            Ok(None) => GrowthStore::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load taxonomy growth store; using seed only");
                GrowthStore::default()
            }
        }
    }

    pub fn growth(&self) -> GrowthStore {
        self.load_growth()
    }

    /// The seed merged with all persisted growth.
    pub fn taxonomy(&self) -> Taxonomy {
        self.seed.merge_growth(&self.load_growth())
    }

    /// Vet proposals and persist accepted growth.
    ///
    /// Never fails: persistence problems are logged and the vetting result
    /// is still returned.
    pub async fn propose_and_vet(
        &self,
        proposals: &TaxonomyProposalBundle,
        provenance: Provenance,
    ) -> VettingResult {
        let _guard = self.writer.lock().await;

        let mut store = self.load_growth();
        let mut taxonomy = self.seed.merge_growth(&store);
        let result = vet_proposals(&mut taxonomy, &mut store, proposals, provenance);

        if result.accepted > 0 {
            store.updated_at = Some(Utc::now());
            if let Err(e) = self.port.save(&store) {
                warn!(error = %e, "Failed to persist taxonomy growth");
            } else {
                info!(
                    accepted = result.accepted,
                    rejected = result.rejected,
                    "Taxonomy growth persisted"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{JsonFilePort, MemoryPort};
    use crate::taxonomy::ProvenanceSource;
    use crate::taxonomy::vet::TacticProposal;
    use tempfile::TempDir;

    fn bundle(template: &str) -> TaxonomyProposalBundle {
        TaxonomyProposalBundle {
            tactics: vec![TacticProposal {
                vertical_id: "corporation".into(),
                subtopic_id: "financials_funding".into(),
                template: template.into(),
                ..TacticProposal::default()
            }],
            ..TaxonomyProposalBundle::default()
        }
    }

    fn provenance() -> Provenance {
        Provenance::new(ProvenanceSource::AgentProposal, Utc::now())
    }

    #[tokio::test]
    async fn test_accepted_growth_visible_in_taxonomy() {
        let store = TaxonomyStore::new(Arc::new(MemoryPort::<GrowthStore>::new())).unwrap();
        let before = store.taxonomy().tactic_count();

        let result = store
            .propose_and_vet(&bundle("\"{company}\" bond prospectus"), provenance())
            .await;
        assert_eq!(result.accepted, 1);
        assert_eq!(store.taxonomy().tactic_count(), before + 1);
        assert_eq!(store.seed().tactic_count(), before);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_duplicate() {
        let store = Arc::new(TaxonomyStore::new(Arc::new(MemoryPort::<GrowthStore>::new())).unwrap());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .propose_and_vet(&bundle("\"{company}\" credit rating"), provenance())
                    .await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            accepted += handle.await.unwrap().accepted;
        }
        assert_eq!(accepted, 1);
        let growth = store.growth();
        assert_eq!(growth.added_tactics["corporation"]["financials_funding"].len(), 1);
    }

    #[tokio::test]
    async fn test_growth_survives_restart_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taxonomy.json");
        {
            let store = TaxonomyStore::new(Arc::new(JsonFilePort::<GrowthStore>::new(path.clone()))).unwrap();
            store
                .propose_and_vet(&bundle("\"{company}\" annual shareholder letter"), provenance())
                .await;
        }
        let reopened = TaxonomyStore::new(Arc::new(JsonFilePort::<GrowthStore>::new(path))).unwrap();
        let growth = reopened.growth();
        assert!(!growth.is_empty());
        assert!(growth.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_rejections_do_not_write() {
        let port: Arc<MemoryPort<GrowthStore>> = Arc::new(MemoryPort::new());
        let store = TaxonomyStore::new(port.clone()).unwrap();
        let result = store.propose_and_vet(&bundle("x"), provenance()).await;
        assert_eq!(result.rejected, 1);
        assert!(port.load().unwrap().is_none());
    }
}
