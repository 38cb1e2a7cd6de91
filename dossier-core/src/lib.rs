//! # Dossier Core
//!
//! Research orchestration core for Dossier.
//! Classifies a topic against a self-growing tactic taxonomy, runs bounded
//! rounds of concurrent oracle searches under exhaustion control, gates
//! address topics on parcel-level evidence, and builds the final dossier.

pub mod address;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod dossier;
pub mod error;
pub mod evidence;
pub mod gaps;
pub mod oracle;
pub mod parcel;
pub mod persistence;
pub mod research;
pub mod retry;
pub mod sources;
pub mod taxonomy;
pub mod topic;

// Re-export commonly used types at the crate root.
pub use address::{ParsedAddress, canonical_address, normalize_address_variants};
pub use classifier::{Classification, normalize_classification};
pub use config::{DossierConfig, RecoveryConfig, RunConfig, load_config};
pub use dossier::{FinalReport, build_dossier};
pub use error::{
    DossierError, OracleError, ProviderError, Result, RunError, TaxonomyError,
};
pub use evidence::{EvidenceRecovery, EvidenceStatus, RecoveryReport, evaluate_evidence};
pub use gaps::{DataGap, GapReason, GapStatus};
pub use oracle::{MockOracle, OracleOp, Parsed, ResearchOracle, SearchReply};
pub use parcel::{FixtureProviders, ParcelProviders, ParcelResolution, resolve_parcel};
pub use persistence::{JsonFilePort, MemoryPort, SnapshotPort};
pub use research::{
    ExhaustionMetrics, Finding, Orchestrator, RunBoard, RunObserver, RunPhase, Task,
};
pub use sources::{NormalizedSource, RawSource};
pub use taxonomy::{Taxonomy, TaxonomyStore};
pub use topic::TopicShape;
