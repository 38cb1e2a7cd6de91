//! Evidence gating for address topics: source authority scoring, the
//! three-threshold gate, and the recovery pass that runs when it fails.

pub mod gate;
pub mod recovery;

pub use gate::{
    EvidenceStatus, SourceAuthority, classify_source, evaluate_evidence, score_authority,
};
pub use recovery::{
    EvidenceRecovery, RecoveryCache, RecoveryMetrics, RecoveryOutcome, RecoveryQuery,
    RecoveryReport, RecoverySlots, build_recovery_queries, score_recovery_query,
};
