//! Integration tests for the evidence recovery pass.
//!
//! Queries are hand-built so their priority scores are known; the mock
//! oracle answers each one by text.

use dossier_core::cache::CacheSnapshot;
use dossier_core::config::{RecoveryConfig, RetryConfig};
use dossier_core::evidence::{
    EvidenceRecovery, RecoveryCache, RecoveryOutcome, RecoveryQuery, evaluate_evidence,
};
use dossier_core::oracle::{MockOracle, OracleOp, SearchReply};
use dossier_core::persistence::MemoryPort;
use dossier_core::sources::{NormalizedSource, RawSource};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "123 Main St, Springfield, Greene County, MO 65802";
const AUTHORITY_QUERY: &str = "assessor parcel";

fn cache() -> Arc<RecoveryCache> {
    Arc::new(RecoveryCache::open(
        Arc::new(MemoryPort::<CacheSnapshot<Vec<NormalizedSource>>>::new()),
        3600,
        64,
    ))
}

fn existing() -> Vec<NormalizedSource> {
    [
        ("https://blog.example.com/a", "Neighborhood blog"),
        ("https://news.example.com/b", "Local news"),
    ]
    .iter()
    .filter_map(|(uri, title)| NormalizedSource::from_raw(&RawSource::new(*uri, *title), "mock"))
    .collect()
}

/// Five priority queries (score >= 4) and three fallbacks, deliberately
/// out of order.
fn candidates() -> Vec<RecoveryQuery> {
    [
        "zoning permit",
        "parcel tax",
        AUTHORITY_QUERY,
        "neighborhood",
        "county assessor parcel record",
        "gis layer",
        "deed recorder",
        "assessor parcel record",
    ]
    .into_iter()
    .map(RecoveryQuery::new)
    .collect()
}

/// The authority query answers with an assessor page; every other query
/// answers with a listing site.
fn answer(query: &str) -> Result<SearchReply, dossier_core::error::OracleError> {
    if query == AUTHORITY_QUERY {
        return Ok(SearchReply::new(
            "Assessor record",
            vec![RawSource::new(
                "https://www.greenecountymo.gov/assessor/parcel/123",
                "Greene County Assessor Parcel Record",
            )],
        ));
    }
    let slug: String = query.chars().filter(char::is_ascii_alphanumeric).collect();
    Ok(SearchReply::new(
        "Listing",
        vec![RawSource::new(
            format!("https://www.zillow.com/homedetails/{slug}"),
            "Home listing",
        )],
    ))
}

fn single_attempt() -> RecoveryConfig {
    RecoveryConfig {
        retry: RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        },
        ..RecoveryConfig::default()
    }
}

#[test]
fn test_candidate_scores() {
    let scores: Vec<u32> = candidates().iter().map(|q| q.score).collect();
    assert_eq!(scores, vec![2, 5, 6, 0, 8, 1, 5, 7]);
}

#[tokio::test(start_paused = true)]
async fn test_priority_queries_stop_once_authority_met() {
    let oracle = Arc::new(MockOracle::new().with_search(answer));
    let recovery = EvidenceRecovery::new(oracle.clone(), RecoveryConfig::default(), cache());

    let report = recovery
        .recover(TOPIC, &existing(), &candidates(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report.executed,
        vec!["county assessor parcel record", "assessor parcel record", AUTHORITY_QUERY]
    );
    assert_eq!(oracle.search_queries(), report.executed);
    assert!(report.status.meets_authority());
    assert!(matches!(
        report.outcome,
        RecoveryOutcome::Passed | RecoveryOutcome::AuthoritySatisfied
    ));
    assert!(report.outcome.is_success());
    assert_eq!(report.sources.len(), 3);
    assert!(report.metrics.needed);
    assert!(report.metrics.attempted);
    assert!(report.metrics.success);
    assert_eq!(report.metrics.executed_queries, 3);
    assert_eq!(report.metrics.sources_recovered, 3);
    assert!(report.warning().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_second_pass_served_from_cache() {
    let oracle = Arc::new(MockOracle::new().with_search(answer));
    let shared = cache();
    let recovery = EvidenceRecovery::new(oracle.clone(), RecoveryConfig::default(), shared);
    let token = CancellationToken::new();

    let first = recovery
        .recover(TOPIC, &existing(), &candidates(), &token)
        .await
        .unwrap();
    let second = recovery
        .recover(TOPIC, &existing(), &candidates(), &token)
        .await
        .unwrap();

    assert_eq!(oracle.call_count(OracleOp::Search), 3);
    assert_eq!(second.metrics.cache_hits, 3);
    assert_eq!(second.executed, first.executed);
    assert_eq!(second.outcome, first.outcome);
}

#[tokio::test(start_paused = true)]
async fn test_empty_replies_exhaust_with_bounded_fallbacks() {
    let oracle = Arc::new(MockOracle::new());
    let recovery = EvidenceRecovery::new(oracle.clone(), single_attempt(), cache());

    let report = recovery
        .recover(TOPIC, &existing(), &candidates(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RecoveryOutcome::Exhausted);
    // Five priority queries, then at most two fallbacks.
    assert_eq!(report.executed.len(), 7);
    assert_eq!(report.abandoned, report.executed);
    assert!(!report.executed.iter().any(|q| q == "neighborhood"));
    assert!(report.metrics.exhausted);
    assert!(report.sources.is_empty());
    let warning = report.warning().unwrap();
    assert!(warning.starts_with("Evidence recovery exhausted"));
}

#[tokio::test(start_paused = true)]
async fn test_budget_expiry_times_out() {
    let oracle = Arc::new(
        MockOracle::new()
            .with_delay(Duration::from_secs(10))
            .with_search(answer),
    );
    let config = RecoveryConfig {
        budget_secs: 5,
        ..RecoveryConfig::default()
    };
    let recovery = EvidenceRecovery::new(oracle, config, cache());

    let report = recovery
        .recover(TOPIC, &existing(), &candidates(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.outcome, RecoveryOutcome::TimedOut);
    assert!(report.metrics.timed_out);
    assert!(!report.metrics.success);
    assert!(report.warning().unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_escapes_as_error() {
    let oracle = Arc::new(
        MockOracle::new()
            .with_delay(Duration::from_secs(10))
            .with_search(answer),
    );
    let recovery = EvidenceRecovery::new(oracle, RecoveryConfig::default(), cache());
    let token = CancellationToken::new();
    token.cancel();

    let err = recovery
        .recover(TOPIC, &existing(), &candidates(), &token)
        .await
        .unwrap_err();
    assert!(err.is_aborted());
}

#[test]
fn test_existing_sources_fail_gate() {
    let status = evaluate_evidence(&existing());
    assert!(!status.meets_all);
    assert!(!status.meets_authority());
}
