//! Budgeted, cached, retried evidence recovery for address topics.
//!
//! When the evidence gate fails after the research rounds, recovery issues a
//! short ranked list of record-oriented queries. Priority queries run first,
//! highest score first; a couple of lower-scored fallbacks run only if the
//! authority thresholds are still unmet. The whole pass is bounded by a hard
//! wall-clock deadline.

use super::gate::{EvidenceStatus, evaluate_evidence};
use crate::address::ParsedAddress;
use crate::cache::{PersistentCache, cache_key};
use crate::config::RecoveryConfig;
use crate::error::OracleError;
use crate::oracle::{ResearchOracle, SearchReply, guarded};
use crate::retry::with_retry;
use crate::sources::{NormalizedSource, normalize_sources};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Recovery cache: normalized sources keyed by `provider|topic|query`.
pub type RecoveryCache = PersistentCache<Vec<NormalizedSource>>;

const SEARCH_CONTEXT: &str = "Evidence recovery: locate parcel-level public records.";

/// Keyword weights for ranking recovery queries.
const PRIORITY_KEYWORDS: &[(&str, u32)] = &[
    ("assessor", 3),
    ("appraisal", 3),
    ("appraiser", 3),
    ("parcel", 3),
    ("tax", 2),
    ("deed", 2),
    ("recorder", 2),
    ("site:.gov", 2),
    ("county", 1),
    ("gis", 1),
    ("zoning", 1),
    ("permit", 1),
    ("record", 1),
];

/// Query templates; `{address}`, `{county}`, `{authority}`, `{city}` and
/// `{state}` are filled from [`RecoverySlots`]. Templates whose slots are
/// unknown are skipped.
const RECOVERY_TEMPLATES: &[&str] = &[
    "{address} {county} assessor parcel",
    "{address} {authority} property record",
    "{address} parcel id",
    "{address} property tax record",
    "{address} {county} deed records",
    "{address} site:.gov",
    "{address} zoning GIS {city}",
    "{address} building permits {city}",
    "{address} {city} {state} property",
    "{address} history",
];

/// Resolved location slots for building recovery queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoverySlots {
    pub address: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub county: Option<String>,
    /// Record authority, e.g. an appraisal district.
    pub authority: Option<String>,
}

impl RecoverySlots {
    /// Derive slots from an address topic. A part ending in "County" fills
    /// the county slot and its assessor becomes the authority.
    pub fn from_topic(topic: &str) -> Self {
        let Some(parsed) = ParsedAddress::parse(topic) else {
            return Self {
                address: topic.trim().to_string(),
                ..Self::default()
            };
        };
        let county = parsed
            .remainder
            .iter()
            .find(|part| part.to_lowercase().ends_with(" county"))
            .cloned();
        let authority = county.as_ref().map(|c| format!("{c} Appraisal District"));
        Self {
            address: parsed.cleaned.clone(),
            city: parsed
                .city()
                .filter(|c| !c.to_lowercase().ends_with(" county"))
                .map(str::to_string),
            state: parsed.state(),
            county,
            authority,
        }
    }

    fn value(&self, slot: &str) -> Option<&str> {
        let value = match slot {
            "address" => Some(self.address.as_str()),
            "city" => self.city.as_deref(),
            "state" => self.state.as_deref(),
            "county" => self.county.as_deref(),
            "authority" => self.authority.as_deref(),
            _ => None,
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// A candidate recovery query and its priority score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryQuery {
    pub query: String,
    pub score: u32,
}

impl RecoveryQuery {
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let score = score_recovery_query(&query);
        Self { query, score }
    }
}

/// Keyword-weighted priority of a recovery query.
pub fn score_recovery_query(query: &str) -> u32 {
    let lower = query.to_lowercase();
    PRIORITY_KEYWORDS
        .iter()
        .filter(|(keyword, _)| lower.contains(keyword))
        .map(|(_, weight)| weight)
        .sum()
}

fn fill(template: &str, slots: &RecoverySlots) -> Option<String> {
    let mut query = template.to_string();
    for slot in ["address", "county", "authority", "city", "state"] {
        let placeholder = format!("{{{slot}}}");
        if query.contains(&placeholder) {
            query = query.replace(&placeholder, slots.value(slot)?);
        }
    }
    Some(query.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Ranked, de-duplicated recovery queries, highest score first.
pub fn build_recovery_queries(slots: &RecoverySlots, max_queries: usize) -> Vec<RecoveryQuery> {
    let mut seen = HashSet::new();
    let mut queries: Vec<RecoveryQuery> = RECOVERY_TEMPLATES
        .iter()
        .filter_map(|template| fill(template, slots))
        .filter(|query| seen.insert(query.to_lowercase()))
        .map(RecoveryQuery::new)
        .collect();
    queries.sort_by(|a, b| b.score.cmp(&a.score));
    queries.truncate(max_queries);
    queries
}

/// How a recovery pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The gate already passed; nothing ran.
    NotNeeded,
    /// All three gate thresholds hold.
    Passed,
    /// Authority thresholds hold but the total count is still short.
    AuthoritySatisfied,
    /// Every allowed query ran and the thresholds are still unmet.
    Exhausted,
    /// The wall-clock budget ran out.
    TimedOut,
}

impl RecoveryOutcome {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            RecoveryOutcome::NotNeeded | RecoveryOutcome::Passed | RecoveryOutcome::AuthoritySatisfied
        )
    }
}

/// Counters reported alongside the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryMetrics {
    pub needed: bool,
    pub attempted: bool,
    pub success: bool,
    pub timed_out: bool,
    pub exhausted: bool,
    pub total_queries: usize,
    pub executed_queries: usize,
    pub cache_hits: usize,
    pub sources_recovered: usize,
    pub latency_ms: u64,
}

/// Result of a recovery pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub outcome: RecoveryOutcome,
    pub status: EvidenceStatus,
    /// Sources recovered by this pass, not already in the input set.
    pub sources: Vec<NormalizedSource>,
    /// Queries issued (or answered from cache), in order.
    pub executed: Vec<String>,
    /// Queries that still had zero sources after every attempt.
    pub abandoned: Vec<String>,
    pub metrics: RecoveryMetrics,
}

impl RecoveryReport {
    /// Non-fatal warning for the run log, if the pass did not succeed.
    pub fn warning(&self) -> Option<String> {
        match self.outcome {
            RecoveryOutcome::Exhausted => Some(format!(
                "Evidence recovery exhausted: {}",
                self.status.reasons().join(", ")
            )),
            RecoveryOutcome::TimedOut => Some(format!(
                "Evidence recovery timed out after {} queries: {}",
                self.executed.len(),
                self.status.reasons().join(", ")
            )),
            _ => None,
        }
    }
}

struct PassState {
    sources: Vec<NormalizedSource>,
    recovered: Vec<NormalizedSource>,
    seen: HashSet<String>,
    executed: Vec<String>,
    abandoned: Vec<String>,
    cache_hits: usize,
    status: EvidenceStatus,
}

impl PassState {
    fn absorb(&mut self, sources: Vec<NormalizedSource>) {
        for source in sources {
            if self.seen.insert(source.uri.clone()) {
                self.sources.push(source.clone());
                self.recovered.push(source);
            }
        }
        self.status = evaluate_evidence(&self.sources);
    }
}

/// Runs recovery passes against one oracle and a shared cache.
pub struct EvidenceRecovery {
    oracle: Arc<dyn ResearchOracle>,
    config: RecoveryConfig,
    cache: Arc<RecoveryCache>,
}

impl EvidenceRecovery {
    pub fn new(
        oracle: Arc<dyn ResearchOracle>,
        config: RecoveryConfig,
        cache: Arc<RecoveryCache>,
    ) -> Self {
        Self {
            oracle,
            config,
            cache,
        }
    }

    /// Run a recovery pass over `existing` sources with ranked candidates.
    ///
    /// Only cancellation escapes as an error; every other failure abandons the
    /// query it belongs to.
    pub async fn recover(
        &self,
        topic: &str,
        existing: &[NormalizedSource],
        candidates: &[RecoveryQuery],
        token: &CancellationToken,
    ) -> Result<RecoveryReport, OracleError> {
        let started = Instant::now();
        let initial = evaluate_evidence(existing);
        let mut state = PassState {
            sources: existing.to_vec(),
            recovered: Vec::new(),
            seen: existing.iter().map(|s| s.uri.clone()).collect(),
            executed: Vec::new(),
            abandoned: Vec::new(),
            cache_hits: 0,
            status: initial,
        };
        let mut metrics = RecoveryMetrics {
            needed: !initial.meets_all,
            total_queries: candidates.len().min(self.config.max_queries),
            ..RecoveryMetrics::default()
        };

        if initial.meets_all {
            return Ok(self.finish(RecoveryOutcome::NotNeeded, state, metrics, started));
        }
        metrics.attempted = true;

        let deadline = tokio::time::Instant::now() + self.config.budget();
        let pass = self.run_queries(topic, candidates, initial, &mut state, token);
        let outcome = match tokio::time::timeout_at(deadline, pass).await {
            Ok(Ok(())) => {
                if state.status.meets_all {
                    RecoveryOutcome::Passed
                } else if state.status.meets_authority() {
                    RecoveryOutcome::AuthoritySatisfied
                } else {
                    RecoveryOutcome::Exhausted
                }
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                if state.status.meets_all {
                    RecoveryOutcome::Passed
                } else {
                    RecoveryOutcome::TimedOut
                }
            }
        };
        Ok(self.finish(outcome, state, metrics, started))
    }

    async fn run_queries(
        &self,
        topic: &str,
        candidates: &[RecoveryQuery],
        initial: EvidenceStatus,
        state: &mut PassState,
        token: &CancellationToken,
    ) -> Result<(), OracleError> {
        let mut ranked: Vec<&RecoveryQuery> = candidates.iter().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        let (priority, fallback): (Vec<&RecoveryQuery>, Vec<&RecoveryQuery>) = ranked
            .into_iter()
            .partition(|q| q.score >= self.config.priority_threshold);

        for candidate in priority {
            if state.executed.len() >= self.config.max_queries {
                return Ok(());
            }
            if state.status.meets_all {
                return Ok(());
            }
            if state.status.meets_authority() && !initial.meets_authority() {
                debug!(
                    executed = state.executed.len(),
                    "Authority thresholds met by priority queries; stopping recovery"
                );
                return Ok(());
            }
            self.run_one(topic, &candidate.query, state, token).await?;
        }

        if state.status.meets_all || state.status.meets_authority() {
            return Ok(());
        }

        for candidate in fallback.into_iter().take(self.config.max_fallback_queries) {
            if state.executed.len() >= self.config.max_queries
                || state.status.meets_all
                || state.status.meets_authority()
            {
                break;
            }
            self.run_one(topic, &candidate.query, state, token).await?;
        }
        Ok(())
    }

    async fn run_one(
        &self,
        topic: &str,
        query: &str,
        state: &mut PassState,
        token: &CancellationToken,
    ) -> Result<(), OracleError> {
        state.executed.push(query.to_string());
        let provider = self.oracle.name().to_string();
        let key = cache_key(&[&provider, topic, query]);

        if let Some(cached) = self.cache.get(&key) {
            debug!(query, sources = cached.len(), "Recovery cache hit");
            state.cache_hits += 1;
            state.absorb(cached);
            return Ok(());
        }

        let reply = with_retry(
            &self.config.retry,
            |reply: &SearchReply| !reply.sources.is_empty(),
            || guarded(token, self.oracle.search(query, SEARCH_CONTEXT)),
        )
        .await;

        match reply {
            Ok(reply) => {
                let batch = normalize_sources(&reply.sources, &provider);
                if batch.sources.is_empty() {
                    info!(query, "Recovery query returned no sources; abandoning it");
                    state.abandoned.push(query.to_string());
                    return Ok(());
                }
                self.cache.insert(key, batch.sources.clone());
                state.absorb(batch.sources);
                Ok(())
            }
            Err(e) if e.is_aborted() => Err(e),
            Err(e) => {
                warn!(query, error = %e, "Recovery query failed; abandoning it");
                state.abandoned.push(query.to_string());
                Ok(())
            }
        }
    }

    fn finish(
        &self,
        outcome: RecoveryOutcome,
        state: PassState,
        mut metrics: RecoveryMetrics,
        started: Instant,
    ) -> RecoveryReport {
        metrics.success = outcome.is_success();
        metrics.timed_out = outcome == RecoveryOutcome::TimedOut;
        metrics.exhausted = outcome == RecoveryOutcome::Exhausted;
        metrics.executed_queries = state.executed.len();
        metrics.cache_hits = state.cache_hits;
        metrics.sources_recovered = state.recovered.len();
        metrics.latency_ms = started.elapsed().as_millis() as u64;
        info!(
            outcome = ?outcome,
            executed = metrics.executed_queries,
            recovered = metrics.sources_recovered,
            "Evidence recovery finished"
        );
        RecoveryReport {
            outcome,
            status: state.status,
            sources: state.recovered,
            executed: state.executed,
            abandoned: state.abandoned,
            metrics,
        }
    }
}
