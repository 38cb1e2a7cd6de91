//! Exhaustion metrics and the stop rules built on them.
//!
//! One [`ExhaustionMetrics`] sample is recorded per round against cumulative
//! query, domain and source sets. Samples are recorded strictly in round
//! order by a single owner, so round n's cumulative counters always reflect
//! exactly rounds 1..=n.

use crate::config::RunConfig;
use crate::sources::NormalizedSource;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

const DOMAIN_WEIGHT: f64 = 0.4;
const SOURCE_WEIGHT: f64 = 0.3;
const NOVELTY_WEIGHT: f64 = 0.3;

/// Per-round exhaustion sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExhaustionMetrics {
    pub round: usize,
    pub label: String,
    /// Cumulative issued queries, duplicates included.
    pub total_queries: usize,
    /// Cumulative distinct queries.
    pub unique_queries: usize,
    /// Share of this round's distinct queries never issued before.
    pub query_novelty_ratio: f64,
    pub new_domains: usize,
    pub total_domains: usize,
    pub new_sources: usize,
    pub total_sources: usize,
    pub diminishing_returns_score: f64,
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Diminishing-returns score in [0, 1]; higher means less new information.
///
/// Gains are fractions of the round's own distinct domains/sources that were
/// new. An empty round has gains of 0 and scores toward 1.
pub fn diminishing_returns_score(domain_gain: f64, source_gain: f64, novelty_ratio: f64) -> f64 {
    let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    let gain = DOMAIN_WEIGHT * unit(domain_gain)
        + SOURCE_WEIGHT * unit(source_gain)
        + NOVELTY_WEIGHT * unit(novelty_ratio);
    (1.0 - gain).clamp(0.0, 1.0)
}

/// Case- and whitespace-insensitive identity of a query.
pub fn query_key(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Accumulates cumulative sets and emits one sample per round.
#[derive(Debug, Clone, Default)]
pub struct ExhaustionTracker {
    total_queries: usize,
    queries: HashSet<String>,
    /// Issued outside any measured round (discovery).
    reserved: HashSet<String>,
    domains: HashSet<String>,
    sources: HashSet<String>,
    history: Vec<ExhaustionMetrics>,
}

impl ExhaustionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a round from the queries it issued and the sources it collected.
    pub fn record_round(
        &mut self,
        label: impl Into<String>,
        queries: &[String],
        sources: &[NormalizedSource],
    ) -> ExhaustionMetrics {
        let round_queries: HashSet<String> = queries
            .iter()
            .map(|q| query_key(q))
            .filter(|q| !q.is_empty())
            .collect();
        let novel_queries = round_queries
            .iter()
            .filter(|q| !self.queries.contains(*q))
            .count();

        let round_domains: HashSet<&str> = sources
            .iter()
            .map(|s| s.domain.as_str())
            .filter(|d| !d.is_empty())
            .collect();
        let new_domains = round_domains
            .iter()
            .filter(|d| !self.domains.contains(**d))
            .count();

        let round_sources: HashSet<&str> = sources.iter().map(|s| s.uri.as_str()).collect();
        let new_sources = round_sources
            .iter()
            .filter(|u| !self.sources.contains(**u))
            .count();

        let novelty = ratio(novel_queries, round_queries.len());
        let score = diminishing_returns_score(
            ratio(new_domains, round_domains.len()),
            ratio(new_sources, round_sources.len()),
            novelty,
        );

        self.total_queries += queries.len();
        self.queries.extend(round_queries);
        self.domains
            .extend(round_domains.into_iter().map(str::to_string));
        self.sources
            .extend(round_sources.into_iter().map(str::to_string));

        let metrics = ExhaustionMetrics {
            round: self.history.len() + 1,
            label: label.into(),
            total_queries: self.total_queries,
            unique_queries: self.queries.len(),
            query_novelty_ratio: novelty,
            new_domains,
            total_domains: self.domains.len(),
            new_sources,
            total_sources: self.sources.len(),
            diminishing_returns_score: score,
        };
        self.history.push(metrics.clone());
        metrics
    }

    pub fn history(&self) -> &[ExhaustionMetrics] {
        &self.history
    }

    pub fn last(&self) -> Option<&ExhaustionMetrics> {
        self.history.last()
    }

    pub fn unique_domains(&self) -> usize {
        self.domains.len()
    }

    pub fn unique_sources(&self) -> usize {
        self.sources.len()
    }

    /// Mark queries as issued without recording a sample or touching the
    /// cumulative counters.
    pub fn mark_issued<S: AsRef<str>>(&mut self, queries: &[S]) {
        self.reserved
            .extend(queries.iter().map(|q| query_key(q.as_ref())));
    }

    /// Whether a query (case and whitespace insensitive) was already issued.
    pub fn has_issued(&self, query: &str) -> bool {
        let key = query_key(query);
        self.queries.contains(&key) || self.reserved.contains(&key)
    }

    /// Queries from `candidates` not yet issued, distinct by key, in order.
    pub fn unissued<'a, I>(&self, candidates: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|q| !q.trim().is_empty() && !self.has_issued(q))
            .filter(|q| seen.insert(query_key(q)))
            .cloned()
            .collect()
    }
}

/// Early-stop rule over the latest sample. `force_exhaustion` disables it.
pub fn should_stop_early(metrics: &ExhaustionMetrics, config: &RunConfig) -> bool {
    if config.force_exhaustion || metrics.round < config.min_rounds {
        return false;
    }
    if metrics.diminishing_returns_score < config.early_stop_diminishing_score {
        return false;
    }
    metrics.query_novelty_ratio <= config.early_stop_novelty_ratio
        || (metrics.new_sources <= config.early_stop_new_sources
            && metrics.new_domains <= config.early_stop_new_domains)
}

/// Whether the critique pass may add one gap-fill task.
///
/// The last round's diminishing score already aggregates domain, source and
/// query gains; gap-fill runs while it is still below the stop threshold.
pub fn gap_fill_warranted(last: Option<&ExhaustionMetrics>, config: &RunConfig) -> bool {
    if config.force_exhaustion {
        return true;
    }
    match last {
        Some(metrics) => metrics.diminishing_returns_score < config.early_stop_diminishing_score,
        None => true,
    }
}

static EMPLOYMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(employ\w*|career|worked|works at|position|job title|occupation)\b").unwrap()
});
static TIMELINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(timeline|chronolog\w*|on (jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\w*|(19|20)\d{2})\b").unwrap()
});
static PRIMARY_SOURCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(primary source|official (statement|report|record)|press release|court (record|filing)|transcript|filing)\b").unwrap()
});
static FINANCIALS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(revenue|funding|financial\w*|10-k|earnings|valuation)\b").unwrap()
});
static FOUNDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(founded|founder\w*|headquarter\w*)\b").unwrap());
static DEMOGRAPHICS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(population|census|demographic\w*)\b").unwrap());

fn completeness_groups(vertical_id: &str) -> Vec<(&'static str, &'static Regex)> {
    match vertical_id {
        "individual" => vec![("employment", &*EMPLOYMENT)],
        "event" => vec![("timeline", &*TIMELINE), ("primary sources", &*PRIMARY_SOURCE)],
        "corporation" => vec![("financials", &*FINANCIALS), ("founding", &*FOUNDING)],
        "location" => vec![("demographics", &*DEMOGRAPHICS)],
        _ => Vec::new(),
    }
}

/// Completeness terms still missing from the findings, per selected vertical.
///
/// A non-empty result vetoes an early stop. Entries read `vertical:group`.
pub fn missing_vertical_coverage(selected: &[String], findings_text: &str) -> Vec<String> {
    let mut missing = Vec::new();
    for vertical in selected {
        for (label, pattern) in completeness_groups(vertical) {
            if !pattern.is_match(findings_text) {
                missing.push(format!("{vertical}:{label}"));
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::RawSource;

    fn source(uri: &str) -> NormalizedSource {
        NormalizedSource::from_raw(&RawSource::new(uri, "t"), "mock").unwrap()
    }

    fn queries(items: &[&str]) -> Vec<String> {
        items.iter().map(|q| q.to_string()).collect()
    }

    #[test]
    fn test_first_round_is_all_new() {
        let mut tracker = ExhaustionTracker::new();
        let m = tracker.record_round(
            "round 1",
            &queries(&["a", "b"]),
            &[source("https://a.com/1"), source("https://b.com/1")],
        );
        assert_eq!(m.round, 1);
        assert_eq!(m.new_domains, 2);
        assert_eq!(m.total_sources, 2);
        assert!((m.query_novelty_ratio - 1.0).abs() < 1e-9);
        assert!(m.diminishing_returns_score.abs() < 1e-9);
    }

    #[test]
    fn test_repeat_round_scores_high() {
        let mut tracker = ExhaustionTracker::new();
        let sources = [source("https://a.com/1")];
        tracker.record_round("r1", &queries(&["a"]), &sources);
        let m = tracker.record_round("r2", &queries(&["A "]), &sources);
        assert_eq!(m.new_domains, 0);
        assert_eq!(m.new_sources, 0);
        assert_eq!(m.total_queries, 2);
        assert_eq!(m.unique_queries, 1);
        assert!((m.diminishing_returns_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_round_scores_one() {
        let mut tracker = ExhaustionTracker::new();
        let m = tracker.record_round("empty", &[], &[]);
        assert!((m.diminishing_returns_score - 1.0).abs() < 1e-9);
        assert_eq!(m.query_novelty_ratio, 0.0);
    }

    #[test]
    fn test_cumulative_counters_monotonic() {
        let mut tracker = ExhaustionTracker::new();
        tracker.record_round("r1", &queries(&["a"]), &[source("https://a.com/1")]);
        tracker.record_round("r2", &queries(&["b"]), &[source("https://b.com/2")]);
        let h = tracker.history();
        assert!(h[1].total_domains >= h[0].total_domains);
        assert!(h[1].total_sources >= h[0].total_sources);
        assert_eq!(h[1].round, 2);
        assert!(tracker.has_issued("  B"));
    }

    #[test]
    fn test_marked_queries_are_issued_but_unmeasured() {
        let mut tracker = ExhaustionTracker::new();
        tracker.mark_issued(&["rust overview"]);
        assert!(tracker.has_issued("Rust  Overview"));
        assert!(tracker.history().is_empty());

        tracker.record_round("r1", &queries(&["a"]), &[]);
        let candidates = queries(&["a", "Rust overview", "b", "B ", "", "c"]);
        assert_eq!(tracker.unissued(&candidates), queries(&["b", "c"]));
        assert_eq!(tracker.last().unwrap().unique_queries, 1);
    }

    #[test]
    fn test_score_clamps_bad_input() {
        assert!((diminishing_returns_score(f64::NAN, 5.0, -1.0) - 0.7).abs() < 1e-9);
    }

    fn sample(round: usize, score: f64, novelty: f64, new_sources: usize, new_domains: usize) -> ExhaustionMetrics {
        ExhaustionMetrics {
            round,
            label: String::new(),
            total_queries: 0,
            unique_queries: 0,
            query_novelty_ratio: novelty,
            new_domains,
            total_domains: 0,
            new_sources,
            total_sources: 0,
            diminishing_returns_score: score,
        }
    }

    #[test]
    fn test_should_stop_early() {
        let config = RunConfig::default();
        assert!(should_stop_early(&sample(1, 0.8, 0.1, 10, 10), &config));
        assert!(should_stop_early(&sample(1, 0.8, 0.9, 2, 1), &config));
        assert!(!should_stop_early(&sample(1, 0.8, 0.9, 4, 1), &config));
        assert!(!should_stop_early(&sample(1, 0.5, 0.0, 0, 0), &config));

        let strict = RunConfig {
            min_rounds: 2,
            ..RunConfig::default()
        };
        assert!(!should_stop_early(&sample(1, 1.0, 0.0, 0, 0), &strict));

        let forced = RunConfig {
            force_exhaustion: true,
            ..RunConfig::default()
        };
        assert!(!should_stop_early(&sample(1, 1.0, 0.0, 0, 0), &forced));
    }

    #[test]
    fn test_gap_fill_warranted() {
        let config = RunConfig::default();
        assert!(gap_fill_warranted(Some(&sample(1, 0.3, 0.0, 0, 0)), &config));
        assert!(!gap_fill_warranted(Some(&sample(1, 0.9, 0.0, 0, 0)), &config));
        assert!(gap_fill_warranted(None, &config));
        let forced = RunConfig {
            force_exhaustion: true,
            ..RunConfig::default()
        };
        assert!(gap_fill_warranted(Some(&sample(1, 0.9, 0.0, 0, 0)), &forced));
    }

    #[test]
    fn test_missing_vertical_coverage() {
        let selected = vec!["individual".to_string(), "event".to_string()];
        let missing = missing_vertical_coverage(&selected, "She worked at Acme.");
        assert_eq!(missing, vec!["event:timeline", "event:primary sources"]);

        let covered = missing_vertical_coverage(
            &selected,
            "Career at Acme. Timeline: founded in 2001; press release archived.",
        );
        assert!(covered.is_empty());
        assert!(missing_vertical_coverage(&["product".to_string()], "").is_empty());
    }
}
