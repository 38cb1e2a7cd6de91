//! Scriptable in-process oracle for tests and offline replays.

use super::{ReportDraft, ResearchOracle, SearchReply};
use crate::error::OracleError;
use crate::research::session::Finding;
use crate::sources::NormalizedSource;
use crate::taxonomy::TaxonomySummary;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Oracle operations, used to queue replies and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OracleOp {
    Search,
    Classify,
    ProposeSectors,
    ExtractMethods,
    Critique,
    ProposeTaxonomyGrowth,
    Synthesize,
    Validate,
}

type SearchFn = dyn Fn(&str) -> Result<SearchReply, OracleError> + Send + Sync;

#[derive(Default)]
struct MockState {
    queued: HashMap<OracleOp, VecDeque<Result<String, OracleError>>>,
    defaults: HashMap<OracleOp, Result<String, OracleError>>,
    calls: HashMap<OracleOp, usize>,
    queries: Vec<String>,
}

/// A mock research oracle.
///
/// Structured operations pop queued replies first, then fall back to a
/// per-operation default (`{}` unless overridden). Searches go through a
/// closure, which by default returns an empty reply.
pub struct MockOracle {
    name: String,
    search_fn: Arc<SearchFn>,
    delay: Option<Duration>,
    state: Mutex<MockState>,
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            search_fn: Arc::new(|_| Ok(SearchReply::default())),
            delay: None,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Answer searches with a closure over the query text.
    pub fn with_search<F>(mut self, search: F) -> Self
    where
        F: Fn(&str) -> Result<SearchReply, OracleError> + Send + Sync + 'static,
    {
        self.search_fn = Arc::new(search);
        self
    }

    /// Sleep before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reply used for an operation once its queue is empty.
    pub fn with_default(self, op: OracleOp, reply: impl Into<String>) -> Self {
        self.lock().defaults.insert(op, Ok(reply.into()));
        self
    }

    pub fn with_default_error(self, op: OracleOp, error: OracleError) -> Self {
        self.lock().defaults.insert(op, Err(error));
        self
    }

    /// Queue a reply for the next call of an operation.
    pub fn queue(&self, op: OracleOp, reply: impl Into<String>) {
        self.lock()
            .queued
            .entry(op)
            .or_default()
            .push_back(Ok(reply.into()));
    }

    pub fn queue_error(&self, op: OracleOp, error: OracleError) {
        self.lock().queued.entry(op).or_default().push_back(Err(error));
    }

    pub fn call_count(&self, op: OracleOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every search query issued, in call order.
    pub fn search_queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    async fn structured(&self, op: OracleOp) -> Result<String, OracleError> {
        let reply = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            match state.queued.get_mut(&op).and_then(VecDeque::pop_front) {
                Some(reply) => reply,
                None => state
                    .defaults
                    .get(&op)
                    .cloned()
                    .unwrap_or_else(|| Ok("{}".to_string())),
            }
        };
        self.pause().await;
        reply
    }
}

#[async_trait]
impl ResearchOracle for MockOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, _context: &str) -> Result<SearchReply, OracleError> {
        {
            let mut state = self.lock();
            *state.calls.entry(OracleOp::Search).or_default() += 1;
            state.queries.push(query.to_string());
        }
        self.pause().await;
        (self.search_fn)(query)
    }

    async fn classify(
        &self,
        _topic: &str,
        _taxonomy: &[TaxonomySummary],
        _hints: &[String],
        _context: &str,
    ) -> Result<String, OracleError> {
        self.structured(OracleOp::Classify).await
    }

    async fn propose_sectors(&self, _topic: &str) -> Result<String, OracleError> {
        self.structured(OracleOp::ProposeSectors).await
    }

    async fn extract_methods(
        &self,
        _topic: &str,
        _discovery_text: &str,
    ) -> Result<String, OracleError> {
        self.structured(OracleOp::ExtractMethods).await
    }

    async fn critique(&self, _topic: &str, _findings_text: &str) -> Result<String, OracleError> {
        self.structured(OracleOp::Critique).await
    }

    async fn propose_taxonomy_growth(
        &self,
        _topic: &str,
        _findings_text: &str,
        _taxonomy: &[TaxonomySummary],
        _hints: &[String],
    ) -> Result<String, OracleError> {
        self.structured(OracleOp::ProposeTaxonomyGrowth).await
    }

    async fn synthesize(
        &self,
        _topic: &str,
        _findings: &[Finding],
        _allowed_sources: &[NormalizedSource],
    ) -> Result<String, OracleError> {
        self.structured(OracleOp::Synthesize).await
    }

    async fn validate(
        &self,
        _topic: &str,
        _report: &ReportDraft,
        _allowed_sources: &[NormalizedSource],
    ) -> Result<String, OracleError> {
        self.structured(OracleOp::Validate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::RawSource;

    #[tokio::test]
    async fn test_queue_then_default() {
        let oracle = MockOracle::new().with_default(OracleOp::Critique, r#"{"gapAnalysis":"none"}"#);
        oracle.queue(OracleOp::Critique, "first");

        assert_eq!(oracle.critique("t", "").await.unwrap(), "first");
        assert_eq!(
            oracle.critique("t", "").await.unwrap(),
            r#"{"gapAnalysis":"none"}"#
        );
        assert_eq!(oracle.propose_sectors("t").await.unwrap(), "{}");
        assert_eq!(oracle.call_count(OracleOp::Critique), 2);
    }

    #[tokio::test]
    async fn test_search_closure_and_log() {
        let oracle = MockOracle::new().with_search(|query| {
            Ok(SearchReply::new(
                format!("about {query}"),
                vec![RawSource::new("https://example.org", "Example")],
            ))
        });
        let reply = oracle.search("rust", "").await.unwrap();
        assert_eq!(reply.text, "about rust");
        assert_eq!(oracle.search_queries(), vec!["rust".to_string()]);
    }

    #[tokio::test]
    async fn test_queued_error() {
        let oracle = MockOracle::new();
        oracle.queue_error(
            OracleOp::Classify,
            OracleError::AuthFailed {
                provider: "mock".into(),
            },
        );
        let err = oracle.classify("t", &[], &[], "").await.unwrap_err();
        assert!(err.is_fatal());
    }
}
