//! Research oracle seam.
//!
//! The oracle is the external language-model service that performs web
//! search, classification, critique, synthesis and validation. The core only
//! depends on the [`ResearchOracle`] trait; structured replies come back as
//! raw text and go through [`parse`] so malformed output never escapes as an
//! error.

pub mod mock;
pub mod parse;

use crate::error::{Abortable, OracleError};
use crate::research::session::Finding;
use crate::sources::{NormalizedSource, RawSource};
use crate::taxonomy::TaxonomySummary;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio_util::sync::CancellationToken;

pub use mock::{MockOracle, OracleOp};
pub use parse::{Parsed, parse_structured};

/// Reply to a web search call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchReply {
    pub text: String,
    pub sources: Vec<RawSource>,
}

impl SearchReply {
    pub fn new(text: impl Into<String>, sources: Vec<RawSource>) -> Self {
        Self {
            text: text.into(),
            sources,
        }
    }
}

/// Trait for the external research oracle.
///
/// Every structured call returns the model's raw text; callers parse it with
/// [`parse_structured`] and fall back to an empty default when unparsable.
#[async_trait]
pub trait ResearchOracle: Send + Sync {
    /// Provider name, recorded on normalized sources and cache keys.
    fn name(&self) -> &str;

    async fn search(&self, query: &str, context: &str) -> Result<SearchReply, OracleError>;

    /// Classify a topic into taxonomy verticals. `context` carries text
    /// gathered by a discovery pass when reclassifying, and is empty otherwise.
    async fn classify(
        &self,
        topic: &str,
        taxonomy: &[TaxonomySummary],
        hints: &[String],
        context: &str,
    ) -> Result<String, OracleError>;

    async fn propose_sectors(&self, topic: &str) -> Result<String, OracleError>;

    async fn extract_methods(&self, topic: &str, discovery_text: &str)
    -> Result<String, OracleError>;

    async fn critique(&self, topic: &str, findings_text: &str) -> Result<String, OracleError>;

    async fn propose_taxonomy_growth(
        &self,
        topic: &str,
        findings_text: &str,
        taxonomy: &[TaxonomySummary],
        hints: &[String],
    ) -> Result<String, OracleError>;

    async fn synthesize(
        &self,
        topic: &str,
        findings: &[Finding],
        allowed_sources: &[NormalizedSource],
    ) -> Result<String, OracleError>;

    async fn validate(
        &self,
        topic: &str,
        report: &ReportDraft,
        allowed_sources: &[NormalizedSource],
    ) -> Result<String, OracleError>;
}

/// Race an oracle or provider future against the run's cancellation token.
///
/// A cancelled token wins and yields the error's aborted variant.
pub async fn guarded<T, E, F>(token: &CancellationToken, call: F) -> Result<T, E>
where
    E: Abortable,
    F: Future<Output = Result<T, E>>,
{
    if token.is_cancelled() {
        return Err(E::aborted());
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(E::aborted()),
        result = call => result,
    }
}

// --- Structured replies ---

/// One vertical and its weight in a classification reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerticalWeight {
    #[serde(alias = "verticalId")]
    pub id: String,
    #[serde(default)]
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationReply {
    pub verticals: Vec<VerticalWeight>,
    pub confidence: Option<f64>,
    #[serde(alias = "isUncertain")]
    pub is_uncertain: bool,
    pub rationale: Option<String>,
}

/// A research sector proposed by the oracle. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorProposal {
    pub name: Option<String>,
    pub focus: Option<String>,
    #[serde(alias = "initialQuery", alias = "query")]
    pub initial_query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorReply {
    pub sectors: Vec<SectorProposal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodProposal {
    #[serde(alias = "label")]
    pub name: Option<String>,
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodReply {
    pub methods: Vec<MethodProposal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMethod {
    #[serde(default, alias = "label")]
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CritiqueReply {
    #[serde(alias = "gapAnalysis")]
    pub gap_analysis: String,
    #[serde(alias = "newMethod")]
    pub new_method: Option<NewMethod>,
}

/// A section of a synthesized report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ReportSection {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Report provenance block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportProvenance {
    #[serde(alias = "totalSources")]
    pub total_sources: usize,
    #[serde(alias = "methodAudit")]
    pub method_audit: String,
}

/// A report draft as produced by synthesis, then post-processed by the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportDraft {
    pub title: String,
    pub summary: String,
    pub sections: Vec<ReportSection>,
    pub provenance: ReportProvenance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationReply {
    #[serde(alias = "isValid")]
    pub is_valid: bool,
    pub issues: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guarded_passes_result_through() {
        let token = CancellationToken::new();
        let result = guarded(&token, async { Ok::<_, OracleError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_guarded_aborts_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let result = guarded(&token, async { Ok::<_, OracleError>(7) }).await;
        assert_eq!(result, Err(OracleError::Aborted));
    }

    #[tokio::test]
    async fn test_guarded_aborts_pending_call() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let result = guarded(&token, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, OracleError>(1)
        })
        .await;
        assert!(result.unwrap_err().is_aborted());
    }

    #[test]
    fn test_classification_reply_accepts_camel_case() {
        let reply: ClassificationReply = serde_json::from_str(
            r#"{"verticals":[{"verticalId":"individual","weight":0.7}],"confidence":0.8,"isUncertain":true}"#,
        )
        .unwrap();
        assert_eq!(reply.verticals[0].id, "individual");
        assert!(reply.is_uncertain);
    }

    #[test]
    fn test_critique_reply_defaults() {
        let reply: CritiqueReply = serde_json::from_str(r#"{"gapAnalysis":"thin"}"#).unwrap();
        assert_eq!(reply.gap_analysis, "thin");
        assert!(reply.new_method.is_none());
    }
}
