//! Replay scripts: canned oracle replies and provider fixtures loaded from JSON.
//!
//! A script drives an offline run. Search replies are matched by query
//! (case and whitespace insensitive); structured replies are queued per
//! operation and fall back to a per-operation default.
//!
//! ```json
//! {
//!   "searches": { "rust overview": { "text": "...", "sources": [{ "uri": "https://..." }] } },
//!   "defaultSearch": { "text": "...", "sources": [] },
//!   "replies": { "classify": [{ "verticals": [{ "id": "technical_concept", "weight": 1 }] }] },
//!   "defaults": { "validate": { "isValid": true } },
//!   "providers": { "records": [{ "parcelId": "12-34", "source": "record-system" }] }
//! }
//! ```

use dossier_core::oracle::{MockOracle, OracleOp, SearchReply};
use dossier_core::parcel::FixtureProviders;
use dossier_core::research::metrics::query_key;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplayScript {
    /// Provider name reported by the replay oracle.
    pub name: Option<String>,
    pub searches: BTreeMap<String, SearchReply>,
    pub default_search: Option<SearchReply>,
    /// Queued replies per operation, consumed in order.
    pub replies: BTreeMap<String, Vec<Value>>,
    pub defaults: BTreeMap<String, Value>,
    pub providers: Option<FixtureProviders>,
}

/// Map a script key such as `proposeSectors` or `propose_sectors` to an op.
pub fn parse_op(name: &str) -> Option<OracleOp> {
    let key: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .collect::<String>()
        .to_lowercase();
    let op = match key.as_str() {
        "classify" => OracleOp::Classify,
        "proposesectors" | "sectors" => OracleOp::ProposeSectors,
        "extractmethods" | "methods" => OracleOp::ExtractMethods,
        "critique" => OracleOp::Critique,
        "proposetaxonomygrowth" | "taxonomygrowth" => OracleOp::ProposeTaxonomyGrowth,
        "synthesize" => OracleOp::Synthesize,
        "validate" => OracleOp::Validate,
        _ => return None,
    };
    Some(op)
}

/// Structured replies are raw model text; strings pass through as-is and any
/// other JSON value is re-serialized.
fn reply_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl ReplayScript {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read script {}: {}", path.display(), e))?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> anyhow::Result<Self> {
        serde_json::from_str(data).map_err(|e| anyhow::anyhow!("Invalid replay script: {}", e))
    }

    /// Build the replay oracle. Unknown operation names are an error so a
    /// typo in a script never silently falls back to `{}`.
    pub fn oracle(&self) -> anyhow::Result<MockOracle> {
        let searches: HashMap<String, SearchReply> = self
            .searches
            .iter()
            .map(|(query, reply)| (query_key(query), reply.clone()))
            .collect();
        let fallback = self.default_search.clone().unwrap_or_default();

        let mut oracle = MockOracle::new().with_search(move |query| {
            Ok(searches
                .get(&query_key(query))
                .cloned()
                .unwrap_or_else(|| fallback.clone()))
        });
        if let Some(name) = &self.name {
            oracle = oracle.with_name(name.clone());
        }

        for (name, value) in &self.defaults {
            let op = parse_op(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown oracle operation in defaults: '{}'", name))?;
            oracle = oracle.with_default(op, reply_text(value));
        }
        for (name, values) in &self.replies {
            let op = parse_op(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown oracle operation in replies: '{}'", name))?;
            for value in values {
                oracle.queue(op, reply_text(value));
            }
        }
        Ok(oracle)
    }

    pub fn fixture_providers(&self) -> Option<FixtureProviders> {
        self.providers.clone()
    }
}
