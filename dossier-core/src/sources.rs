//! Source normalization and de-duplication.
//!
//! Raw sources returned by the oracle are untrusted. They are reduced to a
//! canonical URI (http/https only, no fragment, no tracking parameters, no
//! default port) and de-duplicated by that URI, first occurrence wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

const MAX_URL_LENGTH: usize = 2048;

const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "yclid", "mc_cid", "mc_eid", "ref", "ref_src", "igshid", "spm", "mkt_tok",
];

/// How a source reached the oracle's answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Web,
    Citation,
    #[default]
    Unknown,
}

/// A source as reported by the oracle, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSource {
    #[serde(alias = "url")]
    pub uri: String,
    pub title: Option<String>,
    pub kind: Option<SourceKind>,
    #[serde(alias = "publishedAt")]
    pub published_at: Option<DateTime<Utc>>,
}

impl RawSource {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// A canonical, de-duplicatable source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSource {
    pub uri: String,
    pub title: String,
    pub domain: String,
    pub provider: String,
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl NormalizedSource {
    /// Normalize a single raw source, or `None` if its URI is unusable.
    pub fn from_raw(raw: &RawSource, provider: &str) -> Option<Self> {
        let uri = normalize_uri(&raw.uri).ok()?;
        let domain = domain_of(&uri);
        let title = raw
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if domain.is_empty() {
                    uri.clone()
                } else {
                    domain.clone()
                }
            });
        Some(Self {
            uri,
            title,
            domain,
            provider: provider.to_string(),
            kind: raw.kind.unwrap_or_default(),
            published_at: raw.published_at,
        })
    }
}

/// Outcome of normalizing a batch of raw sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub sources: Vec<NormalizedSource>,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

/// Normalize and de-duplicate a batch; invalid entries land in `errors`.
pub fn normalize_sources(raw: &[RawSource], provider: &str) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let mut seen = HashSet::new();
    for candidate in raw {
        if candidate.uri.trim().is_empty() {
            batch.errors.push("Missing URI on source candidate.".into());
            continue;
        }
        let uri = match normalize_uri(&candidate.uri) {
            Ok(uri) => uri,
            Err(err) => {
                batch.errors.push(err);
                continue;
            }
        };
        if !seen.insert(uri) {
            batch.duplicates += 1;
            continue;
        }
        if let Some(source) = NormalizedSource::from_raw(candidate, provider) {
            batch.sources.push(source);
        }
    }
    batch
}

/// De-duplicate already normalized sources by URI, first wins.
pub fn dedupe_sources<'a, I>(sources: I) -> Vec<NormalizedSource>
where
    I: IntoIterator<Item = &'a NormalizedSource>,
{
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.uri.clone()))
        .cloned()
        .collect()
}

/// Canonicalize a URI string.
pub fn normalize_uri(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("Empty URL".into());
    }
    if trimmed.len() > MAX_URL_LENGTH {
        let prefix: String = trimmed.chars().take(120).collect();
        return Err(format!("URL too long: {prefix}..."));
    }

    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{trimmed}"))
            .map_err(|_| format!("Invalid URL: {trimmed}"))?,
        Err(_) => return Err(format!("Invalid URL: {trimmed}")),
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("Unsupported protocol: {}:", url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(format!("Invalid URL: {trimmed}"));
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            let lower = key.to_lowercase();
            !lower.starts_with("utm_") && !TRACKING_PARAMS.contains(&lower.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut out = url.to_string();
    if url.path() == "/" && url.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    Ok(out)
}

/// Host without a leading `www.`, lower-cased; empty when unparsable.
pub fn domain_of(uri: &str) -> String {
    Url::parse(uri)
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
        .map(|host| host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_tracking_and_fragment() {
        let uri =
            normalize_uri("https://WWW.Example.com/page?utm_source=x&id=7&fbclid=abc#section")
                .unwrap();
        assert_eq!(uri, "https://www.example.com/page?id=7");
    }

    #[test]
    fn test_normalize_strips_default_port_and_root_slash() {
        assert_eq!(
            normalize_uri("https://example.gov:443/").unwrap(),
            "https://example.gov"
        );
        assert_eq!(
            normalize_uri("http://example.gov:80/records").unwrap(),
            "http://example.gov/records"
        );
        assert_eq!(
            normalize_uri("http://example.gov:8080/records").unwrap(),
            "http://example.gov:8080/records"
        );
    }

    #[test]
    fn test_normalize_bare_host_gets_https() {
        assert_eq!(
            normalize_uri("dallascad.org/Search").unwrap(),
            "https://dallascad.org/Search"
        );
    }

    #[test]
    fn test_normalize_rejects_other_schemes_and_long_urls() {
        assert!(normalize_uri("ftp://example.com/file").is_err());
        assert!(normalize_uri("javascript:alert(1)").is_err());
        let long = format!("https://example.com/{}", "a".repeat(2100));
        assert!(normalize_uri(&long).unwrap_err().starts_with("URL too long"));
    }

    #[test]
    fn test_domain_of_strips_www() {
        assert_eq!(domain_of("https://www.Zillow.com/homedetails/1"), "zillow.com");
        assert_eq!(domain_of("not a url"), "");
    }

    #[test]
    fn test_normalize_sources_dedupes_first_wins() {
        let raw = vec![
            RawSource::new("https://example.gov/a?utm_medium=x", "First"),
            RawSource::new("https://example.gov/a", "Second"),
            RawSource::new("", "Empty"),
            RawSource::new("mailto:someone@example.com", "Mail"),
        ];
        let batch = normalize_sources(&raw, "mock");
        assert_eq!(batch.sources.len(), 1);
        assert_eq!(batch.sources[0].title, "First");
        assert_eq!(batch.sources[0].domain, "example.gov");
        assert_eq!(batch.sources[0].provider, "mock");
        assert_eq!(batch.duplicates, 1);
        assert_eq!(batch.errors.len(), 2);
    }

    #[test]
    fn test_title_falls_back_to_domain() {
        let raw = RawSource {
            uri: "https://www.dcad.org/property".into(),
            title: Some("   ".into()),
            ..RawSource::default()
        };
        let source = NormalizedSource::from_raw(&raw, "mock").unwrap();
        assert_eq!(source.title, "dcad.org");
        assert_eq!(source.kind, SourceKind::Unknown);
    }

    #[test]
    fn test_raw_source_accepts_url_alias() {
        let raw: RawSource =
            serde_json::from_str(r#"{"url": "https://example.org", "title": "Example"}"#).unwrap();
        assert_eq!(raw.uri, "https://example.org");
    }
}
