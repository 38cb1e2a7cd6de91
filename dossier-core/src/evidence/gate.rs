//! Source authority scoring and the address evidence gate.

use crate::sources::NormalizedSource;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

pub const MIN_EVIDENCE_TOTAL_SOURCES: usize = 3;
pub const MIN_EVIDENCE_AUTHORITATIVE_SOURCES: usize = 1;
pub const MIN_EVIDENCE_AUTHORITY_SCORE: u32 = 75;
/// Score at which a source counts as authoritative for the gate.
pub const AUTHORITATIVE_SCORE: u32 = 60;

pub const AGGREGATOR_DOMAINS: &[&str] = &[
    "zillow.com",
    "redfin.com",
    "realtor.com",
    "trulia.com",
    "loopnet.com",
    "propertyshark.com",
    "homes.com",
    "apartments.com",
];

pub const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "reddit.com",
    "instagram.com",
    "tiktok.com",
    "linkedin.com",
];

static PRIMARY_RECORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)assessor|appraiser|appraisal|cad|property|parcel|tax|treasurer|recorder|clerk|register|gis|zoning|planning|permit|code\s*enforcement|deed").unwrap()
});
static OPEN_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)opendata|open-data|data\.|socrata|arcgis|esri|gis|catalog|dataset|hub").unwrap()
});
static AGGREGATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)zillow|redfin|realtor|trulia|loopnet|propertyshark|homes\.com|apartments\.com|corelogic|realtytrac|attom").unwrap()
});
static SOCIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)facebook|twitter|\bx\.com|reddit|instagram|tiktok|linkedin|nextdoor").unwrap()
});
static GOVERNMENT_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\.gov$|\.gov\.|\.mil$|\.mil\.)").unwrap());
static RECORD_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)parcel|account|permit|record|case|roll").unwrap());

/// Authority class of a cited source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceAuthority {
    Authoritative,
    QuasiOfficial,
    Aggregator,
    Social,
    Unknown,
}

impl SourceAuthority {
    pub fn base_score(self) -> u32 {
        match self {
            SourceAuthority::Authoritative => 90,
            SourceAuthority::QuasiOfficial => 70,
            SourceAuthority::Aggregator => 50,
            SourceAuthority::Social => 20,
            SourceAuthority::Unknown => 35,
        }
    }
}

impl fmt::Display for SourceAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceAuthority::Authoritative => "authoritative",
            SourceAuthority::QuasiOfficial => "quasi_official",
            SourceAuthority::Aggregator => "aggregator",
            SourceAuthority::Social => "social",
            SourceAuthority::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

fn haystack(source: &NormalizedSource) -> String {
    format!("{} {} {}", source.domain, source.title, source.uri).to_lowercase()
}

fn is_government_domain(domain: &str) -> bool {
    GOVERNMENT_DOMAIN.is_match(domain)
}

/// Classify a source from its domain, title and URI.
///
/// Social and aggregator checks win over everything else; a government
/// domain is authoritative only with property-record keywords.
pub fn classify_source(source: &NormalizedSource) -> SourceAuthority {
    let domain = source.domain.to_lowercase();
    let text = haystack(source);

    if SOCIAL_DOMAINS.contains(&domain.as_str()) || SOCIAL.is_match(&text) {
        return SourceAuthority::Social;
    }
    if AGGREGATOR_DOMAINS.contains(&domain.as_str()) || AGGREGATOR.is_match(&text) {
        return SourceAuthority::Aggregator;
    }
    let government = is_government_domain(&domain);
    if government && PRIMARY_RECORD.is_match(&text) {
        return SourceAuthority::Authoritative;
    }
    if government || OPEN_DATA.is_match(&text) {
        return SourceAuthority::QuasiOfficial;
    }
    SourceAuthority::Unknown
}

/// Authority score in `0..=100`.
pub fn score_authority(source: &NormalizedSource) -> u32 {
    let domain = source.domain.to_lowercase();
    let text = haystack(source);
    let class = classify_source(source);
    let mut score = class.base_score() as i64;

    if is_government_domain(&domain) || domain.ends_with(".us") {
        score += 5;
    }
    if PRIMARY_RECORD.is_match(&text) {
        score += 5;
    }
    if RECORD_URI.is_match(&source.uri) {
        score += 5;
    }
    match class {
        SourceAuthority::Aggregator => score -= 10,
        SourceAuthority::Social => score -= 15,
        _ => {}
    }
    let title = source.title.trim();
    if title.is_empty() || title == source.domain {
        score -= 5;
    }
    score.clamp(0, 100) as u32
}

/// Evidence gate result over a set of sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceStatus {
    pub total_sources: usize,
    pub authoritative_sources: usize,
    pub max_authority_score: u32,
    pub meets_total: bool,
    pub meets_authoritative: bool,
    pub meets_authority_score: bool,
    pub meets_all: bool,
}

impl EvidenceStatus {
    /// The authority thresholds hold, regardless of the total count.
    pub fn meets_authority(&self) -> bool {
        self.meets_authoritative && self.meets_authority_score
    }

    /// Machine-readable reasons for each unmet threshold.
    pub fn reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if !self.meets_total {
            reasons.push(format!(
                "total_sources_below_min ({}/{MIN_EVIDENCE_TOTAL_SOURCES})",
                self.total_sources
            ));
        }
        if !self.meets_authoritative {
            reasons.push(format!(
                "authoritative_sources_below_min ({}/{MIN_EVIDENCE_AUTHORITATIVE_SOURCES})",
                self.authoritative_sources
            ));
        }
        if !self.meets_authority_score {
            reasons.push(format!(
                "authority_score_below_min ({}/{MIN_EVIDENCE_AUTHORITY_SCORE})",
                self.max_authority_score
            ));
        }
        reasons
    }
}

/// Evaluate the gate over sources, de-duplicated by URI.
pub fn evaluate_evidence<'a, I>(sources: I) -> EvidenceStatus
where
    I: IntoIterator<Item = &'a NormalizedSource>,
{
    let mut seen = HashSet::new();
    let mut status = EvidenceStatus::default();
    for source in sources {
        if !seen.insert(source.uri.as_str()) {
            continue;
        }
        status.total_sources += 1;
        let score = score_authority(source);
        if score >= AUTHORITATIVE_SCORE {
            status.authoritative_sources += 1;
        }
        status.max_authority_score = status.max_authority_score.max(score);
    }
    status.meets_total = status.total_sources >= MIN_EVIDENCE_TOTAL_SOURCES;
    status.meets_authoritative = status.authoritative_sources >= MIN_EVIDENCE_AUTHORITATIVE_SOURCES;
    status.meets_authority_score = status.max_authority_score >= MIN_EVIDENCE_AUTHORITY_SCORE;
    status.meets_all = status.meets_total && status.meets_authoritative && status.meets_authority_score;
    status
}
