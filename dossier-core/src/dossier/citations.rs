//! Citation registry, section definitions and per-claim confidence.

use crate::evidence::gate::{SourceAuthority, classify_source, score_authority};
use crate::gaps::{DataGap, GapStatus};
use crate::sources::NormalizedSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Maximum age in days before a record type's recency reaches zero.
pub const RECORD_TYPE_MAX_AGE_DAYS: &[(&str, f64)] = &[
    ("assessor_parcel", 730.0),
    ("tax_appraisal", 730.0),
    ("tax_collector", 540.0),
    ("deed_recorder", 36500.0),
    ("zoning_gis", 1095.0),
    ("permits", 1825.0),
    ("code_enforcement", 1095.0),
    ("hazards_environmental", 1825.0),
    ("neighborhood_context", 3650.0),
];
pub const DEFAULT_MAX_AGE_DAYS: f64 = 1825.0;

const AUTHORITY_WEIGHT: f64 = 0.5;
const RECENCY_WEIGHT: f64 = 0.25;
const CORROBORATION_WEIGHT: f64 = 0.15;
const CONSISTENCY_WEIGHT: f64 = 0.10;

pub fn max_age_days(record_type: Option<&str>) -> f64 {
    record_type
        .and_then(|rt| {
            RECORD_TYPE_MAX_AGE_DAYS
                .iter()
                .find(|(name, _)| *name == rt)
                .map(|(_, days)| *days)
        })
        .unwrap_or(DEFAULT_MAX_AGE_DAYS)
}

/// A property dossier section: label, title aliases, field path, record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionDef {
    pub label: &'static str,
    pub aliases: &'static [&'static str],
    pub field_path: &'static str,
    pub record_type: Option<&'static str>,
}

pub const SECTION_DEFS: &[SectionDef] = &[
    SectionDef {
        label: "Parcel & Legal",
        aliases: &["parcel", "parcel and legal", "parcel legal"],
        field_path: "/parcel",
        record_type: Some("assessor_parcel"),
    },
    SectionDef {
        label: "Ownership/Transfers",
        aliases: &["ownership", "ownership and transfers", "ownership transfers"],
        field_path: "/ownership",
        record_type: Some("deed_recorder"),
    },
    SectionDef {
        label: "Tax & Appraisal",
        aliases: &["tax", "tax and appraisal", "tax appraisal"],
        field_path: "/taxAppraisal",
        record_type: Some("tax_appraisal"),
    },
    SectionDef {
        label: "Zoning/Land Use",
        aliases: &["zoning", "zoning and land use", "land use", "zoning land use"],
        field_path: "/zoningLandUse",
        record_type: Some("zoning_gis"),
    },
    SectionDef {
        label: "Permits & Code",
        aliases: &["permits", "permits and code", "code", "permits code"],
        field_path: "/permitsAndCode",
        record_type: Some("permits"),
    },
    SectionDef {
        label: "Hazards/Environmental",
        aliases: &["hazards", "hazards and environmental", "environmental", "hazards environmental"],
        field_path: "/hazardsEnvironmental",
        record_type: Some("hazards_environmental"),
    },
    SectionDef {
        label: "Neighborhood Context",
        aliases: &["neighborhood", "neighborhood context"],
        field_path: "/neighborhoodContext",
        record_type: Some("neighborhood_context"),
    },
    SectionDef {
        label: "Data Gaps & Next Steps",
        aliases: &["data gaps", "next steps", "data gaps and next steps"],
        field_path: "/dataGaps",
        record_type: None,
    },
];

fn normalize_label(value: &str) -> String {
    value
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Match a section title against the dossier section definitions.
pub fn find_section_def(title: &str) -> Option<&'static SectionDef> {
    let normalized = normalize_label(title);
    if normalized.is_empty() {
        return None;
    }
    SECTION_DEFS.iter().find(|def| {
        normalized.contains(&normalize_label(def.label))
            || def
                .aliases
                .iter()
                .any(|alias| normalized.contains(&normalize_label(alias)))
    })
}

/// A registered citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationSource {
    /// `src-N`, in report source order.
    pub id: String,
    pub url: String,
    pub title: String,
    pub publisher: String,
    pub authority: SourceAuthority,
    pub authority_score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Citation registry over a report's sources.
#[derive(Debug, Clone, Default)]
pub struct CitationRegistry {
    sources: Vec<CitationSource>,
    by_url: HashMap<String, usize>,
}

impl CitationRegistry {
    pub fn build(sources: &[NormalizedSource]) -> Self {
        let mut registry = Self::default();
        for source in sources {
            if registry.by_url.contains_key(&source.uri) {
                continue;
            }
            let index = registry.sources.len();
            registry.sources.push(CitationSource {
                id: format!("src-{}", index + 1),
                url: source.uri.clone(),
                title: source.title.clone(),
                publisher: source.domain.clone(),
                authority: classify_source(source),
                authority_score: score_authority(source),
                published_at: source.published_at,
            });
            registry.by_url.insert(source.uri.clone(), index);
        }
        registry
    }

    pub fn sources(&self) -> &[CitationSource] {
        &self.sources
    }

    pub fn by_url(&self, url: &str) -> Option<&CitationSource> {
        self.by_url.get(url).map(|&i| &self.sources[i])
    }

    /// Registered citations for a list of URLs, unknown URLs skipped.
    pub fn resolve<'a>(&'a self, urls: &[String]) -> Vec<&'a CitationSource> {
        let mut seen = HashSet::new();
        urls.iter()
            .filter_map(|url| self.by_url(url))
            .filter(|c| seen.insert(c.id.clone()))
            .collect()
    }

    pub fn into_sources(self) -> Vec<CitationSource> {
        self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// The four weighted components and the resulting score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub authority: f64,
    pub recency: f64,
    pub corroboration: f64,
    pub consistency: f64,
    pub score: f64,
}

/// Freshest source against the record type's maximum age; 0.5 with no ages.
pub fn recency_component(
    sources: &[&CitationSource],
    record_type: Option<&str>,
    now: DateTime<Utc>,
) -> f64 {
    let freshest = sources
        .iter()
        .filter_map(|s| s.published_at)
        .map(|at| (now - at).num_seconds().max(0) as f64 / 86_400.0)
        .fold(None, |min: Option<f64>, age| Some(min.map_or(age, |m| m.min(age))));
    match freshest {
        None => 0.5,
        Some(age) => (1.0 - age / max_age_days(record_type)).clamp(0.0, 1.0),
    }
}

/// Independent publishers: one or none 0.35, two 0.7, three or more 1.0.
pub fn corroboration_component(sources: &[&CitationSource]) -> f64 {
    let publishers: HashSet<&str> = sources
        .iter()
        .map(|s| if s.publisher.is_empty() { s.url.as_str() } else { s.publisher.as_str() })
        .collect();
    match publishers.len() {
        0 | 1 => 0.35,
        2 => 0.7,
        _ => 1.0,
    }
}

/// 0 with an overlapping conflict gap, 0.5 with an ambiguous one, else 1.
pub fn consistency_component(
    gaps: &[DataGap],
    field_path: Option<&str>,
    record_type: Option<&str>,
) -> f64 {
    let relevant: Vec<&DataGap> = gaps
        .iter()
        .filter(|gap| {
            field_path.is_some_and(|fp| gap.field_path.starts_with(fp))
                || record_type.is_some_and(|rt| gap.record_type == rt)
        })
        .collect();
    if relevant.iter().any(|g| g.status == GapStatus::Conflict) {
        0.0
    } else if relevant.iter().any(|g| g.status == GapStatus::Ambiguous) {
        0.5
    } else {
        1.0
    }
}

/// Confidence of a claim or section backed by `sources`; zero without sources.
pub fn compute_confidence(
    sources: &[&CitationSource],
    gaps: &[DataGap],
    field_path: Option<&str>,
    record_type: Option<&str>,
    now: DateTime<Utc>,
) -> ConfidenceBreakdown {
    let Some(max_authority) = sources.iter().map(|s| s.authority_score).max() else {
        return ConfidenceBreakdown::default();
    };
    let authority = (max_authority as f64 / 100.0).clamp(0.0, 1.0);
    let recency = recency_component(sources, record_type, now);
    let corroboration = corroboration_component(sources);
    let consistency = consistency_component(gaps, field_path, record_type);
    let score = (AUTHORITY_WEIGHT * authority
        + RECENCY_WEIGHT * recency
        + CORROBORATION_WEIGHT * corroboration
        + CONSISTENCY_WEIGHT * consistency)
        .clamp(0.0, 1.0);
    ConfidenceBreakdown {
        authority,
        recency,
        corroboration,
        consistency,
        score,
    }
}
