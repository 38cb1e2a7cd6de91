//! Final report assembly: citations, claims, data gaps and confidence.
//!
//! [`build_dossier`] takes a post-processed synthesis draft and the run's
//! evidence artifacts and produces the [`FinalReport`]. Every section gets a
//! computed confidence. For address topics the builder also applies the
//! evidence checklist and the macro gate, derives one claim per dossier field
//! path and appends a "Data Gaps & Next Steps" section.

pub mod citations;
pub mod policy;

use crate::evidence::gate::EvidenceStatus;
use crate::evidence::recovery::{RecoveryMetrics, RecoveryOutcome, RecoveryReport};
use crate::gaps::{DataGap, GapLedger, GapReason, GapSeverity};
use crate::oracle::{ReportDraft, ReportProvenance, ReportSection};
use crate::parcel::{Parcel, ParcelResolution, ParcelSource, PropertySubject};
use crate::sources::NormalizedSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

pub use citations::{
    CitationRegistry, CitationSource, ConfidenceBreakdown, SECTION_DEFS, SectionDef,
    compute_confidence, find_section_def, max_age_days,
};
pub use policy::{
    AddressChecklist, SCALE_COMPATIBILITY_PENALTY, SectionGate, SourceScale,
    classify_source_scale, enforce_macro_gate, evaluate_address_evidence_minimum,
};

const SNIPPET_MAX_CHARS: usize = 180;
const DATA_GAPS_TITLE: &str = "Data Gaps & Next Steps";

/// A statement backed by at least one citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: String,
    pub field_path: String,
    pub claim: String,
    /// Citation ids (`src-N`).
    pub citations: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Structured property dossier attached to address reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDossier {
    pub subject: PropertySubject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel: Option<Parcel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_method: Option<ParcelSource>,
    pub claims: Vec<Claim>,
}

/// The delivered report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub title: String,
    pub summary: String,
    pub sections: Vec<ReportSection>,
    pub provenance: ReportProvenance,
    pub sources: Vec<CitationSource>,
    pub data_gaps: Vec<DataGap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dossier: Option<PropertyDossier>,
}

impl FinalReport {
    pub fn section(&self, title: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.title == title)
    }
}

/// Everything the builder needs from one run.
#[derive(Debug, Clone)]
pub struct DossierInput<'a> {
    pub draft: ReportDraft,
    /// Sources the draft was allowed to cite.
    pub sources: &'a [NormalizedSource],
    pub is_address: bool,
    pub evidence: Option<EvidenceStatus>,
    pub recovery: Option<&'a RecoveryReport>,
    pub parcel: Option<&'a ParcelResolution>,
    pub now: DateTime<Utc>,
}

impl<'a> DossierInput<'a> {
    pub fn new(draft: ReportDraft, sources: &'a [NormalizedSource]) -> Self {
        Self {
            draft,
            sources,
            is_address: false,
            evidence: None,
            recovery: None,
            parcel: None,
            now: Utc::now(),
        }
    }
}

/// First sentence of a section, at most 180 characters.
pub fn format_snippet(content: &str) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return String::new();
    }
    let sentence_end = collapsed
        .char_indices()
        .zip(collapsed.chars().skip(1))
        .find(|((_, c), next)| matches!(c, '.' | '!' | '?') && *next == ' ')
        .map(|((i, c), _)| i + c.len_utf8());
    let snippet = match sentence_end {
        Some(end) => &collapsed[..end],
        None => collapsed.as_str(),
    };
    if snippet.chars().count() > SNIPPET_MAX_CHARS {
        let cut: String = snippet.chars().take(SNIPPET_MAX_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        snippet.to_string()
    }
}

fn render_gap_line(gap: &DataGap) -> String {
    let mut line = format!(
        "- [{}] {} ({}: {})",
        severity_label(gap),
        gap.description,
        gap.id,
        gap.reason_code
    );
    let pointers: Vec<String> = gap
        .expected_sources
        .iter()
        .map(|p| match (&p.portal_url, &p.endpoint) {
            (Some(url), _) => format!("{} <{url}>", p.label),
            (None, Some(endpoint)) => format!("{} [{endpoint}]", p.label),
            (None, None) => p.label.clone(),
        })
        .collect();
    if !pointers.is_empty() {
        line.push_str(&format!(" Next: {}.", pointers.join("; ")));
    }
    line
}

fn severity_label(gap: &DataGap) -> &'static str {
    match gap.severity {
        GapSeverity::Critical => "critical",
        GapSeverity::Major => "major",
        GapSeverity::Minor => "minor",
    }
}

/// Assemble the final report from a synthesis draft and run artifacts.
pub fn build_dossier(input: DossierInput<'_>) -> FinalReport {
    let DossierInput {
        draft,
        sources,
        is_address,
        evidence,
        recovery,
        parcel,
        now,
    } = input;
    let ReportDraft {
        title,
        summary,
        mut sections,
        provenance,
    } = draft;

    let registry = CitationRegistry::build(sources);
    let mut ledger = GapLedger::new();
    let mut gate_outcomes = vec![SectionGate::Untouched; sections.len()];

    if is_address {
        if let Some(resolution) = parcel {
            ledger.extend(resolution.gaps.iter().cloned());
        }
        if let Some(status) = evidence.filter(|s| !s.meets_all) {
            ledger.push(
                DataGap::new(GapReason::EvidenceBelowMinimum)
                    .with_details(status.reasons().join(", ")),
            );
        }
        if let Some(report) = recovery {
            let code = match report.outcome {
                RecoveryOutcome::Exhausted => Some(GapReason::RecoveryExhausted),
                RecoveryOutcome::TimedOut => Some(GapReason::RecoveryTimedOut),
                _ => None,
            };
            if let (Some(code), Some(warning)) = (code, report.warning()) {
                ledger.push(DataGap::new(code).with_details(warning));
            }
        }
        let parcel_resolved = parcel.is_some_and(ParcelResolution::is_resolved);
        let checklist = evaluate_address_evidence_minimum(sources, parcel_resolved);
        ledger.extend(checklist.gaps);
        let (outcomes, macro_gaps) =
            enforce_macro_gate(&mut sections, sources, checklist.has_parcel_evidence);
        if !macro_gaps.is_empty() {
            info!(blocked = macro_gaps.len(), "Blocked macro-only sections without parcel evidence");
        }
        ledger.extend(macro_gaps);
        gate_outcomes = outcomes;
    }

    for (section, outcome) in sections.iter_mut().zip(&gate_outcomes) {
        if *outcome == SectionGate::Blocked {
            continue;
        }
        let citations = registry.resolve(&section.sources);
        let def = find_section_def(&section.title);
        let breakdown = compute_confidence(
            &citations,
            ledger.gaps(),
            def.map(|d| d.field_path),
            def.and_then(|d| d.record_type),
            now,
        );
        let mut score = breakdown.score;
        if *outcome == SectionGate::Penalized {
            score = (score * SCALE_COMPATIBILITY_PENALTY).clamp(0.0, 1.0);
        }
        section.confidence = Some(score);
    }

    let dossier = is_address.then(|| {
        let claims = build_claims(&sections, &registry, now);
        debug!(claims = claims.len(), "Derived dossier claims");
        PropertyDossier {
            subject: parcel.map(|p| p.subject.clone()).unwrap_or_default(),
            parcel: parcel.and_then(|p| p.parcel.clone()),
            parcel_method: parcel.and_then(|p| p.method),
            claims,
        }
    });

    let data_gaps = ledger.into_gaps();
    if is_address {
        append_data_gaps_section(&mut sections, &data_gaps);
    }

    FinalReport {
        title,
        summary,
        sections,
        provenance,
        sources: registry.into_sources(),
        data_gaps,
        evidence,
        recovery: recovery.map(|r| r.metrics.clone()),
        dossier,
    }
}

/// One claim per dossier field path, from the first section that maps to it
/// and cites at least one registered source.
fn build_claims(
    sections: &[ReportSection],
    registry: &CitationRegistry,
    now: DateTime<Utc>,
) -> Vec<Claim> {
    let mut claims = Vec::new();
    let mut claimed: HashSet<&str> = HashSet::new();
    for section in sections {
        let Some(def) = find_section_def(&section.title) else {
            continue;
        };
        if def.record_type.is_none() || claimed.contains(def.field_path) {
            continue;
        }
        let citations: Vec<String> = registry
            .resolve(&section.sources)
            .into_iter()
            .map(|c| c.id.clone())
            .collect();
        if citations.is_empty() {
            continue;
        }
        let snippet = format_snippet(&section.content);
        claims.push(Claim {
            id: format!("claim-{}", claims.len() + 1),
            field_path: def.field_path.to_string(),
            claim: if snippet.is_empty() {
                format!("Section summary for {}.", def.label)
            } else {
                snippet
            },
            citations,
            confidence: section.confidence.unwrap_or(0.0),
            created_at: now,
        });
        claimed.insert(def.field_path);
    }
    claims
}

fn append_data_gaps_section(sections: &mut Vec<ReportSection>, gaps: &[DataGap]) {
    let body = if gaps.is_empty() {
        "No data gaps were detected for this address.".to_string()
    } else {
        gaps.iter().map(render_gap_line).collect::<Vec<_>>().join("\n")
    };
    let existing = sections
        .iter_mut()
        .find(|s| find_section_def(&s.title).is_some_and(|d| d.field_path == "/dataGaps"));
    match existing {
        Some(section) if !section.content.trim().is_empty() => {
            section.content = format!("{}\n\n{body}", section.content.trim_end());
        }
        Some(section) => section.content = body,
        None => sections.push(ReportSection::new(DATA_GAPS_TITLE, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::gate::evaluate_evidence;
    use crate::sources::RawSource;
    use pretty_assertions::assert_eq;

    fn source(uri: &str, title: &str) -> NormalizedSource {
        NormalizedSource::from_raw(&RawSource::new(uri, title), "mock").unwrap()
    }

    fn section(title: &str, content: &str, sources: &[&NormalizedSource]) -> ReportSection {
        let mut section = ReportSection::new(title, content);
        section.sources = sources.iter().map(|s| s.uri.clone()).collect();
        section
    }

    #[test]
    fn test_format_snippet() {
        assert_eq!(format_snippet("  First sentence.  Second one. "), "First sentence.");
        assert_eq!(format_snippet("No terminator here"), "No terminator here");
        let long = "word ".repeat(60);
        let snippet = format_snippet(&long);
        assert_eq!(snippet.chars().count(), 180);
        assert!(snippet.ends_with("..."));
        assert_eq!(format_snippet("   "), "");
    }

    #[test]
    fn test_general_topic_gets_section_confidence_only() {
        let a = source("https://docs.example.com/guide", "Guide");
        let sources = vec![a.clone()];
        let draft = ReportDraft {
            title: "Deep Dive: widgets".into(),
            sections: vec![section("Overview", "Widgets exist.", &[&a])],
            ..ReportDraft::default()
        };
        let report = build_dossier(DossierInput::new(draft, &sources));
        assert!(report.dossier.is_none());
        assert!(report.data_gaps.is_empty());
        assert_eq!(report.sections.len(), 1);
        assert!(report.sections[0].confidence.unwrap() > 0.0);
        assert_eq!(report.sources[0].id, "src-1");
    }

    #[test]
    fn test_address_report_blocks_macro_section_and_lists_gaps() {
        let metro = source("https://news.example.com/metro", "Metro economy report");
        let sources = vec![metro.clone()];
        let draft = ReportDraft {
            title: "Deep Dive: 123 Main St".into(),
            sections: vec![section("Economy", "Jobs grew.", &[&metro])],
            ..ReportDraft::default()
        };
        let mut input = DossierInput::new(draft, &sources);
        input.is_address = true;
        input.evidence = Some(evaluate_evidence(&sources));
        let report = build_dossier(input);

        let economy = report.section("Economy").unwrap();
        assert!(economy.content.starts_with("Data Gap: Economy requires"));
        assert_eq!(economy.confidence, Some(0.0));

        let codes: Vec<GapReason> = report.data_gaps.iter().map(|g| g.reason_code).collect();
        assert_eq!(codes[0], GapReason::EvidenceBelowMinimum);
        assert!(codes.contains(&GapReason::ChecklistMissing));
        assert!(codes.contains(&GapReason::MacroOnlySection));
        assert_eq!(report.data_gaps[0].id, "gap-1");

        let gaps_section = report.section(DATA_GAPS_TITLE).unwrap();
        assert_eq!(gaps_section.content.lines().count(), report.data_gaps.len());
        assert!(gaps_section.content.contains("gap-1"));
        assert!(report.dossier.unwrap().claims.is_empty());
    }

    #[test]
    fn test_address_report_claims_one_per_field_path() {
        let assessor = source(
            "https://www.dallascounty.gov/assessor/parcel/1",
            "Dallas County Assessor parcel",
        );
        let cad = source("https://dcad.org/account/1", "Dallas CAD appraisal account");
        let sources = vec![assessor.clone(), cad.clone()];
        let draft = ReportDraft {
            sections: vec![
                section("Parcel & Legal", "Lot 4, Block 2. Legal description follows.", &[&assessor]),
                section("Parcel details", "Duplicate parcel notes.", &[&cad]),
                section("Tax & Appraisal", "Appraised at $300,000.", &[&cad, &assessor]),
                section("Zoning/Land Use", "Uncited zoning notes.", &[]),
            ],
            ..ReportDraft::default()
        };
        let mut input = DossierInput::new(draft, &sources);
        input.is_address = true;
        let report = build_dossier(input);

        let dossier = report.dossier.unwrap();
        let paths: Vec<&str> = dossier.claims.iter().map(|c| c.field_path.as_str()).collect();
        assert_eq!(paths, vec!["/parcel", "/taxAppraisal"]);
        assert_eq!(dossier.claims[0].id, "claim-1");
        assert_eq!(dossier.claims[0].claim, "Lot 4, Block 2.");
        assert_eq!(dossier.claims[1].citations, vec!["src-2", "src-1"]);
        assert!(dossier.claims.iter().all(|c| c.confidence > 0.0));
    }

    #[test]
    fn test_macro_section_penalized_when_parcel_evidence_exists() {
        let metro = source("https://news.example.com/metro", "Metro economy report");
        let assessor = source(
            "https://www.dallascounty.gov/assessor/parcel/1",
            "Dallas County Assessor parcel",
        );
        let sources = vec![metro.clone(), assessor];
        let draft = ReportDraft {
            sections: vec![section("Economy", "Jobs grew.", &[&metro])],
            ..ReportDraft::default()
        };
        let now = Utc::now();
        let mut input = DossierInput::new(draft, &sources);
        input.is_address = true;
        input.now = now;
        let report = build_dossier(input);

        let registry = CitationRegistry::build(&sources);
        let citations = registry.resolve(&[metro.uri.clone()]);
        let unpenalized = compute_confidence(&citations, &report.data_gaps, None, None, now).score;
        let economy = report.section("Economy").unwrap();
        assert_eq!(economy.sources.len(), 1);
        let confidence = economy.confidence.unwrap();
        assert!((confidence - unpenalized * SCALE_COMPATIBILITY_PENALTY).abs() < 1e-9);
    }
}
