//! Address evidence minimum and macro-scale section gating.

use crate::gaps::{DataGap, GapReason, SourcePointer, expected_sources};
use crate::oracle::ReportSection;
use crate::sources::NormalizedSource;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Confidence multiplier for sections backed only by macro-scale sources.
pub const SCALE_COMPATIBILITY_PENALTY: f64 = 0.65;

static ASSESSOR_TAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"assessor|appraiser|appraisal|\bcad\b|parcel|\bapn\b|\bpin\b|property card|tax roll|tax collector|treasurer|tax bill",
    )
    .unwrap()
});
static PERMIT_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"permit|inspection|code enforcement|code violation|case log|casefile|case file|board of adjustment|\bboa\b",
    )
    .unwrap()
});
static ZONING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"zoning|land use|planning").unwrap());
static PARCEL_GEOMETRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"parcel.*(map|layer|geometry|gis|feature ?server|polygon|boundary)|gis.*parcel|feature ?server.*parcel",
    )
    .unwrap()
});
static NEIGHBORHOOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"neighborhood|\btract\b|block group|community area").unwrap()
});
static CITY_METRO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"citywide|city of|\bmetro|metropolitan|countywide|regional|\bregion\b|statewide|state of|national|\bcounty\b",
    )
    .unwrap()
});

/// Geographic scale a source speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceScale {
    Address,
    Neighborhood,
    Macro,
    Unknown,
}

fn source_text(source: &NormalizedSource) -> String {
    let joined = format!("{} {} {}", source.title, source.domain, source.uri).to_lowercase();
    joined
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn classify_source_scale(source: &NormalizedSource) -> SourceScale {
    let text = source_text(source);
    if ASSESSOR_TAX.is_match(&text) || PERMIT_CASE.is_match(&text) || ZONING.is_match(&text) {
        SourceScale::Address
    } else if NEIGHBORHOOD.is_match(&text) {
        SourceScale::Neighborhood
    } else if CITY_METRO.is_match(&text) {
        SourceScale::Macro
    } else {
        SourceScale::Unknown
    }
}

fn any_match(sources: &[NormalizedSource], pattern: &Regex) -> bool {
    sources.iter().any(|s| pattern.is_match(&source_text(s)))
}

fn merged_expected_sources(record_types: &[&str]) -> Vec<SourcePointer> {
    let mut merged: Vec<SourcePointer> = Vec::new();
    for pointer in record_types.iter().flat_map(|rt| expected_sources(rt)) {
        if !merged.contains(&pointer) {
            merged.push(pointer);
        }
    }
    merged
}

/// Result of the address evidence checklist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressChecklist {
    pub gaps: Vec<DataGap>,
    pub has_parcel_evidence: bool,
}

struct ChecklistItem {
    record_type: &'static str,
    description: &'static str,
    reason: &'static str,
    expected: &'static [&'static str],
}

impl ChecklistItem {
    fn pattern(&self) -> &'static Regex {
        match self.record_type {
            "assessor_or_tax" => &ASSESSOR_TAX,
            "permits_or_cases" => &PERMIT_CASE,
            "zoning_land_use" => &ZONING,
            _ => &PARCEL_GEOMETRY,
        }
    }
}

const CHECKLIST: &[ChecklistItem] = &[
    ChecklistItem {
        record_type: "assessor_or_tax",
        description: "Assessor/CAD record or tax roll coverage was not found for this address.",
        reason: "Parcel-level property record evidence is missing.",
        expected: &["assessor_parcel", "tax_collector"],
    },
    ChecklistItem {
        record_type: "permits_or_cases",
        description: "Permits, BOA, or case log evidence was not located for the property address.",
        reason: "No permits/case log sources were confirmed for this address.",
        expected: &["permits", "code_enforcement"],
    },
    ChecklistItem {
        record_type: "zoning_land_use",
        description: "Zoning or land-use layer evidence was not located for the property address.",
        reason: "No zoning/land-use sources were confirmed.",
        expected: &["zoning_gis"],
    },
    ChecklistItem {
        record_type: "parcel_geometry",
        description: "Parcel geometry (GIS parcel layer) was not located for the property address.",
        reason: "No parcel map or parcel geometry source was confirmed.",
        expected: &["assessor_parcel"],
    },
];

/// Check the cited sources against the four address evidence classes.
///
/// A resolved parcel counts as parcel evidence even when no cited source
/// shows assessor or parcel geometry coverage.
pub fn evaluate_address_evidence_minimum(
    sources: &[NormalizedSource],
    parcel_resolved: bool,
) -> AddressChecklist {
    let mut checklist = AddressChecklist::default();
    let mut found = HashMap::new();
    for item in CHECKLIST {
        let present = any_match(sources, item.pattern());
        found.insert(item.record_type, present);
        if present {
            continue;
        }
        let mut gap = DataGap::new(GapReason::ChecklistMissing)
            .with_record_type(item.record_type)
            .with_field_path(format!("/evidence/{}", item.record_type))
            .with_description(item.description)
            .with_details(item.reason);
        gap.expected_sources = merged_expected_sources(item.expected);
        checklist.gaps.push(gap);
    }
    checklist.has_parcel_evidence = parcel_resolved
        || found.get("assessor_or_tax").copied().unwrap_or(false)
        || found.get("parcel_geometry").copied().unwrap_or(false);
    checklist
}

/// What the macro gate did to one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionGate {
    Untouched,
    Blocked,
    Penalized,
}

/// Whether a section cites at least one source and every cited source is macro-scale.
pub fn is_macro_only(section: &ReportSection, by_url: &HashMap<&str, &NormalizedSource>) -> bool {
    let cited: Vec<&NormalizedSource> = section
        .sources
        .iter()
        .filter_map(|url| by_url.get(url.as_str()).copied())
        .collect();
    !cited.is_empty()
        && cited
            .iter()
            .all(|s| classify_source_scale(s) == SourceScale::Macro)
}

/// Apply the macro gate to the report sections in place.
///
/// Without parcel evidence a macro-only section is blocked: its content is
/// replaced by a gap notice, its sources are cleared and a gap is returned.
/// With parcel evidence the section stays, flagged for the confidence penalty.
pub fn enforce_macro_gate(
    sections: &mut [ReportSection],
    sources: &[NormalizedSource],
    has_parcel_evidence: bool,
) -> (Vec<SectionGate>, Vec<DataGap>) {
    let by_url: HashMap<&str, &NormalizedSource> =
        sources.iter().map(|s| (s.uri.as_str(), s)).collect();
    let mut outcomes = Vec::with_capacity(sections.len());
    let mut gaps = Vec::new();
    for section in sections.iter_mut() {
        if !is_macro_only(section, &by_url) {
            outcomes.push(SectionGate::Untouched);
            continue;
        }
        if has_parcel_evidence {
            outcomes.push(SectionGate::Penalized);
            continue;
        }
        let mut gap = DataGap::new(GapReason::MacroOnlySection)
            .with_description(format!(
                "{} blocked: address/parcel evidence is required before using macro-scale sources.",
                section.title
            ));
        gap.expected_sources = merged_expected_sources(&[
            "assessor_parcel",
            "tax_collector",
            "permits",
            "code_enforcement",
            "zoning_gis",
        ]);
        gaps.push(gap);
        section.content = format!(
            "Data Gap: {} requires parcel/address evidence before macro-scale context can be used.",
            section.title
        );
        section.sources.clear();
        section.confidence = Some(0.0);
        outcomes.push(SectionGate::Blocked);
    }
    (outcomes, gaps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::RawSource;

    fn source(uri: &str, title: &str) -> NormalizedSource {
        NormalizedSource::from_raw(&RawSource::new(uri, title), "mock").unwrap()
    }

    fn section(title: &str, sources: Vec<String>) -> ReportSection {
        let mut section = ReportSection::new(title, "Jobs are up.");
        section.sources = sources;
        section
    }

    #[test]
    fn test_classify_source_scale() {
        assert_eq!(
            classify_source_scale(&source("https://dcad.org/parcel/1", "Dallas CAD property")),
            SourceScale::Address
        );
        assert_eq!(
            classify_source_scale(&source("https://census.example.com", "Census tract 4501")),
            SourceScale::Neighborhood
        );
        assert_eq!(
            classify_source_scale(&source("https://news.example.com/economy", "Statewide economy outlook")),
            SourceScale::Macro
        );
        assert_eq!(
            classify_source_scale(&source("https://blog.example.com", "Thoughts")),
            SourceScale::Unknown
        );
    }

    #[test]
    fn test_checklist_reports_missing_classes() {
        let sources = vec![source("https://dcad.org/assessor/1", "Assessor record")];
        let checklist = evaluate_address_evidence_minimum(&sources, false);
        let types: Vec<&str> = checklist.gaps.iter().map(|g| g.record_type.as_str()).collect();
        assert_eq!(types, vec!["permits_or_cases", "zoning_land_use", "parcel_geometry"]);
        assert!(checklist.has_parcel_evidence);
        assert!(checklist.gaps.iter().all(|g| g.reason_code == GapReason::ChecklistMissing));
    }

    #[test]
    fn test_resolved_parcel_counts_as_parcel_evidence() {
        let sources = vec![source("https://news.example.com", "Statewide news")];
        assert!(!evaluate_address_evidence_minimum(&sources, false).has_parcel_evidence);
        assert!(evaluate_address_evidence_minimum(&sources, true).has_parcel_evidence);
    }

    #[test]
    fn test_macro_gate_blocks_without_parcel_evidence() {
        let macro_source = source("https://news.example.com/metro", "Metro economy report");
        let mut sections = vec![
            section("Economy", vec![macro_source.uri.clone()]),
            section("Notes", vec![]),
        ];
        let (outcomes, gaps) = enforce_macro_gate(&mut sections, &[macro_source], false);
        assert_eq!(outcomes, vec![SectionGate::Blocked, SectionGate::Untouched]);
        assert_eq!(
            sections[0].content,
            "Data Gap: Economy requires parcel/address evidence before macro-scale context can be used."
        );
        assert!(sections[0].sources.is_empty());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].reason_code, GapReason::MacroOnlySection);
    }

    #[test]
    fn test_macro_gate_penalizes_with_parcel_evidence() {
        let macro_source = source("https://news.example.com/metro", "Metro economy report");
        let mut sections = vec![section("Economy", vec![macro_source.uri.clone()])];
        let (outcomes, gaps) = enforce_macro_gate(&mut sections, &[macro_source], true);
        assert_eq!(outcomes, vec![SectionGate::Penalized]);
        assert!(gaps.is_empty());
        assert_eq!(sections[0].sources.len(), 1);
    }

    #[test]
    fn test_mixed_scale_section_is_not_macro_only() {
        let macro_source = source("https://news.example.com/metro", "Metro economy report");
        let parcel = source("https://dcad.org/parcel/1", "Parcel record");
        let mut sections = vec![section("Economy", vec![macro_source.uri.clone(), parcel.uri.clone()])];
        let (outcomes, _) = enforce_macro_gate(&mut sections, &[macro_source, parcel], false);
        assert_eq!(outcomes, vec![SectionGate::Untouched]);
    }
}
