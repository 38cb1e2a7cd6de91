//! Post-processing of synthesis and validation replies.

use super::planner::unique_list;
use crate::oracle::{Parsed, ReportDraft, ReportSection, ValidationReply};
use crate::sources::NormalizedSource;
use std::collections::HashSet;

pub const RAW_SECTION_TITLE: &str = "Raw Synthesis Output (Unstructured)";
pub const INCOMPLETE_SECTION_TITLE: &str = "Synthesis Incomplete";
pub const VALIDATION_SECTION_TITLE: &str = "Validation Issues";
pub const MAX_RAW_CHARS: usize = 50_000;
pub const DEFAULT_METHOD_AUDIT: &str = "Deep Drill Protocol: 3-Stage Recursive Verification.";

const SUMMARY_FAILED: &str = "Summary generation failed.";
const SUMMARY_UNSTRUCTURED: &str = "Synthesis returned unstructured output. See raw output section.";
const INCOMPLETE_CONTENT: &str =
    "The model did not return a structured report. Try a smaller topic, or re-run with more sources.";
const VALIDATION_DEFAULT: &str = "Validation failed. Claims may be unsupported.";

/// A cleaned draft plus what cleaning did.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub draft: ReportDraft,
    /// Section citations dropped because they were not in the allowed list.
    pub removed_sources: usize,
    pub unstructured: bool,
    pub incomplete: bool,
}

/// Drop repeated paragraphs (blank-line separated), keeping the first.
pub fn dedupe_paragraphs(text: &str) -> String {
    let mut seen = HashSet::new();
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty() && seen.insert(*p))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate_raw(text: &str) -> String {
    match text.char_indices().nth(MAX_RAW_CHARS) {
        Some((cut, _)) => format!("{}\n...[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Clean a synthesis reply against the sources it was allowed to cite.
pub fn finalize_draft(
    topic: &str,
    reply: Parsed<ReportDraft>,
    allowed: &[NormalizedSource],
) -> SynthesisOutcome {
    let allowed_uris: HashSet<&str> = allowed.iter().map(|s| s.uri.as_str()).collect();
    let (mut draft, raw) = match reply {
        Parsed::Ok(draft) => (draft, None),
        Parsed::Unparsed { raw } => (
            ReportDraft::default(),
            Some(raw).filter(|r| !r.trim().is_empty()),
        ),
    };

    let mut removed_sources = 0;
    for section in &mut draft.sections {
        let before = section.sources.len();
        section
            .sources
            .retain(|uri| allowed_uris.contains(uri.as_str()));
        removed_sources += before - section.sources.len();
    }

    let unstructured = raw.is_some();
    let mut incomplete = false;
    if draft.summary.trim().is_empty() {
        draft.summary = SUMMARY_FAILED.to_string();
    }
    if let Some(raw) = raw {
        if draft.sections.is_empty() {
            draft.sections.push(ReportSection::new(
                RAW_SECTION_TITLE,
                truncate_raw(&dedupe_paragraphs(&raw)),
            ));
        }
        if draft.summary == SUMMARY_FAILED {
            draft.summary = SUMMARY_UNSTRUCTURED.to_string();
        }
    } else if draft.sections.is_empty() {
        incomplete = true;
        draft
            .sections
            .push(ReportSection::new(INCOMPLETE_SECTION_TITLE, INCOMPLETE_CONTENT));
    }

    if draft.title.trim().is_empty() {
        draft.title = format!("Deep Dive: {topic}");
    }
    draft.provenance.total_sources = allowed_uris.len();
    if draft.provenance.method_audit.trim().is_empty() {
        draft.provenance.method_audit = DEFAULT_METHOD_AUDIT.to_string();
    }

    SynthesisOutcome {
        draft,
        removed_sources,
        unstructured,
        incomplete,
    }
}

/// Apply a validation reply. An unparsable reply counts as a failure; a
/// failure appends a section listing the issues.
pub fn apply_validation(draft: &mut ReportDraft, reply: Parsed<ValidationReply>) -> ValidationReply {
    let validation = reply.or_default();
    if !validation.is_valid {
        let content = if validation.issues.is_empty() {
            VALIDATION_DEFAULT.to_string()
        } else {
            validation.issues.join("\n")
        };
        draft
            .sections
            .push(ReportSection::new(VALIDATION_SECTION_TITLE, content));
    }
    validation
}

/// Every source uri cited by a section, first occurrence wins.
pub fn cited_sources(draft: &ReportDraft) -> Vec<String> {
    unique_list(draft.sections.iter().flat_map(|s| s.sources.iter().cloned()))
}
