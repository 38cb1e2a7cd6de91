//! Structured data gaps.
//!
//! A [`DataGap`] records evidence that could not be confirmed: a failed
//! geocode, an unresolved or ambiguous parcel, a provider outage, an unmet
//! evidence threshold. Gaps are raised by parcel resolution, the evidence
//! gate and the dossier builder, then numbered when a report is assembled.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a piece of evidence is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatus {
    Missing,
    Restricted,
    Ambiguous,
    Conflict,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    Critical,
    Major,
    Minor,
}

/// Machine-readable gap reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    GeocodeFailed,
    ParcelNotFound,
    ParcelAmbiguous,
    ProviderFailed,
    EvidenceBelowMinimum,
    RecoveryExhausted,
    RecoveryTimedOut,
    MacroOnlySection,
    ChecklistMissing,
}

impl GapReason {
    pub fn as_str(self) -> &'static str {
        match self {
            GapReason::GeocodeFailed => "geocode_failed",
            GapReason::ParcelNotFound => "parcel_not_found",
            GapReason::ParcelAmbiguous => "parcel_ambiguous",
            GapReason::ProviderFailed => "provider_failed",
            GapReason::EvidenceBelowMinimum => "evidence_below_minimum",
            GapReason::RecoveryExhausted => "recovery_exhausted",
            GapReason::RecoveryTimedOut => "recovery_timed_out",
            GapReason::MacroOnlySection => "macro_only_section",
            GapReason::ChecklistMissing => "checklist_missing",
        }
    }

    /// Default field path, record type, status, severity, description and reason.
    fn defaults(self) -> GapDefaults {
        match self {
            GapReason::GeocodeFailed => GapDefaults {
                field_path: "/subject/geo",
                record_type: "geocode",
                status: GapStatus::Missing,
                severity: GapSeverity::Critical,
                description: "Unable to confirm the address location from available geocoders.",
                reason: "Geocode lookup returned no valid point for the normalized address.",
            },
            GapReason::ParcelNotFound => GapDefaults {
                field_path: "/subject/parcelId",
                record_type: "assessor_parcel",
                status: GapStatus::Missing,
                severity: GapSeverity::Critical,
                description: "No parcel record matched the address in record-system or GIS sources.",
                reason: "Record lookup and GIS parcel join returned no candidate parcels.",
            },
            GapReason::ParcelAmbiguous => GapDefaults {
                field_path: "/subject/parcelId",
                record_type: "assessor_parcel",
                status: GapStatus::Ambiguous,
                severity: GapSeverity::Critical,
                description: "Multiple parcels match the address.",
                reason: "More than one distinct parcel survived de-duplication.",
            },
            GapReason::ProviderFailed => GapDefaults {
                field_path: "/subject/parcelId",
                record_type: "assessor_parcel",
                status: GapStatus::Restricted,
                severity: GapSeverity::Major,
                description: "A public-record provider could not be queried.",
                reason: "Provider request failed.",
            },
            GapReason::EvidenceBelowMinimum => GapDefaults {
                field_path: "/sources",
                record_type: "evidence",
                status: GapStatus::Partial,
                severity: GapSeverity::Major,
                description: "Cited sources do not meet the address evidence minimum.",
                reason: "Evidence gate thresholds unmet.",
            },
            GapReason::RecoveryExhausted => GapDefaults {
                field_path: "/sources",
                record_type: "evidence",
                status: GapStatus::Missing,
                severity: GapSeverity::Critical,
                description: "Evidence recovery could not find enough authoritative sources.",
                reason: "Recovery ran every allowed query and thresholds are still unmet.",
            },
            GapReason::RecoveryTimedOut => GapDefaults {
                field_path: "/sources",
                record_type: "evidence",
                status: GapStatus::Partial,
                severity: GapSeverity::Major,
                description: "Evidence recovery ran out of time.",
                reason: "Recovery wall-clock budget exceeded.",
            },
            GapReason::MacroOnlySection => GapDefaults {
                field_path: "/sections",
                record_type: "macro_context",
                status: GapStatus::Missing,
                severity: GapSeverity::Major,
                description: "Section relies only on macro-scale sources.",
                reason: "No parcel-level evidence supports this section.",
            },
            GapReason::ChecklistMissing => GapDefaults {
                field_path: "/evidence",
                record_type: "evidence",
                status: GapStatus::Missing,
                severity: GapSeverity::Major,
                description: "Required address evidence is missing.",
                reason: "No cited source covers this evidence class.",
            },
        }
    }
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct GapDefaults {
    field_path: &'static str,
    record_type: &'static str,
    status: GapStatus,
    severity: GapSeverity,
    description: &'static str,
    reason: &'static str,
}

/// Where the missing evidence is expected to live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePointer {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl SourcePointer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_portal_url(mut self, url: impl Into<String>) -> Self {
        self.portal_url = Some(url.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Expected source pointers for a record type.
pub fn expected_sources(record_type: &str) -> Vec<SourcePointer> {
    match record_type {
        "assessor_parcel" => vec![
            SourcePointer::new("County assessor parcel search portal"),
            SourcePointer::new("County GIS parcel layer"),
        ],
        "tax_appraisal" => vec![SourcePointer::new("Appraisal district property search")],
        "tax_collector" => vec![SourcePointer::new("County tax collector account lookup")],
        "deed_recorder" => vec![SourcePointer::new("County recorder deed index")],
        "zoning_gis" => vec![SourcePointer::new("Municipal zoning GIS layer")],
        "permits" => vec![SourcePointer::new("Building permit portal")],
        "code_enforcement" => vec![SourcePointer::new("Code enforcement case search")],
        "hazards_environmental" => vec![
            SourcePointer::new("FEMA Flood Map Service Center")
                .with_portal_url("https://msc.fema.gov/portal/search"),
        ],
        "neighborhood_context" => vec![
            SourcePointer::new("U.S. Census data").with_portal_url("https://data.census.gov"),
        ],
        _ => Vec::new(),
    }
}

/// A structured record of missing, ambiguous, restricted or conflicting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGap {
    /// `gap-N` once numbered by a [`GapLedger`]; empty before.
    pub id: String,
    pub field_path: String,
    pub record_type: String,
    pub description: String,
    pub reason: String,
    pub reason_code: GapReason,
    pub status: GapStatus,
    pub severity: GapSeverity,
    #[serde(default)]
    pub expected_sources: Vec<SourcePointer>,
    pub detected_at: NaiveDate,
}

impl DataGap {
    /// A gap with the reason's defaults, detected today.
    pub fn new(code: GapReason) -> Self {
        let defaults = code.defaults();
        Self {
            id: String::new(),
            field_path: defaults.field_path.to_string(),
            record_type: defaults.record_type.to_string(),
            description: defaults.description.to_string(),
            reason: defaults.reason.to_string(),
            reason_code: code,
            status: defaults.status,
            severity: defaults.severity,
            expected_sources: expected_sources(defaults.record_type),
            detected_at: Utc::now().date_naive(),
        }
    }

    /// Append detail to the default reason.
    pub fn with_details(mut self, details: impl AsRef<str>) -> Self {
        let details = details.as_ref().trim();
        if !details.is_empty() {
            self.reason = format!("{} {details}", self.reason);
        }
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field_path(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = field_path.into();
        self
    }

    /// Change the record type and its expected sources.
    pub fn with_record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = record_type.into();
        self.expected_sources = expected_sources(&self.record_type);
        self
    }

    pub fn with_status(mut self, status: GapStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_severity(mut self, severity: GapSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_expected_source(mut self, pointer: SourcePointer) -> Self {
        self.expected_sources.push(pointer);
        self
    }
}

/// Numbers gaps `gap-1`, `gap-2`, ... in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapLedger {
    gaps: Vec<DataGap>,
}

impl GapLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut gap: DataGap) -> &DataGap {
        gap.id = format!("gap-{}", self.gaps.len() + 1);
        self.gaps.push(gap);
        &self.gaps[self.gaps.len() - 1]
    }

    pub fn extend(&mut self, gaps: impl IntoIterator<Item = DataGap>) {
        for gap in gaps {
            self.push(gap);
        }
    }

    pub fn gaps(&self) -> &[DataGap] {
        &self.gaps
    }

    pub fn has_reason(&self, code: GapReason) -> bool {
        self.gaps.iter().any(|gap| gap.reason_code == code)
    }

    pub fn into_gaps(self) -> Vec<DataGap> {
        self.gaps
    }
}
