//! Single-parcel resolution: geocode, record-system lookup, GIS containment.
//!
//! Resolution never guesses. A parcel is returned only when exactly one
//! distinct candidate survives a stage; otherwise a data gap says why.

use super::geometry::GeoPoint;
use super::providers::{
    GeocodeRequest, GeocodeResult, Jurisdiction, ParcelCandidate, ParcelDataset, ParcelLookup,
    ParcelProviders, ParcelSource,
};
use crate::address::normalize_address_variants;
use crate::error::ProviderError;
use crate::gaps::{DataGap, GapReason, GapStatus, SourcePointer};
use crate::oracle::guarded;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParcelRequest {
    pub address: String,
    /// Overrides the canonical address variant when set.
    pub normalized_address: Option<String>,
    pub jurisdiction: Option<Jurisdiction>,
}

impl ParcelRequest {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// The property the report is about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySubject {
    pub address: String,
    pub normalized_address: String,
    pub variants: Vec<String>,
    pub point: Option<GeoPoint>,
    pub parcel_id: Option<String>,
    pub account_id: Option<String>,
    pub jurisdiction: Option<Jurisdiction>,
}

/// A uniquely resolved parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parcel {
    pub parcel_id: Option<String>,
    pub account_id: Option<String>,
    pub situs_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelResolution {
    pub subject: PropertySubject,
    pub parcel: Option<Parcel>,
    pub method: Option<ParcelSource>,
    pub geocode: Option<GeocodeResult>,
    pub record_candidates: Vec<ParcelCandidate>,
    pub gis_candidates: Vec<ParcelCandidate>,
    pub gaps: Vec<DataGap>,
}

impl ParcelResolution {
    pub fn is_resolved(&self) -> bool {
        self.parcel.is_some()
    }
}

/// Strip everything but ASCII letters and digits, uppercase the rest.
pub fn normalize_parcel_id(value: &str) -> String {
    value
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_uppercase()
}

fn identity(candidate: &ParcelCandidate) -> Option<String> {
    let parcel = candidate.parcel_id.as_deref().map(normalize_parcel_id);
    let account = candidate.account_id.as_deref().map(normalize_parcel_id);
    parcel
        .filter(|id| !id.is_empty())
        .or(account.filter(|id| !id.is_empty()))
}

/// De-duplicate candidates by normalized parcel (or account) id, first wins.
/// Candidates without any id are all kept.
pub fn dedupe_candidates(candidates: Vec<ParcelCandidate>) -> Vec<ParcelCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| match identity(candidate) {
            Some(key) => seen.insert(key),
            None => true,
        })
        .collect()
}

fn candidate_key(candidate: &ParcelCandidate) -> String {
    let parcel = candidate.parcel_id.as_deref().map(normalize_parcel_id);
    let account = candidate.account_id.as_deref().map(normalize_parcel_id);
    match (parcel, account, &candidate.situs_address) {
        (Some(id), _, _) if !id.is_empty() => format!("parcel:{id}"),
        (_, Some(id), _) if !id.is_empty() => format!("account:{id}"),
        (_, _, Some(situs)) => format!("situs:{situs}"),
        _ => "unknown".to_string(),
    }
}

fn to_parcel(candidate: &ParcelCandidate) -> Option<Parcel> {
    if candidate.parcel_id.is_none()
        && candidate.account_id.is_none()
        && candidate.situs_address.is_none()
    {
        return None;
    }
    Some(Parcel {
        parcel_id: candidate.parcel_id.clone(),
        account_id: candidate.account_id.clone(),
        situs_address: candidate.situs_address.clone(),
    })
}

fn ambiguous_gap(description: &str, reason: &str, candidates: &[ParcelCandidate]) -> DataGap {
    let keys: Vec<String> = candidates.iter().map(candidate_key).collect();
    DataGap::new(GapReason::ParcelAmbiguous)
        .with_description(description)
        .with_details(format!("{reason} Candidates: {}.", keys.join(", ")))
        .with_status(GapStatus::Ambiguous)
}

fn provider_gap(dataset: ParcelDataset, error: &ProviderError) -> DataGap {
    let record_type = match dataset {
        ParcelDataset::Geocoder => "geocode",
        ParcelDataset::RecordSystem | ParcelDataset::GisParcels => "assessor_parcel",
    };
    let mut gap = DataGap::new(GapReason::ProviderFailed)
        .with_record_type(record_type)
        .with_description(format!("The {dataset} provider could not be queried."))
        .with_details(error.to_string());
    if let Some(endpoint) = error.endpoint() {
        gap = gap.with_expected_source(
            SourcePointer::new(format!("{dataset} endpoint")).with_endpoint(endpoint),
        );
    }
    gap
}

/// Outcome of one provider call once cancellation has been separated out.
enum Call<T> {
    Done(T),
    Skipped,
    Failed,
}

fn settle<T>(
    dataset: ParcelDataset,
    result: Result<T, ProviderError>,
    gaps: &mut Vec<DataGap>,
) -> Result<Call<T>, ProviderError> {
    match result {
        Ok(value) => Ok(Call::Done(value)),
        Err(ProviderError::Aborted) => Err(ProviderError::Aborted),
        Err(ProviderError::Unavailable { .. }) => {
            debug!(%dataset, "Provider dataset unavailable; skipping");
            Ok(Call::Skipped)
        }
        Err(error) => {
            warn!(%dataset, error = %error, "Provider call failed");
            gaps.push(provider_gap(dataset, &error));
            Ok(Call::Failed)
        }
    }
}

/// Resolve the parcel for an address.
///
/// Provider failures become gaps; only cancellation escapes as an error.
pub async fn resolve_parcel(
    request: &ParcelRequest,
    providers: &dyn ParcelProviders,
    token: &CancellationToken,
) -> Result<ParcelResolution, ProviderError> {
    let variants = normalize_address_variants(&request.address);
    let normalized_address = request
        .normalized_address
        .clone()
        .filter(|a| !a.trim().is_empty())
        .or_else(|| variants.first().cloned())
        .unwrap_or_else(|| request.address.trim().to_string());
    let mut all_variants = vec![normalized_address.clone()];
    for variant in variants {
        if !all_variants.contains(&variant) {
            all_variants.push(variant);
        }
    }

    let mut subject = PropertySubject {
        address: request.address.clone(),
        normalized_address: normalized_address.clone(),
        variants: all_variants.clone(),
        jurisdiction: request.jurisdiction.clone(),
        ..PropertySubject::default()
    };
    let mut gaps = Vec::new();

    // Geocode
    let geocode_request = GeocodeRequest {
        address: normalized_address.clone(),
        variants: all_variants.clone(),
        jurisdiction: request.jurisdiction.clone(),
    };
    let geocode = match settle(
        ParcelDataset::Geocoder,
        guarded(token, providers.geocode(&geocode_request)).await,
        &mut gaps,
    )? {
        Call::Done(Some(result)) => Some(result),
        Call::Done(None) => {
            gaps.push(
                DataGap::new(GapReason::GeocodeFailed)
                    .with_details(format!("Address: {normalized_address}.")),
            );
            None
        }
        Call::Skipped | Call::Failed => None,
    };
    subject.point = geocode.as_ref().map(|g| g.point);

    // Record system
    let lookup = ParcelLookup {
        address: request.address.clone(),
        normalized_address: normalized_address.clone(),
        variants: all_variants,
        jurisdiction: request.jurisdiction.clone(),
        point: subject.point,
    };
    let (record_candidates, record_attempted) = match settle(
        ParcelDataset::RecordSystem,
        guarded(token, providers.record_lookup(&lookup)).await,
        &mut gaps,
    )? {
        Call::Done(candidates) => (dedupe_candidates(candidates), true),
        Call::Skipped => (Vec::new(), false),
        Call::Failed => (Vec::new(), true),
    };

    let mut resolved = None;
    let mut method = None;
    if let [only] = record_candidates.as_slice() {
        resolved = Some(only.clone());
        method = Some(ParcelSource::RecordSystem);
    }

    // GIS containment
    let mut gis_candidates = Vec::new();
    let mut gis_attempted = false;
    if resolved.is_none() {
        if let Some(point) = subject.point {
            match settle(
                ParcelDataset::GisParcels,
                guarded(
                    token,
                    providers.gis_parcels(point, request.jurisdiction.as_ref()),
                )
                .await,
                &mut gaps,
            )? {
                Call::Done(features) => {
                    gis_attempted = true;
                    gis_candidates = dedupe_candidates(
                        features
                            .into_iter()
                            .filter(|feature| feature.geometry.contains(point))
                            .map(|feature| feature.into_candidate())
                            .collect(),
                    );
                }
                Call::Failed => gis_attempted = true,
                Call::Skipped => {}
            }
            match gis_candidates.as_slice() {
                [only] => {
                    resolved = Some(only.clone());
                    method = Some(ParcelSource::Gis);
                }
                [] => {}
                _ => gaps.push(ambiguous_gap(
                    "Multiple GIS parcel polygons contain the address point.",
                    "GIS parcel join returned multiple containing parcels.",
                    &gis_candidates,
                )),
            }
        }
    }

    if resolved.is_none() && record_candidates.len() > 1 {
        gaps.push(ambiguous_gap(
            "Multiple record-system parcel matches returned for the address.",
            "Record lookup returned more than one distinct parcel.",
            &record_candidates,
        ));
    }

    let ambiguous = gaps
        .iter()
        .any(|gap| gap.reason_code == GapReason::ParcelAmbiguous);
    if resolved.is_none() && !ambiguous && (record_attempted || gis_attempted) {
        gaps.push(DataGap::new(GapReason::ParcelNotFound).with_details(format!(
            "Record candidates: {}. GIS candidates: {}.",
            record_candidates.len(),
            gis_candidates.len()
        )));
    }

    if let Some(candidate) = &resolved {
        subject.parcel_id = candidate.parcel_id.clone();
        subject.account_id = candidate.account_id.clone();
        info!(
            method = ?method,
            key = %candidate_key(candidate),
            "Parcel resolved"
        );
    } else {
        info!(gaps = gaps.len(), "Parcel not resolved");
    }

    Ok(ParcelResolution {
        subject,
        parcel: resolved.as_ref().and_then(to_parcel),
        method,
        geocode,
        record_candidates,
        gis_candidates,
        gaps,
    })
}
