//! Integration tests for single-parcel resolution against fixture providers.

use dossier_core::error::ProviderError;
use dossier_core::gaps::{GapReason, GapStatus};
use dossier_core::parcel::{
    FixtureProviders, GeoPoint, Geometry, ParcelCandidate, ParcelDataset, ParcelFeature,
    ParcelRequest, ParcelSource, resolve_parcel,
};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const ADDRESS: &str = "1500 Marilla Street, Dallas, TX 75201";

fn point() -> GeoPoint {
    GeoPoint::new(32.78, -96.80)
}

/// Axis-aligned square ring around (lon, lat) with the given half-width.
fn square(lon: f64, lat: f64, half: f64) -> Vec<[f64; 2]> {
    vec![
        [lon - half, lat - half],
        [lon + half, lat - half],
        [lon + half, lat + half],
        [lon - half, lat + half],
        [lon - half, lat - half],
    ]
}

fn feature(parcel_id: &str, rings: Vec<Vec<[f64; 2]>>) -> ParcelFeature {
    ParcelFeature {
        geometry: Geometry::Polygon { coordinates: rings },
        parcel_id: Some(parcel_id.to_string()),
        account_id: None,
        situs_address: None,
        attributes: BTreeMap::new(),
    }
}

fn reasons(gaps: &[dossier_core::gaps::DataGap]) -> Vec<GapReason> {
    gaps.iter().map(|g| g.reason_code).collect()
}

#[tokio::test]
async fn test_single_record_resolves() {
    let providers = FixtureProviders::new()
        .with_geocode(point())
        .with_records(vec![ParcelCandidate::record("00000123456")]);

    let resolution = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &CancellationToken::new())
        .await
        .unwrap();

    assert!(resolution.is_resolved());
    assert_eq!(resolution.method, Some(ParcelSource::RecordSystem));
    assert_eq!(resolution.subject.parcel_id.as_deref(), Some("00000123456"));
    assert_eq!(resolution.subject.point, Some(point()));
    assert!(resolution.gaps.is_empty());
    assert!(resolution.gis_candidates.is_empty());
}

#[tokio::test]
async fn test_ids_differing_only_in_formatting_collapse() {
    let providers = FixtureProviders::new().with_geocode(point()).with_records(vec![
        ParcelCandidate::record("12-34-567"),
        ParcelCandidate::record("1234567 "),
        ParcelCandidate::record("12 34 567"),
    ]);

    let resolution = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.record_candidates.len(), 1);
    assert!(resolution.is_resolved());
    assert_eq!(resolution.subject.parcel_id.as_deref(), Some("12-34-567"));
}

#[tokio::test]
async fn test_distinct_records_are_ambiguous() {
    let providers = FixtureProviders::new().with_geocode(point()).with_records(vec![
        ParcelCandidate::record("A-1"),
        ParcelCandidate::record("B-2"),
    ]);

    let resolution = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!resolution.is_resolved());
    assert!(resolution.subject.parcel_id.is_none());
    assert_eq!(reasons(&resolution.gaps), vec![GapReason::ParcelAmbiguous]);
    let gap = &resolution.gaps[0];
    assert_eq!(gap.status, GapStatus::Ambiguous);
    assert!(gap.reason.contains("parcel:A1"));
    assert!(gap.reason.contains("parcel:B2"));
}

#[tokio::test]
async fn test_gis_containment_skips_donut_hole() {
    let here = point();
    // The first parcel has a hole exactly where the address point falls.
    let donut = feature(
        "DONUT",
        vec![
            square(here.lon, here.lat, 0.01),
            square(here.lon, here.lat, 0.001),
        ],
    );
    let containing = feature("INSIDE", vec![square(here.lon, here.lat, 0.0005)]);
    let distant = feature("FAR", vec![square(here.lon + 1.0, here.lat, 0.01)]);
    let providers = FixtureProviders::new()
        .with_geocode(here)
        .with_records(Vec::new())
        .with_features(vec![donut, containing, distant]);

    let resolution = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(resolution.method, Some(ParcelSource::Gis));
    assert_eq!(resolution.gis_candidates.len(), 1);
    assert_eq!(resolution.subject.parcel_id.as_deref(), Some("INSIDE"));
    assert!(resolution.gaps.is_empty());
}

#[tokio::test]
async fn test_overlapping_gis_parcels_are_ambiguous() {
    let here = point();
    let providers = FixtureProviders::new()
        .with_geocode(here)
        .with_records(Vec::new())
        .with_features(vec![
            feature("ONE", vec![square(here.lon, here.lat, 0.01)]),
            feature("TWO", vec![square(here.lon, here.lat, 0.02)]),
        ]);

    let resolution = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!resolution.is_resolved());
    assert_eq!(resolution.gis_candidates.len(), 2);
    assert_eq!(reasons(&resolution.gaps), vec![GapReason::ParcelAmbiguous]);
}

#[tokio::test]
async fn test_provider_failure_becomes_gap() {
    let providers = FixtureProviders::new().with_geocode(point()).with_failure(
        ParcelDataset::RecordSystem,
        ProviderError::Request {
            dataset: "record_system".into(),
            endpoint: "https://records.example.gov/api".into(),
            message: "HTTP 503".into(),
        },
    );

    let resolution = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!resolution.is_resolved());
    let codes = reasons(&resolution.gaps);
    assert!(codes.contains(&GapReason::ProviderFailed));
    assert!(codes.contains(&GapReason::ParcelNotFound));
    let failed = resolution
        .gaps
        .iter()
        .find(|g| g.reason_code == GapReason::ProviderFailed)
        .unwrap();
    assert!(
        failed
            .expected_sources
            .iter()
            .any(|s| s.endpoint.as_deref() == Some("https://records.example.gov/api"))
    );
}

#[tokio::test]
async fn test_missing_geocode_is_a_gap() {
    let providers = FixtureProviders::new().with_records(vec![ParcelCandidate::record("77")]);

    let resolution = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &CancellationToken::new())
        .await
        .unwrap();

    assert!(resolution.is_resolved());
    assert!(resolution.subject.point.is_none());
    assert_eq!(reasons(&resolution.gaps), vec![GapReason::GeocodeFailed]);
}

#[tokio::test]
async fn test_unavailable_datasets_raise_no_gaps() {
    let providers = FixtureProviders::new().with_geocode(point());

    let resolution = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!resolution.is_resolved());
    assert!(resolution.gaps.is_empty());
}

#[tokio::test]
async fn test_cancelled_token_aborts() {
    let providers = FixtureProviders::new().with_geocode(point());
    let token = CancellationToken::new();
    token.cancel();

    let err = resolve_parcel(&ParcelRequest::new(ADDRESS), &providers, &token)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Aborted));
}
