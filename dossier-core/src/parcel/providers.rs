//! Record-system, geocoder and GIS provider seam.

use super::geometry::{GeoPoint, Geometry};
use crate::address::canonical_address;
use crate::cache::{PersistentCache, cache_key};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Provider datasets used by parcel resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelDataset {
    Geocoder,
    RecordSystem,
    GisParcels,
}

impl fmt::Display for ParcelDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParcelDataset::Geocoder => "geocoder",
            ParcelDataset::RecordSystem => "record_system",
            ParcelDataset::GisParcels => "gis_parcels",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Jurisdiction {
    pub country: Option<String>,
    pub state: Option<String>,
    pub county: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeRequest {
    pub address: String,
    pub variants: Vec<String>,
    pub jurisdiction: Option<Jurisdiction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub point: GeoPoint,
    #[serde(default, alias = "normalizedAddress")]
    pub normalized_address: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "accuracyMeters")]
    pub accuracy_meters: Option<f64>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Input to a record-system lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelLookup {
    pub address: String,
    pub normalized_address: String,
    pub variants: Vec<String>,
    pub jurisdiction: Option<Jurisdiction>,
    pub point: Option<GeoPoint>,
}

/// Where a parcel candidate came from; also the resolution method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParcelSource {
    #[serde(rename = "record-system")]
    RecordSystem,
    #[serde(rename = "gis")]
    Gis,
}

impl fmt::Display for ParcelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParcelSource::RecordSystem => "record-system",
            ParcelSource::Gis => "gis",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelCandidate {
    #[serde(default, alias = "parcelId")]
    pub parcel_id: Option<String>,
    #[serde(default, alias = "accountId")]
    pub account_id: Option<String>,
    #[serde(default, alias = "situsAddress")]
    pub situs_address: Option<String>,
    pub source: ParcelSource,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl ParcelCandidate {
    pub fn record(parcel_id: impl Into<String>) -> Self {
        Self {
            parcel_id: Some(parcel_id.into()),
            account_id: None,
            situs_address: None,
            source: ParcelSource::RecordSystem,
            geometry: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// A feature from a GIS parcel layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelFeature {
    pub geometry: Geometry,
    #[serde(default, alias = "parcelId")]
    pub parcel_id: Option<String>,
    #[serde(default, alias = "accountId")]
    pub account_id: Option<String>,
    #[serde(default, alias = "situsAddress")]
    pub situs_address: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl ParcelFeature {
    pub fn into_candidate(self) -> ParcelCandidate {
        ParcelCandidate {
            parcel_id: self.parcel_id,
            account_id: self.account_id,
            situs_address: self.situs_address,
            source: ParcelSource::Gis,
            geometry: Some(self.geometry),
            attributes: self.attributes,
        }
    }
}

/// The three provider calls parcel resolution depends on.
///
/// A dataset a provider does not offer answers `ProviderError::Unavailable`;
/// resolution skips it without raising a gap.
#[async_trait]
pub trait ParcelProviders: Send + Sync {
    async fn geocode(
        &self,
        request: &GeocodeRequest,
    ) -> Result<Option<GeocodeResult>, ProviderError>;

    async fn record_lookup(
        &self,
        lookup: &ParcelLookup,
    ) -> Result<Vec<ParcelCandidate>, ProviderError>;

    async fn gis_parcels(
        &self,
        point: GeoPoint,
        jurisdiction: Option<&Jurisdiction>,
    ) -> Result<Vec<ParcelFeature>, ProviderError>;
}

/// Caches geocodes by normalized address in front of another provider.
pub struct CachingGeocoder {
    inner: Arc<dyn ParcelProviders>,
    cache: Arc<PersistentCache<GeocodeResult>>,
}

impl CachingGeocoder {
    pub fn new(inner: Arc<dyn ParcelProviders>, cache: Arc<PersistentCache<GeocodeResult>>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl ParcelProviders for CachingGeocoder {
    async fn geocode(
        &self,
        request: &GeocodeRequest,
    ) -> Result<Option<GeocodeResult>, ProviderError> {
        let key = cache_key(&[&canonical_address(&request.address)]);
        if let Some(hit) = self.cache.get(&key) {
            debug!(address = %request.address, "Geocode cache hit");
            return Ok(Some(hit));
        }
        let result = self.inner.geocode(request).await?;
        if let Some(found) = &result {
            self.cache.insert(key, found.clone());
        }
        Ok(result)
    }

    async fn record_lookup(
        &self,
        lookup: &ParcelLookup,
    ) -> Result<Vec<ParcelCandidate>, ProviderError> {
        self.inner.record_lookup(lookup).await
    }

    async fn gis_parcels(
        &self,
        point: GeoPoint,
        jurisdiction: Option<&Jurisdiction>,
    ) -> Result<Vec<ParcelFeature>, ProviderError> {
        self.inner.gis_parcels(point, jurisdiction).await
    }
}

/// Fixed provider answers, loaded from JSON for offline runs and tests.
///
/// A dataset listed in `failures` answers with that error; a dataset with no
/// data and no failure is unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureProviders {
    pub geocode: Option<GeocodeResult>,
    pub records: Option<Vec<ParcelCandidate>>,
    pub features: Option<Vec<ParcelFeature>>,
    #[serde(skip)]
    pub failures: HashMap<ParcelDataset, ProviderError>,
}

impl FixtureProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geocode(mut self, point: GeoPoint) -> Self {
        self.geocode = Some(GeocodeResult {
            point,
            normalized_address: None,
            confidence: Some(1.0),
            accuracy_meters: None,
            provider: Some("fixture".into()),
        });
        self
    }

    pub fn with_records(mut self, records: Vec<ParcelCandidate>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_features(mut self, features: Vec<ParcelFeature>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_failure(mut self, dataset: ParcelDataset, error: ProviderError) -> Self {
        self.failures.insert(dataset, error);
        self
    }

    fn check(&self, dataset: ParcelDataset) -> Result<(), ProviderError> {
        match self.failures.get(&dataset) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ParcelProviders for FixtureProviders {
    async fn geocode(
        &self,
        _request: &GeocodeRequest,
    ) -> Result<Option<GeocodeResult>, ProviderError> {
        self.check(ParcelDataset::Geocoder)?;
        Ok(self.geocode.clone())
    }

    async fn record_lookup(
        &self,
        _lookup: &ParcelLookup,
    ) -> Result<Vec<ParcelCandidate>, ProviderError> {
        self.check(ParcelDataset::RecordSystem)?;
        self.records.clone().ok_or_else(|| ProviderError::Unavailable {
            dataset: ParcelDataset::RecordSystem.to_string(),
        })
    }

    async fn gis_parcels(
        &self,
        _point: GeoPoint,
        _jurisdiction: Option<&Jurisdiction>,
    ) -> Result<Vec<ParcelFeature>, ProviderError> {
        self.check(ParcelDataset::GisParcels)?;
        self.features.clone().ok_or_else(|| ProviderError::Unavailable {
            dataset: ParcelDataset::GisParcels.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSnapshot;
    use crate::persistence::MemoryPort;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ParcelProviders for CountingGeocoder {
        async fn geocode(
            &self,
            _request: &GeocodeRequest,
        ) -> Result<Option<GeocodeResult>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FixtureProviders::new()
                .with_geocode(GeoPoint::new(32.78, -96.80))
                .geocode)
        }

        async fn record_lookup(
            &self,
            _lookup: &ParcelLookup,
        ) -> Result<Vec<ParcelCandidate>, ProviderError> {
            Ok(vec![])
        }

        async fn gis_parcels(
            &self,
            _point: GeoPoint,
            _jurisdiction: Option<&Jurisdiction>,
        ) -> Result<Vec<ParcelFeature>, ProviderError> {
            Ok(vec![])
        }
    }

    fn request(address: &str) -> GeocodeRequest {
        GeocodeRequest {
            address: address.into(),
            variants: vec![],
            jurisdiction: None,
        }
    }

    #[tokio::test]
    async fn test_caching_geocoder_hits_by_normalized_address() {
        let inner = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(PersistentCache::<GeocodeResult>::open(
            Arc::new(MemoryPort::<CacheSnapshot<GeocodeResult>>::new()),
            3600,
            10,
        ));
        let geocoder = CachingGeocoder::new(inner.clone(), cache);

        let first = geocoder.geocode(&request("1500 Marilla Street, Dallas")).await.unwrap();
        let second = geocoder.geocode(&request("1500  marilla st,  Dallas")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fixture_unavailable_and_failure() {
        let fixture = FixtureProviders::new().with_failure(
            ParcelDataset::GisParcels,
            ProviderError::Request {
                dataset: "gis_parcels".into(),
                endpoint: "https://gis.example.gov/parcels/query".into(),
                message: "503".into(),
            },
        );
        let lookup = ParcelLookup {
            address: "a".into(),
            normalized_address: "a".into(),
            variants: vec![],
            jurisdiction: None,
            point: None,
        };
        assert!(matches!(
            fixture.record_lookup(&lookup).await,
            Err(ProviderError::Unavailable { .. })
        ));
        let err = fixture
            .gis_parcels(GeoPoint::new(0.0, 0.0), None)
            .await
            .unwrap_err();
        assert_eq!(err.endpoint(), Some("https://gis.example.gov/parcels/query"));
    }

    #[test]
    fn test_candidate_deserializes_camel_case() {
        let json = r#"{"parcelId":"00-123","source":"record-system","situsAddress":"1500 Marilla St"}"#;
        let candidate: ParcelCandidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.parcel_id.as_deref(), Some("00-123"));
        assert_eq!(candidate.source, ParcelSource::RecordSystem);
    }
}
