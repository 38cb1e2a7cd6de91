//! Parcel resolution for address topics.
//!
//! Resolves one property parcel through three injected provider calls so the
//! same workflow runs against live portals or fixtures.

pub mod geometry;
pub mod providers;
pub mod resolve;

pub use geometry::{BoundingBox, GeoPoint, Geometry};
pub use providers::{
    CachingGeocoder, FixtureProviders, GeocodeRequest, GeocodeResult, Jurisdiction,
    ParcelCandidate, ParcelDataset, ParcelFeature, ParcelLookup, ParcelProviders, ParcelSource,
};
pub use resolve::{
    Parcel, ParcelRequest, ParcelResolution, PropertySubject, dedupe_candidates,
    normalize_parcel_id, resolve_parcel,
};
