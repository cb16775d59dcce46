//! Core domain types for the municipal geodata importers.
//!
//! This crate owns the pieces every import pass shares: the domain entities,
//! the record store seam, the [`SyncSet`] reconciliation engine and the
//! [`GeometryProjector`] that prepares boundaries for storage. Source
//! parsing and pass orchestration live in `munigeo-data`.

pub mod feature;
pub mod geometry;
pub mod model;
pub mod record;
pub mod store;
pub mod sync;
pub mod text;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use feature::{Feature, SourceFeature};
pub use geometry::{
    GeometryError, GeometryProjector, LandMask, ProjectionError, Reprojector, Srid,
    geometry_kind, normalize_to_multipolygon,
};
pub use model::{
    Address, AddressKey, AdministrativeDivision, AdministrativeDivisionGeometry,
    AdministrativeDivisionType, Municipality, Plan, Poi, PoiCategory, Translations,
};
pub use record::{Record, RecordId, Scope, StoredRecord};
#[cfg(feature = "store-sqlite")]
pub use store::SqliteRecordStore;
pub use store::{RecordStore, RecordStoreExt, StoreError, UnitOfWork};
pub use sync::{DeletionGuard, SyncError, SyncSet};
pub use text::fix_capitalization;
