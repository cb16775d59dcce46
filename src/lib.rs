//! Facade crate for the municipal geodata importers.
//!
//! This crate re-exports the domain types, the reconciliation engine and the
//! import orchestrator. The SQLite store is available behind the
//! `store-sqlite` feature.

#![forbid(unsafe_code)]

pub use munigeo_core::{
    Address, AdministrativeDivision, DeletionGuard, GeometryProjector, LandMask, Municipality,
    Plan, Poi, PoiCategory, RecordStore, Reprojector, SourceFeature, Srid, SyncError, SyncSet,
};

#[cfg(feature = "store-sqlite")]
pub use munigeo_core::SqliteRecordStore;

pub use munigeo_data::{
    DeletionOutcome, DeletionPolicy, ImportConfig, ImportError, ImportOrchestrator, ImportSources,
    ImportSummary, PassSummary,
};
