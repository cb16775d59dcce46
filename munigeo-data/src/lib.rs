//! Import passes for municipal geodata.
//!
//! Responsibilities:
//! - Map source features onto the domain records of `munigeo-core`.
//! - Run each pass over a worker pool and reconcile the results against the
//!   store, proposing unseen records for deletion.
//! - Load the YAML run configuration and fetch remote service units.
//!
//! Boundaries:
//! - Do not parse GIS file formats; drivers supply features through
//!   [`ImportSources`].
//! - Do not own persistence; every write goes through a
//!   [`munigeo_core::RecordStore`] unit of work.
//!
//! Invariants:
//! - A feature's writes and its reconciliation mark commit together or not
//!   at all.
//! - Deletion only follows a pass with no failed features, and only within
//!   the configured guard.

pub mod config;
pub mod error;
pub mod ingest;
pub mod orchestrator;
pub mod poi_service;
pub mod runner;
pub mod sources;

pub use config::{
    AddressConfig, ConfigError, DeletionConfig, DeletionPolicy, DivisionConfig, FieldMapping,
    ImportConfig, LandMaskConfig, MunicipalityConfig, PlanConfig, PoiConfig,
};
pub use error::ImportError;
pub use ingest::{
    AddressIngestor, DeletionCandidate, DivisionIngestor, FeatureIngestor, IngestContext,
    MunicipalityDirectory, MunicipalityIngestor, PlanAccumulator, PlanDraft, PlanIngestor,
    PoiIngestor, ServiceCategory,
};
pub use orchestrator::{DeletionOutcome, ImportOrchestrator, ImportSummary, PassSummary};
pub use poi_service::{
    HttpPoiService, HttpPoiServiceConfig, PoiService, PoiServiceError, ServiceUnit,
};
pub use runner::{
    ConcurrentImportRunner, FeatureFailure, FeatureOutcome, PassReport, SkippedFeature,
};
pub use sources::{FeatureStream, ImportSources, MemorySources, SourceError};
