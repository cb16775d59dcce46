//! Error type shared by every import pass.

use std::error::Error as StdError;

use munigeo_core::{GeometryError, ProjectionError, StoreError, SyncError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::poi_service::{PoiServiceBuildError, PoiServiceError};

/// Errors raised while importing one pass.
///
/// [`ImportError::is_fatal`] separates failures that abort the pass from
/// per-feature data problems that are collected and reported.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Reconciliation failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// A geometry could not be prepared for storage.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// The record store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The import configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The remote POI service failed.
    #[error(transparent)]
    PoiService(#[from] PoiServiceError),
    /// The HTTP client for the POI service could not be built.
    #[error(transparent)]
    PoiClient(#[from] PoiServiceBuildError),
    /// A municipality label did not match `(2:<fi>,<sv>)`.
    #[error("municipality label {label:?} does not match (2:<fi>,<sv>)")]
    UnparsableLabel {
        /// The raw label text.
        label: String,
    },
    /// A division configuration omits a required field mapping.
    #[error("division {division} does not map required field {field}")]
    MissingFieldMapping {
        /// Division type tag from the configuration.
        division: String,
        /// Name of the missing field.
        field: &'static str,
    },
    /// A division configuration maps a field divisions do not have.
    #[error("division {division} maps unsupported field {field}")]
    UnsupportedField {
        /// Division type tag from the configuration.
        division: String,
        /// Name of the unsupported field.
        field: String,
    },
    /// The feature has no usable origin identifier.
    #[error("feature has no value for identifier attribute {attribute}")]
    MissingIdentifier {
        /// Attribute expected to carry the identifier.
        attribute: String,
    },
    /// An attribute value could not be interpreted.
    #[error("attribute {attribute} has invalid value {value:?}: {reason}")]
    InvalidAttribute {
        /// Attribute name.
        attribute: String,
        /// Raw value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// A named municipality does not exist in the store.
    #[error("municipality {name} is not in the store")]
    UnknownMunicipality {
        /// Name or origin identifier that was looked up.
        name: String,
    },
    /// A feature source supplied by the driver failed.
    #[error("feature source {name} failed: {source}")]
    Source {
        /// Name of the source, e.g. the file being read.
        name: String,
        /// Driver supplied error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// The worker pool could not be started.
    #[error("failed to build import worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl ImportError {
    /// Whether the error aborts the whole pass rather than one feature.
    ///
    /// Store errors are fatal only when they concern the connection; a write
    /// the store rejects inside one feature's unit of work rolls back that
    /// feature alone.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Store(err) => err.is_connection_failure(),
            Self::Sync(SyncError::DuplicateMark { .. })
            | Self::Config(_)
            | Self::PoiService(_)
            | Self::PoiClient(_)
            | Self::MissingFieldMapping { .. }
            | Self::UnsupportedField { .. }
            | Self::UnknownMunicipality { .. }
            | Self::Source { .. }
            | Self::WorkerPool(_) => true,
            Self::Sync(SyncError::ExcessiveDeletion { .. })
            | Self::Geometry(_)
            | Self::UnparsableLabel { .. }
            | Self::MissingIdentifier { .. }
            | Self::InvalidAttribute { .. } => false,
        }
    }

    pub(crate) fn invalid_attribute(
        attribute: &str,
        value: &str,
        reason: impl ToString,
    ) -> Self {
        Self::InvalidAttribute {
            attribute: attribute.to_owned(),
            value: value.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<ProjectionError> for ImportError {
    fn from(err: ProjectionError) -> Self {
        Self::Geometry(GeometryError::Projection(err))
    }
}
