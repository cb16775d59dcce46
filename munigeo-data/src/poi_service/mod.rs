//! Remote point-of-interest service.
//!
//! The service publishes one JSON array of units per service code.
//! [`HttpPoiService`] fetches them over HTTP; [`test_support::StubPoiService`]
//! returns canned responses.
//!
//! # Example
//!
//! ```no_run
//! use munigeo_data::poi_service::{HttpPoiService, PoiService};
//!
//! let service = HttpPoiService::new("http://www.hel.fi/palvelukarttaws/rest/v2/unit/")?;
//! let libraries = service.fetch_units(25480)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod http;
mod unit;

#[doc(hidden)]
pub mod test_support;

use thiserror::Error;

pub use http::{DEFAULT_USER_AGENT, HttpPoiService, HttpPoiServiceConfig, PoiServiceBuildError};
pub use unit::ServiceUnit;

/// Errors raised while fetching service units.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoiServiceError {
    /// The request did not complete in time.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Requested URL.
        url: String,
        /// Configured timeout.
        timeout_secs: u64,
    },
    /// The service answered with an error status.
    #[error("service returned HTTP {status} for {url}: {message}")]
    HttpError {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
    },
    /// The request could not be sent.
    #[error("network error for {url}: {message}")]
    NetworkError {
        /// Requested URL.
        url: String,
        /// Error description.
        message: String,
    },
    /// The response body was not a unit array.
    #[error("failed to parse service response: {message}")]
    ParseError {
        /// Error description.
        message: String,
    },
    /// The request could not be driven to completion.
    #[error("unit listing runtime failed: {message}")]
    Runtime {
        /// Error description.
        message: String,
    },
}

/// Source of service units for one service code.
pub trait PoiService: Send + Sync {
    /// Every unit published under `service_code`.
    fn fetch_units(&self, service_code: u32) -> Result<Vec<ServiceUnit>, PoiServiceError>;
}
