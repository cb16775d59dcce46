//! Deterministic [`PoiService`] for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{PoiService, PoiServiceError, ServiceUnit};

/// Stub service returning canned units per service code.
///
/// Codes without a configured response return an empty listing.
///
/// # Example
///
/// ```
/// use munigeo_data::poi_service::test_support::StubPoiService;
/// use munigeo_data::poi_service::{PoiService, ServiceUnit};
///
/// let service = StubPoiService::new().with_units(25480, vec![ServiceUnit::new(1, "Library")]);
///
/// assert_eq!(service.fetch_units(25480).map(|units| units.len()), Ok(1));
/// assert_eq!(service.fetch_units(25664), Ok(Vec::new()));
/// ```
#[derive(Debug, Default)]
pub struct StubPoiService {
    responses: HashMap<u32, Result<Vec<ServiceUnit>, PoiServiceError>>,
    requests: AtomicUsize,
}

impl StubPoiService {
    /// Stub with no configured responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `units` for `service_code`.
    #[must_use]
    pub fn with_units(mut self, service_code: u32, units: Vec<ServiceUnit>) -> Self {
        self.responses.insert(service_code, Ok(units));
        self
    }

    /// Fail requests for `service_code` with `error`.
    #[must_use]
    pub fn with_error(mut self, service_code: u32, error: PoiServiceError) -> Self {
        self.responses.insert(service_code, Err(error));
        self
    }

    /// Number of listings requested so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl PoiService for StubPoiService {
    fn fetch_units(&self, service_code: u32) -> Result<Vec<ServiceUnit>, PoiServiceError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(&service_code)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
