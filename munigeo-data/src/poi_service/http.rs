//! HTTP client for the service unit listing.
//!
//! [`PoiService`] is synchronous so the import passes stay free of async
//! plumbing; the client blocks on an owned Tokio runtime, or on the caller's
//! multi-threaded runtime when one is active. Callers on a current-thread
//! runtime cannot block their own thread on it, so their requests run on a
//! scoped thread driving the owned runtime instead.

use std::thread;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use super::{PoiService, PoiServiceError, ServiceUnit};

/// Default user agent for service requests.
pub const DEFAULT_USER_AGENT: &str = "munigeo-import/0.1";

const DEFAULT_BASE_URL: &str = "http://www.hel.fi/palvelukarttaws/rest/v2/unit/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Error raised while constructing an [`HttpPoiService`].
#[derive(Debug, Error)]
pub enum PoiServiceBuildError {
    /// `reqwest` rejected the client settings.
    #[error("unit listing client could not be built: {0}")]
    HttpClient(#[source] reqwest::Error),
    /// The blocking runtime could not start.
    #[error("unit listing runtime could not start: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Configuration for [`HttpPoiService`].
#[derive(Debug, Clone)]
pub struct HttpPoiServiceConfig {
    /// Unit listing endpoint; the service code is sent as `?service=`.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Sent as `User-Agent` on every listing request.
    pub user_agent: String,
}

impl Default for HttpPoiServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpPoiServiceConfig {
    /// Configuration for the given endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Replace the connect and request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the `User-Agent` header value.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// [`PoiService`] backed by the remote unit listing.
pub struct HttpPoiService {
    client: Client,
    config: HttpPoiServiceConfig,
    runtime: Option<Runtime>,
}

impl Drop for HttpPoiService {
    fn drop(&mut self) {
        // A plain drop panics when the client is released inside an async
        // context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for HttpPoiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPoiService")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpPoiService {
    /// Client for `base_url` with default settings.
    ///
    /// # Errors
    ///
    /// See [`HttpPoiService::with_config`].
    pub fn new(base_url: impl Into<String>) -> Result<Self, PoiServiceBuildError> {
        Self::with_config(HttpPoiServiceConfig::new(base_url))
    }

    /// Client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PoiServiceBuildError`] when the client settings are invalid
    /// or the runtime cannot start.
    pub fn with_config(config: HttpPoiServiceConfig) -> Result<Self, PoiServiceBuildError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(PoiServiceBuildError::HttpClient)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(PoiServiceBuildError::Runtime)?;
        Ok(Self {
            client,
            config,
            runtime: Some(runtime),
        })
    }

    fn listing_url(&self, service_code: u32) -> String {
        format!("{}?service={service_code}", self.config.base_url)
    }

    async fn fetch_async(&self, service_code: u32) -> Result<Vec<ServiceUnit>, PoiServiceError> {
        let url = self.listing_url(service_code);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, &url))?
            .error_for_status()
            .map_err(|err| self.convert_reqwest_error(&err, &url))?;

        response
            .json()
            .await
            .map_err(|err| PoiServiceError::ParseError {
                message: err.to_string(),
            })
    }

    fn block_on_owned(&self, service_code: u32) -> Result<Vec<ServiceUnit>, PoiServiceError> {
        let runtime = self.runtime.as_ref().ok_or_else(|| PoiServiceError::Runtime {
            message: String::from("client runtime has shut down"),
        })?;
        runtime.block_on(self.fetch_async(service_code))
    }

    fn convert_reqwest_error(&self, error: &reqwest::Error, url: &str) -> PoiServiceError {
        if error.is_timeout() {
            return PoiServiceError::Timeout {
                url: url.to_owned(),
                timeout_secs: self.config.timeout.as_secs(),
            };
        }
        if let Some(status) = error.status() {
            return PoiServiceError::HttpError {
                url: url.to_owned(),
                status: status.as_u16(),
                message: error.to_string(),
            };
        }
        PoiServiceError::NetworkError {
            url: url.to_owned(),
            message: error.to_string(),
        }
    }
}

impl PoiService for HttpPoiService {
    fn fetch_units(&self, service_code: u32) -> Result<Vec<ServiceUnit>, PoiServiceError> {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.fetch_async(service_code)))
            }
            Ok(_) => thread::scope(|scope| {
                scope
                    .spawn(|| self.block_on_owned(service_code))
                    .join()
                    .unwrap_or_else(|_| {
                        Err(PoiServiceError::Runtime {
                            message: String::from("unit listing request thread panicked"),
                        })
                    })
            }),
            Err(_) => self.block_on_owned(service_code),
        }
    }
}
