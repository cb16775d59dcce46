//! Feature sources supplied by the import driver.
//!
//! Format readers live outside this crate. A driver opens each dataset and
//! hands the orchestrator a lazy, single-pass stream of [`SourceFeature`]
//! values per pass.

use std::collections::HashMap;
use std::error::Error as StdError;

use camino::{Utf8Path, Utf8PathBuf};
use geo::MultiPolygon;
use munigeo_core::SourceFeature;

/// Error raised by a driver while opening a dataset.
pub type SourceError = Box<dyn StdError + Send + Sync>;

/// Lazy stream of features from one dataset.
pub type FeatureStream<'s> = Box<dyn Iterator<Item = SourceFeature> + 's>;

/// Datasets consumed by the file-backed passes.
///
/// Paths are resolved against the configuration file before they reach the
/// source.
pub trait ImportSources {
    /// Global land polygons used to build the land mask.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when the dataset cannot be read.
    fn land_polygons(&self) -> Result<MultiPolygon<f64>, SourceError>;

    /// National administrative boundary units, every hierarchy level.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when the dataset cannot be opened.
    fn municipality_features(&self) -> Result<FeatureStream<'_>, SourceError>;

    /// Features of one configured division file.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when the file cannot be opened.
    fn division_features(&self, path: &Utf8Path) -> Result<FeatureStream<'_>, SourceError>;

    /// Rows of one zoning plan file.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when the file cannot be opened.
    fn plan_features(&self, path: &Utf8Path) -> Result<FeatureStream<'_>, SourceError>;

    /// Rows of the address register.
    ///
    /// # Errors
    ///
    /// Returns the driver's error when the file cannot be opened.
    fn address_features(&self, path: &Utf8Path) -> Result<FeatureStream<'_>, SourceError>;
}

/// Preloaded datasets keyed by path.
///
/// Useful for drivers that parse everything up front and for tests. Paths
/// with no registered features fail as missing files.
#[derive(Debug, Clone)]
pub struct MemorySources {
    land: MultiPolygon<f64>,
    municipalities: Vec<SourceFeature>,
    files: HashMap<Utf8PathBuf, Vec<SourceFeature>>,
}

impl Default for MemorySources {
    fn default() -> Self {
        Self {
            land: MultiPolygon::new(Vec::new()),
            municipalities: Vec::new(),
            files: HashMap::new(),
        }
    }
}

impl MemorySources {
    /// Sources with no data.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the land polygons.
    #[must_use]
    pub fn with_land(mut self, land: impl Into<MultiPolygon<f64>>) -> Self {
        self.land = land.into();
        self
    }

    /// Set the national boundary features.
    #[must_use]
    pub fn with_municipalities(mut self, features: Vec<SourceFeature>) -> Self {
        self.municipalities = features;
        self
    }

    /// Register the features read from `path`.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<Utf8PathBuf>, features: Vec<SourceFeature>) -> Self {
        self.files.insert(path.into(), features);
        self
    }

    /// Replace the features of `path` in place.
    pub fn set_file(&mut self, path: impl Into<Utf8PathBuf>, features: Vec<SourceFeature>) {
        self.files.insert(path.into(), features);
    }

    fn file(&self, path: &Utf8Path) -> Result<FeatureStream<'_>, SourceError> {
        let features = self
            .files
            .get(path)
            .ok_or_else(|| format!("no such file: {path}"))?;
        Ok(Box::new(features.iter().cloned()))
    }
}

impl ImportSources for MemorySources {
    fn land_polygons(&self) -> Result<MultiPolygon<f64>, SourceError> {
        Ok(self.land.clone())
    }

    fn municipality_features(&self) -> Result<FeatureStream<'_>, SourceError> {
        Ok(Box::new(self.municipalities.iter().cloned()))
    }

    fn division_features(&self, path: &Utf8Path) -> Result<FeatureStream<'_>, SourceError> {
        self.file(path)
    }

    fn plan_features(&self, path: &Utf8Path) -> Result<FeatureStream<'_>, SourceError> {
        self.file(path)
    }

    fn address_features(&self, path: &Utf8Path) -> Result<FeatureStream<'_>, SourceError> {
        self.file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn registered_files_stream_their_features() {
        let sources = MemorySources::new().with_file(
            "plans/Lv_rajaus.TAB",
            vec![SourceFeature::new().with_attribute("kaavatunnus", "0123")],
        );

        let features: Vec<_> = sources
            .plan_features(Utf8Path::new("plans/Lv_rajaus.TAB"))
            .expect("registered")
            .collect();

        assert_eq!(features.len(), 1);
    }

    #[rstest]
    fn unknown_files_fail_to_open() {
        let sources = MemorySources::new();

        let err = sources
            .address_features(Utf8Path::new("pks_osoite.csv"))
            .err()
            .expect("missing file");

        assert!(err.to_string().contains("pks_osoite.csv"));
    }
}
