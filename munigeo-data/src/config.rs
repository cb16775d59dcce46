//! YAML import configuration.
//!
//! One file describes a whole run: the root municipality, the target
//! reference system, deletion policy, and per-pass source settings. Passes
//! whose section is absent are not run.
//!
//! ```yaml
//! origin_id: "091"
//! workers: 8
//! deletion:
//!   policy: report
//! divisions:
//!   district:
//!     name: District
//!     file: districts.tab
//!     fields:
//!       origin_id: TUNNUS
//!       name:
//!         fi: NIMI
//!         sv: NIMI_SE
//! plans:
//!   municipality: Helsinki
//! ```

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use geo::{Coord, Rect};
use munigeo_core::{DeletionGuard, Srid};
use munigeo_fs::{file_is_file, read_utf8_file, resolve_sibling};
use serde::Deserialize;
use thiserror::Error;

use crate::error::ImportError;
use crate::poi_service::HttpPoiServiceConfig;
use crate::runner::DEFAULT_WORKERS;

/// The Finnish national grid (JHS-180) in ETRS-TM35FIN, used as the land-mask
/// bounding box.
pub const FINNISH_GRID_BBOX: [f64; 4] = [-548_576.0, 6_291_456.0, 1_548_576.0, 8_388_608.0];

/// Division fields that accept a mapping.
pub const DIVISION_FIELDS: [&str; 6] = [
    "origin_id",
    "name",
    "ocd_id",
    "service_point_id",
    "start",
    "end",
];

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {source}")]
    Read {
        /// Configuration path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The configuration path is not a regular file.
    #[error("configuration path {path} is not a file")]
    NotAFile {
        /// Configuration path.
        path: Utf8PathBuf,
    },
    /// The YAML could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// The worker count is zero.
    #[error("workers must be at least 1")]
    ZeroWorkers,
    /// The land-mask bounding box has no area.
    #[error("land mask bounding box {bbox:?} has no area")]
    EmptyBoundingBox {
        /// Configured `[min_x, min_y, max_x, max_y]`.
        bbox: [f64; 4],
    },
}

/// What happens to deletion candidates that pass the guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// Delete the candidates.
    Apply,
    /// List the candidates in the summary without deleting them.
    #[default]
    #[serde(alias = "report")]
    ReportOnly,
}

/// Deletion policy and guard thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// Apply or report deletions.
    pub policy: DeletionPolicy,
    /// Candidates always allowed.
    pub min_absolute: usize,
    /// Share of the snapshot, in percent, allowed to disappear.
    pub max_ratio_percent: usize,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        let guard = DeletionGuard::default();
        Self {
            policy: DeletionPolicy::default(),
            min_absolute: guard.min_absolute,
            max_ratio_percent: guard.max_ratio_percent,
        }
    }
}

impl DeletionConfig {
    /// Guard built from the configured thresholds.
    #[must_use]
    pub const fn guard(&self) -> DeletionGuard {
        DeletionGuard {
            min_absolute: self.min_absolute,
            max_ratio_percent: self.max_ratio_percent,
        }
    }
}

/// Land-mask construction settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LandMaskConfig {
    /// `[min_x, min_y, max_x, max_y]` of the national bounding box.
    pub bbox: [f64; 4],
    /// Reference system of `bbox`.
    pub bbox_srid: Srid,
    /// Reference system of the land polygon dataset.
    pub land_srid: Srid,
}

impl Default for LandMaskConfig {
    fn default() -> Self {
        Self {
            bbox: FINNISH_GRID_BBOX,
            bbox_srid: Srid::ETRS_TM35FIN,
            land_srid: Srid::WGS84,
        }
    }
}

impl LandMaskConfig {
    /// The bounding box as a rectangle.
    #[must_use]
    pub fn rect(&self) -> Rect<f64> {
        let [min_x, min_y, max_x, max_y] = self.bbox;
        Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y })
    }
}

/// Municipality boundary pass settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MunicipalityConfig {
    /// Reference system of features that do not declare one.
    pub srid: Srid,
}

impl Default for MunicipalityConfig {
    fn default() -> Self {
        Self {
            srid: Srid::ETRS_TM35FIN,
        }
    }
}

/// How a division field is read from a feature.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FieldMapping {
    /// A single source attribute.
    Attribute(String),
    /// Language code to source attribute.
    Localized(BTreeMap<String, String>),
}

/// One configured division type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DivisionConfig {
    /// Human-readable type name.
    pub name: String,
    /// Source file, relative to the configuration file.
    pub file: String,
    /// Reference system of the source geometry.
    #[serde(default = "gk25")]
    pub srid: Srid,
    /// Division field to source mapping.
    pub fields: BTreeMap<String, FieldMapping>,
}

impl DivisionConfig {
    /// Check the field mapping before any feature is read.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::MissingFieldMapping`] when `origin_id` is not
    /// mapped, and [`ImportError::UnsupportedField`] for unknown fields or a
    /// per-language mapping on a field other than `name`.
    pub fn validate(&self, type_tag: &str) -> Result<(), ImportError> {
        if !self.fields.contains_key("origin_id") {
            return Err(ImportError::MissingFieldMapping {
                division: type_tag.to_owned(),
                field: "origin_id",
            });
        }
        for (field, mapping) in &self.fields {
            let known = DIVISION_FIELDS.contains(&field.as_str());
            let localizable = field == "name";
            if !known || (matches!(mapping, FieldMapping::Localized(_)) && !localizable) {
                return Err(ImportError::UnsupportedField {
                    division: type_tag.to_owned(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    /// The mapping for `field`, if configured.
    #[must_use]
    pub fn mapping(&self, field: &str) -> Option<&FieldMapping> {
        self.fields.get(field)
    }
}

/// Zoning plan pass settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanConfig {
    /// Name of the municipality that owns the plans.
    pub municipality: String,
    /// File listing plans in effect.
    #[serde(default = "default_in_effect_file")]
    pub in_effect: String,
    /// File listing proposed plans.
    #[serde(default = "default_proposed_file")]
    pub proposed: String,
    /// Reference system of the plan geometry.
    #[serde(default = "gk25")]
    pub srid: Srid,
}

/// Address register pass settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressConfig {
    /// Register file.
    #[serde(default = "default_address_file")]
    pub file: String,
    /// Reference system of the register coordinates.
    #[serde(default = "gk25")]
    pub srid: Srid,
}

/// Remote POI pass settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoiConfig {
    /// Unit listing endpoint.
    #[serde(default = "default_poi_base_url")]
    pub base_url: String,
    /// Reference system of the unit coordinates.
    #[serde(default = "gk25")]
    pub srid: Srid,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl PoiConfig {
    /// HTTP client settings for this pass.
    #[must_use]
    pub fn http_config(&self) -> HttpPoiServiceConfig {
        HttpPoiServiceConfig::new(self.base_url.clone())
            .with_timeout(std::time::Duration::from_secs(self.timeout_secs))
    }
}

/// Settings for one import run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportConfig {
    /// Origin identifier of the municipality owning the division hierarchy.
    pub origin_id: String,
    /// Reference system every stored geometry is expressed in.
    #[serde(default = "tm35fin")]
    pub target_srid: Srid,
    /// Worker threads for concurrent passes.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Language used for names mapped from a single attribute.
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Deletion policy and guard.
    #[serde(default)]
    pub deletion: DeletionConfig,
    /// Land-mask construction.
    #[serde(default)]
    pub land_mask: LandMaskConfig,
    /// Municipality boundary pass.
    #[serde(default)]
    pub municipalities: MunicipalityConfig,
    /// Division types keyed by type tag.
    #[serde(default)]
    pub divisions: BTreeMap<String, DivisionConfig>,
    /// Zoning plan pass.
    #[serde(default)]
    pub plans: Option<PlanConfig>,
    /// Address register pass.
    #[serde(default)]
    pub addresses: Option<AddressConfig>,
    /// Remote POI pass.
    #[serde(default)]
    pub pois: Option<PoiConfig>,
    #[serde(skip)]
    location: Option<Utf8PathBuf>,
}

impl ImportConfig {
    /// Read and validate the configuration file at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or does not validate.
    pub fn load(path: &Utf8Path) -> Result<Self, ImportError> {
        let is_file = file_is_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if !is_file {
            return Err(ConfigError::NotAFile {
                path: path.to_path_buf(),
            }
            .into());
        }
        let text = read_utf8_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_yaml_str(&text)?;
        config.location = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Fails when the YAML is malformed or does not validate.
    pub fn from_yaml_str(text: &str) -> Result<Self, ImportError> {
        let config: Self = serde_yaml::from_str(text).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no pass can run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] variants for global settings and
    /// [`DivisionConfig::validate`] failures for division mappings.
    pub fn validate(&self) -> Result<(), ImportError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers.into());
        }
        let [min_x, min_y, max_x, max_y] = self.land_mask.bbox;
        if min_x >= max_x || min_y >= max_y {
            return Err(ConfigError::EmptyBoundingBox {
                bbox: self.land_mask.bbox,
            }
            .into());
        }
        for (type_tag, division) in &self.divisions {
            division.validate(type_tag)?;
        }
        Ok(())
    }

    /// Resolve a source file named in this configuration.
    ///
    /// Relative names resolve against the directory holding the
    /// configuration file when it was loaded from disk.
    #[must_use]
    pub fn source_path(&self, file: &str) -> Utf8PathBuf {
        let file = Utf8Path::new(file);
        self.location
            .as_deref()
            .map_or_else(|| file.to_path_buf(), |anchor| resolve_sibling(anchor, file))
    }
}

const fn gk25() -> Srid {
    Srid::ETRS_GK25
}

const fn tm35fin() -> Srid {
    Srid::ETRS_TM35FIN
}

const fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_language() -> String {
    String::from("fi")
}

fn default_in_effect_file() -> String {
    String::from("Lv_rajaus.TAB")
}

fn default_proposed_file() -> String {
    String::from("Kaava_vir_rajaus.TAB")
}

fn default_address_file() -> String {
    String::from("pks_osoite.csv")
}

fn default_poi_base_url() -> String {
    HttpPoiServiceConfig::default().base_url
}

const fn default_timeout_secs() -> u64 {
    30
}
