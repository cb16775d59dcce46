//! Source features handed to the ingestors.
//!
//! File readers and remote adapters turn their rows into [`SourceFeature`]
//! values: a string attribute map, an optional geometry and the reference
//! system the geometry is expressed in.

use std::collections::HashMap;

use geo::Geometry;

use crate::geometry::Srid;

/// A record from an external dataset.
pub trait Feature: Send {
    /// Raw attribute value, if the dataset supplies one.
    fn attribute(&self, name: &str) -> Option<String>;

    /// Geometry carried by the feature.
    fn geometry(&self) -> Option<&Geometry<f64>>;

    /// Reference system of [`Feature::geometry`], when the source declares one.
    fn srid(&self) -> Option<Srid>;
}

/// Owned feature built by source adapters and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFeature {
    attributes: HashMap<String, String>,
    geometry: Option<Geometry<f64>>,
    srid: Option<Srid>,
}

impl SourceFeature {
    /// An empty feature.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Attach a geometry.
    #[must_use]
    pub fn with_geometry(mut self, geometry: impl Into<Geometry<f64>>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }

    /// Declare the reference system of the geometry.
    #[must_use]
    pub const fn with_srid(mut self, srid: Srid) -> Self {
        self.srid = Some(srid);
        self
    }

    /// Take ownership of the geometry, leaving `None` behind.
    pub fn take_geometry(&mut self) -> Option<Geometry<f64>> {
        self.geometry.take()
    }
}

impl Feature for SourceFeature {
    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    fn geometry(&self) -> Option<&Geometry<f64>> {
        self.geometry.as_ref()
    }

    fn srid(&self) -> Option<Srid> {
        self.srid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;
    use rstest::rstest;

    #[rstest]
    fn builder_sets_every_part() {
        let feature = SourceFeature::new()
            .with_attribute("nationalCode", "091")
            .with_geometry(Point::new(1.0, 2.0))
            .with_srid(Srid::ETRS_GK25);

        assert_eq!(feature.attribute("nationalCode").as_deref(), Some("091"));
        assert_eq!(feature.attribute("text"), None);
        assert_eq!(feature.geometry(), Some(&Geometry::Point(Point::new(1.0, 2.0))));
        assert_eq!(feature.srid(), Some(Srid::ETRS_GK25));
    }
}
