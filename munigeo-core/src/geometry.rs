//! Reprojection, multipolygon normalisation and land-mask clipping.
//!
//! The coordinate transform itself is supplied by the caller through the
//! [`Reprojector`] trait; this module applies it to whole geometries and owns
//! the storage-shape rules (everything with an area is stored as a
//! multipolygon).

use std::fmt;
use std::sync::Arc;

use geo::{BooleanOps, Coord, Geometry, MapCoords, MultiPolygon, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// EPSG spatial reference identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Srid(pub u32);

impl Srid {
    /// WGS 84 geographic coordinates.
    pub const WGS84: Self = Self(4326);
    /// ETRS89 / TM35FIN, the Finnish national grid.
    pub const ETRS_TM35FIN: Self = Self(3067);
    /// ETRS89 / GK25FIN, the Helsinki-region plane grid.
    pub const ETRS_GK25: Self = Self(3879);
}

impl fmt::Display for Srid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// Failures reported by a [`Reprojector`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectionError {
    /// The reprojector has no transform between the two systems.
    #[error("no transform from {from} to {to}")]
    Unsupported {
        /// Source reference system.
        from: Srid,
        /// Target reference system.
        to: Srid,
    },
    /// The coordinate lies outside the valid area of the source system.
    #[error("coordinate ({x}, {y}) is outside the domain of {from}")]
    OutOfDomain {
        /// Source reference system.
        from: Srid,
        /// Offending easting or longitude.
        x: f64,
        /// Offending northing or latitude.
        y: f64,
    },
}

/// Coordinate transform between reference systems.
///
/// Implementations must be pure: the same input always yields the same
/// output, and they are shared across import workers.
pub trait Reprojector: Send + Sync {
    /// Transform one coordinate from `from` to `to`.
    fn reproject_coord(
        &self,
        coord: Coord<f64>,
        from: Srid,
        to: Srid,
    ) -> Result<Coord<f64>, ProjectionError>;
}

/// Errors raised while preparing geometry for storage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Only polygons and multipolygons can become boundaries.
    #[error("expected a polygon or multipolygon, found {kind}")]
    InvalidGeometryKind {
        /// Name of the geometry variant that was supplied.
        kind: &'static str,
    },
    /// The feature carried no geometry.
    #[error("feature has no geometry")]
    MissingGeometry,
    /// The coordinate transform failed.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Name of the geometry variant, for diagnostics.
#[must_use]
pub const fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Wrap a polygon in a one-member multipolygon; pass multipolygons through.
///
/// # Errors
///
/// Returns [`GeometryError::InvalidGeometryKind`] for any other geometry.
///
/// # Examples
/// ```
/// use geo::{Geometry, polygon};
/// use munigeo_core::normalize_to_multipolygon;
///
/// let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
/// let multi = normalize_to_multipolygon(Geometry::Polygon(square)).unwrap();
/// assert_eq!(multi.0.len(), 1);
/// ```
pub fn normalize_to_multipolygon(
    geometry: Geometry<f64>,
) -> Result<MultiPolygon<f64>, GeometryError> {
    match geometry {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Ok(multi),
        other => Err(GeometryError::InvalidGeometryKind {
            kind: geometry_kind(&other),
        }),
    }
}

/// Reprojects geometries into one target reference system.
#[derive(Clone)]
pub struct GeometryProjector {
    reprojector: Arc<dyn Reprojector>,
    target: Srid,
}

impl fmt::Debug for GeometryProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryProjector")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl GeometryProjector {
    /// Projector writing into `target` using the supplied transform.
    pub fn new(reprojector: impl Reprojector + 'static, target: Srid) -> Self {
        Self::from_shared(Arc::new(reprojector), target)
    }

    /// Projector sharing an existing transform.
    #[must_use]
    pub fn from_shared(reprojector: Arc<dyn Reprojector>, target: Srid) -> Self {
        Self {
            reprojector,
            target,
        }
    }

    /// The reference system every output is expressed in.
    #[must_use]
    pub const fn target(&self) -> Srid {
        self.target
    }

    /// Reproject `geometry` from `source` into the target system.
    ///
    /// The input is left untouched; identical systems return a copy.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Projection`] when any coordinate fails.
    pub fn reproject(
        &self,
        geometry: &Geometry<f64>,
        source: Srid,
    ) -> Result<Geometry<f64>, GeometryError> {
        self.reproject_between(geometry, source, self.target)
    }

    /// Reproject `geometry` between two arbitrary systems.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Projection`] when any coordinate fails.
    pub fn reproject_between(
        &self,
        geometry: &Geometry<f64>,
        from: Srid,
        to: Srid,
    ) -> Result<Geometry<f64>, GeometryError> {
        if from == to {
            return Ok(geometry.clone());
        }
        let reprojector = &*self.reprojector;
        let projected =
            geometry.try_map_coords(move |coord| reprojector.reproject_coord(coord, from, to))?;
        Ok(projected)
    }

    /// Reproject a single point into the target system.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Projection`] when the transform fails.
    pub fn reproject_point(
        &self,
        point: Point<f64>,
        source: Srid,
    ) -> Result<Point<f64>, GeometryError> {
        if source == self.target {
            return Ok(point);
        }
        let coord = self
            .reprojector
            .reproject_coord(point.0, source, self.target)?;
        Ok(Point(coord))
    }

    /// Reproject into the target system and normalise to a multipolygon.
    ///
    /// # Errors
    ///
    /// Fails for non-areal geometries and transform failures.
    pub fn project_boundary(
        &self,
        geometry: &Geometry<f64>,
        source: Srid,
    ) -> Result<MultiPolygon<f64>, GeometryError> {
        normalize_to_multipolygon(self.reproject(geometry, source)?)
    }
}

/// Precomputed land area used to strip open-sea artefacts from boundaries.
///
/// Built once per run and shared read-only between workers.
#[derive(Debug, Clone, PartialEq)]
pub struct LandMask {
    area: MultiPolygon<f64>,
    srid: Srid,
}

impl LandMask {
    /// Intersect a national bounding box with global land polygons and
    /// express the result in the projector's target system.
    ///
    /// The bounding box is reprojected into the land dataset's system first,
    /// so the intersection runs where the land polygons are exact.
    ///
    /// # Errors
    ///
    /// Propagates transform failures.
    pub fn build(
        bbox: Rect<f64>,
        bbox_srid: Srid,
        land: &MultiPolygon<f64>,
        land_srid: Srid,
        projector: &GeometryProjector,
    ) -> Result<Self, GeometryError> {
        let frame = projector.reproject_between(
            &Geometry::Polygon(bbox.to_polygon()),
            bbox_srid,
            land_srid,
        )?;
        let frame = normalize_to_multipolygon(frame)?;
        let clipped = frame.intersection(land);
        let area = normalize_to_multipolygon(
            projector.reproject(&Geometry::MultiPolygon(clipped), land_srid)?,
        )?;
        Ok(Self {
            area,
            srid: projector.target(),
        })
    }

    /// Wrap an already computed mask.
    #[must_use]
    pub const fn from_area(area: MultiPolygon<f64>, srid: Srid) -> Self {
        Self { area, srid }
    }

    /// The mask polygons.
    #[must_use]
    pub const fn area(&self) -> &MultiPolygon<f64> {
        &self.area
    }

    /// Reference system of the mask.
    #[must_use]
    pub const fn srid(&self) -> Srid {
        self.srid
    }

    /// Clip an areal geometry to the land mask.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::InvalidGeometryKind`] for non-areal input.
    pub fn intersect(&self, geometry: &Geometry<f64>) -> Result<MultiPolygon<f64>, GeometryError> {
        match geometry {
            Geometry::Polygon(polygon) => Ok(self.clip_polygon(polygon)),
            Geometry::MultiPolygon(multi) => Ok(multi.intersection(&self.area)),
            other => Err(GeometryError::InvalidGeometryKind {
                kind: geometry_kind(other),
            }),
        }
    }

    fn clip_polygon(&self, polygon: &Polygon<f64>) -> MultiPolygon<f64> {
        polygon.intersection(&self.area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingReprojector, OffsetReprojector};
    use geo::{Area, LineString, polygon};
    use rstest::{fixture, rstest};

    fn square(min: f64, max: f64) -> Polygon<f64> {
        polygon![
            (x: min, y: min),
            (x: max, y: min),
            (x: max, y: max),
            (x: min, y: max),
        ]
    }

    #[fixture]
    fn identity() -> GeometryProjector {
        GeometryProjector::new(OffsetReprojector::default(), Srid::ETRS_TM35FIN)
    }

    #[rstest]
    fn polygon_becomes_single_member_multipolygon() {
        let multi = normalize_to_multipolygon(Geometry::Polygon(square(0.0, 1.0))).expect("polygon");
        assert_eq!(multi.0.len(), 1);
    }

    #[rstest]
    fn multipolygon_passes_through() {
        let input = MultiPolygon::new(vec![square(0.0, 1.0), square(2.0, 3.0)]);
        let multi = normalize_to_multipolygon(Geometry::MultiPolygon(input.clone())).expect("multi");
        assert_eq!(multi, input);
    }

    #[rstest]
    #[case(Geometry::Point(Point::new(1.0, 2.0)), "Point")]
    #[case(Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)])), "LineString")]
    fn other_kinds_are_rejected(#[case] geometry: Geometry<f64>, #[case] kind: &'static str) {
        let err = normalize_to_multipolygon(geometry).expect_err("not areal");
        assert_eq!(err, GeometryError::InvalidGeometryKind { kind });
    }

    #[rstest]
    fn reprojection_leaves_input_untouched() {
        let projector = GeometryProjector::new(OffsetReprojector::new(1.0), Srid(10));
        let input = Geometry::Point(Point::new(1.0, 1.0));

        let output = projector.reproject(&input, Srid(8)).expect("reproject");

        assert_eq!(input, Geometry::Point(Point::new(1.0, 1.0)));
        assert_eq!(output, Geometry::Point(Point::new(3.0, 3.0)));
    }

    #[rstest]
    fn same_system_skips_transform() {
        let projector = GeometryProjector::new(FailingReprojector, Srid::ETRS_TM35FIN);
        let input = Geometry::Polygon(square(0.0, 1.0));

        let output = projector
            .reproject(&input, Srid::ETRS_TM35FIN)
            .expect("no transform needed");

        assert_eq!(output, input);
    }

    #[rstest]
    fn transform_failure_is_reported() {
        let projector = GeometryProjector::new(FailingReprojector, Srid::ETRS_TM35FIN);

        let err = projector
            .reproject_point(Point::new(0.0, 0.0), Srid::ETRS_GK25)
            .expect_err("transform fails");

        assert!(matches!(err, GeometryError::Projection(ProjectionError::Unsupported { .. })));
    }

    #[rstest]
    fn land_mask_is_bbox_intersected_with_land(identity: GeometryProjector) {
        let bbox = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 10.0 });
        let land = MultiPolygon::new(vec![polygon![
            (x: 5.0, y: -5.0),
            (x: 15.0, y: -5.0),
            (x: 15.0, y: 15.0),
            (x: 5.0, y: 15.0),
        ]]);

        let mask = LandMask::build(bbox, Srid::ETRS_TM35FIN, &land, Srid::WGS84, &identity)
            .expect("mask");

        assert!((mask.area().unsigned_area() - 50.0).abs() < 1e-9);
        assert_eq!(mask.srid(), Srid::ETRS_TM35FIN);
    }

    #[rstest]
    fn boundaries_are_clipped_to_land() {
        let mask = LandMask::from_area(MultiPolygon::new(vec![square(0.0, 2.0)]), Srid::ETRS_TM35FIN);

        let clipped = mask
            .intersect(&Geometry::Polygon(square(1.0, 3.0)))
            .expect("clip");

        assert!((clipped.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[rstest]
    fn land_mask_rejects_points() {
        let mask = LandMask::from_area(MultiPolygon::new(vec![square(0.0, 2.0)]), Srid::ETRS_TM35FIN);

        let err = mask
            .intersect(&Geometry::Point(Point::new(1.0, 1.0)))
            .expect_err("points have no area");

        assert_eq!(err, GeometryError::InvalidGeometryKind { kind: "Point" });
    }
}
