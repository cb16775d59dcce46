//! Remote service units to points of interest.

use geo::Point;
use log::{debug, info};
use munigeo_core::{
    DeletionGuard, Poi, PoiCategory, RecordId, RecordStoreExt, Scope, Srid, SyncError, SyncSet,
};

use super::{
    DeletionCandidate, FeatureIngestor, IngestContext, MunicipalityDirectory, commit_feature,
    persisted_id, unseen_candidates,
};
use crate::error::ImportError;
use crate::poi_service::ServiceUnit;
use crate::runner::FeatureOutcome;

/// A service listing imported as one POI category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCategory {
    /// Code sent to the service as `?service=`.
    pub service_code: u32,
    /// Category type tag.
    pub type_tag: &'static str,
    /// Human-readable category description.
    pub description: &'static str,
}

/// Service listings imported by the POI pass, in import order.
pub const SERVICE_CATEGORY_MAP: [ServiceCategory; 5] = [
    ServiceCategory {
        service_code: 25480,
        type_tag: "library",
        description: "Library",
    },
    ServiceCategory {
        service_code: 28148,
        type_tag: "swimming_pool",
        description: "Swimming pool",
    },
    ServiceCategory {
        service_code: 25402,
        type_tag: "toilet",
        description: "Toilet",
    },
    ServiceCategory {
        service_code: 25344,
        type_tag: "recycling",
        description: "Recycling point",
    },
    ServiceCategory {
        service_code: 25664,
        type_tag: "park",
        description: "Park",
    },
];

/// Municipality implied by a capital-region postal code.
///
/// Used when a unit names a city that is not a known municipality.
///
/// # Examples
/// ```
/// use munigeo_data::ingest::municipality_from_postal_code;
///
/// assert_eq!(municipality_from_postal_code("00100"), Some("Helsinki"));
/// assert_eq!(municipality_from_postal_code("02700"), Some("Kauniainen"));
/// assert_eq!(municipality_from_postal_code("33100"), None);
/// ```
#[must_use]
pub fn municipality_from_postal_code(zip: &str) -> Option<&'static str> {
    if zip.starts_with("00") {
        Some("Helsinki")
    } else if zip.starts_with("01") {
        Some("Vantaa")
    } else if matches!(zip, "02700" | "02701" | "02760") {
        Some("Kauniainen")
    } else if zip.starts_with("02") {
        Some("Espoo")
    } else {
        None
    }
}

/// Imports the units of one service listing.
pub struct PoiIngestor<'a> {
    ctx: IngestContext<'a>,
    srid: Srid,
    directory: &'a MunicipalityDirectory,
    category: RecordId,
    service: ServiceCategory,
    sync: SyncSet<Poi, String>,
}

impl std::fmt::Debug for PoiIngestor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoiIngestor")
            .field("service", &self.service)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl<'a> PoiIngestor<'a> {
    /// Ensure the category exists and snapshot its POIs.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn new(
        ctx: IngestContext<'a>,
        service: ServiceCategory,
        directory: &'a MunicipalityDirectory,
        srid: Srid,
    ) -> Result<Self, ImportError> {
        let category = ctx.store.get_or_create(
            &Scope::global(),
            |c: &PoiCategory| c.type_tag == service.type_tag,
            || PoiCategory::new(service.type_tag, service.description),
        )?;
        let category = persisted_id(&category)?;
        let existing = ctx.store.fetch_all::<Poi>(&Scope::of(category))?;
        debug!("Loaded {} stored {} POIs", existing.len(), service.type_tag);
        Ok(Self {
            ctx,
            srid,
            directory,
            category,
            service,
            sync: SyncSet::new(existing, |poi: &Poi| poi.origin_id.clone()),
        })
    }

    /// Reconciliation state of the pass.
    #[must_use]
    pub const fn sync(&self) -> &SyncSet<Poi, String> {
        &self.sync
    }

    fn resolve_municipality(&self, unit: &ServiceUnit, city: &str) -> Option<RecordId> {
        if let Some(municipality) = self.directory.get(city) {
            return municipality.id;
        }
        let zip = unit.address_zip.as_deref().unwrap_or_default();
        let name = municipality_from_postal_code(zip)?;
        info!(
            "{}: {} ({city}) reassigned to {name} by postal code {zip}",
            unit.id, unit.name_fi
        );
        self.directory.get(name).and_then(|municipality| municipality.id)
    }
}

impl FeatureIngestor for PoiIngestor<'_> {
    type Input = ServiceUnit;

    fn ingest(&self, unit: Self::Input) -> Result<FeatureOutcome, ImportError> {
        let Some(city) = unit.address_city_fi.as_deref().filter(|city| !city.is_empty()) else {
            return Ok(FeatureOutcome::Skipped(format!("unit {} has no city", unit.id)));
        };
        let Some(municipality) = self.resolve_municipality(&unit, city) else {
            return Ok(FeatureOutcome::Skipped(format!(
                "unit {} is in unknown city {city:?}",
                unit.id
            )));
        };
        let coordinates = (unit.northing_etrs_gk25, unit.easting_etrs_gk25);
        let (Some(northing), Some(easting)) = coordinates else {
            return Ok(FeatureOutcome::Skipped(format!("unit {} has no location", unit.id)));
        };
        let location = self
            .ctx
            .projector
            .reproject_point(Point::new(easting, northing), self.srid)?;

        let origin_id = unit.id.to_string();
        let mut poi = self.sync.lookup(&origin_id).unwrap_or_else(|| Poi {
            id: None,
            origin_id,
            category: self.category,
            name: String::new(),
            location,
            street_address: None,
            zip_code: None,
            municipality,
        });
        poi.name = unit.name_fi;
        poi.location = location;
        poi.street_address = unit.street_address_fi;
        poi.zip_code = unit.address_zip;
        poi.municipality = municipality;

        let id = commit_feature(&self.ctx, &self.sync, &mut poi, |store_unit, poi| {
            store_unit.save_record(poi)?;
            Ok(())
        })?;
        Ok(FeatureOutcome::Committed(id))
    }

    fn deletion_candidates(
        &self,
        guard: DeletionGuard,
    ) -> Result<Vec<DeletionCandidate>, SyncError> {
        unseen_candidates(&self.sync, guard, |poi| poi.origin_id.clone())
    }
}
