//! National boundary dataset to municipalities.

use std::sync::LazyLock;

use geo::MultiPolygon;
use log::debug;
use munigeo_core::{
    AdministrativeDivision, AdministrativeDivisionType, DeletionGuard, Feature, LandMask,
    Municipality, RecordId, RecordStoreExt, Scope, SourceFeature, Srid, SyncError, SyncSet,
    UnitOfWork,
};
use regex::Regex;

use super::{
    DeletionCandidate, FeatureIngestor, IngestContext, attribute, commit_feature, feature_geometry,
    persisted_id, required_attribute, save_division_geometry, unseen_candidates,
};
use crate::error::ImportError;
use crate::runner::FeatureOutcome;

/// Hierarchy level of the units imported as municipalities.
pub const MUNICIPALITY_LEVEL: &str = "4thOrder";

#[expect(clippy::expect_used, reason = "the pattern is a literal covered by unit tests")]
static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\(2:([\w\s:-]+),([\w\s:-]+)\)").expect("municipality label pattern")
});

/// Split a `(2:<fi>,<sv>)` label into its Finnish and Swedish names.
///
/// # Errors
///
/// Returns [`ImportError::UnparsableLabel`] when the label does not match.
///
/// # Examples
/// ```
/// use munigeo_data::ingest::parse_municipality_label;
///
/// let (fi, sv) = parse_municipality_label("(2:Helsinki,Helsingfors)").unwrap();
/// assert_eq!((fi.as_str(), sv.as_str()), ("Helsinki", "Helsingfors"));
/// ```
pub fn parse_municipality_label(label: &str) -> Result<(String, String), ImportError> {
    let captures = LABEL
        .captures(label)
        .ok_or_else(|| ImportError::UnparsableLabel {
            label: label.to_owned(),
        })?;
    Ok((captures[1].to_owned(), captures[2].to_owned()))
}

/// Imports 4th-order administrative units as municipalities.
///
/// Each municipality also owns a division of type `muni` carrying its
/// boundary, clipped to the land mask so coastal municipalities do not
/// extend into open sea.
pub struct MunicipalityIngestor<'a> {
    ctx: IngestContext<'a>,
    land_mask: &'a LandMask,
    srid: Srid,
    division_type: RecordId,
    sync: SyncSet<Municipality, String>,
}

impl std::fmt::Debug for MunicipalityIngestor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MunicipalityIngestor")
            .field("srid", &self.srid)
            .field("division_type", &self.division_type)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl<'a> MunicipalityIngestor<'a> {
    /// Snapshot every stored municipality and ensure the `muni` division
    /// type exists.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn new(
        ctx: IngestContext<'a>,
        land_mask: &'a LandMask,
        srid: Srid,
    ) -> Result<Self, ImportError> {
        let tag = AdministrativeDivisionType::MUNICIPALITY;
        let division_type = ctx.store.get_or_create(
            &Scope::global(),
            |t: &AdministrativeDivisionType| t.type_tag == tag,
            || AdministrativeDivisionType::new(tag, "Municipality"),
        )?;
        let existing = ctx.store.fetch_all::<Municipality>(&Scope::global())?;
        debug!("Loaded {} stored municipalities", existing.len());
        Ok(Self {
            ctx,
            land_mask,
            srid,
            division_type: persisted_id(&division_type)?,
            sync: SyncSet::new(existing, |m: &Municipality| m.origin_id.clone()),
        })
    }

    /// Whether `feature` sits at the municipality level of the hierarchy.
    pub fn accepts(feature: &impl Feature) -> bool {
        feature.attribute("nationalLevel").as_deref() == Some(MUNICIPALITY_LEVEL)
    }

    /// Reconciliation state of the pass.
    #[must_use]
    pub const fn sync(&self) -> &SyncSet<Municipality, String> {
        &self.sync
    }

    fn save(
        &self,
        unit: &mut (dyn UnitOfWork + '_),
        municipality: &mut Municipality,
        boundary: MultiPolygon<f64>,
    ) -> Result<(), ImportError> {
        let municipality_id = unit.save_record(municipality)?;

        let linked = match municipality.division {
            Some(id) => unit.get_record::<AdministrativeDivision>(id)?,
            None => None,
        };
        let existing = match linked {
            Some(division) => Some(division),
            None => unit
                .filter_records::<AdministrativeDivision>(&AdministrativeDivision::scope_for(
                    None,
                    self.division_type,
                ))?
                .into_iter()
                .find(|division| division.origin_id == municipality.origin_id),
        };
        let mut division = existing.unwrap_or_else(|| {
            AdministrativeDivision::new(&municipality.origin_id, self.division_type, None)
        });
        division.name = municipality.name.clone();
        division.municipality = Some(municipality_id);
        let division_id = unit.save_record(&mut division)?;
        save_division_geometry(unit, division_id, boundary)?;

        if municipality.division != Some(division_id) {
            municipality.division = Some(division_id);
            unit.save_record(municipality)?;
        }
        Ok(())
    }
}

impl FeatureIngestor for MunicipalityIngestor<'_> {
    type Input = SourceFeature;

    fn ingest(&self, feature: Self::Input) -> Result<FeatureOutcome, ImportError> {
        let origin_id = required_attribute(&feature, "nationalCode")?;
        let label = attribute(&feature, "text").unwrap_or_default();
        let (name_fi, name_sv) = parse_municipality_label(&label)?;

        let (geometry, srid) = feature_geometry(&feature, self.srid)?;
        let projected = self.ctx.projector.reproject(geometry, srid)?;
        let boundary = self.land_mask.intersect(&projected)?;

        let mut municipality = self
            .sync
            .lookup(&origin_id)
            .unwrap_or_else(|| Municipality::new(&origin_id));
        municipality.name.set("fi", name_fi);
        municipality.name.set("sv", name_sv);

        let id = commit_feature(&self.ctx, &self.sync, &mut municipality, |unit, municipality| {
            self.save(unit, municipality, boundary)
        })?;
        debug!("Imported municipality {origin_id} as {id}");
        Ok(FeatureOutcome::Committed(id))
    }

    fn deletion_candidates(
        &self,
        guard: DeletionGuard,
    ) -> Result<Vec<DeletionCandidate>, SyncError> {
        unseen_candidates(&self.sync, guard, |m| m.origin_id.clone())
    }

    fn deletes_records(&self) -> bool {
        false
    }
}
