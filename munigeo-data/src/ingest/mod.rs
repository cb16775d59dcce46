//! Per-domain feature ingestors.
//!
//! Every ingestor follows the same shape: extract the origin identifier,
//! resolve the existing record through its [`SyncSet`], map attributes,
//! prepare geometry, then persist the record and its companions in one unit
//! of work and mark it seen. Geometry is prepared before the unit opens, so
//! transforms run concurrently while commits serialise on the store.

mod address;
mod division;
mod municipality;
mod plan;
mod poi;

use std::fmt;
use std::hash::Hash;

use geo::{Geometry, MultiPolygon};
use log::info;
use munigeo_core::{
    AdministrativeDivisionGeometry, DeletionGuard, Feature, GeometryError, GeometryProjector,
    Municipality, Record, RecordId, RecordStore, RecordStoreExt, Scope, Srid, StoreError,
    SyncError, SyncSet, UnitOfWork,
};

use crate::error::ImportError;
use crate::runner::FeatureOutcome;

pub use address::{AddressIngestor, BULK_BATCH_SIZE, municipality_override};
pub use division::DivisionIngestor;
pub use municipality::{MUNICIPALITY_LEVEL, MunicipalityIngestor, parse_municipality_label};
pub use plan::{PlanAccumulator, PlanDraft, PlanIngestor};
pub use poi::{PoiIngestor, SERVICE_CATEGORY_MAP, ServiceCategory, municipality_from_postal_code};

/// Shared read-only context handed to every ingestor.
#[derive(Clone, Copy)]
pub struct IngestContext<'a> {
    /// Backing record store.
    pub store: &'a dyn RecordStore,
    /// Projector into the run's target system.
    pub projector: &'a GeometryProjector,
}

impl fmt::Debug for IngestContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestContext")
            .field("projector", self.projector)
            .finish_non_exhaustive()
    }
}

impl<'a> IngestContext<'a> {
    /// Context over `store` projecting with `projector`.
    #[must_use]
    pub fn new(store: &'a dyn RecordStore, projector: &'a GeometryProjector) -> Self {
        Self { store, projector }
    }
}

/// A stored record eligible for deletion after a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCandidate {
    /// Record kind.
    pub kind: &'static str,
    /// Surrogate key.
    pub id: RecordId,
    /// Origin identity, for reporting.
    pub origin: String,
}

impl fmt::Display for DeletionCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.origin, self.id)
    }
}

/// Turns one input into one committed record mutation.
pub trait FeatureIngestor: Sync {
    /// Unit of input, e.g. a source feature or a remote listing entry.
    type Input: Send;

    /// Ingest one input.
    ///
    /// # Errors
    ///
    /// Returns per-feature data errors or fatal store and reconciliation
    /// failures; see [`ImportError::is_fatal`].
    fn ingest(&self, input: Self::Input) -> Result<FeatureOutcome, ImportError>;

    /// Write out anything buffered during the pass.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    fn flush(&self) -> Result<(), ImportError> {
        Ok(())
    }

    /// Records left unseen by the pass, subject to `guard`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ExcessiveDeletion`] when the guard trips.
    fn deletion_candidates(
        &self,
        guard: DeletionGuard,
    ) -> Result<Vec<DeletionCandidate>, SyncError>;

    /// Whether candidates from this pass may be deleted at all.
    fn deletes_records(&self) -> bool {
        true
    }

    /// Delete one candidate and anything it owns inside `unit`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    fn dispose(
        &self,
        unit: &mut (dyn UnitOfWork + '_),
        candidate: &DeletionCandidate,
    ) -> Result<(), ImportError> {
        unit.delete(candidate.kind, candidate.id)?;
        Ok(())
    }
}

/// Persist `record` through `write`, mark it seen, then commit.
///
/// The mark happens inside the unit so a duplicate identity rolls the
/// writes back.
pub(crate) fn commit_feature<R, K, W>(
    ctx: &IngestContext<'_>,
    sync: &SyncSet<R, K>,
    record: &mut R,
    write: W,
) -> Result<RecordId, ImportError>
where
    R: Record,
    K: Eq + Hash + fmt::Debug,
    W: FnOnce(&mut (dyn UnitOfWork + '_), &mut R) -> Result<(), ImportError>,
{
    let mut unit = ctx.store.begin()?;
    write(&mut *unit, record)?;
    let id = persisted_id(record)?;
    sync.mark(record)?;
    unit.commit()?;
    Ok(id)
}

/// Surrogate key of a record that must already be saved.
pub(crate) fn persisted_id<R: Record>(record: &R) -> Result<RecordId, StoreError> {
    record.record_id().ok_or_else(|| StoreError::Rejected {
        kind: R::KIND,
        message: String::from("record has no id after save"),
    })
}

/// Create or update the boundary companion of `division`.
pub(crate) fn save_division_geometry(
    unit: &mut (dyn UnitOfWork + '_),
    division: RecordId,
    boundary: MultiPolygon<f64>,
) -> Result<RecordId, ImportError> {
    let existing = unit
        .filter_records::<AdministrativeDivisionGeometry>(&Scope::of(division))?
        .into_iter()
        .next();
    let mut companion = match existing {
        Some(mut companion) => {
            companion.boundary = boundary;
            companion
        }
        None => AdministrativeDivisionGeometry {
            id: None,
            division,
            boundary,
        },
    };
    Ok(unit.save_record(&mut companion)?)
}

/// Delete every boundary companion of `division`.
pub(crate) fn delete_division_geometry(
    unit: &mut (dyn UnitOfWork + '_),
    division: RecordId,
) -> Result<(), ImportError> {
    for companion in unit.filter(AdministrativeDivisionGeometry::KIND, &Scope::of(division))? {
        if let Some(id) = companion.id {
            unit.delete(AdministrativeDivisionGeometry::KIND, id)?;
        }
    }
    Ok(())
}

/// Non-empty, trimmed attribute value.
pub(crate) fn attribute(feature: &impl Feature, name: &str) -> Option<String> {
    feature
        .attribute(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Attribute that carries the origin identifier.
pub(crate) fn required_attribute(
    feature: &impl Feature,
    name: &str,
) -> Result<String, ImportError> {
    attribute(feature, name).ok_or_else(|| ImportError::MissingIdentifier {
        attribute: name.to_owned(),
    })
}

/// Geometry of `feature` with its declared system, or `fallback`.
pub(crate) fn feature_geometry(
    feature: &impl Feature,
    fallback: Srid,
) -> Result<(&Geometry<f64>, Srid), GeometryError> {
    let geometry = feature.geometry().ok_or(GeometryError::MissingGeometry)?;
    Ok((geometry, feature.srid().unwrap_or(fallback)))
}

/// Records unseen by `sync` as deletion candidates.
pub(crate) fn unseen_candidates<R, K>(
    sync: &SyncSet<R, K>,
    guard: DeletionGuard,
    origin: impl Fn(&R) -> String,
) -> Result<Vec<DeletionCandidate>, SyncError>
where
    R: Record,
    K: Eq + Hash + fmt::Debug,
{
    let candidates: Vec<DeletionCandidate> = sync
        .finalize_with(guard)?
        .into_iter()
        .filter_map(|record| {
            record.record_id().map(|id| DeletionCandidate {
                kind: R::KIND,
                id,
                origin: origin(&record),
            })
        })
        .collect();
    for candidate in &candidates {
        info!("Deletion candidate: {candidate}");
    }
    Ok(candidates)
}

/// Municipalities indexed by every name they carry.
#[derive(Debug, Clone, Default)]
pub struct MunicipalityDirectory {
    by_name: std::collections::HashMap<String, Municipality>,
}

impl MunicipalityDirectory {
    /// Load every stored municipality.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn load(store: &dyn RecordStore) -> Result<Self, ImportError> {
        let municipalities = store.fetch_all::<Municipality>(&Scope::global())?;
        Ok(Self::from_municipalities(municipalities))
    }

    /// Index the given municipalities.
    #[must_use]
    pub fn from_municipalities(municipalities: impl IntoIterator<Item = Municipality>) -> Self {
        let mut by_name = std::collections::HashMap::new();
        for municipality in municipalities {
            for (_, name) in municipality.name.iter() {
                by_name.insert(name.to_owned(), municipality.clone());
            }
        }
        Self { by_name }
    }

    /// Municipality carrying `name` in any language.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Municipality> {
        self.by_name.get(name)
    }

    /// Municipality carrying `name`, as a fatal lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::UnknownMunicipality`] when no municipality has
    /// that name.
    pub fn require(&self, name: &str) -> Result<&Municipality, ImportError> {
        self.get(name).ok_or_else(|| ImportError::UnknownMunicipality {
            name: name.to_owned(),
        })
    }

    /// Distinct municipalities.
    pub fn municipalities(&self) -> impl Iterator<Item = &Municipality> {
        let mut seen = std::collections::HashSet::new();
        self.by_name
            .values()
            .filter(move |municipality| seen.insert(municipality.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use munigeo_core::SourceFeature;
    use munigeo_core::test_support::{MemoryRecordStore, OffsetReprojector};
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> MemoryRecordStore {
        MemoryRecordStore::default()
    }

    fn boundary(size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: size, y: 0.0),
            (x: size, y: size),
        ]])
    }

    #[rstest]
    fn companion_is_created_once_then_updated(store: MemoryRecordStore) {
        let division = RecordId(40);
        for size in [1.0, 2.0] {
            let mut unit = store.begin().expect("begin");
            save_division_geometry(&mut *unit, division, boundary(size)).expect("save");
            unit.commit().expect("commit");
        }

        let companions = store
            .fetch_all::<AdministrativeDivisionGeometry>(&Scope::of(division))
            .expect("fetch");

        assert_eq!(companions.len(), 1);
        assert_eq!(companions[0].boundary, boundary(2.0));
    }

    #[rstest]
    fn companions_are_deleted_with_their_division(store: MemoryRecordStore) {
        let division = RecordId(41);
        let mut unit = store.begin().expect("begin");
        save_division_geometry(&mut *unit, division, boundary(1.0)).expect("save");
        unit.commit().expect("commit");

        let mut unit = store.begin().expect("begin");
        delete_division_geometry(&mut *unit, division).expect("delete");
        unit.commit().expect("commit");

        assert!(store.is_empty());
    }

    #[rstest]
    fn duplicate_mark_rolls_back_the_unit(store: MemoryRecordStore) {
        let projector = GeometryProjector::new(OffsetReprojector::default(), Srid::ETRS_TM35FIN);
        let ctx = IngestContext::new(&store, &projector);
        let sync = SyncSet::new(Vec::<Municipality>::new(), |m: &Municipality| m.origin_id.clone());
        fn save(unit: &mut (dyn UnitOfWork + '_), m: &mut Municipality) -> Result<(), ImportError> {
            unit.save_record(m)?;
            Ok(())
        }

        commit_feature(&ctx, &sync, &mut Municipality::new("091"), save).expect("first");
        let err = commit_feature(&ctx, &sync, &mut Municipality::new("091"), save)
            .expect_err("duplicate");

        assert!(matches!(err, ImportError::Sync(SyncError::DuplicateMark { .. })));
        assert_eq!(store.len(), 1);
    }

    #[rstest]
    fn blank_attributes_count_as_missing() {
        let feature = SourceFeature::new().with_attribute("kaavatunnus", "  ");

        let err = required_attribute(&feature, "kaavatunnus").expect_err("blank");

        assert!(matches!(err, ImportError::MissingIdentifier { .. }));
    }

    #[rstest]
    fn directory_finds_municipalities_by_any_name() {
        let mut helsinki = Municipality::new("091");
        helsinki.id = Some(RecordId(1));
        helsinki.name.set("fi", "Helsinki");
        helsinki.name.set("sv", "Helsingfors");

        let directory = MunicipalityDirectory::from_municipalities([helsinki]);

        assert_eq!(directory.get("Helsingfors").map(|m| m.origin_id.as_str()), Some("091"));
        assert_eq!(directory.municipalities().count(), 1);
        assert!(matches!(
            directory.require("Espoo"),
            Err(ImportError::UnknownMunicipality { .. })
        ));
    }
}
