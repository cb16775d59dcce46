//! Address register rows to addresses.
//!
//! New addresses are buffered and bulk created in batches; addresses that
//! already exist are updated in their own unit of work. Municipalities with
//! no stored addresses skip the snapshot load entirely, so a first import
//! never queries per row.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use geo::Point;
use log::{debug, info};
use munigeo_core::{
    Address, AddressKey, DeletionGuard, GeometryError, RecordId, RecordStoreExt, Scope,
    SourceFeature, Srid, SyncError, SyncSet,
};

use super::{
    DeletionCandidate, FeatureIngestor, IngestContext, MunicipalityDirectory, attribute,
    commit_feature, persisted_id, required_attribute, unseen_candidates,
};
use crate::error::ImportError;
use crate::runner::FeatureOutcome;

/// Number of new addresses written per bulk insert.
pub const BULK_BATCH_SIZE: usize = 1000;

/// Register type code of a standard street address.
const STANDARD_ADDRESS: u32 = 1;

/// Municipality forced for addresses the register files under the wrong one.
///
/// The register lists Eliel Saarisen tie 4 under a neighbouring
/// municipality; the address is in Helsinki.
#[must_use]
pub fn municipality_override(street: &str, number: u32) -> Option<&'static str> {
    (street == "Eliel Saarisen tie" && number == 4).then_some("Helsinki")
}

/// Imports address register rows for every known municipality.
pub struct AddressIngestor<'a> {
    ctx: IngestContext<'a>,
    srid: Srid,
    directory: MunicipalityDirectory,
    syncs: HashMap<RecordId, SyncSet<Address, AddressKey>>,
    pending: Mutex<Vec<Address>>,
}

impl std::fmt::Debug for AddressIngestor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressIngestor")
            .field("srid", &self.srid)
            .field("municipalities", &self.syncs.len())
            .finish_non_exhaustive()
    }
}

impl<'a> AddressIngestor<'a> {
    /// Snapshot the addresses of every municipality in `directory`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn new(
        ctx: IngestContext<'a>,
        directory: MunicipalityDirectory,
        srid: Srid,
    ) -> Result<Self, ImportError> {
        let mut syncs = HashMap::new();
        for municipality in directory.municipalities() {
            let id = persisted_id(municipality)?;
            let scope = Scope::of(id);
            let existing = if ctx.store.count_records::<Address>(&scope)? == 0 {
                debug!("Municipality {} has no addresses, inserting only", municipality.origin_id);
                Vec::new()
            } else {
                ctx.store.fetch_all::<Address>(&scope)?
            };
            syncs.insert(id, SyncSet::new(existing, Address::key));
        }
        Ok(Self {
            ctx,
            srid,
            directory,
            syncs,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Reconciliation state for one municipality.
    #[must_use]
    pub fn sync(&self, municipality: RecordId) -> Option<&SyncSet<Address, AddressKey>> {
        self.syncs.get(&municipality)
    }

    /// Addresses waiting for the next bulk insert.
    pub fn pending(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<Address>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_batch(&self, mut batch: Vec<Address>) -> Result<(), ImportError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.ctx.store.bulk_create_records(&mut batch)?;
        info!("Created {} addresses", batch.len());
        Ok(())
    }

    fn location(&self, feature: &SourceFeature) -> Result<Point<f64>, ImportError> {
        let north = coordinate(feature, "coord_n")?;
        let east = coordinate(feature, "coord_e")?;
        Ok(self
            .ctx
            .projector
            .reproject_point(Point::new(east, north), self.srid)?)
    }
}

fn coordinate(feature: &SourceFeature, name: &str) -> Result<f64, ImportError> {
    let raw = attribute(feature, name).ok_or(GeometryError::MissingGeometry)?;
    raw.parse()
        .map_err(|err| ImportError::invalid_attribute(name, &raw, err))
}

impl FeatureIngestor for AddressIngestor<'_> {
    type Input = SourceFeature;

    fn ingest(&self, feature: Self::Input) -> Result<FeatureOutcome, ImportError> {
        let street = required_attribute(&feature, "street")?;
        let Some(raw_number) = attribute(&feature, "number") else {
            return Ok(FeatureOutcome::Skipped(format!("{street} has no house number")));
        };
        let number: u32 = raw_number
            .parse()
            .map_err(|err| ImportError::invalid_attribute("number", &raw_number, err))?;

        let address_type = match attribute(&feature, "type") {
            None => {
                debug!("{street} {number} has no type code, assuming a standard address");
                STANDARD_ADDRESS
            }
            Some(raw) => match raw.parse() {
                Ok(code) => code,
                Err(_) => {
                    return Ok(FeatureOutcome::Skipped(format!(
                        "{street} {number} has unparsable type code {raw:?}"
                    )));
                }
            },
        };
        if address_type != STANDARD_ADDRESS {
            return Ok(FeatureOutcome::Skipped(format!(
                "{street} {number} has type code {address_type}"
            )));
        }

        let municipality_name = match municipality_override(&street, number) {
            Some(name) => name.to_owned(),
            None => attribute(&feature, "municipality").unwrap_or_default(),
        };
        let Some(municipality) = self
            .directory
            .get(&municipality_name)
            .and_then(|municipality| municipality.id)
        else {
            return Ok(FeatureOutcome::Skipped(format!(
                "{street} {number} is in unknown municipality {municipality_name:?}"
            )));
        };
        let sync = self
            .syncs
            .get(&municipality)
            .ok_or_else(|| ImportError::UnknownMunicipality {
                name: municipality_name.clone(),
            })?;

        let location = self.location(&feature)?;
        let key = AddressKey {
            street,
            number,
            number_end: attribute(&feature, "number_end"),
            letter: attribute(&feature, "letter"),
        };

        if let Some(mut address) = sync.lookup(&key) {
            address.location = location;
            let id = commit_feature(&self.ctx, sync, &mut address, |unit, address| {
                unit.save_record(address)?;
                Ok(())
            })?;
            return Ok(FeatureOutcome::Committed(id));
        }

        let AddressKey {
            street,
            number,
            number_end,
            letter,
        } = key;
        let address = Address {
            id: None,
            street,
            number,
            number_end,
            letter,
            location,
            municipality,
        };
        sync.mark(&address)?;
        let full = {
            let mut pending = self.lock_pending();
            pending.push(address);
            (pending.len() >= BULK_BATCH_SIZE).then(|| std::mem::take(&mut *pending))
        };
        if let Some(batch) = full {
            self.write_batch(batch)?;
        }
        Ok(FeatureOutcome::Queued)
    }

    fn flush(&self) -> Result<(), ImportError> {
        let batch = std::mem::take(&mut *self.lock_pending());
        self.write_batch(batch)
    }

    fn deletion_candidates(
        &self,
        guard: DeletionGuard,
    ) -> Result<Vec<DeletionCandidate>, SyncError> {
        let mut candidates = Vec::new();
        for sync in self.syncs.values() {
            candidates.extend(unseen_candidates(sync, guard, |address| {
                format!("{} {}", address.street, address.number)
            })?);
        }
        Ok(candidates)
    }
}
