//! Record store seam used by the importers.
//!
//! [`RecordStore`] is the persistent side of reconciliation: filter by scope,
//! count, bulk create and delete. Mutations belonging to one feature go
//! through a [`UnitOfWork`], which either commits as a whole or rolls back
//! when dropped. Both traits are object safe and kind-erased; the typed
//! helpers in [`RecordStoreExt`] and on `dyn UnitOfWork` convert to and from
//! [`Record`] values.

use thiserror::Error;

use crate::record::{Record, RecordId, Scope, StoredRecord};

#[cfg(feature = "store-sqlite")]
mod sqlite;

#[cfg(feature = "store-sqlite")]
pub use sqlite::SqliteRecordStore;

/// Errors raised by record store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening the SQLite database failed.
    #[cfg(feature = "store-sqlite")]
    #[error("failed to open SQLite database at {path}: {source}")]
    OpenDatabase {
        /// Location of the database on disk.
        path: String,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A SQLite statement failed.
    #[cfg(feature = "store-sqlite")]
    #[error("SQLite failure during {operation}: {source}")]
    Sqlite {
        /// Short description of the failed operation.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// Serialising a record body failed.
    #[error("failed to encode {kind} record: {source}")]
    Encode {
        /// Record kind.
        kind: &'static str,
        /// JSON encoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// A stored record body could not be decoded.
    #[error("failed to decode {kind} record: {source}")]
    Decode {
        /// Record kind.
        kind: &'static str,
        /// JSON decoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// A stored record was requested as the wrong kind.
    #[error("expected a {expected} record, found {found}")]
    KindMismatch {
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind found in the store.
        found: &'static str,
    },
    /// Update or delete addressed a record that does not exist.
    #[error("{kind} record {id} does not exist")]
    MissingRecord {
        /// Record kind.
        kind: &'static str,
        /// Surrogate key that was not found.
        id: RecordId,
    },
    /// The store rejected the write; raised by backends and injected faults.
    #[error("store rejected write of {kind} record: {message}")]
    Rejected {
        /// Record kind.
        kind: &'static str,
        /// Backend supplied description.
        message: String,
    },
    /// A connection lock was poisoned by a panicking writer.
    #[error("store connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether the failure concerns the store as a whole rather than the
    /// records one unit of work was writing.
    ///
    /// Opening, locking, beginning or committing against the store, and
    /// reading back rows that no longer decode, fail for every later unit
    /// too. Rejected writes, stale surrogate keys and bodies that do not
    /// encode belong to the feature that produced them.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        match self {
            #[cfg(feature = "store-sqlite")]
            Self::OpenDatabase { .. } => true,
            #[cfg(feature = "store-sqlite")]
            Self::Sqlite { operation, .. } => {
                operation.starts_with("begin") || operation.starts_with("commit")
            }
            Self::Poisoned | Self::Decode { .. } | Self::KindMismatch { .. } => true,
            Self::Encode { .. } | Self::MissingRecord { .. } | Self::Rejected { .. } => false,
        }
    }
}

/// Persistent storage for domain records.
pub trait RecordStore: Send + Sync {
    /// Every record of `kind` filed under `scope`, ordered by surrogate key.
    ///
    /// [`Scope::global`] matches every record of the kind.
    fn filter(&self, kind: &'static str, scope: &Scope) -> Result<Vec<StoredRecord>, StoreError>;

    /// Number of records of `kind` filed under `scope`.
    fn count(&self, kind: &'static str, scope: &Scope) -> Result<usize, StoreError>;

    /// Start a unit of work. Dropping it without [`UnitOfWork::commit`] rolls
    /// back every mutation made through it.
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError>;

    /// Insert new records in one batch and return their surrogate keys in
    /// input order.
    fn bulk_create(&self, records: Vec<StoredRecord>) -> Result<Vec<RecordId>, StoreError>;

    /// Remove a record.
    fn delete(&self, kind: &'static str, id: RecordId) -> Result<(), StoreError>;
}

/// Transactional view of a [`RecordStore`] scoped to one feature's writes.
pub trait UnitOfWork {
    /// Fetch a record by surrogate key.
    fn get(&mut self, kind: &'static str, id: RecordId) -> Result<Option<StoredRecord>, StoreError>;

    /// Records of `kind` under `scope`, including uncommitted writes.
    fn filter(
        &mut self,
        kind: &'static str,
        scope: &Scope,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Create the record when it has no id, otherwise update it in place.
    fn save(&mut self, record: StoredRecord) -> Result<RecordId, StoreError>;

    /// Remove a record.
    fn delete(&mut self, kind: &'static str, id: RecordId) -> Result<(), StoreError>;

    /// Make every mutation durable.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

impl dyn UnitOfWork + '_ {
    /// Save a typed record and bind the allocated surrogate key.
    ///
    /// # Errors
    ///
    /// Propagates encoding and backend failures.
    pub fn save_record<R: Record>(&mut self, record: &mut R) -> Result<RecordId, StoreError> {
        let id = self.save(StoredRecord::encode(record)?)?;
        record.assign_id(id);
        Ok(id)
    }

    /// Fetch a typed record by surrogate key.
    ///
    /// # Errors
    ///
    /// Propagates decoding and backend failures.
    pub fn get_record<R: Record>(&mut self, id: RecordId) -> Result<Option<R>, StoreError> {
        self.get(R::KIND, id)?.map(StoredRecord::decode).transpose()
    }

    /// Typed records under `scope`.
    ///
    /// # Errors
    ///
    /// Propagates decoding and backend failures.
    pub fn filter_records<R: Record>(&mut self, scope: &Scope) -> Result<Vec<R>, StoreError> {
        self.filter(R::KIND, scope)?
            .into_iter()
            .map(StoredRecord::decode)
            .collect()
    }
}

/// Typed convenience layer over any [`RecordStore`].
pub trait RecordStoreExt: RecordStore {
    /// Every record of type `R` under `scope`.
    fn fetch_all<R: Record>(&self, scope: &Scope) -> Result<Vec<R>, StoreError> {
        self.filter(R::KIND, scope)?
            .into_iter()
            .map(StoredRecord::decode)
            .collect()
    }

    /// Number of `R` records under `scope`.
    fn count_records<R: Record>(&self, scope: &Scope) -> Result<usize, StoreError> {
        self.count(R::KIND, scope)
    }

    /// Bulk insert unsaved records and bind their surrogate keys.
    fn bulk_create_records<R: Record>(&self, records: &mut [R]) -> Result<(), StoreError> {
        let encoded = records
            .iter()
            .map(StoredRecord::encode)
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self.bulk_create(encoded)?;
        for (record, id) in records.iter_mut().zip(ids) {
            record.assign_id(id);
        }
        Ok(())
    }

    /// Save a single record in its own unit of work.
    fn save_record<R: Record>(&self, record: &mut R) -> Result<RecordId, StoreError> {
        let mut unit = self.begin()?;
        let id = unit.save_record(record)?;
        unit.commit()?;
        Ok(id)
    }

    /// Find the first record under `scope` matching `predicate`, or create
    /// `default()` when none does.
    fn get_or_create<R, P, D>(
        &self,
        scope: &Scope,
        predicate: P,
        default: D,
    ) -> Result<R, StoreError>
    where
        R: Record,
        P: Fn(&R) -> bool,
        D: FnOnce() -> R,
    {
        if let Some(existing) = self.fetch_all::<R>(scope)?.into_iter().find(|r| predicate(r)) {
            return Ok(existing);
        }
        let mut created = default();
        RecordStoreExt::save_record(self, &mut created)?;
        Ok(created)
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AdministrativeDivisionType, PoiCategory};
    use crate::test_support::MemoryRecordStore;
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> MemoryRecordStore {
        MemoryRecordStore::default()
    }

    #[rstest]
    fn uncommitted_unit_rolls_back(store: MemoryRecordStore) {
        {
            let mut unit = store.begin().expect("begin");
            let mut category = PoiCategory::new("library", "Library");
            unit.save_record(&mut category).expect("save");
        }

        assert_eq!(
            store
                .count_records::<PoiCategory>(&Scope::global())
                .expect("count"),
            0
        );
    }

    #[rstest]
    fn committed_unit_is_visible(store: MemoryRecordStore) {
        let mut unit = store.begin().expect("begin");
        let mut category = PoiCategory::new("park", "Park");
        let id = unit.save_record(&mut category).expect("save");
        unit.commit().expect("commit");

        let stored = store.fetch_all::<PoiCategory>(&Scope::global()).expect("fetch");

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, Some(id));
    }

    #[rstest]
    fn get_or_create_reuses_existing(store: MemoryRecordStore) {
        let first = store
            .get_or_create(
                &Scope::global(),
                |t: &AdministrativeDivisionType| t.type_tag == "district",
                || AdministrativeDivisionType::new("district", "District"),
            )
            .expect("create");
        let second = store
            .get_or_create(
                &Scope::global(),
                |t: &AdministrativeDivisionType| t.type_tag == "district",
                || AdministrativeDivisionType::new("district", "Other name"),
            )
            .expect("reuse");

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "District");
    }

    #[rstest]
    #[case(StoreError::Poisoned, true)]
    #[case(StoreError::KindMismatch { expected: "plan", found: "poi" }, true)]
    #[case(StoreError::MissingRecord { kind: "poi", id: RecordId(7) }, false)]
    #[case(
        StoreError::Rejected { kind: "plan", message: String::from("constraint") },
        false
    )]
    fn connection_failures_are_told_apart(#[case] err: StoreError, #[case] expected: bool) {
        assert_eq!(err.is_connection_failure(), expected);
    }

    #[rstest]
    fn bulk_create_binds_ids_in_order(store: MemoryRecordStore) {
        let mut categories = vec![
            PoiCategory::new("toilet", "Toilet"),
            PoiCategory::new("recycling", "Recycling point"),
        ];

        store.bulk_create_records(&mut categories).expect("bulk");

        let ids: Vec<_> = categories.iter().map(|c| c.id).collect();
        assert!(ids.iter().all(Option::is_some));
        assert!(ids[0] < ids[1]);
    }
}
