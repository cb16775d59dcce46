//! Test doubles: an in-memory record store and stub reprojectors.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use geo::Coord;

use crate::geometry::{ProjectionError, Reprojector, Srid};
use crate::record::{RecordId, Scope, StoredRecord};
use crate::store::{RecordStore, StoreError, UnitOfWork};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    rows: BTreeMap<RecordId, StoredRecord>,
}

impl MemoryState {
    fn allocate(&mut self) -> RecordId {
        self.next_id += 1;
        RecordId(self.next_id)
    }
}

/// In-memory [`RecordStore`] with the same unit-of-work semantics as the
/// SQLite store.
///
/// Units stage their writes and apply them under the store lock on commit.
/// Saves of selected kinds can be made to fail to exercise rollback.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
    faults: Mutex<HashSet<&'static str>>,
}

impl MemoryRecordStore {
    /// Make every subsequent save of `kind` fail with [`StoreError::Rejected`].
    pub fn fail_saves_of(&self, kind: &'static str) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
    }

    /// Stop injecting failures.
    pub fn clear_faults(&self) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Total number of stored records across all kinds.
    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rejects(&self, kind: &'static str) -> bool {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(kind)
    }
}

impl RecordStore for MemoryRecordStore {
    fn filter(&self, kind: &'static str, scope: &Scope) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self
            .lock()
            .rows
            .values()
            .filter(|row| row.kind == kind && (scope == &Scope::global() || &row.scope == scope))
            .cloned()
            .collect())
    }

    fn count(&self, kind: &'static str, scope: &Scope) -> Result<usize, StoreError> {
        self.filter(kind, scope).map(|rows| rows.len())
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        Ok(Box::new(MemoryUnit {
            store: self,
            staged: BTreeMap::new(),
        }))
    }

    fn bulk_create(&self, records: Vec<StoredRecord>) -> Result<Vec<RecordId>, StoreError> {
        if let Some(record) = records.iter().find(|record| self.rejects(record.kind)) {
            return Err(StoreError::Rejected {
                kind: record.kind,
                message: String::from("injected fault"),
            });
        }
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(records.len());
        for mut record in records {
            let id = state.allocate();
            record.id = Some(id);
            state.rows.insert(id, record);
            ids.push(id);
        }
        Ok(ids)
    }

    fn delete(&self, kind: &'static str, id: RecordId) -> Result<(), StoreError> {
        let mut state = self.lock();
        match state.rows.get(&id) {
            Some(row) if row.kind == kind => {
                state.rows.remove(&id);
                Ok(())
            }
            _ => Err(StoreError::MissingRecord { kind, id }),
        }
    }
}

struct MemoryUnit<'a> {
    store: &'a MemoryRecordStore,
    /// `None` marks a staged deletion.
    staged: BTreeMap<RecordId, Option<StoredRecord>>,
}

impl MemoryUnit<'_> {
    fn current(&self, id: RecordId) -> Option<StoredRecord> {
        match self.staged.get(&id) {
            Some(staged) => staged.clone(),
            None => self.store.lock().rows.get(&id).cloned(),
        }
    }
}

impl UnitOfWork for MemoryUnit<'_> {
    fn get(
        &mut self,
        kind: &'static str,
        id: RecordId,
    ) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.current(id).filter(|row| row.kind == kind))
    }

    fn filter(
        &mut self,
        kind: &'static str,
        scope: &Scope,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let mut rows: BTreeMap<RecordId, StoredRecord> = self
            .store
            .filter(kind, scope)?
            .into_iter()
            .filter_map(|row| row.id.map(|id| (id, row)))
            .collect();
        for (id, staged) in &self.staged {
            match staged {
                Some(row) if row.kind == kind && (scope == &Scope::global() || &row.scope == scope) => {
                    rows.insert(*id, row.clone());
                }
                _ => {
                    rows.remove(id);
                }
            }
        }
        Ok(rows.into_values().collect())
    }

    fn save(&mut self, mut record: StoredRecord) -> Result<RecordId, StoreError> {
        if self.store.rejects(record.kind) {
            return Err(StoreError::Rejected {
                kind: record.kind,
                message: String::from("injected fault"),
            });
        }
        let id = match record.id {
            Some(id) => {
                if self.current(id).is_none() {
                    return Err(StoreError::MissingRecord {
                        kind: record.kind,
                        id,
                    });
                }
                id
            }
            None => self.store.lock().allocate(),
        };
        record.id = Some(id);
        self.staged.insert(id, Some(record));
        Ok(id)
    }

    fn delete(&mut self, kind: &'static str, id: RecordId) -> Result<(), StoreError> {
        match self.current(id) {
            Some(row) if row.kind == kind => {
                self.staged.insert(id, None);
                Ok(())
            }
            _ => Err(StoreError::MissingRecord { kind, id }),
        }
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.store.lock();
        for (id, staged) in self.staged {
            match staged {
                Some(row) => {
                    state.rows.insert(id, row);
                }
                None => {
                    state.rows.remove(&id);
                }
            }
        }
        Ok(())
    }
}

/// Reprojector that shifts coordinates by a fixed offset per SRID pair.
///
/// Moving from `from` to `to` adds `(to - from) * step` to both axes, so
/// round trips are exact and tests can predict target coordinates.
#[derive(Debug, Clone, Copy)]
pub struct OffsetReprojector {
    step: f64,
}

impl OffsetReprojector {
    /// Create a reprojector shifting by `step` units per SRID difference.
    #[must_use]
    pub const fn new(step: f64) -> Self {
        Self { step }
    }
}

impl Default for OffsetReprojector {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Reprojector for OffsetReprojector {
    fn reproject_coord(
        &self,
        coord: Coord<f64>,
        from: Srid,
        to: Srid,
    ) -> Result<Coord<f64>, ProjectionError> {
        let delta = (f64::from(to.0) - f64::from(from.0)) * self.step;
        Ok(Coord {
            x: coord.x + delta,
            y: coord.y + delta,
        })
    }
}

/// Reprojector that fails for every coordinate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingReprojector;

impl Reprojector for FailingReprojector {
    fn reproject_coord(
        &self,
        _coord: Coord<f64>,
        from: Srid,
        to: Srid,
    ) -> Result<Coord<f64>, ProjectionError> {
        Err(ProjectionError::Unsupported { from, to })
    }
}
