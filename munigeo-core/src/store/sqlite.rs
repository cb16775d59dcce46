//! SQLite-backed record store.
//!
//! Every kind shares one `records` table; record bodies are stored as JSON
//! text and filtered by `(kind, scope)`. Units of work hold the connection
//! lock for their whole lifetime and map onto a SQLite transaction.

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, params};

use super::{RecordStore, StoreError, UnitOfWork};
use crate::record::{RecordId, Scope, StoredRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    scope TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS records_kind_scope ON records (kind, scope);
";

fn sqlite(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |source| StoreError::Sqlite { operation, source }
}

/// Record store persisted in a single SQLite database.
pub struct SqliteRecordStore {
    connection: Mutex<Connection>,
}

impl fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteRecordStore").finish_non_exhaustive()
    }
}

impl SqliteRecordStore {
    /// Open or create the database at `path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OpenDatabase`] when SQLite cannot open the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let connection = Connection::open(path).map_err(|source| StoreError::OpenDatabase {
            path: path.display().to_string(),
            source,
        })?;
        Self::with_connection(connection)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OpenDatabase`] when SQLite cannot allocate it.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection =
            Connection::open_in_memory().map_err(|source| StoreError::OpenDatabase {
                path: String::from(":memory:"),
                source,
            })?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self, StoreError> {
        connection
            .execute_batch(SCHEMA)
            .map_err(sqlite("create schema"))?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn encode_payload(record: &StoredRecord) -> Result<String, StoreError> {
    serde_json::to_string(&record.payload).map_err(|source| StoreError::Encode {
        kind: record.kind,
        source,
    })
}

fn select_scope(
    connection: &Connection,
    kind: &'static str,
    scope: &Scope,
) -> Result<Vec<StoredRecord>, StoreError> {
    let global = scope == &Scope::global();
    let mut statement = connection
        .prepare_cached(
            "SELECT id, scope, payload FROM records \
             WHERE kind = ?1 AND (?2 OR scope = ?3) ORDER BY id",
        )
        .map_err(sqlite("prepare filter"))?;
    let rows = statement
        .query_map(params![kind, global, scope.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(sqlite("filter records"))?;

    let mut records = Vec::new();
    for row in rows {
        let (id, scope, payload) = row.map_err(sqlite("read record row"))?;
        records.push(decode_row(kind, id, scope, &payload)?);
    }
    Ok(records)
}

fn decode_row(
    kind: &'static str,
    id: i64,
    scope: String,
    payload: &str,
) -> Result<StoredRecord, StoreError> {
    let payload =
        serde_json::from_str(payload).map_err(|source| StoreError::Decode { kind, source })?;
    Ok(StoredRecord {
        kind,
        id: Some(RecordId(id)),
        scope: Scope::from_raw(scope),
        payload,
    })
}

fn insert(connection: &Connection, record: &StoredRecord) -> Result<RecordId, StoreError> {
    let payload = encode_payload(record)?;
    connection
        .prepare_cached("INSERT INTO records (kind, scope, payload) VALUES (?1, ?2, ?3)")
        .and_then(|mut statement| {
            statement.execute(params![record.kind, record.scope.as_str(), payload])
        })
        .map_err(sqlite("insert record"))?;
    Ok(RecordId(connection.last_insert_rowid()))
}

fn delete_row(connection: &Connection, kind: &'static str, id: RecordId) -> Result<(), StoreError> {
    let affected = connection
        .execute(
            "DELETE FROM records WHERE id = ?1 AND kind = ?2",
            params![id.0, kind],
        )
        .map_err(sqlite("delete record"))?;
    if affected == 0 {
        return Err(StoreError::MissingRecord { kind, id });
    }
    Ok(())
}

impl RecordStore for SqliteRecordStore {
    fn filter(&self, kind: &'static str, scope: &Scope) -> Result<Vec<StoredRecord>, StoreError> {
        let connection = self.lock()?;
        select_scope(&connection, kind, scope)
    }

    fn count(&self, kind: &'static str, scope: &Scope) -> Result<usize, StoreError> {
        let connection = self.lock()?;
        let global = scope == &Scope::global();
        let count: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM records WHERE kind = ?1 AND (?2 OR scope = ?3)",
                params![kind, global, scope.as_str()],
                |row| row.get(0),
            )
            .map_err(sqlite("count records"))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StoreError> {
        let connection = self.lock()?;
        connection
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(sqlite("begin unit of work"))?;
        Ok(Box::new(SqliteUnit {
            connection,
            open: true,
        }))
    }

    fn bulk_create(&self, records: Vec<StoredRecord>) -> Result<Vec<RecordId>, StoreError> {
        let mut connection = self.lock()?;
        let transaction = connection
            .transaction()
            .map_err(sqlite("begin bulk create"))?;
        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            ids.push(insert(&transaction, record)?);
        }
        transaction.commit().map_err(sqlite("commit bulk create"))?;
        debug!("Bulk created {} records", ids.len());
        Ok(ids)
    }

    fn delete(&self, kind: &'static str, id: RecordId) -> Result<(), StoreError> {
        let connection = self.lock()?;
        delete_row(&connection, kind, id)
    }
}

struct SqliteUnit<'a> {
    connection: MutexGuard<'a, Connection>,
    open: bool,
}

impl UnitOfWork for SqliteUnit<'_> {
    fn get(
        &mut self,
        kind: &'static str,
        id: RecordId,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let row = self
            .connection
            .query_row(
                "SELECT scope, payload FROM records WHERE id = ?1 AND kind = ?2",
                params![id.0, kind],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(sqlite("get record"))?;
        row.map(|(scope, payload)| decode_row(kind, id.0, scope, &payload))
            .transpose()
    }

    fn filter(
        &mut self,
        kind: &'static str,
        scope: &Scope,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        select_scope(&self.connection, kind, scope)
    }

    fn save(&mut self, record: StoredRecord) -> Result<RecordId, StoreError> {
        let Some(id) = record.id else {
            return insert(&self.connection, &record);
        };
        let payload = encode_payload(&record)?;
        let affected = self
            .connection
            .execute(
                "UPDATE records SET scope = ?1, payload = ?2 WHERE id = ?3 AND kind = ?4",
                params![record.scope.as_str(), payload, id.0, record.kind],
            )
            .map_err(sqlite("update record"))?;
        if affected == 0 {
            return Err(StoreError::MissingRecord {
                kind: record.kind,
                id,
            });
        }
        Ok(id)
    }

    fn delete(&mut self, kind: &'static str, id: RecordId) -> Result<(), StoreError> {
        delete_row(&self.connection, kind, id)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.connection
            .execute_batch("COMMIT")
            .map_err(sqlite("commit unit of work"))?;
        self.open = false;
        Ok(())
    }
}

impl Drop for SqliteUnit<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.connection.execute_batch("ROLLBACK") {
                warn!("Failed to roll back unit of work: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Municipality, PoiCategory};
    use crate::store::RecordStoreExt;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn store() -> SqliteRecordStore {
        SqliteRecordStore::open_in_memory().expect("in-memory database")
    }

    #[rstest]
    fn saved_records_round_trip_with_ids(store: SqliteRecordStore) {
        let mut municipality = Municipality::new("091");
        municipality.name.set("fi", "Helsinki");

        let id = RecordStoreExt::save_record(&store, &mut municipality).expect("save");
        let loaded = store.fetch_all::<Municipality>(&Scope::global()).expect("fetch");

        assert_eq!(loaded, vec![Municipality { id: Some(id), ..municipality }]);
    }

    #[rstest]
    fn dropped_unit_rolls_back(store: SqliteRecordStore) {
        {
            let mut unit = store.begin().expect("begin");
            unit.save_record(&mut PoiCategory::new("park", "Park"))
                .expect("save");
        }

        assert_eq!(
            store.count_records::<PoiCategory>(&Scope::global()).expect("count"),
            0
        );
        assert!(store.begin().is_ok(), "connection usable after rollback");
    }

    #[rstest]
    fn update_keeps_surrogate_key(store: SqliteRecordStore) {
        let mut category = PoiCategory::new("toilet", "Toilet");
        let id = RecordStoreExt::save_record(&store, &mut category).expect("create");
        category.description = String::from("Public toilet");

        let updated = RecordStoreExt::save_record(&store, &mut category).expect("update");

        assert_eq!(updated, id);
        let loaded = store.fetch_all::<PoiCategory>(&Scope::global()).expect("fetch");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].description, "Public toilet");
    }

    #[rstest]
    fn scope_filter_excludes_other_parents(store: SqliteRecordStore) {
        let mut categories = vec![
            StoredRecord {
                kind: "poi",
                id: None,
                scope: Scope::of(RecordId(1)),
                payload: serde_json::json!({}),
            },
            StoredRecord {
                kind: "poi",
                id: None,
                scope: Scope::of(RecordId(2)),
                payload: serde_json::json!({}),
            },
        ];
        categories.push(categories[0].clone());

        store.bulk_create(categories).expect("bulk");

        assert_eq!(store.count("poi", &Scope::of(RecordId(1))).expect("count"), 2);
        assert_eq!(store.count("poi", &Scope::global()).expect("count"), 3);
        assert_eq!(store.filter("poi", &Scope::of(RecordId(2))).expect("filter").len(), 1);
    }

    #[rstest]
    fn delete_of_missing_record_is_reported(store: SqliteRecordStore) {
        let err = store.delete("poi", RecordId(42)).expect_err("missing");
        assert!(matches!(err, StoreError::MissingRecord { kind: "poi", .. }));
    }

    #[rstest]
    fn file_database_persists_between_opens() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("munigeo.sqlite");
        {
            let store = SqliteRecordStore::open(&path).expect("open");
            RecordStoreExt::save_record(&store, &mut PoiCategory::new("park", "Park"))
                .expect("save");
        }

        let reopened = SqliteRecordStore::open(&path).expect("reopen");

        assert_eq!(
            reopened
                .count_records::<PoiCategory>(&Scope::global())
                .expect("count"),
            1
        );
    }
}
