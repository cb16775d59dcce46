//! Persistable record abstraction shared by every domain entity.
//!
//! A record is identified twice: by a surrogate [`RecordId`] assigned by the
//! store, and by whatever origin identity the importer reconciles against.
//! The store only knows about the surrogate key, the record kind and a
//! [`Scope`] string used for filter-by-scope queries.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::store::StoreError;

/// Surrogate key assigned by a record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Partition of a record kind used for filter-by-scope queries.
///
/// Scopes are opaque strings built from the parent references that bound a
/// reconciliation pass, e.g. "every division of type X under parent Y".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope(String);

impl Scope {
    /// The scope holding every record of a kind.
    #[must_use]
    pub fn global() -> Self {
        Self(String::from("*"))
    }

    /// Scope keyed by a single parent record.
    #[must_use]
    pub fn of(parent: RecordId) -> Self {
        Self(parent.0.to_string())
    }

    /// Scope keyed by an optional parent and a second discriminating record.
    #[must_use]
    pub fn nested(parent: Option<RecordId>, discriminator: RecordId) -> Self {
        match parent {
            Some(parent) => Self(format!("{}/{}", parent.0, discriminator.0)),
            None => Self(format!("-/{}", discriminator.0)),
        }
    }

    /// Rebuild a scope from its persisted representation.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Persisted representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A domain entity that can be written to a [`crate::RecordStore`].
pub trait Record: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Tag naming the record kind in the store.
    const KIND: &'static str;

    /// Surrogate key, `None` until the record has been saved.
    fn record_id(&self) -> Option<RecordId>;

    /// Bind the surrogate key allocated by the store.
    fn assign_id(&mut self, id: RecordId);

    /// Scope the record belongs to.
    fn scope(&self) -> Scope;
}

/// Kind-erased record as exchanged with a store backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Record kind tag.
    pub kind: &'static str,
    /// Surrogate key, absent for records that have not been created yet.
    pub id: Option<RecordId>,
    /// Scope the record is filed under.
    pub scope: Scope,
    /// Serialised record body.
    pub payload: serde_json::Value,
}

impl StoredRecord {
    /// Serialise a typed record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Encode`] when serde cannot represent the record.
    pub fn encode<R: Record>(record: &R) -> Result<Self, StoreError> {
        let payload = serde_json::to_value(record).map_err(|source| StoreError::Encode {
            kind: R::KIND,
            source,
        })?;
        Ok(Self {
            kind: R::KIND,
            id: record.record_id(),
            scope: record.scope(),
            payload,
        })
    }

    /// Deserialise into a typed record, binding the surrogate key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KindMismatch`] when the stored kind differs from
    /// `R::KIND`, or [`StoreError::Decode`] when the payload is malformed.
    pub fn decode<R: Record>(self) -> Result<R, StoreError> {
        if self.kind != R::KIND {
            return Err(StoreError::KindMismatch {
                expected: R::KIND,
                found: self.kind,
            });
        }
        let mut record: R =
            serde_json::from_value(self.payload).map_err(|source| StoreError::Decode {
                kind: R::KIND,
                source,
            })?;
        if let Some(id) = self.id {
            record.assign_id(id);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AdministrativeDivisionType;
    use rstest::rstest;

    #[rstest]
    fn scopes_render_parent_chain() {
        assert_eq!(Scope::global().as_str(), "*");
        assert_eq!(Scope::of(RecordId(4)).as_str(), "4");
        assert_eq!(Scope::nested(Some(RecordId(4)), RecordId(9)).as_str(), "4/9");
        assert_eq!(Scope::nested(None, RecordId(9)).as_str(), "-/9");
    }

    #[rstest]
    fn decode_binds_surrogate_key() {
        let division_type = AdministrativeDivisionType::new("district", "District");
        let mut stored = StoredRecord::encode(&division_type).expect("encode");
        stored.id = Some(RecordId(12));

        let decoded: AdministrativeDivisionType = stored.decode().expect("decode");

        assert_eq!(decoded.id, Some(RecordId(12)));
        assert_eq!(decoded.type_tag, "district");
    }

    #[rstest]
    fn decode_rejects_foreign_kind() {
        let stored = StoredRecord {
            kind: "plan",
            id: Some(RecordId(1)),
            scope: Scope::global(),
            payload: serde_json::json!({}),
        };

        let err = stored
            .decode::<AdministrativeDivisionType>()
            .expect_err("kind mismatch");

        assert!(matches!(err, StoreError::KindMismatch { found: "plan", .. }));
    }
}
