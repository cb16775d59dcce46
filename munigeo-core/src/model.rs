//! Domain entities reconciled by the importers.
//!
//! Every entity carries a stable origin identifier assigned by the external
//! data source next to the surrogate [`RecordId`] owned by the store. The
//! surrogate key is never serialised into the record body; stores bind it on
//! load.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};

use crate::record::{Record, RecordId, Scope};

/// Per-language text, keyed by ISO 639-1 language code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Translations(BTreeMap<String, String>);

impl Translations {
    /// Create an empty name set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the text for `language`, replacing any previous value.
    pub fn set(&mut self, language: impl Into<String>, text: impl Into<String>) {
        self.0.insert(language.into(), text.into());
    }

    /// Text for `language`, if present.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<&str> {
        self.0.get(language).map(String::as_str)
    }

    /// Merge every entry of `other` over this set.
    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Whether no language has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(language, text)` pairs in language order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(lang, text)| (lang.as_str(), text.as_str()))
    }
}

impl<L, T> FromIterator<(L, T)> for Translations
where
    L: Into<String>,
    T: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (L, T)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(lang, text)| (lang.into(), text.into()))
                .collect(),
        )
    }
}

/// A municipality; root of the address, plan and POI hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Municipality {
    #[serde(skip)]
    pub id: Option<RecordId>,
    /// National municipality code.
    pub origin_id: String,
    pub name: Translations,
    /// The administrative division that carries the municipality boundary.
    pub division: Option<RecordId>,
}

impl Municipality {
    /// Shell bound to an origin identifier, not yet persisted.
    #[must_use]
    pub fn new(origin_id: impl Into<String>) -> Self {
        Self {
            id: None,
            origin_id: origin_id.into(),
            name: Translations::new(),
            division: None,
        }
    }
}

impl Record for Municipality {
    const KIND: &'static str = "municipality";

    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn scope(&self) -> Scope {
        Scope::global()
    }
}

/// A named category of division, unique by type tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministrativeDivisionType {
    #[serde(skip)]
    pub id: Option<RecordId>,
    /// Machine tag, e.g. `muni` or `school_district`.
    pub type_tag: String,
    /// Human-readable name.
    pub name: String,
}

impl AdministrativeDivisionType {
    /// Tag of the division type that carries municipality boundaries.
    pub const MUNICIPALITY: &'static str = "muni";

    /// Unsaved type with the given tag and name.
    #[must_use]
    pub fn new(type_tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            type_tag: type_tag.into(),
            name: name.into(),
        }
    }
}

impl Record for AdministrativeDivisionType {
    const KIND: &'static str = "division_type";

    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn scope(&self) -> Scope {
        Scope::global()
    }
}

/// A node in the division forest.
///
/// `(origin_id, division_type, parent)` identifies a division; the tree is a
/// plain parent pointer and is traversed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrativeDivision {
    #[serde(skip)]
    pub id: Option<RecordId>,
    pub origin_id: String,
    pub name: Translations,
    pub parent: Option<RecordId>,
    pub division_type: RecordId,
    pub municipality: Option<RecordId>,
    /// Open Civic Data identifier.
    pub ocd_id: Option<String>,
    pub service_point_id: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl AdministrativeDivision {
    /// Unsaved division bound to its identifying triple.
    #[must_use]
    pub fn new(
        origin_id: impl Into<String>,
        division_type: RecordId,
        parent: Option<RecordId>,
    ) -> Self {
        Self {
            id: None,
            origin_id: origin_id.into(),
            name: Translations::new(),
            parent,
            division_type,
            municipality: None,
            ocd_id: None,
            service_point_id: None,
            start: None,
            end: None,
        }
    }

    /// Scope holding every division of `division_type` under `parent`.
    #[must_use]
    pub fn scope_for(parent: Option<RecordId>, division_type: RecordId) -> Scope {
        Scope::nested(parent, division_type)
    }
}

impl Record for AdministrativeDivision {
    const KIND: &'static str = "division";

    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn scope(&self) -> Scope {
        Self::scope_for(self.parent, self.division_type)
    }
}

/// Boundary of exactly one division; created on first assignment and updated
/// in place afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrativeDivisionGeometry {
    #[serde(skip)]
    pub id: Option<RecordId>,
    pub division: RecordId,
    pub boundary: MultiPolygon<f64>,
}

impl Record for AdministrativeDivisionGeometry {
    const KIND: &'static str = "division_geometry";

    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn scope(&self) -> Scope {
        Scope::of(self.division)
    }
}

/// A zoning plan, unique by `(municipality, origin_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(skip)]
    pub id: Option<RecordId>,
    pub origin_id: String,
    pub municipality: RecordId,
    pub geometry: MultiPolygon<f64>,
    pub in_effect: bool,
}

impl Record for Plan {
    const KIND: &'static str = "plan";

    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn scope(&self) -> Scope {
        Scope::of(self.municipality)
    }
}

/// Natural key of an [`Address`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressKey {
    pub street: String,
    pub number: u32,
    pub number_end: Option<String>,
    pub letter: Option<String>,
}

/// A street address, unique by [`AddressKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(skip)]
    pub id: Option<RecordId>,
    pub street: String,
    pub number: u32,
    /// End of the number range, when the address spans several numbers.
    pub number_end: Option<String>,
    pub letter: Option<String>,
    pub location: Point<f64>,
    pub municipality: RecordId,
}

impl Address {
    /// Natural key used for reconciliation.
    #[must_use]
    pub fn key(&self) -> AddressKey {
        AddressKey {
            street: self.street.clone(),
            number: self.number,
            number_end: self.number_end.clone(),
            letter: self.letter.clone(),
        }
    }
}

impl Record for Address {
    const KIND: &'static str = "address";

    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn scope(&self) -> Scope {
        Scope::of(self.municipality)
    }
}

/// A classification of points of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoiCategory {
    #[serde(skip)]
    pub id: Option<RecordId>,
    pub type_tag: String,
    pub description: String,
}

impl PoiCategory {
    /// Unsaved category.
    #[must_use]
    pub fn new(type_tag: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            type_tag: type_tag.into(),
            description: description.into(),
        }
    }
}

impl Record for PoiCategory {
    const KIND: &'static str = "poi_category";

    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn scope(&self) -> Scope {
        Scope::global()
    }
}

/// A point of interest published by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    #[serde(skip)]
    pub id: Option<RecordId>,
    pub origin_id: String,
    pub category: RecordId,
    pub name: String,
    pub location: Point<f64>,
    pub street_address: Option<String>,
    pub zip_code: Option<String>,
    pub municipality: RecordId,
}

impl Record for Poi {
    const KIND: &'static str = "poi";

    fn record_id(&self) -> Option<RecordId> {
        self.id
    }

    fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    fn scope(&self) -> Scope {
        Scope::of(self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn translations_merge_overrides_languages() {
        let mut names: Translations = [("fi", "Helsinki"), ("sv", "Helsinki")].into_iter().collect();
        names.merge([("sv", "Helsingfors")].into_iter().collect());

        assert_eq!(names.get("fi"), Some("Helsinki"));
        assert_eq!(names.get("sv"), Some("Helsingfors"));
        assert_eq!(names.get("en"), None);
    }

    #[rstest]
    fn division_scope_combines_parent_and_type() {
        let division = AdministrativeDivision::new("101", RecordId(3), Some(RecordId(7)));
        assert_eq!(division.scope(), Scope::nested(Some(RecordId(7)), RecordId(3)));
    }

    #[rstest]
    fn surrogate_key_is_not_serialised() {
        let mut municipality = Municipality::new("091");
        municipality.assign_id(RecordId(5));

        let body = serde_json::to_value(&municipality).expect("serialise");

        assert!(body.get("id").is_none());
        assert_eq!(body.get("origin_id"), Some(&serde_json::json!("091")));
    }

    #[rstest]
    fn address_key_includes_range_and_letter() {
        let address = Address {
            id: None,
            street: "Mannerheimintie".into(),
            number: 5,
            number_end: Some("7".into()),
            letter: Some("A".into()),
            location: Point::new(0.0, 0.0),
            municipality: RecordId(1),
        };

        let key = address.key();

        assert_eq!(key.number_end.as_deref(), Some("7"));
        assert_eq!(key.letter.as_deref(), Some("A"));
    }
}
