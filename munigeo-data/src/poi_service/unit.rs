//! Wire format of the service unit listing.

use serde::Deserialize;

/// One unit as published by the service.
///
/// Only the fields the importer reads are modelled; unknown fields are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServiceUnit {
    /// Service-assigned unit identifier.
    pub id: u64,
    /// Finnish display name.
    #[serde(default)]
    pub name_fi: String,
    /// Finnish city name.
    pub address_city_fi: Option<String>,
    /// Finnish street address.
    pub street_address_fi: Option<String>,
    /// Postal code.
    pub address_zip: Option<String>,
    /// ETRS-GK25 northing.
    pub northing_etrs_gk25: Option<f64>,
    /// ETRS-GK25 easting.
    pub easting_etrs_gk25: Option<f64>,
}

impl ServiceUnit {
    /// Unit with only an identifier and name, for building fixtures.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name_fi: name.into(),
            ..Self::default()
        }
    }

    /// Set the city and postal code.
    #[must_use]
    pub fn with_city(mut self, city: impl Into<String>, zip: impl Into<String>) -> Self {
        self.address_city_fi = Some(city.into());
        self.address_zip = Some(zip.into());
        self
    }

    /// Set the street address.
    #[must_use]
    pub fn with_street(mut self, street: impl Into<String>) -> Self {
        self.street_address_fi = Some(street.into());
        self
    }

    /// Set the ETRS-GK25 position.
    #[must_use]
    pub const fn with_gk25(mut self, northing: f64, easting: f64) -> Self {
        self.northing_etrs_gk25 = Some(northing);
        self.easting_etrs_gk25 = Some(easting);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn parses_service_listing() {
        let body = r#"[
            {"id": 8215, "name_fi": "Kallion kirjasto", "address_city_fi": "Helsinki",
             "street_address_fi": "Viides linja 11", "address_zip": "00530",
             "northing_etrs_gk25": 6675553, "easting_etrs_gk25": 25497175, "www_fi": "x"},
            {"id": 9, "name_fi": "Unplaced"}
        ]"#;

        let units: Vec<ServiceUnit> = serde_json::from_str(body).expect("parse");

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].address_zip.as_deref(), Some("00530"));
        assert_eq!(units[0].northing_etrs_gk25, Some(6_675_553.0));
        assert_eq!(units[1].address_city_fi, None);
        assert_eq!(units[1].easting_etrs_gk25, None);
    }
}
