//! Feature builders and configuration fixtures shared by the import tests.

use std::fs;

use camino::Utf8PathBuf;
use geo::{MultiPolygon, Polygon, polygon};
use munigeo_core::SourceFeature;
use munigeo_data::{ImportConfig, MemorySources};
use tempfile::TempDir;

/// Run configuration used by the behavioural tests.
pub const CONFIG: &str = r#"
origin_id: "091"
workers: 4
land_mask:
  bbox: [-100.0, -100.0, 100.0, 100.0]
  bbox_srid: 3067
  land_srid: 3067
divisions:
  district:
    name: District
    file: districts.tab
    srid: 3067
    fields:
      origin_id: TUNNUS
      name:
        fi: NIMI
        sv: NIMI_SE
plans:
  municipality: Helsinki
  srid: 3067
addresses:
  file: pks_osoite.csv
  srid: 3067
pois:
  srid: 3067
"#;

/// Capital-region municipalities as `(code, Finnish name, Swedish name)`.
pub const MUNICIPALITIES: [(&str, &str, &str); 3] = [
    ("091", "Helsinki", "Helsingfors"),
    ("049", "Espoo", "Esbo"),
    ("235", "Kauniainen", "Grankulla"),
];

/// Axis-aligned square from `min` to `max`.
pub fn square(min: f64, max: f64) -> Polygon<f64> {
    polygon![
        (x: min, y: min),
        (x: max, y: min),
        (x: max, y: max),
        (x: min, y: max),
    ]
}

/// Write [`CONFIG`] into a fresh directory and load it from disk.
pub fn load_config() -> (TempDir, ImportConfig) {
    let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("create temp dir: {err}"));
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir {path:?} is not UTF-8"));
    let path = root.join("import.yaml");
    fs::write(&path, CONFIG).unwrap_or_else(|err| panic!("write {path}: {err}"));
    let config = ImportConfig::load(&path).unwrap_or_else(|err| panic!("load {path}: {err}"));
    (dir, config)
}

/// A 4th-order boundary unit carrying the national code and bilingual label.
pub fn municipality(code: &str, name_fi: &str, name_sv: &str, offset: f64) -> SourceFeature {
    SourceFeature::new()
        .with_attribute("nationalLevel", "4thOrder")
        .with_attribute("nationalCode", code)
        .with_attribute("text", format!("(2:{name_fi},{name_sv})"))
        .with_geometry(square(offset, offset + 10.0))
}

/// Every capital-region municipality, side by side.
pub fn capital_region() -> Vec<SourceFeature> {
    MUNICIPALITIES
        .iter()
        .zip([0.0, 10.0, 20.0])
        .map(|(&(code, fi, sv), offset)| municipality(code, fi, sv, offset))
        .collect()
}

/// One zoning plan row.
pub fn plan_row(origin_id: &str) -> SourceFeature {
    SourceFeature::new()
        .with_attribute("kaavatunnus", origin_id)
        .with_geometry(square(1.0, 2.0))
}

/// `count` plan rows with identifiers `P0`, `P1`, ...
pub fn plan_rows(count: usize) -> Vec<SourceFeature> {
    (0..count).map(|n| plan_row(&format!("P{n}"))).collect()
}

/// One district row.
pub fn district(origin_id: &str, name_fi: &str) -> SourceFeature {
    SourceFeature::new()
        .with_attribute("TUNNUS", origin_id)
        .with_attribute("NIMI", name_fi)
        .with_geometry(square(2.0, 4.0))
}

/// One standard address register row.
pub fn address_row(street: &str, number: u32, municipality: &str) -> SourceFeature {
    SourceFeature::new()
        .with_attribute("street", street)
        .with_attribute("number", number.to_string())
        .with_attribute("municipality", municipality)
        .with_attribute("coord_n", "5.0")
        .with_attribute("coord_e", "5.0")
}

/// Sources holding every dataset `config` names, with `plans` in effect.
pub fn capital_region_sources(config: &ImportConfig, plans: usize) -> MemorySources {
    let path = |file: &str| config.source_path(file);
    MemorySources::new()
        .with_land(MultiPolygon::new(vec![square(-50.0, 50.0)]))
        .with_municipalities(capital_region())
        .with_file(path("districts.tab"), vec![district("101", "VIRONNIEMI")])
        .with_file(path("Lv_rajaus.TAB"), plan_rows(plans))
        .with_file(path("Kaava_vir_rajaus.TAB"), Vec::new())
        .with_file(
            path("pks_osoite.csv"),
            vec![
                address_row("Mannerheimintie", 5, "Helsinki"),
                address_row("Tapiontori", 1, "Espoo"),
            ],
        )
}

