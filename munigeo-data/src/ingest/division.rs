//! Configured division files to administrative divisions.

use chrono::NaiveDate;
use log::debug;
use munigeo_core::{
    AdministrativeDivision, AdministrativeDivisionType, DeletionGuard, Municipality,
    RecordId, RecordStoreExt, Scope, SourceFeature, SyncError, SyncSet, Translations, UnitOfWork,
    fix_capitalization,
};

use super::{
    DeletionCandidate, FeatureIngestor, IngestContext, attribute, commit_feature,
    delete_division_geometry, feature_geometry, persisted_id, required_attribute,
    save_division_geometry, unseen_candidates,
};
use crate::config::{DivisionConfig, FieldMapping};
use crate::error::ImportError;
use crate::runner::FeatureOutcome;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Imports one configured division type under the root municipality.
pub struct DivisionIngestor<'a> {
    ctx: IngestContext<'a>,
    type_tag: String,
    config: &'a DivisionConfig,
    default_language: &'a str,
    division_type: RecordId,
    parent: Option<RecordId>,
    municipality: Option<RecordId>,
    sync: SyncSet<AdministrativeDivision, String>,
}

impl std::fmt::Debug for DivisionIngestor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DivisionIngestor")
            .field("type_tag", &self.type_tag)
            .field("parent", &self.parent)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl<'a> DivisionIngestor<'a> {
    /// Validate the mapping, ensure the division type exists and snapshot
    /// the divisions of that type under `root`'s division.
    ///
    /// # Errors
    ///
    /// Fails with [`ImportError::MissingFieldMapping`] or
    /// [`ImportError::UnsupportedField`] before touching the store, and
    /// propagates store failures.
    pub fn new(
        ctx: IngestContext<'a>,
        type_tag: &str,
        config: &'a DivisionConfig,
        root: &Municipality,
        default_language: &'a str,
    ) -> Result<Self, ImportError> {
        config.validate(type_tag)?;
        let division_type = ctx.store.get_or_create(
            &Scope::global(),
            |t: &AdministrativeDivisionType| t.type_tag == type_tag,
            || AdministrativeDivisionType::new(type_tag, config.name.clone()),
        )?;
        let division_type = persisted_id(&division_type)?;
        let parent = root.division;
        let scope = AdministrativeDivision::scope_for(parent, division_type);
        let existing = ctx.store.fetch_all::<AdministrativeDivision>(&scope)?;
        debug!("Loaded {} stored {type_tag} divisions", existing.len());
        Ok(Self {
            ctx,
            type_tag: type_tag.to_owned(),
            config,
            default_language,
            division_type,
            parent,
            municipality: root.id,
            sync: SyncSet::new(existing, |d: &AdministrativeDivision| d.origin_id.clone()),
        })
    }

    /// Reconciliation state of the pass.
    #[must_use]
    pub const fn sync(&self) -> &SyncSet<AdministrativeDivision, String> {
        &self.sync
    }

    fn simple(&self, feature: &SourceFeature, field: &str) -> Option<String> {
        match self.config.mapping(field)? {
            FieldMapping::Attribute(source) => attribute(feature, source),
            FieldMapping::Localized(_) => None,
        }
    }

    fn date(&self, feature: &SourceFeature, field: &str) -> Result<Option<NaiveDate>, ImportError> {
        self.simple(feature, field)
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, DATE_FORMAT)
                    .map_err(|err| ImportError::invalid_attribute(field, &raw, err))
            })
            .transpose()
    }

    fn names(&self, feature: &SourceFeature) -> Translations {
        match self.config.mapping("name") {
            Some(FieldMapping::Localized(sources)) => sources
                .iter()
                .filter_map(|(language, source)| {
                    let name = attribute(feature, source)?;
                    Some((language.clone(), fix_capitalization(&name)))
                })
                .collect(),
            Some(FieldMapping::Attribute(source)) => attribute(feature, source)
                .map(|name| (self.default_language, name))
                .into_iter()
                .collect(),
            None => Translations::new(),
        }
    }

    fn origin_id(&self, feature: &SourceFeature) -> Result<String, ImportError> {
        match self.config.mapping("origin_id") {
            Some(FieldMapping::Attribute(source)) => required_attribute(feature, source),
            Some(FieldMapping::Localized(_)) => Err(ImportError::UnsupportedField {
                division: self.type_tag.clone(),
                field: String::from("origin_id"),
            }),
            None => Err(ImportError::MissingFieldMapping {
                division: self.type_tag.clone(),
                field: "origin_id",
            }),
        }
    }
}

impl FeatureIngestor for DivisionIngestor<'_> {
    type Input = SourceFeature;

    fn ingest(&self, feature: Self::Input) -> Result<FeatureOutcome, ImportError> {
        let origin_id = self.origin_id(&feature)?;
        let start = self.date(&feature, "start")?;
        let end = self.date(&feature, "end")?;
        let (geometry, srid) = feature_geometry(&feature, self.config.srid)?;
        let boundary = self.ctx.projector.project_boundary(geometry, srid)?;

        let mut division = self.sync.lookup(&origin_id).unwrap_or_else(|| {
            AdministrativeDivision::new(&origin_id, self.division_type, self.parent)
        });
        division.name.merge(self.names(&feature));
        division.municipality = self.municipality;
        division.ocd_id = self.simple(&feature, "ocd_id");
        division.service_point_id = self.simple(&feature, "service_point_id");
        division.start = start;
        division.end = end;

        let id = commit_feature(&self.ctx, &self.sync, &mut division, |unit, division| {
            let id = unit.save_record(division)?;
            save_division_geometry(unit, id, boundary)?;
            Ok(())
        })?;
        debug!("Imported {} {origin_id} as {id}", self.type_tag);
        Ok(FeatureOutcome::Committed(id))
    }

    fn deletion_candidates(
        &self,
        guard: DeletionGuard,
    ) -> Result<Vec<DeletionCandidate>, SyncError> {
        unseen_candidates(&self.sync, guard, |d| d.origin_id.clone())
    }

    fn dispose(
        &self,
        unit: &mut (dyn UnitOfWork + '_),
        candidate: &DeletionCandidate,
    ) -> Result<(), ImportError> {
        delete_division_geometry(unit, candidate.id)?;
        unit.delete(candidate.kind, candidate.id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use geo::polygon;
    use munigeo_core::test_support::{MemoryRecordStore, OffsetReprojector};
    use munigeo_core::{AdministrativeDivisionGeometry, GeometryProjector, RecordStore, Srid};
    use rstest::{fixture, rstest};

    const CONFIG: &str = r#"
origin_id: "091"
divisions:
  district:
    name: District
    file: districts.tab
    fields:
      origin_id: TUNNUS
      name:
        fi: NIMI
        sv: NIMI_SE
      ocd_id: OCD
      start: ALKU
"#;

    struct Harness {
        store: MemoryRecordStore,
        projector: GeometryProjector,
        config: ImportConfig,
        root: Municipality,
    }

    impl Harness {
        fn ingestor(&self) -> DivisionIngestor<'_> {
            let ctx = IngestContext::new(&self.store, &self.projector);
            DivisionIngestor::new(
                ctx,
                "district",
                &self.config.divisions["district"],
                &self.root,
                &self.config.default_language,
            )
            .expect("ingestor")
        }
    }

    #[fixture]
    fn harness() -> Harness {
        let store = MemoryRecordStore::default();
        let mut root = Municipality::new("091");
        root.division = Some(RecordId(900));
        store.save_record(&mut root).expect("root");
        Harness {
            store,
            projector: GeometryProjector::new(OffsetReprojector::default(), Srid::ETRS_TM35FIN),
            config: ImportConfig::from_yaml_str(CONFIG).expect("config"),
            root,
        }
    }

    fn district(code: &str, fi: &str) -> SourceFeature {
        SourceFeature::new()
            .with_attribute("TUNNUS", code)
            .with_attribute("NIMI", fi)
            .with_attribute("NIMI_SE", "VÄSTRA HAMNEN")
            .with_attribute("OCD", format!("ocd-division/country:fi/kunta:helsinki/peruspiiri:{code}"))
            .with_attribute("ALKU", "2013-01-01")
            .with_geometry(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)])
            .with_srid(Srid::ETRS_TM35FIN)
    }

    #[rstest]
    fn mapped_fields_land_on_the_division(harness: Harness) {
        let ingestor = harness.ingestor();

        ingestor.ingest(district("101", "Töölö")).expect("ingest");

        let divisions = harness
            .store
            .fetch_all::<AdministrativeDivision>(&Scope::global())
            .expect("fetch");
        assert_eq!(divisions.len(), 1);
        let division = &divisions[0];
        assert_eq!(division.parent, Some(RecordId(900)));
        assert_eq!(division.municipality, harness.root.id);
        assert_eq!(division.name.get("fi"), Some("Töölö"));
        assert_eq!(division.name.get("sv"), Some("Västra Hamnen"));
        assert_eq!(division.start, NaiveDate::from_ymd_opt(2013, 1, 1));
        assert!(division.ocd_id.as_deref().is_some_and(|ocd| ocd.ends_with(":101")));
        let id = division.id.expect("id");
        assert_eq!(
            harness
                .store
                .count_records::<AdministrativeDivisionGeometry>(&Scope::of(id))
                .expect("count"),
            1
        );
    }

    #[rstest]
    fn invalid_date_skips_the_whole_feature(harness: Harness) {
        let ingestor = harness.ingestor();

        let err = ingestor
            .ingest(district("101", "Töölö").with_attribute("ALKU", "1.1.2013"))
            .expect_err("bad date");

        assert!(matches!(err, ImportError::InvalidAttribute { ref attribute, .. } if attribute == "start"));
        assert!(!err.is_fatal());
        assert_eq!(harness.store.len(), 2);
    }

    #[rstest]
    fn unseen_division_is_disposed_with_its_geometry(harness: Harness) {
        {
            let ingestor = harness.ingestor();
            ingestor.ingest(district("101", "Töölö")).expect("first");
            ingestor.ingest(district("102", "Kallio")).expect("second");
        }

        let ingestor = harness.ingestor();
        ingestor.ingest(district("101", "Töölö")).expect("rerun");
        let candidates = ingestor
            .deletion_candidates(DeletionGuard::default())
            .expect("candidates");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].origin, "102");

        let mut unit = harness.store.begin().expect("begin");
        ingestor.dispose(&mut *unit, &candidates[0]).expect("dispose");
        unit.commit().expect("commit");

        assert_eq!(
            harness
                .store
                .count_records::<AdministrativeDivision>(&Scope::global())
                .expect("count"),
            1
        );
        assert_eq!(
            harness
                .store
                .count_records::<AdministrativeDivisionGeometry>(&Scope::global())
                .expect("count"),
            1
        );
    }

    #[rstest]
    fn simple_name_uses_default_language(harness: Harness) {
        let mut config = harness.config.divisions["district"].clone();
        config
            .fields
            .insert(String::from("name"), FieldMapping::Attribute(String::from("NIMI")));
        let ctx = IngestContext::new(&harness.store, &harness.projector);
        let ingestor = DivisionIngestor::new(ctx, "district", &config, &harness.root, "fi")
            .expect("ingestor");

        ingestor.ingest(district("103", "KAMPPI")).expect("ingest");

        let divisions = harness
            .store
            .fetch_all::<AdministrativeDivision>(&Scope::global())
            .expect("fetch");
        assert_eq!(divisions[0].name.get("fi"), Some("KAMPPI"));
        assert_eq!(divisions[0].name.get("sv"), None);
    }
}
