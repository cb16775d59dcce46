//! Sequencing of the import passes.
//!
//! A full run builds the land mask, then imports municipalities,
//! administrative divisions, plans, addresses and POIs in that order; later
//! passes resolve the municipalities written by earlier ones. Each pass ends
//! at the same decision point: records left unseen are proposed for deletion,
//! checked against the destructive-change guard, then deleted or reported
//! according to the configured [`DeletionPolicy`].

use std::fmt;

use log::{info, warn};
use munigeo_core::{
    DeletionGuard, GeometryProjector, LandMask, Municipality, RecordStore, RecordStoreExt, Scope,
    SyncError,
};

use crate::config::{DeletionPolicy, ImportConfig};
use crate::error::ImportError;
use crate::ingest::{
    AddressIngestor, DeletionCandidate, DivisionIngestor, FeatureIngestor, IngestContext,
    MunicipalityDirectory, MunicipalityIngestor, PlanAccumulator, PlanIngestor, PoiIngestor,
    SERVICE_CATEGORY_MAP, persisted_id,
};
use crate::poi_service::{HttpPoiService, PoiService};
use crate::runner::{ConcurrentImportRunner, PassReport};
use crate::sources::{ImportSources, SourceError};

/// What happened to a pass's deletion candidates.
#[derive(Debug)]
pub enum DeletionOutcome {
    /// The candidates were deleted.
    Applied(Vec<DeletionCandidate>),
    /// The candidates were listed without deleting them.
    Reported(Vec<DeletionCandidate>),
    /// Deletion was not attempted.
    Skipped {
        /// Why deletion did not run.
        reason: String,
    },
    /// The destructive-change guard refused the deletion set.
    Refused(SyncError),
}

impl DeletionOutcome {
    /// Candidates that were deleted or reported.
    #[must_use]
    pub fn candidates(&self) -> &[DeletionCandidate] {
        match self {
            Self::Applied(candidates) | Self::Reported(candidates) => candidates,
            Self::Skipped { .. } | Self::Refused(_) => &[],
        }
    }
}

/// Outcome of one pass.
#[derive(Debug)]
pub struct PassSummary {
    /// Pass name, e.g. `divisions:district`.
    pub name: String,
    /// Per-feature accounting.
    pub report: PassReport,
    /// Deletion decision.
    pub deletions: DeletionOutcome,
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed, {} committed, {} queued, {} skipped, {} failed",
            self.name,
            self.report.processed,
            self.report.committed,
            self.report.queued,
            self.report.skipped.len(),
            self.report.failures.len()
        )?;
        match &self.deletions {
            DeletionOutcome::Applied(candidates) => write!(f, ", {} deleted", candidates.len()),
            DeletionOutcome::Reported(candidates) => {
                write!(f, ", {} proposed for deletion", candidates.len())
            }
            DeletionOutcome::Skipped { reason } => write!(f, ", deletion skipped: {reason}"),
            DeletionOutcome::Refused(err) => write!(f, ", deletion refused: {err}"),
        }
    }
}

/// Outcome of a full run.
#[derive(Debug, Default)]
pub struct ImportSummary {
    /// Pass summaries in execution order.
    pub passes: Vec<PassSummary>,
}

impl ImportSummary {
    /// The summary of the pass called `name`.
    #[must_use]
    pub fn pass(&self, name: &str) -> Option<&PassSummary> {
        self.passes.iter().find(|pass| pass.name == name)
    }

    /// Whether every pass ran without feature failures or refused deletions.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.passes.iter().all(|pass| {
            pass.report.is_clean() && !matches!(pass.deletions, DeletionOutcome::Refused(_))
        })
    }
}

fn source_failure(name: impl Into<String>) -> impl FnOnce(SourceError) -> ImportError {
    let name = name.into();
    move |source| ImportError::Source { name, source }
}

/// Drives the import passes for one configuration.
pub struct ImportOrchestrator<'a, S: ImportSources + ?Sized> {
    config: &'a ImportConfig,
    store: &'a dyn RecordStore,
    projector: &'a GeometryProjector,
    sources: &'a S,
    poi_service: Option<&'a dyn PoiService>,
    guard: DeletionGuard,
    policy: DeletionPolicy,
}

impl<S: ImportSources + ?Sized> fmt::Debug for ImportOrchestrator<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOrchestrator")
            .field("origin_id", &self.config.origin_id)
            .field("guard", &self.guard)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<'a, S: ImportSources + ?Sized> ImportOrchestrator<'a, S> {
    /// Orchestrator with the guard and policy taken from `config`.
    pub fn new(
        config: &'a ImportConfig,
        store: &'a dyn RecordStore,
        projector: &'a GeometryProjector,
        sources: &'a S,
    ) -> Self {
        Self {
            config,
            store,
            projector,
            sources,
            poi_service: None,
            guard: config.deletion.guard(),
            policy: config.deletion.policy,
        }
    }

    /// Use `service` instead of an HTTP client built from the configuration.
    #[must_use]
    pub fn with_poi_service(mut self, service: &'a dyn PoiService) -> Self {
        self.poi_service = Some(service);
        self
    }

    /// Override the destructive-change guard, e.g. with
    /// [`DeletionGuard::disabled`] for an operator re-run after a refusal.
    #[must_use]
    pub const fn with_guard(mut self, guard: DeletionGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Override the deletion policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: DeletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn ctx(&self) -> IngestContext<'a> {
        IngestContext::new(self.store, self.projector)
    }

    /// Run every configured pass in dependency order.
    ///
    /// # Errors
    ///
    /// Stops at the first fatal error; passes completed before it stay
    /// committed.
    pub fn run_all(&self) -> Result<ImportSummary, ImportError> {
        let mut summary = ImportSummary::default();
        let land_mask = self.build_land_mask()?;
        summary.passes.push(self.import_municipalities(&land_mask)?);
        summary.passes.extend(self.import_divisions()?);
        summary.passes.extend(self.import_plans()?);
        summary.passes.extend(self.import_addresses()?);
        summary.passes.extend(self.import_pois()?);
        for pass in &summary.passes {
            info!("{pass}");
        }
        Ok(summary)
    }

    /// Intersect the configured bounding box with the land dataset.
    ///
    /// # Errors
    ///
    /// Fails when the land dataset cannot be read or reprojected.
    pub fn build_land_mask(&self) -> Result<LandMask, ImportError> {
        let settings = &self.config.land_mask;
        let land = self
            .sources
            .land_polygons()
            .map_err(source_failure("land polygons"))?;
        info!("Building land mask from {} land polygons", land.0.len());
        Ok(LandMask::build(
            settings.rect(),
            settings.bbox_srid,
            &land,
            settings.land_srid,
            self.projector,
        )?)
    }

    /// Import 4th-order boundary units as municipalities on the worker pool.
    ///
    /// # Errors
    ///
    /// Fails when the first feature fails or any feature fails fatally.
    pub fn import_municipalities(&self, land_mask: &LandMask) -> Result<PassSummary, ImportError> {
        let runner = ConcurrentImportRunner::new(self.config.workers)?;
        let srid = self.config.municipalities.srid;
        let ingestor = MunicipalityIngestor::new(self.ctx(), land_mask, srid)?;
        let features = self
            .sources
            .municipality_features()
            .map_err(source_failure("municipality boundaries"))?
            .filter(|feature| MunicipalityIngestor::accepts(feature));
        self.run_pass("municipalities", &runner, &ingestor, features, None)
    }

    fn root_municipality(&self) -> Result<Municipality, ImportError> {
        self.store
            .fetch_all::<Municipality>(&Scope::global())?
            .into_iter()
            .find(|municipality| municipality.origin_id == self.config.origin_id)
            .ok_or_else(|| ImportError::UnknownMunicipality {
                name: self.config.origin_id.clone(),
            })
    }

    /// Import every configured division type under the root municipality.
    ///
    /// # Errors
    ///
    /// Fails on mapping errors before any feature is read, when the root
    /// municipality is missing, or on fatal feature errors.
    pub fn import_divisions(&self) -> Result<Vec<PassSummary>, ImportError> {
        if self.config.divisions.is_empty() {
            return Ok(Vec::new());
        }
        let root = self.root_municipality()?;
        let runner = ConcurrentImportRunner::sequential();
        let mut passes = Vec::with_capacity(self.config.divisions.len());
        for (type_tag, division) in &self.config.divisions {
            let ingestor = DivisionIngestor::new(
                self.ctx(),
                type_tag,
                division,
                &root,
                &self.config.default_language,
            )?;
            let path = self.config.source_path(&division.file);
            let features = self
                .sources
                .division_features(&path)
                .map_err(source_failure(path.as_str()))?;
            let name = format!("divisions:{type_tag}");
            passes.push(self.run_pass(&name, &runner, &ingestor, features, None)?);
        }
        Ok(passes)
    }

    /// Assemble both plan files and write the plans.
    ///
    /// Returns one summary per file and one for the plan writes. Deletion is
    /// skipped when any row failed, since a missing row can make a plan look
    /// unseen.
    ///
    /// # Errors
    ///
    /// Fails when the owning municipality is unknown or on fatal errors.
    pub fn import_plans(&self) -> Result<Vec<PassSummary>, ImportError> {
        let Some(settings) = &self.config.plans else {
            return Ok(Vec::new());
        };
        let directory = MunicipalityDirectory::load(self.store)?;
        let municipality = directory.require(&settings.municipality)?;
        let municipality = persisted_id(municipality)?;
        let runner = ConcurrentImportRunner::sequential();
        let accumulator = PlanAccumulator::new(self.projector, settings.srid);

        let mut passes = Vec::with_capacity(3);
        for (file, in_effect, name) in [
            (&settings.in_effect, true, "plans:in_effect"),
            (&settings.proposed, false, "plans:proposed"),
        ] {
            let path = self.config.source_path(file);
            let rows = self
                .sources
                .plan_features(&path)
                .map_err(source_failure(path.as_str()))?;
            let report = runner.run(rows, |row| accumulator.add(&row, in_effect))?;
            passes.push(PassSummary {
                name: name.to_owned(),
                report,
                deletions: DeletionOutcome::Skipped {
                    reason: String::from("rows are reconciled by the plans pass"),
                },
            });
        }

        let failed_rows: usize = passes.iter().map(|pass| pass.report.failures.len()).sum();
        let blocked = (failed_rows > 0).then(|| format!("{failed_rows} plan rows failed"));
        let ingestor = PlanIngestor::new(self.ctx(), municipality)?;
        let drafts = accumulator.into_drafts();
        passes.push(self.run_pass("plans", &runner, &ingestor, drafts, blocked)?);
        Ok(passes)
    }

    /// Import the address register.
    ///
    /// # Errors
    ///
    /// Fails when the register cannot be opened or on fatal errors.
    pub fn import_addresses(&self) -> Result<Option<PassSummary>, ImportError> {
        let Some(settings) = &self.config.addresses else {
            return Ok(None);
        };
        let directory = MunicipalityDirectory::load(self.store)?;
        let ingestor = AddressIngestor::new(self.ctx(), directory, settings.srid)?;
        let path = self.config.source_path(&settings.file);
        let rows = self
            .sources
            .address_features(&path)
            .map_err(source_failure(path.as_str()))?;
        let runner = ConcurrentImportRunner::sequential();
        self.run_pass("addresses", &runner, &ingestor, rows, None)
            .map(Some)
    }

    /// Import every service listing as a POI category.
    ///
    /// # Errors
    ///
    /// Fails when the service cannot be reached or on fatal errors.
    pub fn import_pois(&self) -> Result<Vec<PassSummary>, ImportError> {
        let Some(settings) = &self.config.pois else {
            return Ok(Vec::new());
        };
        let owned;
        let service: &dyn PoiService = match self.poi_service {
            Some(service) => service,
            None => {
                owned = HttpPoiService::with_config(settings.http_config())?;
                &owned
            }
        };
        let directory = MunicipalityDirectory::load(self.store)?;
        let runner = ConcurrentImportRunner::sequential();
        let mut passes = Vec::with_capacity(SERVICE_CATEGORY_MAP.len());
        for category in SERVICE_CATEGORY_MAP {
            info!("Importing {}", category.type_tag);
            let units = service.fetch_units(category.service_code)?;
            let ingestor = PoiIngestor::new(self.ctx(), category, &directory, settings.srid)?;
            passes.push(self.run_pass(
                &format!("pois:{}", category.type_tag),
                &runner,
                &ingestor,
                units,
                None,
            )?);
        }
        Ok(passes)
    }

    fn run_pass<I>(
        &self,
        name: &str,
        runner: &ConcurrentImportRunner,
        ingestor: &I,
        inputs: impl IntoIterator<Item = I::Input>,
        blocked: Option<String>,
    ) -> Result<PassSummary, ImportError>
    where
        I: FeatureIngestor,
    {
        info!("Starting {name} pass on {} workers", runner.workers());
        let report = runner.run(inputs, |input| ingestor.ingest(input))?;
        ingestor.flush()?;
        let deletions = match blocked {
            Some(reason) => DeletionOutcome::Skipped { reason },
            None if !report.is_clean() => DeletionOutcome::Skipped {
                reason: format!("{} features failed", report.failures.len()),
            },
            None => self.reconcile(name, ingestor)?,
        };
        if let DeletionOutcome::Skipped { reason } = &deletions {
            warn!("{name}: deletion skipped: {reason}");
        }
        Ok(PassSummary {
            name: name.to_owned(),
            report,
            deletions,
        })
    }

    fn reconcile<I: FeatureIngestor>(
        &self,
        name: &str,
        ingestor: &I,
    ) -> Result<DeletionOutcome, ImportError> {
        let candidates = match ingestor.deletion_candidates(self.guard) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("{name}: {err}; deletion refused");
                return Ok(DeletionOutcome::Refused(err));
            }
        };
        if !ingestor.deletes_records() || self.policy == DeletionPolicy::ReportOnly {
            return Ok(DeletionOutcome::Reported(candidates));
        }
        for candidate in &candidates {
            let mut unit = self.store.begin()?;
            ingestor.dispose(&mut *unit, candidate)?;
            unit.commit()?;
            info!("{name}: deleted {candidate}");
        }
        Ok(DeletionOutcome::Applied(candidates))
    }
}
