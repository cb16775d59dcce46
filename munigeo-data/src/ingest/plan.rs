//! Zoning plan tables to plans.
//!
//! Plans arrive as rows of two files, in-effect plans first and proposed
//! plans second, with one polygon per row. Rows sharing a plan identifier
//! are collected into one [`PlanDraft`] before anything is written.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use geo::{MultiPolygon, Polygon};
use log::{debug, info};
use munigeo_core::{
    DeletionGuard, GeometryProjector, Plan, RecordId, RecordStoreExt, Scope, SourceFeature, Srid,
    SyncError, SyncSet,
};

use super::{
    DeletionCandidate, FeatureIngestor, IngestContext, commit_feature, feature_geometry,
    required_attribute, unseen_candidates,
};
use crate::error::ImportError;
use crate::runner::FeatureOutcome;

/// Attribute carrying the plan identifier.
pub const PLAN_ID_ATTRIBUTE: &str = "kaavatunnus";

/// A plan assembled from every row sharing its identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDraft {
    /// Plan identifier.
    pub origin_id: String,
    /// Polygons in row order, already in the target system.
    pub polygons: Vec<Polygon<f64>>,
    /// Whether the plan was listed in the in-effect file.
    pub in_effect: bool,
}

#[derive(Debug, Default)]
struct Drafts {
    order: Vec<PlanDraft>,
    index: HashMap<String, usize>,
}

/// Collects plan rows into drafts in first-seen order.
#[derive(Debug)]
pub struct PlanAccumulator<'a> {
    projector: &'a GeometryProjector,
    srid: Srid,
    drafts: Mutex<Drafts>,
}

impl<'a> PlanAccumulator<'a> {
    /// Empty accumulator projecting rows from `srid`.
    #[must_use]
    pub fn new(projector: &'a GeometryProjector, srid: Srid) -> Self {
        Self {
            projector,
            srid,
            drafts: Mutex::new(Drafts::default()),
        }
    }

    /// Add one row from the in-effect (`in_effect == true`) or proposed file.
    ///
    /// A plan already listed as in effect ignores rows from the proposed
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::MissingIdentifier`] or geometry failures for
    /// the row.
    pub fn add(
        &self,
        feature: &SourceFeature,
        in_effect: bool,
    ) -> Result<FeatureOutcome, ImportError> {
        let origin_id = required_attribute(feature, PLAN_ID_ATTRIBUTE)?;
        let (geometry, srid) = feature_geometry(feature, self.srid)?;
        let polygons = self.projector.project_boundary(geometry, srid)?.0;

        let mut drafts = self.drafts.lock().unwrap_or_else(PoisonError::into_inner);
        let Drafts { order, index } = &mut *drafts;
        match index.get(&origin_id).and_then(|&at| order.get_mut(at)) {
            Some(draft) if draft.in_effect && !in_effect => {
                return Ok(FeatureOutcome::Skipped(format!(
                    "plan {origin_id} is already in effect"
                )));
            }
            Some(draft) => draft.polygons.extend(polygons),
            None => {
                index.insert(origin_id.clone(), order.len());
                order.push(PlanDraft {
                    origin_id,
                    polygons,
                    in_effect,
                });
            }
        }
        Ok(FeatureOutcome::Queued)
    }

    /// Number of distinct plans collected.
    pub fn len(&self) -> usize {
        self.drafts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    /// Whether no plan has been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The collected drafts in first-seen order.
    #[must_use]
    pub fn into_drafts(self) -> Vec<PlanDraft> {
        self.drafts
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .order
    }
}

/// Writes assembled plans for one municipality.
pub struct PlanIngestor<'a> {
    ctx: IngestContext<'a>,
    municipality: RecordId,
    sync: SyncSet<Plan, String>,
}

impl std::fmt::Debug for PlanIngestor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanIngestor")
            .field("municipality", &self.municipality)
            .field("sync", &self.sync)
            .finish_non_exhaustive()
    }
}

impl<'a> PlanIngestor<'a> {
    /// Snapshot the plans of `municipality`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn new(ctx: IngestContext<'a>, municipality: RecordId) -> Result<Self, ImportError> {
        let existing = ctx.store.fetch_all::<Plan>(&Scope::of(municipality))?;
        debug!("Loaded {} stored plans", existing.len());
        Ok(Self {
            ctx,
            municipality,
            sync: SyncSet::new(existing, |plan: &Plan| plan.origin_id.clone()),
        })
    }
}

impl FeatureIngestor for PlanIngestor<'_> {
    type Input = PlanDraft;

    fn ingest(&self, draft: Self::Input) -> Result<FeatureOutcome, ImportError> {
        let PlanDraft {
            origin_id,
            polygons,
            in_effect,
        } = draft;
        let geometry = MultiPolygon::new(polygons);
        let mut plan = match self.sync.lookup(&origin_id) {
            Some(mut plan) => {
                plan.geometry = geometry;
                plan.in_effect = in_effect;
                plan
            }
            None => Plan {
                id: None,
                origin_id,
                municipality: self.municipality,
                geometry,
                in_effect,
            },
        };
        let id = commit_feature(&self.ctx, &self.sync, &mut plan, |unit, plan| {
            unit.save_record(plan)?;
            Ok(())
        })?;
        if plan.geometry.0.len() > 1 {
            info!(
                "Plan {} assembled from {} polygons",
                plan.origin_id,
                plan.geometry.0.len()
            );
        }
        Ok(FeatureOutcome::Committed(id))
    }

    fn deletion_candidates(
        &self,
        guard: DeletionGuard,
    ) -> Result<Vec<DeletionCandidate>, SyncError> {
        unseen_candidates(&self.sync, guard, |plan| plan.origin_id.clone())
    }
}
