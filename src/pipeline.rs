//! Batch entry points.
//!
//! Each stage reads its inputs from a [`RangeStore`], fans the per-taxon work
//! out with [`run_parallel`], and writes all results in one unit of work.
//! Taxa whose task failed keep their previous rows.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use geo_types::{MultiPolygon, Point};

use crate::absence::{
    absences_from_membership, location_histories, membership_tasks, process_surveys, MembershipJob,
};
use crate::alpha_hull::{AlphaHullJob, HullOutcome, HullTask};
use crate::config::RangeConfig;
use crate::error::{RangeError, Result, TaskError};
use crate::geometry::load_boundary;
use crate::model::{RangeRecord, SamplingDesign, Sighting, SkipReason, Taxon, TaxonId};
use crate::parallel::{run_parallel, Job};
use crate::projection::Projection;
use crate::store::{RangeStore, UnitOfWork};
use crate::ultrataxon::{Resolution, UltrataxonJob, UltrataxonTask};

/// Outcome counts of one batch stage.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReport {
    pub stage: String,
    pub succeeded: usize,
    pub skipped: BTreeMap<TaxonId, SkipReason>,
    pub errors: Vec<TaskError>,
}

impl BatchReport {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            ..Self::default()
        }
    }

    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped.len() + self.failed()
    }

    pub fn error_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.failed() as f64 / total as f64,
        }
    }

    fn skip(&mut self, taxon_id: TaxonId, reason: SkipReason) {
        self.skipped.insert(taxon_id, reason);
    }

    fn fail(&mut self, error: TaskError) {
        log::error!("{}: {error}", self.stage);
        self.errors.push(error);
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} succeeded, {} skipped, {} failed",
            self.stage,
            self.succeeded,
            self.skipped.len(),
            self.failed()
        )
    }
}

fn group_by_taxon<T>(rows: Vec<T>, taxon: impl Fn(&T) -> &str) -> HashMap<TaxonId, Vec<T>> {
    let mut grouped: HashMap<TaxonId, Vec<T>> = HashMap::new();
    for row in rows {
        grouped.entry(taxon(&row).to_string()).or_default().push(row);
    }
    grouped
}

pub struct Pipeline<'s, S: RangeStore + ?Sized> {
    store: &'s S,
    config: RangeConfig,
    coast: Option<MultiPolygon<f64>>,
}

impl<'s, S: RangeStore + ?Sized> Pipeline<'s, S> {
    /// Validates the configuration and loads the coastal boundary. Both are
    /// fatal before any work starts.
    pub fn new(store: &'s S, config: RangeConfig) -> Result<Self> {
        config.validate()?;
        let coast = config.coastal_boundary.as_ref().map(load_boundary).transpose()?;
        Ok(Self { store, config, coast })
    }

    /// Uses an already loaded coastal boundary (WGS84).
    pub fn with_coast(mut self, coast: MultiPolygon<f64>) -> Self {
        self.coast = Some(coast);
        self
    }

    pub fn config(&self) -> &RangeConfig {
        &self.config
    }

    /// Working projection: the configured origin, else the coast centroid.
    pub fn projection(&self) -> Result<Projection> {
        match (self.config.projection_origin, &self.coast) {
            (Some([lon, lat]), _) => Projection::azimuthal_equidistant(lon, lat),
            (None, Some(coast)) => Projection::centred_on(coast),
            (None, None) => Err(RangeError::Config(
                "either projection_origin or coastal_boundary is required to build hulls".to_string(),
            )),
        }
    }

    fn selected(&self, only: Option<&[TaxonId]>) -> Result<Vec<Taxon>> {
        let mut taxa = self.store.taxa()?;
        if let Some(only) = only {
            taxa.retain(|t| only.contains(&t.id));
        }
        taxa.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(taxa)
    }

    /// Stages writes, then commits unless too many tasks failed.
    fn finish(
        &self,
        report: BatchReport,
        stage: impl FnOnce(&mut dyn UnitOfWork) -> Result<()>,
    ) -> Result<BatchReport> {
        let mut work = self.store.begin()?;
        if let Err(e) = stage(work.as_mut()) {
            work.rollback();
            return Err(e);
        }
        if let Some(threshold) = self.config.max_error_rate {
            if report.error_rate() > threshold {
                work.rollback();
                log::warn!("{report}; error rate above {threshold}, rolled back");
                return Err(RangeError::ErrorRateExceeded {
                    failed: report.failed(),
                    total: report.total(),
                    threshold,
                });
            }
        }
        work.commit()?;
        log::info!("{report}");
        Ok(report)
    }

    /// Rebuilds alpha hulls for every selected taxon with points or ranges.
    pub fn build_alpha_hulls(&self, only: Option<&[TaxonId]>) -> Result<BatchReport> {
        let taxa = self.selected(only)?;
        let projection = self.projection()?;
        let mut ranges = group_by_taxon(self.store.range_records()?, |r: &RangeRecord| r.taxon_id.as_str());
        let mut points: HashMap<TaxonId, Vec<Point<f64>>> = HashMap::new();
        for s in self.store.sightings()? {
            points.entry(s.taxon_id).or_default().push(s.point);
        }

        let tasks: Vec<HullTask> = taxa
            .iter()
            .filter_map(|t| {
                let points = points.remove(&t.id).unwrap_or_default();
                let ranges = ranges.remove(&t.id).unwrap_or_default();
                if points.is_empty() && ranges.is_empty() {
                    return None;
                }
                Some(HullTask {
                    taxon_id: t.id.clone(),
                    points,
                    ranges,
                })
            })
            .collect();
        log::info!("Building alpha hulls for {} taxa", tasks.len());

        let job = AlphaHullJob::new(
            self.config.alpha_hull,
            self.config.subdivide,
            projection,
            self.coast.as_ref(),
        )?;
        let mut report = BatchReport::new(AlphaHullJob::NAME);
        let mut replaced = Vec::new();
        let mut hulls = Vec::new();
        let mut subdivided = Vec::new();
        for result in run_parallel(job, tasks, &self.config.parallel)? {
            match result {
                Ok(HullOutcome::Built(built)) => {
                    report.succeeded += 1;
                    replaced.push(built.taxon_id);
                    hulls.extend(built.hulls);
                    subdivided.extend(built.subdivided);
                }
                Ok(HullOutcome::Skipped { taxon_id, reason }) => {
                    replaced.push(taxon_id.clone());
                    report.skip(taxon_id, reason);
                }
                Err(e) => report.fail(e),
            }
        }

        self.finish(report, |work| work.replace_alpha_hulls(&replaced, hulls, subdivided))
    }

    /// Recomputes ultrataxon assignments for the selected taxa.
    pub fn resolve_ultrataxa(&self, only: Option<&[TaxonId]>) -> Result<BatchReport> {
        let all_taxa = self.store.taxa()?;
        let taxa = self.selected(only)?;
        let mut ranges = group_by_taxon(self.store.range_records()?, |r: &RangeRecord| r.taxon_id.as_str());
        let sightings = group_by_taxon(self.store.sightings()?, |s: &Sighting| s.taxon_id.as_str());

        let mut report = BatchReport::new(UltrataxonJob::NAME);
        let mut tasks = Vec::new();
        for taxon in taxa {
            let taxon_ranges = ranges.remove(&taxon.id).unwrap_or_default();
            if !taxon.ultrataxon && taxon_ranges.is_empty() {
                continue;
            }
            let parent = match taxon.parent_species(&all_taxa) {
                Ok(parent) => parent.cloned(),
                Err(e) => {
                    log::warn!("Taxon {} skipped: {e}", taxon.id);
                    report.skip(taxon.id.clone(), SkipReason::DataIntegrity(e.to_string()));
                    continue;
                }
            };
            let mut candidates = sightings.get(&taxon.id).cloned().unwrap_or_default();
            if let Some(parent) = &parent {
                candidates.extend(sightings.get(&parent.id).into_iter().flatten().cloned());
            }
            tasks.push(UltrataxonTask {
                taxon,
                parent,
                ranges: taxon_ranges,
                candidates,
            });
        }
        log::info!("Resolving ultrataxa for {} taxa", tasks.len());

        let job = UltrataxonJob {
            tile_cache: self.config.tile_cache,
        };
        let mut replaced = Vec::new();
        let mut assignments = Vec::new();
        for result in run_parallel(job, tasks, &self.config.parallel)? {
            match result {
                Ok(Resolution::Resolved {
                    taxon_id,
                    assignments: rows,
                }) => {
                    report.succeeded += 1;
                    replaced.push(taxon_id);
                    assignments.extend(rows);
                }
                Ok(Resolution::Skipped { taxon_id, reason }) => {
                    replaced.push(taxon_id.clone());
                    report.skip(taxon_id, reason);
                }
                Err(e) => report.fail(e),
            }
        }

        self.finish(report, |work| work.replace_assignments(&replaced, assignments))
    }

    /// Regenerates processed surveys and pseudo-absences for both designs.
    pub fn generate_pseudo_absences(&self) -> Result<BatchReport> {
        let taxa = self.store.taxa()?;
        let hulls = self.store.subdivided_hulls()?;
        let visits = self.store.survey_visits()?;
        let sightings = self.store.sightings()?;
        let assignments = self.store.assignments()?;
        let grid = self.config.grid;

        let mut report = BatchReport::new(MembershipJob::NAME);
        let mut staged = Vec::new();
        for design in [SamplingDesign::Site, SamplingDesign::Grid] {
            let processed = process_surveys(&visits, design, &grid);
            let tasks = membership_tasks(&taxa, &hulls, design, self.config.core_range_id);
            if tasks.is_empty() {
                staged.push((design, Vec::new(), processed, Vec::new()));
                continue;
            }

            let job = MembershipJob::new(location_histories(&visits, design, &grid), self.config.tile_cache);
            let mut memberships = Vec::new();
            let mut kept = Vec::new();
            for result in run_parallel(job, tasks, &self.config.parallel)? {
                match result {
                    Ok(membership) => {
                        report.succeeded += 1;
                        memberships.push(membership);
                    }
                    Err(e) => {
                        kept.push(e.task.clone());
                        report.fail(e);
                    }
                }
            }
            memberships.sort_by(|a, b| a.taxon_id.cmp(&b.taxon_id));

            let absences = absences_from_membership(&memberships, &processed, &sightings, &assignments);
            log::info!(
                "{design:?} design: {} processed surveys, {} pseudo-absences",
                processed.len(),
                absences.len()
            );
            staged.push((design, kept, processed, absences));
        }

        self.finish(report, |work| {
            for (design, kept, processed, absences) in staged {
                work.replace_absences(design, &kept, processed, absences)?;
            }
            Ok(())
        })
    }

    /// Runs hulls, ultrataxa and absences in order.
    pub fn run_all(&self, only: Option<&[TaxonId]>) -> Result<Vec<BatchReport>> {
        Ok(vec![
            self.build_alpha_hulls(only)?,
            self.resolve_ultrataxa(only)?,
            self.generate_pseudo_absences()?,
        ])
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
