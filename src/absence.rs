//! Pseudo-absence derivation.
//!
//! A location (site or grid cell) belongs to a taxon when any point of its
//! survey history falls inside the taxon's subdivided core-range hull. Every
//! processed survey at a member location that recorded no sighting of the
//! taxon gets one zero-count pseudo-absence row.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use geo::{BoundingRect, CoordsIter};
use geo_types::{MultiPolygon, Point};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};

use crate::config::{GridSpec, RangeConfig, TileCacheConfig};
use crate::error::{RangeError, Result};
use crate::model::{
    AlphaHullRecord, LocationKey, ProcessedSurvey, ProcessedSurveyId, PseudoAbsenceSighting, SamplingDesign,
    Sighting, SurveyId, SurveyVisit, Taxon, TaxonId, UltrataxonAssignment,
};
use crate::parallel::Job;
use crate::tile_cache::TileCache;

/// Settings shared by both absence designs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbsenceSettings {
    pub grid: GridSpec,
    pub tile_cache: TileCacheConfig,
    pub core_range_id: i32,
}

impl From<&RangeConfig> for AbsenceSettings {
    fn from(config: &RangeConfig) -> Self {
        Self {
            grid: config.grid,
            tile_cache: config.tile_cache,
            core_range_id: config.core_range_id,
        }
    }
}

/// The location a visit counts towards under `design`.
///
/// Site-design visits without a site are ignored. Grid-design visits without
/// a cell get the cell holding their point.
pub fn location_of(visit: &SurveyVisit, design: SamplingDesign, grid: &GridSpec) -> Option<LocationKey> {
    match design {
        SamplingDesign::Site => visit.site_id.map(LocationKey::Site),
        SamplingDesign::Grid => Some(LocationKey::GridCell(
            visit.grid_cell.unwrap_or_else(|| grid.cell_for(visit.point)),
        )),
    }
}

/// Groups raw visits into one processed survey per location, year and month.
///
/// Ids are assigned from 1 in (location, year, month) order.
pub fn process_surveys(visits: &[SurveyVisit], design: SamplingDesign, grid: &GridSpec) -> Vec<ProcessedSurvey> {
    let mut groups: BTreeMap<(LocationKey, i32, u32), BTreeSet<SurveyId>> = BTreeMap::new();
    for visit in visits {
        if let Some(location) = location_of(visit, design, grid) {
            groups
                .entry((location, visit.year, visit.month))
                .or_default()
                .insert(visit.survey_id);
        }
    }
    groups
        .into_iter()
        .enumerate()
        .map(|(i, ((location, year, month), surveys))| ProcessedSurvey {
            id: i as ProcessedSurveyId + 1,
            design,
            location,
            year,
            month,
            source_survey_ids: surveys.into_iter().collect(),
        })
        .collect()
}

/// Every distinct point a location has been surveyed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationHistory {
    pub location: LocationKey,
    pub points: Vec<Point<f64>>,
}

pub fn location_histories(visits: &[SurveyVisit], design: SamplingDesign, grid: &GridSpec) -> Vec<LocationHistory> {
    let mut points: BTreeMap<LocationKey, Vec<Point<f64>>> = BTreeMap::new();
    for visit in visits {
        if let Some(location) = location_of(visit, design, grid) {
            let seen = points.entry(location).or_default();
            if !seen.contains(&visit.point) {
                seen.push(visit.point);
            }
        }
    }
    points
        .into_iter()
        .map(|(location, points)| LocationHistory { location, points })
        .collect()
}

/// One taxon's subdivided core-range hull pieces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MembershipTask {
    pub taxon_id: TaxonId,
    pub pieces: Vec<MultiPolygon<f64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaxonMembership {
    pub taxon_id: TaxonId,
    pub locations: BTreeSet<LocationKey>,
}

/// Builds one membership task per taxon sampled with `design`, from the
/// subdivided core-range hulls. Taxa without such hulls get no task.
pub fn membership_tasks(
    taxa: &[Taxon],
    subdivided_hulls: &[AlphaHullRecord],
    design: SamplingDesign,
    core_range_id: i32,
) -> Vec<MembershipTask> {
    let mut pieces: BTreeMap<&str, Vec<MultiPolygon<f64>>> = taxa
        .iter()
        .filter(|t| t.sampling == design)
        .map(|t| (t.id.as_str(), Vec::new()))
        .collect();
    for hull in subdivided_hulls.iter().filter(|h| h.is_core(core_range_id)) {
        if let Some(list) = pieces.get_mut(hull.taxon_id.as_str()) {
            list.push(hull.geometry.clone());
        }
    }
    pieces
        .into_iter()
        .filter(|(_, pieces)| !pieces.is_empty())
        .map(|(taxon_id, pieces)| MembershipTask {
            taxon_id: taxon_id.to_string(),
            pieces,
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MembershipContext {
    pub locations: Vec<LocationHistory>,
    pub tile_cache: TileCacheConfig,
}

/// Location × taxon membership, the expensive half of absence generation.
pub struct MembershipJob {
    context: MembershipContext,
    index: RTree<GeomWithData<[f64; 2], usize>>,
}

impl MembershipJob {
    pub fn new(locations: Vec<LocationHistory>, tile_cache: TileCacheConfig) -> Self {
        let index = RTree::bulk_load(
            locations
                .iter()
                .enumerate()
                .flat_map(|(i, history)| {
                    history
                        .points
                        .iter()
                        .map(move |p| GeomWithData::new([p.x(), p.y()], i))
                })
                .collect(),
        );
        Self {
            context: MembershipContext { locations, tile_cache },
            index,
        }
    }

    pub fn membership(&self, task: &MembershipTask) -> TaxonMembership {
        let mut members: BTreeSet<usize> = BTreeSet::new();
        for piece in &task.pieces {
            let Some(bounds) = piece.bounding_rect() else {
                continue;
            };
            let envelope = AABB::from_corners([bounds.min().x, bounds.min().y], [bounds.max().x, bounds.max().y]);
            let mut hits: Vec<(usize, [f64; 2])> = self
                .index
                .locate_in_envelope(&envelope)
                .filter(|g| !members.contains(&g.data))
                .map(|g| (g.data, *g.geom()))
                .collect();
            if hits.is_empty() {
                continue;
            }
            hits.sort_by(|a, b| a.0.cmp(&b.0).then(a.1[0].total_cmp(&b.1[0])).then(a.1[1].total_cmp(&b.1[1])));

            let mut cache = TileCache::with_config(piece.clone(), self.context.tile_cache);
            for (location, [x, y]) in hits {
                if !members.contains(&location) && cache.intersects_or_contains(x, y) {
                    members.insert(location);
                }
            }
        }
        TaxonMembership {
            taxon_id: task.taxon_id.clone(),
            locations: members
                .into_iter()
                .map(|i| self.context.locations[i].location)
                .collect(),
        }
    }
}

impl Job for MembershipJob {
    const NAME: &'static str = "absence_membership";
    type Context = MembershipContext;
    type Task = MembershipTask;
    type Output = TaxonMembership;

    fn context(&self) -> MembershipContext {
        self.context.clone()
    }

    fn from_context(context: MembershipContext) -> Result<Self> {
        Ok(Self::new(context.locations, context.tile_cache))
    }

    fn label(task: &MembershipTask) -> String {
        task.taxon_id.clone()
    }

    fn run(&self, task: MembershipTask) -> Result<TaxonMembership> {
        let finite = |piece: &MultiPolygon<f64>| piece.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite());
        if !task.pieces.iter().all(finite) {
            return Err(RangeError::InvalidGeometry(format!(
                "hull of taxon {} has non-finite coordinates",
                task.taxon_id
            )));
        }
        Ok(self.membership(&task))
    }
}

/// Real records per raw survey: sightings plus ultrataxon assignments.
fn recorded_taxa<'a>(
    sightings: &'a [Sighting],
    assignments: &'a [UltrataxonAssignment],
) -> HashMap<SurveyId, HashSet<&'a str>> {
    let survey_of: HashMap<i64, SurveyId> = sightings.iter().map(|s| (s.id, s.survey_id)).collect();
    let mut recorded: HashMap<SurveyId, HashSet<&str>> = HashMap::new();
    for s in sightings {
        recorded.entry(s.survey_id).or_default().insert(s.taxon_id.as_str());
    }
    for a in assignments {
        if let Some(survey) = survey_of.get(&a.sighting_id) {
            recorded.entry(*survey).or_default().insert(a.taxon_id.as_str());
        }
    }
    recorded
}

/// The anti-join: one absence per (processed survey, taxon) at a member
/// location with no real record of the taxon. Sorted, no duplicates.
pub fn absences_from_membership(
    memberships: &[TaxonMembership],
    processed: &[ProcessedSurvey],
    sightings: &[Sighting],
    assignments: &[UltrataxonAssignment],
) -> Vec<PseudoAbsenceSighting> {
    let recorded = recorded_taxa(sightings, assignments);
    let mut by_location: HashMap<LocationKey, Vec<&ProcessedSurvey>> = HashMap::new();
    for survey in processed {
        by_location.entry(survey.location).or_default().push(survey);
    }

    let mut absences = BTreeSet::new();
    for membership in memberships {
        let taxon = membership.taxon_id.as_str();
        for location in &membership.locations {
            for survey in by_location.get(location).into_iter().flatten() {
                let seen = survey
                    .source_survey_ids
                    .iter()
                    .any(|id| recorded.get(id).is_some_and(|taxa| taxa.contains(taxon)));
                if !seen {
                    absences.insert(PseudoAbsenceSighting::new(
                        survey.id,
                        membership.taxon_id.clone(),
                        survey.design,
                    ));
                }
            }
        }
    }
    absences.into_iter().collect()
}

/// Raw survey history absences are derived from.
#[derive(Clone, Copy, Debug)]
pub struct SurveyHistory<'a> {
    pub visits: &'a [SurveyVisit],
    pub sightings: &'a [Sighting],
    pub assignments: &'a [UltrataxonAssignment],
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AbsenceRun {
    pub processed: Vec<ProcessedSurvey>,
    pub absences: Vec<PseudoAbsenceSighting>,
}

/// Derives absences for one design on the calling thread.
///
/// `subdivided_hulls` are the subdivided alpha hull pieces of every taxon.
pub fn generate_absences(
    taxa: &[Taxon],
    subdivided_hulls: &[AlphaHullRecord],
    history: SurveyHistory<'_>,
    design: SamplingDesign,
    settings: &AbsenceSettings,
) -> AbsenceRun {
    let processed = process_surveys(history.visits, design, &settings.grid);
    let job = MembershipJob::new(
        location_histories(history.visits, design, &settings.grid),
        settings.tile_cache,
    );
    let memberships: Vec<TaxonMembership> = membership_tasks(taxa, subdivided_hulls, design, settings.core_range_id)
        .iter()
        .map(|task| job.membership(task))
        .collect();
    let absences = absences_from_membership(&memberships, &processed, history.sightings, history.assignments);
    AbsenceRun { processed, absences }
}

#[cfg(test)]
#[path = "absence_tests.rs"]
mod tests;
