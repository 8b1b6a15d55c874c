//! Assigns sightings to ultrataxa by range membership.
//!
//! Sightings of the taxon itself are tested against each of its ranges. For a
//! subspecies, sightings recorded only at the parent-species level are tested
//! too and, when inside, assigned with `generated_subspecies` set. The
//! original sightings are never modified.

use std::collections::HashSet;

use geo::BoundingRect;
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};

use crate::config::TileCacheConfig;
use crate::error::Result;
use crate::geometry::make_valid;
use crate::model::{RangeRecord, Sighting, SightingId, SkipReason, Taxon, TaxonId, UltrataxonAssignment};
use crate::parallel::Job;
use crate::tile_cache::TileCache;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    Resolved {
        taxon_id: TaxonId,
        assignments: Vec<UltrataxonAssignment>,
    },
    Skipped {
        taxon_id: TaxonId,
        reason: SkipReason,
    },
}

impl Resolution {
    pub fn taxon_id(&self) -> &str {
        match self {
            Resolution::Resolved { taxon_id, .. } | Resolution::Skipped { taxon_id, .. } => taxon_id,
        }
    }
}

/// Resolves one taxon.
///
/// `candidates` may hold sightings of any taxon; only those of `taxon` and of
/// its `parent` species are considered. Assignments come back sorted and hold
/// at most one row per sighting.
pub fn resolve_taxon(
    taxon: &Taxon,
    parent: Option<&Taxon>,
    ranges: &[RangeRecord],
    candidates: &[Sighting],
    tiles: &TileCacheConfig,
) -> Resolution {
    let skipped = |reason| Resolution::Skipped {
        taxon_id: taxon.id.clone(),
        reason,
    };

    if !taxon.ultrataxon {
        if !ranges.is_empty() {
            log::warn!("Taxon {} has range records but is not an ultrataxon", taxon.id);
        }
        return skipped(SkipReason::NotUltrataxon);
    }
    if ranges.is_empty() {
        log::debug!("Taxon {} has no range records", taxon.id);
        return skipped(SkipReason::NoRangeRecords);
    }

    let parent_id = parent.filter(|_| taxon.is_subspecies()).map(|p| p.id.as_str());
    let entries: Vec<(&Sighting, bool)> = candidates
        .iter()
        .filter_map(|s| {
            if s.taxon_id == taxon.id {
                Some((s, false))
            } else if Some(s.taxon_id.as_str()) == parent_id {
                Some((s, true))
            } else {
                None
            }
        })
        .collect();
    let index = RTree::bulk_load(
        entries
            .iter()
            .enumerate()
            .map(|(i, (s, _))| GeomWithData::new([s.point.x(), s.point.y()], i))
            .collect(),
    );

    let mut ordered: Vec<&RangeRecord> = ranges.iter().collect();
    ordered.sort_by_key(|r| (r.range_id, r.breeding_range_id));

    let mut assigned: HashSet<SightingId> = HashSet::new();
    let mut assignments = Vec::new();
    for range in ordered {
        let geometry = match make_valid(&range.geometry) {
            Ok(geometry) => geometry,
            Err(e) => {
                log::warn!("Taxon {}: range {} cannot be repaired: {e}", taxon.id, range.range_id);
                return skipped(SkipReason::InvalidGeometry(e.to_string()));
            }
        };
        let Some(bounds) = geometry.bounding_rect() else {
            continue;
        };
        let envelope = AABB::from_corners([bounds.min().x, bounds.min().y], [bounds.max().x, bounds.max().y]);
        let mut shortlist: Vec<usize> = index.locate_in_envelope(&envelope).map(|g| g.data).collect();
        shortlist.sort_unstable();

        let mut cache = TileCache::with_config(geometry, *tiles);
        for i in shortlist {
            let (sighting, generated) = entries[i];
            if assigned.contains(&sighting.id) {
                continue;
            }
            if cache.intersects_or_contains(sighting.point.x(), sighting.point.y()) {
                assigned.insert(sighting.id);
                assignments.push(UltrataxonAssignment {
                    sighting_id: sighting.id,
                    taxon_id: taxon.id.clone(),
                    range_id: range.range_id,
                    generated_subspecies: generated,
                });
            }
        }
        log::debug!(
            "Taxon {} range {}: {:?}",
            taxon.id,
            range.range_id,
            cache.stats()
        );
    }

    assignments.sort();
    Resolution::Resolved {
        taxon_id: taxon.id.clone(),
        assignments,
    }
}

/// Everything needed to resolve one taxon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UltrataxonTask {
    pub taxon: Taxon,
    pub parent: Option<Taxon>,
    pub ranges: Vec<RangeRecord>,
    pub candidates: Vec<Sighting>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UltrataxonJob {
    pub tile_cache: TileCacheConfig,
}

impl Job for UltrataxonJob {
    const NAME: &'static str = "ultrataxon";
    type Context = TileCacheConfig;
    type Task = UltrataxonTask;
    type Output = Resolution;

    fn context(&self) -> TileCacheConfig {
        self.tile_cache
    }

    fn from_context(tile_cache: TileCacheConfig) -> Result<Self> {
        Ok(Self { tile_cache })
    }

    fn label(task: &UltrataxonTask) -> String {
        task.taxon.id.clone()
    }

    fn run(&self, task: UltrataxonTask) -> Result<Resolution> {
        Ok(resolve_taxon(
            &task.taxon,
            task.parent.as_ref(),
            &task.ranges,
            &task.candidates,
            &self.tile_cache,
        ))
    }
}

#[cfg(test)]
#[path = "ultrataxon_tests.rs"]
mod tests;
