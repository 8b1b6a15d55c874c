//! Concave "alpha" hulls over occurrence points.
//!
//! Hull construction runs in projected metres: points are thinned,
//! triangulated, and the triangles with short sides are kept. The kept
//! region is buffered, isolated outliers are added back as small discs, and
//! the result is clipped to the coastal mask.

use std::collections::BTreeMap;

use geo::{BooleanOps, Buffer, Intersects, InteriorPoint};
use geo_types::{Coord, Line, MultiPolygon, Point, Polygon, Triangle};
use rstar::primitives::GeomWithData;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use spade::{DelaunayTriangulation, Point2, Triangulation};

use crate::config::{AlphaHullParams, SubdivideConfig};
use crate::error::{RangeError, Result};
use crate::geometry::{empty, make_valid, union_all};
use crate::model::{AlphaHullRecord, RangeRecord, SkipReason, TaxonId};
use crate::parallel::Job;
use crate::polygonizer::Polygonizer;
use crate::projection::Projection;
use crate::subdivide::subdivide;
use crate::tile_cache::TileCache;

/// Fewest thinned points that can form a triangle.
const MIN_HULL_POINTS: usize = 3;

struct IndexedTriangle {
    polygon: Polygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl IndexedTriangle {
    fn new(triangle: Triangle<f64>) -> Self {
        let [a, b, c] = triangle.to_array();
        let envelope = AABB::from_corners(
            [a.x.min(b.x).min(c.x), a.y.min(b.y).min(c.y)],
            [a.x.max(b.x).max(c.x), a.y.max(b.y).max(c.y)],
        );
        Self {
            polygon: triangle.to_polygon(),
            envelope,
        }
    }
}

impl RTreeObject for IndexedTriangle {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Indices of the points that survive thinning, ascending.
///
/// Close pairs (strictly nearer than `distance`) are visited by increasing
/// distance, then by index. The later point of a pair is dropped unless one
/// of the two is already gone.
pub fn thin_points(points: &[Coord<f64>], distance: f64) -> Vec<usize> {
    let mut retained = vec![true; points.len()];
    if distance > 0.0 && points.len() > 1 {
        let tree = RTree::bulk_load(
            points
                .iter()
                .enumerate()
                .map(|(i, c)| GeomWithData::new([c.x, c.y], i))
                .collect(),
        );
        let limit = distance * distance;

        let mut pairs = Vec::new();
        for (i, c) in points.iter().enumerate() {
            for near in tree.locate_within_distance([c.x, c.y], limit) {
                let j = near.data;
                if j <= i {
                    continue;
                }
                let d2 = (points[j].x - c.x).powi(2) + (points[j].y - c.y).powi(2);
                if d2 < limit {
                    pairs.push((d2, i, j));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        for (_, i, j) in pairs {
            if retained[i] && retained[j] {
                retained[j] = false;
            }
        }
    }
    (0..points.len()).filter(|&i| retained[i]).collect()
}

fn distance(a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Alpha shape of a point set.
///
/// Triangles of the Delaunay triangulation whose mean side is shorter than
/// `alpha` times the mean edge length are kept. Their outline is polygonized
/// and the faces covered by kept triangles are unioned.
pub fn alpha_shape(points: &[Coord<f64>], alpha: f64) -> Result<MultiPolygon<f64>> {
    let mut triangulation: DelaunayTriangulation<Point2<f64>> = DelaunayTriangulation::new();
    for c in points {
        triangulation
            .insert(Point2::new(c.x, c.y))
            .map_err(|e| RangeError::TriangulationError(format!("{e:?} at ({}, {})", c.x, c.y)))?;
    }
    if triangulation.num_inner_faces() == 0 {
        return Ok(empty());
    }

    let (total, edges) = triangulation
        .undirected_edges()
        .fold((0.0, 0usize), |(total, n), edge| {
            let [a, b] = edge.vertices();
            (total + distance(a.position(), b.position()), n + 1)
        });
    let threshold = alpha * total / edges as f64;

    let mut kept = Vec::new();
    let mut edge_use: BTreeMap<(usize, usize), (usize, Line<f64>)> = BTreeMap::new();
    for face in triangulation.inner_faces() {
        let vertices = face.vertices();
        let positions = vertices.map(|v| v.position());
        let mean_side = (distance(positions[0], positions[1])
            + distance(positions[1], positions[2])
            + distance(positions[2], positions[0]))
            / 3.0;
        if mean_side >= threshold {
            continue;
        }

        let coords = positions.map(|p| Coord { x: p.x, y: p.y });
        kept.push(IndexedTriangle::new(Triangle::new(coords[0], coords[1], coords[2])));
        for (u, v) in [(0, 1), (1, 2), (2, 0)] {
            let (iu, iv) = (vertices[u].fix().index(), vertices[v].fix().index());
            let key = (iu.min(iv), iu.max(iv));
            edge_use
                .entry(key)
                .or_insert((0, Line::new(coords[u], coords[v])))
                .0 += 1;
        }
    }
    if kept.is_empty() {
        return Ok(empty());
    }

    let mut polygonizer = Polygonizer::new().faces_only();
    for (count, line) in edge_use.values() {
        if *count == 1 {
            polygonizer.add_segment(*line);
        }
    }
    let faces = polygonizer.polygonize()?;

    let index = RTree::bulk_load(kept);
    let covered: Vec<Polygon<f64>> = faces
        .into_iter()
        .filter(|face| {
            face.interior_point().is_some_and(|p| {
                index
                    .locate_in_envelope_intersecting(&AABB::from_point([p.x(), p.y()]))
                    .any(|t| t.polygon.intersects(&p))
            })
        })
        .collect();
    Ok(union_all(&covered))
}

/// Builds the hull of `points`, all in projected metres.
///
/// Fewer than three points after thinning give an empty hull.
pub fn build_alpha_hull(
    points: &[Point<f64>],
    coastal_boundary: Option<&MultiPolygon<f64>>,
    params: &AlphaHullParams,
) -> Result<MultiPolygon<f64>> {
    if let Some(bad) = points.iter().find(|p| !p.x().is_finite() || !p.y().is_finite()) {
        return Err(RangeError::InvalidGeometry(format!(
            "non-finite occurrence point ({}, {})",
            bad.x(),
            bad.y()
        )));
    }

    let coords: Vec<Coord<f64>> = points.iter().map(|p| p.0).collect();
    let thinned: Vec<Coord<f64>> = thin_points(&coords, params.thinning_distance)
        .into_iter()
        .map(|i| coords[i])
        .collect();
    if thinned.len() < MIN_HULL_POINTS {
        log::debug!("{} points left after thinning, no hull", thinned.len());
        return Ok(empty());
    }

    let mut hull = alpha_shape(&thinned, params.alpha)?;
    if params.hull_buffer > 0.0 && !hull.0.is_empty() {
        hull = hull.buffer(params.hull_buffer);
    }

    let mut cache = TileCache::new(hull.clone());
    let isolated: Vec<Polygon<f64>> = thinned
        .iter()
        .filter(|c| !cache.intersects_or_contains(c.x, c.y))
        .flat_map(|c| Point(*c).buffer(params.isolated_buffer).0)
        .collect();
    if !isolated.is_empty() {
        log::debug!("{} isolated points buffered into the hull", isolated.len());
        hull = union_all(hull.0.iter().chain(isolated.iter()));
    }

    if let Some(coast) = coastal_boundary {
        hull = hull.intersection(coast);
    }
    Ok(hull)
}

/// One taxon's occurrence points (WGS84) and range records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HullTask {
    pub taxon_id: TaxonId,
    pub points: Vec<Point<f64>>,
    pub ranges: Vec<RangeRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaxonHulls {
    pub taxon_id: TaxonId,
    pub hulls: Vec<AlphaHullRecord>,
    pub subdivided: Vec<AlphaHullRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum HullOutcome {
    Built(TaxonHulls),
    Skipped { taxon_id: TaxonId, reason: SkipReason },
}

/// Per-taxon hull construction shared by every worker of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlphaHullJob {
    pub params: AlphaHullParams,
    pub subdivide: SubdivideConfig,
    pub projection: Projection,
    /// Coastal mask in projected metres.
    pub coast: Option<MultiPolygon<f64>>,
}

impl AlphaHullJob {
    /// `coast` is given in WGS84 and projected once here.
    pub fn new(
        params: AlphaHullParams,
        subdivide: SubdivideConfig,
        projection: Projection,
        coast: Option<&MultiPolygon<f64>>,
    ) -> Result<Self> {
        Ok(Self {
            params,
            subdivide,
            projection,
            coast: coast.map(|c| projection.project(c)).transpose()?,
        })
    }

    pub fn process(&self, task: HullTask) -> Result<HullOutcome> {
        let HullTask {
            taxon_id,
            points,
            mut ranges,
        } = task;
        let skip = |taxon_id: TaxonId, reason: SkipReason| -> Result<HullOutcome> {
            Ok(HullOutcome::Skipped { taxon_id, reason })
        };

        if points.len() < self.params.min_points {
            log::warn!(
                "Taxon {taxon_id}: {} occurrence points, at least {} needed for a hull",
                points.len(),
                self.params.min_points
            );
            return skip(
                taxon_id,
                SkipReason::TooFewPoints {
                    found: points.len(),
                    required: self.params.min_points,
                },
            );
        }
        if ranges.is_empty() {
            log::warn!("Taxon {taxon_id} has occurrence points but no range records");
            return skip(taxon_id, SkipReason::NoRangeRecords);
        }

        let transformer = self.projection.transformer()?;
        let projected = points
            .iter()
            .map(|p| transformer.forward(p.0).map(Point))
            .collect::<Result<Vec<_>>>()?;
        let hull = build_alpha_hull(&projected, self.coast.as_ref(), &self.params)?;
        if hull.0.is_empty() {
            log::debug!("Taxon {taxon_id}: empty hull");
            return skip(taxon_id, SkipReason::EmptyHull);
        }
        let hull = transformer.unproject(&hull)?;

        ranges.sort_by_key(|r| (r.range_id, r.breeding_range_id));
        let mut hulls = Vec::new();
        let mut subdivided = Vec::new();
        for range in &ranges {
            let geometry = match make_valid(&range.geometry) {
                Ok(geometry) => geometry,
                Err(e) => {
                    log::warn!("Taxon {taxon_id}: range {} skipped: {e}", range.range_id);
                    return skip(taxon_id, SkipReason::InvalidGeometry(e.to_string()));
                }
            };
            let clipped = hull.intersection(&geometry);
            if clipped.0.is_empty() {
                continue;
            }
            let record = |geometry: MultiPolygon<f64>| AlphaHullRecord {
                taxon_id: taxon_id.clone(),
                range_id: range.range_id,
                breeding_range_id: range.breeding_range_id,
                geometry,
            };
            subdivided.extend(
                subdivide(clipped.clone(), self.subdivide.max_points, self.subdivide.max_extent).map(record),
            );
            hulls.push(record(clipped));
        }

        if hulls.is_empty() {
            log::debug!("Taxon {taxon_id}: hull misses every range record");
            return skip(taxon_id, SkipReason::EmptyHull);
        }
        log::debug!(
            "Taxon {taxon_id}: {} hulls, {} subdivided pieces",
            hulls.len(),
            subdivided.len()
        );
        Ok(HullOutcome::Built(TaxonHulls {
            taxon_id,
            hulls,
            subdivided,
        }))
    }
}

impl Job for AlphaHullJob {
    const NAME: &'static str = "alpha_hull";
    type Context = AlphaHullJob;
    type Task = HullTask;
    type Output = HullOutcome;

    fn context(&self) -> Self::Context {
        self.clone()
    }

    fn from_context(context: Self::Context) -> Result<Self> {
        Ok(context)
    }

    fn label(task: &Self::Task) -> String {
        task.taxon_id.clone()
    }

    fn run(&self, task: Self::Task) -> Result<Self::Output> {
        self.process(task)
    }
}

#[cfg(test)]
#[path = "alpha_hull_tests.rs"]
mod tests;
