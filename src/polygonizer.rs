use crate::error::{RangeError, Result};
use crate::graph::PlanarGraph;
use geo::line_intersection::line_intersection;
use geo::{Area, BoundingRect, Contains, Line, LineIntersection, Winding};
use geo_types::{Coord, Geometry, LineString, Polygon};
use rstar::{RTree, RTreeObject, AABB};
use std::cmp::Ordering;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const NODING_TOLERANCE: f64 = 1e-10;
const MIN_FACE_AREA: f64 = 1e-12;

struct IndexedShell {
    polygon: Polygon<f64>,
    area: f64,
    envelope: AABB<[f64; 2]>,
    index: usize,
}

impl RTreeObject for IndexedShell {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

#[derive(Clone, Copy, Debug)]
struct IndexedLine {
    line: Line<f64>,
    index: usize,
}

impl RTreeObject for IndexedLine {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        let Line { start, end } = self.line;
        AABB::from_corners(
            [start.x.min(end.x), start.y.min(end.y)],
            [start.x.max(end.x), start.y.max(end.y)],
        )
    }
}

/// Builds polygons from a set of linework.
///
/// Every bounded face of the noded linework becomes a polygon, so nested
/// rings yield both the ring-with-hole and the filled hole. Callers that need
/// a particular region pick faces afterwards.
pub struct Polygonizer {
    /// Split segments at mutual intersections before building the graph.
    pub node_input: bool,
    /// Also emit the outline of every multi-face component as a shell.
    pub promote_unmatched_holes: bool,
    segments: Vec<Line<f64>>,
}

impl Default for Polygonizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Polygonizer {
    pub fn new() -> Self {
        Self {
            node_input: false,
            promote_unmatched_holes: true,
            segments: Vec::new(),
        }
    }

    pub fn with_noding(mut self, node_input: bool) -> Self {
        self.node_input = node_input;
        self
    }

    /// Only emit bounded faces, which then partition the covered area.
    pub fn faces_only(mut self) -> Self {
        self.promote_unmatched_holes = false;
        self
    }

    pub fn add_segment(&mut self, segment: Line<f64>) {
        self.segments.push(segment);
    }

    pub fn add_geometry(&mut self, geom: &Geometry<f64>) {
        let mut lines = Vec::new();
        extract_lines(geom, &mut lines);
        for ls in lines {
            self.segments.extend(ls.lines());
        }
    }

    pub fn polygonize(self) -> Result<Vec<Polygon<f64>>> {
        let finite = |c: Coord<f64>| c.x.is_finite() && c.y.is_finite();
        if let Some(bad) = self.segments.iter().find(|s| !finite(s.start) || !finite(s.end)) {
            return Err(RangeError::InvalidGeometry(format!(
                "non-finite coordinate in segment {:?}",
                bad
            )));
        }

        let promote_unmatched = self.promote_unmatched_holes;
        let segments = if self.node_input {
            node_segments(self.segments)
        } else {
            self.segments
        };

        let mut graph = PlanarGraph::new();
        graph.bulk_load(segments);
        graph.sort_edges();
        graph.prune_dangles();
        let rings = graph.edge_rings();

        let mut shells = Vec::with_capacity(rings.len() / 2);
        let mut holes = Vec::with_capacity(rings.len() / 2);
        for ring in rings {
            let poly = Polygon::new(ring, vec![]);
            let area = poly.signed_area();
            if area.abs() < MIN_FACE_AREA {
                continue;
            }
            if area > 0.0 {
                shells.push(poly);
            } else {
                holes.push(poly);
            }
        }

        // A CW ring without a CCW twin bounds a face the tracer only saw from
        // outside; it becomes a shell of its own.
        let has_twin = |hole: &Polygon<f64>| {
            let hole_area = hole.unsigned_area();
            shells.iter().any(|shell| {
                (shell.unsigned_area() - hole_area).abs() < 1e-6
                    && shell.bounding_rect() == hole.bounding_rect()
            })
        };
        let promote = |hole: &Polygon<f64>| {
            if !promote_unmatched || has_twin(hole) {
                return None;
            }
            let mut shell = hole.clone();
            shell.exterior_mut(|ext| ext.make_ccw_winding());
            Some(shell)
        };

        #[cfg(feature = "parallel")]
        let promoted: Vec<Polygon<f64>> = holes.par_iter().filter_map(promote).collect();
        #[cfg(not(feature = "parallel"))]
        let promoted: Vec<Polygon<f64>> = holes.iter().filter_map(promote).collect();
        shells.extend(promoted);

        let indexed: Vec<IndexedShell> = shells
            .iter()
            .enumerate()
            .filter_map(|(index, shell)| {
                let rect = shell.bounding_rect()?;
                Some(IndexedShell {
                    polygon: shell.clone(),
                    area: shell.unsigned_area(),
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    index,
                })
            })
            .collect();
        let tree = RTree::bulk_load(indexed);

        // Each hole goes to the smallest strictly larger shell containing it.
        let assign = |hole: &Polygon<f64>| -> Option<(usize, LineString<f64>)> {
            let rect = hole.bounding_rect()?;
            let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
            let hole_area = hole.unsigned_area();
            tree.locate_in_envelope_intersecting(&envelope)
                .filter(|cand| cand.area > hole_area + 1e-6 && cand.polygon.contains(hole))
                .min_by(|a, b| a.area.partial_cmp(&b.area).unwrap_or(Ordering::Equal))
                .map(|cand| (cand.index, hole.exterior().clone()))
        };

        #[cfg(feature = "parallel")]
        let assignments: Vec<(usize, LineString<f64>)> = holes.par_iter().filter_map(assign).collect();
        #[cfg(not(feature = "parallel"))]
        let assignments: Vec<(usize, LineString<f64>)> = holes.iter().filter_map(assign).collect();

        let mut shell_holes: Vec<Vec<LineString<f64>>> = vec![Vec::new(); shells.len()];
        for (idx, hole) in assignments {
            shell_holes[idx].push(hole);
        }

        Ok(shells
            .into_iter()
            .zip(shell_holes)
            .map(|(shell, interiors)| {
                let (exterior, _) = shell.into_inner();
                Polygon::new(exterior, interiors)
            })
            .filter(|poly| poly.unsigned_area() >= MIN_FACE_AREA)
            .collect())
    }
}

fn extract_lines(geom: &Geometry<f64>, out: &mut Vec<LineString<f64>>) {
    match geom {
        Geometry::Line(line) => out.push(LineString::new(vec![line.start, line.end])),
        Geometry::LineString(ls) => out.push(ls.clone()),
        Geometry::MultiLineString(mls) => out.extend(mls.0.iter().cloned()),
        Geometry::Polygon(poly) => {
            out.push(poly.exterior().clone());
            out.extend(poly.interiors().iter().cloned());
        }
        Geometry::MultiPolygon(mpoly) => {
            for poly in mpoly {
                out.push(poly.exterior().clone());
                out.extend(poly.interiors().iter().cloned());
            }
        }
        Geometry::Rect(rect) => out.push(rect.to_polygon().exterior().clone()),
        Geometry::Triangle(tri) => out.push(tri.to_polygon().exterior().clone()),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                extract_lines(g, out);
            }
        }
        _ => {}
    }
}

fn is_interior(segment: Line<f64>, p: Coord<f64>) -> bool {
    let tol2 = NODING_TOLERANCE * NODING_TOLERANCE;
    let d0 = (p.x - segment.start.x).powi(2) + (p.y - segment.start.y).powi(2);
    let d1 = (p.x - segment.end.x).powi(2) + (p.y - segment.end.y).powi(2);
    d0 > tol2 && d1 > tol2
}

fn compare_coords(a: &Coord<f64>, b: &Coord<f64>) -> Ordering {
    a.x.partial_cmp(&b.x)
        .unwrap_or(Ordering::Equal)
        .then(a.y.partial_cmp(&b.y).unwrap_or(Ordering::Equal))
}

/// Splits segments at every mutual intersection and removes duplicates.
///
/// Both halves of a crossing receive the same computed split point, so the
/// resulting endpoints match bit for bit.
pub fn node_segments(segments: Vec<Line<f64>>) -> Vec<Line<f64>> {
    let indexed: Vec<IndexedLine> = segments
        .iter()
        .enumerate()
        .map(|(index, &line)| IndexedLine { line, index })
        .collect();
    let tree = RTree::bulk_load(indexed);

    let mut events: Vec<(usize, Coord<f64>)> = Vec::new();
    for (a, b) in tree.intersection_candidates_with_other_tree(&tree) {
        if a.index >= b.index {
            continue;
        }
        match line_intersection(a.line, b.line) {
            Some(LineIntersection::SinglePoint { intersection, .. }) => {
                for cand in [a, b] {
                    if is_interior(cand.line, intersection) {
                        events.push((cand.index, intersection));
                    }
                }
            }
            Some(LineIntersection::Collinear { intersection }) => {
                for p in [intersection.start, intersection.end] {
                    for cand in [a, b] {
                        if is_interior(cand.line, p) {
                            events.push((cand.index, p));
                        }
                    }
                }
            }
            None => {}
        }
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| compare_coords(&a.1, &b.1)));

    let mut noded = Vec::with_capacity(segments.len() + events.len());
    let mut cursor = 0;
    for (seg_idx, segment) in segments.iter().enumerate() {
        let mut splits = Vec::new();
        while cursor < events.len() && events[cursor].0 == seg_idx {
            splits.push(events[cursor].1);
            cursor += 1;
        }
        if splits.is_empty() {
            noded.push(*segment);
            continue;
        }

        let start = segment.start;
        let dist2 = |c: &Coord<f64>| (c.x - start.x).powi(2) + (c.y - start.y).powi(2);
        splits.sort_by(|a, b| dist2(a).partial_cmp(&dist2(b)).unwrap_or(Ordering::Equal));
        splits.dedup_by(|a, b| (a.x - b.x).abs() < NODING_TOLERANCE && (a.y - b.y).abs() < NODING_TOLERANCE);

        let mut current = start;
        for p in splits.into_iter().chain(std::iter::once(segment.end)) {
            if (p.x - current.x).powi(2) + (p.y - current.y).powi(2) > NODING_TOLERANCE * NODING_TOLERANCE {
                noded.push(Line::new(current, p));
                current = p;
            }
        }
    }

    // Orient each segment low-to-high so reversed duplicates collapse too.
    for segment in &mut noded {
        if compare_coords(&segment.start, &segment.end) == Ordering::Greater {
            std::mem::swap(&mut segment.start, &mut segment.end);
        }
    }
    noded.sort_by(|a, b| compare_coords(&a.start, &b.start).then_with(|| compare_coords(&a.end, &b.end)));
    noded.dedup();
    noded
}

#[cfg(test)]
#[path = "polygonizer_tests.rs"]
mod tests;
