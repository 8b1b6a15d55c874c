//! Splits large polygons into pieces small enough to index efficiently.
//!
//! Pieces are cut along axis-aligned lines, so the union of the output equals
//! the input up to floating-point noise at the cuts.

use geo::{BooleanOps, BoundingRect, CoordsIter};
use geo_types::{Coord, MultiPolygon, Rect};

use crate::config::SubdivideConfig;

/// Bisection depth after which a piece is emitted as-is.
const MAX_DEPTH: u32 = 48;

struct Piece {
    geometry: MultiPolygon<f64>,
    bounds: Rect<f64>,
    depth: u32,
}

/// Depth-first iterator over subdivided pieces. Single pass.
pub struct Subdivide {
    stack: Vec<Piece>,
    max_points: usize,
    max_extent: Option<f64>,
}

/// Lazily splits `geometry` into pieces of at most `max_points` coordinates,
/// and at most `max_extent` wide and tall when given.
pub fn subdivide(geometry: MultiPolygon<f64>, max_points: usize, max_extent: Option<f64>) -> Subdivide {
    let stack = geometry
        .bounding_rect()
        .map(|bounds| Piece {
            geometry,
            bounds,
            depth: 0,
        })
        .into_iter()
        .collect();
    Subdivide {
        stack,
        max_points,
        max_extent,
    }
}

pub fn subdivide_with(geometry: MultiPolygon<f64>, config: &SubdivideConfig) -> Subdivide {
    subdivide(geometry, config.max_points, config.max_extent)
}

impl Subdivide {
    fn is_small(&self, piece: &Piece) -> bool {
        let extent_ok = self
            .max_extent
            .map_or(true, |e| piece.bounds.width() <= e && piece.bounds.height() <= e);
        extent_ok && piece.geometry.coords_count() <= self.max_points
    }
}

impl Iterator for Subdivide {
    type Item = MultiPolygon<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(piece) = self.stack.pop() {
            if self.is_small(&piece) {
                return Some(piece.geometry);
            }
            if piece.depth >= MAX_DEPTH {
                log::warn!(
                    "Subdivision depth limit reached; emitting piece with {} points",
                    piece.geometry.coords_count()
                );
                return Some(piece.geometry);
            }

            let (first, second) = bisect(piece.bounds);
            for half in [second, first] {
                let clipped = piece.geometry.intersection(&half.to_polygon());
                if clipped.0.is_empty() {
                    continue;
                }
                if let Some(bounds) = clipped.bounding_rect() {
                    self.stack.push(Piece {
                        geometry: clipped,
                        bounds,
                        depth: piece.depth + 1,
                    });
                }
            }
        }
        None
    }
}

/// Halves a rectangle across its longer axis.
fn bisect(bounds: Rect<f64>) -> (Rect<f64>, Rect<f64>) {
    let (min, max) = (bounds.min(), bounds.max());
    if bounds.width() >= bounds.height() {
        let mid = min.x + bounds.width() / 2.0;
        (
            Rect::new(min, Coord { x: mid, y: max.y }),
            Rect::new(Coord { x: mid, y: min.y }, max),
        )
    } else {
        let mid = min.y + bounds.height() / 2.0;
        (
            Rect::new(min, Coord { x: max.x, y: mid }),
            Rect::new(Coord { x: min.x, y: mid }, max),
        )
    }
}

#[cfg(test)]
#[path = "subdivide_tests.rs"]
mod tests;
