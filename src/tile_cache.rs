//! Memoised point-in-polygon test over a quad-tile pyramid.
//!
//! The pyramid is laid over the polygon's own bounding box, so even a small
//! polygon converges in a few zoom levels. Each visited tile is classified
//! once as fully outside, fully inside, or partial. Partial tiles keep the
//! polygon clipped to the tile and their children are classified against
//! that clip. Below the deepest zoom level the exact predicate decides.

use std::collections::HashMap;

use geo::{Area, BooleanOps, BoundingRect, Contains, Intersects};
use geo_types::{Coord, MultiPolygon, Point, Rect};

use crate::config::TileCacheConfig;

/// Relative area shortfall under which a tile is checked for full cover.
const COVER_CANDIDATE: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TileState {
    Outside,
    Inside,
    /// Polygon clipped to the tile. Empty when the polygon only touches it.
    Partial(MultiPolygon<f64>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileCacheStats {
    pub hits: usize,
    pub misses: usize,
    pub exact_tests: usize,
}

enum Step {
    Done(bool),
    Exact,
    Descend,
}

pub struct TileCache {
    polygon: MultiPolygon<f64>,
    bounds: Option<Rect<f64>>,
    config: TileCacheConfig,
    tiles: HashMap<TileKey, TileState>,
    stats: TileCacheStats,
}

impl TileCache {
    pub fn new(polygon: MultiPolygon<f64>) -> Self {
        Self::with_config(polygon, TileCacheConfig::default())
    }

    /// A `zoom_step` of zero is raised to one.
    pub fn with_config(polygon: MultiPolygon<f64>, config: TileCacheConfig) -> Self {
        let bounds = polygon.bounding_rect();
        Self {
            polygon,
            bounds,
            config: TileCacheConfig {
                zoom_step: config.zoom_step.max(1),
                ..config
            },
            tiles: HashMap::new(),
            stats: TileCacheStats::default(),
        }
    }

    pub fn polygon(&self) -> &MultiPolygon<f64> {
        &self.polygon
    }

    pub fn stats(&self) -> TileCacheStats {
        self.stats
    }

    /// Number of classified tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Key of the tile holding `(x, y)` at zoom `z`, or `None` outside the polygon's bounds.
    pub fn tile_key(&self, x: f64, y: f64, z: u32) -> Option<TileKey> {
        let bounds = self.bounds?;
        let (min, max) = (bounds.min(), bounds.max());
        if !(min.x..=max.x).contains(&x) || !(min.y..=max.y).contains(&y) {
            return None;
        }
        let n = 1u64 << z;
        let index = |v: f64, lo: f64, extent: f64| -> u32 {
            if extent <= 0.0 {
                return 0;
            }
            let i = ((v - lo) / extent * n as f64).floor() as u64;
            i.min(n - 1) as u32
        };
        Some(TileKey {
            z,
            x: index(x, min.x, bounds.width()),
            y: index(y, min.y, bounds.height()),
        })
    }

    /// Extent of a tile in the polygon's coordinate system.
    pub fn tile_bounds(&self, key: TileKey) -> Option<Rect<f64>> {
        let bounds = self.bounds?;
        let n = (1u64 << key.z) as f64;
        let (w, h) = (bounds.width() / n, bounds.height() / n);
        let min = bounds.min();
        Some(Rect::new(
            Coord {
                x: min.x + key.x as f64 * w,
                y: min.y + key.y as f64 * h,
            },
            Coord {
                x: min.x + (key.x + 1) as f64 * w,
                y: min.y + (key.y + 1) as f64 * h,
            },
        ))
    }

    /// True when the point lies inside or on the boundary of the polygon.
    ///
    /// Always agrees with the exact `Intersects` predicate; the cache only
    /// changes how quickly the answer is found.
    pub fn intersects_or_contains(&mut self, x: f64, y: f64) -> bool {
        let Some(bounds) = self.bounds else {
            return false;
        };
        if self.tile_key(x, y, 0).is_none() {
            return false;
        }
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return self.exact(x, y);
        }

        let TileCacheConfig {
            start_zoom,
            zoom_step,
            max_zoom,
        } = self.config;
        let mut z = start_zoom;
        let mut parent: Option<TileKey> = None;

        loop {
            let Some(key) = self.tile_key(x, y, z) else {
                return false;
            };
            if self.tiles.contains_key(&key) {
                self.stats.hits += 1;
            } else {
                self.stats.misses += 1;
                let state = self.classify(key, parent);
                self.tiles.insert(key, state);
            }

            let step = match self.tiles.get(&key) {
                Some(TileState::Outside) => Step::Done(false),
                Some(TileState::Inside) => Step::Done(true),
                Some(TileState::Partial(clip)) if clip.0.is_empty() => Step::Exact,
                Some(TileState::Partial(_)) if z + zoom_step > max_zoom => Step::Exact,
                Some(TileState::Partial(_)) => Step::Descend,
                None => Step::Exact,
            };
            match step {
                Step::Done(result) => return result,
                Step::Exact => return self.exact(x, y),
                Step::Descend => {
                    parent = Some(key);
                    z += zoom_step;
                }
            }
        }
    }

    fn exact(&mut self, x: f64, y: f64) -> bool {
        self.stats.exact_tests += 1;
        self.polygon.intersects(&Point::new(x, y))
    }

    fn classify(&self, key: TileKey, parent: Option<TileKey>) -> TileState {
        let source = match parent.and_then(|p| self.tiles.get(&p)) {
            Some(TileState::Partial(clip)) if !clip.0.is_empty() => clip,
            _ => &self.polygon,
        };
        let Some(tile) = self.tile_bounds(key) else {
            return TileState::Outside;
        };
        let tile_polygon = tile.to_polygon();
        if !source.intersects(&tile_polygon) {
            return TileState::Outside;
        }

        let clip = source.intersection(&tile_polygon);
        let tile_area = tile.width() * tile.height();
        // The area only shortlists; a hole or slit too small to show in it
        // must still leave the tile partial.
        if clip.unsigned_area() >= tile_area * (1.0 - COVER_CANDIDATE) && self.polygon.contains(&tile_polygon) {
            TileState::Inside
        } else {
            TileState::Partial(clip)
        }
    }
}

#[cfg(test)]
#[path = "tile_cache_tests.rs"]
mod tests;
