//! Run configuration.
//!
//! All distances are metres in the projected working system; the grid cell
//! size is in degrees.

use std::path::{Path, PathBuf};

use geo_types::Point;
use serde::{Deserialize, Serialize};

use crate::error::{RangeError, Result};
use crate::model::{GridCell, CORE_RANGE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaHullParams {
    pub thinning_distance: f64,
    /// Triangles whose mean side exceeds `alpha` times the mean edge length are dropped.
    pub alpha: f64,
    pub hull_buffer: f64,
    pub isolated_buffer: f64,
    /// Taxa with fewer occurrence points are skipped before any hull work.
    pub min_points: usize,
}

impl Default for AlphaHullParams {
    fn default() -> Self {
        Self {
            thinning_distance: 250.0,
            alpha: 1.6,
            hull_buffer: 1000.0,
            isolated_buffer: 1000.0,
            min_points: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubdivideConfig {
    pub max_points: usize,
    /// Upper bound on piece width and height, in stored (degree) units.
    pub max_extent: Option<f64>,
}

impl Default for SubdivideConfig {
    fn default() -> Self {
        Self {
            max_points: 256,
            max_extent: None,
        }
    }
}

/// Zoom schedule of the tile cache. Tuning knobs only; results never depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileCacheConfig {
    pub start_zoom: u32,
    pub zoom_step: u32,
    pub max_zoom: u32,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            start_zoom: 2,
            zoom_step: 2,
            max_zoom: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    #[default]
    Threads,
    Processes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Defaults to the available CPU parallelism.
    pub workers: Option<usize>,
    pub mode: WorkerMode,
    /// Executable serving jobs over stdin/stdout, required for `processes`.
    pub worker_program: Option<PathBuf>,
}

impl ParallelConfig {
    pub fn threads(workers: usize) -> Self {
        Self {
            workers: Some(workers),
            ..Self::default()
        }
    }

    pub fn processes(workers: usize, program: impl Into<PathBuf>) -> Self {
        Self {
            workers: Some(workers),
            mode: WorkerMode::Processes,
            worker_program: Some(program.into()),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub cell_size: f64,
    pub origin: [f64; 2],
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            cell_size: 1.0,
            origin: [-180.0, -90.0],
        }
    }
}

impl GridSpec {
    /// Cell holding `point`; cells are closed on their lower edges.
    pub fn cell_for(&self, point: Point<f64>) -> GridCell {
        GridCell {
            col: ((point.x() - self.origin[0]) / self.cell_size).floor() as i32,
            row: ((point.y() - self.origin[1]) / self.cell_size).floor() as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    pub alpha_hull: AlphaHullParams,
    pub subdivide: SubdivideConfig,
    pub tile_cache: TileCacheConfig,
    pub parallel: ParallelConfig,
    pub grid: GridSpec,
    /// GeoJSON file holding the coastal/landmass mask.
    pub coastal_boundary: Option<PathBuf>,
    /// `[lon, lat]` centre of the working projection.
    pub projection_origin: Option<[f64; 2]>,
    pub core_range_id: i32,
    /// Fraction of failed tasks above which a batch is rolled back.
    pub max_error_rate: Option<f64>,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            alpha_hull: AlphaHullParams::default(),
            subdivide: SubdivideConfig::default(),
            tile_cache: TileCacheConfig::default(),
            parallel: ParallelConfig::default(),
            grid: GridSpec::default(),
            coastal_boundary: None,
            projection_origin: None,
            core_range_id: CORE_RANGE_ID,
            max_error_rate: None,
        }
    }
}

impl RangeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RangeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let hull = &self.alpha_hull;
        for (name, value) in [
            ("thinning_distance", hull.thinning_distance),
            ("hull_buffer", hull.hull_buffer),
            ("isolated_buffer", hull.isolated_buffer),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(RangeError::Config(format!(
                    "{name} must be a finite, non-negative distance (got {value})"
                )));
            }
        }
        if !hull.alpha.is_finite() || hull.alpha <= 0.0 {
            return Err(RangeError::Config(format!("alpha must be positive (got {})", hull.alpha)));
        }
        if self.subdivide.max_points < 5 {
            return Err(RangeError::Config(
                "subdivide.max_points must be at least 5".to_string(),
            ));
        }
        if let Some(extent) = self.subdivide.max_extent {
            if !extent.is_finite() || extent <= 0.0 {
                return Err(RangeError::Config("subdivide.max_extent must be positive".to_string()));
            }
        }
        let tiles = &self.tile_cache;
        if tiles.zoom_step == 0 || tiles.start_zoom > tiles.max_zoom || tiles.max_zoom > 30 {
            return Err(RangeError::Config(format!(
                "invalid tile cache zoom schedule {}..{} step {}",
                tiles.start_zoom, tiles.max_zoom, tiles.zoom_step
            )));
        }
        if self.parallel.workers == Some(0) {
            return Err(RangeError::Config("parallel.workers must be positive".to_string()));
        }
        if self.parallel.mode == WorkerMode::Processes && self.parallel.worker_program.is_none() {
            return Err(RangeError::Config(
                "parallel.worker_program is required in processes mode".to_string(),
            ));
        }
        if !self.grid.cell_size.is_finite() || self.grid.cell_size <= 0.0 {
            return Err(RangeError::Config("grid.cell_size must be positive".to_string()));
        }
        if let Some(rate) = self.max_error_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(RangeError::Config(format!(
                    "max_error_rate must lie in [0, 1] (got {rate})"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
