//! Azimuthal equidistant working projection.
//!
//! Hull buffers and thinning distances are metric, so hull construction runs
//! in a projected system centred on the study area. The transforms come from
//! `proj4rs`; a [`Projection`] only records the origin so it can travel to
//! worker processes, and [`Projection::transformer`] builds the proj pair.

use geo::{Centroid, MapCoords};
use geo_types::{Coord, MultiPolygon, Point};
use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};

use crate::error::{RangeError, Result};

/// Mean earth radius in metres.
pub const EARTH_RADIUS: f64 = 6_371_008.8;

fn proj_error(e: impl std::fmt::Display) -> RangeError {
    RangeError::Projection(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    lon0: f64,
    lat0: f64,
}

impl Projection {
    /// Projection centred on `(lon, lat)` in degrees.
    pub fn azimuthal_equidistant(lon: f64, lat: f64) -> Result<Self> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return Err(RangeError::Config(format!(
                "invalid projection origin ({lon}, {lat})"
            )));
        }
        let projection = Self { lon0: lon, lat0: lat };
        projection.transformer()?;
        Ok(projection)
    }

    /// Centred on the centroid of `area`.
    pub fn centred_on(area: &MultiPolygon<f64>) -> Result<Self> {
        let centre = area
            .centroid()
            .ok_or_else(|| RangeError::Config("cannot centre a projection on an empty area".to_string()))?;
        Self::azimuthal_equidistant(centre.x(), centre.y())
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.lon0, self.lat0)
    }

    /// proj definition of the projected system, on the mean earth sphere.
    pub fn proj_string(&self) -> String {
        format!(
            "+proj=aeqd +lat_0={} +lon_0={} +x_0=0 +y_0=0 +R={EARTH_RADIUS} +units=m +no_defs",
            self.lat0, self.lon0
        )
    }

    pub fn transformer(&self) -> Result<Transformer> {
        let geographic = Proj::from_proj_string(&format!("+proj=longlat +R={EARTH_RADIUS} +no_defs"))
            .map_err(proj_error)?;
        let projected = Proj::from_proj_string(&self.proj_string()).map_err(proj_error)?;
        Ok(Transformer { geographic, projected })
    }

    pub fn project_points(&self, points: &[Point<f64>]) -> Result<Vec<Point<f64>>> {
        let transformer = self.transformer()?;
        points.iter().map(|p| transformer.forward(p.0).map(Point)).collect()
    }

    pub fn project(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        self.transformer()?.project(geometry)
    }

    pub fn unproject(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        self.transformer()?.unproject(geometry)
    }
}

/// A pair of proj definitions bound to one [`Projection`].
pub struct Transformer {
    geographic: Proj,
    projected: Proj,
}

impl Transformer {
    /// WGS84 degrees to projected metres.
    pub fn forward(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let mut point = (c.x.to_radians(), c.y.to_radians(), 0.0);
        proj4rs::transform::transform(&self.geographic, &self.projected, &mut point).map_err(proj_error)?;
        Ok(Coord { x: point.0, y: point.1 })
    }

    /// Projected metres back to WGS84 degrees.
    pub fn inverse(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let mut point = (c.x, c.y, 0.0);
        proj4rs::transform::transform(&self.projected, &self.geographic, &mut point).map_err(proj_error)?;
        Ok(Coord {
            x: point.0.to_degrees(),
            y: point.1.to_degrees(),
        })
    }

    pub fn project(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        geometry.try_map_coords(|c| self.forward(c))
    }

    pub fn unproject(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        geometry.try_map_coords(|c| self.inverse(c))
    }
}
