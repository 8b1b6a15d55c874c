//! Geometry helpers shared by the hull, resolver and absence stages.

use std::path::Path;

use geo::{unary_union, Area, BoundingRect, CoordsIter, InteriorPoint, Validation};
use geo_types::{Coord, Geometry, GeometryCollection, MultiPolygon, Polygon, Rect};
use geojson::GeoJson;

use crate::error::{RangeError, Result};
use crate::polygonizer::Polygonizer;

/// Normalises any geometry to multi-polygon form.
///
/// Polygons are wrapped, collections flattened, and non-polygonal parts
/// dropped.
pub fn to_multi_polygon(geometry: Geometry<f64>) -> MultiPolygon<f64> {
    let mut polygons = Vec::new();
    collect_polygons(geometry, &mut polygons);
    MultiPolygon::new(polygons)
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp.0),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in gc.0 {
                collect_polygons(g, out);
            }
        }
        _ => {}
    }
}

pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

pub fn point_count(geometry: &MultiPolygon<f64>) -> usize {
    geometry.coords_count()
}

/// Union of an arbitrary set of polygons.
pub fn union_all<'a>(polygons: impl IntoIterator<Item = &'a Polygon<f64>>) -> MultiPolygon<f64> {
    unary_union(polygons)
}

/// Bounds of a geometry, `None` when it is empty.
pub fn bounds(geometry: &MultiPolygon<f64>) -> Option<Rect<f64>> {
    geometry.bounding_rect()
}

/// Loads a polygonal boundary (e.g. a coastline mask) from a GeoJSON file.
pub fn load_boundary(path: impl AsRef<Path>) -> Result<MultiPolygon<f64>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let geojson: GeoJson = text.parse()?;
    let collection: GeometryCollection<f64> = geojson::quick_collection(&geojson)?;
    let boundary = to_multi_polygon(Geometry::GeometryCollection(collection));
    if boundary.0.is_empty() {
        return Err(RangeError::Config(format!(
            "boundary file {} holds no polygonal area",
            path.display()
        )));
    }
    log::debug!(
        "Loaded boundary {} ({} polygons, {} points)",
        path.display(),
        boundary.0.len(),
        point_count(&boundary)
    );
    Ok(boundary)
}

/// Even-odd containment over every ring of a polygon.
///
/// Unlike `Contains`, this gives a meaningful answer for self-intersecting
/// rings, which is what repair needs.
pub fn even_odd_contains(polygon: &Polygon<f64>, point: Coord<f64>) -> bool {
    let mut crossings = 0usize;
    for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
        for segment in ring.lines() {
            let (p1, p2) = (segment.start, segment.end);
            if (p1.y > point.y) != (p2.y > point.y)
                && point.x < (p2.x - p1.x) * (point.y - p1.y) / (p2.y - p1.y) + p1.x
            {
                crossings += 1;
            }
        }
    }
    crossings % 2 == 1
}

/// Removes self-intersections from a polygonal geometry.
///
/// Valid input with area is returned unchanged. Otherwise the rings are noded and
/// polygonized, and faces inside any member polygon (even-odd rule) are kept
/// and unioned, so overlapping members merge.
pub fn make_valid(geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
    if geometry.0.is_empty() {
        return Ok(geometry.clone());
    }
    if geometry.is_valid() && geometry.0.iter().all(|p| p.unsigned_area() > 0.0) {
        return Ok(geometry.clone());
    }

    let mut polygonizer = Polygonizer::new().with_noding(true).faces_only();
    polygonizer.add_geometry(&Geometry::MultiPolygon(geometry.clone()));
    let faces = polygonizer.polygonize()?;

    let kept: Vec<Polygon<f64>> = faces
        .into_iter()
        .filter(|face| {
            face.interior_point()
                .is_some_and(|p| geometry.0.iter().any(|poly| even_odd_contains(poly, p.0)))
        })
        .collect();
    if kept.is_empty() {
        return Err(RangeError::InvalidGeometry(
            "no area remains after removing self-intersections".to_string(),
        ));
    }

    let repaired = union_all(&kept);
    if repaired.0.is_empty() || !repaired.is_valid() {
        return Err(RangeError::InvalidGeometry(
            "geometry is still invalid after repair".to_string(),
        ));
    }
    Ok(repaired)
}

#[cfg(test)]
#[path = "geometry_tests.rs"]
mod tests;
