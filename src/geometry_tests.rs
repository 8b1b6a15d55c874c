use super::*;
use approx::assert_relative_eq;
use geo::{Area, Validation};
use geo_types::{line_string, point, polygon, GeometryCollection, Rect};

fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
    Rect::new(Coord { x: x0, y: y0 }, Coord { x: x0 + size, y: y0 + size }).to_polygon()
}

#[test]
fn test_to_multi_polygon_normalises() {
    let collection = Geometry::GeometryCollection(GeometryCollection::new_from(vec![
        Geometry::Polygon(square(0.0, 0.0, 1.0)),
        Geometry::Point(point!(x: 5.0, y: 5.0)),
        Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]),
        Geometry::MultiPolygon(MultiPolygon::new(vec![square(2.0, 0.0, 1.0), square(4.0, 0.0, 1.0)])),
    ]));
    let mp = to_multi_polygon(collection);
    assert_eq!(mp.0.len(), 3);

    let single = to_multi_polygon(Geometry::Polygon(square(0.0, 0.0, 2.0)));
    assert_eq!(single.0.len(), 1);

    assert!(to_multi_polygon(Geometry::Point(point!(x: 0.0, y: 0.0))).0.is_empty());
}

#[test]
fn test_make_valid_passes_valid_input_through() {
    let mp = MultiPolygon::new(vec![square(0.0, 0.0, 10.0)]);
    assert_eq!(make_valid(&mp).unwrap(), mp);
    assert!(make_valid(&empty()).unwrap().0.is_empty());
}

#[test]
fn test_make_valid_splits_bowtie() {
    let bowtie = polygon![
        (x: 0.0, y: 0.0),
        (x: 10.0, y: 10.0),
        (x: 10.0, y: 0.0),
        (x: 0.0, y: 10.0),
        (x: 0.0, y: 0.0),
    ];
    let mp = MultiPolygon::new(vec![bowtie]);
    assert!(!mp.is_valid());

    let repaired = make_valid(&mp).unwrap();
    assert!(repaired.is_valid());
    assert_relative_eq!(repaired.unsigned_area(), 50.0, epsilon = 1e-6);
}

#[test]
fn test_make_valid_merges_overlapping_members() {
    let mp = MultiPolygon::new(vec![square(0.0, 0.0, 10.0), square(5.0, 0.0, 10.0)]);
    assert!(!mp.is_valid());

    let repaired = make_valid(&mp).unwrap();
    assert!(repaired.is_valid());
    assert_eq!(repaired.0.len(), 1);
    assert_relative_eq!(repaired.unsigned_area(), 150.0, epsilon = 1e-6);
}

#[test]
fn test_even_odd_contains_with_hole() {
    let donut = Polygon::new(
        square(0.0, 0.0, 10.0).exterior().clone(),
        vec![square(4.0, 4.0, 2.0).exterior().clone()],
    );
    assert!(even_odd_contains(&donut, Coord { x: 1.0, y: 1.0 }));
    assert!(!even_odd_contains(&donut, Coord { x: 5.0, y: 5.0 }));
    assert!(!even_odd_contains(&donut, Coord { x: 11.0, y: 5.0 }));
}

#[test]
fn test_load_boundary_from_geojson() {
    let path = std::env::temp_dir().join(format!("geo-ranges-boundary-{}.geojson", std::process::id()));
    std::fs::write(
        &path,
        r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon",
              "coordinates": [[[110.0, -45.0], [155.0, -45.0], [155.0, -10.0], [110.0, -10.0], [110.0, -45.0]]]}},
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}}
        ]}"#,
    )
    .unwrap();

    let boundary = load_boundary(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(boundary.0.len(), 1);
    assert_relative_eq!(boundary.unsigned_area(), 45.0 * 35.0, epsilon = 1e-9);
}

#[test]
fn test_load_boundary_missing_file_is_fatal() {
    let err = load_boundary("/nonexistent/coast.geojson").unwrap_err();
    assert!(matches!(err, RangeError::Io(_)));
}
