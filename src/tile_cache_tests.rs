use super::*;
use geo::Intersects;
use geo_types::{polygon, LineString, Polygon};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn star(points: usize, inner: f64, outer: f64) -> Polygon<f64> {
    let coords: Vec<(f64, f64)> = (0..points * 2)
        .map(|i| {
            let r = if i % 2 == 0 { outer } else { inner };
            let a = i as f64 * std::f64::consts::PI / points as f64;
            (150.0 + r * a.cos(), -30.0 + r * a.sin())
        })
        .collect();
    let hole = LineString::from(vec![
        (149.9, -30.1),
        (149.9, -29.9),
        (150.1, -29.9),
        (150.1, -30.1),
        (149.9, -30.1),
    ]);
    Polygon::new(LineString::from(coords), vec![hole])
}

#[test]
fn test_agrees_with_exact_predicate() {
    let mp = MultiPolygon::new(vec![
        star(7, 0.8, 2.0),
        polygon![(x: 153.0, y: -31.0), (x: 154.0, y: -31.0), (x: 153.5, y: -30.2)],
    ]);
    let mut cache = TileCache::new(mp.clone());
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..2000 {
        let x = rng.gen_range(147.5..154.5);
        let y = rng.gen_range(-32.5..-27.5);
        assert_eq!(
            cache.intersects_or_contains(x, y),
            mp.intersects(&Point::new(x, y)),
            "disagreement at ({x}, {y})"
        );
    }
    let stats = cache.stats();
    assert!(stats.hits > 0);
    assert!(stats.misses > 0);
}

#[test]
fn test_repeated_queries_are_stable() {
    let mp = MultiPolygon::new(vec![star(5, 1.0, 2.5)]);
    let mut cache = TileCache::new(mp);
    let first: Vec<bool> = (0..50)
        .map(|i| cache.intersects_or_contains(148.0 + i as f64 * 0.08, -30.05))
        .collect();
    let tiles = cache.len();
    let second: Vec<bool> = (0..50)
        .map(|i| cache.intersects_or_contains(148.0 + i as f64 * 0.08, -30.05))
        .collect();
    assert_eq!(first, second);
    assert_eq!(cache.len(), tiles);
}

#[test]
fn test_boundary_points_count_as_intersecting() {
    let square = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
    let mut cache = TileCache::new(MultiPolygon::new(vec![square]));
    assert!(cache.intersects_or_contains(0.0, 5.0));
    assert!(cache.intersects_or_contains(10.0, 10.0));
    assert!(cache.intersects_or_contains(5.0, 5.0));
    assert!(!cache.intersects_or_contains(10.000001, 5.0));
}

#[test]
fn test_points_outside_bounds_are_rejected_without_tiles() {
    let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
    let mut cache = TileCache::new(MultiPolygon::new(vec![square]));
    assert!(!cache.intersects_or_contains(5.0, 5.0));
    assert!(!cache.intersects_or_contains(f64::NAN, 0.5));
    assert!(cache.is_empty());
}

#[test]
fn test_empty_polygon_never_intersects() {
    let mut cache = TileCache::new(MultiPolygon::new(vec![]));
    assert!(!cache.intersects_or_contains(0.0, 0.0));
}

#[test]
fn test_tiles_nest_across_zoom_levels() {
    let square = polygon![(x: 0.0, y: 0.0), (x: 16.0, y: 0.0), (x: 16.0, y: 16.0), (x: 0.0, y: 16.0)];
    let cache = TileCache::new(MultiPolygon::new(vec![square]));
    let parent = cache.tile_key(5.3, 11.9, 2).unwrap();
    let child = cache.tile_key(5.3, 11.9, 4).unwrap();
    assert_eq!((parent.x, parent.y), (1, 2));
    assert_eq!((child.x >> 2, child.y >> 2), (parent.x, parent.y));

    let edge = cache.tile_key(16.0, 16.0, 4).unwrap();
    assert_eq!((edge.x, edge.y), (15, 15));
    let bounds = cache.tile_bounds(edge).unwrap();
    assert_eq!(bounds.min(), Coord { x: 15.0, y: 15.0 });
}

#[test]
fn test_interior_tiles_short_circuit() {
    let square = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
    let config = TileCacheConfig {
        start_zoom: 2,
        zoom_step: 2,
        max_zoom: 16,
    };
    let mut cache = TileCache::with_config(MultiPolygon::new(vec![square]), config);
    assert!(cache.intersects_or_contains(3.0, 3.0));
    assert_eq!(cache.stats().exact_tests, 0);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_tiny_hole_is_not_swallowed_by_an_inside_tile() {
    let hole = LineString::from(vec![
        (10.0, 10.0),
        (10.0005, 10.0),
        (10.0005, 10.0005),
        (10.0, 10.0005),
        (10.0, 10.0),
    ]);
    let square = Polygon::new(
        LineString::from(vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0), (0.0, 0.0)]),
        vec![hole],
    );
    let mp = MultiPolygon::new(vec![square]);
    let mut cache = TileCache::new(mp.clone());

    for (x, y) in [(10.00025, 10.00025), (10.0001, 10.0004), (10.0, 10.00025), (9.9999, 10.00025), (50.0, 50.0)] {
        assert_eq!(
            cache.intersects_or_contains(x, y),
            mp.intersects(&Point::new(x, y)),
            "disagreement at ({x}, {y})"
        );
    }
    assert!(!cache.intersects_or_contains(10.00025, 10.00025));
}

#[test]
fn test_zero_zoom_step_still_terminates() {
    let triangle = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0)];
    let config = TileCacheConfig {
        start_zoom: 0,
        zoom_step: 0,
        max_zoom: 6,
    };
    let mut cache = TileCache::with_config(MultiPolygon::new(vec![triangle]), config);
    assert!(cache.intersects_or_contains(1.0, 1.0));
    assert!(cache.intersects_or_contains(4.0, 6.0));
    assert!(!cache.intersects_or_contains(9.0, 9.0));
}
