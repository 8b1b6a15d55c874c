use super::*;

#[test]
fn test_defaults_are_valid() {
    let config = RangeConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.alpha_hull.thinning_distance, 250.0);
    assert_eq!(config.subdivide.max_points, 256);
    assert_eq!(config.core_range_id, 1);
}

#[test]
fn test_partial_json_uses_defaults() {
    let config = RangeConfig::from_json(r#"{"alpha_hull": {"alpha": 2.0}, "parallel": {"workers": 3}}"#)
        .unwrap();
    assert_eq!(config.alpha_hull.alpha, 2.0);
    assert_eq!(config.alpha_hull.hull_buffer, 1000.0);
    assert_eq!(config.parallel.worker_count(), 3);
    assert_eq!(config.parallel.mode, WorkerMode::Threads);
}

#[test]
fn test_processes_mode_requires_program() {
    let err = RangeConfig::from_json(r#"{"parallel": {"mode": "processes"}}"#).unwrap_err();
    assert!(matches!(err, RangeError::Config(_)));

    let config =
        RangeConfig::from_json(r#"{"parallel": {"mode": "processes", "worker_program": "/bin/worker"}}"#)
            .unwrap();
    assert_eq!(config.parallel.mode, WorkerMode::Processes);
}

#[test]
fn test_rejects_bad_values() {
    assert!(RangeConfig::from_json(r#"{"alpha_hull": {"alpha": 0.0}}"#).is_err());
    assert!(RangeConfig::from_json(r#"{"alpha_hull": {"hull_buffer": -1.0}}"#).is_err());
    assert!(RangeConfig::from_json(r#"{"max_error_rate": 1.5}"#).is_err());
    assert!(RangeConfig::from_json(r#"{"tile_cache": {"zoom_step": 0}}"#).is_err());
    assert!(RangeConfig::from_json(r#"{"subdivide": {"max_points": 3}}"#).is_err());
}

#[test]
fn test_json_round_trip_preserves_settings() {
    let mut config = RangeConfig::default();
    config.max_error_rate = Some(0.25);
    config.projection_origin = Some([134.0, -28.0]);
    let back = RangeConfig::from_json(&config.to_json().unwrap()).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_missing_file_is_io_error() {
    let err = RangeConfig::from_json_file("/nonexistent/range-config.json").unwrap_err();
    assert!(matches!(err, RangeError::Io(_)));
}

#[test]
fn test_grid_cell_for_point() {
    let grid = GridSpec::default();
    assert_eq!(grid.cell_for(Point::new(-180.0, -90.0)), GridCell { col: 0, row: 0 });
    assert_eq!(grid.cell_for(Point::new(150.5, -33.9)), GridCell { col: 330, row: 56 });

    let fine = GridSpec {
        cell_size: 0.25,
        origin: [150.0, -34.0],
    };
    assert_eq!(fine.cell_for(Point::new(150.3, -33.9)), GridCell { col: 1, row: 0 });
    assert_eq!(fine.cell_for(Point::new(149.9, -34.1)), GridCell { col: -1, row: -1 });
}
