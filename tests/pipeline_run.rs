use std::io::Write;

use geo::{Area, BoundingRect};
use geo_ranges::config::ParallelConfig;
use geo_ranges::model::{RangeRecord, SamplingDesign, Sighting, SkipReason, SurveyVisit, Taxon, TaxonLevel};
use geo_ranges::store::Tables;
use geo_ranges::{MemoryStore, Pipeline, RangeConfig};
use geo_types::{polygon, MultiPolygon, Point};
use tempfile::NamedTempFile;

fn taxon(id: &str, spno: i32, level: TaxonLevel, ultrataxon: bool, sampling: SamplingDesign) -> Taxon {
    Taxon {
        id: id.to_string(),
        spno,
        level,
        ultrataxon,
        sampling,
    }
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: x0, y: y0),
        (x: x1, y: y0),
        (x: x1, y: y1),
        (x: x0, y: y1),
    ]])
}

fn range(taxon_id: &str, geometry: MultiPolygon<f64>) -> RangeRecord {
    RangeRecord {
        taxon_id: taxon_id.to_string(),
        range_id: 1,
        breeding_range_id: None,
        geometry,
    }
}

/// 5 x 5 sightings 0.05 degrees apart from (145.0, -35.0).
fn grid_sightings(taxon_id: &str, first_id: i64, surveys: impl Fn(i64) -> i64) -> Vec<Sighting> {
    (0..25)
        .map(|k| Sighting {
            id: first_id + k,
            survey_id: surveys(k),
            taxon_id: taxon_id.to_string(),
            point: Point::new(145.0 + (k / 5) as f64 * 0.05, -35.0 + (k % 5) as f64 * 0.05),
            count: 1,
        })
        .collect()
}

fn visit(survey_id: i64, site_id: i64, x: f64, month: u32) -> SurveyVisit {
    SurveyVisit {
        survey_id,
        site_id: Some(site_id),
        grid_cell: None,
        point: Point::new(x, -34.9),
        year: 2020,
        month,
    }
}

/// `sp1` is split into the subspecies `ssp1`; `gr1` is surveyed on the grid.
fn world() -> Tables {
    let mut sightings = grid_sightings("sp1", 1, |k| if k == 7 { 1 } else { 100 + k });
    sightings.extend(grid_sightings("gr1", 101, |k| 200 + k));
    Tables {
        taxa: vec![
            taxon("gr1", 5, TaxonLevel::Species, true, SamplingDesign::Grid),
            taxon("sp1", 1, TaxonLevel::Species, false, SamplingDesign::Site),
            taxon("ssp1", 1, TaxonLevel::Subspecies, true, SamplingDesign::Site),
        ],
        ranges: vec![
            range("gr1", rect(144.0, -36.0, 146.0, -34.0)),
            range("sp1", rect(144.0, -36.0, 146.0, -34.0)),
            range("ssp1", rect(144.0, -36.0, 145.12, -34.0)),
        ],
        sightings,
        survey_visits: vec![
            visit(1, 10, 145.05, 1),
            visit(2, 10, 145.05, 2),
            visit(3, 20, 170.0, 1),
        ],
        ..Tables::default()
    }
}

/// Land west of 145.1 degrees east.
fn coast_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let coast = serde_json::json!({
        "type": "Polygon",
        "coordinates": [[[144.0, -36.0], [145.1, -36.0], [145.1, -34.0], [144.0, -34.0], [144.0, -36.0]]]
    });
    file.write_all(coast.to_string().as_bytes()).unwrap();
    file
}

fn config(coast: &NamedTempFile, parallel: ParallelConfig) -> RangeConfig {
    let json = serde_json::json!({
        "coastal_boundary": coast.path(),
        "alpha_hull": { "hull_buffer": 1000.0 },
        "subdivide": { "max_points": 64 },
    });
    let mut config = RangeConfig::from_json(&json.to_string()).unwrap();
    config.parallel = parallel;
    config
}

fn run(parallel: ParallelConfig) -> Tables {
    let coast = coast_file();
    let store = MemoryStore::new(world());
    let pipeline = Pipeline::new(&store, config(&coast, parallel)).unwrap();
    let reports = pipeline.run_all(None).unwrap();
    for report in &reports {
        assert_eq!(report.failed(), 0, "{report}");
    }

    assert_eq!(reports[0].succeeded, 2);
    assert_eq!(
        reports[0].skipped.get("ssp1"),
        Some(&SkipReason::TooFewPoints { found: 0, required: 4 })
    );
    assert_eq!(reports[1].skipped.get("sp1"), Some(&SkipReason::NotUltrataxon));
    store.snapshot()
}

#[test]
fn test_pipeline_on_threads() {
    let tables = run(ParallelConfig::threads(3));

    let mut hull_taxa: Vec<&str> = tables.alpha_hulls.iter().map(|h| h.taxon_id.as_str()).collect();
    hull_taxa.sort();
    assert_eq!(hull_taxa, vec!["gr1", "sp1"]);
    for hull in &tables.alpha_hulls {
        let bounds = hull.geometry.bounding_rect().unwrap();
        assert!((bounds.max().x - 145.1).abs() < 0.005, "hull not clipped to the coast");
        assert!(bounds.min().x < 145.0);
        let pieces: f64 = tables
            .subdivided_hulls
            .iter()
            .filter(|p| p.taxon_id == hull.taxon_id)
            .map(|p| p.geometry.unsigned_area())
            .sum();
        let area = hull.geometry.unsigned_area();
        assert!((pieces - area).abs() < area * 1e-4);
    }

    // Columns 0..=2 of sp1's grid fall in ssp1's range and are promoted.
    let ssp1: Vec<_> = tables.assignments.iter().filter(|a| a.taxon_id == "ssp1").collect();
    assert_eq!(ssp1.len(), 15);
    assert!(ssp1.iter().all(|a| a.generated_subspecies && a.sighting_id <= 15));
    assert!(tables.assignments.iter().all(|a| a.taxon_id != "sp1"));

    let mut absences: Vec<(SamplingDesign, i64, &str)> = tables
        .absences
        .iter()
        .map(|a| (a.design, a.processed_survey_id, a.taxon_id.as_str()))
        .collect();
    absences.sort();
    assert_eq!(
        absences,
        vec![
            (SamplingDesign::Site, 2, "sp1"),
            (SamplingDesign::Grid, 1, "gr1"),
            (SamplingDesign::Grid, 2, "gr1"),
        ]
    );
    assert_eq!(tables.processed_surveys.len(), 6);
}

#[test]
fn test_pipeline_on_worker_processes() {
    let on_threads = run(ParallelConfig::threads(2));
    let on_processes = run(ParallelConfig::processes(2, env!("CARGO_BIN_EXE_range_worker")));

    assert_eq!(on_processes.assignments, on_threads.assignments);
    assert_eq!(on_processes.processed_surveys, on_threads.processed_surveys);
    let mut absences = on_processes.absences.clone();
    let mut expected = on_threads.absences.clone();
    absences.sort();
    expected.sort();
    assert_eq!(absences, expected);

    assert_eq!(on_processes.alpha_hulls.len(), on_threads.alpha_hulls.len());
    for hull in &on_processes.alpha_hulls {
        let twin = on_threads
            .alpha_hulls
            .iter()
            .find(|h| h.taxon_id == hull.taxon_id)
            .unwrap();
        let (a, b) = (hull.geometry.unsigned_area(), twin.geometry.unsigned_area());
        assert!((a - b).abs() < b * 1e-6);
    }
}

#[test]
fn test_rerun_replaces_previous_output() {
    let coast = coast_file();
    let store = MemoryStore::new(world());
    let pipeline = Pipeline::new(&store, config(&coast, ParallelConfig::threads(2))).unwrap();
    pipeline.run_all(None).unwrap();
    let first = store.snapshot();
    pipeline.run_all(None).unwrap();
    let second = store.snapshot();

    assert_eq!(second.alpha_hulls.len(), first.alpha_hulls.len());
    assert_eq!(second.subdivided_hulls.len(), first.subdivided_hulls.len());
    assert_eq!(second.assignments, first.assignments);
    assert_eq!(second.absences.len(), first.absences.len());
    assert_eq!(second.processed_surveys.len(), first.processed_surveys.len());
}
