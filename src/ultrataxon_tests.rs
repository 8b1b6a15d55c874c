use super::*;
use crate::model::{TaxonLevel, SamplingDesign};
use geo_types::{polygon, MultiPolygon, Point};

fn taxon(id: &str, level: TaxonLevel, ultrataxon: bool) -> Taxon {
    Taxon {
        id: id.to_string(),
        spno: 100,
        level,
        ultrataxon,
        sampling: SamplingDesign::Site,
    }
}

fn range(taxon_id: &str, range_id: i32, x0: f64, x1: f64) -> RangeRecord {
    RangeRecord {
        taxon_id: taxon_id.to_string(),
        range_id,
        breeding_range_id: None,
        geometry: MultiPolygon::new(vec![polygon![
            (x: x0, y: -40.0),
            (x: x1, y: -40.0),
            (x: x1, y: -30.0),
            (x: x0, y: -30.0),
        ]]),
    }
}

fn sighting(id: i64, taxon_id: &str, x: f64, y: f64) -> Sighting {
    Sighting {
        id,
        survey_id: id * 10,
        taxon_id: taxon_id.to_string(),
        point: Point::new(x, y),
        count: 1,
    }
}

fn assignments(resolution: Resolution) -> Vec<UltrataxonAssignment> {
    match resolution {
        Resolution::Resolved { assignments, .. } => assignments,
        Resolution::Skipped { reason, .. } => panic!("skipped: {reason}"),
    }
}

#[test]
fn test_parent_sightings_are_promoted() {
    let species = taxon("sp1", TaxonLevel::Species, false);
    let subspecies = taxon("ssp1", TaxonLevel::Subspecies, true);
    let ranges = vec![range("ssp1", 1, 140.0, 150.0)];
    let candidates: Vec<Sighting> = (0..10)
        .map(|i| sighting(i, "sp1", 141.0 + i as f64 * 0.5, -35.0))
        .collect();

    let rows = assignments(resolve_taxon(
        &subspecies,
        Some(&species),
        &ranges,
        &candidates,
        &TileCacheConfig::default(),
    ));
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|a| a.generated_subspecies && a.taxon_id == "ssp1" && a.range_id == 1));
}

#[test]
fn test_own_and_parent_sightings() {
    let species = taxon("sp1", TaxonLevel::Species, false);
    let subspecies = taxon("ssp1", TaxonLevel::Subspecies, true);
    let ranges = vec![range("ssp1", 1, 140.0, 150.0)];
    let candidates = vec![
        sighting(1, "ssp1", 145.0, -35.0),
        sighting(2, "sp1", 146.0, -35.0),
        sighting(3, "sp1", 155.0, -35.0),
        sighting(4, "other", 145.0, -35.0),
        sighting(5, "ssp1", 150.0, -32.0),
    ];

    let rows = assignments(resolve_taxon(
        &subspecies,
        Some(&species),
        &ranges,
        &candidates,
        &TileCacheConfig::default(),
    ));
    let summary: Vec<(i64, bool)> = rows.iter().map(|a| (a.sighting_id, a.generated_subspecies)).collect();
    assert_eq!(summary, vec![(1, false), (2, true), (5, false)]);
}

#[test]
fn test_overlapping_ranges_assign_once() {
    let ultra = taxon("sp2", TaxonLevel::Species, true);
    let ranges = vec![range("sp2", 2, 140.0, 150.0), range("sp2", 1, 144.0, 160.0)];
    let candidates = vec![
        sighting(1, "sp2", 145.0, -35.0),
        sighting(2, "sp2", 141.0, -35.0),
        sighting(3, "sp2", 155.0, -35.0),
        sighting(1, "sp2", 145.0, -35.0),
    ];

    let rows = assignments(resolve_taxon(&ultra, None, &ranges, &candidates, &TileCacheConfig::default()));
    let pairs: HashSet<(i64, String)> = rows.iter().map(|a| (a.sighting_id, a.taxon_id.clone())).collect();
    assert_eq!(pairs.len(), rows.len());

    let by_range: Vec<(i64, i32)> = rows.iter().map(|a| (a.sighting_id, a.range_id)).collect();
    assert_eq!(by_range, vec![(1, 1), (2, 2), (3, 1)]);
}

#[test]
fn test_species_parent_is_ignored_for_species() {
    let species = taxon("sp3", TaxonLevel::Species, true);
    let other = taxon("sp4", TaxonLevel::Species, false);
    let ranges = vec![range("sp3", 1, 140.0, 150.0)];
    let candidates = vec![sighting(1, "sp4", 145.0, -35.0)];
    let rows = assignments(resolve_taxon(
        &species,
        Some(&other),
        &ranges,
        &candidates,
        &TileCacheConfig::default(),
    ));
    assert!(rows.is_empty());
}

#[test]
fn test_non_ultrataxon_is_skipped() {
    let species = taxon("sp1", TaxonLevel::Species, false);
    let resolution = resolve_taxon(
        &species,
        None,
        &[range("sp1", 1, 140.0, 150.0)],
        &[sighting(1, "sp1", 145.0, -35.0)],
        &TileCacheConfig::default(),
    );
    assert_eq!(
        resolution,
        Resolution::Skipped {
            taxon_id: "sp1".to_string(),
            reason: SkipReason::NotUltrataxon,
        }
    );
}

#[test]
fn test_self_intersecting_range_is_repaired() {
    let ultra = taxon("sp5", TaxonLevel::Species, true);
    let bowtie = RangeRecord {
        taxon_id: "sp5".to_string(),
        range_id: 1,
        breeding_range_id: None,
        geometry: MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 10.0, y: 0.0),
            (x: 0.0, y: 10.0),
        ]]),
    };
    let candidates = vec![
        sighting(1, "sp5", 1.0, 5.0),
        sighting(2, "sp5", 5.0, 8.0),
        sighting(3, "sp5", 9.0, 5.0),
    ];
    let rows = assignments(resolve_taxon(&ultra, None, &[bowtie], &candidates, &TileCacheConfig::default()));
    let ids: Vec<i64> = rows.iter().map(|a| a.sighting_id).collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn test_unrepairable_range_skips_taxon() {
    let ultra = taxon("sp6", TaxonLevel::Species, true);
    let sliver = RangeRecord {
        taxon_id: "sp6".to_string(),
        range_id: 1,
        breeding_range_id: None,
        geometry: MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 2.0, y: 2.0)]]),
    };
    let resolution = resolve_taxon(&ultra, None, &[sliver], &[], &TileCacheConfig::default());
    assert!(matches!(
        resolution,
        Resolution::Skipped { reason: SkipReason::InvalidGeometry(_), .. }
    ));
}

#[test]
fn test_job_labels_by_taxon() {
    let task = UltrataxonTask {
        taxon: taxon("ssp9", TaxonLevel::Subspecies, true),
        parent: None,
        ranges: vec![],
        candidates: vec![],
    };
    assert_eq!(UltrataxonJob::label(&task), "ssp9");
    let resolution = UltrataxonJob::default().run(task).unwrap();
    assert_eq!(resolution.taxon_id(), "ssp9");
}
