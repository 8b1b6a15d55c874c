//! Records read and written by the range engine.
//!
//! Geometries are stored in WGS84 longitude/latitude. Polygonal geometries
//! are always held as [`MultiPolygon`]s; see [`crate::geometry::to_multi_polygon`].

use geo_types::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};

use crate::error::{RangeError, Result};

pub type TaxonId = String;
pub type SightingId = i64;
pub type SurveyId = i64;
pub type SiteId = i64;
pub type ProcessedSurveyId = i64;

/// Range category of the primary (non-vagrant) range.
pub const CORE_RANGE_ID: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxonLevel {
    #[serde(rename = "sp")]
    Species,
    #[serde(rename = "ssp")]
    Subspecies,
}

/// How a taxon is monitored, which decides the pseudo-absence design used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingDesign {
    #[default]
    Site,
    Grid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Taxon {
    pub id: TaxonId,
    /// Species number, shared by a species and all of its subspecies.
    pub spno: i32,
    pub level: TaxonLevel,
    /// Finest-grained unit processed for spatial assignment.
    pub ultrataxon: bool,
    #[serde(default)]
    pub sampling: SamplingDesign,
}

impl Taxon {
    pub fn is_subspecies(&self) -> bool {
        self.level == TaxonLevel::Subspecies
    }

    /// Finds the species-level taxon sharing this subspecies' species number.
    ///
    /// Returns `Ok(None)` for species-level taxa. A subspecies without exactly
    /// one parent is a data-integrity error.
    pub fn parent_species<'a>(&self, taxa: &'a [Taxon]) -> Result<Option<&'a Taxon>> {
        if !self.is_subspecies() {
            return Ok(None);
        }
        let mut parents = taxa
            .iter()
            .filter(|t| t.spno == self.spno && t.level == TaxonLevel::Species);
        match (parents.next(), parents.next()) {
            (Some(parent), None) => Ok(Some(parent)),
            (None, _) => Err(RangeError::DataIntegrity(format!(
                "subspecies {} has no parent species (spno {})",
                self.id, self.spno
            ))),
            (Some(_), Some(_)) => Err(RangeError::DataIntegrity(format!(
                "subspecies {} has more than one parent species (spno {})",
                self.id, self.spno
            ))),
        }
    }
}

/// Expert-drawn range polygon.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeRecord {
    pub taxon_id: TaxonId,
    pub range_id: i32,
    pub breeding_range_id: Option<i32>,
    pub geometry: MultiPolygon<f64>,
}

/// Concave hull derived from occurrence points, clipped to one [`RangeRecord`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlphaHullRecord {
    pub taxon_id: TaxonId,
    pub range_id: i32,
    pub breeding_range_id: Option<i32>,
    pub geometry: MultiPolygon<f64>,
}

impl AlphaHullRecord {
    pub fn is_core(&self, core_range_id: i32) -> bool {
        self.range_id == core_range_id
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub id: SightingId,
    pub survey_id: SurveyId,
    pub taxon_id: TaxonId,
    pub point: Point<f64>,
    pub count: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UltrataxonAssignment {
    pub sighting_id: SightingId,
    pub taxon_id: TaxonId,
    pub range_id: i32,
    /// Promoted from a species-level sighting rather than recorded as this subspecies.
    pub generated_subspecies: bool,
}

/// Fixed grid cell used by grid-based monitoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub col: i32,
    pub row: i32,
}

/// A raw survey: one visit to a location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurveyVisit {
    pub survey_id: SurveyId,
    pub site_id: Option<SiteId>,
    pub grid_cell: Option<GridCell>,
    pub point: Point<f64>,
    pub year: i32,
    pub month: u32,
}

/// The unit absences are keyed on: an ad-hoc site or a fixed grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKey {
    Site(SiteId),
    GridCell(GridCell),
}

/// A location visited during one period, built from one or more raw surveys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSurvey {
    pub id: ProcessedSurveyId,
    pub design: SamplingDesign,
    pub location: LocationKey,
    pub year: i32,
    pub month: u32,
    pub source_survey_ids: Vec<SurveyId>,
}

/// Zero-count record asserting a taxon was not detected by a processed survey.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PseudoAbsenceSighting {
    pub processed_survey_id: ProcessedSurveyId,
    pub taxon_id: TaxonId,
    pub count: i32,
    /// Distinguishes synthetic absences from genuine zero counts.
    pub pseudo_absence: bool,
    pub design: SamplingDesign,
}

impl PseudoAbsenceSighting {
    pub fn new(processed_survey_id: ProcessedSurveyId, taxon_id: TaxonId, design: SamplingDesign) -> Self {
        Self {
            processed_survey_id,
            taxon_id,
            count: 0,
            pseudo_absence: true,
            design,
        }
    }
}

/// Why a unit of work produced no rows without failing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TooFewPoints { found: usize, required: usize },
    /// Thinning left too few points to triangulate, or the hull missed every range.
    EmptyHull,
    NoRangeRecords,
    NotUltrataxon,
    InvalidGeometry(String),
    DataIntegrity(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::TooFewPoints { found, required } => {
                write!(f, "too few points ({found} < {required})")
            }
            SkipReason::EmptyHull => f.write_str("empty hull"),
            SkipReason::NoRangeRecords => f.write_str("no range records"),
            SkipReason::NotUltrataxon => f.write_str("range records on a non-ultrataxon taxon"),
            SkipReason::InvalidGeometry(msg) => write!(f, "invalid geometry: {msg}"),
            SkipReason::DataIntegrity(msg) => write!(f, "data integrity: {msg}"),
        }
    }
}
