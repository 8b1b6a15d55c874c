//! Storage contract.
//!
//! Inputs are read through [`RangeStore`]. Outputs are written through a
//! [`UnitOfWork`]: operations are staged and applied together on commit, or
//! dropped on rollback. Every write replaces the previous rows for the taxa
//! or design it names.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::error::{RangeError, Result};
use crate::model::{
    AlphaHullRecord, ProcessedSurvey, PseudoAbsenceSighting, RangeRecord, SamplingDesign, Sighting, SurveyVisit,
    Taxon, TaxonId, UltrataxonAssignment,
};

pub trait RangeStore: Send + Sync {
    fn taxa(&self) -> Result<Vec<Taxon>>;
    fn range_records(&self) -> Result<Vec<RangeRecord>>;
    fn sightings(&self) -> Result<Vec<Sighting>>;
    fn survey_visits(&self) -> Result<Vec<SurveyVisit>>;
    fn subdivided_hulls(&self) -> Result<Vec<AlphaHullRecord>>;
    fn assignments(&self) -> Result<Vec<UltrataxonAssignment>>;
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>>;
}

pub trait UnitOfWork {
    /// Replaces hulls and subdivided hulls of `taxa`.
    fn replace_alpha_hulls(
        &mut self,
        taxa: &[TaxonId],
        hulls: Vec<AlphaHullRecord>,
        subdivided: Vec<AlphaHullRecord>,
    ) -> Result<()>;
    fn replace_assignments(&mut self, taxa: &[TaxonId], assignments: Vec<UltrataxonAssignment>) -> Result<()>;
    /// Replaces processed surveys and absences of one design. Absence rows of
    /// the `kept` taxa stay as they are.
    fn replace_absences(
        &mut self,
        design: SamplingDesign,
        kept: &[TaxonId],
        processed: Vec<ProcessedSurvey>,
        absences: Vec<PseudoAbsenceSighting>,
    ) -> Result<()>;
    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>);
}

/// Every table the engine reads or writes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tables {
    pub taxa: Vec<Taxon>,
    pub ranges: Vec<RangeRecord>,
    pub sightings: Vec<Sighting>,
    pub survey_visits: Vec<SurveyVisit>,
    pub alpha_hulls: Vec<AlphaHullRecord>,
    pub subdivided_hulls: Vec<AlphaHullRecord>,
    pub assignments: Vec<UltrataxonAssignment>,
    pub processed_surveys: Vec<ProcessedSurvey>,
    pub absences: Vec<PseudoAbsenceSighting>,
}

#[derive(Debug)]
enum StagedWrite {
    AlphaHulls {
        taxa: HashSet<TaxonId>,
        hulls: Vec<AlphaHullRecord>,
        subdivided: Vec<AlphaHullRecord>,
    },
    Assignments {
        taxa: HashSet<TaxonId>,
        assignments: Vec<UltrataxonAssignment>,
    },
    Absences {
        design: SamplingDesign,
        kept: HashSet<TaxonId>,
        processed: Vec<ProcessedSurvey>,
        absences: Vec<PseudoAbsenceSighting>,
    },
}

impl StagedWrite {
    fn apply(self, tables: &mut Tables) {
        match self {
            StagedWrite::AlphaHulls {
                taxa,
                hulls,
                subdivided,
            } => {
                tables.alpha_hulls.retain(|h| !taxa.contains(&h.taxon_id));
                tables.subdivided_hulls.retain(|h| !taxa.contains(&h.taxon_id));
                tables.alpha_hulls.extend(hulls);
                tables.subdivided_hulls.extend(subdivided);
            }
            StagedWrite::Assignments { taxa, assignments } => {
                tables.assignments.retain(|a| !taxa.contains(&a.taxon_id));
                tables.assignments.extend(assignments);
                tables.assignments.sort();
            }
            StagedWrite::Absences {
                design,
                kept,
                processed,
                absences,
            } => {
                tables.processed_surveys.retain(|p| p.design != design);
                tables
                    .absences
                    .retain(|a| a.design != design || kept.contains(&a.taxon_id));
                tables.processed_surveys.extend(processed);
                tables.absences.extend(absences);
            }
        }
    }
}

/// In-memory store, mainly for tests and small runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Copy of the current tables.
    pub fn snapshot(&self) -> Tables {
        self.tables.read().clone()
    }
}

impl RangeStore for MemoryStore {
    fn taxa(&self) -> Result<Vec<Taxon>> {
        Ok(self.tables.read().taxa.clone())
    }

    fn range_records(&self) -> Result<Vec<RangeRecord>> {
        Ok(self.tables.read().ranges.clone())
    }

    fn sightings(&self) -> Result<Vec<Sighting>> {
        Ok(self.tables.read().sightings.clone())
    }

    fn survey_visits(&self) -> Result<Vec<SurveyVisit>> {
        Ok(self.tables.read().survey_visits.clone())
    }

    fn subdivided_hulls(&self) -> Result<Vec<AlphaHullRecord>> {
        Ok(self.tables.read().subdivided_hulls.clone())
    }

    fn assignments(&self) -> Result<Vec<UltrataxonAssignment>> {
        Ok(self.tables.read().assignments.clone())
    }

    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self,
            staged: Vec::new(),
        }))
    }
}

struct MemoryUnitOfWork<'a> {
    store: &'a MemoryStore,
    staged: Vec<StagedWrite>,
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn replace_alpha_hulls(
        &mut self,
        taxa: &[TaxonId],
        hulls: Vec<AlphaHullRecord>,
        subdivided: Vec<AlphaHullRecord>,
    ) -> Result<()> {
        let taxa: HashSet<TaxonId> = taxa.iter().cloned().collect();
        if let Some(stray) = hulls.iter().chain(&subdivided).find(|h| !taxa.contains(&h.taxon_id)) {
            return Err(RangeError::DataIntegrity(format!(
                "hull for taxon {} outside the replaced set",
                stray.taxon_id
            )));
        }
        self.staged.push(StagedWrite::AlphaHulls {
            taxa,
            hulls,
            subdivided,
        });
        Ok(())
    }

    fn replace_assignments(&mut self, taxa: &[TaxonId], assignments: Vec<UltrataxonAssignment>) -> Result<()> {
        let taxa: HashSet<TaxonId> = taxa.iter().cloned().collect();
        if let Some(stray) = assignments.iter().find(|a| !taxa.contains(&a.taxon_id)) {
            return Err(RangeError::DataIntegrity(format!(
                "assignment for taxon {} outside the replaced set",
                stray.taxon_id
            )));
        }
        self.staged.push(StagedWrite::Assignments { taxa, assignments });
        Ok(())
    }

    fn replace_absences(
        &mut self,
        design: SamplingDesign,
        kept: &[TaxonId],
        processed: Vec<ProcessedSurvey>,
        absences: Vec<PseudoAbsenceSighting>,
    ) -> Result<()> {
        let kept: HashSet<TaxonId> = kept.iter().cloned().collect();
        if let Some(stray) = absences.iter().find(|a| a.design != design || kept.contains(&a.taxon_id)) {
            return Err(RangeError::DataIntegrity(format!(
                "absence for taxon {} ({:?}) outside the replaced set",
                stray.taxon_id, stray.design
            )));
        }
        self.staged.push(StagedWrite::Absences {
            design,
            kept,
            processed,
            absences,
        });
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryUnitOfWork { store, staged } = *self;
        let mut tables = store.tables.write();
        let writes = staged.len();
        for write in staged {
            write.apply(&mut tables);
        }
        log::debug!("Committed {writes} staged writes");
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        log::debug!("Rolled back {} staged writes", self.staged.len());
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
