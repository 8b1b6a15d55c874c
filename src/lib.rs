//! Species range derivation from occurrence data.
//!
//! The batch stages in [`pipeline`] build alpha hulls from sightings, assign
//! sightings to ultrataxa by range polygon, and derive pseudo-absences from
//! survey history. Per-taxon work fans out through [`parallel`].

pub mod absence;
pub mod alpha_hull;
pub mod config;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod model;
pub mod parallel;
pub mod pipeline;
pub mod polygonizer;
pub mod projection;
pub mod store;
pub mod subdivide;
pub mod tile_cache;
pub mod ultrataxon;

pub use alpha_hull::{build_alpha_hull, AlphaHullJob};
pub use config::RangeConfig;
pub use error::{RangeError, Result, TaskError};
pub use parallel::{run_parallel, Job};
pub use pipeline::{BatchReport, Pipeline};
pub use polygonizer::Polygonizer;
pub use store::{MemoryStore, RangeStore, UnitOfWork};
pub use subdivide::subdivide;
pub use tile_cache::TileCache;
pub use ultrataxon::resolve_taxon;
