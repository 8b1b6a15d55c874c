pub mod planar_graph;

pub use planar_graph::PlanarGraph;
