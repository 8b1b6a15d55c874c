use geo::Line;
use geo_types::{Coord, LineString};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub type NodeId = usize;
pub type DirEdgeId = usize;

#[derive(Clone, Debug)]
pub struct Node {
    pub coordinate: Coord<f64>,
    /// Outgoing half-edges. Sorted CCW by angle after [`PlanarGraph::sort_edges`].
    pub outgoing: Vec<DirEdgeId>,
    /// Number of live incident edges; drops as dangles are pruned.
    pub degree: usize,
    pub removed: bool,
}

#[derive(Clone, Debug)]
pub struct DirectedEdge {
    pub src: NodeId,
    pub dst: NodeId,
    /// The reverse half-edge.
    pub sym: DirEdgeId,
    pub angle: f64,
    pub visited: bool,
    pub removed: bool,
}

/// Exact-coordinate key; noded input shares bit-identical endpoints.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct NodeKey(u64, u64);

impl From<Coord<f64>> for NodeKey {
    fn from(c: Coord<f64>) -> Self {
        // Fold -0.0 onto 0.0 so both hash alike.
        NodeKey((c.x + 0.0).to_bits(), (c.y + 0.0).to_bits())
    }
}

/// Half-edge graph over noded segments, traced into edge rings.
#[derive(Default)]
pub struct PlanarGraph {
    pub nodes: Vec<Node>,
    pub directed_edges: Vec<DirectedEdge>,
    node_map: HashMap<NodeKey, NodeId>,
    edge_set: HashSet<(NodeId, NodeId)>,
}

impl PlanarGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_id(&self, coord: Coord<f64>) -> Option<NodeId> {
        self.node_map.get(&NodeKey::from(coord)).copied()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.directed_edges.len() / 2
    }

    fn add_node(&mut self, coord: Coord<f64>) -> NodeId {
        let key = NodeKey::from(coord);
        if let Some(&id) = self.node_map.get(&key) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            coordinate: coord,
            outgoing: Vec::new(),
            degree: 0,
            removed: false,
        });
        self.node_map.insert(key, id);
        id
    }

    /// Adds one undirected edge. Degenerate and repeated edges are ignored.
    pub fn add_edge(&mut self, p0: Coord<f64>, p1: Coord<f64>) -> bool {
        if NodeKey::from(p0) == NodeKey::from(p1) {
            return false;
        }
        let u = self.add_node(p0);
        let v = self.add_node(p1);
        if !self.edge_set.insert((u.min(v), u.max(v))) {
            return false;
        }

        let forward = self.directed_edges.len();
        let backward = forward + 1;
        self.directed_edges.push(DirectedEdge {
            src: u,
            dst: v,
            sym: backward,
            angle: (p1.y - p0.y).atan2(p1.x - p0.x),
            visited: false,
            removed: false,
        });
        self.directed_edges.push(DirectedEdge {
            src: v,
            dst: u,
            sym: forward,
            angle: (p0.y - p1.y).atan2(p0.x - p1.x),
            visited: false,
            removed: false,
        });

        self.nodes[u].outgoing.push(forward);
        self.nodes[u].degree += 1;
        self.nodes[v].outgoing.push(backward);
        self.nodes[v].degree += 1;
        true
    }

    pub fn bulk_load(&mut self, lines: impl IntoIterator<Item = Line<f64>>) {
        for line in lines {
            self.add_edge(line.start, line.end);
        }
    }

    pub fn add_line_string(&mut self, line: &LineString<f64>) {
        for segment in line.lines() {
            self.add_edge(segment.start, segment.end);
        }
    }

    /// Sorts every node's outgoing edges CCW by angle.
    pub fn sort_edges(&mut self) {
        let directed_edges = &self.directed_edges;
        let by_angle = |a: &DirEdgeId, b: &DirEdgeId| {
            directed_edges[*a]
                .angle
                .partial_cmp(&directed_edges[*b].angle)
                .unwrap_or(Ordering::Equal)
        };

        #[cfg(feature = "parallel")]
        self.nodes
            .par_iter_mut()
            .for_each(|node| node.outgoing.sort_by(by_angle));

        #[cfg(not(feature = "parallel"))]
        self.nodes
            .iter_mut()
            .for_each(|node| node.outgoing.sort_by(by_angle));
    }

    /// Iteratively removes degree-1 nodes and their edges. Returns the number removed.
    pub fn prune_dangles(&mut self) -> usize {
        let mut removed = 0;
        let mut stack: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.degree == 1 && !n.removed)
            .map(|(i, _)| i)
            .collect();

        while let Some(node_idx) = stack.pop() {
            if self.nodes[node_idx].degree != 1 {
                continue;
            }
            self.nodes[node_idx].removed = true;
            self.nodes[node_idx].degree = 0;
            removed += 1;

            let live = self.nodes[node_idx]
                .outgoing
                .iter()
                .copied()
                .find(|&de| !self.directed_edges[de].removed);

            if let Some(de) = live {
                let sym = self.directed_edges[de].sym;
                self.directed_edges[de].removed = true;
                self.directed_edges[sym].removed = true;

                let neighbour_idx = self.directed_edges[de].dst;
                let neighbour = &mut self.nodes[neighbour_idx];
                neighbour.degree = neighbour.degree.saturating_sub(1);
                if neighbour.degree == 1 && !neighbour.removed {
                    stack.push(neighbour_idx);
                }
            }
        }
        removed
    }

    /// Traces closed rings with the next-CCW rule. Bounded faces come out CCW,
    /// the outer side of each component comes out CW.
    pub fn edge_rings(&mut self) -> Vec<LineString<f64>> {
        for de in &mut self.directed_edges {
            de.visited = false;
        }

        let mut rings = Vec::new();
        for start in 0..self.directed_edges.len() {
            if self.directed_edges[start].visited || self.directed_edges[start].removed {
                continue;
            }
            if let Some(ring) = self.trace_ring(start) {
                rings.push(ring);
            }
        }
        rings
    }

    fn trace_ring(&mut self, start: DirEdgeId) -> Option<LineString<f64>> {
        let mut ring_edges = Vec::new();
        let mut current = start;

        loop {
            self.directed_edges[current].visited = true;
            ring_edges.push(current);

            let DirectedEdge { dst, sym, .. } = self.directed_edges[current];
            let node = &self.nodes[dst];
            let position = node.outgoing.iter().position(|&de| de == sym)?;

            let len = node.outgoing.len();
            let next = (1..=len)
                .map(|offset| node.outgoing[(position + offset) % len])
                .find(|&de| !self.directed_edges[de].removed)?;

            if next == start {
                break;
            }
            if self.directed_edges[next].visited {
                return None;
            }
            current = next;
        }

        let mut coords = Vec::with_capacity(ring_edges.len() + 1);
        coords.push(self.nodes[self.directed_edges[ring_edges[0]].src].coordinate);
        coords.extend(
            ring_edges
                .iter()
                .map(|&de| self.nodes[self.directed_edges[de].dst].coordinate),
        );
        Some(LineString::new(coords))
    }
}
