//! Network topologies for agent interactions.
//!
//! A [`Topology`] is the static adjacency structure that decides which agents may
//! debate each other. It is built once per run from the agent count (plus grid
//! dimensions for lattice variants) and never changes afterwards.
//!
//! | Kind    | Structure                                   | Minimum agents |
//! |---------|---------------------------------------------|----------------|
//! | `grid4` | `rows × cols` lattice, orthogonal links     | 2              |
//! | `grid8` | `rows × cols` lattice, orthogonal + diagonal| 2              |
//! | `ring`  | `i ↔ i±1 (mod n)`                           | 3              |
//! | `mesh`  | complete graph                              | 2              |
//! | `star`  | hub 0 ↔ every spoke, spokes ↔ hub only      | 2              |
//!
//! Lattices have no wraparound, so edge cells have fewer neighbors. Without
//! explicit dimensions a grid requires a perfect-square agent count.
//!
//! Adjacency is always symmetric and free of self-loops; construction is a pure
//! function of its parameters.

use std::fmt;
use std::str::FromStr;

use petgraph::dot::{Config as DotConfig, Dot};
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::registry::AgentId;

/// Hub agent of the star topology
pub const STAR_HUB: AgentId = AgentId(0);

/// Topology variant selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// 2D lattice with 4 neighbors (up, down, left, right)
    #[default]
    Grid4,
    /// 2D lattice with 8 neighbors (includes diagonals)
    Grid8,
    /// Circular arrangement, each agent has exactly 2 neighbors
    Ring,
    /// Fully connected
    Mesh,
    /// One hub connected to all others
    Star,
}

impl TopologyKind {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Grid4 => "grid4",
            Self::Grid8 => "grid8",
            Self::Ring => "ring",
            Self::Mesh => "mesh",
            Self::Star => "star",
        }
    }

    /// Whether this kind is laid out on a lattice.
    pub fn is_grid(&self) -> bool {
        matches!(self, Self::Grid4 | Self::Grid8)
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for TopologyKind {
    type Err = SimError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grid4" | "grid" => Ok(Self::Grid4),
            "grid8" => Ok(Self::Grid8),
            "ring" => Ok(Self::Ring),
            "mesh" | "complete" => Ok(Self::Mesh),
            "star" => Ok(Self::Star),
            _ => Err(SimError::Configuration(format!(
                "Unknown topology kind: {s}. Available: grid4, grid8, ring, mesh, star"
            ))),
        }
    }
}

/// Lattice dimensions for grid topologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDims {
    /// Number of rows
    pub rows: usize,
    /// Number of columns
    pub cols: usize,
}

impl GridDims {
    /// Resolve lattice dimensions for `count` agents.
    ///
    /// Explicit dimensions must multiply to `count`; otherwise `count` must be a
    /// perfect square.
    pub fn resolve(count: usize, explicit: Option<GridDims>) -> Result<Self> {
        if let Some(dims) = explicit {
            if dims.rows == 0 || dims.cols == 0 || dims.rows.checked_mul(dims.cols) != Some(count)
            {
                return Err(SimError::Configuration(format!(
                    "grid {}x{} does not hold {count} agents",
                    dims.rows, dims.cols
                )));
            }
            return Ok(dims);
        }

        let side = (count as f64).sqrt().round() as usize;
        if side * side != count {
            return Err(SimError::Configuration(format!(
                "{count} agents have no square lattice; pass rows and cols explicitly"
            )));
        }
        Ok(Self {
            rows: side,
            cols: side,
        })
    }

    fn position(&self, id: AgentId) -> (usize, usize) {
        (id.0 / self.cols, id.0 % self.cols)
    }
}

/// Immutable agent adjacency for one run
#[derive(Debug, Clone)]
pub struct Topology {
    kind: TopologyKind,
    dims: Option<GridDims>,
    graph: UnGraph<AgentId, ()>,
}

impl Topology {
    /// Build a topology of `kind` over `count` agents.
    pub fn build(kind: TopologyKind, count: usize, dims: Option<GridDims>) -> Result<Self> {
        if count < 2 {
            return Err(SimError::Configuration(format!(
                "{kind} topology needs at least 2 agents, got {count}"
            )));
        }

        let mut graph = UnGraph::with_capacity(count, count * 4);
        let nodes: Vec<NodeIndex> = (0..count).map(|i| graph.add_node(AgentId(i))).collect();

        let dims = match kind {
            TopologyKind::Grid4 | TopologyKind::Grid8 => {
                let dims = GridDims::resolve(count, dims)?;
                let diagonals = kind == TopologyKind::Grid8;
                for row in 0..dims.rows {
                    for col in 0..dims.cols {
                        let here = nodes[row * dims.cols + col];
                        // Forward half-neighborhood only; the reverse side is added
                        // when the other cell visits us.
                        let mut forward = vec![(0_isize, 1_isize), (1, 0)];
                        if diagonals {
                            forward.extend([(1, 1), (1, -1)]);
                        }
                        for (dr, dc) in forward {
                            let r = row as isize + dr;
                            let c = col as isize + dc;
                            if r < 0 || c < 0 || r >= dims.rows as isize || c >= dims.cols as isize
                            {
                                continue;
                            }
                            let there = nodes[r as usize * dims.cols + c as usize];
                            graph.add_edge(here, there, ());
                        }
                    }
                }
                Some(dims)
            },
            TopologyKind::Ring => {
                if count < 3 {
                    return Err(SimError::Configuration(format!(
                        "ring topology needs at least 3 agents, got {count}"
                    )));
                }
                for i in 0..count {
                    graph.add_edge(nodes[i], nodes[(i + 1) % count], ());
                }
                None
            },
            TopologyKind::Mesh => {
                for i in 0..count {
                    for j in (i + 1)..count {
                        graph.add_edge(nodes[i], nodes[j], ());
                    }
                }
                None
            },
            TopologyKind::Star => {
                let hub = nodes[STAR_HUB.0];
                for &spoke in &nodes[1..] {
                    graph.add_edge(hub, spoke, ());
                }
                None
            },
        };

        tracing::debug!(
            "Built {} topology: {} agents, {} edges",
            kind,
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Self { kind, dims, graph })
    }

    /// Agents with no links at all
    #[cfg(test)]
    pub(crate) fn edgeless(count: usize) -> Self {
        let mut graph = UnGraph::with_capacity(count, 0);
        for i in 0..count {
            graph.add_node(AgentId(i));
        }
        Self {
            kind: TopologyKind::Mesh,
            dims: None,
            graph,
        }
    }

    /// Topology variant
    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    /// Lattice dimensions (grid variants only)
    pub fn dims(&self) -> Option<GridDims> {
        self.dims
    }

    /// Number of agents
    pub fn agent_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of undirected edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All agent ids, ascending
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.graph.node_indices().map(|n| self.graph[n]).collect()
    }

    /// Whether `id` belongs to this topology
    pub fn contains(&self, id: AgentId) -> bool {
        id.0 < self.graph.node_count()
    }

    /// Neighbors of `id`, ascending and without duplicates.
    pub fn neighbors(&self, id: AgentId) -> Result<Vec<AgentId>> {
        if !self.contains(id) {
            return Err(SimError::InvalidAgent(id));
        }

        let mut out: Vec<AgentId> = self
            .graph
            .neighbors(NodeIndex::new(id.0))
            .map(|n| self.graph[n])
            .collect();
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    /// Human-readable position of an agent
    pub fn position_label(&self, id: AgentId) -> String {
        match (self.kind, self.dims) {
            (TopologyKind::Grid4 | TopologyKind::Grid8, Some(dims)) => {
                let (row, col) = dims.position(id);
                format!("({row}, {col})")
            },
            (TopologyKind::Ring, _) => format!("[ring pos {}]", id.0),
            (TopologyKind::Mesh, _) => format!("[mesh node {}]", id.0),
            (TopologyKind::Star, _) if id == STAR_HUB => "[hub]".to_string(),
            (TopologyKind::Star, _) => format!("[spoke {}]", id.0),
            _ => format!("[{}]", id.0),
        }
    }

    /// Export the adjacency as a Graphviz DOT document
    pub fn to_dot(&self) -> String {
        format!(
            "{:?}",
            Dot::with_config(&self.graph, &[DotConfig::EdgeNoLabel])
        )
    }

    /// One line per agent listing its position and neighbors
    pub fn describe(&self) -> String {
        let mut out = format!(
            "Layout: {} ({} agents, {} edges)\n",
            self.kind,
            self.agent_count(),
            self.edge_count()
        );
        for id in self.agent_ids() {
            let neighbors = self
                .neighbors(id)
                .unwrap_or_default()
                .iter()
                .map(|n| n.0.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "Agent {} {}: neighbors = [{}]\n",
                id.0,
                self.position_label(id),
                neighbors
            ));
        }
        out
    }
}
