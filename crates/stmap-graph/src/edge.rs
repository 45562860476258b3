//! Edges and the clusters that group them per port

use crate::ids::{EdgeId, TaskId};
use crate::shape::{Axis, Shape, Window};
use std::fmt;

/// Index transform applied to data in transit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RearrangeInfo {
    /// Data arrives as sent
    Identity,
    /// Same elements, different extents
    Reshape {
        /// Extent at the source
        from: Shape,
        /// Extent at the destination
        to: Shape,
    },
    /// Axes reordered
    Permute(Vec<Axis>),
}

/// One end of an edge: block, port and the window of that port's cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Block
    pub task: TaskId,
    /// Port index
    pub port: usize,
    /// Region of the port's cluster
    pub window: Window,
}

impl Endpoint {
    /// Create an endpoint
    pub const fn new(task: TaskId, port: usize, window: Window) -> Self {
        Self { task, port, window }
    }
}

/// Directed data transfer between an output cluster and an input cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// Edge id
    pub id: EdgeId,
    /// Producer side
    pub src: Endpoint,
    /// Consumer side
    pub dst: Endpoint,
    /// Transforms applied in transit, in order
    pub rearrange: Vec<RearrangeInfo>,
}

impl Edge {
    /// Whether data arrives exactly as it was sent
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.rearrange.iter().all(|r| *r == RearrangeInfo::Identity)
    }

    /// Elements carried
    #[must_use]
    pub fn volume(&self) -> usize {
        self.src.window.volume()
    }

    /// Same producer, consumer, ports, windows and transforms
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        self.src == other.src && self.dst == other.dst && self.rearrange == other.rearrange
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}.{} {} -> {}.{} {}",
            self.id,
            self.src.task,
            self.src.port,
            self.src.window,
            self.dst.task,
            self.dst.port,
            self.dst.window
        )
    }
}

/// Edges attached to one logical port, with the port's extent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeCluster {
    shape: Shape,
    edges: Vec<EdgeId>,
}

impl EdgeCluster {
    /// Empty cluster of extent `shape`
    pub const fn new(shape: Shape) -> Self {
        Self {
            shape,
            edges: Vec::new(),
        }
    }

    /// Port extent
    #[must_use]
    pub const fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Attached edges in attachment order
    #[must_use]
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// Whether no edge is attached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub(crate) fn attach(&mut self, edge: EdgeId) {
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    pub(crate) fn detach(&mut self, edge: EdgeId) {
        self.edges.retain(|e| *e != edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_attach_is_idempotent() {
        let mut c = EdgeCluster::new(Shape::vector(4));
        c.attach(EdgeId::new(1));
        c.attach(EdgeId::new(1));
        c.attach(EdgeId::new(2));
        assert_eq!(c.edges(), &[EdgeId::new(1), EdgeId::new(2)]);
        c.detach(EdgeId::new(1));
        assert_eq!(c.edges(), &[EdgeId::new(2)]);
    }

    #[test]
    fn test_identity_edge() {
        let w = Window::full(Shape::vector(4));
        let mut e = Edge {
            id: EdgeId::new(0),
            src: Endpoint::new(TaskId::new(1), 0, w),
            dst: Endpoint::new(TaskId::new(2), 0, w),
            rearrange: vec![],
        };
        assert!(e.is_identity());
        e.rearrange.push(RearrangeInfo::Permute(vec![Axis::F]));
        assert!(!e.is_identity());
    }
}
