//! Error types for task graph operations

use crate::ids::{EdgeId, TaskId};
use thiserror::Error;

/// Result type alias for task graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised while building, checking or splitting a task graph
///
/// The integrity variants (`Connection`, `Tiling`, `DuplicateId`, `Cycle`)
/// each come from exactly one checker so callers can tell which invariant
/// broke.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Axis or window contract violated (absent axis, oversized split factor,
    /// mismatched window sizes)
    #[error("Shape violation on {task}: {reason}")]
    ShapeViolation {
        /// Block the violation concerns
        task: TaskId,
        /// What was wrong
        reason: String,
    },

    /// Block id not present in the graph
    #[error("Unknown task block: {0}")]
    UnknownTask(TaskId),

    /// Edge id not present in the graph
    #[error("Unknown edge: {0}")]
    UnknownEdge(EdgeId),

    /// Port index out of range for a block
    #[error("{task} has no {direction} port {port}")]
    UnknownPort {
        /// Block
        task: TaskId,
        /// `input` or `output`
        direction: &'static str,
        /// Requested port
        port: usize,
    },

    /// Operation not defined for this kind of block
    #[error("Unsupported block {task}: {reason}")]
    UnsupportedBlock {
        /// Block
        task: TaskId,
        /// Why
        reason: String,
    },

    /// A split would cut an edge whose data is rearranged in transit
    #[error("Edge {edge} carries a rearrangement and cannot be partially split")]
    UnsupportedRearrange {
        /// Edge
        edge: EdgeId,
    },

    /// Connection checker: dangling or one-sided edge
    #[error("Connection check failed for {edge}: {reason}")]
    Connection {
        /// Edge
        edge: EdgeId,
        /// What was inconsistent
        reason: String,
    },

    /// Fan-in/shape checker: an input cluster is not exactly tiled
    #[error("Tiling check failed for {task} input port {port}: {reason}")]
    Tiling {
        /// Block
        task: TaskId,
        /// Input port
        port: usize,
        /// Gap, overlap or bounds problem
        reason: String,
    },

    /// Id checker: the same id is used twice
    #[error("Duplicate id {id}: {reason}")]
    DuplicateId {
        /// Raw id value
        id: u32,
        /// Where the duplicate was found
        reason: String,
    },

    /// Topological sort failed
    #[error("Task graph contains a cycle through {remaining} block(s)")]
    Cycle {
        /// Blocks left unsorted
        remaining: usize,
    },
}

impl GraphError {
    /// Create a shape violation
    pub fn shape(task: TaskId, reason: impl Into<String>) -> Self {
        Self::ShapeViolation {
            task,
            reason: reason.into(),
        }
    }

    /// Create an unsupported-block error
    pub fn unsupported(task: TaskId, reason: impl Into<String>) -> Self {
        Self::UnsupportedBlock {
            task,
            reason: reason.into(),
        }
    }

    /// Create a connection-check failure
    pub fn connection(edge: EdgeId, reason: impl Into<String>) -> Self {
        Self::Connection {
            edge,
            reason: reason.into(),
        }
    }

    /// Create a tiling-check failure
    pub fn tiling(task: TaskId, port: usize, reason: impl Into<String>) -> Self {
        Self::Tiling {
            task,
            port,
            reason: reason.into(),
        }
    }
}
