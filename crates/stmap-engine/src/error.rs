//! Error types for placement, evaluation and scheduling

use stmap_chip::{ChipError, MLCoord, PiIndex};
use stmap_graph::{EdgeId, GraphError, TaskId};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the placement engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Coordinate too shallow or otherwise malformed for the operation
    #[error("Contract violation at {coord}: {reason}")]
    ContractViolation {
        /// Offending coordinate
        coord: MLCoord,
        /// What was expected
        reason: String,
    },

    /// Coordinate resolves to no point of the matrix
    #[error("No element at {coord}")]
    NotFound {
        /// Coordinate
        coord: MLCoord,
    },

    /// A point already exists at the coordinate
    #[error("Element already present at {coord}")]
    ElementExists {
        /// Coordinate
        coord: MLCoord,
    },

    /// Functional-unit slot already holds a task
    #[error("{pi} at {coord} is occupied by {occupant}")]
    Occupied {
        /// Point
        coord: MLCoord,
        /// Slot
        pi: PiIndex,
        /// Task already there
        occupant: TaskId,
    },

    /// Memory bank already holds the task
    #[error("{task} is already resident in the memory bank at {coord}")]
    DuplicateResident {
        /// Point
        coord: MLCoord,
        /// Task
        task: TaskId,
    },

    /// Task kind does not fit the functional unit
    #[error("{task} cannot occupy {pi}: {reason}")]
    SlotMismatch {
        /// Task
        task: TaskId,
        /// Requested unit
        pi: PiIndex,
        /// Why not
        reason: String,
    },

    /// Task has no coordinate
    #[error("{0} is not placed")]
    NotPlaced(TaskId),

    /// Task already has a coordinate
    #[error("{task} is already placed at {coord}")]
    AlreadyPlaced {
        /// Task
        task: TaskId,
        /// Current coordinate
        coord: MLCoord,
    },

    /// Task is not at the given coordinate
    #[error("{task} is not resident at {coord}")]
    NotResident {
        /// Task
        task: TaskId,
        /// Coordinate that was given
        coord: MLCoord,
    },

    /// Group action on a storage block
    #[error("{0} is not a computation block")]
    NotCompute(TaskId),

    /// Matrix and context disagree
    #[error("Placement inconsistent: {reason}")]
    Inconsistent {
        /// What disagrees
        reason: String,
    },

    /// Edge route cannot be built or traversed
    #[error("Route for {edge} invalid: {reason}")]
    Route {
        /// Edge
        edge: EdgeId,
        /// Why
        reason: String,
    },

    /// Scheduler drained its queue without any task firing
    #[error("Scheduler deadlock: {pending} activated task(s) cannot proceed")]
    Deadlock {
        /// Tasks left in the activated queue
        pending: usize,
    },

    /// Task graph error
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Hardware configuration error
    #[error(transparent)]
    Chip(#[from] ChipError),
}

impl EngineError {
    /// Create a contract violation
    pub fn contract(coord: &MLCoord, reason: impl Into<String>) -> Self {
        Self::ContractViolation {
            coord: coord.clone(),
            reason: reason.into(),
        }
    }

    /// Create a slot mismatch
    pub fn slot_mismatch(task: TaskId, pi: PiIndex, reason: impl Into<String>) -> Self {
        Self::SlotMismatch {
            task,
            pi,
            reason: reason.into(),
        }
    }

    /// Create an inconsistency error
    pub fn inconsistent(reason: impl Into<String>) -> Self {
        Self::Inconsistent {
            reason: reason.into(),
        }
    }

    /// Create a route error
    pub fn route(edge: EdgeId, reason: impl Into<String>) -> Self {
        Self::Route {
            edge,
            reason: reason.into(),
        }
    }
}
