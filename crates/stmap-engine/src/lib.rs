//! Space-time placement engine for a tiled neuromorphic accelerator.
//!
//! Tasks of a [`TaskGraph`](stmap_graph::TaskGraph) are placed onto the
//! functional units of an [`STMatrix`]: one point per (core, step, phase),
//! with five single-occupancy units and a memory bank each. The
//! [`ActionModel`] is the only way to change a placement and keeps the
//! matrix, the reverse [`STContext`] and the graph in agreement.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`matrix`] | `STMatrix` arena, `STPoint`, element lookup by coordinate |
//! | [`context`] | `STContext`: task → coordinate, edge → route |
//! | [`action`] | `ActionModel` placement, column, split and routing commands |
//! | [`route`] | dimension-ordered column paths and hops |
//! | [`eval`] | memory footprint and bandwidth-shared transfer simulation |
//! | [`executor`] | `TaskExecutor` trait and the pipeline-order executor |
//! | [`scheduler`] | fan-in dataflow scheduler with deadlock detection |
//!
//! # Example
//!
//! ```
//! use stmap_engine::prelude::*;
//!
//! # fn main() -> stmap_engine::Result<()> {
//! let mut graph = TaskGraph::new();
//! let input = graph.add_storage(StorageKind::Input, Shape::vector(8), Precision::Int8)?;
//! let relu = graph.add_compute(ComputeBlock::new(
//!     ComputeOp::Cvs { bit_shift: 0 },
//!     Shape::vector(8),
//!     Precision::Int8,
//!     BiasType::None,
//! ))?;
//! graph.connect_whole(input, relu, 0)?;
//!
//! let hw = HardwareConfig::single_chip(2, 2);
//! let core = MLCoord::from_levels(vec![[0, 0].into(), [1, 0].into()]);
//! let mut model = ActionModel::new(graph, &hw);
//! model.put_in(&core.at_time(0, 0, PiIndex::Memory), input)?;
//! model.put_in(&core.at_time(0, 0, PiIndex::Soma1), relu)?;
//! model.check_consistency()?;
//!
//! let fired = Scheduler::new(&model, PipelineExecutor::new()).run()?;
//! assert_eq!(fired, vec![input, relu]);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod action;
pub mod context;
mod error;
pub mod eval;
pub mod executor;
pub mod matrix;
pub mod route;
pub mod scheduler;

pub use action::ActionModel;
pub use context::STContext;
pub use error::{EngineError, Result};
pub use eval::{CommEvaluator, MemoryEvaluator, MemoryReport};
pub use executor::{PipelineExecutor, ProceedStatus, TaskExecutor};
pub use matrix::{ElementRef, STMatrix, STPoint};
pub use route::Hop;
pub use scheduler::{Scheduler, StepOutcome, TaskState};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        ActionModel, CommEvaluator, EngineError, MemoryEvaluator, PipelineExecutor, Result,
        STContext, STMatrix, Scheduler,
    };
    pub use stmap_chip::{HardwareConfig, MLCoord, PiIndex};
    pub use stmap_graph::{
        BiasType, ComputeBlock, ComputeOp, Precision, Shape, SplitModes, SplitVector, StorageKind,
        TaskGraph, TaskId,
    };
}
