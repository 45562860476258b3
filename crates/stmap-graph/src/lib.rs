//! Task graph model for a tiled neuromorphic accelerator.
//!
//! A [`TaskGraph`] holds storage blocks (tensors held in a core's memory)
//! and computation blocks (hardware primitives) joined by windowed edges.
//! The [`Splitter`] cuts a computation block along its tensor axes into
//! equivalent sub-blocks small enough for one core.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`shape`] | `Shape` (6 logical + 2 input axes), `Axis`, `Window` |
//! | [`block`] | `TaskBlock` = storage or compute, primitive attributes, port layout |
//! | [`edge`] | `Edge`, `Endpoint`, `EdgeCluster`, `RearrangeInfo` |
//! | [`graph`] | `TaskGraph` arena, operand groups, topological order |
//! | [`check`] | id, connection and tiling checkers |
//! | [`split`] | `Splitter`, `SplitVector`, interval arithmetic |
//!
//! # Example
//!
//! ```
//! use stmap_graph::prelude::*;
//!
//! # fn main() -> stmap_graph::Result<()> {
//! let mut graph = TaskGraph::new();
//! let shape = Shape::vector(4).with(Axis::R, 3);
//! let input = graph.add_storage(StorageKind::Si, Shape::vector(3), Precision::Int8)?;
//! let weight = graph.add_storage(StorageKind::Swfc, shape, Precision::Int8)?;
//! let cvm = graph.add_compute(ComputeBlock::new(
//!     ComputeOp::Cvm { bit_shift: 0 },
//!     shape,
//!     Precision::Int8,
//!     BiasType::None,
//! ))?;
//! graph.connect_whole(input, cvm, 0)?;
//! graph.connect_whole(weight, cvm, 1)?;
//!
//! let new = graph.split(cvm, SplitVector::new(1, 1, 2, 1), SplitModes::default())?;
//! assert_eq!(new.len(), 6); // 2 copies, each with its input and weight slice
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod block;
pub mod check;
pub mod edge;
mod error;
pub mod footprint;
pub mod graph;
mod ids;
pub mod shape;
pub mod split;

pub use block::{
    AxisMap, BiasType, BlockKind, ComputeBlock, ComputeOp, KernelWindow, LifParams, OperandRole,
    Padding, Precision, StorageBlock, StorageKind, TaskBlock,
};
pub use edge::{Edge, EdgeCluster, Endpoint, RearrangeInfo};
pub use error::{GraphError, Result};
pub use graph::TaskGraph;
pub use ids::{EdgeId, IdAllocator, TaskId};
pub use shape::{Axis, Shape, Window};
pub use split::{SplitMode, SplitModes, SplitVector, Splitter};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        Axis, BiasType, ComputeBlock, ComputeOp, EdgeId, KernelWindow, Precision, Result, Shape,
        SplitModes, SplitVector, StorageKind, TaskGraph, TaskId, Window,
    };
}
