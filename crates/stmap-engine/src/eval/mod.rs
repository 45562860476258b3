//! Placement evaluators: memory footprint per column and simulated
//! transfer times over the routed edges.

pub mod comm;
pub mod memory;

pub use comm::{CommEvaluator, HopRecord, TraceSegment};
pub use memory::{MemoryEvaluator, MemoryReport};
