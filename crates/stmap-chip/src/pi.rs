//! Functional units of one core-phase.
//!
//! Every core runs, in each phase, a short pipeline of primitive
//! instructions: the Axon engine (matrix/vector arithmetic), two Soma stages
//! (neuron dynamics, comparison, lookup), and the router's send and receive
//! halves. Operands live in the core's memory bank, addressed here as the
//! pseudo-unit [`PiIndex::Memory`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Functional unit within a core-phase (the last level of an [`MLCoord`](crate::MLCoord)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PiIndex {
    /// Axon engine
    Axon,
    /// Soma stage 1
    Soma1,
    /// Router, send half
    RouterSend,
    /// Router, receive half
    RouterRecv,
    /// Soma stage 2
    Soma2,
    /// Memory bank (holds any number of storage tasks)
    Memory,
}

impl PiIndex {
    /// All units in pipeline order.
    pub const ALL: [Self; 6] = [
        Self::Axon,
        Self::Soma1,
        Self::RouterSend,
        Self::RouterRecv,
        Self::Soma2,
        Self::Memory,
    ];

    /// Functional-unit slots (everything except the memory bank), in the
    /// order they execute within one phase.
    pub const PIPELINE: [Self; 5] = [
        Self::Axon,
        Self::Soma1,
        Self::RouterSend,
        Self::RouterRecv,
        Self::Soma2,
    ];

    /// Position of this unit inside a coordinate level.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`PiIndex::index`].
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// True for single-occupancy units (everything but memory).
    #[must_use]
    pub const fn is_slot(self) -> bool {
        !matches!(self, Self::Memory)
    }

    /// True for the router halves.
    #[must_use]
    pub const fn is_router(self) -> bool {
        matches!(self, Self::RouterSend | Self::RouterRecv)
    }

    /// Engine class that may run on this unit, if it runs computations at all.
    #[must_use]
    pub const fn engine(self) -> Option<EngineClass> {
        match self {
            Self::Axon => Some(EngineClass::Axon),
            Self::Soma1 | Self::Soma2 => Some(EngineClass::Soma),
            Self::RouterSend | Self::RouterRecv | Self::Memory => None,
        }
    }

    /// Units that execute before this one inside the same core-phase.
    #[must_use]
    pub fn predecessors(self) -> &'static [Self] {
        match self {
            Self::Axon | Self::Memory => &[],
            Self::Soma1 => &Self::PIPELINE[..1],
            Self::RouterSend => &Self::PIPELINE[..2],
            Self::RouterRecv => &Self::PIPELINE[..3],
            Self::Soma2 => &Self::PIPELINE[..4],
        }
    }
}

impl fmt::Display for PiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Axon => write!(f, "Axon"),
            Self::Soma1 => write!(f, "Soma1"),
            Self::RouterSend => write!(f, "RouterSend"),
            Self::RouterRecv => write!(f, "RouterRecv"),
            Self::Soma2 => write!(f, "Soma2"),
            Self::Memory => write!(f, "Memory"),
        }
    }
}

/// Which compute engine a computation primitive needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineClass {
    /// Multiply-accumulate style primitives
    Axon,
    /// Element-wise, comparison and neuron primitives
    Soma,
}

impl EngineClass {
    /// Whether a task of this class may occupy `pi`.
    #[must_use]
    pub fn accepts(self, pi: PiIndex) -> bool {
        pi.engine() == Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        for pi in PiIndex::ALL {
            assert_eq!(PiIndex::from_index(pi.index()), Some(pi));
        }
        assert_eq!(PiIndex::from_index(6), None);
    }

    #[test]
    fn test_pipeline_order() {
        assert!(PiIndex::Axon.predecessors().is_empty());
        assert_eq!(PiIndex::Soma2.predecessors().len(), 4);
        assert!(PiIndex::Soma2.predecessors().contains(&PiIndex::RouterRecv));
        assert!(!PiIndex::Memory.is_slot());
    }

    #[test]
    fn test_engine_acceptance() {
        assert!(EngineClass::Axon.accepts(PiIndex::Axon));
        assert!(!EngineClass::Axon.accepts(PiIndex::Soma1));
        assert!(EngineClass::Soma.accepts(PiIndex::Soma2));
        assert!(!EngineClass::Soma.accepts(PiIndex::Memory));
    }
}
