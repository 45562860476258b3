//! Hardware model for a tiled neuromorphic accelerator.
//!
//! This crate has **no knowledge of task graphs**. It is a pure model of the
//! silicon as the placement engine sees it: the nested space hierarchy
//! (chip array → chip → core), the time hierarchy (step → phase), the
//! functional units available in one core-phase, and the per-level link
//! bandwidths.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`config`] | `HardwareConfig`: level extents, bandwidths, core memory; TOML loading and presets |
//! | [`coord`] | `Coord` (one level) and `MLCoord` (one coordinate per level) |
//! | [`pi`] | `PiIndex` functional units and the engine class each compute op needs |
//!
//! # Example
//!
//! ```
//! use stmap_chip::{HardwareConfig, MLCoord, PiIndex};
//!
//! let hw = HardwareConfig::single_chip(4, 4);
//! assert_eq!(hw.column_count(), 16);
//!
//! let core = MLCoord::from_levels(vec![[0, 0].into(), [1, 2].into()]);
//! let slot = core.at_time(0, 1, PiIndex::Axon);
//! assert_eq!(slot.depth(), hw.full_depth());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod coord;
mod error;
pub mod pi;

pub use config::{CoreSpec, HardwareConfig, LevelSpec, TimeSpec};
pub use coord::{Coord, MLCoord};
pub use error::{ChipError, Result};
pub use pi::{EngineClass, PiIndex};

/// Number of time levels below the space levels: step, phase, PI index.
pub const TIME_DEPTH: usize = 3;
