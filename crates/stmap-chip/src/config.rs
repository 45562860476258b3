//! Hardware hierarchy description.
//!
//! A [`HardwareConfig`] declares, outermost first, the space levels of the
//! accelerator (each with a multi-dimensional extent and the bandwidth of a
//! link that crosses that level), the time hierarchy (steps × phases), and
//! the per-core memory bank. It is usually read from a TOML file:
//!
//! ```toml
//! name = "two-chip card"
//!
//! [[space]]
//! name = "chip"
//! dims = [2, 1]
//! bandwidth = 4.0
//!
//! [[space]]
//! name = "core"
//! dims = [4, 4]
//! bandwidth = 32.0
//!
//! [time]
//! steps = 1
//! phases = 4
//!
//! [core]
//! memory_bytes = 147456
//! alignment = 32
//! disabled = [[[1, 0], [3, 3]]]
//! ```

use crate::coord::{Coord, MLCoord};
use crate::error::{ChipError, Result};
use crate::TIME_DEPTH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete hardware description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Space levels, outermost first
    pub space: Vec<LevelSpec>,

    /// Time hierarchy
    pub time: TimeSpec,

    /// Per-core resources
    pub core: CoreSpec,
}

/// One level of the space hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    /// Level name (e.g. `chip`, `core`)
    pub name: String,

    /// Extent per dimension of this level
    pub dims: Vec<usize>,

    /// Bytes per cycle of one link between neighbours at this level
    pub bandwidth: f64,
}

/// Time hierarchy of one column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpec {
    /// Steps per schedule
    pub steps: usize,

    /// Phases per step
    pub phases: usize,
}

/// Resources of one core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreSpec {
    /// Memory bank capacity in bytes
    pub memory_bytes: usize,

    /// Allocation alignment in bytes (power of two)
    #[serde(default = "default_alignment")]
    pub alignment: usize,

    /// Space coordinates of cores that are fused off
    #[serde(default)]
    pub disabled: Vec<MLCoord>,
}

const fn default_alignment() -> usize {
    32
}

impl LevelSpec {
    /// Create a level
    pub fn new(name: impl Into<String>, dims: Vec<usize>, bandwidth: f64) -> Self {
        Self {
            name: name.into(),
            dims,
            bandwidth,
        }
    }

    /// Number of positions at this level
    #[must_use]
    pub fn extent(&self) -> usize {
        self.dims.iter().product()
    }

    /// Whether `coord` is a valid position at this level
    #[must_use]
    pub fn contains(&self, coord: &Coord) -> bool {
        coord.dims() == self.dims.len()
            && coord
                .as_slice()
                .iter()
                .zip(&self.dims)
                .all(|(c, d)| c < d)
    }
}

impl HardwareConfig {
    /// One chip with an `x × y` core mesh, 4 phases, 144 KiB per core.
    pub fn single_chip(cores_x: usize, cores_y: usize) -> Self {
        Self::multi_chip((1, 1), (cores_x, cores_y))
    }

    /// A board of `chips.0 × chips.1` chips, each with a `cores.0 × cores.1` mesh.
    pub fn multi_chip(chips: (usize, usize), cores: (usize, usize)) -> Self {
        Self {
            name: format!(
                "{}x{} chips, {}x{} cores",
                chips.0, chips.1, cores.0, cores.1
            ),
            space: vec![
                LevelSpec::new("chip", vec![chips.0, chips.1], 4.0),
                LevelSpec::new("core", vec![cores.0, cores.1], 32.0),
            ],
            time: TimeSpec {
                steps: 1,
                phases: 4,
            },
            core: CoreSpec {
                memory_bytes: 144 * 1024,
                alignment: default_alignment(),
                disabled: Vec::new(),
            },
        }
    }

    /// Set the number of phases per step
    #[must_use]
    pub fn with_phases(mut self, phases: usize) -> Self {
        self.time.phases = phases;
        self
    }

    /// Set the number of steps
    #[must_use]
    pub fn with_steps(mut self, steps: usize) -> Self {
        self.time.steps = steps;
        self
    }

    /// Mark a core as disabled
    #[must_use]
    pub fn with_disabled(mut self, core: MLCoord) -> Self {
        self.core.disabled.push(core);
        self
    }

    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing, unreadable, not valid TOML, or
    /// fails validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading hardware configuration from: {}", path.display());

        if !path.exists() {
            return Err(ChipError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        tracing::debug!(
            "Hardware '{}': {} space level(s), {} column(s), {} point(s) per column",
            config.name,
            config.space_depth(),
            config.column_count(),
            config.points_per_column()
        );
        Ok(config)
    }

    /// Serialize back to TOML
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ChipError::parse(e.to_string()))
    }

    /// Check the hierarchy is usable
    ///
    /// # Errors
    ///
    /// Returns `ChipError::Validation` listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.space.is_empty() {
            errors.push("at least one space level is required".to_string());
        }
        for (i, level) in self.space.iter().enumerate() {
            if level.dims.is_empty() {
                errors.push(format!("space[{i}] '{}' has no dimensions", level.name));
            }
            if level.dims.contains(&0) {
                errors.push(format!("space[{i}] '{}' has a zero extent", level.name));
            }
            if !(level.bandwidth.is_finite() && level.bandwidth > 0.0) {
                errors.push(format!(
                    "space[{i}] '{}' bandwidth must be positive, got {}",
                    level.name, level.bandwidth
                ));
            }
        }
        if self.time.steps == 0 || self.time.phases == 0 {
            errors.push("time.steps and time.phases must be positive".to_string());
        }
        if self.core.memory_bytes == 0 {
            errors.push("core.memory_bytes must be positive".to_string());
        }
        if !self.core.alignment.is_power_of_two() {
            errors.push(format!(
                "core.alignment must be a power of two, got {}",
                self.core.alignment
            ));
        }
        for core in &self.core.disabled {
            if self.space_index(core).is_none() {
                errors.push(format!("disabled core {core} is outside the hierarchy"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let reason = errors
                .iter()
                .map(|e| format!("  - {e}"))
                .collect::<Vec<_>>()
                .join("\n");
            Err(ChipError::validation(reason))
        }
    }

    /// Number of space levels
    #[must_use]
    pub fn space_depth(&self) -> usize {
        self.space.len()
    }

    /// Depth of a coordinate that names one functional unit
    #[must_use]
    pub fn full_depth(&self) -> usize {
        self.space_depth() + TIME_DEPTH
    }

    /// Number of columns (distinct space coordinates)
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.space.iter().map(LevelSpec::extent).product()
    }

    /// Number of (step, phase) points per column
    #[must_use]
    pub fn points_per_column(&self) -> usize {
        self.time.steps * self.time.phases
    }

    /// Row-major index of a space coordinate, `None` if out of range or of
    /// the wrong depth.
    #[must_use]
    pub fn space_index(&self, column: &MLCoord) -> Option<usize> {
        if column.depth() < self.space_depth() {
            return None;
        }
        let mut index = 0;
        for (level, coord) in self.space.iter().zip(column.levels()) {
            if !level.contains(coord) {
                return None;
            }
            for (c, d) in coord.as_slice().iter().zip(&level.dims) {
                index = index * d + c;
            }
        }
        Some(index)
    }

    /// Inverse of [`HardwareConfig::space_index`].
    #[must_use]
    pub fn space_coord(&self, mut index: usize) -> Option<MLCoord> {
        if index >= self.column_count() {
            return None;
        }
        let mut levels: Vec<Coord> = Vec::with_capacity(self.space_depth());
        for level in self.space.iter().rev() {
            let mut components = vec![0; level.dims.len()];
            for (slot, d) in components.iter_mut().zip(&level.dims).rev() {
                *slot = index % d;
                index /= d;
            }
            levels.push(Coord::new(components));
        }
        levels.reverse();
        Some(MLCoord::from_levels(levels))
    }

    /// Every column coordinate in index order
    pub fn columns(&self) -> impl Iterator<Item = MLCoord> + '_ {
        (0..self.column_count()).filter_map(|i| self.space_coord(i))
    }

    /// Whether the core at `column` is fused off
    #[must_use]
    pub fn is_disabled(&self, column: &MLCoord) -> bool {
        let column = column.prefix(self.space_depth());
        self.core.disabled.iter().any(|d| *d == column)
    }

    /// Bandwidth of a link crossing `level`
    #[must_use]
    pub fn bandwidth(&self, level: usize) -> Option<f64> {
        self.space.get(level).map(|l| l.bandwidth)
    }
}
