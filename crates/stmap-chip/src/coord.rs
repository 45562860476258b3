//! Multi-level coordinates.
//!
//! An [`MLCoord`] addresses one point of the hardware hierarchy: one
//! [`Coord`] for each configured space level (outermost first), optionally
//! followed by the three time levels `step`, `phase` and PI index.
//!
//! ```text
//!   space levels ...........   time levels ..........
//!   [chip (x,y)] [core (x,y)]  [step] [phase] [PI index]
//! ```
//!
//! A prefix of an `MLCoord` is itself an `MLCoord` naming a region: the first
//! `space_depth` levels name a *column* (one core across all of time).

use crate::pi::PiIndex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position within one hierarchy level; a fixed-length integer tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Coord(Vec<usize>);

impl Coord {
    /// Create a coordinate from its components
    pub const fn new(components: Vec<usize>) -> Self {
        Self(components)
    }

    /// One-dimensional coordinate
    pub fn scalar(value: usize) -> Self {
        Self(vec![value])
    }

    /// Number of components
    #[must_use]
    pub fn dims(&self) -> usize {
        self.0.len()
    }

    /// Component `axis`, if present
    #[must_use]
    pub fn get(&self, axis: usize) -> Option<usize> {
        self.0.get(axis).copied()
    }

    /// All components
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Manhattan distance, `None` when the dimensionality differs.
    #[must_use]
    pub fn manhattan(&self, other: &Self) -> Option<usize> {
        if self.dims() != other.dims() {
            return None;
        }
        Some(
            self.0
                .iter()
                .zip(&other.0)
                .map(|(a, b)| a.abs_diff(*b))
                .sum(),
        )
    }

    /// One dimension-ordered unit step toward `target`.
    ///
    /// The lowest-numbered differing component moves by one. Returns `None`
    /// when already there or when the dimensionality differs.
    #[must_use]
    pub fn step_toward(&self, target: &Self) -> Option<Self> {
        if self.dims() != target.dims() {
            return None;
        }
        let axis = self.0.iter().zip(&target.0).position(|(a, b)| a != b)?;
        let mut next = self.0.clone();
        if next[axis] < target.0[axis] {
            next[axis] += 1;
        } else {
            next[axis] -= 1;
        }
        Some(Self(next))
    }
}

impl<const N: usize> From<[usize; N]> for Coord {
    fn from(components: [usize; N]) -> Self {
        Self(components.to_vec())
    }
}

impl From<usize> for Coord {
    fn from(value: usize) -> Self {
        Self::scalar(value)
    }
}

impl From<Vec<usize>> for Coord {
    fn from(components: Vec<usize>) -> Self {
        Self(components)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// Multi-level coordinate: one [`Coord`] per hierarchy level, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MLCoord(Vec<Coord>);

impl MLCoord {
    /// Create from per-level coordinates
    pub const fn from_levels(levels: Vec<Coord>) -> Self {
        Self(levels)
    }

    /// Number of levels addressed
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// All levels
    #[must_use]
    pub fn levels(&self) -> &[Coord] {
        &self.0
    }

    /// Level `index`, if addressed
    #[must_use]
    pub fn level(&self, index: usize) -> Option<&Coord> {
        self.0.get(index)
    }

    /// The first `depth` levels (all of them if shorter).
    #[must_use]
    pub fn prefix(&self, depth: usize) -> Self {
        Self(self.0.iter().take(depth).cloned().collect())
    }

    /// Append one level.
    #[must_use]
    pub fn with_level(mut self, coord: impl Into<Coord>) -> Self {
        self.0.push(coord.into());
        self
    }

    /// Extend a space coordinate with step, phase and PI index.
    #[must_use]
    pub fn at_time(&self, step: usize, phase: usize, pi: PiIndex) -> Self {
        self.clone()
            .with_level(step)
            .with_level(phase)
            .with_level(pi.index())
    }

    /// Step component, given the number of space levels.
    #[must_use]
    pub fn step(&self, space_depth: usize) -> Option<usize> {
        self.level(space_depth).and_then(|c| c.get(0))
    }

    /// Phase component, given the number of space levels.
    #[must_use]
    pub fn phase(&self, space_depth: usize) -> Option<usize> {
        self.level(space_depth + 1).and_then(|c| c.get(0))
    }

    /// PI index component, given the number of space levels.
    #[must_use]
    pub fn pi(&self, space_depth: usize) -> Option<PiIndex> {
        self.level(space_depth + 2)
            .and_then(|c| c.get(0))
            .and_then(PiIndex::from_index)
    }

    /// Same point with a different PI index.
    #[must_use]
    pub fn with_pi(&self, space_depth: usize, pi: PiIndex) -> Self {
        let mut levels = self.prefix(space_depth + 2).0;
        levels.push(Coord::scalar(pi.index()));
        Self(levels)
    }

    /// Same (step, phase, PI) moved to another column.
    #[must_use]
    pub fn relocated(&self, space_depth: usize, column: &Self) -> Self {
        let mut levels = column.prefix(space_depth).0;
        levels.extend(self.0.iter().skip(space_depth).cloned());
        Self(levels)
    }

    /// Index of the first level at which `self` and `other` differ.
    #[must_use]
    pub fn first_difference(&self, other: &Self) -> Option<usize> {
        let common = self.depth().min(other.depth());
        (0..common)
            .find(|&i| self.0[i] != other.0[i])
            .or_else(|| (self.depth() != other.depth()).then_some(common))
    }
}

impl fmt::Display for MLCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
