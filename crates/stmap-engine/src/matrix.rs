// SPDX-License-Identifier: AGPL-3.0-only

//! Space-time matrix
//!
//! The matrix is a flat arena with one optional [`STPoint`] per
//! (space coordinate, step, phase). Its index is computed from the level
//! extents of the [`HardwareConfig`] it was built from:
//!
//! ```text
//! index = (space_index * steps + step) * phases + phase
//! ```
//!
//! Coordinates may stop at any level below the space levels: a space
//! coordinate names a column, adding a step names one step of that column,
//! adding a phase names a point, and adding a PI index names one functional
//! unit of that point.

use crate::error::{EngineError, Result};
use std::collections::{BTreeMap, BTreeSet};
use stmap_chip::{HardwareConfig, MLCoord, PiIndex, TIME_DEPTH};
use stmap_graph::{EdgeId, TaskId};

/// One core at one phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct STPoint {
    slots: [Option<TaskId>; 5],
    memory: BTreeSet<TaskId>,
}

impl STPoint {
    /// Empty point
    pub fn new() -> Self {
        Self::default()
    }

    /// Task in functional-unit slot `pi`; always `None` for the memory bank
    #[must_use]
    pub fn occupant(&self, pi: PiIndex) -> Option<TaskId> {
        if pi.is_slot() {
            self.slots[pi.index()]
        } else {
            None
        }
    }

    /// Storage tasks resident in the memory bank
    #[must_use]
    pub const fn memory(&self) -> &BTreeSet<TaskId> {
        &self.memory
    }

    /// Whether `task` sits in unit `pi`
    #[must_use]
    pub fn holds(&self, pi: PiIndex, task: TaskId) -> bool {
        if pi.is_slot() {
            self.slots[pi.index()] == Some(task)
        } else {
            self.memory.contains(&task)
        }
    }

    /// Whether unit `pi` holds nothing
    #[must_use]
    pub fn is_unit_empty(&self, pi: PiIndex) -> bool {
        if pi.is_slot() {
            self.slots[pi.index()].is_none()
        } else {
            self.memory.is_empty()
        }
    }

    /// Whether no unit holds anything
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none) && self.memory.is_empty()
    }

    /// Every resident with its unit, slots in pipeline order then memory
    pub fn tasks(&self) -> impl Iterator<Item = (PiIndex, TaskId)> + '_ {
        PiIndex::PIPELINE
            .iter()
            .filter_map(|pi| self.slots[pi.index()].map(|t| (*pi, t)))
            .chain(self.memory.iter().map(|t| (PiIndex::Memory, *t)))
    }

    /// Number of residents
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count() + self.memory.len()
    }

    /// Place `task` in unit `pi`, or return the task in the way
    fn insert(&mut self, pi: PiIndex, task: TaskId) -> std::result::Result<(), TaskId> {
        if pi.is_slot() {
            let slot = &mut self.slots[pi.index()];
            match slot {
                Some(occupant) => Err(*occupant),
                None => {
                    *slot = Some(task);
                    Ok(())
                }
            }
        } else if self.memory.insert(task) {
            Ok(())
        } else {
            Err(task)
        }
    }

    /// Remove `task` (or whatever is there / the lowest id in memory) from `pi`
    fn remove(&mut self, pi: PiIndex, task: Option<TaskId>) -> std::result::Result<Option<TaskId>, TaskId> {
        if pi.is_slot() {
            let slot = &mut self.slots[pi.index()];
            match (task, *slot) {
                (Some(want), Some(have)) if want != have => Err(want),
                (Some(want), None) => Err(want),
                (_, have) => {
                    *slot = None;
                    Ok(have)
                }
            }
        } else {
            match task {
                Some(want) => {
                    if self.memory.remove(&want) {
                        Ok(Some(want))
                    } else {
                        Err(want)
                    }
                }
                None => Ok(self.memory.pop_first()),
            }
        }
    }
}

/// What a coordinate resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementRef<'a> {
    /// Present points under a column or (column, step) prefix, with their
    /// coordinates
    Region(Vec<(MLCoord, &'a STPoint)>),
    /// One core-phase
    Point(&'a STPoint),
    /// One functional unit of a point
    Unit {
        /// Point holding the unit
        point: &'a STPoint,
        /// Unit
        pi: PiIndex,
    },
}

impl ElementRef<'_> {
    /// Whether nothing is resident in the element
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Region(points) => points.iter().all(|(_, p)| p.is_empty()),
            Self::Point(point) => point.is_empty(),
            Self::Unit { point, pi } => point.is_unit_empty(*pi),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Address {
    Column(usize),
    Step(usize, usize),
    Point(usize),
    Unit(usize, PiIndex),
}

/// Space-time occupancy of the whole accelerator plus edge routes
#[derive(Debug, Clone)]
pub struct STMatrix {
    hw: HardwareConfig,
    points: Vec<Option<STPoint>>,
    routes: BTreeMap<EdgeId, Vec<MLCoord>>,
}

impl STMatrix {
    /// Matrix with one empty point per (column, step, phase), skipping the
    /// columns the configuration marks disabled
    pub fn from_config(hw: &HardwareConfig) -> Self {
        let mut matrix = Self::empty(hw);
        let per_column = hw.points_per_column();
        let mut disabled = 0;
        for (space, column) in hw.columns().enumerate() {
            if hw.is_disabled(&column) {
                disabled += 1;
                continue;
            }
            for slot in &mut matrix.points[space * per_column..(space + 1) * per_column] {
                *slot = Some(STPoint::new());
            }
        }
        tracing::info!(
            "Space-time matrix for '{}': {} of {} column(s) functional, {} point(s) each",
            hw.name,
            hw.column_count() - disabled,
            hw.column_count(),
            per_column
        );
        matrix
    }

    /// Matrix with the configuration's extents but no points
    pub fn empty(hw: &HardwareConfig) -> Self {
        Self {
            hw: hw.clone(),
            points: vec![None; hw.column_count() * hw.points_per_column()],
            routes: BTreeMap::new(),
        }
    }

    /// Configuration the matrix was built from
    #[must_use]
    pub const fn config(&self) -> &HardwareConfig {
        &self.hw
    }

    /// Number of space levels
    #[must_use]
    pub fn space_depth(&self) -> usize {
        self.hw.space_depth()
    }

    /// Number of present points
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.points.iter().flatten().count()
    }

    fn resolve(&self, coord: &MLCoord) -> Result<Option<Address>> {
        let sd = self.space_depth();
        if coord.depth() < sd {
            return Err(EngineError::contract(
                coord,
                format!("coordinate has {} level(s), space needs {sd}", coord.depth()),
            ));
        }
        if coord.depth() > sd + TIME_DEPTH {
            return Ok(None);
        }
        let Some(space) = self.hw.space_index(coord) else {
            return Ok(None);
        };
        if coord.depth() == sd {
            return Ok(Some(Address::Column(space)));
        }

        let steps = self.hw.time.steps;
        let phases = self.hw.time.phases;
        let Some(step) = coord.step(sd).filter(|s| *s < steps) else {
            return Ok(None);
        };
        if coord.depth() == sd + 1 {
            return Ok(Some(Address::Step(space, step)));
        }
        let Some(phase) = coord.phase(sd).filter(|p| *p < phases) else {
            return Ok(None);
        };
        let flat = (space * steps + step) * phases + phase;
        if coord.depth() == sd + 2 {
            return Ok(Some(Address::Point(flat)));
        }
        Ok(coord.pi(sd).map(|pi| Address::Unit(flat, pi)))
    }

    /// Writes need a coordinate that fits the hierarchy
    fn check_depth(&self, coord: &MLCoord) -> Result<()> {
        let deepest = self.space_depth() + TIME_DEPTH;
        if coord.depth() > deepest {
            return Err(EngineError::contract(
                coord,
                format!("coordinate deeper than the {deepest} level hierarchy"),
            ));
        }
        Ok(())
    }

    fn resolve_unit(&self, coord: &MLCoord) -> Result<(usize, PiIndex)> {
        self.check_depth(coord)?;
        match self.resolve(coord)? {
            Some(Address::Unit(flat, pi)) => Ok((flat, pi)),
            Some(_) => Err(EngineError::contract(coord, "a PI index is required")),
            None => Err(EngineError::NotFound { coord: coord.clone() }),
        }
    }

    /// Coordinate of flat point `index`
    fn point_coord(&self, index: usize) -> Option<MLCoord> {
        let phases = self.hw.time.phases;
        let per_column = self.hw.points_per_column();
        let column = self.hw.space_coord(index / per_column)?;
        let within = index % per_column;
        Some(column.with_level(within / phases).with_level(within % phases))
    }

    fn region(&self, range: std::ops::Range<usize>) -> Vec<(MLCoord, &STPoint)> {
        range
            .filter_map(|i| {
                let point = self.points.get(i)?.as_ref()?;
                Some((self.point_coord(i)?, point))
            })
            .collect()
    }

    /// Insert a point at a `(space, step, phase)` coordinate
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation` if the coordinate does not name a point,
    /// `NotFound` if it is outside the hierarchy and `ElementExists` if a
    /// point is already there.
    pub fn add_element(&mut self, coord: &MLCoord, point: STPoint) -> Result<()> {
        self.check_depth(coord)?;
        match self.resolve(coord)? {
            Some(Address::Point(flat)) => {
                let slot = &mut self.points[flat];
                if slot.is_some() {
                    return Err(EngineError::ElementExists { coord: coord.clone() });
                }
                *slot = Some(point);
                Ok(())
            }
            Some(_) => Err(EngineError::contract(coord, "only points can be added")),
            None => Err(EngineError::NotFound { coord: coord.clone() }),
        }
    }

    /// Remove the point at a `(space, step, phase)` coordinate
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation` if the coordinate does not name a point
    /// and `NotFound` if no point is there.
    pub fn remove_element(&mut self, coord: &MLCoord) -> Result<STPoint> {
        self.check_depth(coord)?;
        match self.resolve(coord)? {
            Some(Address::Point(flat)) => self.points[flat]
                .take()
                .ok_or_else(|| EngineError::NotFound { coord: coord.clone() }),
            Some(_) => Err(EngineError::contract(coord, "only points can be removed")),
            None => Err(EngineError::NotFound { coord: coord.clone() }),
        }
    }

    /// Resolve a coordinate of any depth from the space depth down
    ///
    /// Out-of-range components, levels below the PI index and absent points
    /// yield `None`.
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation` for a coordinate narrower than the space
    /// levels.
    pub fn get_element(&self, coord: &MLCoord) -> Result<Option<ElementRef<'_>>> {
        let per_column = self.hw.points_per_column();
        let phases = self.hw.time.phases;
        Ok(match self.resolve(coord)? {
            None => None,
            Some(Address::Column(space)) => {
                let points = self.region(space * per_column..(space + 1) * per_column);
                (!points.is_empty()).then_some(ElementRef::Region(points))
            }
            Some(Address::Step(space, step)) => {
                let start = space * per_column + step * phases;
                let points = self.region(start..start + phases);
                (!points.is_empty()).then_some(ElementRef::Region(points))
            }
            Some(Address::Point(flat)) => self.points[flat].as_ref().map(ElementRef::Point),
            Some(Address::Unit(flat, pi)) => self.points[flat]
                .as_ref()
                .map(|point| ElementRef::Unit { point, pi }),
        })
    }

    /// Every present point of the column named by the first space levels
    /// of `space`, with its coordinate
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation` if `space` is narrower than the space
    /// levels.
    pub fn get_space(&self, space: &MLCoord) -> Result<Option<Vec<(MLCoord, &STPoint)>>> {
        let column = space.prefix(self.space_depth());
        match self.get_element(&column)? {
            Some(ElementRef::Region(points)) => Ok(Some(points)),
            _ => Ok(None),
        }
    }

    /// Point at the `(space, step, phase)` prefix of `coord`
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation` if `coord` does not reach the phase level.
    pub fn point(&self, coord: &MLCoord) -> Result<Option<&STPoint>> {
        let sd = self.space_depth();
        if coord.depth() < sd + 2 {
            return Err(EngineError::contract(coord, "a step and phase are required"));
        }
        match self.resolve(&coord.prefix(sd + 2))? {
            Some(Address::Point(flat)) => Ok(self.points[flat].as_ref()),
            _ => Ok(None),
        }
    }

    /// Put `task` into the functional unit named by a full coordinate
    ///
    /// # Errors
    ///
    /// Returns `Occupied` for a taken slot, `DuplicateResident` for a task
    /// already in the memory bank, and `NotFound` if the point is absent.
    pub fn add_task(&mut self, coord: &MLCoord, task: TaskId) -> Result<()> {
        let (flat, pi) = self.resolve_unit(coord)?;
        let point = self.points[flat]
            .as_mut()
            .ok_or_else(|| EngineError::NotFound { coord: coord.clone() })?;
        point.insert(pi, task).map_err(|occupant| {
            if pi.is_slot() {
                EngineError::Occupied {
                    coord: coord.clone(),
                    pi,
                    occupant,
                }
            } else {
                EngineError::DuplicateResident {
                    coord: coord.clone(),
                    task,
                }
            }
        })
    }

    /// Remove a task from the unit named by a full coordinate.
    ///
    /// With `task = None` the slot is cleared, or the lowest id is taken
    /// from the memory bank. Returns what was removed.
    ///
    /// # Errors
    ///
    /// Returns `NotResident` if `task` is given but not there, and
    /// `NotFound` if the point is absent.
    pub fn pop(&mut self, coord: &MLCoord, task: Option<TaskId>) -> Result<Option<TaskId>> {
        let (flat, pi) = self.resolve_unit(coord)?;
        let point = self.points[flat]
            .as_mut()
            .ok_or_else(|| EngineError::NotFound { coord: coord.clone() })?;
        point.remove(pi, task).map_err(|task| EngineError::NotResident {
            task,
            coord: coord.clone(),
        })
    }

    /// Whether nothing is resident at or below `coord`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the coordinate resolves to nothing and
    /// `ContractViolation` for malformed coordinates.
    pub fn is_empty(&self, coord: &MLCoord) -> Result<bool> {
        self.get_element(coord)?
            .map(|e| e.is_empty())
            .ok_or_else(|| EngineError::NotFound { coord: coord.clone() })
    }

    /// Present points with their `(space, step, phase)` coordinates
    pub fn points(&self) -> impl Iterator<Item = (MLCoord, &STPoint)> {
        self.points.iter().enumerate().filter_map(|(i, p)| {
            let point = p.as_ref()?;
            Some((self.point_coord(i)?, point))
        })
    }

    /// Every resident task with its full coordinate
    #[must_use]
    pub fn residents(&self) -> Vec<(MLCoord, TaskId)> {
        self.points()
            .flat_map(|(coord, point)| {
                point
                    .tasks()
                    .map(|(pi, task)| (coord.clone().with_level(pi.index()), task))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Record the hop-by-hop route of an edge, replacing any previous one
    pub fn record_route(&mut self, edge: EdgeId, path: Vec<MLCoord>) {
        self.routes.insert(edge, path);
    }

    /// Route of an edge
    #[must_use]
    pub fn route(&self, edge: EdgeId) -> Option<&[MLCoord]> {
        self.routes.get(&edge).map(Vec::as_slice)
    }

    /// Forget the route of an edge
    pub fn remove_route(&mut self, edge: EdgeId) -> Option<Vec<MLCoord>> {
        self.routes.remove(&edge)
    }

    /// All recorded routes
    #[must_use]
    pub const fn routes(&self) -> &BTreeMap<EdgeId, Vec<MLCoord>> {
        &self.routes
    }
}
