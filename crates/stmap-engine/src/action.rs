// SPDX-License-Identifier: AGPL-3.0-only

//! Placement commands
//!
//! [`ActionModel`] owns the task graph, the space-time matrix and the
//! context, and is the only thing that changes them. Callers issue
//! commands and read through shared views; no mutable handle escapes.
//!
//! Every command updates the matrix first and the context second, so a
//! command that fails inside the matrix leaves the context untouched.
//! Beyond that there is no rollback: a command that fails halfway through
//! a multi-task change leaves the tasks it already moved where they are.

use crate::context::STContext;
use crate::error::{EngineError, Result};
use crate::matrix::STMatrix;
use crate::route;
use std::collections::BTreeSet;
use stmap_chip::{HardwareConfig, MLCoord, PiIndex};
use stmap_graph::{
    BlockKind, EdgeId, Endpoint, RearrangeInfo, SplitModes, SplitVector, TaskGraph, TaskId, Window,
};
use tracing::{debug, info};

/// Exclusive owner of a graph and its placement
#[derive(Debug, Clone)]
pub struct ActionModel {
    graph: TaskGraph,
    matrix: STMatrix,
    context: STContext,
}

impl ActionModel {
    /// Take ownership of `graph` with an empty placement on `hw`
    pub fn new(graph: TaskGraph, hw: &HardwareConfig) -> Self {
        Self::with_matrix(graph, STMatrix::from_config(hw))
    }

    /// Take ownership of `graph` with an existing (empty) matrix
    pub fn with_matrix(graph: TaskGraph, matrix: STMatrix) -> Self {
        Self {
            graph,
            matrix,
            context: STContext::new(),
        }
    }

    // ── Views ───────────────────────────────────────────────────────────

    /// Task graph
    #[must_use]
    pub const fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Space-time matrix
    #[must_use]
    pub const fn matrix(&self) -> &STMatrix {
        &self.matrix
    }

    /// Placement context
    #[must_use]
    pub const fn context(&self) -> &STContext {
        &self.context
    }

    /// Hardware configuration
    #[must_use]
    pub const fn config(&self) -> &HardwareConfig {
        self.matrix.config()
    }

    /// Coordinate of a placed task
    #[must_use]
    pub fn coord_of(&self, task: TaskId) -> Option<&MLCoord> {
        self.context.get_ml_coord(task)
    }

    /// Give the three containers back
    pub fn into_parts(self) -> (TaskGraph, STMatrix, STContext) {
        (self.graph, self.matrix, self.context)
    }

    fn space_depth(&self) -> usize {
        self.matrix.space_depth()
    }

    // ── Single tasks ────────────────────────────────────────────────────

    /// Functional unit named by a full coordinate, if `task` may occupy it
    fn check_slot(&self, coord: &MLCoord, task: TaskId) -> Result<PiIndex> {
        let full = self.config().full_depth();
        if coord.depth() != full {
            return Err(EngineError::contract(
                coord,
                format!("placement needs all {full} levels"),
            ));
        }
        let pi = coord
            .pi(self.space_depth())
            .ok_or_else(|| EngineError::NotFound { coord: coord.clone() })?;

        match self.graph.block_ref(task)?.kind() {
            BlockKind::Compute(c) => {
                let engine = c.op.engine();
                if !engine.accepts(pi) {
                    return Err(EngineError::slot_mismatch(
                        task,
                        pi,
                        format!("{} needs the {engine:?} engine", c.op.name()),
                    ));
                }
            }
            BlockKind::Storage(_) => {
                if pi != PiIndex::Memory && !pi.is_router() {
                    return Err(EngineError::slot_mismatch(
                        task,
                        pi,
                        "storage lives in the memory bank or a router half",
                    ));
                }
            }
        }
        Ok(pi)
    }

    /// Place one task at a full coordinate
    ///
    /// # Errors
    ///
    /// Returns `AlreadyPlaced` if the task has a coordinate, `SlotMismatch`
    /// if its kind cannot run on the unit, `Occupied`/`DuplicateResident`
    /// for a taken unit, and `NotFound`/`ContractViolation` for bad
    /// coordinates. The context is unchanged on any failure.
    pub fn put_in(&mut self, coord: &MLCoord, task: TaskId) -> Result<()> {
        if let Some(current) = self.context.get_ml_coord(task) {
            return Err(EngineError::AlreadyPlaced {
                task,
                coord: current.clone(),
            });
        }
        let pi = self.check_slot(coord, task)?;
        self.matrix.add_task(coord, task)?;
        self.context.place(task, coord.clone());
        debug!("{task} -> {coord} ({pi})");
        Ok(())
    }

    /// Remove one task from the coordinate it occupies
    ///
    /// # Errors
    ///
    /// Returns `NotPlaced` if the task has no coordinate and `NotResident`
    /// if it is somewhere other than `coord`.
    pub fn take_out(&mut self, coord: &MLCoord, task: TaskId) -> Result<()> {
        let current = self
            .context
            .get_ml_coord(task)
            .ok_or(EngineError::NotPlaced(task))?;
        if current != coord {
            return Err(EngineError::NotResident {
                task,
                coord: coord.clone(),
            });
        }
        self.matrix.pop(coord, Some(task))?;
        self.context.unplace(task);
        debug!("{task} <- {coord}");
        Ok(())
    }

    /// Move a placed task to another coordinate with the same PI index
    ///
    /// If the destination refuses the task it is put back where it was.
    ///
    /// # Errors
    ///
    /// Returns `NotPlaced` for an unplaced task, `SlotMismatch` when the
    /// PI indexes differ, and whatever [`put_in`](Self::put_in) returns for
    /// the destination.
    pub fn move_task(&mut self, task: TaskId, to: &MLCoord) -> Result<()> {
        let sd = self.space_depth();
        let from = self
            .context
            .get_ml_coord(task)
            .cloned()
            .ok_or(EngineError::NotPlaced(task))?;
        let (Some(src_pi), Some(dst_pi)) = (from.pi(sd), to.pi(sd)) else {
            return Err(EngineError::contract(to, "a PI index is required"));
        };
        if src_pi != dst_pi {
            return Err(EngineError::slot_mismatch(
                task,
                dst_pi,
                format!("task occupies {src_pi} and cannot change unit while moving"),
            ));
        }
        self.take_out(&from, task)?;
        if let Err(e) = self.put_in(to, task) {
            self.put_in(&from, task)?;
            return Err(e);
        }
        Ok(())
    }

    // ── Groups ──────────────────────────────────────────────────────────

    /// Exclusive storage operands of a computation task
    fn operands(&self, task: TaskId) -> Result<Vec<TaskId>> {
        if !self.graph.block_ref(task)?.is_compute() {
            return Err(EngineError::NotCompute(task));
        }
        Ok(self
            .graph
            .group(task)
            .map(|g| g.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Place a computation task and put its operands in the memory bank of
    /// the same point
    ///
    /// # Errors
    ///
    /// Returns `NotCompute` for a storage task, plus any
    /// [`put_in`](Self::put_in) error.
    pub fn put_group_in(&mut self, coord: &MLCoord, task: TaskId) -> Result<()> {
        let operands = self.operands(task)?;
        self.put_in(coord, task)?;
        let memory = coord.with_pi(self.space_depth(), PiIndex::Memory);
        for operand in operands {
            self.put_in(&memory, operand)?;
        }
        Ok(())
    }

    /// Remove a computation task and every placed operand
    ///
    /// # Errors
    ///
    /// Returns `NotCompute` for a storage task, plus any
    /// [`take_out`](Self::take_out) error.
    pub fn take_group_out(&mut self, coord: &MLCoord, task: TaskId) -> Result<()> {
        let operands = self.operands(task)?;
        self.take_out(coord, task)?;
        for operand in operands {
            if let Some(at) = self.context.get_ml_coord(operand).cloned() {
                self.take_out(&at, operand)?;
            }
        }
        Ok(())
    }

    /// Move a computation task and bring its operands to the memory bank
    /// of the destination point
    ///
    /// # Errors
    ///
    /// Returns `NotCompute` for a storage task, plus any
    /// [`move_task`](Self::move_task) error.
    pub fn move_group(&mut self, task: TaskId, to: &MLCoord) -> Result<()> {
        let operands = self.operands(task)?;
        self.move_task(task, to)?;
        let memory = to.with_pi(self.space_depth(), PiIndex::Memory);
        for operand in operands {
            if let Some(at) = self.context.get_ml_coord(operand).cloned() {
                if at == memory {
                    continue;
                }
                self.take_out(&at, operand)?;
            }
            self.put_in(&memory, operand)?;
        }
        Ok(())
    }

    // ── Columns ─────────────────────────────────────────────────────────

    /// Residents of one column with their full coordinates
    fn column_residents(&self, column: &MLCoord) -> Result<Vec<(MLCoord, TaskId)>> {
        Ok(self
            .matrix
            .get_space(column)?
            .unwrap_or_default()
            .into_iter()
            .flat_map(|(coord, point)| {
                point
                    .tasks()
                    .map(|(pi, task)| (coord.clone().with_level(pi.index()), task))
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    /// Move everything resident in the second and later columns to the
    /// same (step, phase, PI) of the first column
    ///
    /// Returns the number of tasks moved. Routes of edges touching a moved
    /// task are dropped.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the first column has no points and `Occupied`
    /// if two tasks land in the same slot. The clashing task stays in its
    /// source column; tasks moved before it stay moved.
    pub fn merge_column(&mut self, columns: &[MLCoord]) -> Result<usize> {
        let Some((target, sources)) = columns.split_first() else {
            return Ok(0);
        };
        let sd = self.space_depth();
        let target = target.prefix(sd);
        if self.matrix.get_space(&target)?.is_none() {
            return Err(EngineError::NotFound { coord: target });
        }

        let mut moved = Vec::new();
        for source in sources {
            let source = source.prefix(sd);
            if source == target {
                continue;
            }
            for (from, task) in self.column_residents(&source)? {
                let to = from.relocated(sd, &target);
                self.take_out(&from, task)?;
                if let Err(e) = self.put_in(&to, task) {
                    self.put_in(&from, task)?;
                    self.drop_routes_touching(&moved);
                    return Err(e);
                }
                moved.push(task);
            }
        }
        self.drop_routes_touching(&moved);
        info!("Merged {} column(s) into {target}: {} task(s) moved", sources.len(), moved.len());
        Ok(moved.len())
    }

    /// Empty a column and remove its points from the matrix
    ///
    /// Returns the displaced tasks with the coordinates they had.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the column has no points.
    pub fn delete_column(&mut self, column: &MLCoord) -> Result<Vec<(MLCoord, TaskId)>> {
        let column = column.prefix(self.space_depth());
        let Some(points) = self.matrix.get_space(&column)? else {
            return Err(EngineError::NotFound { coord: column });
        };
        let points: Vec<MLCoord> = points.into_iter().map(|(c, _)| c).collect();

        let displaced = self.column_residents(&column)?;
        for (coord, task) in &displaced {
            self.take_out(coord, *task)?;
        }
        for point in &points {
            self.matrix.remove_element(point)?;
        }
        let tasks: Vec<TaskId> = displaced.iter().map(|(_, t)| *t).collect();
        self.drop_routes_touching(&tasks);
        info!("Deleted column {column}: {} task(s) displaced", displaced.len());
        Ok(displaced)
    }

    // ── Graph rewrites ──────────────────────────────────────────────────

    /// Split one computation task; the new tasks are not placed
    ///
    /// The task and its exclusive operands leave the placement if they
    /// were placed, and routes of edges the split removed are dropped.
    ///
    /// # Errors
    ///
    /// Returns whatever [`TaskGraph::split`] returns; the placement is
    /// unchanged in that case.
    pub fn split_task(
        &mut self,
        task: TaskId,
        vector: SplitVector,
        modes: SplitModes,
    ) -> Result<Vec<TaskId>> {
        let mut originals = vec![task];
        if let Some(group) = self.graph.group(task) {
            originals.extend(group.iter().copied());
        }

        let new = self.graph.split(task, vector, modes)?;

        for id in originals {
            if self.graph.contains_block(id) {
                continue;
            }
            if let Some(coord) = self.context.get_ml_coord(id).cloned() {
                self.matrix.pop(&coord, Some(id))?;
                self.context.unplace(id);
                debug!("{id} unplaced from {coord} by split");
            }
        }
        let stale: Vec<EdgeId> = self
            .matrix
            .routes()
            .keys()
            .filter(|e| self.graph.edge(**e).is_none())
            .copied()
            .collect();
        for edge in stale {
            self.clear_route(edge);
        }
        Ok(new)
    }

    /// Split several computation tasks with the same vector; returns all
    /// new ids in order
    ///
    /// # Errors
    ///
    /// Stops at the first failing split; earlier splits stay applied.
    pub fn split_group(
        &mut self,
        tasks: &[TaskId],
        vector: SplitVector,
        modes: SplitModes,
    ) -> Result<Vec<TaskId>> {
        let mut new = Vec::new();
        for task in tasks {
            new.extend(self.split_task(*task, vector, modes)?);
        }
        Ok(new)
    }

    /// Add an edge between two ports; window sizes must agree
    ///
    /// # Errors
    ///
    /// Returns the graph's `ShapeViolation` for mismatched windows and
    /// unknown-id errors for bad endpoints.
    pub fn connect(
        &mut self,
        src: TaskId,
        src_port: usize,
        src_window: Window,
        dst: TaskId,
        dst_port: usize,
        dst_window: Window,
    ) -> Result<EdgeId> {
        Ok(self
            .graph
            .connect(src, src_port, src_window, dst, dst_port, dst_window)?)
    }

    /// Add an edge through a reshape or permutation; volumes must agree
    ///
    /// # Errors
    ///
    /// Returns the graph's `ShapeViolation` for mismatched volumes.
    pub fn connect_rearranged(
        &mut self,
        src: Endpoint,
        dst: Endpoint,
        rearrange: Vec<RearrangeInfo>,
    ) -> Result<EdgeId> {
        Ok(self.graph.connect_rearranged(src, dst, rearrange)?)
    }

    // ── Routes ──────────────────────────────────────────────────────────

    /// Record the route of an edge as a chain of adjacent columns
    ///
    /// When both endpoints are placed the route must start at the
    /// producer's column and end at the consumer's.
    ///
    /// # Errors
    ///
    /// Returns `Route` for a malformed path or one that does not join the
    /// endpoints, and `UnknownEdge` for an unknown edge.
    pub fn map_edge(&mut self, edge: EdgeId, path: Vec<MLCoord>) -> Result<()> {
        let e = self.graph.edge_ref(edge)?;
        if path.is_empty() {
            return Err(EngineError::route(edge, "empty path"));
        }
        route::check_path(self.config(), &path).map_err(|reason| EngineError::route(edge, reason))?;

        let sd = self.space_depth();
        let ends = (
            self.context.get_ml_coord(e.src.task).map(|c| c.prefix(sd)),
            self.context.get_ml_coord(e.dst.task).map(|c| c.prefix(sd)),
        );
        if let (Some(src), Some(dst)) = ends {
            if path.first() != Some(&src) || path.last() != Some(&dst) {
                return Err(EngineError::route(
                    edge,
                    format!("path does not join {src} to {dst}"),
                ));
            }
        }

        self.matrix.record_route(edge, path.clone());
        self.context.set_route(edge, path);
        Ok(())
    }

    /// Build and record the dimension-ordered route of an edge whose
    /// endpoints are both placed
    ///
    /// # Errors
    ///
    /// Returns `NotPlaced` if an endpoint has no coordinate.
    pub fn route_edge(&mut self, edge: EdgeId) -> Result<Vec<MLCoord>> {
        let e = self.graph.edge_ref(edge)?;
        let src = self
            .context
            .get_ml_coord(e.src.task)
            .ok_or(EngineError::NotPlaced(e.src.task))?;
        let dst = self
            .context
            .get_ml_coord(e.dst.task)
            .ok_or(EngineError::NotPlaced(e.dst.task))?;
        let path = route::column_path(self.config(), src, dst)
            .ok_or_else(|| EngineError::route(edge, "endpoint outside the hierarchy"))?;
        self.map_edge(edge, path.clone())?;
        Ok(path)
    }

    /// Route every edge whose endpoints are both placed; returns how many
    ///
    /// # Errors
    ///
    /// Propagates the first [`route_edge`](Self::route_edge) failure.
    pub fn route_placed_edges(&mut self) -> Result<usize> {
        let ready: Vec<EdgeId> = self
            .graph
            .edges()
            .filter(|e| self.context.is_placed(e.src.task) && self.context.is_placed(e.dst.task))
            .map(|e| e.id)
            .collect();
        for edge in &ready {
            self.route_edge(*edge)?;
        }
        Ok(ready.len())
    }

    fn clear_route(&mut self, edge: EdgeId) {
        self.matrix.remove_route(edge);
        self.context.clear_route(edge);
    }

    fn drop_routes_touching(&mut self, tasks: &[TaskId]) {
        let tasks: BTreeSet<TaskId> = tasks.iter().copied().collect();
        let stale: Vec<EdgeId> = self
            .matrix
            .routes()
            .keys()
            .filter(|id| {
                self.graph
                    .edge(**id)
                    .map_or(true, |e| tasks.contains(&e.src.task) || tasks.contains(&e.dst.task))
            })
            .copied()
            .collect();
        for edge in stale {
            self.clear_route(edge);
        }
    }

    // ── Checks ──────────────────────────────────────────────────────────

    /// Verify that matrix and context describe the same placement and
    /// the same routes, and that every placed task is in the graph
    ///
    /// # Errors
    ///
    /// Returns `Inconsistent` naming the first disagreement.
    pub fn check_consistency(&self) -> Result<()> {
        let residents = self.matrix.residents();
        for (coord, task) in &residents {
            match self.context.get_ml_coord(*task) {
                Some(c) if c == coord => {}
                Some(c) => {
                    return Err(EngineError::inconsistent(format!(
                        "{task} is at {coord} in the matrix but {c} in the context"
                    )))
                }
                None => {
                    return Err(EngineError::inconsistent(format!(
                        "{task} is at {coord} but has no context entry"
                    )))
                }
            }
            if !self.graph.contains_block(*task) {
                return Err(EngineError::inconsistent(format!(
                    "{task} is placed but not in the graph"
                )));
            }
        }
        if residents.len() != self.context.placed_count() {
            return Err(EngineError::inconsistent(format!(
                "matrix holds {} task(s), context {}",
                residents.len(),
                self.context.placed_count()
            )));
        }

        let matrix_routes = self.matrix.routes();
        let context_routes = self.context.routes().count();
        if matrix_routes.len() != context_routes
            || self
                .context
                .routes()
                .any(|(e, p)| matrix_routes.get(&e).map(Vec::as_slice) != Some(p))
        {
            return Err(EngineError::inconsistent("edge routes differ"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stmap_graph::{BiasType, ComputeBlock, ComputeOp, Precision, Shape, StorageKind};

    fn core(x: usize, y: usize) -> MLCoord {
        MLCoord::from_levels(vec![[0, 0].into(), [x, y].into()])
    }

    fn layer() -> (TaskGraph, TaskId, TaskId, TaskId) {
        let mut g = TaskGraph::new();
        let shape = Shape::vector(4).with(stmap_graph::Axis::R, 3);
        let input = g.add_storage(StorageKind::Input, Shape::vector(3), Precision::Int8).unwrap();
        let weight = g.add_storage(StorageKind::Swfc, shape, Precision::Int8).unwrap();
        let cvm = g
            .add_compute(ComputeBlock::new(
                ComputeOp::Cvm { bit_shift: 0 },
                shape,
                Precision::Int8,
                BiasType::None,
            ))
            .unwrap();
        g.connect_whole(input, cvm, 0).unwrap();
        g.connect_whole(weight, cvm, 1).unwrap();
        (g, input, weight, cvm)
    }

    #[test]
    fn test_compute_needs_matching_engine() {
        let (g, _, weight, cvm) = layer();
        let mut am = ActionModel::new(g, &HardwareConfig::single_chip(2, 2));
        let soma = core(0, 0).at_time(0, 0, PiIndex::Soma1);
        assert!(matches!(
            am.put_in(&soma, cvm),
            Err(EngineError::SlotMismatch { .. })
        ));
        let axon = core(0, 0).at_time(0, 0, PiIndex::Axon);
        assert!(matches!(
            am.put_in(&axon, weight),
            Err(EngineError::SlotMismatch { .. })
        ));
        am.put_in(&axon, cvm).unwrap();
        assert_eq!(am.coord_of(cvm), Some(&axon));
        am.check_consistency().unwrap();
    }

    #[test]
    fn test_group_operands_go_to_memory() {
        let (g, input, weight, cvm) = layer();
        let mut am = ActionModel::new(g, &HardwareConfig::single_chip(2, 2));
        let axon = core(1, 0).at_time(0, 2, PiIndex::Axon);
        am.put_group_in(&axon, cvm).unwrap();
        let memory = core(1, 0).at_time(0, 2, PiIndex::Memory);
        assert_eq!(am.coord_of(weight), Some(&memory));
        assert_eq!(am.coord_of(input), Some(&memory));

        let to = core(0, 1).at_time(0, 2, PiIndex::Axon);
        am.move_group(cvm, &to).unwrap();
        assert_eq!(am.coord_of(weight), Some(&core(0, 1).at_time(0, 2, PiIndex::Memory)));
        am.check_consistency().unwrap();

        am.take_group_out(&to, cvm).unwrap();
        assert_eq!(am.context().placed_count(), 0);
        assert!(matches!(am.put_group_in(&axon, weight), Err(EngineError::NotCompute(_))));
    }

    #[test]
    fn test_move_keeps_unit() {
        let (g, _, _, cvm) = layer();
        let mut am = ActionModel::new(g, &HardwareConfig::single_chip(2, 2));
        let axon = core(0, 0).at_time(0, 0, PiIndex::Axon);
        am.put_in(&axon, cvm).unwrap();
        let err = am
            .move_task(cvm, &core(1, 1).at_time(0, 0, PiIndex::Soma2))
            .unwrap_err();
        assert!(matches!(err, EngineError::SlotMismatch { .. }));
        assert_eq!(am.coord_of(cvm), Some(&axon));
    }

    #[test]
    fn test_split_unplaces_originals() {
        let (g, _, weight, cvm) = layer();
        let mut am = ActionModel::new(g, &HardwareConfig::single_chip(2, 2));
        let axon = core(0, 0).at_time(0, 0, PiIndex::Axon);
        am.put_group_in(&axon, cvm).unwrap();
        let new = am
            .split_task(cvm, SplitVector::new(1, 1, 2, 1), SplitModes::default())
            .unwrap();
        assert!(!new.is_empty());
        assert!(am.coord_of(cvm).is_none());
        assert!(am.coord_of(weight).is_none());
        assert!(am.matrix().is_empty(&axon).unwrap());
        am.check_consistency().unwrap();
    }

    #[test]
    fn test_route_edge_joins_endpoints() {
        let (g, input, _, cvm) = layer();
        let mut am = ActionModel::new(g, &HardwareConfig::single_chip(3, 3));
        am.put_in(&core(0, 0).at_time(0, 0, PiIndex::Memory), input).unwrap();
        am.put_in(&core(2, 1).at_time(0, 1, PiIndex::Axon), cvm).unwrap();
        let edge = am.graph().output_edges(input)[0].id;
        let path = am.route_edge(edge).unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(am.context().get_route(edge), Some(path.as_slice()));

        let wrong = vec![core(1, 1), core(2, 1)];
        assert!(matches!(am.map_edge(edge, wrong), Err(EngineError::Route { .. })));
        am.check_consistency().unwrap();
    }
}
