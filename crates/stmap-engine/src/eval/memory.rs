//! Per-phase memory footprint of one column

use crate::error::{EngineError, Result};
use crate::matrix::STMatrix;
use std::collections::{BTreeMap, BTreeSet};
use stmap_chip::MLCoord;
use stmap_graph::{TaskGraph, TaskId};
use tracing::{debug, warn};

/// Memory use of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryReport {
    /// Column evaluated
    pub column: MLCoord,
    /// Bytes in use at each (step, phase)
    pub per_phase: BTreeMap<(usize, usize), usize>,
    /// Largest per-phase figure
    pub peak: usize,
    /// Configured capacity of one core
    pub capacity: usize,
}

impl MemoryReport {
    /// Whether the peak exceeds the core's memory
    #[must_use]
    pub const fn exceeds_capacity(&self) -> bool {
        self.peak > self.capacity
    }
}

/// Sums the storage a column needs, phase by phase
///
/// A phase counts every task in its memory bank plus every storage block
/// feeding or fed by one of its computations, each once.
#[derive(Debug, Clone, Copy)]
pub struct MemoryEvaluator<'a> {
    graph: &'a TaskGraph,
    matrix: &'a STMatrix,
}

impl<'a> MemoryEvaluator<'a> {
    /// Evaluator over a graph and its placement
    pub const fn new(graph: &'a TaskGraph, matrix: &'a STMatrix) -> Self {
        Self { graph, matrix }
    }

    fn footprint(&self, task: TaskId) -> Result<usize> {
        let alignment = self.matrix.config().core.alignment;
        self.graph
            .storage_footprint(task, alignment)
            .ok_or_else(|| EngineError::inconsistent(format!("{task} in a memory bank is not a storage block")))
    }

    /// Footprint of every phase of `column`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a column without points and `Inconsistent`
    /// if a memory bank holds something other than a storage block.
    pub fn evaluate(&self, column: &MLCoord) -> Result<MemoryReport> {
        let sd = self.matrix.space_depth();
        let column = column.prefix(sd);
        let points = self
            .matrix
            .get_space(&column)?
            .ok_or_else(|| EngineError::NotFound { coord: column.clone() })?;

        let mut per_phase = BTreeMap::new();
        for (coord, point) in points {
            let mut counted: BTreeSet<TaskId> = point.memory().iter().copied().collect();
            for (pi, task) in point.tasks() {
                if !pi.is_slot() {
                    continue;
                }
                let Some(block) = self.graph.block(task) else {
                    continue;
                };
                if !block.is_compute() {
                    continue;
                }
                counted.extend(
                    self.graph
                        .producers(task)
                        .into_iter()
                        .chain(self.graph.consumers(task))
                        .filter(|id| self.graph.block(*id).is_some_and(|b| !b.is_compute())),
                );
            }

            let mut bytes = 0;
            for task in &counted {
                bytes += self.footprint(*task)?;
            }
            let key = (coord.step(sd).unwrap_or(0), coord.phase(sd).unwrap_or(0));
            per_phase.insert(key, bytes);
        }

        let peak = per_phase.values().copied().max().unwrap_or(0);
        let report = MemoryReport {
            column,
            per_phase,
            peak,
            capacity: self.matrix.config().core.memory_bytes,
        };
        if report.exceeds_capacity() {
            warn!(
                "Column {} needs {} bytes, core has {}",
                report.column, report.peak, report.capacity
            );
        } else {
            debug!("Column {} peak {} bytes", report.column, report.peak);
        }
        Ok(report)
    }

    /// Reports for every column holding at least one task
    ///
    /// # Errors
    ///
    /// See [`evaluate`](Self::evaluate).
    pub fn evaluate_occupied(&self) -> Result<Vec<MemoryReport>> {
        let sd = self.matrix.space_depth();
        let columns: BTreeSet<MLCoord> = self
            .matrix
            .points()
            .filter(|(_, p)| !p.is_empty())
            .map(|(c, _)| c.prefix(sd))
            .collect();
        columns.iter().map(|c| self.evaluate(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionModel;
    use stmap_chip::{HardwareConfig, PiIndex};
    use stmap_graph::{Axis, BiasType, ComputeBlock, ComputeOp, Precision, Shape, StorageKind};

    fn core(x: usize, y: usize) -> MLCoord {
        MLCoord::from_levels(vec![[0, 0].into(), [x, y].into()])
    }

    #[test]
    fn test_operands_counted_once_per_phase() {
        let mut g = TaskGraph::new();
        let shape = Shape::vector(64).with(Axis::R, 16);
        let input = g.add_storage(StorageKind::Sifc, Shape::vector(16), Precision::Int8).unwrap();
        let weight = g.add_storage(StorageKind::Swfc, shape, Precision::Int8).unwrap();
        let cvm = g
            .add_compute(ComputeBlock::new(
                ComputeOp::Cvm { bit_shift: 0 },
                shape,
                Precision::Int8,
                BiasType::None,
            ))
            .unwrap();
        let out = g.add_storage(StorageKind::Output, Shape::vector(64), Precision::Int8).unwrap();
        g.connect_whole(input, cvm, 0).unwrap();
        g.connect_whole(weight, cvm, 1).unwrap();
        g.connect_whole(cvm, out, 0).unwrap();

        let hw = HardwareConfig::single_chip(2, 2);
        let mut am = ActionModel::new(g, &hw);
        am.put_in(&core(0, 0).at_time(0, 1, PiIndex::Axon), cvm).unwrap();
        am.put_in(&core(0, 0).at_time(0, 1, PiIndex::Memory), weight).unwrap();

        let report = MemoryEvaluator::new(am.graph(), am.matrix())
            .evaluate(&core(0, 0))
            .unwrap();
        // weight 1024 B, input 16 -> 32 B, output 64 B; weight not double counted
        assert_eq!(report.per_phase[&(0, 1)], 1024 + 32 + 64);
        assert_eq!(report.per_phase[&(0, 0)], 0);
        assert_eq!(report.peak, 1120);
        assert!(!report.exceeds_capacity());
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut g = TaskGraph::new();
        let big = g
            .add_storage(StorageKind::Sw, Shape::vector(4096).with(Axis::R, 64), Precision::Int8)
            .unwrap();
        let mut hw = HardwareConfig::single_chip(1, 1);
        hw.core.memory_bytes = 1024;
        let mut am = ActionModel::new(g, &hw);
        am.put_in(&core(0, 0).at_time(0, 3, PiIndex::Memory), big).unwrap();
        let eval = MemoryEvaluator::new(am.graph(), am.matrix());
        let reports = eval.evaluate_occupied().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].exceeds_capacity());
    }
}
