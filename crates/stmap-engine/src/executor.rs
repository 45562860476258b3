//! Task execution at a placed coordinate
//!
//! The scheduler decides *when* a task may run (all its inputs have
//! arrived); a [`TaskExecutor`] decides whether the hardware at the task's
//! coordinate can run it *now*. A busy answer is not an error: the
//! scheduler retries the task later.

use crate::error::{EngineError, Result};
use crate::matrix::STMatrix;
use std::collections::BTreeSet;
use stmap_chip::MLCoord;
use stmap_graph::TaskId;

/// Outcome of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProceedStatus {
    /// Task executed
    Done,
    /// Unit cannot run the task yet
    Busy,
}

/// Executes tasks at their coordinates
pub trait TaskExecutor {
    /// Try to execute `task`, placed at `coord`
    ///
    /// # Errors
    ///
    /// Returns error if the coordinate does not hold the task or cannot
    /// be resolved in the matrix.
    fn proceed(&mut self, matrix: &STMatrix, coord: &MLCoord, task: TaskId) -> Result<ProceedStatus>;
}

/// Executes the units of a core-phase in pipeline order
///
/// Axon, Soma1, RouterSend, RouterRecv and Soma2 run one after the other
/// inside a point, so a task is busy until every earlier unit of its point
/// that holds a task has executed. Storage staged in the memory bank or a
/// router half is always ready.
#[derive(Debug, Clone, Default)]
pub struct PipelineExecutor {
    executed: BTreeSet<TaskId>,
}

impl PipelineExecutor {
    /// Executor with nothing executed
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `task` has executed
    #[must_use]
    pub fn has_executed(&self, task: TaskId) -> bool {
        self.executed.contains(&task)
    }

    /// Number of tasks executed
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.executed.len()
    }
}

impl TaskExecutor for PipelineExecutor {
    fn proceed(&mut self, matrix: &STMatrix, coord: &MLCoord, task: TaskId) -> Result<ProceedStatus> {
        let sd = matrix.space_depth();
        let pi = coord
            .pi(sd)
            .ok_or_else(|| EngineError::contract(coord, "a PI index is required"))?;
        let point = matrix
            .point(coord)?
            .ok_or_else(|| EngineError::NotFound { coord: coord.clone() })?;
        if !point.holds(pi, task) {
            return Err(EngineError::NotResident {
                task,
                coord: coord.clone(),
            });
        }

        let blocked = pi.predecessors().iter().any(|before| {
            point
                .occupant(*before)
                .is_some_and(|t| !self.executed.contains(&t))
        });
        if blocked && !pi.is_router() {
            return Ok(ProceedStatus::Busy);
        }
        self.executed.insert(task);
        Ok(ProceedStatus::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stmap_chip::{HardwareConfig, PiIndex};

    #[test]
    fn test_later_unit_waits_for_earlier() {
        let mut m = STMatrix::from_config(&HardwareConfig::single_chip(1, 1));
        let core = MLCoord::from_levels(vec![[0, 0].into(), [0, 0].into()]);
        let axon = core.at_time(0, 0, PiIndex::Axon);
        let soma = core.at_time(0, 0, PiIndex::Soma2);
        m.add_task(&axon, TaskId::new(1)).unwrap();
        m.add_task(&soma, TaskId::new(2)).unwrap();

        let mut exec = PipelineExecutor::new();
        assert_eq!(exec.proceed(&m, &soma, TaskId::new(2)).unwrap(), ProceedStatus::Busy);
        assert_eq!(exec.proceed(&m, &axon, TaskId::new(1)).unwrap(), ProceedStatus::Done);
        assert_eq!(exec.proceed(&m, &soma, TaskId::new(2)).unwrap(), ProceedStatus::Done);
        assert_eq!(exec.executed_count(), 2);
    }

    #[test]
    fn test_wrong_coordinate_is_error() {
        let m = STMatrix::from_config(&HardwareConfig::single_chip(1, 1));
        let core = MLCoord::from_levels(vec![[0, 0].into(), [0, 0].into()]);
        let mut exec = PipelineExecutor::new();
        let err = exec
            .proceed(&m, &core.at_time(0, 0, PiIndex::Memory), TaskId::new(4))
            .unwrap_err();
        assert!(matches!(err, EngineError::NotResident { .. }));
    }
}
