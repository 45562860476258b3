//! Dataflow scheduler over a placed graph
//!
//! A task is activated once every one of its input edges has delivered,
//! that is once every producer has fired. Activated tasks wait in a FIFO
//! queue; [`Scheduler::step`] hands the head to the executor at the task's
//! coordinate and either fires it or puts it back at the tail.

use crate::action::ActionModel;
use crate::error::{EngineError, Result};
use crate::executor::{ProceedStatus, TaskExecutor};
use std::collections::{BTreeMap, VecDeque};
use stmap_graph::TaskId;
use tracing::{debug, info, warn};

/// Lifecycle of a task in one schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Some input has not arrived
    NotActivated,
    /// Waiting for the executor
    Activated,
    /// Executed
    Fired,
}

/// What one [`Scheduler::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Task executed
    Fired(TaskId),
    /// Task was busy and went back in the queue
    Requeued(TaskId),
    /// Nothing is activated
    Idle,
}

/// Fan-in scheduler driving a [`TaskExecutor`]
#[derive(Debug)]
pub struct Scheduler<'a, E> {
    model: &'a ActionModel,
    executor: E,
    states: BTreeMap<TaskId, TaskState>,
    waiting: BTreeMap<TaskId, usize>,
    queue: VecDeque<TaskId>,
    fired: Vec<TaskId>,
}

impl<'a, E: TaskExecutor> Scheduler<'a, E> {
    /// Schedule every task of the model's graph; tasks without inputs
    /// start activated, in id order
    pub fn new(model: &'a ActionModel, executor: E) -> Self {
        let graph = model.graph();
        let mut states = BTreeMap::new();
        let mut waiting = BTreeMap::new();
        let mut queue = VecDeque::new();
        for block in graph.blocks() {
            let inputs = graph.input_edges(block.id()).len();
            if inputs == 0 {
                states.insert(block.id(), TaskState::Activated);
                queue.push_back(block.id());
            } else {
                states.insert(block.id(), TaskState::NotActivated);
            }
            waiting.insert(block.id(), inputs);
        }
        debug!("Scheduler: {} task(s), {} source(s)", states.len(), queue.len());
        Self {
            model,
            executor,
            states,
            waiting,
            queue,
            fired: Vec::new(),
        }
    }

    /// State of a task
    #[must_use]
    pub fn state(&self, task: TaskId) -> Option<TaskState> {
        self.states.get(&task).copied()
    }

    /// Tasks fired so far, in order
    #[must_use]
    pub fn fired(&self) -> &[TaskId] {
        &self.fired
    }

    /// Activated tasks waiting to run
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The executor
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Try the task at the head of the queue
    ///
    /// # Errors
    ///
    /// Returns `NotPlaced` for a task without a coordinate and whatever
    /// the executor returns.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let Some(task) = self.queue.pop_front() else {
            return Ok(StepOutcome::Idle);
        };
        let coord = self
            .model
            .context()
            .get_ml_coord(task)
            .ok_or(EngineError::NotPlaced(task))?;

        match self.executor.proceed(self.model.matrix(), coord, task)? {
            ProceedStatus::Busy => {
                self.queue.push_back(task);
                Ok(StepOutcome::Requeued(task))
            }
            ProceedStatus::Done => {
                self.states.insert(task, TaskState::Fired);
                self.fired.push(task);
                debug!("Fired {task} at {coord}");
                for edge in self.model.graph().output_edges(task) {
                    let consumer = edge.dst.task;
                    let Some(left) = self.waiting.get_mut(&consumer) else {
                        continue;
                    };
                    *left = left.saturating_sub(1);
                    if *left == 0 && self.states.get(&consumer) == Some(&TaskState::NotActivated) {
                        self.states.insert(consumer, TaskState::Activated);
                        self.queue.push_back(consumer);
                    }
                }
                Ok(StepOutcome::Fired(task))
            }
        }
    }

    /// Step until nothing is activated; returns the firing order
    ///
    /// # Errors
    ///
    /// Returns `Deadlock` when every queued task has been retried since
    /// the last firing, plus any [`step`](Self::step) error.
    pub fn run(&mut self) -> Result<Vec<TaskId>> {
        let mut retries = 0;
        loop {
            match self.step()? {
                StepOutcome::Idle => break,
                StepOutcome::Fired(_) => retries = 0,
                StepOutcome::Requeued(_) => {
                    retries += 1;
                    if retries >= self.queue.len() {
                        warn!("Scheduler stalled with {} task(s) queued", self.queue.len());
                        return Err(EngineError::Deadlock {
                            pending: self.queue.len(),
                        });
                    }
                }
            }
        }
        let never = self
            .states
            .values()
            .filter(|s| **s == TaskState::NotActivated)
            .count();
        info!("Schedule complete: {} fired, {never} never activated", self.fired.len());
        Ok(self.fired.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PipelineExecutor;
    use stmap_chip::{HardwareConfig, MLCoord, PiIndex};
    use stmap_graph::{BiasType, ComputeBlock, ComputeOp, Precision, Shape, StorageKind, TaskGraph};

    fn core(x: usize) -> MLCoord {
        MLCoord::from_levels(vec![[0, 0].into(), [x, 0].into()])
    }

    fn scale() -> ComputeBlock {
        ComputeBlock::new(
            ComputeOp::Cvs { bit_shift: 0 },
            Shape::vector(8),
            Precision::Int8,
            BiasType::None,
        )
    }

    #[test]
    fn test_fan_in_waits_for_every_producer() {
        let mut g = TaskGraph::new();
        let a = g.add_storage(StorageKind::Input, Shape::vector(8), Precision::Int8).unwrap();
        let b = g.add_storage(StorageKind::Input, Shape::vector(8), Precision::Int8).unwrap();
        let add = g
            .add_compute(ComputeBlock::new(
                ComputeOp::Cvvh { bit_shift: 0 },
                Shape::vector(8),
                Precision::Int8,
                BiasType::None,
            ))
            .unwrap();
        g.connect_whole(a, add, 0).unwrap();
        g.connect_whole(b, add, 1).unwrap();

        let mut am = ActionModel::new(g, &HardwareConfig::single_chip(2, 1));
        am.put_in(&core(0).at_time(0, 0, PiIndex::Memory), a).unwrap();
        am.put_in(&core(1).at_time(0, 0, PiIndex::Memory), b).unwrap();
        am.put_in(&core(1).at_time(0, 0, PiIndex::Axon), add).unwrap();

        let mut sched = Scheduler::new(&am, PipelineExecutor::new());
        assert_eq!(sched.state(add), Some(TaskState::NotActivated));
        assert_eq!(sched.step().unwrap(), StepOutcome::Fired(a));
        assert_eq!(sched.state(add), Some(TaskState::NotActivated));
        assert_eq!(sched.run().unwrap(), vec![a, b, add]);
        assert_eq!(sched.state(add), Some(TaskState::Fired));
    }

    #[test]
    fn test_pipeline_order_is_respected() {
        let mut g = TaskGraph::new();
        let input = g.add_storage(StorageKind::Input, Shape::vector(8), Precision::Int8).unwrap();
        let early = g.add_compute(scale()).unwrap();
        let late = g.add_compute(scale()).unwrap();
        g.connect_whole(input, early, 0).unwrap();
        g.connect_whole(input, late, 0).unwrap();

        let mut am = ActionModel::new(g, &HardwareConfig::single_chip(1, 1));
        am.put_in(&core(0).at_time(0, 0, PiIndex::Memory), input).unwrap();
        // `early` has the larger id but the earlier unit
        am.put_in(&core(0).at_time(0, 0, PiIndex::Soma2), early).unwrap();
        am.put_in(&core(0).at_time(0, 0, PiIndex::Soma1), late).unwrap();

        let mut sched = Scheduler::new(&am, PipelineExecutor::new());
        assert_eq!(sched.run().unwrap(), vec![input, late, early]);
    }

    #[test]
    fn test_cross_pipeline_dependency_deadlocks() {
        let mut g = TaskGraph::new();
        let input = g.add_storage(StorageKind::Input, Shape::vector(8), Precision::Int8).unwrap();
        let first = g.add_compute(scale()).unwrap();
        let second = g.add_compute(scale()).unwrap();
        let other = g.add_compute(scale()).unwrap();
        g.connect_whole(input, first, 0).unwrap();
        g.connect_whole(first, second, 0).unwrap();
        g.connect_whole(input, other, 0).unwrap();

        let mut am = ActionModel::new(g, &HardwareConfig::single_chip(1, 1));
        am.put_in(&core(0).at_time(0, 0, PiIndex::Memory), input).unwrap();
        // `second` runs before its producer within the point
        am.put_in(&core(0).at_time(0, 0, PiIndex::Soma1), second).unwrap();
        am.put_in(&core(0).at_time(0, 0, PiIndex::Soma2), first).unwrap();
        am.put_in(&core(0).at_time(0, 1, PiIndex::Soma1), other).unwrap();

        let mut sched = Scheduler::new(&am, PipelineExecutor::new());
        let err = sched.run().unwrap_err();
        assert!(matches!(err, EngineError::Deadlock { pending: 1 }));
        assert!(sched.fired().contains(&other));
    }

    #[test]
    fn test_unplaced_task_is_error() {
        let mut g = TaskGraph::new();
        let input = g.add_storage(StorageKind::Input, Shape::vector(8), Precision::Int8).unwrap();
        let am = ActionModel::new(g, &HardwareConfig::single_chip(1, 1));
        let mut sched = Scheduler::new(&am, PipelineExecutor::new());
        assert!(matches!(sched.step(), Err(EngineError::NotPlaced(t)) if t == input));
    }
}
