//! Reverse index of a placement: where each task sits and how each edge
//! travels.
//!
//! The matrix answers "what is at this coordinate"; the context answers
//! "where is this task". Only [`ActionModel`](crate::ActionModel) writes
//! it, in lock-step with the matrix.

use std::collections::BTreeMap;
use stmap_chip::MLCoord;
use stmap_graph::{EdgeId, TaskId};

/// Task and edge placement lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct STContext {
    tasks: BTreeMap<TaskId, MLCoord>,
    edges: BTreeMap<EdgeId, Vec<MLCoord>>,
}

impl STContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Full coordinate of a placed task
    #[must_use]
    pub fn get_ml_coord(&self, task: TaskId) -> Option<&MLCoord> {
        self.tasks.get(&task)
    }

    /// Whether the task has a coordinate
    #[must_use]
    pub fn is_placed(&self, task: TaskId) -> bool {
        self.tasks.contains_key(&task)
    }

    /// Route recorded for an edge
    #[must_use]
    pub fn get_route(&self, edge: EdgeId) -> Option<&[MLCoord]> {
        self.edges.get(&edge).map(Vec::as_slice)
    }

    /// Every placed task
    pub fn placements(&self) -> impl Iterator<Item = (TaskId, &MLCoord)> {
        self.tasks.iter().map(|(t, c)| (*t, c))
    }

    /// Every routed edge
    pub fn routes(&self) -> impl Iterator<Item = (EdgeId, &[MLCoord])> {
        self.edges.iter().map(|(e, p)| (*e, p.as_slice()))
    }

    /// Number of placed tasks
    #[must_use]
    pub fn placed_count(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn place(&mut self, task: TaskId, coord: MLCoord) -> Option<MLCoord> {
        self.tasks.insert(task, coord)
    }

    pub(crate) fn unplace(&mut self, task: TaskId) -> Option<MLCoord> {
        self.tasks.remove(&task)
    }

    pub(crate) fn set_route(&mut self, edge: EdgeId, path: Vec<MLCoord>) {
        self.edges.insert(edge, path);
    }

    pub(crate) fn clear_route(&mut self, edge: EdgeId) -> Option<Vec<MLCoord>> {
        self.edges.remove(&edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_and_unplace() {
        let mut ctx = STContext::new();
        let coord = MLCoord::from_levels(vec![[0, 0].into(), [1, 0].into()]);
        assert!(ctx.place(TaskId::new(3), coord.clone()).is_none());
        assert_eq!(ctx.get_ml_coord(TaskId::new(3)), Some(&coord));
        assert_eq!(ctx.placed_count(), 1);
        assert_eq!(ctx.unplace(TaskId::new(3)), Some(coord));
        assert!(!ctx.is_placed(TaskId::new(3)));
    }
}
